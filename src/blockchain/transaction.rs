use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use std::fmt;

/// Represents a blockchain address
///
/// Addresses are opaque identifiers; no format validation happens at this layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct Address(pub String);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address(s)
    }
}

/// Encoding of transaction values
///
/// Finite values are JSON numbers. `NaN`, `inf` and `-inf` have no JSON number
/// form and are written as those strings so they hash distinctly.
mod value_encoding {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Encoded {
        Number(f64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if value.is_nan() {
            "NaN".serialize(serializer)
        } else if value.is_infinite() && *value > 0.0 {
            "inf".serialize(serializer)
        } else if value.is_infinite() {
            "-inf".serialize(serializer)
        } else {
            value.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        match Encoded::deserialize(deserializer)? {
            Encoded::Number(value) => Ok(value),
            Encoded::Text(text) => match text.as_str() {
                "NaN" => Ok(f64::NAN),
                "inf" => Ok(f64::INFINITY),
                "-inf" => Ok(f64::NEG_INFINITY),
                other => Err(serde::de::Error::custom(format!("invalid value: {}", other))),
            },
        }
    }

    /// Equality that agrees with the encoding: every NaN is equal to every
    /// other NaN, and `0.0` differs from `-0.0`
    pub fn same(a: f64, b: f64) -> bool {
        (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
    }
}

/// Represents a value transfer between two addresses
///
/// Field order is part of the canonical hash input of a block.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Transaction {
    /// Sender's address
    #[serde(rename = "sender_blockchain_address")]
    #[schema(value_type = String)]
    sender: Address,

    /// Recipient's address
    #[serde(rename = "recipient_blockchain_address")]
    #[schema(value_type = String)]
    recipient: Address,

    /// Amount being transferred
    #[serde(with = "value_encoding")]
    #[schema(value_type = f64)]
    value: f64,
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.sender == other.sender
            && self.recipient == other.recipient
            && value_encoding::same(self.value, other.value)
    }
}

impl Transaction {
    /// Creates a new transaction
    ///
    /// # Arguments
    ///
    /// * `sender` - The address of the sender
    /// * `recipient` - The address of the recipient
    /// * `value` - The amount to transfer
    ///
    /// # Returns
    ///
    /// A new Transaction instance
    pub fn new(sender: impl Into<Address>, recipient: impl Into<Address>, value: f64) -> Self {
        Transaction {
            sender: sender.into(),
            recipient: recipient.into(),
            value,
        }
    }

    pub fn sender(&self) -> &Address {
        &self.sender
    }

    pub fn recipient(&self) -> &Address {
        &self.recipient
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "_".repeat(40);
        writeln!(f, "{}", rule)?;
        writeln!(f, "sender_blockchain_address      {}", self.sender)?;
        writeln!(f, "recipient_blockchain_address   {}", self.recipient)?;
        writeln!(f, "value                          {:.1}", self.value)?;
        writeln!(f, "{}", rule)
    }
}

/// Staging area for transactions not yet committed to a block
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Vec<Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a new transaction to the pool
    pub fn add_transaction(
        &mut self,
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        value: f64,
    ) -> &Transaction {
        self.transactions.push(Transaction::new(sender, recipient, value));
        &self.transactions[self.transactions.len() - 1]
    }

    /// Returns an independent copy of the pool contents, in insertion order
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.iter().cloned().collect()
    }

    /// Empties the pool
    pub fn clear(&mut self) {
        self.transactions.clear();
    }

    /// Checks whether the pool holds exactly `transactions`, in order
    pub fn matches(&self, transactions: &[Transaction]) -> bool {
        self.first_difference(transactions).is_none()
    }

    /// Position of the first transaction where the pool and `transactions`
    /// disagree, counting a missing entry on either side as a difference
    pub fn first_difference(&self, transactions: &[Transaction]) -> Option<usize> {
        self.transactions
            .iter()
            .zip(transactions)
            .position(|(pooled, other)| pooled != other)
            .or_else(|| {
                (self.transactions.len() != transactions.len())
                    .then(|| self.transactions.len().min(transactions.len()))
            })
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
