use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;

use std::fmt;

use super::transaction::Transaction;

/// Errors that can occur while hashing a block
#[derive(Debug, Error)]
pub enum BlockError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),
}

/// A 32-byte SHA-256 digest, rendered as lowercase hex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BlockHash(pub [u8; 32]);

impl BlockHash {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, BlockError> {
        let bytes = hex::decode(s).map_err(|e| BlockError::InvalidHash(e.to_string()))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| BlockError::InvalidHash("Hash must be 32 bytes".to_string()))?;
        Ok(BlockHash(bytes))
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for BlockHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for BlockHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BlockHash::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Hash input of a block. Field order is fixed.
#[derive(Serialize)]
struct CanonicalBlock<'a> {
    timestamp: i64,
    nonce: u64,
    previous_hash: &'a BlockHash,
    transactions: &'a [Transaction],
}

/// Encodes the given block fields as the JSON hash input
pub fn canonical_bytes(
    timestamp: i64,
    nonce: u64,
    previous_hash: &BlockHash,
    transactions: &[Transaction],
) -> Result<Vec<u8>, BlockError> {
    Ok(serde_json::to_vec(&CanonicalBlock {
        timestamp,
        nonce,
        previous_hash,
        transactions,
    })?)
}

/// Computes the SHA-256 digest of the canonical encoding of the given block fields
///
/// # Returns
///
/// The digest, or an error if the fields could not be encoded
pub fn calculate_hash(
    timestamp: i64,
    nonce: u64,
    previous_hash: &BlockHash,
    transactions: &[Transaction],
) -> Result<BlockHash, BlockError> {
    let encoded = canonical_bytes(timestamp, nonce, previous_hash, transactions)?;

    let digest = Sha256::digest(&encoded);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    Ok(BlockHash(out))
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Block {
    /// Hash of the previous block
    #[schema(value_type = String)]
    previous_hash: BlockHash,

    /// Creation time in nanoseconds since the Unix epoch
    timestamp: i64,

    /// Proof of work (nonce)
    nonce: u64,

    /// Transactions committed by this block, in pool order
    transactions: Vec<Transaction>,
}

impl Block {
    /// Creates a new block stamped with the current time
    ///
    /// # Arguments
    ///
    /// * `nonce` - The proof of work (nonce)
    /// * `previous_hash` - The hash of the previous block
    /// * `transactions` - The transaction snapshot to commit
    ///
    /// # Returns
    ///
    /// A new Block instance
    pub fn new(nonce: u64, previous_hash: BlockHash, transactions: Vec<Transaction>) -> Self {
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self::with_timestamp(timestamp, nonce, previous_hash, transactions)
    }

    pub fn with_timestamp(
        timestamp: i64,
        nonce: u64,
        previous_hash: BlockHash,
        transactions: Vec<Transaction>,
    ) -> Self {
        Block {
            previous_hash,
            timestamp,
            nonce,
            transactions,
        }
    }

    /// The zero-valued block whose hash seeds the genesis block
    pub fn empty() -> Self {
        Self::with_timestamp(0, 0, BlockHash::default(), Vec::new())
    }

    /// Calculates the hash of the block over all of its fields
    pub fn hash(&self) -> Result<BlockHash, BlockError> {
        calculate_hash(
            self.timestamp,
            self.nonce,
            &self.previous_hash,
            &self.transactions,
        )
    }

    /// Calculates the hash with the timestamp fixed at zero, as checked by proof of work
    pub fn proof_hash(&self) -> Result<BlockHash, BlockError> {
        calculate_hash(0, self.nonce, &self.previous_hash, &self.transactions)
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn previous_hash(&self) -> &BlockHash {
        &self.previous_hash
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "previous_hash  {}", self.previous_hash)?;
        writeln!(f, "timestamp      {}", self.timestamp)?;
        writeln!(f, "nonce          {}", self.nonce)?;
        for transaction in &self.transactions {
            write!(f, "{}", transaction)?;
        }
        Ok(())
    }
}
