//! A minimal append-only ledger with proof-of-work block admission.

pub mod api;
pub mod blockchain;
pub mod settings;

pub use blockchain::{Block, BlockHash, Blockchain, BlockchainError, MiningBudget, Transaction};
pub use settings::LedgerConfig;
