// Blockchain module
//
// This module contains the core ledger implementation including:
// - Transaction structure and transaction pool
// - Block structure and canonical hashing
// - Proof of work search
// - Blockchain structure

pub mod block;
pub mod chain;
pub mod pow;
pub mod transaction;

// Re-export main components for easier access
pub use block::{Block, BlockHash};
pub use chain::{Blockchain, BlockchainError};
pub use pow::{MiningBudget, Proof, ProofOfWork};
pub use transaction::{Address, Transaction, TransactionPool};
