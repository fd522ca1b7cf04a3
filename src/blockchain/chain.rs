use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use std::fmt;
use std::sync::Arc;

use super::block::{Block, BlockError, BlockHash};
use super::pow::{MiningBudget, Proof, ProofOfWork, ProofOfWorkError};
use super::transaction::{Address, Transaction, TransactionPool};
use crate::settings::LedgerConfig;

/// Errors that can occur during blockchain operations
#[derive(Debug, Error)]
pub enum BlockchainError {
    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Proof of work error: {0}")]
    ProofOfWorkError(#[from] ProofOfWorkError),

    #[error("Chain has no blocks")]
    EmptyChain,

    #[error("Invalid previous hash: expected {expected}, got {got}")]
    InvalidPreviousHash { expected: BlockHash, got: BlockHash },

    #[error("Stale snapshot: pool differs from the mined transactions at position {position} ({mined} mined, {live} pending)")]
    StaleSnapshotMismatch {
        position: usize,
        mined: usize,
        live: usize,
    },

    #[error("Invalid proof: nonce {0} does not meet the difficulty")]
    InvalidProof(u64),
}

impl BlockchainError {
    /// True when the search ran out of budget; the caller may retry
    pub fn is_proof_not_found(&self) -> bool {
        matches!(
            self,
            BlockchainError::ProofOfWorkError(ProofOfWorkError::ProofNotFound { .. })
        )
    }
}

/// Represents the blockchain
///
/// Clones share the same blocks and pool. Appends are serialized by the
/// chain's write lock; the pool lock is always taken after it.
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks
    chain: Arc<RwLock<Vec<Block>>>,

    /// Pending transactions to be included in the next block
    transaction_pool: Arc<Mutex<TransactionPool>>,

    proof_of_work: ProofOfWork,

    /// How many times `mine_block` re-mines after the pool or tip moved
    max_remine_attempts: u32,
}

impl Blockchain {
    /// Creates a new blockchain with a genesis block
    ///
    /// # Arguments
    ///
    /// * `config` - Mining difficulty, workers and re-mine limit
    ///
    /// # Returns
    ///
    /// A new Blockchain instance
    pub fn new(config: &LedgerConfig) -> Result<Self, BlockchainError> {
        let proof_of_work = config.proof_of_work()?;
        Self::with_proof_of_work(proof_of_work, config.max_remine_attempts)
    }

    pub fn with_proof_of_work(
        proof_of_work: ProofOfWork,
        max_remine_attempts: u32,
    ) -> Result<Self, BlockchainError> {
        let blockchain = Blockchain {
            chain: Arc::new(RwLock::new(Vec::new())),
            transaction_pool: Arc::new(Mutex::new(TransactionPool::new())),
            proof_of_work,
            max_remine_attempts,
        };

        blockchain.create_genesis_block()?;

        Ok(blockchain)
    }

    /// Creates the genesis block (first block in the chain)
    fn create_genesis_block(&self) -> Result<(), BlockchainError> {
        let previous_hash = Block::empty().hash()?;
        let genesis_block = Block::new(0, previous_hash, Vec::new());

        self.chain.write().push(genesis_block);
        info!("Created genesis block");

        Ok(())
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> Result<Block, BlockchainError> {
        self.chain
            .read()
            .last()
            .cloned()
            .ok_or(BlockchainError::EmptyChain)
    }

    /// Adds a new transaction to the pool
    ///
    /// # Returns
    ///
    /// The index of the block that will include this transaction
    pub fn add_transaction(
        &self,
        sender: impl Into<Address>,
        recipient: impl Into<Address>,
        value: f64,
    ) -> u64 {
        self.transaction_pool
            .lock()
            .add_transaction(sender, recipient, value);

        self.chain.read().len() as u64
    }

    /// Appends a block holding the current pool contents and clears the pool
    ///
    /// The nonce is not checked against the difficulty; `previous_hash`
    /// must be the hash of the current last block.
    pub fn create_block(
        &self,
        nonce: u64,
        previous_hash: BlockHash,
    ) -> Result<Block, BlockchainError> {
        let mut chain = self.chain.write();
        let mut pool = self.transaction_pool.lock();

        check_linkage(&chain, &previous_hash)?;

        let block = Block::new(nonce, previous_hash, pool.snapshot());
        chain.push(block.clone());
        pool.clear();

        info!("Appended block {} with nonce {}", chain.len() - 1, nonce);
        Ok(block)
    }

    /// Searches for a proof over a snapshot of the pool and the current tip
    pub fn proof_of_work(&self, budget: &MiningBudget) -> Result<Proof, BlockchainError> {
        let previous_hash = self.last_block()?.hash()?;
        let transactions = self.transaction_pool.lock().snapshot();

        let nonce = self
            .proof_of_work
            .search(&previous_hash, &transactions, budget)?;

        Ok(Proof {
            nonce,
            previous_hash,
            transactions,
        })
    }

    /// Appends a block holding exactly the transactions the proof was mined over
    ///
    /// Fails without touching the chain or the pool if the tip moved, if the
    /// pool no longer equals the mined snapshot, or if the proof is invalid.
    pub fn commit(&self, proof: Proof) -> Result<Block, BlockchainError> {
        let mut chain = self.chain.write();
        let mut pool = self.transaction_pool.lock();

        check_linkage(&chain, &proof.previous_hash)?;

        if let Some(position) = pool.first_difference(&proof.transactions) {
            warn!(
                "Pool changed during mining at position {} ({} mined, {} pending)",
                position,
                proof.transactions.len(),
                pool.len()
            );
            return Err(BlockchainError::StaleSnapshotMismatch {
                position,
                mined: proof.transactions.len(),
                live: pool.len(),
            });
        }

        if !self.proof_of_work.verify(&proof)? {
            return Err(BlockchainError::InvalidProof(proof.nonce));
        }

        let block = Block::new(proof.nonce, proof.previous_hash, proof.transactions);
        chain.push(block.clone());
        pool.clear();

        info!(
            "Appended block {} with nonce {} and {} transactions",
            chain.len() - 1,
            block.nonce(),
            block.transactions().len()
        );
        Ok(block)
    }

    /// Mines the pending transactions into a new block
    ///
    /// Re-mines when the pool or the tip changed between the search and
    /// the append, up to the configured number of times.
    pub fn mine_block(&self, budget: &MiningBudget) -> Result<Block, BlockchainError> {
        let mut remined = 0;

        loop {
            let proof = self.proof_of_work(budget)?;

            match self.commit(proof) {
                Err(
                    err @ (BlockchainError::StaleSnapshotMismatch { .. }
                    | BlockchainError::InvalidPreviousHash { .. }),
                ) if remined < self.max_remine_attempts => {
                    remined += 1;
                    warn!("Re-mining ({}/{}): {}", remined, self.max_remine_attempts, err);
                }
                result => return result,
            }
        }
    }

    /// Gets the entire blockchain
    pub fn get_chain(&self) -> Vec<Block> {
        self.chain.read().clone()
    }

    pub fn len(&self) -> usize {
        self.chain.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.read().is_empty()
    }

    /// Gets all pending transactions
    pub fn get_pending_transactions(&self) -> Vec<Transaction> {
        self.transaction_pool.lock().snapshot()
    }

    pub fn difficulty(&self) -> usize {
        self.proof_of_work.difficulty()
    }

    /// Validates the blockchain
    ///
    /// Every block after genesis must link to its predecessor's hash and
    /// carry a nonce that meets the difficulty.
    pub fn is_valid(&self) -> Result<bool, BlockchainError> {
        let chain = self.chain.read();

        for pair in chain.windows(2) {
            let (previous_block, current_block) = (&pair[0], &pair[1]);

            if *current_block.previous_hash() != previous_block.hash()? {
                return Ok(false);
            }

            if !self.proof_of_work.valid_proof(
                current_block.nonce(),
                current_block.previous_hash(),
                current_block.transactions(),
            )? {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

fn check_linkage(chain: &[Block], previous_hash: &BlockHash) -> Result<(), BlockchainError> {
    let expected = chain.last().ok_or(BlockchainError::EmptyChain)?.hash()?;

    if expected != *previous_hash {
        return Err(BlockchainError::InvalidPreviousHash {
            expected,
            got: *previous_hash,
        });
    }

    Ok(())
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, block) in self.chain.read().iter().enumerate() {
            writeln!(f, "{} Chain {} {}", "=".repeat(10), i, "=".repeat(20))?;
            write!(f, "{}", block)?;
        }
        writeln!(f, "{}", "*".repeat(40))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blockchain(difficulty: usize) -> Blockchain {
        Blockchain::with_proof_of_work(ProofOfWork::new(difficulty).unwrap(), 3).unwrap()
    }

    #[test]
    fn test_new_blockchain() {
        let blockchain = blockchain(3);
        let chain = blockchain.get_chain();

        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].nonce(), 0);
        assert!(chain[0].transactions().is_empty());
        assert_eq!(*chain[0].previous_hash(), Block::empty().hash().unwrap());
        assert!(blockchain.get_pending_transactions().is_empty());
    }

    #[test]
    fn test_last_block_on_empty_chain() {
        let blockchain = Blockchain {
            chain: Arc::new(RwLock::new(Vec::new())),
            transaction_pool: Arc::new(Mutex::new(TransactionPool::new())),
            proof_of_work: ProofOfWork::new(1).unwrap(),
            max_remine_attempts: 0,
        };

        assert!(matches!(blockchain.last_block(), Err(BlockchainError::EmptyChain)));
        assert!(matches!(
            blockchain.create_block(0, BlockHash::default()),
            Err(BlockchainError::EmptyChain)
        ));
    }

    #[test]
    fn test_create_block_consumes_pool() {
        let blockchain = blockchain(1);
        blockchain.add_transaction("x", "y", 200.0);
        blockchain.add_transaction("c", "k", 3070.0);
        let pending = blockchain.get_pending_transactions();

        let previous_hash = blockchain.last_block().unwrap().hash().unwrap();
        let block = blockchain.create_block(17, previous_hash).unwrap();

        assert_eq!(block.transactions(), pending.as_slice());
        assert_eq!(block.nonce(), 17);
        assert!(blockchain.get_pending_transactions().is_empty());
        assert_eq!(blockchain.len(), 2);
    }

    #[test]
    fn test_create_block_rejects_wrong_previous_hash() {
        let blockchain = blockchain(1);
        blockchain.add_transaction("a", "b", 1.0);

        let err = blockchain.create_block(0, BlockHash([0xee; 32])).unwrap_err();

        assert!(matches!(err, BlockchainError::InvalidPreviousHash { .. }));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_add_transaction_reports_next_index() {
        let blockchain = blockchain(1);
        assert_eq!(blockchain.add_transaction("a", "b", 1.0), 1);
    }

    #[test]
    fn test_mine_block() {
        let blockchain = blockchain(2);
        blockchain.add_transaction("a", "b", 20000.0);
        let previous_hash = blockchain.last_block().unwrap().hash().unwrap();

        let block = blockchain.mine_block(&MiningBudget::unbounded()).unwrap();

        assert_eq!(*block.previous_hash(), previous_hash);
        assert_eq!(block.transactions(), &[Transaction::new("a", "b", 20000.0)]);
        assert!(block.proof_hash().unwrap().to_hex().starts_with("00"));
        assert!(blockchain.get_pending_transactions().is_empty());
        assert_eq!(blockchain.last_block().unwrap(), block);
    }

    #[test]
    fn test_commit_detects_stale_snapshot() {
        let blockchain = blockchain(1);
        blockchain.add_transaction("a", "b", 1.0);

        let proof = blockchain.proof_of_work(&MiningBudget::unbounded()).unwrap();
        blockchain.add_transaction("late", "arrival", 2.0);

        let err = blockchain.commit(proof).unwrap_err();

        assert!(matches!(
            err,
            BlockchainError::StaleSnapshotMismatch {
                position: 1,
                mined: 1,
                live: 2
            }
        ));
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_pending_transactions().len(), 2);
    }

    #[test]
    fn test_stale_snapshot_names_changed_position() {
        let err = BlockchainError::StaleSnapshotMismatch {
            position: 0,
            mined: 1,
            live: 1,
        };
        assert_eq!(
            err.to_string(),
            "Stale snapshot: pool differs from the mined transactions at position 0 (1 mined, 1 pending)"
        );
    }

    #[test]
    fn test_mine_block_with_non_finite_values() {
        let blockchain = blockchain(1);
        blockchain.add_transaction("a", "b", f64::NAN);
        blockchain.add_transaction("c", "d", f64::INFINITY);

        let block = blockchain.mine_block(&MiningBudget::unbounded()).unwrap();

        assert!(block.transactions()[0].value().is_nan());
        assert_eq!(block.transactions()[1].value(), f64::INFINITY);
        assert!(blockchain.get_pending_transactions().is_empty());
        assert_eq!(blockchain.len(), 2);
        assert!(blockchain.is_valid().unwrap());

        blockchain.add_transaction("e", "f", 1.0);
        blockchain.mine_block(&MiningBudget::unbounded()).unwrap();
        assert_eq!(blockchain.len(), 3);
    }

    #[test]
    fn test_commit_rejects_invalid_proof() {
        let blockchain = blockchain(3);
        blockchain.add_transaction("a", "b", 1.0);

        let mut proof = blockchain.proof_of_work(&MiningBudget::unbounded()).unwrap();
        let pow = ProofOfWork::new(3).unwrap();
        proof.nonce = (0..).find(|n| !pow.valid_proof(*n, &proof.previous_hash, &proof.transactions).unwrap()).unwrap();

        let err = blockchain.commit(proof).unwrap_err();
        assert!(matches!(err, BlockchainError::InvalidProof(_)));
        assert_eq!(blockchain.len(), 1);
    }

    #[test]
    fn test_commit_rejects_moved_tip() {
        let blockchain = blockchain(1);
        let proof = blockchain.proof_of_work(&MiningBudget::unbounded()).unwrap();
        blockchain.mine_block(&MiningBudget::unbounded()).unwrap();

        assert!(matches!(
            blockchain.commit(proof),
            Err(BlockchainError::InvalidPreviousHash { .. })
        ));
    }

    #[test]
    fn test_mine_block_reports_exhausted_budget() {
        let blockchain = Blockchain::with_proof_of_work(ProofOfWork::new(64).unwrap(), 3).unwrap();
        blockchain.add_transaction("a", "b", 1.0);

        let err = blockchain
            .mine_block(&MiningBudget::unbounded().with_max_attempts(1))
            .unwrap_err();

        assert!(err.is_proof_not_found());
        assert_eq!(blockchain.len(), 1);
        assert_eq!(blockchain.get_pending_transactions().len(), 1);
    }

    #[test]
    fn test_blockchain_validity() {
        let blockchain = blockchain(2);
        blockchain.add_transaction("a", "b", 10.0);
        blockchain.mine_block(&MiningBudget::unbounded()).unwrap();
        blockchain.add_transaction("b", "c", 5.0);
        blockchain.mine_block(&MiningBudget::unbounded()).unwrap();

        assert!(blockchain.is_valid().unwrap());

        let chain = blockchain.get_chain();
        for pair in chain.windows(2) {
            assert_eq!(*pair[1].previous_hash(), pair[0].hash().unwrap());
        }
    }

    #[test]
    fn test_unproven_block_fails_validation() {
        let blockchain = blockchain(4);
        let previous_hash = blockchain.last_block().unwrap().hash().unwrap();
        let pow = ProofOfWork::new(4).unwrap();
        let nonce = (0..).find(|n| !pow.valid_proof(*n, &previous_hash, &[]).unwrap()).unwrap();

        blockchain.create_block(nonce, previous_hash).unwrap();

        assert!(!blockchain.is_valid().unwrap());
    }

    #[test]
    fn test_display() {
        let blockchain = blockchain(1);
        blockchain.add_transaction("a", "b", 20000.0);
        blockchain.mine_block(&MiningBudget::unbounded()).unwrap();

        let rendered = blockchain.to_string();
        assert!(rendered.contains("========== Chain 0 ===================="));
        assert!(rendered.contains("========== Chain 1 ===================="));
        assert!(rendered.contains("value                          20000.0"));
        assert!(rendered.ends_with(&format!("{}\n", "*".repeat(40))));
    }
}
