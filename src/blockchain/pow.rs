use log::{debug, info, warn};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::block::{calculate_hash, BlockError, BlockHash};
use super::transaction::Transaction;

/// A SHA-256 digest renders as 64 hex characters
pub const MAX_DIFFICULTY: usize = 64;

/// Errors that can occur during the proof of work search
#[derive(Debug, Error)]
pub enum ProofOfWorkError {
    #[error("Invalid difficulty: {0} (maximum: 64)")]
    InvalidDifficulty(usize),

    #[error("No proof found within budget after {attempts} attempts")]
    ProofNotFound { attempts: u64 },

    #[error("Block error: {0}")]
    BlockError(#[from] BlockError),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

/// Bounds on a single proof of work search
///
/// A budget with no limits set searches until a proof is found.
#[derive(Debug, Clone, Default)]
pub struct MiningBudget {
    max_attempts: Option<u64>,
    deadline: Option<Instant>,
    cancel: Option<Arc<AtomicBool>>,
}

impl MiningBudget {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u64) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Stops the search once `flag` is set
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn max_attempts(&self) -> Option<u64> {
        self.max_attempts
    }

    fn exhausted(&self, attempts: u64) -> bool {
        if self.max_attempts.map_or(false, |max| attempts >= max) {
            return true;
        }
        if self.deadline.map_or(false, |deadline| Instant::now() >= deadline) {
            return true;
        }
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// A nonce found for a specific previous hash and transaction snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Proof {
    pub nonce: u64,
    pub previous_hash: BlockHash,
    pub transactions: Vec<Transaction>,
}

/// Checks whether the hex rendering of `hash` starts with `difficulty` zeros
pub fn meets_difficulty(hash: &BlockHash, difficulty: usize) -> bool {
    let hex = hash.to_hex();
    difficulty <= hex.len() && hex.bytes().take(difficulty).all(|c| c == b'0')
}

/// Brute-force nonce search under a leading-zeros difficulty predicate
///
/// With more than one worker the nonce space is scanned in consecutive
/// batches, each searched in parallel for its lowest valid nonce. The result
/// is always the lowest valid nonce, same as the sequential search.
#[derive(Debug, Clone)]
pub struct ProofOfWork {
    difficulty: usize,
    batch_size: usize,
    workers: Option<Arc<ThreadPool>>,
}

impl ProofOfWork {
    /// Creates a sequential searcher
    ///
    /// # Arguments
    ///
    /// * `difficulty` - Number of leading hex zeros required, at most 64
    pub fn new(difficulty: usize) -> Result<Self, ProofOfWorkError> {
        if difficulty > MAX_DIFFICULTY {
            return Err(ProofOfWorkError::InvalidDifficulty(difficulty));
        }

        Ok(ProofOfWork {
            difficulty,
            batch_size: 1,
            workers: None,
        })
    }

    /// Spreads the search over `workers` threads, `batch_size` nonces at a time
    pub fn with_workers(mut self, workers: usize, batch_size: usize) -> Result<Self, ProofOfWorkError> {
        if workers <= 1 {
            self.workers = None;
            return Ok(self);
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pow-worker-{}", i))
            .build()
            .map_err(|e| ProofOfWorkError::WorkerPool(e.to_string()))?;

        self.workers = Some(Arc::new(pool));
        self.batch_size = batch_size.max(1);
        Ok(self)
    }

    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Checks a nonce against the neutral-timestamp hash of the candidate block
    pub fn valid_proof(
        &self,
        nonce: u64,
        previous_hash: &BlockHash,
        transactions: &[Transaction],
    ) -> Result<bool, ProofOfWorkError> {
        let hash = calculate_hash(0, nonce, previous_hash, transactions)?;
        Ok(meets_difficulty(&hash, self.difficulty))
    }

    pub fn verify(&self, proof: &Proof) -> Result<bool, ProofOfWorkError> {
        self.valid_proof(proof.nonce, &proof.previous_hash, &proof.transactions)
    }

    /// Finds the lowest nonce satisfying the difficulty, starting from zero
    ///
    /// # Returns
    ///
    /// The nonce, or `ProofNotFound` once the budget runs out
    pub fn search(
        &self,
        previous_hash: &BlockHash,
        transactions: &[Transaction],
        budget: &MiningBudget,
    ) -> Result<u64, ProofOfWorkError> {
        debug!(
            "Searching for proof over {} transactions at difficulty {}",
            transactions.len(),
            self.difficulty
        );

        let started = Instant::now();
        let result = match &self.workers {
            Some(pool) => pool.install(|| self.search_parallel(previous_hash, transactions, budget)),
            None => self.search_sequential(previous_hash, transactions, budget),
        };

        match &result {
            Ok(nonce) => info!("Found proof {} in {:?}", nonce, started.elapsed()),
            Err(ProofOfWorkError::ProofNotFound { attempts }) => {
                warn!("Gave up proof search after {} attempts", attempts)
            }
            Err(_) => {}
        }

        result
    }

    fn search_sequential(
        &self,
        previous_hash: &BlockHash,
        transactions: &[Transaction],
        budget: &MiningBudget,
    ) -> Result<u64, ProofOfWorkError> {
        let mut nonce: u64 = 0;

        loop {
            if budget.exhausted(nonce) {
                return Err(ProofOfWorkError::ProofNotFound { attempts: nonce });
            }
            if self.valid_proof(nonce, previous_hash, transactions)? {
                return Ok(nonce);
            }
            nonce = nonce
                .checked_add(1)
                .ok_or(ProofOfWorkError::ProofNotFound { attempts: u64::MAX })?;
        }
    }

    fn search_parallel(
        &self,
        previous_hash: &BlockHash,
        transactions: &[Transaction],
        budget: &MiningBudget,
    ) -> Result<u64, ProofOfWorkError> {
        let mut start: u64 = 0;

        loop {
            if budget.exhausted(start) {
                return Err(ProofOfWorkError::ProofNotFound { attempts: start });
            }

            let mut end = start.saturating_add(self.batch_size as u64);
            if let Some(max) = budget.max_attempts {
                end = end.min(max);
            }

            let found = (0..(end - start) as usize)
                .into_par_iter()
                .map(|offset| start + offset as u64)
                .find_map_first(|nonce| match self.valid_proof(nonce, previous_hash, transactions) {
                    Ok(true) => Some(Ok(nonce)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                });

            if let Some(result) = found {
                return result;
            }
            if end == u64::MAX {
                return Err(ProofOfWorkError::ProofNotFound { attempts: end });
            }
            start = end;
        }
    }
}
