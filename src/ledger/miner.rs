use log::debug;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use thiserror::Error;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::hasher::{self, Content, PreparedContent, HASH_HEX_LEN};

/// Number of nonces tried between two cancellation checks
const BATCH_SIZE: u64 = 4096;

/// Errors that can occur while searching for a nonce
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MiningError {
    #[error("No nonce below {max_nonce} satisfies difficulty {difficulty}")]
    Exhausted { difficulty: u32, max_nonce: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    Cancelled { attempts: u64 },

    #[error("Mining timed out after {attempts} attempts")]
    TimedOut { attempts: u64 },

    #[error("Invalid mining parameters: {0}")]
    InvalidParameters(String),
}

/// Parameters of a single mining call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiningParams {
    /// Leading zero hex characters required
    pub difficulty: u32,

    /// Number of nonces to try, starting at zero
    pub max_nonce: u64,

    /// Wall-clock budget for the search
    pub timeout: Option<Duration>,
}

impl MiningParams {
    pub fn new(difficulty: u32, max_nonce: u64) -> Self {
        MiningParams {
            difficulty,
            max_nonce,
            timeout: None,
        }
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        MiningParams {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Rejects parameters no search could ever satisfy
    pub fn validate(&self) -> Result<(), MiningError> {
        if self.max_nonce == 0 {
            return Err(MiningError::InvalidParameters(
                "max_nonce must be positive".to_string(),
            ));
        }

        if self.difficulty as usize > HASH_HEX_LEN {
            return Err(MiningError::InvalidParameters(format!(
                "difficulty {} exceeds digest length {}",
                self.difficulty, HASH_HEX_LEN
            )));
        }

        Ok(())
    }
}

/// Thread-safe flag used to abandon a running mine
///
/// Once triggered the flag stays set. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a successful search
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    pub nonce: u64,
    pub hash: String,
    pub attempts: u64,
}

/// Searches the nonce space for a hash meeting a difficulty target
///
/// The search always returns the smallest satisfying nonce, whether it runs on
/// the calling thread or on a worker pool.
#[derive(Clone)]
pub struct Miner {
    pool: Option<Arc<ThreadPool>>,
}

impl std::fmt::Debug for Miner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Miner")
            .field("threads", &self.threads())
            .finish()
    }
}

impl Default for Miner {
    fn default() -> Self {
        Miner::sequential()
    }
}

impl Miner {
    /// Creates a miner that searches on the calling thread
    pub fn sequential() -> Self {
        Miner { pool: None }
    }

    /// Creates a miner that splits each batch of nonces across `threads` workers
    ///
    /// One thread (or zero) gives a sequential miner.
    pub fn with_threads(threads: usize) -> Result<Self, MiningError> {
        if threads <= 1 {
            return Ok(Miner::sequential());
        }

        let pool = ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("miner-{}", i))
            .build()
            .map_err(|e| MiningError::InvalidParameters(e.to_string()))?;

        Ok(Miner {
            pool: Some(Arc::new(pool)),
        })
    }

    /// Number of threads used per search
    pub fn threads(&self) -> usize {
        self.pool
            .as_ref()
            .map(|pool| pool.current_num_threads())
            .unwrap_or(1)
    }

    /// Finds the first nonce in `0..max_nonce` whose hash meets the difficulty
    ///
    /// # Arguments
    ///
    /// * `content` - The block content to seal
    /// * `params` - Difficulty, attempt ceiling and optional timeout
    /// * `cancel` - Flag checked between batches
    ///
    /// # Returns
    ///
    /// The winning nonce and its hash, or why the search stopped
    pub fn mine(
        &self,
        content: &Content<'_>,
        params: &MiningParams,
        cancel: &CancelFlag,
    ) -> Result<Seal, MiningError> {
        params.validate()?;

        let prepared = PreparedContent::new(content);
        let difficulty = params.difficulty;
        let deadline = params.timeout.map(|timeout| Instant::now() + timeout);
        let started = Instant::now();

        let mut start = 0u64;
        while start < params.max_nonce {
            if cancel.is_triggered() {
                return Err(MiningError::Cancelled { attempts: start });
            }
            if deadline.map_or(false, |deadline| Instant::now() >= deadline) {
                return Err(MiningError::TimedOut { attempts: start });
            }

            let end = start.saturating_add(BATCH_SIZE).min(params.max_nonce);
            let found = self.search(&prepared, difficulty, start, end);

            if let Some(nonce) = found {
                debug!(
                    "Found nonce {} for difficulty {} in {:?}",
                    nonce,
                    difficulty,
                    started.elapsed()
                );

                return Ok(Seal {
                    nonce,
                    hash: prepared.digest(nonce),
                    attempts: nonce + 1,
                });
            }

            start = end;
        }

        Err(MiningError::Exhausted {
            difficulty,
            max_nonce: params.max_nonce,
        })
    }

    fn search(&self, prepared: &PreparedContent, difficulty: u32, start: u64, end: u64) -> Option<u64> {
        let satisfies = |nonce: &u64| hasher::meets_difficulty(&prepared.digest(*nonce), difficulty);

        match &self.pool {
            None => (start..end).find(satisfies),
            Some(pool) => pool.install(|| (start..end).into_par_iter().find_first(satisfies)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::block::{OwnerId, SessionRecord, SessionStatus, GENESIS_PREVIOUS_HASH};
    use chrono::NaiveDate;

    fn record() -> SessionRecord {
        SessionRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "Math",
            60,
            SessionStatus::Completed,
        )
    }

    fn content<'a>(owner: &'a OwnerId, payload: &'a SessionRecord, difficulty: u32) -> Content<'a> {
        Content {
            sequence_number: 0,
            owner_id: owner,
            payload,
            created_at: "2024-03-01 12:00:00",
            previous_hash: GENESIS_PREVIOUS_HASH,
            difficulty,
        }
    }

    #[test]
    fn test_mine_meets_difficulty() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 2);

        let seal = Miner::sequential()
            .mine(&content, &MiningParams::new(2, 1_000_000), &CancelFlag::new())
            .unwrap();

        assert!(seal.hash.starts_with("00"));
        assert_eq!(seal.hash, hasher::calculate_hash(&content, seal.nonce));
        assert_eq!(seal.attempts, seal.nonce + 1);
    }

    #[test]
    fn test_mine_returns_smallest_nonce() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 2);

        let seal = Miner::sequential()
            .mine(&content, &MiningParams::new(2, 1_000_000), &CancelFlag::new())
            .unwrap();

        for nonce in 0..seal.nonce {
            assert!(!hasher::meets_difficulty(&hasher::calculate_hash(&content, nonce), 2));
        }
    }

    #[test]
    fn test_zero_difficulty_accepts_first_nonce() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 0);

        let seal = Miner::sequential()
            .mine(&content, &MiningParams::new(0, 1), &CancelFlag::new())
            .unwrap();

        assert_eq!(seal.nonce, 0);
    }

    #[test]
    fn test_parallel_miner_agrees_with_sequential() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 3);
        let params = MiningParams::new(3, 1_000_000);

        let sequential = Miner::sequential().mine(&content, &params, &CancelFlag::new()).unwrap();
        let parallel = Miner::with_threads(4).unwrap();
        let found = parallel.mine(&content, &params, &CancelFlag::new()).unwrap();

        assert_eq!(parallel.threads(), 4);
        assert_eq!(found, sequential);
    }

    #[test]
    fn test_exhaustion_is_an_error() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 12);

        let result = Miner::sequential().mine(&content, &MiningParams::new(12, 500), &CancelFlag::new());

        assert_eq!(
            result,
            Err(MiningError::Exhausted {
                difficulty: 12,
                max_nonce: 500
            })
        );
    }

    #[test]
    fn test_cancelled_flag_stops_search() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 12);
        let cancel = CancelFlag::new();
        let shared = cancel.clone();
        shared.trigger();

        let result = Miner::sequential().mine(&content, &MiningParams::new(12, u64::MAX), &cancel);

        assert!(cancel.is_triggered());
        assert_eq!(result, Err(MiningError::Cancelled { attempts: 0 }));
    }

    #[test]
    fn test_timeout_stops_search() {
        let owner = OwnerId::from("u1");
        let payload = record();
        let content = content(&owner, &payload, 12);
        let params = MiningParams::new(12, u64::MAX).with_timeout(Duration::ZERO);

        let result = Miner::sequential().mine(&content, &params, &CancelFlag::new());

        assert!(matches!(result, Err(MiningError::TimedOut { .. })));
    }

    #[test]
    fn test_invalid_parameters_are_rejected() {
        assert!(MiningParams::new(2, 0).validate().is_err());
        assert!(MiningParams::new(65, 10).validate().is_err());
        assert!(MiningParams::new(64, 10).validate().is_ok());
    }
}
