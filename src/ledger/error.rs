use thiserror::Error;

use super::block::{Block, OwnerId, PayloadError};
use super::miner::MiningError;
use super::store::StorageError;

/// Errors that can occur while creating, storing or reading blocks
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Mining exhausted: no nonce below {max_nonce} satisfies difficulty {difficulty}")]
    MiningExhausted { difficulty: u32, max_nonce: u64 },

    #[error("Mining cancelled after {attempts} attempts")]
    MiningCancelled { attempts: u64 },

    #[error("Mining timed out after {attempts} attempts")]
    MiningTimedOut { attempts: u64 },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Invalid session: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error("Failed to read chain: {0}")]
    ChainRead(#[source] StorageError),

    /// The block was mined but could not be persisted; it can be appended again
    /// without re-mining.
    #[error("Failed to store block {}: {source}", .block.sequence_number)]
    Store {
        block: Box<Block>,
        #[source]
        source: StorageError,
    },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Block {sequence_number} not found in chain {owner}")]
    BlockNotFound { owner: OwnerId, sequence_number: u64 },

    #[error("Block {sequence_number} in chain {owner} is already completed")]
    AlreadyCompleted { owner: OwnerId, sequence_number: u64 },
}

impl From<MiningError> for LedgerError {
    fn from(err: MiningError) -> Self {
        match err {
            MiningError::Exhausted {
                difficulty,
                max_nonce,
            } => LedgerError::MiningExhausted {
                difficulty,
                max_nonce,
            },
            MiningError::Cancelled { attempts } => LedgerError::MiningCancelled { attempts },
            MiningError::TimedOut { attempts } => LedgerError::MiningTimedOut { attempts },
            MiningError::InvalidParameters(reason) => LedgerError::InvalidParameters(reason),
        }
    }
}

impl LedgerError {
    /// Whether retrying the same call with other mining parameters could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::MiningExhausted { .. }
                | LedgerError::MiningCancelled { .. }
                | LedgerError::MiningTimedOut { .. }
                | LedgerError::Store { .. }
        )
    }

    /// The sealed block carried by a failed append, if any
    pub fn unstored_block(&self) -> Option<&Block> {
        match self {
            LedgerError::Store { block, .. } => Some(block),
            _ => None,
        }
    }
}
