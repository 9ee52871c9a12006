// Ledger module
//
// This module contains the proof-of-work study ledger including:
// - Block and session record structures
// - Canonical hashing
// - Nonce search (proof of work)
// - Chain storage (in memory and sled)
// - Chain verification
// - Statistics and export

pub mod block;
pub mod builder;
pub mod chain;
pub mod error;
pub mod hasher;
pub mod miner;
pub mod stats;
pub mod storage;
pub mod store;
pub mod verifier;

// Re-export main components for easier access
pub use block::{Block, OwnerId, PayloadError, SessionRecord, SessionStatus};
pub use chain::Ledger;
pub use error::LedgerError;
pub use miner::{CancelFlag, Miner, MiningError, MiningParams};
pub use stats::{ChainExport, ChainStats};
pub use storage::SledStore;
pub use store::{ChainStore, MemoryStore, StorageError};
pub use verifier::{verify_chain, ValidationReport, Violation, ViolationKind};
