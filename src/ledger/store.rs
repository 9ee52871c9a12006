//! The chain store seam and an in-memory implementation.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

use super::block::{Block, OwnerId, GENESIS_PREVIOUS_HASH, GENESIS_SEQUENCE};

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Append rejected for chain {owner}: {reason}")]
    Conflict { owner: OwnerId, reason: String },

    #[error("Corrupted store: {0}")]
    Corrupted(String),
}

/// Append-only storage of per-owner chains
///
/// Implementations never update or delete a stored block.
pub trait ChainStore: Send + Sync {
    /// Returns the last block of the owner's chain, if any
    fn tail(&self, owner: &OwnerId) -> Result<Option<Block>, StorageError>;

    /// Appends a sealed block to its owner's chain
    ///
    /// Fails with [`StorageError::Conflict`] unless the block directly follows
    /// the current tail. Appending a block that is already stored succeeds and
    /// leaves the chain unchanged, so a failed append can be retried.
    fn append(&self, block: &Block) -> Result<(), StorageError>;

    /// Returns a consistent snapshot of the owner's chain in sequence order
    fn chain(&self, owner: &OwnerId) -> Result<Vec<Block>, StorageError>;

    /// Returns the block with the given sequence number, if any
    fn block(&self, owner: &OwnerId, sequence_number: u64) -> Result<Option<Block>, StorageError>;

    /// Returns every owner that has at least one block
    fn owners(&self) -> Result<Vec<OwnerId>, StorageError>;
}

/// Checks that `block` may follow `tail` in an append-only chain
pub fn check_append(tail: Option<&Block>, block: &Block) -> Result<(), StorageError> {
    let (expected_sequence, expected_previous) = match tail {
        Some(tail) => (tail.sequence_number + 1, tail.hash.as_str()),
        None => (GENESIS_SEQUENCE, GENESIS_PREVIOUS_HASH),
    };

    if block.sequence_number != expected_sequence {
        return Err(StorageError::Conflict {
            owner: block.owner_id.clone(),
            reason: format!(
                "expected sequence number {}, got {}",
                expected_sequence, block.sequence_number
            ),
        });
    }

    if block.previous_hash != expected_previous {
        return Err(StorageError::Conflict {
            owner: block.owner_id.clone(),
            reason: format!(
                "block {} does not link to the current tail",
                block.sequence_number
            ),
        });
    }

    Ok(())
}

/// In-memory chain store
#[derive(Debug, Default)]
pub struct MemoryStore {
    chains: DashMap<OwnerId, Vec<Block>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given blocks verbatim
    ///
    /// No append checks are applied, so tampered chains can be loaded for
    /// inspection.
    pub fn from_blocks(blocks: impl IntoIterator<Item = Block>) -> Self {
        let store = MemoryStore::new();
        for block in blocks {
            store
                .chains
                .entry(block.owner_id.clone())
                .or_default()
                .push(block);
        }
        for mut chain in store.chains.iter_mut() {
            chain.sort_by_key(|block| block.sequence_number);
        }
        store
    }
}

impl ChainStore for MemoryStore {
    fn tail(&self, owner: &OwnerId) -> Result<Option<Block>, StorageError> {
        Ok(self
            .chains
            .get(owner)
            .and_then(|chain| chain.last().cloned()))
    }

    fn append(&self, block: &Block) -> Result<(), StorageError> {
        match self.chains.entry(block.owner_id.clone()) {
            Entry::Occupied(entry) if entry.get().contains(block) => {}
            Entry::Occupied(mut entry) => {
                check_append(entry.get().last(), block)?;
                entry.get_mut().push(block.clone());
            }
            Entry::Vacant(entry) => {
                check_append(None, block)?;
                entry.insert(vec![block.clone()]);
            }
        }

        Ok(())
    }

    fn chain(&self, owner: &OwnerId) -> Result<Vec<Block>, StorageError> {
        Ok(self
            .chains
            .get(owner)
            .map(|chain| chain.value().clone())
            .unwrap_or_default())
    }

    fn block(&self, owner: &OwnerId, sequence_number: u64) -> Result<Option<Block>, StorageError> {
        Ok(self.chains.get(owner).and_then(|chain| {
            chain
                .iter()
                .find(|block| block.sequence_number == sequence_number)
                .cloned()
        }))
    }

    fn owners(&self) -> Result<Vec<OwnerId>, StorageError> {
        let mut owners: Vec<OwnerId> = self
            .chains
            .iter()
            .filter(|chain| !chain.is_empty())
            .map(|chain| chain.key().clone())
            .collect();
        owners.sort();
        Ok(owners)
    }
}
