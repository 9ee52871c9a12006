use std::path::Path;

use log::{debug, warn};
use sled::transaction::{abort, ConflictableTransactionResult, TransactionError};
use sled::{Db, Transactional, Tree};

use super::block::{Block, OwnerId};
use super::store::{check_append, ChainStore, StorageError};

/// Persistent chain store backed by sled
///
/// Blocks live in the `blocks` tree under a key made of the length-prefixed
/// owner id followed by the big-endian sequence number, so a prefix scan
/// yields an owner's chain in order. The `owners` tree indexes chain owners.
pub struct SledStore {
    /// The database instance
    db: Db,

    /// Tree for blocks
    blocks: Tree,

    /// Tree for chain owners
    owners: Tree,
}

impl std::fmt::Debug for SledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SledStore")
            .field("blocks", &self.blocks.len())
            .finish()
    }
}

/// Key prefix shared by every block of `owner`
fn chain_prefix(owner: &OwnerId) -> Vec<u8> {
    let id = owner.as_str().as_bytes();
    let mut prefix = Vec::with_capacity(4 + id.len() + 8);
    prefix.extend_from_slice(&(id.len() as u32).to_be_bytes());
    prefix.extend_from_slice(id);
    prefix
}

fn block_key(owner: &OwnerId, sequence_number: u64) -> Vec<u8> {
    let mut key = chain_prefix(owner);
    key.extend_from_slice(&sequence_number.to_be_bytes());
    key
}

fn decode_block(value: &[u8]) -> Result<Block, StorageError> {
    bincode::deserialize(value).map_err(|e| StorageError::Deserialization(e.to_string()))
}

impl SledStore {
    /// Opens (or creates) a store in the given directory
    ///
    /// # Arguments
    ///
    /// * `path` - The path to the database directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;

        let blocks = db.open_tree("blocks")?;
        let owners = db.open_tree("owners")?;

        Ok(Self { db, blocks, owners })
    }

    /// Opens a store that is discarded when dropped
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new().temporary(true).open()?;

        let blocks = db.open_tree("blocks")?;
        let owners = db.open_tree("owners")?;

        Ok(Self { db, blocks, owners })
    }

    /// Flushes all pending writes to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    /// Total number of stored blocks across all chains
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }
}

impl ChainStore for SledStore {
    fn tail(&self, owner: &OwnerId) -> Result<Option<Block>, StorageError> {
        match self.blocks.scan_prefix(chain_prefix(owner)).next_back() {
            Some(entry) => {
                let (_, value) = entry?;
                decode_block(&value).map(Some)
            }
            None => Ok(None),
        }
    }

    fn append(&self, block: &Block) -> Result<(), StorageError> {
        let key = block_key(&block.owner_id, block.sequence_number);
        let value = bincode::serialize(block)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;

        // Storing the same block again completes an append whose flush failed.
        let already_stored = self.blocks.get(&key)?.as_deref() == Some(value.as_slice());
        if !already_stored {
            let tail = self.tail(&block.owner_id)?;
            check_append(tail.as_ref(), block)?;
        }

        // The block and its owner entry land together or not at all. A
        // concurrent writer may have taken this sequence number since the tail
        // was read.
        let outcome = (&self.blocks, &self.owners).transaction(
            |(blocks, owners)| -> ConflictableTransactionResult<(), ()> {
                match blocks.get(key.as_slice())? {
                    Some(existing) if &*existing != value.as_slice() => return abort(()),
                    Some(_) => {}
                    None => {
                        blocks.insert(key.as_slice(), value.as_slice())?;
                    }
                }
                owners.insert(block.owner_id.as_str().as_bytes(), &[] as &[u8])?;
                Ok(())
            },
        );

        match outcome {
            Ok(()) => {}
            Err(TransactionError::Abort(())) => {
                return Err(StorageError::Conflict {
                    owner: block.owner_id.clone(),
                    reason: format!("sequence number {} already taken", block.sequence_number),
                });
            }
            Err(TransactionError::Storage(e)) => return Err(e.into()),
        }

        self.flush()?;

        debug!(
            "Stored block {} for chain {}",
            block.sequence_number, block.owner_id
        );
        Ok(())
    }

    fn chain(&self, owner: &OwnerId) -> Result<Vec<Block>, StorageError> {
        // Blocks appended after the tail is read are left out of the snapshot.
        let tail = match self.tail(owner)? {
            Some(tail) => tail,
            None => return Ok(Vec::new()),
        };

        let start = block_key(owner, 0);
        let end = block_key(owner, tail.sequence_number);

        let mut blocks = Vec::new();
        for entry in self.blocks.range(start..=end) {
            let (key, value) = entry?;
            match decode_block(&value) {
                Ok(block) => blocks.push(block),
                Err(e) => {
                    warn!(
                        "Failed to deserialize block {}: {}",
                        String::from_utf8_lossy(&key),
                        e
                    );
                    return Err(StorageError::Corrupted(format!(
                        "chain {} holds an unreadable block: {}",
                        owner, e
                    )));
                }
            }
        }

        Ok(blocks)
    }

    fn block(&self, owner: &OwnerId, sequence_number: u64) -> Result<Option<Block>, StorageError> {
        match self.blocks.get(block_key(owner, sequence_number))? {
            Some(value) => decode_block(&value).map(Some),
            None => Ok(None),
        }
    }

    fn owners(&self) -> Result<Vec<OwnerId>, StorageError> {
        let mut owners = Vec::new();

        for entry in self.owners.iter() {
            let (key, _) = entry?;
            let id = String::from_utf8(key.to_vec())
                .map_err(|e| StorageError::Corrupted(format!("owner id is not UTF-8: {}", e)))?;
            owners.push(OwnerId(id));
        }

        Ok(owners)
    }
}
