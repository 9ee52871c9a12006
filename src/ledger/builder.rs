use log::debug;

use super::block::{timestamp_now, Block, Draft, OwnerId, SessionRecord};
use super::error::LedgerError;
use super::miner::{CancelFlag, Miner, MiningParams};
use super::store::ChainStore;

/// Assembles and seals the next block of a chain
///
/// The builder reads the chain's tail but never writes; persisting the
/// returned block is up to the caller.
pub struct BlockBuilder<'a> {
    store: &'a dyn ChainStore,
    miner: &'a Miner,
}

impl<'a> BlockBuilder<'a> {
    pub fn new(store: &'a dyn ChainStore, miner: &'a Miner) -> Self {
        BlockBuilder { store, miner }
    }

    /// Creates a sealed block holding `payload` on top of the owner's chain
    ///
    /// # Arguments
    ///
    /// * `owner_id` - The owner of the chain to extend
    /// * `payload` - The already validated session record
    /// * `params` - Difficulty, attempt ceiling and timeout for mining
    /// * `cancel` - Flag that abandons mining when triggered
    ///
    /// # Returns
    ///
    /// The sealed block, linked to the current tail (or the genesis sentinel)
    pub fn create_block(
        &self,
        owner_id: &OwnerId,
        payload: SessionRecord,
        params: &MiningParams,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        let tail = self.store.tail(owner_id).map_err(LedgerError::ChainRead)?;

        let draft = Draft::after(
            tail.as_ref(),
            owner_id.clone(),
            payload,
            timestamp_now(),
            params.difficulty,
        );

        let seal = self.miner.mine(&draft.content(), params, cancel)?;
        debug!(
            "Sealed block {} for chain {} after {} attempts",
            draft.sequence_number, owner_id, seal.attempts
        );

        Ok(draft.seal(seal))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::block::{SessionStatus, GENESIS_PREVIOUS_HASH};
    use crate::ledger::hasher;
    use crate::ledger::store::{MemoryStore, StorageError};
    use chrono::NaiveDate;

    fn record() -> SessionRecord {
        SessionRecord::new(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            "Math",
            60,
            SessionStatus::Completed,
        )
    }

    /// Store whose reads always fail
    struct BrokenStore;

    impl ChainStore for BrokenStore {
        fn tail(&self, _owner: &OwnerId) -> Result<Option<Block>, StorageError> {
            Err(StorageError::Corrupted("tail unreadable".to_string()))
        }

        fn append(&self, _block: &Block) -> Result<(), StorageError> {
            panic!("builder must not append");
        }

        fn chain(&self, _owner: &OwnerId) -> Result<Vec<Block>, StorageError> {
            Ok(Vec::new())
        }

        fn block(&self, _owner: &OwnerId, _sequence_number: u64) -> Result<Option<Block>, StorageError> {
            Ok(None)
        }

        fn owners(&self) -> Result<Vec<OwnerId>, StorageError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_create_genesis_block() {
        let store = MemoryStore::new();
        let miner = Miner::sequential();
        let owner = OwnerId::from("u1");

        let block = BlockBuilder::new(&store, &miner)
            .create_block(&owner, record(), &MiningParams::new(2, 1_000_000), &CancelFlag::new())
            .unwrap();

        assert_eq!(block.sequence_number, 0);
        assert_eq!(block.previous_hash, GENESIS_PREVIOUS_HASH);
        assert_eq!(block.difficulty, 2);
        assert!(block.hash.starts_with("00"));
        assert_eq!(block.hash, block.calculate_hash());
        assert!(store.chain(&owner).unwrap().is_empty());
    }

    #[test]
    fn test_create_block_links_to_tail() {
        let store = MemoryStore::new();
        let miner = Miner::sequential();
        let owner = OwnerId::from("u1");
        let builder = BlockBuilder::new(&store, &miner);
        let params = MiningParams::new(1, 100_000);

        let genesis = builder.create_block(&owner, record(), &params, &CancelFlag::new()).unwrap();
        store.append(&genesis).unwrap();
        let next = builder.create_block(&owner, record(), &params, &CancelFlag::new()).unwrap();

        assert_eq!(next.sequence_number, 1);
        assert_eq!(next.previous_hash, genesis.hash);
        assert!(hasher::meets_difficulty(&next.hash, 1));
    }

    #[test]
    fn test_read_failure_is_chain_read_error() {
        let miner = Miner::sequential();

        let result = BlockBuilder::new(&BrokenStore, &miner).create_block(
            &OwnerId::from("u1"),
            record(),
            &MiningParams::new(1, 10),
            &CancelFlag::new(),
        );

        assert!(matches!(result, Err(LedgerError::ChainRead(_))));
    }

    #[test]
    fn test_exhaustion_produces_no_block() {
        let store = MemoryStore::new();
        let miner = Miner::sequential();

        let result = BlockBuilder::new(&store, &miner).create_block(
            &OwnerId::from("u1"),
            record(),
            &MiningParams::new(16, 200),
            &CancelFlag::new(),
        );

        assert!(matches!(
            result,
            Err(LedgerError::MiningExhausted {
                difficulty: 16,
                max_nonce: 200
            })
        ));
    }
}
