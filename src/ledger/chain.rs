use chrono::NaiveDate;
use dashmap::DashMap;
use log::{info, warn};

use std::sync::{Arc, Mutex, PoisonError};

use super::block::{Block, OwnerId, SessionRecord, SessionStatus};
use super::builder::BlockBuilder;
use super::error::LedgerError;
use super::miner::{CancelFlag, Miner, MiningParams};
use super::stats::{ChainExport, ChainStats};
use super::store::ChainStore;
use super::verifier::{verify_chain, ValidationReport};

/// The ledger: a chain store plus the rules for extending it
///
/// Appends to one owner's chain are serialized by a per-owner lock that is
/// held from reading the tail until the new block is stored. Chains of
/// different owners are extended independently.
#[derive(Clone)]
pub struct Ledger {
    /// Storage for all chains
    store: Arc<dyn ChainStore>,

    /// Nonce search, possibly multi-threaded
    miner: Arc<Miner>,

    /// Mining parameters used when the caller supplies none
    params: MiningParams,

    /// One lock per chain
    locks: Arc<DashMap<OwnerId, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("miner", &self.miner)
            .field("params", &self.params)
            .finish()
    }
}

impl Ledger {
    /// Creates a ledger over `store`
    ///
    /// # Arguments
    ///
    /// * `store` - Where chains are kept
    /// * `miner` - The nonce search to seal blocks with
    /// * `params` - Default difficulty, attempt ceiling and timeout
    pub fn new(store: Arc<dyn ChainStore>, miner: Miner, params: MiningParams) -> Self {
        Ledger {
            store,
            miner: Arc::new(miner),
            params,
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Default mining parameters
    pub fn params(&self) -> MiningParams {
        self.params
    }

    fn chain_lock(&self, owner: &OwnerId) -> Arc<Mutex<()>> {
        self.locks
            .entry(owner.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Records a session as a new block using the default mining parameters
    pub fn record_session(&self, owner: &OwnerId, payload: SessionRecord) -> Result<Block, LedgerError> {
        self.record_session_with(owner, payload, &self.params, &CancelFlag::new())
    }

    /// Mines and appends a block holding `payload` to the owner's chain
    ///
    /// Nothing is stored unless mining succeeds. When mining succeeds but the
    /// append fails, the sealed block is returned inside
    /// [`LedgerError::Store`] so it can be handed to [`Ledger::append`].
    pub fn record_session_with(
        &self,
        owner: &OwnerId,
        payload: SessionRecord,
        params: &MiningParams,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        payload.validate()?;

        let lock = self.chain_lock(owner);
        // The guarded state is (), so a poisoned lock carries no broken invariant.
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.extend_locked(owner, payload, params, cancel)
    }

    /// Mines and appends the next block; the caller holds the chain lock
    fn extend_locked(
        &self,
        owner: &OwnerId,
        payload: SessionRecord,
        params: &MiningParams,
        cancel: &CancelFlag,
    ) -> Result<Block, LedgerError> {
        let block = BlockBuilder::new(self.store.as_ref(), &self.miner)
            .create_block(owner, payload, params, cancel)?;

        if let Err(source) = self.store.append(&block) {
            warn!(
                "Mined block {} for chain {} but failed to store it: {}",
                block.sequence_number, owner, source
            );
            return Err(LedgerError::Store {
                block: Box::new(block),
                source,
            });
        }

        info!(
            "Block #{} mined for chain {} (nonce: {})",
            block.sequence_number, owner, block.nonce
        );
        Ok(block)
    }

    /// Appends an already sealed block, e.g. one returned by a failed store
    pub fn append(&self, block: Block) -> Result<Block, LedgerError> {
        if !block.has_valid_seal() {
            return Err(LedgerError::InvalidBlock(format!(
                "block {} does not carry a valid proof of work",
                block.sequence_number
            )));
        }

        let lock = self.chain_lock(&block.owner_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        match self.store.append(&block) {
            Ok(()) => {
                info!(
                    "Stored block #{} for chain {}",
                    block.sequence_number, block.owner_id
                );
                Ok(block)
            }
            Err(source) => Err(LedgerError::Store {
                block: Box::new(block),
                source,
            }),
        }
    }

    /// Marks a pending session as completed by appending an amending block
    ///
    /// The original block is left untouched.
    pub fn complete_session(&self, owner: &OwnerId, sequence_number: u64) -> Result<Block, LedgerError> {
        let lock = self.chain_lock(owner);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let chain = self.chain(owner)?;
        let original = chain
            .iter()
            .find(|block| block.sequence_number == sequence_number)
            .ok_or_else(|| LedgerError::BlockNotFound {
                owner: owner.clone(),
                sequence_number,
            })?;

        let already_completed = original.payload.status == SessionStatus::Completed
            || chain.iter().any(|block| {
                block.payload.supersedes == Some(sequence_number)
                    && block.payload.status == SessionStatus::Completed
            });
        if already_completed {
            return Err(LedgerError::AlreadyCompleted {
                owner: owner.clone(),
                sequence_number,
            });
        }

        let payload = original.payload.completed_from(sequence_number);
        self.extend_locked(owner, payload, &self.params, &CancelFlag::new())
    }

    /// Gets the last block of the owner's chain
    pub fn tail(&self, owner: &OwnerId) -> Result<Option<Block>, LedgerError> {
        self.store.tail(owner).map_err(LedgerError::ChainRead)
    }

    /// Gets one block by sequence number
    pub fn block(&self, owner: &OwnerId, sequence_number: u64) -> Result<Option<Block>, LedgerError> {
        self.store
            .block(owner, sequence_number)
            .map_err(LedgerError::ChainRead)
    }

    /// Gets a snapshot of the owner's whole chain
    pub fn chain(&self, owner: &OwnerId) -> Result<Vec<Block>, LedgerError> {
        self.store.chain(owner).map_err(LedgerError::ChainRead)
    }

    /// Gets every owner with a chain
    pub fn owners(&self) -> Result<Vec<OwnerId>, LedgerError> {
        self.store.owners().map_err(LedgerError::ChainRead)
    }

    /// Verifies the owner's chain
    pub fn verify_owner(&self, owner: &OwnerId) -> Result<ValidationReport, LedgerError> {
        let blocks = self.chain(owner)?;
        Ok(verify_chain(&blocks))
    }

    /// Verifies every chain in the store
    pub fn verify_all(&self) -> Result<Vec<(OwnerId, ValidationReport)>, LedgerError> {
        let mut reports = Vec::new();

        for owner in self.owners()? {
            let report = self.verify_owner(&owner)?;
            if !report.is_valid() {
                warn!("Chain {} is invalid: {}", owner, report.summary());
            }
            reports.push((owner, report));
        }

        Ok(reports)
    }

    /// Summarises the owner's chain as of `today`
    pub fn stats(&self, owner: &OwnerId, today: NaiveDate) -> Result<ChainStats, LedgerError> {
        let blocks = self.chain(owner)?;
        let report = verify_chain(&blocks);
        Ok(ChainStats::from_chain(owner, &blocks, &report, today))
    }

    /// Builds a self-describing export of the owner's chain
    pub fn export(&self, owner: &OwnerId) -> Result<ChainExport, LedgerError> {
        let blocks = self.chain(owner)?;
        let report = verify_chain(&blocks);
        Ok(ChainExport::new(owner, blocks, report))
    }
}
