//! The persistence seam for chains, locks, and transfers.
//!
//! The store is an explicitly constructed, injectable client, not a
//! process-wide lazy connection handle. Implementations are expected to
//! enforce three constraints atomically: global uniqueness of stage
//! transaction ids, at most one lock per user, and at most one lock per
//! chain. Everything else is plain insert/find/update/delete.
//!
//! [`MemoryStore`] is the reference implementation; a document database
//! (one document per chain, append-to-array and field-set as the only
//! mutations) maps onto the same trait.

use crate::{
    chain::{
        custody::{ActionLock, ChainTransfer, TransferId},
        ActionChain, ChainId, Stage,
    },
    error::{Error, Result},
    token::transaction::TxId,
    util::Timestamp,
};
use std::collections::{HashMap, HashSet};

/// Storage operations the custody state machine runs against.
pub trait CustodyStore {
    /// Insert a chain with its first stage, returning the assigned id.
    /// Fails if the stage's transaction id is already recorded anywhere.
    fn insert_chain(&mut self, owner_id: &str, first_stage: Stage, title: Option<String>, now: Timestamp) -> Result<ChainId>;

    /// Fetch a chain by id.
    fn chain(&self, chain_id: &ChainId) -> Result<ActionChain>;

    /// Find the chain holding a stage with the given transaction id.
    fn chain_by_stage_txid(&self, txid: &TxId) -> Result<Option<ActionChain>>;

    /// Append a stage to a chain, optionally replacing the title. Fails on
    /// a finalized chain or a duplicate stage transaction id.
    fn push_stage(&mut self, chain_id: &ChainId, stage: Stage, title: Option<String>, now: Timestamp) -> Result<()>;

    /// Mark a chain finalized.
    fn set_finalized(&mut self, chain_id: &ChainId, at: Timestamp) -> Result<()>;

    /// Insert a lock, enforcing both uniqueness constraints: fails with
    /// [`Error::LockHeldByUser`] if the user holds any lock, then with
    /// [`Error::ChainLockedByAnother`] if any lock exists on the chain.
    fn insert_lock(&mut self, lock: ActionLock) -> Result<()>;

    /// The lock held by a user, if any.
    fn lock_for_user(&self, user_id: &str) -> Result<Option<ActionLock>>;

    /// The lock on a chain, if any.
    fn lock_for_chain(&self, chain_id: &ChainId) -> Result<Option<ActionLock>>;

    /// Delete the lock matching user and chain. Returns whether one was
    /// deleted.
    fn delete_lock(&mut self, user_id: &str, chain_id: &ChainId) -> Result<bool>;

    /// Insert a transfer record, returning the assigned id.
    fn insert_transfer(&mut self, chain_id: &ChainId, sender_id: &str, receiver_id: &str, sent_at: Timestamp) -> Result<TransferId>;

    /// Fetch a transfer by id.
    fn transfer(&self, transfer_id: &TransferId) -> Result<Option<ChainTransfer>>;

    /// All transfers for a chain, in insertion order.
    fn transfers_for_chain(&self, chain_id: &ChainId) -> Result<Vec<ChainTransfer>>;

    /// Flip a transfer to continued.
    fn mark_transfer_continued(&mut self, transfer_id: &TransferId, at: Timestamp) -> Result<()>;

    /// Transfers sent to a receiver that have not been continued.
    fn pending_transfers(&self, receiver_id: &str) -> Result<Vec<ChainTransfer>>;
}

/// An in-memory store. Single-writer by construction (`&mut self`), which
/// is exactly the serializability the lock constraints need.
#[derive(Debug, Default)]
pub struct MemoryStore {
    chains: HashMap<ChainId, ActionChain>,
    locks: Vec<ActionLock>,
    transfers: Vec<ChainTransfer>,
    stage_txids: HashSet<TxId>,
    seq: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> String {
        self.seq += 1;
        format!("{:024x}", self.seq)
    }

    fn claim_stage_txid(&mut self, stage: &Stage) -> Result<()> {
        if !self.stage_txids.insert(stage.transaction_id().clone()) {
            return Err(Error::StageTxidDuplicate);
        }
        Ok(())
    }
}

impl CustodyStore for MemoryStore {
    fn insert_chain(&mut self, owner_id: &str, first_stage: Stage, title: Option<String>, now: Timestamp) -> Result<ChainId> {
        self.claim_stage_txid(&first_stage)?;
        let chain_id = ChainId::new(self.next_id());
        let chain = ActionChain::create(chain_id.clone(), owner_id, first_stage, title, now);
        self.chains.insert(chain_id.clone(), chain);
        Ok(chain_id)
    }

    fn chain(&self, chain_id: &ChainId) -> Result<ActionChain> {
        self.chains.get(chain_id).cloned().ok_or(Error::ChainNotFound)
    }

    fn chain_by_stage_txid(&self, txid: &TxId) -> Result<Option<ActionChain>> {
        Ok(self
            .chains
            .values()
            .find(|chain| chain.stages().iter().any(|stage| stage.transaction_id() == txid))
            .cloned())
    }

    fn push_stage(&mut self, chain_id: &ChainId, stage: Stage, title: Option<String>, now: Timestamp) -> Result<()> {
        if !self.chains.contains_key(chain_id) {
            return Err(Error::ChainNotFound);
        }
        if *self.chains[chain_id].finalized() {
            return Err(Error::ChainFinalized);
        }
        self.claim_stage_txid(&stage)?;
        let chain = self.chains.get_mut(chain_id).ok_or(Error::ChainNotFound)?;
        chain.push_stage(stage, title, now);
        Ok(())
    }

    fn set_finalized(&mut self, chain_id: &ChainId, at: Timestamp) -> Result<()> {
        let chain = self.chains.get_mut(chain_id).ok_or(Error::ChainNotFound)?;
        chain.mark_finalized(at);
        Ok(())
    }

    fn insert_lock(&mut self, lock: ActionLock) -> Result<()> {
        if self.locks.iter().any(|held| held.user_id() == lock.user_id()) {
            return Err(Error::LockHeldByUser);
        }
        if self.locks.iter().any(|held| held.chain_id() == lock.chain_id()) {
            return Err(Error::ChainLockedByAnother);
        }
        self.locks.push(lock);
        Ok(())
    }

    fn lock_for_user(&self, user_id: &str) -> Result<Option<ActionLock>> {
        Ok(self.locks.iter().find(|lock| lock.user_id() == user_id).cloned())
    }

    fn lock_for_chain(&self, chain_id: &ChainId) -> Result<Option<ActionLock>> {
        Ok(self.locks.iter().find(|lock| lock.chain_id() == chain_id).cloned())
    }

    fn delete_lock(&mut self, user_id: &str, chain_id: &ChainId) -> Result<bool> {
        let before = self.locks.len();
        self.locks
            .retain(|lock| !(lock.user_id() == user_id && lock.chain_id() == chain_id));
        Ok(self.locks.len() < before)
    }

    fn insert_transfer(&mut self, chain_id: &ChainId, sender_id: &str, receiver_id: &str, sent_at: Timestamp) -> Result<TransferId> {
        let transfer_id = TransferId::new(self.next_id());
        self.transfers.push(ChainTransfer::new(
            transfer_id.clone(),
            chain_id.clone(),
            sender_id,
            receiver_id,
            sent_at,
        ));
        Ok(transfer_id)
    }

    fn transfer(&self, transfer_id: &TransferId) -> Result<Option<ChainTransfer>> {
        Ok(self.transfers.iter().find(|transfer| transfer.id() == transfer_id).cloned())
    }

    fn transfers_for_chain(&self, chain_id: &ChainId) -> Result<Vec<ChainTransfer>> {
        Ok(self
            .transfers
            .iter()
            .filter(|transfer| transfer.chain_id() == chain_id)
            .cloned()
            .collect())
    }

    fn mark_transfer_continued(&mut self, transfer_id: &TransferId, at: Timestamp) -> Result<()> {
        let transfer = self
            .transfers
            .iter_mut()
            .find(|transfer| transfer.id() == transfer_id)
            .ok_or(Error::TransferNotFound)?;
        transfer.mark_continued(at);
        Ok(())
    }

    fn pending_transfers(&self, receiver_id: &str) -> Result<Vec<ChainTransfer>> {
        Ok(self
            .transfers
            .iter()
            .filter(|transfer| transfer.receiver_id() == receiver_id && !*transfer.continued())
            .cloned()
            .collect())
    }
}
