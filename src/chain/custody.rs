//! The custody transfer and locking state machine.
//!
//! Exactly one party may write to an in-progress chain at a time, enforced
//! by a mutual-exclusion record with two uniqueness constraints: at most
//! one lock per user and at most one per chain. Custody moves between
//! parties through transfer records; the current receiver of a chain is
//! always the receiver of the transfer with the greatest `sent_at`,
//! computed on read because transfers can land out of insertion order
//! under distributed writers.
//!
//! Violating a lock constraint is a conflict, not a failure: it tells the
//! caller "already in progress by you" or "in progress by someone else",
//! and callers branch on that.

use crate::{
    chain::{ChainId, Stage, MAX_STAGES, MIN_FINALIZE_STAGES},
    crypto::{Identity, PublicKey},
    error::{Error, Result},
    store::CustodyStore,
    token::transaction::TxId,
    util::Timestamp,
};
use serde_derive::{Deserialize, Serialize};

/// Identifies one transfer record in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(String);

impl TransferId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exclusive write access: one user, one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct ActionLock {
    chain_id: ChainId,
    user_id: String,
    created_at: Timestamp,
}

impl ActionLock {
    pub fn new(chain_id: ChainId, user_id: &str, created_at: Timestamp) -> Self {
        Self {
            chain_id,
            user_id: user_id.into(),
            created_at,
        }
    }
}

/// A record of custody passing from one identity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct ChainTransfer {
    id: TransferId,
    chain_id: ChainId,
    sender_id: String,
    receiver_id: String,
    sent_at: Timestamp,
    continued: bool,
    continued_at: Option<Timestamp>,
}

impl ChainTransfer {
    pub fn new(id: TransferId, chain_id: ChainId, sender_id: &str, receiver_id: &str, sent_at: Timestamp) -> Self {
        Self {
            id,
            chain_id,
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            sent_at,
            continued: false,
            continued_at: None,
        }
    }

    pub(crate) fn mark_continued(&mut self, at: Timestamp) {
        self.continued = true;
        self.continued_at = Some(at);
    }
}

/// Grant `user_id` exclusive write access to a chain. Fails as a conflict
/// if the user already holds any lock, or if any lock exists on the chain.
pub fn acquire_lock<S: CustodyStore>(store: &mut S, user_id: &str, chain_id: &ChainId) -> Result<ActionLock> {
    let chain = store.chain(chain_id)?;
    if *chain.finalized() {
        return Err(Error::ChainFinalized);
    }
    let lock = ActionLock::new(chain_id.clone(), user_id, Timestamp::now());
    store.insert_lock(lock.clone())?;
    Ok(lock)
}

/// Create a chain with its first stage and lock the creator to it.
pub fn create_chain<S: CustodyStore>(
    store: &mut S,
    owner_id: &str,
    first_stage: Stage,
    title: Option<String>,
) -> Result<ChainId> {
    first_stage.validate()?;
    // check up front so a lock conflict does not leave an orphaned chain
    if store.lock_for_user(owner_id)?.is_some() {
        return Err(Error::LockHeldByUser);
    }
    let chain_id = store.insert_chain(owner_id, first_stage, title, Timestamp::now())?;
    acquire_lock(store, owner_id, &chain_id)?;
    Ok(chain_id)
}

/// Append a stage to a chain the caller owns.
pub fn append_stage<S: CustodyStore>(
    store: &mut S,
    chain_id: &ChainId,
    user_id: &str,
    stage: Stage,
    title: Option<String>,
) -> Result<()> {
    stage.validate()?;
    let chain = store.chain(chain_id)?;
    if chain.owner_id() != user_id {
        return Err(Error::ChainNotFound);
    }
    if *chain.finalized() {
        return Err(Error::ChainFinalized);
    }
    if chain.stages().len() >= MAX_STAGES {
        return Err(Error::StageLimit(MAX_STAGES));
    }
    store.push_stage(chain_id, stage, title, Timestamp::now())
}

/// Hand custody of a chain from `sender_id` to `receiver_id`.
///
/// Permitted when the sender is the creator sending the very first stage,
/// currently holds the lock on this chain, or is the latest transfer's
/// receiver and has already continued (a re-send without re-locking). On
/// success the sender's lock on this chain, if any, is deleted and a fresh
/// transfer record is inserted.
pub fn send_chain<S: CustodyStore>(
    store: &mut S,
    chain_id: &ChainId,
    sender_id: &str,
    receiver_id: &str,
) -> Result<TransferId> {
    let chain = store.chain(chain_id)?;
    if *chain.finalized() {
        return Err(Error::ChainFinalized);
    }

    let chain_lock = store.lock_for_chain(chain_id)?;
    let holds_lock = chain_lock.as_ref().map(|lock| lock.user_id() == sender_id).unwrap_or(false);
    let first_send = chain.owner_id() == sender_id && chain.stages().len() == 1;
    let transfers = store.transfers_for_chain(chain_id)?;
    let resend = latest_transfer(&transfers)
        .map(|transfer| transfer.receiver_id() == sender_id && *transfer.continued())
        .unwrap_or(false);

    if !(first_send || holds_lock || resend) {
        return Err(Error::TransferNotPermitted);
    }

    if holds_lock {
        store.delete_lock(sender_id, chain_id)?;
    }
    store.insert_transfer(chain_id, sender_id, receiver_id, Timestamp::now())
}

/// A receiver appends a stage to a chain that was sent to them. The
/// matching transfer flips to continued; custody then either moves on to
/// `next_receiver_id` or the receiver locks the chain for themself.
///
/// Returns the onward transfer's id when one was created.
pub fn continue_received<S: CustodyStore>(
    store: &mut S,
    transfer_id: &TransferId,
    receiver_id: &str,
    stage: Stage,
    next_receiver_id: Option<&str>,
) -> Result<Option<TransferId>> {
    stage.validate()?;
    let transfer = store.transfer(transfer_id)?.ok_or(Error::TransferNotFound)?;
    if transfer.receiver_id() != receiver_id {
        return Err(Error::TransferNotFound);
    }
    if *transfer.continued() {
        return Err(Error::TransferAlreadyContinued);
    }
    let chain = store.chain(transfer.chain_id())?;
    if *chain.finalized() {
        return Err(Error::ChainFinalized);
    }
    if chain.stages().len() >= MAX_STAGES {
        return Err(Error::StageLimit(MAX_STAGES));
    }
    if next_receiver_id.is_none() {
        // self-continuing ends in a lock acquisition; surface the conflict
        // before any record is written
        if store.lock_for_user(receiver_id)?.is_some() {
            return Err(Error::LockHeldByUser);
        }
        if let Some(lock) = store.lock_for_chain(transfer.chain_id())? {
            if lock.user_id() != receiver_id {
                return Err(Error::ChainLockedByAnother);
            }
        }
    }

    let now = Timestamp::now();
    store.push_stage(transfer.chain_id(), stage, None, now.clone())?;
    store.mark_transfer_continued(transfer_id, now)?;

    match next_receiver_id {
        Some(next) => Ok(Some(send_chain(store, transfer.chain_id(), receiver_id, next)?)),
        None => {
            acquire_lock(store, receiver_id, transfer.chain_id())?;
            Ok(None)
        }
    }
}

/// Freeze a chain. Only the creator or a recorded transfer receiver may
/// finalize, and only while holding the chain's lock, with at least
/// [`MIN_FINALIZE_STAGES`] stages and a non-empty title. The lock is
/// deleted on success; nothing may touch the chain afterwards.
pub fn finalize<S: CustodyStore>(store: &mut S, chain_id: &ChainId, user_id: &str) -> Result<()> {
    let chain = store.chain(chain_id)?;
    if *chain.finalized() {
        return Err(Error::ChainFinalized);
    }
    let is_creator = chain.owner_id() == user_id;
    let is_receiver = store
        .transfers_for_chain(chain_id)?
        .iter()
        .any(|transfer| transfer.receiver_id() == user_id);
    if !(is_creator || is_receiver) {
        return Err(Error::FinalizeNotPermitted);
    }
    match store.lock_for_user(user_id)? {
        Some(lock) if lock.chain_id() == chain_id => {}
        _ => return Err(Error::FinalizeLockMissing),
    }
    if chain.stages().len() < MIN_FINALIZE_STAGES {
        return Err(Error::FinalizeStageCount);
    }
    if chain.title().as_deref().map(str::trim).unwrap_or("").is_empty() {
        return Err(Error::FinalizeTitleMissing);
    }
    store.set_finalized(chain_id, Timestamp::now())?;
    store.delete_lock(user_id, chain_id)?;
    Ok(())
}

/// The current receiver of a chain: the receiver of the transfer with the
/// greatest `sent_at`. `None` when the chain has never been sent.
pub fn current_receiver<S: CustodyStore>(store: &S, chain_id: &ChainId) -> Result<Option<String>> {
    let transfers = store.transfers_for_chain(chain_id)?;
    Ok(latest_transfer(&transfers).map(|transfer| transfer.receiver_id().clone()))
}

/// Resolve the identity a stage's payload was sealed for: the current
/// receiver of the chain that holds the stage, or self when the chain is
/// unknown or was never sent.
pub fn receiver_for_stage<S: CustodyStore>(store: &S, txid: &TxId) -> Result<Identity> {
    let chain = match store.chain_by_stage_txid(txid)? {
        Some(chain) => chain,
        None => return Ok(Identity::SelfHeld),
    };
    let transfers = store.transfers_for_chain(chain.id())?;
    match latest_transfer(&transfers) {
        Some(transfer) => Ok(Identity::PublicKey(PublicKey::from_hex(transfer.receiver_id())?)),
        None => Ok(Identity::SelfHeld),
    }
}

/// On a tie in `sent_at`, `max_by_key` keeps the last maximum, so the
/// latest-inserted transfer wins.
fn latest_transfer(transfers: &[ChainTransfer]) -> Option<&ChainTransfer> {
    transfers.iter().max_by_key(|transfer| transfer.sent_at())
}
