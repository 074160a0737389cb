//! Action chains: the data model, the continuation pipeline, the custody
//! state machine, and the [`ChainService`] facade that sequences them.
//!
//! A chain is an ordered list of stages, each anchored to one on-chain
//! token. Ordering is append position, full stop: stage timestamps are
//! client-supplied, descriptive metadata and never participate in
//! ordering.

use crate::{
    crypto::{self, DecryptPolicy, PublicKey},
    error::{Error, Result},
    store::CustodyStore,
    token::transaction::{Transaction, TxId},
    util::Timestamp,
    wallet::{TransactionIndex, Wallet},
};
use serde_derive::{Deserialize, Serialize};

pub mod continuation;
pub mod custody;

use continuation::TokenForge;
use custody::TransferId;

/// The most stages any chain may hold.
pub const MAX_STAGES: usize = 8;
/// The fewest stages a chain may be finalized with.
pub const MIN_FINALIZE_STAGES: usize = 2;

/// Identifies one action chain in the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(String);

impl ChainId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step in a chain, bound to one on-chain token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Stage {
    title: Option<String>,
    image_url: Option<String>,
    timestamp: Timestamp,
    transaction_id: TxId,
}

impl Stage {
    pub fn new(title: Option<String>, image_url: Option<String>, timestamp: Timestamp, transaction_id: TxId) -> Self {
        Self {
            title,
            image_url,
            timestamp,
            transaction_id,
        }
    }

    /// A stage without a transaction id anchors to nothing and is refused
    /// everywhere.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.transaction_id.as_str().is_empty() {
            return Err(Error::StageMissingField("transaction_id"));
        }
        Ok(())
    }
}

/// The caller-supplied public half of a stage: what is stored off-chain
/// next to the token reference, unencrypted.
#[derive(Debug, Clone, Default)]
pub struct StageDraft {
    title: Option<String>,
    image_url: Option<String>,
}

impl StageDraft {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn titled<T: Into<String>>(title: T) -> Self {
        Self {
            title: Some(title.into()),
            image_url: None,
        }
    }

    pub fn with_image<T: Into<String>>(mut self, url: T) -> Self {
        self.image_url = Some(url.into());
        self
    }

    fn into_stage(self, transaction_id: TxId) -> Stage {
        Stage::new(self.title, self.image_url, Timestamp::now(), transaction_id)
    }
}

/// An ordered sequence of stages with one owner, mutable until finalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct ActionChain {
    id: ChainId,
    owner_id: String,
    title: Option<String>,
    stages: Vec<Stage>,
    created_at: Timestamp,
    updated_at: Timestamp,
    finalized: bool,
    finalized_at: Option<Timestamp>,
}

impl ActionChain {
    pub(crate) fn create(id: ChainId, owner_id: &str, first_stage: Stage, title: Option<String>, now: Timestamp) -> Self {
        Self {
            id,
            owner_id: owner_id.into(),
            title,
            stages: vec![first_stage],
            created_at: now.clone(),
            updated_at: now,
            finalized: false,
            finalized_at: None,
        }
    }

    pub(crate) fn push_stage(&mut self, stage: Stage, title: Option<String>, now: Timestamp) {
        self.stages.push(stage);
        if let Some(title) = title {
            self.title = Some(title);
        }
        self.updated_at = now;
    }

    pub(crate) fn mark_finalized(&mut self, at: Timestamp) {
        self.finalized = true;
        self.finalized_at = Some(at.clone());
        self.updated_at = at;
    }
}

/// What a write flow hands back: where the stage landed, the token that
/// anchors it, and whether the broadcast made it out. A failed broadcast
/// does not undo the stage record; the transaction is returned so the
/// caller can retry the broadcast on its own schedule.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct StageReceipt {
    chain_id: ChainId,
    txid: TxId,
    transaction: Transaction,
    transfer_id: Option<TransferId>,
    broadcasted: bool,
}

/// Sequences the three write flows end to end: build the token, persist
/// the stage and custody records, then broadcast. Wallet, index, and store
/// are all injected; the service owns nothing.
pub struct ChainService<'a, W, X, S> {
    wallet: &'a W,
    index: &'a X,
    store: &'a mut S,
}

impl<'a, W, X, S> ChainService<'a, W, X, S>
where
    W: Wallet,
    X: TransactionIndex,
    S: CustodyStore,
{
    pub fn new(wallet: &'a W, index: &'a X, store: &'a mut S) -> Self {
        Self { wallet, index, store }
    }

    fn identity(&self) -> Result<String> {
        Ok(self.wallet.public_key()?.to_hex())
    }

    /// Start a new chain with its first stage. The first token is keyed to
    /// `receiver` if given (the chain is handed off immediately), else kept
    /// self-held and the creator locked to the chain.
    pub fn create_chain<R: rand::RngCore + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        data: &serde_json::Value,
        draft: StageDraft,
        chain_title: Option<String>,
        receiver: Option<PublicKey>,
    ) -> Result<StageReceipt> {
        let owner = self.identity()?;
        let forge = TokenForge::new(self.wallet, self.index);
        let (txid, transaction) = forge.first_stage(rng, data, receiver.clone())?.into_parts();
        let stage = draft.into_stage(txid.clone());
        let chain_id = custody::create_chain(self.store, &owner, stage, chain_title)?;
        let transfer_id = match receiver {
            Some(ref pubkey) => Some(custody::send_chain(self.store, &chain_id, &owner, &pubkey.to_hex())?),
            None => None,
        };
        let broadcasted = self.broadcast_logged(&transaction, &chain_id);
        Ok(StageReceipt {
            chain_id,
            txid,
            transaction,
            transfer_id,
            broadcasted,
        })
    }

    /// Append a stage to a chain the caller owns, spending the previous
    /// stage's token. Keyed to `receiver` if given, in which case custody
    /// is handed off in the same flow.
    pub fn continue_own<R: rand::RngCore + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        chain_id: &ChainId,
        data: &serde_json::Value,
        draft: StageDraft,
        chain_title: Option<String>,
        receiver: Option<PublicKey>,
    ) -> Result<StageReceipt> {
        let user = self.identity()?;
        let chain = self.store.chain(chain_id)?;
        if *chain.finalized() {
            return Err(Error::ChainFinalized);
        }
        let previous = chain.stages().last().ok_or(Error::StageMissingField("stages"))?;
        let forge = TokenForge::new(self.wallet, self.index);
        let (txid, transaction) = forge
            .next_stage(rng, previous.transaction_id(), data, receiver.clone(), None)?
            .into_parts();
        let stage = draft.into_stage(txid.clone());
        custody::append_stage(self.store, chain_id, &user, stage, chain_title)?;
        let transfer_id = match receiver {
            Some(ref pubkey) => Some(custody::send_chain(self.store, chain_id, &user, &pubkey.to_hex())?),
            None => None,
        };
        let broadcasted = self.broadcast_logged(&transaction, chain_id);
        Ok(StageReceipt {
            chain_id: chain_id.clone(),
            txid,
            transaction,
            transfer_id,
            broadcasted,
        })
    }

    /// Continue a chain that was sent to this wallet: spend the received
    /// token, append the new stage, and either hand off again or lock the
    /// chain to ourselves.
    pub fn continue_received<R: rand::RngCore + rand::CryptoRng>(
        &mut self,
        rng: &mut R,
        transfer_id: &TransferId,
        data: &serde_json::Value,
        draft: StageDraft,
        next_receiver: Option<PublicKey>,
    ) -> Result<StageReceipt> {
        let user = self.identity()?;
        let transfer = self.store.transfer(transfer_id)?.ok_or(Error::TransferNotFound)?;
        if transfer.receiver_id() != &user {
            return Err(Error::TransferNotFound);
        }
        let chain = self.store.chain(transfer.chain_id())?;
        let previous = chain.stages().last().ok_or(Error::StageMissingField("stages"))?;
        let sender = PublicKey::from_hex(transfer.sender_id())?;
        let forge = TokenForge::new(self.wallet, self.index);
        let (txid, transaction) = forge
            .next_stage(rng, previous.transaction_id(), data, next_receiver.clone(), Some(sender))?
            .into_parts();
        let stage = draft.into_stage(txid.clone());
        let next_hex = next_receiver.map(|pubkey| pubkey.to_hex());
        let onward = custody::continue_received(self.store, transfer_id, &user, stage, next_hex.as_deref())?;
        let broadcasted = self.broadcast_logged(&transaction, transfer.chain_id());
        Ok(StageReceipt {
            chain_id: transfer.chain_id().clone(),
            txid,
            transaction,
            transfer_id: onward,
            broadcasted,
        })
    }

    /// Hand custody of a chain to another party without appending a stage.
    pub fn send(&mut self, chain_id: &ChainId, receiver: &PublicKey) -> Result<TransferId> {
        let sender = self.identity()?;
        custody::send_chain(self.store, chain_id, &sender, &receiver.to_hex())
    }

    /// Freeze a chain: requires the caller's lock, at least
    /// [`MIN_FINALIZE_STAGES`] stages, and a non-empty title.
    pub fn finalize(&mut self, chain_id: &ChainId) -> Result<()> {
        let user = self.identity()?;
        custody::finalize(self.store, chain_id, &user)
    }

    /// Fetch and decrypt a stage's payload. The intended reader is resolved
    /// from custody records; `policy` decides whether a failed decrypt may
    /// retry under the `"self"` key.
    pub fn open_stage(&self, txid: &TxId, policy: DecryptPolicy) -> Result<serde_json::Value> {
        let transaction = self.index.transaction_by_txid(txid)?;
        let lock = transaction.output(0)?.locking_script().clone();
        let receiver = custody::receiver_for_stage(&*self.store, txid)?;
        crypto::open_payload(&receiver, policy, lock.data().as_ref())
    }

    /// Transfers sent to this wallet that have not been continued yet.
    pub fn pending_transfers(&self) -> Result<Vec<custody::ChainTransfer>> {
        self.store.pending_transfers(&self.identity()?)
    }

    /// The lock this wallet currently holds, if any.
    pub fn lock_status(&self) -> Result<Option<custody::ActionLock>> {
        self.store.lock_for_user(&self.identity()?)
    }

    fn broadcast_logged(&self, transaction: &Transaction, chain_id: &ChainId) -> bool {
        match self.index.broadcast(transaction, chain_id) {
            Ok(receipt) => {
                tracing::debug!(txid = %receipt.txid(), chain = %chain_id, "transaction accepted by overlay");
                true
            }
            Err(err) => {
                tracing::warn!(chain = %chain_id, error = %err, "stage recorded but broadcast failed; retry later with the same transaction");
                false
            }
        }
    }
}
