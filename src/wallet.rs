//! Seams to the two external collaborators the protocol consumes: the
//! wallet (an opaque transaction-building and signing oracle) and the
//! transaction index (the overlay network the finished transactions live
//! in).
//!
//! The core never reaches past these traits. Production deployments wire
//! in real implementations; the test suite uses the in-memory versions in
//! `util::test`.

use crate::{
    chain::ChainId,
    crypto::{Identity, PublicKey},
    error::Result,
    token::{
        transaction::{Transaction, TxId},
        LockingScript, UnlockingScript,
    },
};

/// One input of a requested action: the outpoint being spent, the proof
/// that spends it, and the full source transaction so the wallet can
/// evaluate the spend before signing off on it.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct ActionInput {
    outpoint: (TxId, u32),
    unlocking_script: UnlockingScript,
    source_transaction: Transaction,
}

impl ActionInput {
    pub fn new(txid: TxId, vout: u32, unlocking_script: UnlockingScript, source_transaction: Transaction) -> Self {
        Self {
            outpoint: (txid, vout),
            unlocking_script,
            source_transaction,
        }
    }
}

/// One output of a requested action.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct ActionOutput {
    satoshis: u64,
    locking_script: LockingScript,
}

impl ActionOutput {
    pub fn new(satoshis: u64, locking_script: LockingScript) -> Self {
        Self { satoshis, locking_script }
    }
}

/// A request for the wallet to assemble, fund, and sign a transaction.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct CreateAction {
    description: String,
    inputs: Vec<ActionInput>,
    outputs: Vec<ActionOutput>,
}

impl CreateAction {
    pub fn new<T: Into<String>>(description: T) -> Self {
        Self {
            description: description.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn input(mut self, input: ActionInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn output(mut self, output: ActionOutput) -> Self {
        self.outputs.push(output);
        self
    }
}

/// The wallet's answer: the canonical id and the signed transaction.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct ActionResult {
    txid: TxId,
    transaction: Transaction,
}

impl ActionResult {
    pub fn new(txid: TxId, transaction: Transaction) -> Self {
        Self { txid, transaction }
    }

    pub fn into_parts(self) -> (TxId, Transaction) {
        (self.txid, self.transaction)
    }
}

/// The transaction-building and signing oracle.
pub trait Wallet {
    /// The wallet's identity key.
    fn public_key(&self) -> Result<PublicKey>;

    /// Sign a message under the protocol's key material for the given
    /// counterparty.
    fn sign(&self, counterparty: &Identity, message: &[u8]) -> Result<Vec<u8>>;

    /// Assemble, fund, and sign a transaction. The wallet is expected to
    /// reject actions whose inputs do not satisfy their source outputs'
    /// spending conditions; rejection is fatal, not retryable.
    fn create_action(&self, action: CreateAction) -> Result<ActionResult>;
}

/// Receipt for a transaction accepted by the overlay.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct BroadcastReceipt {
    txid: TxId,
}

impl BroadcastReceipt {
    pub fn new(txid: TxId) -> Self {
        Self { txid }
    }
}

/// Lookup and broadcast against the overlay network's transaction index.
pub trait TransactionIndex {
    /// Fetch a transaction by id. Not-found is retryable: a token minted
    /// moments ago may still be propagating. Implementations should bound
    /// the wait and report not-found rather than hang.
    fn transaction_by_txid(&self, txid: &TxId) -> Result<Transaction>;

    /// Submit a transaction, tagged with the chain it belongs to.
    /// Re-broadcasting the same transaction id is idempotent.
    fn broadcast(&self, transaction: &Transaction, chain_id: &ChainId) -> Result<BroadcastReceipt>;
}
