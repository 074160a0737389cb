//! Test fixtures: a deterministic rng, a wallet backed by a throwaway
//! ed25519 key, and in-memory stand-ins for the overlay index.

use crate::{
    chain::ChainId,
    crypto::{Identity, PublicKey},
    error::{Error, Result},
    token::{
        self,
        transaction::{Transaction, TxId, TxInput, TxOutput},
    },
    wallet::{ActionResult, BroadcastReceipt, CreateAction, TransactionIndex, Wallet},
};
use rand::{CryptoRng, RngCore, SeedableRng};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// A seeded ChaCha20 rng so tests are reproducible.
pub(crate) fn rng() -> rand_chacha::ChaCha20Rng {
    rand_chacha::ChaCha20Rng::from_seed([42u8; 32])
}

/// A wallet with one identity key. `create_action` evaluates every input's
/// unlocking script against its source transaction before accepting,
/// standing in for the token standard's script evaluation.
pub(crate) struct MockWallet {
    signing_key: ed25519_consensus::SigningKey,
}

impl MockWallet {
    pub(crate) fn new<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut seed = [0u8; 32];
        rng.fill_bytes(&mut seed);
        Self {
            signing_key: ed25519_consensus::SigningKey::from(seed),
        }
    }
}

impl Wallet for MockWallet {
    fn public_key(&self) -> Result<PublicKey> {
        Ok(PublicKey::from_bytes(self.signing_key.verification_key().to_bytes()))
    }

    // a real wallet derives a child key per (protocol, key id, counterparty);
    // one key covers every derivation here
    fn sign(&self, _counterparty: &Identity, message: &[u8]) -> Result<Vec<u8>> {
        Ok(self.signing_key.sign(message).to_bytes().to_vec())
    }

    fn create_action(&self, action: CreateAction) -> Result<ActionResult> {
        let mut transaction = Transaction::new();
        for input in action.inputs() {
            transaction.add_input(TxInput::new(
                input.outpoint().0.clone(),
                input.outpoint().1,
                Some(input.unlocking_script().clone()),
            ));
        }
        for output in action.outputs() {
            transaction.add_output(TxOutput::new(*output.satoshis(), output.locking_script().clone()));
        }
        for (vin, input) in action.inputs().iter().enumerate() {
            let source = input.source_transaction();
            if source.txid()? != input.outpoint().0 {
                return Err(Error::WalletRejected(format!(
                    "input {} source transaction does not match its outpoint",
                    vin
                )));
            }
            token::verify_spend(source, input.outpoint().1, &transaction, vin as u32)
                .map_err(|err| Error::WalletRejected(format!("input {} failed script verification: {}", vin, err)))?;
        }
        let txid = transaction.txid()?;
        Ok(ActionResult::new(txid, transaction))
    }
}

/// An in-memory transaction index. Broadcast inserts by txid, so
/// re-broadcasting the same transaction is idempotent.
#[derive(Default)]
pub(crate) struct MemoryIndex {
    transactions: Mutex<HashMap<TxId, Transaction>>,
}

impl MemoryIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

impl TransactionIndex for MemoryIndex {
    fn transaction_by_txid(&self, txid: &TxId) -> Result<Transaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(txid)
            .cloned()
            .ok_or_else(|| Error::TransactionNotFound(txid.to_string()))
    }

    fn broadcast(&self, transaction: &Transaction, _chain_id: &ChainId) -> Result<BroadcastReceipt> {
        let txid = transaction.txid()?;
        self.transactions.lock().unwrap().insert(txid.clone(), transaction.clone());
        Ok(BroadcastReceipt::new(txid))
    }
}

/// A [`MemoryIndex`] whose broadcasts can be made to fail, for exercising
/// the persisted-but-not-broadcast partial-failure path.
#[derive(Default)]
pub(crate) struct FlakyIndex {
    inner: MemoryIndex,
    fail: AtomicBool,
}

impl FlakyIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn fail_broadcasts(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl TransactionIndex for FlakyIndex {
    fn transaction_by_txid(&self, txid: &TxId) -> Result<Transaction> {
        self.inner.transaction_by_txid(txid)
    }

    fn broadcast(&self, transaction: &Transaction, chain_id: &ChainId) -> Result<BroadcastReceipt> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::BroadcastFailed("overlay unreachable".into()));
        }
        self.inner.broadcast(transaction, chain_id)
    }
}
