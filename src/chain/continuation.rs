//! Advancing a chain by one stage: spend the previous stage's token,
//! produce the next one.
//!
//! The pipeline is strictly sequential: fetch the previous transaction,
//! build the unlock template and the new locking script, assemble the
//! preimage, sign it, then hand the whole thing to the wallet. Each step
//! needs the prior step's output. Once the action reaches the
//! wallet there is no aborting it; broadcast happens separately and can be
//! retried on its own.

use crate::{
    crypto::PublicKey,
    error::Result,
    token::{
        self,
        transaction::{Transaction, TxId, TxInput, TxOutput},
    },
    wallet::{ActionInput, ActionOutput, CreateAction, TransactionIndex, Wallet},
};
use rand::{CryptoRng, RngCore};

/// Every token carries this value. The token is a carrier for the locking
/// script, not a payment.
pub const TOKEN_SATOSHIS: u64 = 1;

/// The result of minting a stage token: the canonical transaction id and
/// the signed transaction, ready for broadcast.
#[derive(Debug, Clone, getset::Getters)]
#[getset(get = "pub")]
pub struct Continuation {
    txid: TxId,
    transaction: Transaction,
}

impl Continuation {
    pub fn into_parts(self) -> (TxId, Transaction) {
        (self.txid, self.transaction)
    }
}

/// Builds stage tokens against a wallet and a transaction index.
pub struct TokenForge<'a, W, X> {
    wallet: &'a W,
    index: &'a X,
}

impl<'a, W, X> TokenForge<'a, W, X>
where
    W: Wallet,
    X: TransactionIndex,
{
    pub fn new(wallet: &'a W, index: &'a X) -> Self {
        Self { wallet, index }
    }

    /// Mint the genesis token of a chain. No protocol inputs (funding is
    /// the wallet's concern) and a single one-satoshi token output.
    pub fn first_stage<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        data: &serde_json::Value,
        receiver: Option<PublicKey>,
    ) -> Result<Continuation> {
        let locking_script = token::create_token(rng, self.wallet, data, receiver)?;
        let action = CreateAction::new("Create chain with new token")
            .output(ActionOutput::new(TOKEN_SATOSHIS, locking_script));
        let (txid, transaction) = self.wallet.create_action(action)?.into_parts();
        Ok(Continuation { txid, transaction })
    }

    /// Mint the next token of a chain, spending the previous one.
    ///
    /// `received_from` is the identity the previous token arrived from when
    /// this wallet is continuing a chain someone sent it; absent, the
    /// previous token is assumed self-held. A previous transaction missing
    /// from the index is retryable, since the token may still be propagating.
    pub fn next_stage<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
        previous_txid: &TxId,
        data: &serde_json::Value,
        receiver: Option<PublicKey>,
        received_from: Option<PublicKey>,
    ) -> Result<Continuation> {
        let previous = self.index.transaction_by_txid(previous_txid)?;

        let template = token::unlock_token(self.wallet, received_from);
        let locking_script = token::create_token(rng, self.wallet, data, receiver)?;

        // the preimage exists only to pin down the exact bytes the unlock
        // signature must cover
        let mut preimage = Transaction::new();
        preimage.add_input(TxInput::unsigned(previous_txid.clone(), 0));
        preimage.add_output(TxOutput::new(TOKEN_SATOSHIS, locking_script.clone()));
        let unlocking_script = template.sign(&preimage, 0)?;

        let action = CreateAction::new("Continue chain with new token")
            .input(ActionInput::new(previous_txid.clone(), 0, unlocking_script, previous))
            .output(ActionOutput::new(TOKEN_SATOSHIS, locking_script));
        let (txid, transaction) = self.wallet.create_action(action)?.into_parts();
        Ok(Continuation { txid, transaction })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::Error,
        token::verify_spend,
        util::test::{rng, MemoryIndex, MockWallet},
    };

    #[test]
    fn genesis_then_continue() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let index = MemoryIndex::new();
        let forge = TokenForge::new(&wallet, &index);

        let first = forge
            .first_stage(&mut rng, &serde_json::json!({ "stage": "Wellhead" }), None)
            .unwrap();
        assert!(first.transaction().inputs().is_empty());
        assert_eq!(first.transaction().outputs().len(), 1);
        assert_eq!(*first.transaction().output(0).unwrap().satoshis(), TOKEN_SATOSHIS);
        index.broadcast(first.transaction(), &crate::chain::ChainId::new("c1")).unwrap();

        let second = forge
            .next_stage(&mut rng, first.txid(), &serde_json::json!({ "stage": "Processing" }), None, None)
            .unwrap();
        assert_eq!(second.transaction().inputs().len(), 1);
        assert_eq!(second.transaction().input(0).unwrap().source_txid(), first.txid());
        verify_spend(first.transaction(), 0, second.transaction(), 0).unwrap();
    }

    #[test]
    fn continue_fails_retryable_when_previous_is_missing() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let index = MemoryIndex::new();
        let forge = TokenForge::new(&wallet, &index);

        let err = forge
            .next_stage(
                &mut rng,
                &TxId::new("ff".repeat(32)),
                &serde_json::json!({}),
                None,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, Error::TransactionNotFound(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn wallet_rejects_a_foreign_spend() {
        let mut rng = rng();
        let owner = MockWallet::new(&mut rng);
        let thief = MockWallet::new(&mut rng);
        let index = MemoryIndex::new();

        let first = TokenForge::new(&owner, &index)
            .first_stage(&mut rng, &serde_json::json!({ "stage": "Wellhead" }), None)
            .unwrap();
        index.broadcast(first.transaction(), &crate::chain::ChainId::new("c1")).unwrap();

        // the token is self-held by `owner`; another wallet's unlock cannot
        // satisfy it and the wallet refuses to build the action
        let err = TokenForge::new(&thief, &index)
            .next_stage(&mut rng, first.txid(), &serde_json::json!({}), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::WalletRejected(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn handed_off_token_continues_for_the_receiver() {
        let mut rng = rng();
        let sender = MockWallet::new(&mut rng);
        let receiver = MockWallet::new(&mut rng);
        let index = MemoryIndex::new();

        let first = TokenForge::new(&sender, &index)
            .first_stage(
                &mut rng,
                &serde_json::json!({ "stage": "Processing" }),
                Some(receiver.public_key().unwrap()),
            )
            .unwrap();
        index.broadcast(first.transaction(), &crate::chain::ChainId::new("c1")).unwrap();

        let second = TokenForge::new(&receiver, &index)
            .next_stage(
                &mut rng,
                first.txid(),
                &serde_json::json!({ "stage": "Shipping" }),
                None,
                Some(sender.public_key().unwrap()),
            )
            .unwrap();
        verify_spend(first.transaction(), 0, second.transaction(), 0).unwrap();
    }
}
