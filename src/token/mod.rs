//! The token lock/unlock protocol.
//!
//! A token is a one-output spendable unit whose locking script commits to
//! three things: the sealed stage payload (the first data chunk), the
//! designated counterparty the spending condition binds to, and the
//! author's signature proving who minted it. Lock and unlock share a fixed
//! application namespace ([`PROTOCOL_ID`], [`KEY_ID`]); a mismatch on
//! either side fails verification.
//!
//! Unlocking is two-phase by necessity: the signature must cover the exact
//! spending transaction, which cannot exist until the next stage's locking
//! script has been built. So the caller first obtains a template
//! ([`unlock_token`]), assembles a preimage transaction referencing the
//! input being spent and the proposed output, and only then asks the
//! template to [`sign`][UnlockTemplate::sign] it.

use crate::{
    crypto::{self, Identity, PublicKey, SecretKey},
    error::{Error, Result},
    token::transaction::Transaction,
    util::ser::BinaryVec,
    wallet::Wallet,
};
use rand::{CryptoRng, RngCore};
use serde_derive::{Deserialize, Serialize};

pub mod transaction;

/// The protocol namespace every token in the system locks under.
pub const PROTOCOL_ID: (u8, &str) = (0, "supplychain");
/// The key id within the protocol namespace. Fixed across all stages.
pub const KEY_ID: &str = "0";

/// The shared domain prefix bound into every lock commitment and spend
/// signature. Lock and unlock must agree on it byte for byte.
fn domain() -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + PROTOCOL_ID.1.len() + KEY_ID.len());
    out.push(PROTOCOL_ID.0);
    out.extend_from_slice(PROTOCOL_ID.1.as_bytes());
    out.extend_from_slice(KEY_ID.as_bytes());
    out
}

/// The message an author signs when minting a token: namespace, payload,
/// and the counterparty the token binds to.
fn lock_commitment(payload: &[u8], counterparty: &Identity) -> Vec<u8> {
    let mut msg = domain();
    msg.extend_from_slice(payload);
    msg.extend_from_slice(counterparty.resolve().as_bytes());
    msg
}

/// The message a spender signs when unlocking a token: namespace, input
/// position, and the spending transaction's sighash.
fn spend_message(sighash: &[u8; 32], input_index: u32) -> Vec<u8> {
    let mut msg = domain();
    msg.extend_from_slice(&input_index.to_le_bytes());
    msg.extend_from_slice(sighash);
    msg
}

fn verify_ed25519(pubkey: &PublicKey, signature: &BinaryVec, message: &[u8]) -> Result<()> {
    let verifying = ed25519_consensus::VerificationKey::try_from(*pubkey.as_bytes())
        .map_err(|_| Error::SignatureInvalid)?;
    let sig_arr: [u8; 64] = signature.as_ref().try_into().map_err(|_| Error::BadLength)?;
    verifying
        .verify(&ed25519_consensus::Signature::from(sig_arr), message)
        .map_err(|_| Error::SignatureInvalid)
}

/// A token's locking script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct LockingScript {
    /// First data chunk: the sealed stage payload.
    data: BinaryVec,
    /// The identity the spending condition binds to.
    counterparty: Identity,
    /// The identity key of the party that minted the token.
    author: PublicKey,
    /// The author's signature over the lock commitment.
    signature: BinaryVec,
}

impl LockingScript {
    /// The key whose signature satisfies this token's spending condition:
    /// the author for a self-held token, the designated counterparty
    /// otherwise.
    pub fn spender_key(&self) -> &PublicKey {
        match &self.counterparty {
            Identity::SelfHeld => &self.author,
            Identity::PublicKey(pubkey) => pubkey,
        }
    }

    /// Check the author's signature over the lock commitment.
    pub fn verify_author(&self) -> Result<()> {
        let msg = lock_commitment(self.data.as_ref(), &self.counterparty);
        verify_ed25519(&self.author, &self.signature, &msg)
    }
}

/// The proof attached to an input when spending a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct UnlockingScript {
    pubkey: PublicKey,
    signature: BinaryVec,
}

/// Build a token locking script: seal the payload for the receiver (or
/// `"self"` when none is given), and sign the commitment with the wallet's
/// identity key. Wallet failures propagate.
pub fn create_token<R: RngCore + CryptoRng, W: Wallet>(
    rng: &mut R,
    wallet: &W,
    data: &serde_json::Value,
    receiver: Option<PublicKey>,
) -> Result<LockingScript> {
    let counterparty = Identity::from_receiver(receiver);
    let key = SecretKey::derive(&counterparty);
    let payload = crypto::seal_json(rng, &key, data)?;
    let author = wallet.public_key()?;
    let msg = lock_commitment(&payload, &counterparty);
    let signature = wallet.sign(&counterparty, &msg)?;
    Ok(LockingScript {
        data: BinaryVec::from(payload),
        counterparty,
        author,
        signature: BinaryVec::from(signature),
    })
}

/// Start the two-phase unlock of a token. `counterparty` is the identity
/// the wallet derives its spending key against: the original sender when
/// unlocking a token that was sent to us, or absent (self) when unlocking
/// our own.
pub fn unlock_token<'a, W: Wallet>(wallet: &'a W, counterparty: Option<PublicKey>) -> UnlockTemplate<'a, W> {
    UnlockTemplate {
        wallet,
        counterparty: Identity::from_receiver(counterparty),
    }
}

/// Phase one of an unlock: everything known before the spending
/// transaction exists.
pub struct UnlockTemplate<'a, W> {
    wallet: &'a W,
    counterparty: Identity,
}

impl<'a, W: Wallet> UnlockTemplate<'a, W> {
    /// Phase two: sign the preimage transaction, producing the final
    /// unlocking script. The signature covers the preimage's sighash, which
    /// equals the final spending transaction's sighash once this script is
    /// attached.
    pub fn sign(&self, preimage: &Transaction, input_index: u32) -> Result<UnlockingScript> {
        let sighash = preimage.sighash()?;
        let msg = spend_message(&sighash, input_index);
        let signature = self.wallet.sign(&self.counterparty, &msg)?;
        Ok(UnlockingScript {
            pubkey: self.wallet.public_key()?,
            signature: BinaryVec::from(signature),
        })
    }
}

/// Verify that input `vin` of `spending` satisfies the spending condition
/// of output `vout` of `source`. This is the enforcement point that stops a
/// party whose identity does not match the committed counterparty from
/// advancing someone else's chain.
pub fn verify_spend(source: &Transaction, vout: u32, spending: &Transaction, vin: u32) -> Result<()> {
    let lock = source.output(vout)?.locking_script();
    let unlock = spending
        .input(vin)?
        .unlocking_script()
        .as_ref()
        .ok_or(Error::SignatureMissing)?;
    if unlock.pubkey() != lock.spender_key() {
        return Err(Error::SpendKeyMismatch);
    }
    let sighash = spending.sighash()?;
    let msg = spend_message(&sighash, vin);
    verify_ed25519(unlock.pubkey(), unlock.signature(), &msg)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        crypto::DecryptPolicy,
        token::transaction::{TxId, TxInput, TxOutput},
        util::test::{rng, MockWallet},
    };

    fn token_tx(lock: LockingScript) -> Transaction {
        let mut tx = Transaction::new();
        tx.add_output(TxOutput::new(1, lock));
        tx
    }

    fn spend_of(source: &Transaction, unlocking: Option<UnlockingScript>, next_lock: LockingScript) -> Transaction {
        let mut tx = Transaction::new();
        tx.add_input(TxInput::new(source.txid().unwrap(), 0, unlocking));
        tx.add_output(TxOutput::new(1, next_lock));
        tx
    }

    #[test]
    fn self_token_locks_and_unlocks() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let data = serde_json::json!({ "stage": "Wellhead", "pressure": "stable" });

        let lock = create_token(&mut rng, &wallet, &data, None).unwrap();
        lock.verify_author().unwrap();
        assert_eq!(lock.spender_key(), &wallet.public_key().unwrap());

        let source = token_tx(lock);
        let next = create_token(&mut rng, &wallet, &data, None).unwrap();

        let mut preimage = Transaction::new();
        preimage.add_input(TxInput::unsigned(source.txid().unwrap(), 0));
        preimage.add_output(TxOutput::new(1, next.clone()));
        let unlocking = unlock_token(&wallet, None).sign(&preimage, 0).unwrap();

        let spending = spend_of(&source, Some(unlocking), next);
        verify_spend(&source, 0, &spending, 0).unwrap();
    }

    #[test]
    fn sent_token_unlocks_only_for_receiver() {
        let mut rng = rng();
        let sender = MockWallet::new(&mut rng);
        let receiver = MockWallet::new(&mut rng);
        let intruder = MockWallet::new(&mut rng);
        let data = serde_json::json!({ "stage": "Processing" });

        let lock = create_token(&mut rng, &sender, &data, Some(receiver.public_key().unwrap())).unwrap();
        lock.verify_author().unwrap();
        assert_eq!(lock.spender_key(), &receiver.public_key().unwrap());
        let source = token_tx(lock);

        let next = create_token(&mut rng, &receiver, &data, None).unwrap();
        let mut preimage = Transaction::new();
        preimage.add_input(TxInput::unsigned(source.txid().unwrap(), 0));
        preimage.add_output(TxOutput::new(1, next.clone()));

        // receiver unlocks with counterparty = the original sender
        let good = unlock_token(&receiver, Some(sender.public_key().unwrap()))
            .sign(&preimage, 0)
            .unwrap();
        let spending = spend_of(&source, Some(good), next.clone());
        verify_spend(&source, 0, &spending, 0).unwrap();

        // any other wallet's unlock fails on the spend key check
        let bad = unlock_token(&intruder, Some(sender.public_key().unwrap()))
            .sign(&preimage, 0)
            .unwrap();
        let spending = spend_of(&source, Some(bad), next.clone());
        assert!(matches!(verify_spend(&source, 0, &spending, 0), Err(Error::SpendKeyMismatch)));

        // and so does the sender's own, once the token has been handed off
        let sender_unlock = unlock_token(&sender, None).sign(&preimage, 0).unwrap();
        let spending = spend_of(&source, Some(sender_unlock), next);
        assert!(matches!(verify_spend(&source, 0, &spending, 0), Err(Error::SpendKeyMismatch)));
    }

    #[test]
    fn spend_signature_covers_the_exact_transaction() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let data = serde_json::json!({ "stage": "Shipping" });

        let lock = create_token(&mut rng, &wallet, &data, None).unwrap();
        let source = token_tx(lock);
        let next = create_token(&mut rng, &wallet, &data, None).unwrap();
        let decoy = create_token(&mut rng, &wallet, &serde_json::json!({ "stage": "Decoy" }), None).unwrap();

        let mut preimage = Transaction::new();
        preimage.add_input(TxInput::unsigned(source.txid().unwrap(), 0));
        preimage.add_output(TxOutput::new(1, next));
        let unlocking = unlock_token(&wallet, None).sign(&preimage, 0).unwrap();

        // swapping the output after signing invalidates the proof
        let spending = spend_of(&source, Some(unlocking), decoy);
        assert!(matches!(verify_spend(&source, 0, &spending, 0), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn missing_unlocking_script_is_rejected() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let data = serde_json::json!({});
        let lock = create_token(&mut rng, &wallet, &data, None).unwrap();
        let source = token_tx(lock.clone());
        let spending = spend_of(&source, None, lock);
        assert!(matches!(verify_spend(&source, 0, &spending, 0), Err(Error::SignatureMissing)));
    }

    #[test]
    fn payload_decrypts_only_for_the_committed_identity() {
        let mut rng = rng();
        let sender = MockWallet::new(&mut rng);
        let receiver_pk = MockWallet::new(&mut rng).public_key().unwrap();
        let data = serde_json::json!({ "item": "Product A", "quantity": 100 });

        let lock = create_token(&mut rng, &sender, &data, Some(receiver_pk.clone())).unwrap();
        let opened = crypto::open_payload(
            &Identity::PublicKey(receiver_pk),
            DecryptPolicy::ReceiverOnly,
            lock.data().as_ref(),
        )
        .unwrap();
        assert_eq!(opened, data);

        assert!(matches!(
            crypto::open_payload(&Identity::SelfHeld, DecryptPolicy::ReceiverOnly, lock.data().as_ref()),
            Err(Error::CryptoOpenFailed)
        ));
    }

    #[test]
    fn tampered_author_signature_is_detected() {
        let mut rng = rng();
        let wallet = MockWallet::new(&mut rng);
        let other = MockWallet::new(&mut rng);
        let data = serde_json::json!({ "stage": "Inspection" });

        let mut lock = create_token(&mut rng, &wallet, &data, None).unwrap();
        lock.author = other.public_key().unwrap();
        assert!(matches!(lock.verify_author(), Err(Error::SignatureInvalid)));
    }

    #[test]
    fn namespace_constants_are_fixed() {
        assert_eq!(PROTOCOL_ID, (0, "supplychain"));
        assert_eq!(KEY_ID, "0");
        let txid = TxId::new("00".repeat(32));
        assert_eq!(txid.as_str().len(), 64);
    }
}
