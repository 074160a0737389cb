//! The main error enum for the project lives here, and documents the various
//! conditions that can arise while interacting with the system.
//!
//! Errors fall into a few families callers treat differently: retryable
//! network conditions, lock/transfer conflicts, hard cryptographic failures,
//! and malformed input. The [`is_retryable`][Error::is_retryable] and
//! [`is_conflict`][Error::is_conflict] predicates expose those families
//! without forcing callers to enumerate variants.

use thiserror::Error;

/// This is our error enum. It contains an entry for any part of the system in
/// which an expectation is not met or a problem occurs.
#[derive(Error, Debug)]
pub enum Error {
    /// A byte buffer has the wrong length for the type being built from it.
    #[error("bad byte length for value")]
    BadLength,

    /// The overlay network refused or failed to accept a transaction. The
    /// local stage record is already persisted when this surfaces, so the
    /// broadcast can be retried with the same transaction id.
    #[error("broadcast to the overlay failed: {0}")]
    BroadcastFailed(String),

    /// The chain has been finalized and no further mutation is permitted.
    #[error("action chain is finalized and cannot be modified")]
    ChainFinalized,

    /// A lock is already held on this chain by a different user.
    #[error("action chain is locked by another user")]
    ChainLockedByAnother,

    /// The chain id given does not resolve to a chain.
    #[error("action chain not found")]
    ChainNotFound,

    /// A symmetric key was built from the wrong number of bytes.
    #[error("symmetric key must be {expected} bytes, got {got}")]
    CryptoKeyLength { expected: usize, got: usize },

    /// Failed to open a sealed payload. The key does not match the one the
    /// payload was sealed under, or the ciphertext was truncated or altered.
    #[error("failed to open a sealed payload with this key")]
    CryptoOpenFailed,

    /// Failed to seal a payload.
    #[error("failed to seal payload")]
    CryptoSealFailed,

    /// An error while engaging in deserialization.
    #[error("deserialization error")]
    Deserialize(#[from] rmp_serde::decode::Error),

    /// An error while decoding base64.
    #[error("base64 decoding error")]
    DeserializeBase64(#[from] base64::DecodeError),

    /// An error while decoding hex.
    #[error("hex decoding error")]
    DeserializeHex(#[from] hex::FromHexError),

    /// Finalize was attempted without the caller holding the chain's lock.
    #[error("no lock held for this user and chain")]
    FinalizeLockMissing,

    /// Finalize was attempted by a party that neither created the chain nor
    /// received it through a transfer.
    #[error("caller is not the creator or a recorded receiver of this chain")]
    FinalizeNotPermitted,

    /// Finalize was attempted on a chain with fewer than the minimum stages.
    #[error("chain must have at least two stages to finalize")]
    FinalizeStageCount,

    /// Finalize was attempted on a chain without a title.
    #[error("chain must have a non-empty title to finalize")]
    FinalizeTitleMissing,

    /// A transaction input index points past the end of the input list.
    #[error("transaction input {0} does not exist")]
    InputMissing(u32),

    /// The user already holds a lock on some chain. One active chain per
    /// user at a time.
    #[error("user already holds a lock on a chain")]
    LockHeldByUser,

    /// A transaction output index points past the end of the output list.
    #[error("transaction output {0} does not exist")]
    OutputMissing(u32),

    /// An error while encoding or decoding a JSON stage payload.
    #[error("json payload error")]
    PayloadJson(#[from] serde_json::Error),

    /// An error while engaging in msgpack serialization.
    #[error("msgpack serialization error")]
    SerializeMsgPack(#[from] rmp_serde::encode::Error),

    /// A signature failed to verify against its public key and message.
    #[error("the given signature/public key/data combo does not verify")]
    SignatureInvalid,

    /// We expected an unlocking script on a transaction input but none was
    /// attached.
    #[error("unlocking script missing on transaction input")]
    SignatureMissing,

    /// The key presented in an unlocking script is not the key the token's
    /// spending condition is bound to.
    #[error("unlocking key does not match the token's counterparty")]
    SpendKeyMismatch,

    /// A chain reached its maximum stage count.
    #[error("chain stage limit of {0} reached")]
    StageLimit(usize),

    /// A stage is missing a required field.
    #[error("stage is missing required field: {0}")]
    StageMissingField(&'static str),

    /// A stage's transaction id collides with a stage already recorded on
    /// some chain. Transaction ids are globally unique.
    #[error("a stage with this transaction id already exists")]
    StageTxidDuplicate,

    /// A transaction was not found in the index. The token may still be
    /// propagating through the network, so this is worth retrying after a
    /// delay.
    #[error("transaction {0} not found in the index")]
    TransactionNotFound(String),

    /// The transfer has already been continued by its receiver.
    #[error("transfer has already been continued")]
    TransferAlreadyContinued,

    /// No transfer matches the given id and receiver.
    #[error("transfer not found for this receiver")]
    TransferNotFound,

    /// The sender satisfies none of the conditions that permit handing off
    /// this chain.
    #[error("sender is not permitted to transfer this chain")]
    TransferNotPermitted,

    /// The wallet refused to build or sign a transaction.
    #[error("wallet rejected the action: {0}")]
    WalletRejected(String),
}

impl Error {
    /// True for failures worth retrying with the same input after a delay:
    /// a previous-stage token still propagating through the network, or a
    /// broadcast that failed after the local record was written.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::TransactionNotFound(_) | Error::BroadcastFailed(_))
    }

    /// True for lock/transfer conflicts: the request was well-formed but
    /// lost to the current custody state. Callers use this to distinguish
    /// "wait or pick another chain" from genuine failure.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::LockHeldByUser
                | Error::ChainLockedByAnother
                | Error::TransferNotPermitted
                | Error::TransferAlreadyContinued
                | Error::FinalizeLockMissing
                | Error::FinalizeNotPermitted
                | Error::FinalizeStageCount
                | Error::FinalizeTitleMissing
        )
    }
}

/// Wraps `std::result::Result` around our `Error` enum
pub type Result<T> = std::result::Result<T, Error>;
