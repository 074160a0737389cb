//! A minimal, content-addressed transaction model.
//!
//! Transactions here carry exactly what the token protocol needs: inputs
//! referencing a previous output by `(txid, index)` with an optional
//! unlocking script, and outputs pairing a satoshi value with a locking
//! script. The id of a transaction is the SHA-256 of its msgpack
//! serialization. The sighash, the commitment an unlocking signature
//! covers, is the same hash with every unlocking script stripped, so the
//! preimage transaction signed during unlock and the final spending
//! transaction hash identically.

use crate::{
    error::{Error, Result},
    token::{LockingScript, UnlockingScript},
    util::ser::{self, SerdeBinary},
};
use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A transaction id: lowercase hex of the transaction's content hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TxId(String);

impl TxId {
    pub fn new<T: Into<String>>(id: T) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A spendable output: a value and the locking script that guards it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct TxOutput {
    satoshis: u64,
    locking_script: LockingScript,
}

impl TxOutput {
    pub fn new(satoshis: u64, locking_script: LockingScript) -> Self {
        Self { satoshis, locking_script }
    }
}

/// A reference to a previous output, optionally carrying the unlocking
/// script that satisfies its spending condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct TxInput {
    source_txid: TxId,
    source_output_index: u32,
    unlocking_script: Option<UnlockingScript>,
}

impl TxInput {
    pub fn new(source_txid: TxId, source_output_index: u32, unlocking_script: Option<UnlockingScript>) -> Self {
        Self {
            source_txid,
            source_output_index,
            unlocking_script,
        }
    }

    /// An input with no unlocking script yet, as used in a preimage
    /// transaction.
    pub fn unsigned(source_txid: TxId, source_output_index: u32) -> Self {
        Self::new(source_txid, source_output_index, None)
    }
}

/// One transaction: inputs spending previous tokens, outputs creating new
/// ones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Transaction {
    inputs: Vec<TxInput>,
    outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_input(&mut self, input: TxInput) -> &mut Self {
        self.inputs.push(input);
        self
    }

    pub fn add_output(&mut self, output: TxOutput) -> &mut Self {
        self.outputs.push(output);
        self
    }

    pub fn input(&self, index: u32) -> Result<&TxInput> {
        self.inputs.get(index as usize).ok_or(Error::InputMissing(index))
    }

    pub fn output(&self, index: u32) -> Result<&TxOutput> {
        self.outputs.get(index as usize).ok_or(Error::OutputMissing(index))
    }

    /// The canonical transaction id: SHA-256 over the serialized
    /// transaction, hex-encoded.
    pub fn txid(&self) -> Result<TxId> {
        let bytes = ser::serialize(self)?;
        Ok(TxId::new(hex::encode(Sha256::digest(&bytes))))
    }

    /// The commitment an unlocking signature covers: the hash of this
    /// transaction with all unlocking scripts stripped. A preimage
    /// transaction and the final spending transaction produce the same
    /// value, which is what makes the two-phase unlock sound.
    pub fn sighash(&self) -> Result<[u8; 32]> {
        let mut stripped = self.clone();
        for input in &mut stripped.inputs {
            input.unlocking_script = None;
        }
        let bytes = ser::serialize(&stripped)?;
        Ok(Sha256::digest(&bytes).into())
    }
}

impl SerdeBinary for Transaction {}
