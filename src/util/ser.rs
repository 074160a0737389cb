//! Helpful serialization tools.
//!
//! Msgpack is the binary encoding used for content addressing (transaction
//! ids and sighashes are computed over it), base64 is used anywhere bytes
//! need to travel in a human-readable document.

use crate::error::Result;
use base64::Engine;
use serde::{de::DeserializeOwned, Serialize};
use serde_derive::Deserialize;
use std::ops::Deref;

pub(crate) fn serialize<T: Serialize>(obj: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    obj.serialize(&mut rmp_serde::Serializer::new(&mut buf).with_binary())?;
    Ok(buf)
}

pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let obj = T::deserialize(&mut rmp_serde::Deserializer::new(bytes).with_binary())?;
    Ok(obj)
}

/// Convert bytes to base64
pub fn base64_encode<T: AsRef<[u8]>>(bytes: T) -> String {
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes.as_ref())
}

/// Convert base64 to bytes
pub fn base64_decode<T: AsRef<[u8]>>(bytes: T) -> Result<Vec<u8>> {
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(bytes.as_ref())?)
}

/// A default implementation for (de)serializing an object to or from binary
/// format.
pub trait SerdeBinary: Serialize + DeserializeOwned {
    /// Serialize this message
    fn serialize_binary(&self) -> Result<Vec<u8>> {
        serialize(self)
    }

    /// Deserialize this message
    fn deserialize_binary(slice: &[u8]) -> Result<Self> {
        deserialize(slice)
    }
}

/// A byte vector that serializes as base64 in human-readable formats and as
/// a plain byte sequence in binary ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinaryVec(#[serde(with = "human_bytes")] Vec<u8>);

impl From<Vec<u8>> for BinaryVec {
    fn from(vec: Vec<u8>) -> Self {
        Self(vec)
    }
}

impl Deref for BinaryVec {
    type Target = Vec<u8>;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for BinaryVec {
    fn as_ref(&self) -> &[u8] {
        self.0.as_slice()
    }
}

pub(crate) mod human_bytes {
    use super::{base64_decode, base64_encode};
    use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&base64_encode(bytes.as_slice()))
        } else {
            bytes.serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        if deserializer.is_human_readable() {
            let s = <String>::deserialize(deserializer)?;
            base64_decode(s).map_err(de::Error::custom)
        } else {
            Vec::<u8>::deserialize(deserializer)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_round_trip() {
        let bytes = b"one does not simply walk into the processing plant";
        let enc = base64_encode(&bytes[..]);
        let dec = base64_decode(enc.as_bytes()).unwrap();
        assert_eq!(dec.as_slice(), &bytes[..]);
    }

    #[test]
    fn binaryvec_human_readable() {
        let bin = BinaryVec::from(vec![1u8, 2, 3, 255]);
        let json = serde_json::to_string(&bin).unwrap();
        assert_eq!(json, format!("\"{}\"", base64_encode([1u8, 2, 3, 255])));
        let back: BinaryVec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bin);
    }

    #[test]
    fn binaryvec_binary_round_trip() {
        let bin = BinaryVec::from(vec![9u8; 48]);
        let bytes = serialize(&bin).unwrap();
        let back: BinaryVec = deserialize(&bytes).unwrap();
        assert_eq!(back, bin);
    }
}
