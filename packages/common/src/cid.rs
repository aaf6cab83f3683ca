use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a binary-encoded [`Cid`]: one codec byte followed by the digest.
pub const CID_BYTES: usize = 33;

/// Errors produced while parsing a content identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CidError {
    #[error("invalid cid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown cid codec '{0}'")]
    UnknownCodec(String),

    #[error("invalid cid digest: {0}")]
    InvalidDigest(String),
}

/// How the bytes addressed by a [`Cid`] are to be interpreted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Codec {
    /// Opaque bytes: a file leaf, a shard, or a deal record.
    Raw,
    /// A JSON-encoded DAG node linking to other blocks.
    DagNode,
}

impl Codec {
    fn tag(self) -> u8 {
        match self {
            Self::Raw => 0x55,
            Self::DagNode => 0x71,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, CidError> {
        match tag {
            0x55 => Ok(Self::Raw),
            0x71 => Ok(Self::DagNode),
            other => Err(CidError::UnknownCodec(format!("{other:#04x}"))),
        }
    }

    fn prefix(self) -> char {
        match self {
            Self::Raw => 'r',
            Self::DagNode => 'd',
        }
    }

    fn from_prefix(prefix: char) -> Result<Self, CidError> {
        match prefix {
            'r' => Ok(Self::Raw),
            'd' => Ok(Self::DagNode),
            other => Err(CidError::UnknownCodec(other.to_string())),
        }
    }
}

/// A content identifier: a codec tag plus the SHA-256 digest of the block bytes.
///
/// The text form is a one letter codec prefix (`r` or `d`) followed by the
/// 64-character lowercase hex digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: Codec,
    digest: [u8; 32],
}

impl Cid {
    /// Compute the identifier of `data` under `codec`.
    pub fn compute(codec: Codec, data: &[u8]) -> Self {
        Self {
            codec,
            digest: Sha256::digest(data).into(),
        }
    }

    /// Identifier for opaque bytes.
    pub fn raw(data: &[u8]) -> Self {
        Self::compute(Codec::Raw, data)
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Binary form used inside content archives.
    pub fn to_bytes(&self) -> [u8; CID_BYTES] {
        let mut out = [0u8; CID_BYTES];
        out[0] = self.codec.tag();
        out[1..].copy_from_slice(&self.digest);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CidError> {
        if bytes.len() != CID_BYTES {
            return Err(CidError::InvalidLength {
                expected: CID_BYTES,
                actual: bytes.len(),
            });
        }
        let codec = Codec::from_tag(bytes[0])?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[1..]);
        Ok(Self { codec, digest })
    }

    /// Return the first 2 hex characters of the digest (directory for filesystem layout).
    pub fn shard_prefix(&self) -> String {
        hex::encode(&self.digest[..1])
    }

    /// Return the codec prefix plus the remaining hex characters (filename within the directory).
    pub fn shard_suffix(&self) -> String {
        format!("{}{}", self.codec.prefix(), hex::encode(&self.digest[1..]))
    }

    /// Whether `data` hashes to this identifier.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::compute(self.codec, data) == *self
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({self})")
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.codec.prefix(), hex::encode(self.digest))
    }
}

impl FromStr for Cid {
    type Err = CidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let prefix = chars.next().ok_or(CidError::InvalidLength {
            expected: 65,
            actual: 0,
        })?;
        let codec = Codec::from_prefix(prefix)?;
        let hex_part = chars.as_str();
        if hex_part.len() != 64 {
            return Err(CidError::InvalidLength {
                expected: 65,
                actual: s.len(),
            });
        }

        let bytes = hex::decode(hex_part).map_err(|e| CidError::InvalidDigest(e.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CidError::InvalidDigest("decoded to wrong length".into()))?;

        Ok(Self { codec, digest })
    }
}

impl Serialize for Cid {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
