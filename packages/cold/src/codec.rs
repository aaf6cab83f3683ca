//! Systematic Reed-Solomon coding over GF(2^8).
//!
//! Encoding splits the input into `data_shards` equal, zero-padded shards and
//! appends `parity_shards` parity shards. Shards `0..data_shards` carry the
//! input unchanged, which is what lets decode be skipped when they are all
//! present.

use reed_solomon_erasure::galois_8::ReedSolomon;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid erasure shape {data}+{parity}: {source}")]
    InvalidShape {
        data: usize,
        parity: usize,
        #[source]
        source: reed_solomon_erasure::Error,
    },

    #[error("expected {expected} shard slots, got {actual}")]
    ShardCount { expected: usize, actual: usize },

    #[error("cannot decode with {present} shards, at least {required} are needed")]
    TooFewShards { present: usize, required: usize },

    #[error("shards differ in size")]
    ShardSize,

    #[error("erasure coding failed: {0}")]
    Coding(#[from] reed_solomon_erasure::Error),
}

pub struct ErasureCodec {
    data_shards: usize,
    parity_shards: usize,
    rs: ReedSolomon,
}

impl ErasureCodec {
    pub fn new(data_shards: usize, parity_shards: usize) -> Result<Self, CodecError> {
        let rs = ReedSolomon::new(data_shards, parity_shards).map_err(|source| {
            CodecError::InvalidShape {
                data: data_shards,
                parity: parity_shards,
                source,
            }
        })?;
        Ok(Self {
            data_shards,
            parity_shards,
            rs,
        })
    }

    pub fn data_shards(&self) -> usize {
        self.data_shards
    }

    pub fn parity_shards(&self) -> usize {
        self.parity_shards
    }

    pub fn total_shards(&self) -> usize {
        self.data_shards + self.parity_shards
    }

    /// Size of every shard produced for `len` input bytes. Never zero.
    pub fn shard_size(&self, len: usize) -> usize {
        len.div_ceil(self.data_shards).max(1)
    }

    /// Split `data` into data shards and compute parity.
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, CodecError> {
        let shard_size = self.shard_size(data.len());
        let mut shards: Vec<Vec<u8>> = Vec::with_capacity(self.total_shards());

        for i in 0..self.data_shards {
            let start = (i * shard_size).min(data.len());
            let end = ((i + 1) * shard_size).min(data.len());
            let mut shard = data[start..end].to_vec();
            shard.resize(shard_size, 0);
            shards.push(shard);
        }
        shards.resize(self.total_shards(), vec![0u8; shard_size]);

        self.rs.encode(&mut shards)?;
        Ok(shards)
    }

    /// Fill in missing data shards in place.
    ///
    /// `shards` holds one slot per shard index. When every data shard is
    /// present this does nothing. Fails without touching the slots if fewer
    /// than `data_shards` are present.
    pub fn reconstruct(&self, shards: &mut [Option<Vec<u8>>]) -> Result<(), CodecError> {
        if shards.len() != self.total_shards() {
            return Err(CodecError::ShardCount {
                expected: self.total_shards(),
                actual: shards.len(),
            });
        }

        let present = shards.iter().filter(|s| s.is_some()).count();
        if present < self.data_shards {
            return Err(CodecError::TooFewShards {
                present,
                required: self.data_shards,
            });
        }

        let mut sizes = shards.iter().flatten().map(Vec::len);
        let first = sizes.next();
        if sizes.any(|len| Some(len) != first) {
            return Err(CodecError::ShardSize);
        }

        if shards[..self.data_shards].iter().all(Option::is_some) {
            return Ok(());
        }
        self.rs.reconstruct_data(shards)?;
        Ok(())
    }

    /// Concatenate the data shards and cut the padding off at `size` bytes.
    pub fn join(&self, shards: &[Option<Vec<u8>>], size: usize) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::with_capacity(size);
        for (index, shard) in shards.iter().take(self.data_shards).enumerate() {
            let Some(shard) = shard else {
                return Err(CodecError::TooFewShards {
                    present: index,
                    required: self.data_shards,
                });
            };
            out.extend_from_slice(shard);
            if out.len() >= size {
                break;
            }
        }
        out.truncate(size);
        Ok(out)
    }
}
