//! Content archive: an ordered, self-describing sequence of blocks.
//!
//! Layout: `varint(len) header-json` followed by one
//! `varint(len) cid-bytes block-data` section per block. The header names the
//! archive's root identifiers.

use common::block::Block;
use common::cid::{CID_BYTES, Cid, CidError};
use common::storage::{BlockSink, StorageError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CAR_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum CarError {
    #[error("archive truncated at byte {0}")]
    Truncated(usize),

    #[error("varint at byte {0} overflows")]
    VarintOverflow(usize),

    #[error("invalid archive header: {0}")]
    Header(#[from] serde_json::Error),

    #[error("unsupported archive version {0}")]
    UnsupportedVersion(u64),

    #[error("invalid block identifier: {0}")]
    Cid(#[from] CidError),

    #[error("block data does not match {0}")]
    Mismatch(Cid),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarHeader {
    pub version: u64,
    pub roots: Vec<Cid>,
}

fn put_varint(out: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        out.push((value as u8) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Serialize `blocks` under `roots`.
pub fn write_car(roots: &[Cid], blocks: &[Block]) -> Result<Vec<u8>, CarError> {
    let header = serde_json::to_vec(&CarHeader {
        version: CAR_VERSION,
        roots: roots.to_vec(),
    })?;

    let body: usize = blocks.iter().map(|b| b.len() + CID_BYTES + 10).sum();
    let mut out = Vec::with_capacity(header.len() + 10 + body);
    put_varint(&mut out, header.len() as u64);
    out.extend_from_slice(&header);

    for block in blocks {
        put_varint(&mut out, (CID_BYTES + block.len()) as u64);
        out.extend_from_slice(&block.cid().to_bytes());
        out.extend_from_slice(block.data());
    }
    Ok(out)
}

/// Incremental parser over an in-memory archive.
pub struct CarReader<'a> {
    data: &'a [u8],
    pos: usize,
    header: CarHeader,
}

impl<'a> CarReader<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self, CarError> {
        let mut reader = Self {
            data,
            pos: 0,
            header: CarHeader {
                version: 0,
                roots: Vec::new(),
            },
        };
        let header_bytes = reader.section()?;
        let header: CarHeader = serde_json::from_slice(header_bytes)?;
        if header.version != CAR_VERSION {
            return Err(CarError::UnsupportedVersion(header.version));
        }
        reader.header = header;
        Ok(reader)
    }

    pub fn header(&self) -> &CarHeader {
        &self.header
    }

    /// Next block, verified against its identifier. `None` at the end.
    pub fn next_block(&mut self) -> Result<Option<Block>, CarError> {
        if self.pos == self.data.len() {
            return Ok(None);
        }
        let start = self.pos;
        let section = self.section()?;
        if section.len() < CID_BYTES {
            return Err(CarError::Truncated(start));
        }
        let (cid_bytes, data) = section.split_at(CID_BYTES);
        let cid = Cid::from_bytes(cid_bytes)?;
        Block::verified(cid, data.to_vec())
            .map(Some)
            .ok_or(CarError::Mismatch(cid))
    }

    fn varint(&mut self) -> Result<u64, CarError> {
        let start = self.pos;
        let mut value = 0u64;
        let mut shift = 0u32;
        loop {
            let Some(&byte) = self.data.get(self.pos) else {
                return Err(CarError::Truncated(start));
            };
            self.pos += 1;
            if shift >= 63 && byte > 1 {
                return Err(CarError::VarintOverflow(start));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn section(&mut self) -> Result<&'a [u8], CarError> {
        let start = self.pos;
        let len = usize::try_from(self.varint()?).map_err(|_| CarError::Truncated(start))?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CarError::Truncated(start))?;
        let section = &self.data[self.pos..end];
        self.pos = end;
        Ok(section)
    }
}

/// Parse `data` and write every block into `sink`. Returns the header.
pub async fn load_car(data: &[u8], sink: &dyn BlockSink) -> Result<CarHeader, CarError> {
    let mut reader = CarReader::new(data)?;
    while let Some(block) = reader.next_block()? {
        sink.put_block(block).await?;
    }
    Ok(reader.header)
}
