//! Minimal file/directory DAG layered on a [`BlockStore`].
//!
//! File content is chunked into raw leaf blocks. Content that fits in one
//! chunk is addressed by its single raw leaf; larger content gets a
//! [`DagNode::File`] linking its leaves in order. Directories map names to
//! child identifiers.

use std::collections::{BTreeMap, HashSet};
use std::io::Cursor;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::block::Block;
use crate::cid::{Cid, Codec};
use crate::storage::{BlockStore, BoxReader, StorageError};

/// Default leaf size used when importing content.
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Error)]
pub enum DagError {
    #[error("{0} is a directory, not a file")]
    NotAFile(Cid),

    #[error("block {cid} is not a valid dag node: {source}")]
    Decode {
        cid: Cid,
        #[source]
        source: serde_json::Error,
    },

    #[error("file {cid} declares {declared} bytes but links {actual}")]
    SizeMismatch { cid: Cid, declared: u64, actual: u64 },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("reading import source: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DagNode {
    File { size: u64, links: Vec<Cid> },
    Directory { entries: BTreeMap<String, Cid> },
}

impl DagNode {
    pub fn to_block(&self) -> Result<Block, serde_json::Error> {
        Ok(Block::new(Codec::DagNode, serde_json::to_vec(self)?))
    }

    fn decode(block: &Block) -> Result<Self, DagError> {
        serde_json::from_slice(block.data()).map_err(|source| DagError::Decode {
            cid: *block.cid(),
            source,
        })
    }

    fn links(&self) -> Vec<Cid> {
        match self {
            Self::File { links, .. } => links.clone(),
            Self::Directory { entries } => entries.values().copied().collect(),
        }
    }
}

/// A resolved file: its identifier and full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DagFile {
    pub cid: Cid,
    pub data: Vec<u8>,
}

impl DagFile {
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    pub fn into_reader(self) -> BoxReader {
        Box::new(Cursor::new(self.data))
    }
}

/// Chunk `data` into leaves, store them, and return the root identifier.
pub async fn import_bytes<S: BlockStore + ?Sized>(
    store: &S,
    data: &[u8],
    chunk_size: usize,
) -> Result<Cid, DagError> {
    import_reader(store, Box::new(Cursor::new(data.to_vec())), chunk_size).await
}

/// Streaming variant of [`import_bytes`].
pub async fn import_reader<S: BlockStore + ?Sized>(
    store: &S,
    mut reader: BoxReader,
    chunk_size: usize,
) -> Result<Cid, DagError> {
    let chunk_size = chunk_size.max(1);
    let mut links = Vec::new();
    let mut size = 0u64;

    loop {
        let mut chunk = Vec::with_capacity(chunk_size);
        while chunk.len() < chunk_size {
            let read = (&mut reader)
                .take((chunk_size - chunk.len()) as u64)
                .read_to_end(&mut chunk)
                .await?;
            if read == 0 {
                break;
            }
        }
        if chunk.is_empty() && !links.is_empty() {
            break;
        }

        let filled = chunk.len() == chunk_size;
        size += chunk.len() as u64;
        let leaf = Block::raw(chunk);
        links.push(*leaf.cid());
        store.put(leaf).await?;

        if !filled {
            break;
        }
    }

    if let [single] = links.as_slice() {
        return Ok(*single);
    }

    let node = DagNode::File { size, links }
        .to_block()
        .map_err(|e| DagError::Io(std::io::Error::other(e)))?;
    let root = *node.cid();
    store.put(node).await?;
    Ok(root)
}

/// Store a directory node with the given entries.
pub async fn put_directory<S: BlockStore + ?Sized>(
    store: &S,
    entries: BTreeMap<String, Cid>,
) -> Result<Cid, DagError> {
    let node = DagNode::Directory { entries }
        .to_block()
        .map_err(|e| DagError::Io(std::io::Error::other(e)))?;
    let root = *node.cid();
    store.put(node).await?;
    Ok(root)
}

/// Resolve `cid` to a file and read its content.
pub async fn open_file<S: BlockStore + ?Sized>(store: &S, cid: &Cid) -> Result<DagFile, DagError> {
    let root = store.get(cid).await?;
    if root.cid().codec() == Codec::Raw {
        return Ok(DagFile {
            cid: *cid,
            data: root.into_data(),
        });
    }

    match DagNode::decode(&root)? {
        DagNode::Directory { .. } => Err(DagError::NotAFile(*cid)),
        DagNode::File { size, links } => {
            let mut data = Vec::with_capacity(size as usize);
            let mut pending: Vec<Cid> = links.into_iter().rev().collect();
            while let Some(link) = pending.pop() {
                let block = store.get(&link).await?;
                if link.codec() == Codec::Raw {
                    data.extend_from_slice(block.data());
                    continue;
                }
                match DagNode::decode(&block)? {
                    DagNode::File { links, .. } => pending.extend(links.into_iter().rev()),
                    DagNode::Directory { .. } => return Err(DagError::NotAFile(link)),
                }
            }
            if data.len() as u64 != size {
                return Err(DagError::SizeMismatch {
                    cid: *cid,
                    declared: size,
                    actual: data.len() as u64,
                });
            }
            Ok(DagFile { cid: *cid, data })
        }
    }
}

/// Collect every block reachable from `root`, root first.
pub async fn collect_blocks<S: BlockStore + ?Sized>(
    store: &S,
    root: &Cid,
) -> Result<Vec<Block>, DagError> {
    let mut seen = HashSet::new();
    let mut pending = vec![*root];
    let mut blocks = Vec::new();

    while let Some(cid) = pending.pop() {
        if !seen.insert(cid) {
            continue;
        }
        let block = store.get(&cid).await?;
        if cid.codec() == Codec::DagNode {
            let mut links = DagNode::decode(&block)?.links();
            links.reverse();
            pending.extend(links);
        }
        blocks.push(block);
    }

    Ok(blocks)
}
