use crate::cid::{Cid, Codec};

/// A content-addressed block: bytes together with the identifier they hash to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    cid: Cid,
    data: Vec<u8>,
}

impl Block {
    /// Hash `data` under `codec` and wrap it.
    pub fn new(codec: Codec, data: Vec<u8>) -> Self {
        let cid = Cid::compute(codec, &data);
        Self { cid, data }
    }

    pub fn raw(data: Vec<u8>) -> Self {
        Self::new(Codec::Raw, data)
    }

    /// Pair data with a known identifier, returning `None` if they disagree.
    pub fn verified(cid: Cid, data: Vec<u8>) -> Option<Self> {
        cid.matches(&data).then_some(Self { cid, data })
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
