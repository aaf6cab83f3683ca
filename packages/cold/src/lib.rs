pub mod car;
pub mod codec;
pub mod local;
pub mod reconstruct;

pub use codec::{CodecError, ErasureCodec};
pub use local::{DealRecord, LocalColdStorage};
pub use reconstruct::{BlockShardSource, FlakyShardSource, RetrievalError, ShardSource};
