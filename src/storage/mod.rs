//! Storage layer: the entity codec, the linked tile stream data file, the
//! directory layout and the open-layer cache.

pub mod cache;
pub mod codec;
pub mod layout;
pub mod stream;
pub(crate) mod wire;

pub use cache::{DisposeState, Disposable, Lease, LruCache, ResourceCache, Signal};
pub use codec::{BincodeCodec, EntityCodec};
pub use layout::{LayerKind, LayerMeta, LayerPaths, LatestPointer, layer_id_from};
pub use stream::{ChainHit, StreamOptions, StreamStats, TileStreamReader, TileStreamWriter};
