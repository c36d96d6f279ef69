//! Layer indices: the generic sparse array, the per-tile head index built on
//! it, and the sorted id index.

pub mod id_index;
pub mod sparse;
pub mod tile_index;

pub use id_index::{IdEntry, IdIndex, IdIndexWriter, decode_key, encode_key};
pub use sparse::{SparseFormat, SparseIndex};
pub use tile_index::{TileEntry, TileIndex};
