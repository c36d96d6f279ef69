//! Layered, tiled, versioned storage for OSM-style geographic entities.
//!
//! Entities (points, lines, groups) are filed under the map tiles they touch.
//! A full layer holds a whole dataset; diff and snapshot layers record one
//! changeset on top of a base and read through to it. A [`HistoryChain`]
//! keeps the layers of one dataset under a root directory.
//!
//! ```rust
//! use geolayer::prelude::*;
//! use std::time::{Duration, UNIX_EPOCH};
//!
//! let root = tempfile::tempdir()?;
//! let chain = HistoryChain::open(root.path(), Config::default())?;
//! chain.build_full_at(
//!     UNIX_EPOCH + Duration::from_secs(1),
//!     vec![
//!         GeoEntity::point(1, 4.3517, 50.8503),
//!         GeoEntity::point(2, 4.3520, 50.8510),
//!         GeoEntity::line(10, vec![1, 2]),
//!     ],
//! )?;
//!
//! let layer = chain.latest_layer()?.expect("just built");
//! let tile = tile_of(4.3517, 50.8503, layer.zoom())?;
//! let keys = layer
//!     .query(&[tile])?
//!     .map(|hit| hit.map(|hit| hit.entity.key()))
//!     .collect::<Result<Vec<_>>>()?;
//! assert_eq!(keys, vec![EntityKey::point(1), EntityKey::point(2), EntityKey::line(10)]);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod builder;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod index;
pub mod resolve;
pub mod storage;
pub mod tile;

pub use builder::{BuildSummary, DiffBuilder, DiffMode, FullBuilder};
pub use config::{Config, CyclePolicy, LayerOptions, SyncMode};
pub use db::{LayerDb, MergeByKey, TileHit, TileHits};
pub use error::{GeoLayerError, Result};
pub use history::{ChainEntry, HistoryChain};
pub use resolve::{MembershipSource, NoFallback, ResolveStats, Resolved, Resolver};
pub use storage::{BincodeCodec, EntityCodec, LayerKind, LayerMeta, layer_id_from};
pub use tile::{Tile, TileMask, TileSet, tile_of};

pub use geo::Point;

pub use geolayer_types::{Change, Changeset, Effect, EntityKey, EntityKind, GeoEntity, Member, Payload, Tags};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Common imports
pub mod prelude {

    pub use crate::{GeoLayerError, Result};

    pub use crate::{Config, CyclePolicy, LayerOptions, SyncMode};

    pub use crate::{DiffBuilder, FullBuilder, HistoryChain, LayerDb, LayerKind};

    pub use crate::{Tile, TileMask, TileSet, tile_of};

    pub use crate::{Changeset, EntityKey, EntityKind, GeoEntity, Member};

    pub use geo::Point;
}
