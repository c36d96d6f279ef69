//! Layer builders.
//!
//! - [`FullBuilder`] turns one sorted entity stream into a base layer.
//! - [`DiffBuilder`] applies a [`Changeset`](geolayer_types::Changeset) on top
//!   of a base layer, either as a plain diff or as a snapshot that also
//!   rewrites every touched tile in full.
//!
//! Builders write into a directory that must not exist yet. Any error aborts
//! the build and leaves a directory without `layer.json` behind, which the
//! history chain reports as an orphan.

mod diff;
mod full;
mod writer;

pub use diff::{DiffBuilder, DiffMode};
pub use full::FullBuilder;

use crate::resolve::ResolveStats;
use crate::storage::layout::LayerKind;
use crate::storage::stream::StreamStats;

/// What a finished build wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildSummary {
    pub id: i64,
    pub kind: LayerKind,
    pub base_id: Option<i64>,
    /// Entities owned by the layer (id-indexed).
    pub entities: u64,
    /// Unchanged base entities copied into completed tiles.
    pub carried: u64,
    pub deletions: u64,
    /// Tiles with a chain in this layer.
    pub tiles: u64,
    /// Tiles recorded as known empty.
    pub empty_tiles: u64,
    pub stream: StreamStats,
    pub resolve: ResolveStats,
}

impl BuildSummary {
    pub(crate) fn meta_entries(&self) -> Vec<(String, String)> {
        [
            ("entities", self.entities.to_string()),
            ("carried", self.carried.to_string()),
            ("deletions", self.deletions.to_string()),
            ("tiles", self.tiles.to_string()),
            ("empty_tiles", self.empty_tiles.to_string()),
            ("deferred_patches", self.stream.deferred_patches.to_string()),
            ("cycle_classes", self.resolve.cycle_classes.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}
