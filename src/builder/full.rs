use super::BuildSummary;
use super::writer::LayerWriter;
use crate::config::{Config, LayerOptions};
use crate::error::Result;
use crate::resolve::{NoFallback, Resolver};
use crate::storage::codec::EntityCodec;
use crate::storage::layout::LayerKind;
use crate::tile::{TileSet, validate_zoom};
use geolayer_types::entity::GeoEntity;
use std::path::Path;
use std::sync::Arc;

/// Builds a base layer from a complete, sorted entity stream.
pub struct FullBuilder {
    config: Config,
    codec: Arc<dyn EntityCodec>,
    options: LayerOptions,
}

impl FullBuilder {
    pub fn new(config: Config, codec: Arc<dyn EntityCodec>) -> Self {
        Self {
            config,
            codec,
            options: LayerOptions::default(),
        }
    }

    pub fn options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }

    /// Write layer `id` into `dir` from `entities`, which must be sorted
    /// points, lines, groups, each by ascending id.
    pub fn build<I>(&self, dir: &Path, id: i64, entities: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = GeoEntity>,
    {
        let zoom = validate_zoom(self.config.zoom)?;
        log::info!("building full layer {id} at zoom {zoom}");

        let mut writer = LayerWriter::create(dir, zoom, &self.config, self.codec.clone())?;
        let mut resolver = Resolver::new(zoom, self.config.cycle_policy, &NoFallback)?;

        for entity in entities {
            if let Some(resolved) = resolver.push(entity)? {
                writer.put(&resolved.tiles, &resolved.entity)?;
            }
        }
        let (groups, stats) = resolver.finish()?;
        for resolved in &groups {
            writer.put(&resolved.tiles, &resolved.entity)?;
        }

        let summary = writer.finish(id, LayerKind::Full, None, &self.options, &TileSet::new(), stats)?;
        log::info!(
            "full layer {id}: {} entities in {} tiles",
            summary.entities,
            summary.tiles
        );
        Ok(summary)
    }
}
