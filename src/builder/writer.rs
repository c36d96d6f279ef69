use super::BuildSummary;
use crate::config::{Config, LayerOptions};
use crate::error::{GeoLayerError, Result};
use crate::index::{IdEntry, IdIndexWriter};
use crate::resolve::ResolveStats;
use crate::storage::codec::EntityCodec;
use crate::storage::layout::{LayerKind, LayerMeta, LayerPaths, sync_dir, sync_file};
use crate::storage::stream::{StreamOptions, TileStreamWriter};
use crate::tile::TileSet;
use geolayer_types::entity::{EntityKey, GeoEntity};
use std::fs::{File, OpenOptions};
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

/// Writes the files of one new layer into an empty directory.
///
/// `layer.json` is written last, so a directory without it is an unfinished
/// build.
pub(crate) struct LayerWriter {
    paths: LayerPaths,
    zoom: u8,
    stream: TileStreamWriter,
    ids: IdIndexWriter<BufWriter<File>>,
    config: Config,
    entities: u64,
    carried: u64,
    deletions: u64,
}

impl LayerWriter {
    pub fn create(dir: &Path, zoom: u8, config: &Config, codec: Arc<dyn EntityCodec>) -> Result<Self> {
        if dir.exists() {
            return Err(GeoLayerError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("layer directory {} already exists", dir.display()),
            )));
        }
        std::fs::create_dir_all(dir)?;
        let paths = LayerPaths::new(dir);

        let stream = TileStreamWriter::create(
            &paths.data(),
            codec,
            StreamOptions {
                zoom,
                buffer_capacity: config.write_buffer_size,
                pending_capacity: config.pending_patch_capacity,
                block_bits: config.sparse_block_bits,
                sync: config.sync_mode,
            },
        )?;
        let ids_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(paths.ids())?;
        let ids = IdIndexWriter::new(BufWriter::new(ids_file))?;

        Ok(Self {
            paths,
            zoom,
            stream,
            ids,
            config: config.clone(),
            entities: 0,
            carried: 0,
            deletions: 0,
        })
    }

    /// Write an entity owned by this layer.
    pub fn put(&mut self, tiles: &TileSet, entity: &GeoEntity) -> Result<u64> {
        let pointer = self.stream.append(tiles, entity)?;
        self.ids.append(entity.key(), IdEntry::Pointer(pointer))?;
        self.entities += 1;
        Ok(pointer)
    }

    /// Copy an unchanged entity into completed tiles. Key lookups keep going
    /// to the base, which holds its full tile set.
    pub fn carry(&mut self, tiles: &TileSet, entity: &GeoEntity) -> Result<u64> {
        let pointer = self.stream.append(tiles, entity)?;
        self.carried += 1;
        Ok(pointer)
    }

    pub fn delete(&mut self, key: EntityKey) -> Result<()> {
        self.ids.append(key, IdEntry::Deleted)?;
        self.deletions += 1;
        Ok(())
    }

    /// Finalize every file and write the metadata.
    ///
    /// `complete` lists tiles this layer holds in full; those left without a
    /// chain are recorded as known empty.
    pub fn finish(
        self,
        id: i64,
        kind: LayerKind,
        base_id: Option<i64>,
        options: &LayerOptions,
        complete: &TileSet,
        resolve: ResolveStats,
    ) -> Result<BuildSummary> {
        let (mut tiles, stream) = self.stream.finish()?;
        let mut empty_tiles = 0u64;
        for tile in complete {
            if tiles.head(tile).is_none() {
                tiles.mark_empty(tile)?;
                empty_tiles += 1;
            }
        }
        let tile_count = tiles.head_count() as u64;
        tiles.save(&self.paths.tiles(), self.config.sync_mode)?;

        let (ids, _) = self.ids.finish()?;
        let ids_file = ids.into_inner().map_err(|e| e.into_error())?;
        sync_file(&ids_file, self.config.sync_mode)?;
        drop(ids_file);

        let summary = BuildSummary {
            id,
            kind,
            base_id,
            entities: self.entities,
            carried: self.carried,
            deletions: self.deletions,
            tiles: tile_count,
            empty_tiles,
            stream,
            resolve,
        };

        let mut meta = options.meta.clone();
        meta.extend(summary.meta_entries());
        LayerMeta {
            id,
            zoom: self.zoom,
            base_id,
            kind,
            meta,
        }
        .save(self.paths.dir(), self.config.sync_mode)?;
        sync_dir(self.paths.dir())?;

        Ok(summary)
    }
}
