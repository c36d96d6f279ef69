use crate::error::{GeoLayerError, Result};
use crate::index::{IdIndex, TileIndex};
use crate::storage::codec::EntityCodec;
use crate::storage::layout::{LayerMeta, LayerPaths};
use crate::storage::stream::TileStreamReader;
use std::path::Path;
use std::sync::Arc;

/// The files of one finished layer, loaded and validated.
pub struct LayerStore {
    meta: LayerMeta,
    data: TileStreamReader,
    tiles: TileIndex,
    ids: IdIndex,
}

impl LayerStore {
    pub fn open(dir: &Path, codec: Arc<dyn EntityCodec>) -> Result<Self> {
        let paths = LayerPaths::new(dir);
        let meta = LayerMeta::load(paths.dir())?;
        let tiles = TileIndex::open(&paths.tiles())?;
        if tiles.zoom() != meta.zoom {
            return Err(GeoLayerError::integrity(format!(
                "layer {}: tile index at zoom {}, metadata says {}",
                meta.id,
                tiles.zoom(),
                meta.zoom
            )));
        }
        let ids = IdIndex::open(&paths.ids())?;
        let data = TileStreamReader::open(&paths.data(), meta.zoom, codec)?;
        Ok(Self {
            meta,
            data,
            tiles,
            ids,
        })
    }

    pub fn meta(&self) -> &LayerMeta {
        &self.meta
    }

    pub fn data(&self) -> &TileStreamReader {
        &self.data
    }

    pub fn tiles(&self) -> &TileIndex {
        &self.tiles
    }

    pub fn ids(&self) -> &IdIndex {
        &self.ids
    }
}
