//! Layered read composition.
//!
//! A [`LayerDb`] is one opened layer plus, for diff and snapshot layers, the
//! chain of parents it delegates to. Reads check the local id index first: a
//! deletion marker hides the key, a pointer is answered locally, and anything
//! else falls through to the parent.

mod merge;
mod store;

pub use merge::MergeByKey;
pub use store::LayerStore;

use crate::error::{GeoLayerError, Result};
use crate::index::{IdEntry, TileEntry};
use crate::resolve::MembershipSource;
use crate::storage::cache::{Disposable, Lease};
use crate::storage::codec::EntityCodec;
use crate::storage::layout::{LayerKind, LayerMeta};
use crate::tile::{Tile, TileMask, TileSet, tiles_for_mask};
use geolayer_types::entity::{EntityKey, GeoEntity};
use std::path::Path;
use std::sync::Arc;

/// An entity found by a tile query, with the requested tiles it is filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct TileHit {
    pub entity: GeoEntity,
    pub tiles: TileSet,
}

/// Lazy, key-ordered result of a tile query.
pub type TileHits = Box<dyn Iterator<Item = Result<TileHit>> + Send>;

/// One readable version of the dataset.
///
/// Layers are immutable once built, so a `LayerDb` can be shared between
/// threads freely (`Arc<LayerDb>`); no read takes a lock beyond a short one
/// on the store handle.
///
/// # Examples
///
/// ```rust,ignore
/// use geolayer::prelude::*;
///
/// let chain = HistoryChain::open("/var/lib/geolayer", Config::default())?;
/// let layer = chain.latest_layer()?.expect("no layers yet");
///
/// let cafe = layer.get(EntityKey::point(42))?;
/// let tile = tile_of(4.35, 50.85, layer.zoom())?;
/// for hit in layer.query(&[tile])? {
///     let hit = hit?;
///     println!("{} in {:?}", hit.entity.key(), hit.tiles);
/// }
/// ```
pub struct LayerDb {
    meta: LayerMeta,
    store: Lease<LayerStore>,
    parent: Option<Arc<LayerDb>>,
}

impl LayerDb {
    /// Open the layer in `dir`. Diff and snapshot layers need their base.
    pub fn open(dir: &Path, codec: Arc<dyn EntityCodec>, parent: Option<Arc<LayerDb>>) -> Result<Self> {
        let store = LayerStore::open(dir, codec)?;
        Self::from_store(Arc::new(Disposable::new(store)).acquire()?, parent)
    }

    pub(crate) fn from_store(store: Lease<LayerStore>, parent: Option<Arc<LayerDb>>) -> Result<Self> {
        let meta = store.get()?.meta().clone();
        match (meta.kind, meta.base_id, &parent) {
            (LayerKind::Full, _, None) => {}
            (LayerKind::Full, _, Some(_)) => {
                return Err(GeoLayerError::integrity(format!(
                    "layer {} is a full layer and takes no base",
                    meta.id
                )));
            }
            (_, base_id, None) => {
                return Err(GeoLayerError::MissingBaseLayer(base_id.unwrap_or_default()));
            }
            (_, base_id, Some(parent)) => {
                if base_id != Some(parent.id()) {
                    return Err(GeoLayerError::MissingBaseLayer(base_id.unwrap_or_default()));
                }
                if parent.zoom() != meta.zoom {
                    return Err(GeoLayerError::ZoomMismatch {
                        expected: meta.zoom,
                        found: parent.zoom(),
                    });
                }
            }
        }
        Ok(Self {
            meta,
            store,
            parent,
        })
    }

    pub fn id(&self) -> i64 {
        self.meta.id
    }

    pub fn zoom(&self) -> u8 {
        self.meta.zoom
    }

    pub fn kind(&self) -> LayerKind {
        self.meta.kind
    }

    pub fn base_id(&self) -> Option<i64> {
        self.meta.base_id
    }

    pub fn meta(&self) -> &LayerMeta {
        &self.meta
    }

    pub fn parent(&self) -> Option<&Arc<LayerDb>> {
        self.parent.as_ref()
    }

    fn store(&self) -> Result<Arc<LayerStore>> {
        self.store.get()
    }

    /// Give back this handle's lease on its store. Other handles on the same
    /// layer are unaffected; dropping the handle has the same effect.
    pub fn release(&self) {
        self.store.release();
    }

    pub fn get(&self, key: EntityKey) -> Result<Option<GeoEntity>> {
        let store = self.store()?;
        match store.ids().lookup(key)? {
            Some(IdEntry::Deleted) => Ok(None),
            Some(IdEntry::Pointer(pointer)) => store.data().get(pointer).map(Some),
            None => match &self.parent {
                Some(parent) => parent.get(key),
                None => Ok(None),
            },
        }
    }

    /// Tiles `key` is filed under, `None` when the key is absent or deleted.
    pub fn lookup_tiles(&self, key: EntityKey) -> Result<Option<TileSet>> {
        let store = self.store()?;
        match store.ids().lookup(key)? {
            Some(IdEntry::Deleted) => Ok(None),
            Some(IdEntry::Pointer(pointer)) => store.data().get_tiles_for(pointer).map(Some),
            None => match &self.parent {
                Some(parent) => parent.lookup_tiles(key),
                None => Ok(None),
            },
        }
    }

    /// Tiles `key` is filed under; empty when absent or deleted.
    pub fn get_tiles(&self, key: EntityKey) -> Result<TileSet> {
        Ok(self.lookup_tiles(key)?.unwrap_or_default())
    }

    pub fn contains(&self, key: EntityKey) -> Result<bool> {
        Ok(self.lookup_tiles(key)?.is_some())
    }

    /// What this layer alone records for a tile.
    pub fn tile_entry(&self, tile_id: u32) -> Result<TileEntry> {
        Ok(self.store()?.tiles().entry(tile_id))
    }

    /// Whether this layer holds the definitive content of a tile without
    /// looking at its parents.
    pub fn is_tile_resolved(&self, tile_id: u32) -> Result<bool> {
        Ok(match self.kind() {
            LayerKind::Full => true,
            LayerKind::Snapshot => self.tile_entry(tile_id)?.is_known(),
            LayerKind::Diff => false,
        })
    }

    fn check_zoom(&self, tile: &Tile) -> Result<u32> {
        if tile.zoom != self.zoom() {
            return Err(GeoLayerError::ZoomMismatch {
                expected: self.zoom(),
                found: tile.zoom,
            });
        }
        Ok(tile.local_id())
    }

    /// Every entity filed under any of `tiles`, in key order.
    pub fn query(&self, tiles: &[Tile]) -> Result<TileHits> {
        let ids = tiles
            .iter()
            .map(|tile| self.check_zoom(tile))
            .collect::<Result<TileSet>>()?;
        self.query_ids(&ids)
    }

    /// [`LayerDb::query`] by tile local ids.
    pub fn query_ids(&self, requested: &TileSet) -> Result<TileHits> {
        let store = self.store()?;

        let heads: Vec<(u32, u64)> = requested
            .iter()
            .filter_map(|id| store.tiles().head(id).map(|head| (id, head)))
            .collect();
        let local = store.data().iter_tiles(heads).map(|hit| {
            hit.map(|hit| TileHit {
                entity: hit.entity,
                tiles: hit.tiles,
            })
        });

        let inherited: TileSet = match (&self.parent, self.kind()) {
            (None, _) | (_, LayerKind::Full) => TileSet::new(),
            (Some(_), LayerKind::Snapshot) => requested
                .iter()
                .filter(|&id| !store.tiles().entry(id).is_known())
                .collect(),
            (Some(_), LayerKind::Diff) => requested.clone(),
        };

        let parent = match &self.parent {
            Some(parent) if !inherited.is_empty() => parent,
            _ => return Ok(Box::new(local)),
        };

        let shadow = store.clone();
        let from_parent = parent.query_ids(&inherited)?.filter_map(move |hit| match hit {
            Ok(hit) => match shadow.ids().lookup(hit.entity.key()) {
                Ok(Some(_)) => None,
                Ok(None) => Some(Ok(hit)),
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        });

        Ok(Box::new(MergeByKey::new(local, from_parent)))
    }

    /// Which of the 16 children of `parent` have content at this layer's zoom.
    pub fn child_mask(&self, parent: &Tile) -> Result<TileMask> {
        let children = parent.children()?;
        let mut mask = TileMask::EMPTY;
        for (bit, child) in children.iter().enumerate() {
            let id = self.check_zoom(child)?;
            if self.has_content(id)? {
                mask.set(bit as u8);
            }
        }
        Ok(mask)
    }

    fn has_content(&self, tile_id: u32) -> Result<bool> {
        match self.tile_entry(tile_id)? {
            TileEntry::Pointer(_) => return Ok(true),
            TileEntry::Empty => return Ok(false),
            TileEntry::Unknown if self.kind() == LayerKind::Full => return Ok(false),
            TileEntry::Unknown => {}
        }
        // Deletions in this layer can empty an inherited tile.
        match self.query_ids(&TileSet::single(tile_id))?.next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }

    /// Query the children of `parent` selected by `mask`.
    pub fn query_mask(&self, parent: &Tile, mask: TileMask) -> Result<TileHits> {
        let tiles: Vec<Tile> = tiles_for_mask(parent, mask)?.collect();
        self.query(&tiles)
    }
}

impl MembershipSource for LayerDb {
    fn tiles_of(&self, key: EntityKey) -> Result<Option<TileSet>> {
        self.lookup_tiles(key)
    }
}

impl std::fmt::Debug for LayerDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerDb")
            .field("id", &self.meta.id)
            .field("kind", &self.meta.kind)
            .field("zoom", &self.meta.zoom)
            .field("base_id", &self.meta.base_id)
            .finish()
    }
}
