//! The sequence of layers under one root directory.
//!
//! Every layer is linked into the chain only after it has been fully written
//! and renamed into `layers/<id>`; `latest.json` then names it. Builds run
//! in a staging directory, so an interrupted build leaves an orphan that never
//! shows up as a layer. Linked layers always have ids at or below the latest
//! one.

use crate::builder::{BuildSummary, DiffBuilder, FullBuilder};
use crate::config::Config;
use crate::db::{LayerDb, LayerStore};
use crate::error::{GeoLayerError, Result};
use crate::storage::cache::{Disposable, Lease, ResourceCache};
use crate::storage::codec::{BincodeCodec, EntityCodec};
use crate::storage::layout::{
    LAYER_META_FILE, LatestPointer, LayerKind, LayerMeta, STAGING_PREFIX, layer_dir, layer_id_from,
    layers_dir, new_staging_dir, sync_dir,
};
use crate::tile::Tile;
use geolayer_types::changeset::Changeset;
use geolayer_types::entity::GeoEntity;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// One linked layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainEntry {
    pub id: i64,
    pub base_id: Option<i64>,
    pub kind: LayerKind,
    pub zoom: u8,
}

impl From<&LayerMeta> for ChainEntry {
    fn from(meta: &LayerMeta) -> Self {
        Self {
            id: meta.id,
            base_id: meta.base_id,
            kind: meta.kind,
            zoom: meta.zoom,
        }
    }
}

type StoreCache = ResourceCache<(LayerKind, u8), i64, LayerStore>;

/// Versioned layers of one dataset.
///
/// Reads can run from any number of threads, and every opened [`LayerDb`]
/// holds its own lease on the cached stores it reads.
///
/// Builds may overlap, but linking is serialized by the lock on the latest
/// pointer. A build whose id has been overtaken in the meantime fails with
/// [`GeoLayerError::TimestampDidNotAdvance`]; a diff or snapshot whose base is
/// no longer the latest layer fails with [`GeoLayerError::BaseSuperseded`] and
/// has to be rebuilt on the new latest layer.
///
/// # Examples
///
/// ```rust
/// use geolayer::prelude::*;
/// use std::time::{Duration, UNIX_EPOCH};
///
/// let root = tempfile::tempdir()?;
/// let chain = HistoryChain::open(root.path(), Config::default())?;
///
/// chain.build_full_at(
///     UNIX_EPOCH + Duration::from_secs(1),
///     vec![GeoEntity::point(1, 4.35, 50.85)],
/// )?;
///
/// let mut changes = Changeset::new(UNIX_EPOCH + Duration::from_secs(2));
/// changes.delete(EntityKey::point(1));
/// chain.build_diff(&changes)?;
///
/// let latest = chain.latest_layer()?.expect("linked");
/// assert_eq!(latest.get(EntityKey::point(1))?, None);
/// assert_eq!(chain.previous(2_000), Some(1_000));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct HistoryChain {
    root: PathBuf,
    config: Config,
    codec: Arc<dyn EntityCodec>,
    entries: RwLock<BTreeMap<i64, ChainEntry>>,
    latest: Mutex<Option<i64>>,
    cache: Mutex<StoreCache>,
}

impl HistoryChain {
    /// Open or create the chain rooted at `root`, storing entities with
    /// [`BincodeCodec`].
    pub fn open(root: impl AsRef<Path>, config: Config) -> Result<Self> {
        Self::with_codec(root, config, Arc::new(BincodeCodec))
    }

    pub fn with_codec(root: impl AsRef<Path>, config: Config, codec: Arc<dyn EntityCodec>) -> Result<Self> {
        config.validate().map_err(GeoLayerError::InvalidConfig)?;
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(layers_dir(&root))?;

        let latest = match LatestPointer::load(&root)? {
            Some(pointer) => Some(pointer.layer_id()?),
            None => None,
        };
        let scan = scan_layers(&root, latest)?;
        if let Some(id) = latest
            && !scan.linked.contains_key(&id)
        {
            return Err(GeoLayerError::integrity(format!(
                "latest pointer names layer {id}, which has no metadata"
            )));
        }
        if !scan.orphans.is_empty() {
            log::warn!(
                "history root {} holds {} orphaned layer directories",
                root.display(),
                scan.orphans.len()
            );
        }

        let cache = ResourceCache::new(config.layer_cache_capacity);
        Ok(Self {
            root,
            config,
            codec,
            entries: RwLock::new(scan.linked),
            latest: Mutex::new(latest),
            cache: Mutex::new(cache),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Directories under `layers/` that are not linked layers: staging
    /// directories, layers without metadata and layers newer than the latest.
    pub fn orphans(&self) -> Result<Vec<PathBuf>> {
        let latest = *self.latest.lock();
        Ok(scan_layers(&self.root, latest)?.orphans)
    }

    /// Remove every orphan. Must not run while a build is in progress.
    pub fn discard_orphans(&self) -> Result<usize> {
        let orphans = self.orphans()?;
        for dir in &orphans {
            log::warn!("discarding orphaned layer directory {}", dir.display());
            std::fs::remove_dir_all(dir)?;
        }
        Ok(orphans.len())
    }

    pub fn layers(&self) -> Vec<ChainEntry> {
        self.entries.read().values().copied().collect()
    }

    pub fn ids(&self) -> Vec<i64> {
        self.entries.read().keys().copied().collect()
    }

    pub fn entry(&self, id: i64) -> Option<ChainEntry> {
        self.entries.read().get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// The base of layer `id`.
    pub fn previous(&self, id: i64) -> Option<i64> {
        self.entries.read().get(&id).and_then(|entry| entry.base_id)
    }

    /// The oldest layer built on top of `id`.
    pub fn next(&self, id: i64) -> Option<i64> {
        self.entries
            .read()
            .range((Bound::Excluded(id), Bound::Unbounded))
            .find(|(_, entry)| entry.base_id == Some(id))
            .map(|(&next, _)| next)
    }

    /// The newest layer whose id is at or before `timestamp` (Unix millis).
    pub fn covering(&self, timestamp: i64) -> Option<i64> {
        self.entries
            .read()
            .range(..=timestamp)
            .next_back()
            .map(|(&id, _)| id)
    }

    pub fn covering_time(&self, time: SystemTime) -> Result<Option<i64>> {
        Ok(self.covering(layer_id_from(time)?))
    }

    /// The layer that holds the definitive content of `tile` as of
    /// `timestamp`, found by walking base pointers down from the covering
    /// layer.
    pub fn tile_owner(&self, tile: &Tile, timestamp: i64) -> Result<Option<i64>> {
        let Some(start) = self.covering(timestamp) else {
            return Ok(None);
        };
        let mut layer = Some(self.open_layer(start)?);
        while let Some(current) = layer {
            if tile.zoom != current.zoom() {
                return Err(GeoLayerError::ZoomMismatch {
                    expected: current.zoom(),
                    found: tile.zoom,
                });
            }
            if current.is_tile_resolved(tile.local_id())? {
                return Ok(Some(current.id()));
            }
            layer = current.parent().cloned();
        }
        Ok(None)
    }

    pub fn latest_id(&self) -> Option<i64> {
        *self.latest.lock()
    }

    pub fn latest_layer(&self) -> Result<Option<Arc<LayerDb>>> {
        match self.latest_id() {
            Some(id) => Ok(Some(self.open_layer(id)?)),
            None => Ok(None),
        }
    }

    /// Open layer `id` together with the chain of bases it reads through.
    pub fn open_layer(&self, id: i64) -> Result<Arc<LayerDb>> {
        let mut lineage = Vec::new();
        {
            let entries = self.entries.read();
            let mut current = *entries.get(&id).ok_or(GeoLayerError::LayerNotFound(id))?;
            loop {
                lineage.push(current);
                match current.base_id {
                    None => break,
                    Some(base) => {
                        current = *entries.get(&base).ok_or(GeoLayerError::MissingBaseLayer(base))?;
                    }
                }
            }
        }

        let mut parent: Option<Arc<LayerDb>> = None;
        for entry in lineage.into_iter().rev() {
            let store = self.store(&entry)?;
            parent = Some(Arc::new(LayerDb::from_store(store, parent)?));
        }
        parent.ok_or(GeoLayerError::LayerNotFound(id))
    }

    /// A fresh lease on the cached store of `entry`. Leases are taken under
    /// the cache lock, so eviction never closes a store between lookup and
    /// acquire.
    fn store(&self, entry: &ChainEntry) -> Result<Lease<LayerStore>> {
        let bucket = (entry.kind, entry.zoom);
        let mut cache = self.cache.lock();
        if let Some(store) = cache.get(&bucket, &entry.id)
            && let Ok(lease) = store.acquire()
        {
            return Ok(lease);
        }
        let store = LayerStore::open(&layer_dir(&self.root, entry.id), self.codec.clone())?;
        let store = Arc::new(Disposable::new(store));
        let lease = store.acquire()?;
        cache.insert(bucket, entry.id, store);
        Ok(lease)
    }

    /// Build a full layer stamped with the current time.
    pub fn build_full<I>(&self, entities: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = GeoEntity>,
    {
        self.build_full_at(SystemTime::now(), entities)
    }

    pub fn build_full_at<I>(&self, time: SystemTime, entities: I) -> Result<BuildSummary>
    where
        I: IntoIterator<Item = GeoEntity>,
    {
        let id = layer_id_from(time)?;
        self.check_advances(id)?;
        let staging = new_staging_dir(&self.root);
        let summary = FullBuilder::new(self.config.clone(), self.codec.clone()).build(&staging, id, entities)?;
        self.link(&staging, &summary)?;
        Ok(summary)
    }

    /// Build a diff layer on top of the latest layer.
    pub fn build_diff(&self, changeset: &Changeset) -> Result<BuildSummary> {
        self.build_on_latest(DiffBuilder::diff(self.config.clone(), self.codec.clone()), changeset)
    }

    /// Build a snapshot layer on top of the latest layer.
    pub fn build_snapshot(&self, changeset: &Changeset) -> Result<BuildSummary> {
        self.build_on_latest(DiffBuilder::snapshot(self.config.clone(), self.codec.clone()), changeset)
    }

    fn build_on_latest(&self, builder: DiffBuilder, changeset: &Changeset) -> Result<BuildSummary> {
        let id = layer_id_from(changeset.timestamp)?;
        let base = self.latest_layer()?.ok_or(GeoLayerError::EmptyHistory)?;
        let staging = new_staging_dir(&self.root);
        let summary = builder.build(&staging, id, &base, changeset)?;
        self.link(&staging, &summary)?;
        Ok(summary)
    }

    fn check_advances(&self, id: i64) -> Result<()> {
        match *self.latest.lock() {
            Some(latest) if id <= latest => Err(GeoLayerError::TimestampDidNotAdvance { id, base_id: latest }),
            _ => Ok(()),
        }
    }

    /// Move a finished build into place and make it the latest layer.
    fn link(&self, staging: &Path, summary: &BuildSummary) -> Result<()> {
        let mut latest = self.latest.lock();
        if let Some(current) = *latest
            && summary.id <= current
        {
            discard_staging(staging);
            return Err(GeoLayerError::TimestampDidNotAdvance {
                id: summary.id,
                base_id: current,
            });
        }
        if let Some(base_id) = summary.base_id
            && *latest != Some(base_id)
        {
            discard_staging(staging);
            return Err(GeoLayerError::BaseSuperseded {
                id: summary.id,
                base_id,
                latest: *latest,
            });
        }

        let target = layer_dir(&self.root, summary.id);
        if target.exists() {
            discard_staging(staging);
            return Err(GeoLayerError::Io(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                format!("layer directory {} already exists", target.display()),
            )));
        }
        std::fs::rename(staging, &target)?;
        sync_dir(&layers_dir(&self.root))?;

        let meta = LayerMeta::load(&target)?;
        self.entries.write().insert(meta.id, ChainEntry::from(&meta));
        LatestPointer::for_layer(meta.id).save(&self.root, self.config.sync_mode)?;
        *latest = Some(meta.id);
        log::info!("linked {:?} layer {} as latest", meta.kind, meta.id);
        Ok(())
    }
}

impl std::fmt::Debug for HistoryChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryChain")
            .field("root", &self.root)
            .field("layers", &self.entries.read().len())
            .field("latest", &*self.latest.lock())
            .finish()
    }
}

fn discard_staging(staging: &Path) {
    if let Err(e) = std::fs::remove_dir_all(staging) {
        log::warn!("could not remove staging directory {}: {e}", staging.display());
    }
}

struct Scan {
    linked: BTreeMap<i64, ChainEntry>,
    orphans: Vec<PathBuf>,
}

fn scan_layers(root: &Path, latest: Option<i64>) -> Result<Scan> {
    let mut scan = Scan {
        linked: BTreeMap::new(),
        orphans: Vec::new(),
    };
    let dir = layers_dir(root);
    if !dir.exists() {
        return Ok(scan);
    }

    for item in std::fs::read_dir(&dir)? {
        let item = item?;
        if !item.file_type()?.is_dir() {
            continue;
        }
        let path = item.path();
        let name = item.file_name().to_string_lossy().into_owned();
        if name.starts_with(STAGING_PREFIX) {
            scan.orphans.push(path);
            continue;
        }
        let Ok(id) = name.parse::<i64>() else {
            continue;
        };
        if !path.join(LAYER_META_FILE).exists() || latest.is_none_or(|l| id > l) {
            scan.orphans.push(path);
            continue;
        }
        let meta = LayerMeta::load(&path)?;
        if meta.id != id {
            return Err(GeoLayerError::integrity(format!(
                "layer directory {name} holds metadata for layer {}",
                meta.id
            )));
        }
        scan.linked.insert(id, ChainEntry::from(&meta));
    }
    scan.orphans.sort();
    Ok(scan)
}
