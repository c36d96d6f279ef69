//! Directory layout of a history root and of each layer in it, plus the
//! durable-write helpers every file goes through.
//!
//! ```text
//! <root>/latest.json             {"latest": "layers/<id>"}
//! <root>/layers/<id>/layer.json  LayerMeta, written last
//! <root>/layers/<id>/data.bin    tile stream
//! <root>/layers/<id>/tiles.idx   tile heads
//! <root>/layers/<id>/ids.idx     id index
//! <root>/layers/.staging-<uuid>  build in progress
//! ```

use crate::config::SyncMode;
use crate::error::{GeoLayerError, Result};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

pub const LAYERS_DIR: &str = "layers";
pub const LATEST_FILE: &str = "latest.json";
pub const STAGING_PREFIX: &str = ".staging-";

pub const LAYER_META_FILE: &str = "layer.json";
pub const DATA_FILE: &str = "data.bin";
pub const TILE_INDEX_FILE: &str = "tiles.idx";
pub const ID_INDEX_FILE: &str = "ids.idx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    /// Self-contained base layer.
    Full,
    /// Only the entities of one changeset.
    Diff,
    /// Changed entities plus the complete content of every touched tile.
    Snapshot,
}

/// Contents of `layer.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerMeta {
    pub id: i64,
    pub zoom: u8,
    pub base_id: Option<i64>,
    pub kind: LayerKind,
    #[serde(default)]
    pub meta: Vec<(String, String)>,
}

impl LayerMeta {
    pub fn value(&self, key: &str) -> Option<&str> {
        self.meta
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(dir.join(LAYER_META_FILE))?;
        let meta: LayerMeta = serde_json::from_str(&text)?;
        if meta.kind == LayerKind::Full && meta.base_id.is_some()
            || meta.kind != LayerKind::Full && meta.base_id.is_none()
        {
            return Err(GeoLayerError::integrity(format!(
                "layer {}: {:?} layer with base {:?}",
                meta.id, meta.kind, meta.base_id
            )));
        }
        Ok(meta)
    }

    pub fn save(&self, dir: &Path, sync: SyncMode) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(LAYER_META_FILE), &json, sync)
    }
}

/// Pointer file at the history root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestPointer {
    pub latest: String,
}

impl LatestPointer {
    pub fn for_layer(id: i64) -> Self {
        Self {
            latest: format!("{LAYERS_DIR}/{id}"),
        }
    }

    /// Layer id named by the pointer.
    pub fn layer_id(&self) -> Result<i64> {
        self.latest
            .strip_prefix(LAYERS_DIR)
            .and_then(|rest| rest.strip_prefix('/'))
            .and_then(|id| id.parse().ok())
            .ok_or_else(|| {
                GeoLayerError::integrity(format!("latest pointer {:?} is malformed", self.latest))
            })
    }

    pub fn load(root: &Path) -> Result<Option<Self>> {
        let path = root.join(LATEST_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&text)?))
    }

    pub fn save(&self, root: &Path, sync: SyncMode) -> Result<()> {
        let json = serde_json::to_vec_pretty(self)?;
        write_atomic(&root.join(LATEST_FILE), &json, sync)
    }
}

/// File locations inside one layer directory.
#[derive(Debug, Clone)]
pub struct LayerPaths {
    dir: PathBuf,
}

impl LayerPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn meta(&self) -> PathBuf {
        self.dir.join(LAYER_META_FILE)
    }

    pub fn data(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    pub fn tiles(&self) -> PathBuf {
        self.dir.join(TILE_INDEX_FILE)
    }

    pub fn ids(&self) -> PathBuf {
        self.dir.join(ID_INDEX_FILE)
    }
}

pub fn layers_dir(root: &Path) -> PathBuf {
    root.join(LAYERS_DIR)
}

pub fn layer_dir(root: &Path, id: i64) -> PathBuf {
    layers_dir(root).join(id.to_string())
}

pub(crate) fn new_staging_dir(root: &Path) -> PathBuf {
    layers_dir(root).join(format!("{STAGING_PREFIX}{}", uuid::Uuid::new_v4()))
}

/// Layer id for a build at `time`: milliseconds since the Unix epoch.
pub fn layer_id_from(time: SystemTime) -> Result<i64> {
    let since = time
        .duration_since(UNIX_EPOCH)
        .map_err(|_| GeoLayerError::InvalidTimestamp)?;
    i64::try_from(since.as_millis()).map_err(|_| GeoLayerError::InvalidTimestamp)
}

pub(crate) fn sync_file(file: &File, sync: SyncMode) -> Result<()> {
    match sync {
        SyncMode::All => file.sync_all()?,
        SyncMode::Data => file.sync_data()?,
    }
    Ok(())
}

pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    let dir = File::open(dir)?;
    dir.sync_all()?;
    Ok(())
}

/// Replace `path` with `bytes` through a synced temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8], sync: SyncMode) -> Result<()> {
    let mut temp = path.to_path_buf();
    if let Some(name) = path.file_name() {
        let mut name = name.to_string_lossy().into_owned();
        name.push_str(".tmp");
        temp.set_file_name(name);
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&temp)?;
    file.write_all(bytes)?;
    sync_file(&file, sync)?;
    drop(file);

    std::fs::rename(&temp, path)?;
    if let Some(parent) = path.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[test]
    fn test_meta_save_and_load() {
        let dir = tempdir().unwrap();
        let meta = LayerMeta {
            id: 1_700_000_000_000,
            zoom: 14,
            base_id: Some(1_600_000_000_000),
            kind: LayerKind::Diff,
            meta: vec![("source".into(), "test".into())],
        };
        meta.save(dir.path(), SyncMode::All).unwrap();
        let back = LayerMeta::load(dir.path()).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.value("source"), Some("test"));
        assert!(!dir.path().join("layer.json.tmp").exists());
    }

    #[test]
    fn test_meta_kind_must_match_base() {
        let dir = tempdir().unwrap();
        let meta = LayerMeta {
            id: 2,
            zoom: 14,
            base_id: None,
            kind: LayerKind::Snapshot,
            meta: Vec::new(),
        };
        meta.save(dir.path(), SyncMode::Data).unwrap();
        assert!(matches!(
            LayerMeta::load(dir.path()),
            Err(GeoLayerError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_latest_pointer() {
        let dir = tempdir().unwrap();
        assert!(LatestPointer::load(dir.path()).unwrap().is_none());

        let pointer = LatestPointer::for_layer(42);
        assert_eq!(pointer.latest, "layers/42");
        pointer.save(dir.path(), SyncMode::All).unwrap();

        let back = LatestPointer::load(dir.path()).unwrap().unwrap();
        assert_eq!(back.layer_id().unwrap(), 42);

        let bad = LatestPointer {
            latest: "elsewhere/42".into(),
        };
        assert!(bad.layer_id().is_err());
    }

    #[test]
    fn test_layer_id_from_time() {
        let time = UNIX_EPOCH + Duration::from_millis(1_234_567);
        assert_eq!(layer_id_from(time).unwrap(), 1_234_567);
        let before = UNIX_EPOCH - Duration::from_secs(1);
        assert!(matches!(
            layer_id_from(before),
            Err(GeoLayerError::InvalidTimestamp)
        ));
    }

    #[test]
    fn test_staging_dirs_are_unique() {
        let root = Path::new("/data");
        let a = new_staging_dir(root);
        let b = new_staging_dir(root);
        assert_ne!(a, b);
        assert!(a.starts_with("/data/layers"));
        assert!(
            a.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(STAGING_PREFIX)
        );
    }
}
