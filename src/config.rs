//! Configuration for building and reading layers.
//!
//! `Config` is shared by the builders, the layer reader and the history
//! chain. It can be assembled in code, or loaded from JSON (and TOML with the
//! `toml` feature).
use serde::de::Error;

pub use geolayer_types::config::SyncMode;

use crate::tile::MAX_ZOOM;

/// What to do with groups whose cyclic membership never stabilizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Give every member of a residual class the union of what its members
    /// resolved so far (possibly no tiles at all).
    #[default]
    Union,
    /// Abort the build with `UnresolvableCycleState`.
    Reject,
}

/// Engine configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Zoom level of newly built full layers
    #[serde(default = "Config::default_zoom")]
    pub zoom: u8,

    /// Size of the active write buffer of the tile stream, in bytes
    #[serde(default = "Config::default_write_buffer_size")]
    pub write_buffer_size: usize,

    /// Number of out-of-buffer pointer patches held back before a batch flush
    #[serde(default = "Config::default_pending_patch_capacity")]
    pub pending_patch_capacity: usize,

    /// log2 of the number of slots per sparse index block
    #[serde(default = "Config::default_sparse_block_bits")]
    pub sparse_block_bits: u32,

    /// Open layers kept per cache bucket
    #[serde(default = "Config::default_layer_cache_capacity")]
    pub layer_cache_capacity: usize,

    #[serde(default)]
    pub sync_mode: SyncMode,

    #[serde(default)]
    pub cycle_policy: CyclePolicy,
}

impl Config {
    const fn default_zoom() -> u8 {
        14
    }

    const fn default_write_buffer_size() -> usize {
        1 << 20
    }

    const fn default_pending_patch_capacity() -> usize {
        1 << 16
    }

    const fn default_sparse_block_bits() -> u32 {
        12
    }

    const fn default_layer_cache_capacity() -> usize {
        8
    }

    pub fn with_zoom(mut self, zoom: u8) -> Self {
        self.zoom = zoom;
        self
    }

    pub fn with_write_buffer_size(mut self, size: usize) -> Self {
        assert!(size > 0, "Write buffer size must be greater than zero");
        self.write_buffer_size = size;
        self
    }

    pub fn with_pending_patch_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Pending patch capacity must be greater than zero");
        self.pending_patch_capacity = capacity;
        self
    }

    pub fn with_sparse_block_bits(mut self, bits: u32) -> Self {
        self.sparse_block_bits = bits;
        self
    }

    pub fn with_layer_cache_capacity(mut self, capacity: usize) -> Self {
        assert!(capacity > 0, "Layer cache capacity must be greater than zero");
        self.layer_cache_capacity = capacity;
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn with_cycle_policy(mut self, policy: CyclePolicy) -> Self {
        self.cycle_policy = policy;
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.zoom % 2 != 0 || self.zoom > MAX_ZOOM {
            return Err(format!(
                "Zoom must be even and at most {}, got {}",
                MAX_ZOOM, self.zoom
            ));
        }

        if self.write_buffer_size == 0 {
            return Err("Write buffer size must be greater than zero".to_string());
        }

        if self.pending_patch_capacity == 0 {
            return Err("Pending patch capacity must be greater than zero".to_string());
        }

        if !(4..=20).contains(&self.sparse_block_bits) {
            return Err(format!(
                "Sparse block bits must be between 4 and 20, got {}",
                self.sparse_block_bits
            ));
        }

        if self.layer_cache_capacity == 0 {
            return Err("Layer cache capacity must be greater than zero".to_string());
        }

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let config: Config = serde_json::from_str(json)?;
        if let Err(e) = config.validate() {
            return Err(Error::custom(e));
        }
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[cfg(feature = "toml")]
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        let config: Config = toml::from_str(toml_str)?;
        if let Err(e) = config.validate() {
            return Err(toml::de::Error::custom(e));
        }
        Ok(config)
    }

    #[cfg(feature = "toml")]
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            zoom: Self::default_zoom(),
            write_buffer_size: Self::default_write_buffer_size(),
            pending_patch_capacity: Self::default_pending_patch_capacity(),
            sparse_block_bits: Self::default_sparse_block_bits(),
            layer_cache_capacity: Self::default_layer_cache_capacity(),
            sync_mode: SyncMode::default(),
            cycle_policy: CyclePolicy::default(),
        }
    }
}

/// Per-build options.
#[derive(Debug, Clone, Default)]
pub struct LayerOptions {
    /// Extra key/value pairs stored in the layer metadata
    pub meta: Vec<(String, String)>,
}

impl LayerOptions {
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.push((key.into(), value.into()));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.zoom, 14);
        assert_eq!(config.sync_mode, SyncMode::All);
        assert_eq!(config.cycle_policy, CyclePolicy::Union);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default()
            .with_zoom(12)
            .with_sync_mode(SyncMode::Data)
            .with_cycle_policy(CyclePolicy::Reject)
            .with_pending_patch_capacity(16);

        let json = config.to_json().unwrap();
        let deserialized = Config::from_json(&json).unwrap();

        assert_eq!(deserialized.zoom, 12);
        assert_eq!(deserialized.sync_mode, SyncMode::Data);
        assert_eq!(deserialized.cycle_policy, CyclePolicy::Reject);
        assert_eq!(deserialized.pending_patch_capacity, 16);
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config = Config::from_json(r#"{"zoom": 10}"#).unwrap();
        assert_eq!(config.zoom, 10);
        assert_eq!(config.layer_cache_capacity, 8);
    }

    #[test]
    fn test_config_validation() {
        assert!(Config::default().with_zoom(13).validate().is_err());
        assert!(Config::default().with_zoom(18).validate().is_err());
        assert!(Config::default().with_sparse_block_bits(2).validate().is_err());
        assert!(Config::from_json(r#"{"zoom": 15}"#).is_err());
        assert!(Config::from_json(r#"{"unknown": 1}"#).is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_toml_roundtrip() {
        let config = Config::default().with_zoom(8);
        let text = config.to_toml().unwrap();
        let back = Config::from_toml(&text).unwrap();
        assert_eq!(back.zoom, 8);
    }
}
