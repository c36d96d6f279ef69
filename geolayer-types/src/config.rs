use serde::{Deserialize, Serialize};

/// File synchronization strategy (fsync vs fdatasync) used when a layer's
/// files are finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    #[default]
    All,
    Data,
}
