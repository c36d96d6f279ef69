//! Error types for geolayer.

use geolayer_types::entity::{EntityKey, EntityKind};
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, GeoLayerError>;

/// Every failure the engine can report.
///
/// Build errors abort the whole build; the staging directory of a failed build
/// is never linked into a history chain. Read errors are surfaced as-is, the
/// only silent outcome being an absent key.
#[derive(Error, Debug)]
pub enum GeoLayerError {
    #[error("invalid zoom level {0}: zoom must be even and at most 16")]
    InvalidZoom(u8),

    #[error("tile at zoom {found} does not belong to a layer at zoom {expected}")]
    ZoomMismatch { expected: u8, found: u8 },

    #[error("unsorted input: {key} does not come after {previous}")]
    UnsortedInput { previous: EntityKey, key: EntityKey },

    #[error("unsorted stream: {found} entity after {previous} entities")]
    UnsortedStream {
        previous: EntityKind,
        found: EntityKind,
    },

    #[error("base layer {0} cannot be loaded")]
    MissingBaseLayer(i64),

    #[error("layer {0} not found")]
    LayerNotFound(i64),

    #[error("history chain has no layers yet")]
    EmptyHistory,

    #[error("layer id {id} does not advance past base layer {base_id}")]
    TimestampDidNotAdvance { id: i64, base_id: i64 },

    #[error("layer {id} was built on layer {base_id}, but the latest layer is now {latest:?}")]
    BaseSuperseded {
        id: i64,
        base_id: i64,
        latest: Option<i64>,
    },

    #[error("data integrity violation: {0}")]
    DataIntegrity(String),

    #[error("groups {0:?} form a cycle that cannot be resolved")]
    UnresolvableCycleState(Vec<i64>),

    #[error("entity id {0} is outside the encodable range")]
    IdOutOfRange(i64),

    #[error("index {index} is out of bounds for length {length}")]
    IndexOutOfBounds { index: u64, length: u64 },

    #[error("resource has been closed")]
    ResourceClosed,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("timestamp precedes the Unix epoch")]
    InvalidTimestamp,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<bincode::Error> for GeoLayerError {
    fn from(err: bincode::Error) -> Self {
        GeoLayerError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for GeoLayerError {
    fn from(err: serde_json::Error) -> Self {
        GeoLayerError::Serialization(err.to_string())
    }
}

impl GeoLayerError {
    pub(crate) fn integrity(msg: impl Into<String>) -> Self {
        GeoLayerError::DataIntegrity(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_keys() {
        let err = GeoLayerError::UnsortedInput {
            previous: EntityKey::point(5),
            key: EntityKey::point(3),
        };
        assert_eq!(
            err.to_string(),
            "unsorted input: point/3 does not come after point/5"
        );

        let err = GeoLayerError::UnsortedStream {
            previous: EntityKind::Line,
            found: EntityKind::Point,
        };
        assert_eq!(err.to_string(), "unsorted stream: point entity after line entities");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: GeoLayerError = io.into();
        assert!(matches!(err, GeoLayerError::Io(_)));
    }
}
