//! # geolayer-types
//!
//! Core data types for the geolayer storage engine.
//!
//! This crate provides the entity model shared by writers and readers:
//!
//! - **Entities**: `GeoEntity` with its `Payload` (point, line or group)
//! - **Identity**: `EntityKind` and `EntityKey`
//! - **Edits**: `Change` and `Changeset`
//! - **Durability settings**: `SyncMode`
//!
//! All types are serializable with Serde and built on top of the `geo` crate's
//! geometric primitives.
//!
//! ## Examples
//!
//! ```rust
//! use geolayer_types::entity::{EntityKind, GeoEntity, Member};
//!
//! let a = GeoEntity::point(1, 4.3517, 50.8503);
//! let b = GeoEntity::point(2, 4.3520, 50.8510);
//! let street = GeoEntity::line(10, vec![a.id, b.id]).with_tag("highway", "primary");
//! let route = GeoEntity::group(100, vec![Member::new(EntityKind::Line, street.id, "")]);
//! assert!(a.key() < street.key() && street.key() < route.key());
//! ```

pub mod changeset;
pub mod config;
pub mod entity;

pub use changeset::{Change, Changeset, Effect};
pub use config::SyncMode;
pub use entity::{EntityKey, EntityKind, GeoEntity, Member, Payload, Tags};
