use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The three entity kinds of the OSM data model.
///
/// The declaration order is the canonical storage order: every sorted stream
/// and every layer lists all points before all lines before all groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    /// A single located position (an OSM node).
    Point,
    /// An ordered sequence of points (an OSM way).
    Line,
    /// A named grouping of other entities (an OSM relation).
    Group,
}

impl EntityKind {
    /// All kinds in storage order.
    pub const ALL: [EntityKind; 3] = [EntityKind::Point, EntityKind::Line, EntityKind::Group];

    /// Dense ordinal used when packing keys into a single integer space.
    pub fn ordinal(self) -> u8 {
        match self {
            EntityKind::Point => 0,
            EntityKind::Line => 1,
            EntityKind::Group => 2,
        }
    }

    /// Inverse of [`EntityKind::ordinal`].
    pub fn from_ordinal(ordinal: u8) -> Option<Self> {
        match ordinal {
            0 => Some(EntityKind::Point),
            1 => Some(EntityKind::Line),
            2 => Some(EntityKind::Group),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Point => f.write_str("point"),
            EntityKind::Line => f.write_str("line"),
            EntityKind::Group => f.write_str("group"),
        }
    }
}

/// Identity of an entity: its kind plus its id.
///
/// Keys order by kind first, then id, which is exactly the order entities are
/// written into a layer.
///
/// # Examples
///
/// ```
/// use geolayer_types::entity::{EntityKey, EntityKind};
///
/// let node = EntityKey::point(7);
/// let way = EntityKey::line(1);
/// assert!(node < way);
/// assert_eq!(way.to_string(), "line/1");
/// assert_eq!(node.kind, EntityKind::Point);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    pub fn point(id: i64) -> Self {
        Self::new(EntityKind::Point, id)
    }

    pub fn line(id: i64) -> Self {
        Self::new(EntityKind::Line, id)
    }

    pub fn group(id: i64) -> Self {
        Self::new(EntityKind::Group, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// One member of a group: what it references and under which role.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub kind: EntityKind,
    pub id: i64,
    pub role: String,
}

impl Member {
    pub fn new(kind: EntityKind, id: i64, role: impl Into<String>) -> Self {
        Self {
            kind,
            id,
            role: role.into(),
        }
    }

    /// The key of the referenced entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind, self.id)
    }
}

/// Kind-specific content of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Position with `x` = longitude and `y` = latitude, in degrees.
    Point(Point<f64>),
    /// Ids of the points making up the line, in order.
    Line(Vec<i64>),
    /// Referenced entities, in order.
    Group(Vec<Member>),
}

/// Free-form key/value tags, kept in insertion order.
pub type Tags = Vec<(String, String)>;

/// A geographic entity as stored in a layer.
///
/// # Examples
///
/// ```
/// use geolayer_types::entity::{EntityKind, GeoEntity, Member};
///
/// let node = GeoEntity::point(1, 4.35, 50.85).with_tag("name", "Brussels");
/// assert_eq!(node.kind(), EntityKind::Point);
/// assert_eq!(node.coordinates(), Some((4.35, 50.85)));
///
/// let route = GeoEntity::group(9, vec![Member::new(EntityKind::Point, 1, "stop")]);
/// assert_eq!(route.key().to_string(), "group/9");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoEntity {
    pub id: i64,
    pub version: u32,
    /// Milliseconds since the Unix epoch of the last edit.
    pub timestamp: i64,
    pub tags: Tags,
    pub payload: Payload,
}

impl GeoEntity {
    fn with_payload(id: i64, payload: Payload) -> Self {
        Self {
            id,
            version: 1,
            timestamp: 0,
            tags: Tags::new(),
            payload,
        }
    }

    /// Create a point entity at `(lon, lat)`.
    pub fn point(id: i64, lon: f64, lat: f64) -> Self {
        Self::with_payload(id, Payload::Point(Point::new(lon, lat)))
    }

    /// Create a line entity over the given point ids.
    pub fn line(id: i64, points: Vec<i64>) -> Self {
        Self::with_payload(id, Payload::Line(points))
    }

    /// Create a group entity with the given members.
    pub fn group(id: i64, members: Vec<Member>) -> Self {
        Self::with_payload(id, Payload::Group(members))
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn kind(&self) -> EntityKind {
        match self.payload {
            Payload::Point(_) => EntityKind::Point,
            Payload::Line(_) => EntityKind::Line,
            Payload::Group(_) => EntityKind::Group,
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind(), self.id)
    }

    /// `(lon, lat)` of a point entity, `None` for other kinds.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match &self.payload {
            Payload::Point(p) => Some((p.x(), p.y())),
            _ => None,
        }
    }

    /// Look up a tag value by key.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_follows_kind_then_id() {
        let mut keys = vec![
            EntityKey::group(1),
            EntityKey::point(5),
            EntityKey::line(-3),
            EntityKey::point(-10),
            EntityKey::line(2),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                EntityKey::point(-10),
                EntityKey::point(5),
                EntityKey::line(-3),
                EntityKey::line(2),
                EntityKey::group(1),
            ]
        );
    }

    #[test]
    fn test_ordinal_roundtrip() {
        for kind in EntityKind::ALL {
            assert_eq!(EntityKind::from_ordinal(kind.ordinal()), Some(kind));
        }
        assert_eq!(EntityKind::from_ordinal(3), None);
    }

    #[test]
    fn test_entity_accessors() {
        let line = GeoEntity::line(10, vec![1, 2])
            .with_version(3)
            .with_timestamp(1_700_000_000_000)
            .with_tag("highway", "residential");

        assert_eq!(line.kind(), EntityKind::Line);
        assert_eq!(line.key(), EntityKey::line(10));
        assert_eq!(line.tag("highway"), Some("residential"));
        assert_eq!(line.tag("name"), None);
        assert!(line.coordinates().is_none());
        assert_eq!(line.version, 3);
    }

    #[test]
    fn test_entity_serde_json() {
        let group = GeoEntity::group(
            4,
            vec![
                Member::new(EntityKind::Line, 10, "outer"),
                Member::new(EntityKind::Group, 5, ""),
            ],
        );
        let json = serde_json::to_string(&group).unwrap();
        let back: GeoEntity = serde_json::from_str(&json).unwrap();
        assert_eq!(back, group);
    }
}
