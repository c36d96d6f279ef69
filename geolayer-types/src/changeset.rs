use crate::entity::{EntityKey, GeoEntity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;

/// A single edit carried by a changeset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Create(GeoEntity),
    Modify(GeoEntity),
    Delete(EntityKey),
}

impl Change {
    pub fn key(&self) -> EntityKey {
        match self {
            Change::Create(entity) | Change::Modify(entity) => entity.key(),
            Change::Delete(key) => *key,
        }
    }
}

/// The resolved effect of a changeset on one key.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// The key now holds this entity.
    Upsert(GeoEntity),
    /// The key no longer exists.
    Delete,
}

/// A timestamped batch of edits.
///
/// Changesets are applied on top of an existing layer. The timestamp becomes
/// the id of the layer built from it.
///
/// # Examples
///
/// ```
/// use geolayer_types::changeset::{Changeset, Effect};
/// use geolayer_types::entity::{EntityKey, GeoEntity};
/// use std::time::SystemTime;
///
/// let mut changes = Changeset::new(SystemTime::now());
/// changes.create(GeoEntity::point(1, 4.0, 50.0));
/// changes.delete(EntityKey::point(1));
///
/// // The last edit to a key wins.
/// let effects = changes.effects();
/// assert_eq!(effects[&EntityKey::point(1)], Effect::Delete);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Changeset {
    pub timestamp: SystemTime,
    pub changes: Vec<Change>,
}

impl Changeset {
    pub fn new(timestamp: SystemTime) -> Self {
        Self {
            timestamp,
            changes: Vec::new(),
        }
    }

    pub fn create(&mut self, entity: GeoEntity) -> &mut Self {
        self.changes.push(Change::Create(entity));
        self
    }

    pub fn modify(&mut self, entity: GeoEntity) -> &mut Self {
        self.changes.push(Change::Modify(entity));
        self
    }

    pub fn delete(&mut self, key: EntityKey) -> &mut Self {
        self.changes.push(Change::Delete(key));
        self
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Collapse the edits into one effect per key, in key order.
    ///
    /// Creates and modifies are equivalent here; when a key is edited more
    /// than once the last edit wins.
    pub fn effects(&self) -> BTreeMap<EntityKey, Effect> {
        let mut effects = BTreeMap::new();
        for change in &self.changes {
            let effect = match change {
                Change::Create(entity) | Change::Modify(entity) => Effect::Upsert(entity.clone()),
                Change::Delete(_) => Effect::Delete,
            };
            effects.insert(change.key(), effect);
        }
        effects
    }
}
