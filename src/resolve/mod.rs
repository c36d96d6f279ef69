//! Tile membership resolution.
//!
//! The resolver consumes entities sorted points, then lines, then groups, each
//! kind by ascending id. A point lives in the tile of its coordinates, a line
//! in the tiles of its points, a group in the tiles of all its members. Points
//! and lines are resolved as they arrive; groups are buffered and resolved
//! together by [`stabilize`](stabilize::stabilize) once the stream ends.
//!
//! Members that are neither in the stream nor known to the
//! [`MembershipSource`] are skipped.

pub(crate) mod stabilize;

use crate::config::CyclePolicy;
use crate::error::{GeoLayerError, Result};
use crate::tile::{Tile, TileSet, validate_zoom};
use geolayer_types::entity::{EntityKey, EntityKind, GeoEntity, Payload};
use rustc_hash::{FxHashMap, FxHashSet};
use stabilize::GroupNode;

/// Where the resolver looks up members that are not part of its own stream.
pub trait MembershipSource {
    /// Tiles of `key`, or `None` when the source does not know it.
    fn tiles_of(&self, key: EntityKey) -> Result<Option<TileSet>>;
}

/// Source for self-contained streams.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFallback;

impl MembershipSource for NoFallback {
    fn tiles_of(&self, _key: EntityKey) -> Result<Option<TileSet>> {
        Ok(None)
    }
}

/// An entity with the tiles it will be filed under.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved {
    pub entity: GeoEntity,
    pub tiles: TileSet,
}

/// Counters of one resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub points: u64,
    pub lines: u64,
    pub groups: u64,
    pub missing_members: u64,
    pub cycle_classes: usize,
    pub residual_classes: usize,
    pub rounds: usize,
}

pub struct Resolver<'a> {
    zoom: u8,
    policy: CyclePolicy,
    fallback: &'a dyn MembershipSource,
    points: FxHashMap<i64, u32>,
    lines: FxHashMap<i64, TileSet>,
    groups: Vec<GeoEntity>,
    last: Option<EntityKey>,
    stats: ResolveStats,
}

impl<'a> Resolver<'a> {
    pub fn new(zoom: u8, policy: CyclePolicy, fallback: &'a dyn MembershipSource) -> Result<Self> {
        validate_zoom(zoom)?;
        Ok(Self {
            zoom,
            policy,
            fallback,
            points: FxHashMap::default(),
            lines: FxHashMap::default(),
            groups: Vec::new(),
            last: None,
            stats: ResolveStats::default(),
        })
    }

    fn check_order(&mut self, key: EntityKey) -> Result<()> {
        if let Some(previous) = self.last {
            if key.kind < previous.kind {
                return Err(GeoLayerError::UnsortedStream {
                    previous: previous.kind,
                    found: key.kind,
                });
            }
            if key <= previous {
                return Err(GeoLayerError::UnsortedInput { previous, key });
            }
        }
        self.last = Some(key);
        Ok(())
    }

    /// Feed the next entity. Points and lines come straight back resolved;
    /// groups are held until [`Resolver::finish`].
    pub fn push(&mut self, entity: GeoEntity) -> Result<Option<Resolved>> {
        self.check_order(entity.key())?;

        match &entity.payload {
            Payload::Point(point) => {
                let tile = Tile::containing(point.x(), point.y(), self.zoom).local_id();
                self.points.insert(entity.id, tile);
                self.stats.points += 1;
                Ok(Some(Resolved {
                    entity,
                    tiles: TileSet::single(tile),
                }))
            }
            Payload::Line(point_ids) => {
                let mut tiles = TileSet::new();
                for &id in point_ids {
                    self.fold_member(EntityKey::point(id), &mut tiles)?;
                }
                self.lines.insert(entity.id, tiles.clone());
                self.stats.lines += 1;
                Ok(Some(Resolved { entity, tiles }))
            }
            Payload::Group(_) => {
                self.groups.push(entity);
                Ok(None)
            }
        }
    }

    /// Add the tiles of a point or line member to `tiles`.
    fn fold_member(&mut self, key: EntityKey, tiles: &mut TileSet) -> Result<()> {
        let known = match key.kind {
            EntityKind::Point => self.points.get(&key.id).map(|&t| TileSet::single(t)),
            EntityKind::Line => self.lines.get(&key.id).cloned(),
            EntityKind::Group => None,
        };
        match known {
            Some(found) => tiles.union_with(&found),
            None => match self.fallback.tiles_of(key)? {
                Some(found) => tiles.union_with(&found),
                None => self.stats.missing_members += 1,
            },
        }
        Ok(())
    }

    /// Tiles recorded so far for a point or line of this stream.
    pub fn tiles_of(&self, key: EntityKey) -> Option<TileSet> {
        match key.kind {
            EntityKind::Point => self.points.get(&key.id).map(|&t| TileSet::single(t)),
            EntityKind::Line => self.lines.get(&key.id).cloned(),
            EntityKind::Group => None,
        }
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    /// Resolve the buffered groups, returned in id order.
    pub fn finish(mut self) -> Result<(Vec<Resolved>, ResolveStats)> {
        let groups = std::mem::take(&mut self.groups);
        let in_batch: FxHashSet<i64> = groups.iter().map(|g| g.id).collect();

        let mut nodes = Vec::with_capacity(groups.len());
        for group in &groups {
            let mut direct = TileSet::new();
            let mut children = Vec::new();
            if let Payload::Group(members) = &group.payload {
                for member in members {
                    match member.kind {
                        EntityKind::Group if in_batch.contains(&member.id) => children.push(member.id),
                        EntityKind::Group => match self.fallback.tiles_of(member.key())? {
                            Some(found) => direct.union_with(&found),
                            None => self.stats.missing_members += 1,
                        },
                        _ => self.fold_member(member.key(), &mut direct)?,
                    }
                }
            }
            nodes.push(GroupNode {
                id: group.id,
                direct,
                children,
            });
        }

        let result = stabilize::stabilize(nodes, self.policy)?;
        self.stats.groups = groups.len() as u64;
        self.stats.cycle_classes = result.cycle_classes;
        self.stats.residual_classes = result.residual.len();
        self.stats.rounds = result.rounds;

        let resolved = groups
            .into_iter()
            .zip(result.tiles)
            .map(|(entity, tiles)| Resolved { entity, tiles })
            .collect();
        Ok((resolved, self.stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::tile_of;
    use geolayer_types::entity::Member;

    fn tile(lon: f64, lat: f64) -> u32 {
        tile_of(lon, lat, 14).unwrap().local_id()
    }

    fn resolve_all(entities: Vec<GeoEntity>) -> Result<Vec<Resolved>> {
        let mut resolver = Resolver::new(14, CyclePolicy::Union, &NoFallback)?;
        let mut out = Vec::new();
        for entity in entities {
            if let Some(resolved) = resolver.push(entity)? {
                out.push(resolved);
            }
        }
        let (groups, _) = resolver.finish()?;
        out.extend(groups);
        Ok(out)
    }

    #[test]
    fn test_point_and_line_placement() {
        let out = resolve_all(vec![
            GeoEntity::point(1, 4.0, 50.0),
            GeoEntity::point(2, 4.5, 50.5),
            GeoEntity::line(10, vec![1, 2, 77]),
        ])
        .unwrap();
        assert_eq!(out[0].tiles, TileSet::single(tile(4.0, 50.0)));
        let expected: TileSet = [tile(4.0, 50.0), tile(4.5, 50.5)].into_iter().collect();
        assert_eq!(out[2].tiles, expected);
    }

    #[test]
    fn test_group_collects_all_member_kinds() {
        let out = resolve_all(vec![
            GeoEntity::point(1, 4.0, 50.0),
            GeoEntity::point(2, 10.0, 45.0),
            GeoEntity::line(10, vec![2]),
            GeoEntity::group(
                100,
                vec![
                    Member::new(EntityKind::Point, 1, ""),
                    Member::new(EntityKind::Group, 101, "sub"),
                ],
            ),
            GeoEntity::group(101, vec![Member::new(EntityKind::Line, 10, "")]),
        ])
        .unwrap();
        let group_100 = &out[3];
        assert_eq!(group_100.entity.id, 100);
        let expected: TileSet = [tile(4.0, 50.0), tile(10.0, 45.0)].into_iter().collect();
        assert_eq!(group_100.tiles, expected);
        assert_eq!(out[4].tiles, TileSet::single(tile(10.0, 45.0)));
    }

    #[test]
    fn test_kind_regression_is_unsorted_stream() {
        let err = resolve_all(vec![
            GeoEntity::line(1, vec![]),
            GeoEntity::point(2, 0.0, 0.0),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            GeoLayerError::UnsortedStream {
                previous: EntityKind::Line,
                found: EntityKind::Point
            }
        ));
    }

    #[test]
    fn test_id_regression_is_unsorted_input() {
        let err = resolve_all(vec![
            GeoEntity::point(5, 0.0, 0.0),
            GeoEntity::point(5, 0.0, 0.0),
        ])
        .unwrap_err();
        assert!(matches!(err, GeoLayerError::UnsortedInput { .. }));
    }

    struct Fixed(FxHashMap<EntityKey, TileSet>);

    impl MembershipSource for Fixed {
        fn tiles_of(&self, key: EntityKey) -> Result<Option<TileSet>> {
            Ok(self.0.get(&key).cloned())
        }
    }

    #[test]
    fn test_fallback_supplies_unchanged_members() {
        let mut known = FxHashMap::default();
        known.insert(EntityKey::point(1), TileSet::single(7));
        known.insert(EntityKey::group(50), TileSet::single(9));
        let source = Fixed(known);

        let mut resolver = Resolver::new(14, CyclePolicy::Reject, &source).unwrap();
        let line = resolver
            .push(GeoEntity::line(10, vec![1, 2]))
            .unwrap()
            .unwrap();
        assert_eq!(line.tiles, TileSet::single(7));

        resolver
            .push(GeoEntity::group(60, vec![Member::new(EntityKind::Group, 50, "")]))
            .unwrap();
        let (groups, stats) = resolver.finish().unwrap();
        assert_eq!(groups[0].tiles, TileSet::single(9));
        assert_eq!(stats.missing_members, 1);
    }

    #[test]
    fn test_mutual_groups_terminate() {
        let out = resolve_all(vec![
            GeoEntity::group(1, vec![Member::new(EntityKind::Group, 2, "")]),
            GeoEntity::group(2, vec![Member::new(EntityKind::Group, 1, "")]),
        ])
        .unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.tiles.is_empty()));
    }
}
