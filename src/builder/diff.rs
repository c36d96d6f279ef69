use super::BuildSummary;
use super::writer::LayerWriter;
use crate::config::{Config, LayerOptions};
use crate::db::{LayerDb, TileHit, TileHits};
use crate::error::{GeoLayerError, Result};
use crate::resolve::{MembershipSource, Resolved, Resolver};
use crate::storage::codec::EntityCodec;
use crate::storage::layout::LayerKind;
use crate::tile::TileSet;
use geolayer_types::changeset::{Changeset, Effect};
use geolayer_types::entity::EntityKey;
use rustc_hash::FxHashSet;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffMode {
    /// Write changed entities and deletion markers only.
    Diff,
    /// Additionally rewrite every touched tile in full.
    Snapshot,
}

/// Base membership with the keys deleted by the changeset hidden.
struct BaseMembership<'a> {
    base: &'a LayerDb,
    deleted: &'a FxHashSet<EntityKey>,
}

impl MembershipSource for BaseMembership<'_> {
    fn tiles_of(&self, key: EntityKey) -> Result<Option<TileSet>> {
        if self.deleted.contains(&key) {
            return Ok(None);
        }
        self.base.lookup_tiles(key)
    }
}

/// Builds a diff or snapshot layer from a base layer and a changeset.
pub struct DiffBuilder {
    config: Config,
    codec: Arc<dyn EntityCodec>,
    options: LayerOptions,
    mode: DiffMode,
}

impl DiffBuilder {
    pub fn new(config: Config, codec: Arc<dyn EntityCodec>, mode: DiffMode) -> Self {
        Self {
            config,
            codec,
            options: LayerOptions::default(),
            mode,
        }
    }

    pub fn diff(config: Config, codec: Arc<dyn EntityCodec>) -> Self {
        Self::new(config, codec, DiffMode::Diff)
    }

    pub fn snapshot(config: Config, codec: Arc<dyn EntityCodec>) -> Self {
        Self::new(config, codec, DiffMode::Snapshot)
    }

    pub fn options(mut self, options: LayerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn mode(&self) -> DiffMode {
        self.mode
    }

    /// Write layer `id` into `dir` as `changeset` applied on top of `base`.
    pub fn build(&self, dir: &Path, id: i64, base: &LayerDb, changeset: &Changeset) -> Result<BuildSummary> {
        if id <= base.id() {
            return Err(GeoLayerError::TimestampDidNotAdvance {
                id,
                base_id: base.id(),
            });
        }
        let kind = match self.mode {
            DiffMode::Diff => LayerKind::Diff,
            DiffMode::Snapshot => LayerKind::Snapshot,
        };
        log::info!(
            "building {kind:?} layer {id} over {} from {} changes",
            base.id(),
            changeset.len()
        );

        let effects = changeset.effects();
        let deleted: FxHashSet<EntityKey> = effects
            .iter()
            .filter(|(_, effect)| matches!(effect, Effect::Delete))
            .map(|(key, _)| *key)
            .collect();

        let fallback = BaseMembership {
            base,
            deleted: &deleted,
        };
        let (upserts, resolve) = resolve_upserts(&effects, base.zoom(), &self.config, &fallback)?;

        let mut complete = TileSet::new();
        if self.mode == DiffMode::Snapshot {
            for resolved in &upserts {
                complete.union_with(&resolved.tiles);
            }
            for key in effects.keys() {
                if let Some(old) = base.lookup_tiles(*key)? {
                    complete.union_with(&old);
                }
            }
        }

        let carried: TileHits = if complete.is_empty() {
            Box::new(std::iter::empty())
        } else {
            let changed: FxHashSet<EntityKey> = effects.keys().copied().collect();
            Box::new(
                base.query_ids(&complete)?
                    .filter(move |hit| !matches!(hit, Ok(hit) if changed.contains(&hit.entity.key()))),
            )
        };

        let mut writer = LayerWriter::create(dir, base.zoom(), &self.config, self.codec.clone())?;
        let mut deletes: Vec<EntityKey> = deleted.into_iter().collect();
        deletes.sort_unstable();
        write_merged(&mut writer, upserts, deletes, carried)?;

        let summary = writer.finish(id, kind, Some(base.id()), &self.options, &complete, resolve)?;
        log::info!(
            "{kind:?} layer {id}: {} entities, {} carried, {} deletions",
            summary.entities,
            summary.carried,
            summary.deletions
        );
        Ok(summary)
    }
}

fn resolve_upserts(
    effects: &BTreeMap<EntityKey, Effect>,
    zoom: u8,
    config: &Config,
    fallback: &dyn MembershipSource,
) -> Result<(Vec<Resolved>, crate::resolve::ResolveStats)> {
    let mut resolver = Resolver::new(zoom, config.cycle_policy, fallback)?;
    let mut upserts = Vec::new();
    for effect in effects.values() {
        if let Effect::Upsert(entity) = effect
            && let Some(resolved) = resolver.push(entity.clone())?
        {
            upserts.push(resolved);
        }
    }
    let (groups, stats) = resolver.finish()?;
    upserts.extend(groups);
    Ok((upserts, stats))
}

enum Step {
    Upsert(Resolved),
    Delete(EntityKey),
    Carry(TileHit),
}

impl Step {
    fn key(&self) -> EntityKey {
        match self {
            Step::Upsert(resolved) => resolved.entity.key(),
            Step::Delete(key) => *key,
            Step::Carry(hit) => hit.entity.key(),
        }
    }
}

/// Write the three key-ordered sources interleaved by key.
fn write_merged(
    writer: &mut LayerWriter,
    upserts: Vec<Resolved>,
    deletes: Vec<EntityKey>,
    mut carried: TileHits,
) -> Result<()> {
    let mut upserts = upserts.into_iter().map(Step::Upsert).peekable();
    let mut deletes = deletes.into_iter().map(Step::Delete).peekable();
    let mut next_carry = carried.next().transpose()?.map(Step::Carry);

    loop {
        let candidates = [
            upserts.peek().map(Step::key),
            deletes.peek().map(Step::key),
            next_carry.as_ref().map(Step::key),
        ];
        let Some((source, _)) = candidates
            .iter()
            .enumerate()
            .filter_map(|(i, key)| key.map(|k| (i, k)))
            .min_by_key(|&(_, key)| key)
        else {
            return Ok(());
        };

        let step = match source {
            0 => upserts.next(),
            1 => deletes.next(),
            _ => {
                let step = next_carry.take();
                next_carry = carried.next().transpose()?.map(Step::Carry);
                step
            }
        };
        match step {
            Some(Step::Upsert(resolved)) => {
                writer.put(&resolved.tiles, &resolved.entity)?;
            }
            Some(Step::Delete(key)) => writer.delete(key)?,
            Some(Step::Carry(hit)) => {
                writer.carry(&hit.tiles, &hit.entity)?;
            }
            None => return Ok(()),
        }
    }
}
