use geolayer::storage::codec::{BincodeCodec, EntityCodec};
use geolayer::storage::stream::{StreamOptions, TileStreamReader, TileStreamWriter};
use geolayer::{
    Changeset, Config, DiffBuilder, EntityKey, EntityKind, FullBuilder, GeoEntity, LayerDb, Member,
    Result, SyncMode, TileHit, TileSet, tile_of,
};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};
use tempfile::{TempDir, tempdir};

const ZOOM: u8 = 14;

fn codec() -> Arc<dyn EntityCodec> {
    Arc::new(BincodeCodec)
}

fn tile_id(lon: f64, lat: f64) -> u32 {
    tile_of(lon, lat, ZOOM).unwrap().local_id()
}

fn full(dir: &TempDir, id: i64, entities: Vec<GeoEntity>) -> Arc<LayerDb> {
    let path = dir.path().join(id.to_string());
    FullBuilder::new(Config::default(), codec())
        .build(&path, id, entities)
        .unwrap();
    Arc::new(LayerDb::open(&path, codec(), None).unwrap())
}

fn diff(dir: &TempDir, id: i64, base: &Arc<LayerDb>, changes: &Changeset) -> Arc<LayerDb> {
    let path = dir.path().join(id.to_string());
    DiffBuilder::diff(Config::default(), codec())
        .build(&path, id, base, changes)
        .unwrap();
    Arc::new(LayerDb::open(&path, codec(), Some(base.clone())).unwrap())
}

fn snapshot(dir: &TempDir, id: i64, base: &Arc<LayerDb>, changes: &Changeset) -> Arc<LayerDb> {
    let path = dir.path().join(id.to_string());
    DiffBuilder::snapshot(Config::default(), codec())
        .build(&path, id, base, changes)
        .unwrap();
    Arc::new(LayerDb::open(&path, codec(), Some(base.clone())).unwrap())
}

fn changes(millis: u64) -> Changeset {
    Changeset::new(UNIX_EPOCH + Duration::from_millis(millis))
}

fn query(layer: &LayerDb, tiles: &[u32]) -> Vec<TileHit> {
    let tiles: TileSet = tiles.iter().copied().collect();
    layer
        .query_ids(&tiles)
        .unwrap()
        .collect::<Result<Vec<_>>>()
        .unwrap()
}

fn keys(hits: &[TileHit]) -> Vec<EntityKey> {
    hits.iter().map(|hit| hit.entity.key()).collect()
}

#[test]
fn test_single_point_full_layer() {
    let dir = tempdir().unwrap();
    let point = GeoEntity::point(1, 4.3517, 50.8503).with_tag("amenity", "cafe");
    let layer = full(&dir, 1, vec![point.clone()]);
    let a = tile_id(4.3517, 50.8503);

    assert_eq!(layer.get(EntityKey::point(1)).unwrap(), Some(point.clone()));
    assert_eq!(layer.get_tiles(EntityKey::point(1)).unwrap(), TileSet::single(a));

    let hits = query(&layer, &[a]);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].entity, point);
    assert_eq!(hits[0].tiles, TileSet::single(a));

    assert!(query(&layer, &[a + 1]).is_empty());
    assert!(layer.get(EntityKey::point(2)).unwrap().is_none());

    let tile = tile_of(4.3517, 50.8503, ZOOM).unwrap();
    let parent = tile.parent().unwrap();
    let mask = layer.child_mask(&parent).unwrap();
    assert_eq!(mask.count(), 1);
    assert!(mask.contains(parent.mask_bit_of(&tile).unwrap()));
}

#[test]
fn test_diff_deletes_one_of_two_joined_points() {
    let dir = tempdir().unwrap();
    let a = tile_id(4.0, 50.0);
    let b = tile_id(5.0, 51.0);
    let base = full(
        &dir,
        100,
        vec![
            GeoEntity::point(1, 4.0, 50.0),
            GeoEntity::point(2, 5.0, 51.0),
            GeoEntity::line(10, vec![1, 2]),
        ],
    );

    let mut cs = changes(200);
    cs.delete(EntityKey::point(2));
    let layer = diff(&dir, 200, &base, &cs);

    assert!(layer.get(EntityKey::point(2)).unwrap().is_none());
    assert!(base.get(EntityKey::point(2)).unwrap().is_some());
    assert!(layer.get(EntityKey::point(1)).unwrap().is_some());

    // The unchanged line keeps its base membership.
    let both: TileSet = [a, b].into_iter().collect();
    assert_eq!(layer.get_tiles(EntityKey::line(10)).unwrap(), both);

    assert_eq!(keys(&query(&layer, &[b])), vec![EntityKey::line(10)]);
    assert_eq!(
        keys(&query(&layer, &[a])),
        vec![EntityKey::point(1), EntityKey::line(10)]
    );
}

#[test]
fn test_deleting_a_point_sharing_a_tile_keeps_its_line() {
    let dir = tempdir().unwrap();
    let a = tile_id(4.0, 50.0);
    assert_eq!(tile_id(4.001, 50.001), a);
    let base = full(
        &dir,
        100,
        vec![
            GeoEntity::point(1, 4.0, 50.0),
            GeoEntity::point(2, 4.001, 50.001),
            GeoEntity::line(10, vec![1, 2]),
        ],
    );
    assert_eq!(
        keys(&query(&base, &[a])),
        vec![EntityKey::point(1), EntityKey::point(2), EntityKey::line(10)]
    );

    let mut cs = changes(200);
    cs.delete(EntityKey::point(1));
    let diffed = diff(&dir, 200, &base, &cs);
    let tiled = snapshot(&dir, 300, &base, &cs);

    for layer in [&diffed, &tiled] {
        let hits = query(layer, &[a]);
        assert_eq!(keys(&hits), vec![EntityKey::point(2), EntityKey::line(10)]);
        assert!(hits.iter().all(|hit| hit.tiles == TileSet::single(a)));
        assert!(layer.get(EntityKey::point(1)).unwrap().is_none());
        assert_eq!(layer.get_tiles(EntityKey::line(10)).unwrap(), TileSet::single(a));
    }
    assert!(tiled.is_tile_resolved(a).unwrap());
}

#[test]
fn test_pure_group_cycle_terminates() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("cycle");
    let summary = FullBuilder::new(Config::default(), codec())
        .build(
            &path,
            1,
            vec![
                GeoEntity::group(1, vec![Member::new(EntityKind::Group, 2, "")]),
                GeoEntity::group(2, vec![Member::new(EntityKind::Group, 1, "")]),
            ],
        )
        .unwrap();
    assert_eq!(summary.entities, 2);
    assert_eq!(summary.resolve.residual_classes, 1);

    let layer = LayerDb::open(&path, codec(), None).unwrap();
    assert!(layer.get_tiles(EntityKey::group(1)).unwrap().is_empty());
    assert!(layer.get_tiles(EntityKey::group(2)).unwrap().is_empty());
    assert!(layer.get(EntityKey::group(2)).unwrap().is_some());
}

#[test]
fn test_three_appends_to_one_tile_come_back_ascending() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("data.bin");
    let a = tile_id(4.0, 50.0);
    let mut writer = TileStreamWriter::create(
        &path,
        codec(),
        StreamOptions {
            zoom: ZOOM,
            buffer_capacity: 64,
            pending_capacity: 2,
            block_bits: 4,
            sync: SyncMode::Data,
        },
    )
    .unwrap();
    for id in [3, 7, 9] {
        writer
            .append(&TileSet::single(a), &GeoEntity::point(id, 4.0, 50.0))
            .unwrap();
    }
    let (index, _) = writer.finish().unwrap();

    let reader = TileStreamReader::open(&path, ZOOM, codec()).unwrap();
    let head = index.head(a).unwrap();
    let ids: Vec<i64> = reader
        .iter_tile(a, head)
        .map(|entity| entity.map(|e| e.id))
        .collect::<Result<_>>()
        .unwrap();
    assert_eq!(ids, vec![3, 7, 9]);
}

fn sample() -> Vec<GeoEntity> {
    vec![
        GeoEntity::point(1, 4.0, 50.0),
        GeoEntity::point(2, 4.0, 50.0).with_tag("name", "second"),
        GeoEntity::point(3, 5.0, 51.0),
        GeoEntity::point(4, -70.0, -30.0),
        GeoEntity::line(10, vec![1, 3]),
        GeoEntity::line(11, vec![2, 4]),
        GeoEntity::group(20, vec![
            Member::new(EntityKind::Line, 10, "outer"),
            Member::new(EntityKind::Point, 4, "label"),
        ]),
    ]
}

fn assert_strictly_ascending(hits: &[TileHit]) {
    let keys = keys(hits);
    assert!(keys.windows(2).all(|w| w[0] < w[1]), "not ascending: {keys:?}");
}

#[test]
fn test_query_results_are_key_ordered_across_layers() {
    let dir = tempdir().unwrap();
    let tiles = [tile_id(4.0, 50.0), tile_id(5.0, 51.0), tile_id(-70.0, -30.0)];
    let base = full(&dir, 100, sample());

    let mut cs = changes(200);
    cs.create(GeoEntity::point(5, 5.0, 51.0))
        .modify(GeoEntity::line(11, vec![2, 5]).with_version(2))
        .delete(EntityKey::point(1));
    let layer = diff(&dir, 200, &base, &cs);

    let hits = query(&base, &tiles);
    assert_strictly_ascending(&hits);
    assert_eq!(hits.len(), 7);

    let hits = query(&layer, &tiles);
    assert_strictly_ascending(&hits);
    assert_eq!(
        keys(&hits),
        vec![
            EntityKey::point(2),
            EntityKey::point(3),
            EntityKey::point(4),
            EntityKey::point(5),
            EntityKey::line(10),
            EntityKey::line(11),
            EntityKey::group(20),
        ]
    );
}

#[test]
fn test_entities_round_trip_through_every_layer_kind() {
    let dir = tempdir().unwrap();
    let base = full(&dir, 100, sample());
    for entity in sample() {
        assert_eq!(base.get(entity.key()).unwrap(), Some(entity));
    }

    let created = GeoEntity::point(5, 5.0, 51.0)
        .with_version(3)
        .with_timestamp(1_700_000_000)
        .with_tag("shop", "bakery");
    let mut cs = changes(200);
    cs.create(created.clone());
    let layer = snapshot(&dir, 200, &base, &cs);
    assert_eq!(layer.get(created.key()).unwrap(), Some(created));
    for entity in sample() {
        assert_eq!(layer.get(entity.key()).unwrap(), Some(entity));
    }
}

#[test]
fn test_newer_layers_shadow_older_ones() {
    let dir = tempdir().unwrap();
    let base = full(&dir, 100, sample());

    let moved = GeoEntity::point(3, -70.0, -30.0).with_version(2);
    let mut cs = changes(200);
    cs.modify(moved.clone());
    let middle = diff(&dir, 200, &base, &cs);

    let renamed = GeoEntity::point(3, -70.0, -30.0).with_version(3).with_tag("name", "x");
    let mut cs = changes(300);
    cs.modify(renamed.clone());
    let top = diff(&dir, 300, &middle, &cs);

    assert_eq!(top.get(EntityKey::point(3)).unwrap(), Some(renamed));
    assert_eq!(middle.get(EntityKey::point(3)).unwrap(), Some(moved));
    assert_eq!(
        top.get_tiles(EntityKey::point(3)).unwrap(),
        TileSet::single(tile_id(-70.0, -30.0))
    );

    // The old tile no longer reports the moved point.
    let old = query(&top, &[tile_id(5.0, 51.0)]);
    assert!(!keys(&old).contains(&EntityKey::point(3)));
    let new = query(&top, &[tile_id(-70.0, -30.0)]);
    let hit = new.iter().find(|h| h.entity.key() == EntityKey::point(3)).unwrap();
    assert_eq!(hit.entity.version, 3);
}

#[test]
fn test_every_entity_is_found_in_each_of_its_tiles() {
    let dir = tempdir().unwrap();
    let base = full(&dir, 100, sample());
    let mut cs = changes(200);
    cs.modify(GeoEntity::line(10, vec![1, 4]).with_version(2));
    let layer = snapshot(&dir, 200, &base, &cs);

    for db in [&base, &layer] {
        for entity in sample() {
            let tiles = db.get_tiles(entity.key()).unwrap();
            assert!(!tiles.is_empty(), "{} has no tiles", entity.key());
            for tile in &tiles {
                let found = query(db, &[tile]);
                assert!(
                    keys(&found).contains(&entity.key()),
                    "{} missing from tile {tile}",
                    entity.key()
                );
            }
        }
    }

    let expected: TileSet = [tile_id(4.0, 50.0), tile_id(-70.0, -30.0)].into_iter().collect();
    assert_eq!(layer.get_tiles(EntityKey::line(10)).unwrap(), expected);
}

#[test]
fn test_empty_changeset_reads_like_its_base() {
    let dir = tempdir().unwrap();
    let tiles = [tile_id(4.0, 50.0), tile_id(5.0, 51.0), tile_id(-70.0, -30.0)];
    let base = full(&dir, 100, sample());
    let layer = diff(&dir, 200, &base, &changes(200));
    let snap = snapshot(&dir, 300, &layer, &changes(300));

    let expected = query(&base, &tiles);
    assert_eq!(query(&layer, &tiles), expected);
    assert_eq!(query(&snap, &tiles), expected);
    for tile in tiles {
        assert_eq!(query(&layer, &[tile]), query(&base, &[tile]));
    }
}

#[test]
fn test_layers_reopen_from_disk() {
    let dir = tempdir().unwrap();
    let base = full(&dir, 100, sample());
    let mut cs = changes(200);
    cs.delete(EntityKey::group(20));
    diff(&dir, 200, &base, &cs);

    let reopened_base = Arc::new(LayerDb::open(&dir.path().join("100"), codec(), None).unwrap());
    let reopened = LayerDb::open(&dir.path().join("200"), codec(), Some(reopened_base)).unwrap();
    assert!(reopened.get(EntityKey::group(20)).unwrap().is_none());
    assert_eq!(reopened.base_id(), Some(100));
    assert!(dir.path().join("200").join("layer.json").exists());
}
