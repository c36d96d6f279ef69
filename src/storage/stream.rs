//! The linked tile stream: a layer's data file.
//!
//! Records are appended in strictly increasing key order. Each record carries
//! one `next` slot per tile it is filed under, and the slot of the previous
//! record of the same tile is patched to point at the new record, so every
//! tile forms a forward-linked chain through the file sorted by key.
//!
//! Record layout, little endian:
//!
//! ```text
//! u32          tile tag: u32::MAX implicit, 0 untiled, n explicit count
//! n x u32      tile local ids (explicit only, ascending)
//! m x u64      next slots, m = n (or 1 when implicit), u64::MAX = end of chain
//! u32          body length
//! [u8]         codec body
//! ```
//!
//! An implicit record is a point filed under exactly the tile its own
//! coordinates fall in; the tile is recomputed from the body on read.

use super::codec::EntityCodec;
use super::layout::sync_file;
use super::wire::{slice_u32, slice_u64};
use crate::config::SyncMode;
use crate::error::{GeoLayerError, Result};
use crate::index::TileIndex;
use crate::tile::{Tile, TileSet, tile_count};
use bytes::Bytes;
use geolayer_types::entity::{EntityKey, GeoEntity};
use rustc_hash::FxHashMap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

const DATA_MAGIC: &[u8] = b"GLDATA01";
const IMPLICIT_TILE: u32 = u32::MAX;
const NO_NEXT: u64 = u64::MAX;

/// Counters collected while writing a stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub records: u64,
    pub implicit_records: u64,
    pub untiled_records: u64,
    pub in_buffer_patches: u64,
    pub deferred_patches: u64,
    pub patch_flushes: u64,
    pub bytes_written: u64,
}

pub struct TileStreamWriter {
    file: File,
    zoom: u8,
    codec: Arc<dyn EntityCodec>,
    buffer: Vec<u8>,
    buffer_start: u64,
    buffer_capacity: usize,
    tails: FxHashMap<u32, u64>,
    heads: TileIndex,
    pending: Vec<(u64, u64)>,
    pending_capacity: usize,
    last_key: Option<EntityKey>,
    body: Vec<u8>,
    stats: StreamStats,
    sync: SyncMode,
}

/// Sizing of a [`TileStreamWriter`].
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub zoom: u8,
    pub buffer_capacity: usize,
    pub pending_capacity: usize,
    pub block_bits: u32,
    pub sync: SyncMode,
}

impl TileStreamWriter {
    pub fn create(path: &Path, codec: Arc<dyn EntityCodec>, options: StreamOptions) -> Result<Self> {
        let heads = TileIndex::new(options.zoom, options.block_bits)?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let mut buffer = Vec::with_capacity(options.buffer_capacity.max(DATA_MAGIC.len()));
        buffer.extend_from_slice(DATA_MAGIC);

        Ok(Self {
            file,
            zoom: options.zoom,
            codec,
            buffer,
            buffer_start: 0,
            buffer_capacity: options.buffer_capacity.max(1),
            tails: FxHashMap::default(),
            heads,
            pending: Vec::with_capacity(options.pending_capacity.min(1 << 16)),
            pending_capacity: options.pending_capacity.max(1),
            last_key: None,
            body: Vec::new(),
            stats: StreamStats::default(),
            sync: options.sync,
        })
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    /// File offset the next record will be written at.
    pub fn position(&self) -> u64 {
        self.buffer_start + self.buffer.len() as u64
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Append `entity` under `tiles` and return the record's offset.
    ///
    /// This is the only code path that writes into the middle of the file:
    /// the `next` slot of each tile's previous tail is patched here.
    pub fn append(&mut self, tiles: &TileSet, entity: &GeoEntity) -> Result<u64> {
        let key = entity.key();
        if let Some(previous) = self.last_key
            && key <= previous
        {
            return Err(GeoLayerError::UnsortedInput { previous, key });
        }
        if let Some(&max) = tiles.as_slice().last()
            && max as u64 >= tile_count(self.zoom)
        {
            return Err(GeoLayerError::IndexOutOfBounds {
                index: max as u64,
                length: tile_count(self.zoom),
            });
        }

        self.body.clear();
        self.codec.encode(entity, &mut self.body)?;
        let body_len = u32::try_from(self.body.len())
            .map_err(|_| GeoLayerError::Serialization(format!("{key}: body too large")))?;

        let implicit = tiles.len() == 1
            && entity
                .coordinates()
                .is_some_and(|(lon, lat)| Tile::containing(lon, lat, self.zoom).local_id() == tiles.as_slice()[0]);

        let offset = self.position();
        let listed = if implicit { 0 } else { tiles.len() as u64 };

        if implicit {
            self.buffer.extend_from_slice(&IMPLICIT_TILE.to_le_bytes());
            self.stats.implicit_records += 1;
        } else {
            self.buffer.extend_from_slice(&(tiles.len() as u32).to_le_bytes());
            for id in tiles {
                self.buffer.extend_from_slice(&id.to_le_bytes());
            }
            if tiles.is_empty() {
                self.stats.untiled_records += 1;
            }
        }
        for _ in 0..tiles.len() {
            self.buffer.extend_from_slice(&NO_NEXT.to_le_bytes());
        }

        for (i, id) in tiles.iter().enumerate() {
            let slot = offset + 4 + 4 * listed + 8 * i as u64;
            match self.tails.insert(id, slot) {
                Some(previous_slot) => self.patch(previous_slot, offset)?,
                None => self.heads.set_head(id, offset)?,
            }
        }

        self.buffer.extend_from_slice(&body_len.to_le_bytes());
        self.buffer.extend_from_slice(&self.body);

        self.last_key = Some(key);
        self.stats.records += 1;

        if self.buffer.len() >= self.buffer_capacity {
            self.flush_buffer()?;
        }
        Ok(offset)
    }

    fn patch(&mut self, slot: u64, value: u64) -> Result<()> {
        if slot >= self.buffer_start {
            let at = (slot - self.buffer_start) as usize;
            self.buffer[at..at + 8].copy_from_slice(&value.to_le_bytes());
            self.stats.in_buffer_patches += 1;
            return Ok(());
        }

        self.pending.push((slot, value));
        self.stats.deferred_patches += 1;
        if self.pending.len() >= self.pending_capacity {
            self.flush_pending()?;
        }
        Ok(())
    }

    fn flush_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(self.buffer_start))?;
        self.file.write_all(&self.buffer)?;
        self.buffer_start += self.buffer.len() as u64;
        self.stats.bytes_written += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// Apply deferred patches in file order.
    fn flush_pending(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        self.pending.sort_unstable_by_key(|&(slot, _)| slot);
        for &(slot, value) in &self.pending {
            self.file.seek(SeekFrom::Start(slot))?;
            self.file.write_all(&value.to_le_bytes())?;
        }
        log::debug!("applied {} deferred tile stream patches", self.pending.len());
        self.stats.patch_flushes += 1;
        self.pending.clear();
        Ok(())
    }

    /// Flush everything, sync the file and hand back the tile heads.
    pub fn finish(mut self) -> Result<(TileIndex, StreamStats)> {
        self.flush_buffer()?;
        self.flush_pending()?;
        self.file.flush()?;
        sync_file(&self.file, self.sync)?;
        Ok((self.heads, self.stats))
    }
}

/// Parsed record header.
#[derive(Debug, Clone)]
struct Header {
    implicit: bool,
    ids: Range<usize>,
    slots: Range<usize>,
    body: Range<usize>,
}

impl Header {
    fn tile_count(&self) -> usize {
        self.slots.len() / 8
    }
}

/// Read side of a data file, held in memory.
#[derive(Clone)]
pub struct TileStreamReader {
    data: Bytes,
    zoom: u8,
    codec: Arc<dyn EntityCodec>,
}

impl TileStreamReader {
    pub fn from_bytes(data: Bytes, zoom: u8, codec: Arc<dyn EntityCodec>) -> Result<Self> {
        if data.len() < DATA_MAGIC.len() || &data[..DATA_MAGIC.len()] != DATA_MAGIC {
            return Err(GeoLayerError::integrity("data file: bad magic"));
        }
        Ok(Self { data, zoom, codec })
    }

    pub fn open(path: &Path, zoom: u8, codec: Arc<dyn EntityCodec>) -> Result<Self> {
        Self::from_bytes(Bytes::from(std::fs::read(path)?), zoom, codec)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.len() <= DATA_MAGIC.len()
    }

    fn header(&self, pointer: u64) -> Result<Header> {
        let corrupt = || GeoLayerError::integrity(format!("data file: bad record at {pointer}"));

        let start = usize::try_from(pointer).map_err(|_| corrupt())?;
        if start < DATA_MAGIC.len() {
            return Err(corrupt());
        }
        let tag = slice_u32(&self.data, start).ok_or_else(corrupt)?;
        let (implicit, listed, slot_count) = if tag == IMPLICIT_TILE {
            (true, 0usize, 1usize)
        } else {
            (false, tag as usize, tag as usize)
        };

        let ids_start = start + 4;
        let slots_start = listed
            .checked_mul(4)
            .and_then(|n| ids_start.checked_add(n))
            .ok_or_else(corrupt)?;
        let len_at = slot_count
            .checked_mul(8)
            .and_then(|n| slots_start.checked_add(n))
            .ok_or_else(corrupt)?;
        let body_len = slice_u32(&self.data, len_at).ok_or_else(corrupt)? as usize;
        let body_start = len_at + 4;
        let body_end = body_start.checked_add(body_len).ok_or_else(corrupt)?;
        if body_end > self.data.len() {
            return Err(corrupt());
        }

        Ok(Header {
            implicit,
            ids: ids_start..slots_start,
            slots: slots_start..len_at,
            body: body_start..body_end,
        })
    }

    fn decode(&self, header: &Header) -> Result<GeoEntity> {
        self.codec.decode(&self.data[header.body.clone()])
    }

    fn tiles_of(&self, header: &Header, entity: Option<&GeoEntity>) -> Result<TileSet> {
        if header.implicit {
            let decoded;
            let entity = match entity {
                Some(entity) => entity,
                None => {
                    decoded = self.decode(header)?;
                    &decoded
                }
            };
            let (lon, lat) = entity.coordinates().ok_or_else(|| {
                GeoLayerError::integrity(format!("data file: implicit tile on {}", entity.key()))
            })?;
            return Ok(TileSet::single(Tile::containing(lon, lat, self.zoom).local_id()));
        }
        self.data[header.ids.clone()]
            .chunks_exact(4)
            .map(|chunk| {
                slice_u32(chunk, 0).ok_or_else(|| GeoLayerError::integrity("data file: tile list"))
            })
            .collect()
    }

    /// Next record of `tile`'s chain after the record described by `header`.
    fn next_of(&self, pointer: u64, header: &Header, tile: u32) -> Result<Option<u64>> {
        let slot = if header.implicit {
            0
        } else {
            slot_of(&self.data[header.ids.clone()], tile).ok_or_else(|| {
                GeoLayerError::integrity(format!("data file: record {pointer} not filed under tile {tile}"))
            })?
        };
        if slot >= header.tile_count() {
            return Err(GeoLayerError::integrity(format!(
                "data file: record {pointer} has no slot {slot}"
            )));
        }
        let next = slice_u64(&self.data, header.slots.start + 8 * slot)
            .ok_or_else(|| GeoLayerError::integrity("data file: slot truncated"))?;
        if next == NO_NEXT {
            return Ok(None);
        }
        if next <= pointer {
            return Err(GeoLayerError::integrity(format!(
                "data file: chain of tile {tile} goes backwards at {pointer}"
            )));
        }
        Ok(Some(next))
    }

    pub fn get(&self, pointer: u64) -> Result<GeoEntity> {
        let header = self.header(pointer)?;
        self.decode(&header)
    }

    /// Tiles the record at `pointer` is filed under.
    pub fn get_tiles_for(&self, pointer: u64) -> Result<TileSet> {
        let header = self.header(pointer)?;
        self.tiles_of(&header, None)
    }

    /// Walk one tile's chain from its head.
    pub fn iter_tile(&self, tile: u32, head: u64) -> TileChain {
        TileChain {
            reader: self.clone(),
            tile,
            next: Some(head),
        }
    }

    /// Merge the chains of several tiles into one key-ordered sequence.
    ///
    /// `heads` holds `(tile, head)` for every tile of interest. Each record is
    /// yielded once, with the requested tiles it is filed under.
    pub fn iter_tiles(&self, heads: impl IntoIterator<Item = (u32, u64)>) -> MultiTileChain {
        let heap = heads
            .into_iter()
            .map(|(tile, head)| Reverse((head, tile)))
            .collect();
        MultiTileChain {
            reader: self.clone(),
            heap,
            failed: false,
        }
    }
}

/// Lazy walk over one tile's chain.
pub struct TileChain {
    reader: TileStreamReader,
    tile: u32,
    next: Option<u64>,
}

impl Iterator for TileChain {
    type Item = Result<GeoEntity>;

    fn next(&mut self) -> Option<Self::Item> {
        let pointer = self.next.take()?;
        let step = (|| {
            let header = self.reader.header(pointer)?;
            let entity = self.reader.decode(&header)?;
            self.next = self.reader.next_of(pointer, &header, self.tile)?;
            Ok(entity)
        })();
        Some(step)
    }
}

/// One record reached by a [`MultiTileChain`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChainHit {
    pub pointer: u64,
    pub entity: GeoEntity,
    pub tiles: TileSet,
}

/// k-way merge of tile chains by file offset.
pub struct MultiTileChain {
    reader: TileStreamReader,
    heap: BinaryHeap<Reverse<(u64, u32)>>,
    failed: bool,
}

impl MultiTileChain {
    fn step(&mut self) -> Result<Option<ChainHit>> {
        let Some(Reverse((pointer, first))) = self.heap.pop() else {
            return Ok(None);
        };
        let mut tiles = TileSet::single(first);
        while let Some(&Reverse((next, tile))) = self.heap.peek() {
            if next != pointer {
                break;
            }
            self.heap.pop();
            tiles.insert(tile);
        }

        let header = self.reader.header(pointer)?;
        let entity = self.reader.decode(&header)?;
        let filed = self.reader.tiles_of(&header, Some(&entity))?;
        for tile in &tiles {
            if !filed.contains(tile) {
                return Err(GeoLayerError::integrity(format!(
                    "data file: record {pointer} reached through tile {tile} it is not filed under"
                )));
            }
            if let Some(next) = self.reader.next_of(pointer, &header, tile)? {
                self.heap.push(Reverse((next, tile)));
            }
        }

        Ok(Some(ChainHit {
            pointer,
            entity,
            tiles,
        }))
    }
}

impl Iterator for MultiTileChain {
    type Item = Result<ChainHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.step() {
            Ok(hit) => hit.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Position of `tile` in a sorted run of little-endian `u32` tile ids.
fn slot_of(ids: &[u8], tile: u32) -> Option<usize> {
    let (mut lo, mut hi) = (0, ids.len() / 4);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        match slice_u32(ids, 4 * mid)?.cmp(&tile) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Some(mid),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::codec::BincodeCodec;
    use tempfile::tempdir;

    fn options(buffer_capacity: usize, pending_capacity: usize) -> StreamOptions {
        StreamOptions {
            zoom: 14,
            buffer_capacity,
            pending_capacity,
            block_bits: 12,
            sync: SyncMode::Data,
        }
    }

    fn codec() -> Arc<dyn EntityCodec> {
        Arc::new(BincodeCodec)
    }

    fn tile_at(lon: f64, lat: f64) -> u32 {
        Tile::containing(lon, lat, 14).local_id()
    }

    fn write(
        path: &Path,
        opts: StreamOptions,
        records: &[(TileSet, GeoEntity)],
    ) -> (Vec<u64>, TileIndex, StreamStats) {
        let mut writer = TileStreamWriter::create(path, codec(), opts).unwrap();
        let pointers = records
            .iter()
            .map(|(tiles, entity)| writer.append(tiles, entity).unwrap())
            .collect();
        let (heads, stats) = writer.finish().unwrap();
        (pointers, heads, stats)
    }

    #[test]
    fn test_slot_of_sorted_tile_ids() {
        let ids: Vec<u8> = [3u32, 8, 21, 400].iter().flat_map(|id| id.to_le_bytes()).collect();
        assert_eq!(slot_of(&ids, 3), Some(0));
        assert_eq!(slot_of(&ids, 21), Some(2));
        assert_eq!(slot_of(&ids, 400), Some(3));
        assert_eq!(slot_of(&ids, 9), None);
        assert_eq!(slot_of(&ids, 500), None);
        assert_eq!(slot_of(&[], 3), None);
    }

    #[test]
    fn test_three_records_in_one_tile_come_back_in_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let tile = tile_at(4.0, 50.0);
        let records: Vec<_> = [3, 7, 11]
            .into_iter()
            .map(|id| (TileSet::single(tile), GeoEntity::point(id, 4.0, 50.0)))
            .collect();

        let (_, heads, stats) = write(&path, options(1 << 20, 16), &records);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.implicit_records, 3);
        assert_eq!(stats.in_buffer_patches, 2);

        let reader = TileStreamReader::open(&path, 14, codec()).unwrap();
        let head = heads.head(tile).unwrap();
        let ids: Vec<i64> = reader
            .iter_tile(tile, head)
            .map(|e| e.unwrap().id)
            .collect();
        assert_eq!(ids, vec![3, 7, 11]);
    }

    #[test]
    fn test_get_and_tiles_for_every_record_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let a = tile_at(4.0, 50.0);
        let b = tile_at(5.0, 51.0);

        let point = GeoEntity::point(1, 4.0, 50.0);
        // A point filed under a tile other than its own is written explicitly.
        let moved = GeoEntity::point(2, 4.0, 50.0);
        let line = GeoEntity::line(10, vec![1, 2]);
        let orphan = GeoEntity::line(11, vec![99]);

        let records = vec![
            (TileSet::single(a), point.clone()),
            (TileSet::single(b), moved.clone()),
            ([a, b].into_iter().collect(), line.clone()),
            (TileSet::new(), orphan.clone()),
        ];
        let (pointers, heads, stats) = write(&path, options(1 << 20, 16), &records);
        assert_eq!(stats.implicit_records, 1);
        assert_eq!(stats.untiled_records, 1);
        assert_eq!(heads.head_count(), 2);

        let reader = TileStreamReader::open(&path, 14, codec()).unwrap();
        for ((tiles, entity), pointer) in records.iter().zip(&pointers) {
            assert_eq!(&reader.get(*pointer).unwrap(), entity);
            assert_eq!(&reader.get_tiles_for(*pointer).unwrap(), tiles);
        }
    }

    #[test]
    fn test_deferred_patches_with_tiny_buffer() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let tiles: Vec<u32> = (0..5).map(|i| tile_at(i as f64, 10.0)).collect();

        let mut records = Vec::new();
        for id in 0..200i64 {
            let tile = tiles[(id % 5) as usize];
            records.push((TileSet::single(tile), GeoEntity::line(id, vec![id])));
        }
        let (_, heads, stats) = write(&path, options(64, 7), &records);
        assert!(stats.deferred_patches > 0);
        assert!(stats.patch_flushes > 1);

        let reader = TileStreamReader::open(&path, 14, codec()).unwrap();
        for (i, tile) in tiles.iter().enumerate() {
            let ids: Vec<i64> = reader
                .iter_tile(*tile, heads.head(*tile).unwrap())
                .map(|e| e.unwrap().id)
                .collect();
            let expected: Vec<i64> = (0..200).filter(|id| id % 5 == i as i64).collect();
            assert_eq!(ids, expected);
        }
    }

    #[test]
    fn test_multi_tile_merge_yields_each_record_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let a = tile_at(4.0, 50.0);
        let b = tile_at(5.0, 51.0);
        let c = tile_at(6.0, 52.0);

        let records = vec![
            (TileSet::single(a), GeoEntity::point(1, 4.0, 50.0)),
            (TileSet::single(b), GeoEntity::point(2, 5.0, 51.0)),
            (TileSet::single(c), GeoEntity::point(3, 6.0, 52.0)),
            ([a, b, c].into_iter().collect(), GeoEntity::line(10, vec![1, 2, 3])),
            ([b, c].into_iter().collect(), GeoEntity::line(11, vec![2, 3])),
        ];
        let (_, heads, _) = write(&path, options(32, 2), &records);
        let reader = TileStreamReader::open(&path, 14, codec()).unwrap();

        let requested = [a, b];
        let hits: Vec<ChainHit> = reader
            .iter_tiles(requested.iter().map(|&t| (t, heads.head(t).unwrap())))
            .map(|h| h.unwrap())
            .collect();
        let keys: Vec<_> = hits.iter().map(|h| h.entity.key()).collect();
        assert_eq!(
            keys,
            vec![
                EntityKey::point(1),
                EntityKey::point(2),
                EntityKey::line(10),
                EntityKey::line(11),
            ]
        );
        assert_eq!(hits[2].tiles, [a, b].into_iter().collect());
        assert_eq!(hits[3].tiles, TileSet::single(b));
    }

    #[test]
    fn test_unsorted_append_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut writer = TileStreamWriter::create(&path, codec(), options(1024, 16)).unwrap();
        writer
            .append(&TileSet::new(), &GeoEntity::line(5, vec![]))
            .unwrap();
        let err = writer
            .append(&TileSet::new(), &GeoEntity::point(6, 0.0, 0.0))
            .unwrap_err();
        assert!(matches!(err, GeoLayerError::UnsortedInput { .. }));
    }

    #[test]
    fn test_tile_outside_zoom_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let mut opts = options(1024, 16);
        opts.zoom = 2;
        let mut writer = TileStreamWriter::create(&path, codec(), opts).unwrap();
        let err = writer
            .append(&TileSet::single(16), &GeoEntity::line(1, vec![]))
            .unwrap_err();
        assert!(matches!(err, GeoLayerError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn test_bad_pointers_are_integrity_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let records = vec![(TileSet::single(tile_at(4.0, 50.0)), GeoEntity::point(1, 4.0, 50.0))];
        write(&path, options(1024, 16), &records);

        let reader = TileStreamReader::open(&path, 14, codec()).unwrap();
        for pointer in [0, 3, reader.len() as u64, u64::MAX] {
            assert!(matches!(
                reader.get(pointer),
                Err(GeoLayerError::DataIntegrity(_))
            ));
        }

        let truncated = Bytes::from(std::fs::read(&path).unwrap()).slice(..12);
        let reader = TileStreamReader::from_bytes(truncated, 14, codec()).unwrap();
        assert!(reader.get(8).is_err());
        assert!(TileStreamReader::from_bytes(Bytes::from_static(b"nope"), 14, codec()).is_err());
    }

    #[test]
    fn test_stream_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        std::fs::write(&path, b"existing").unwrap();
        assert!(TileStreamWriter::create(&path, codec(), options(1024, 16)).is_err());
    }
}
