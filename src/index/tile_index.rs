//! Per-layer map from tile local id to the head of its chain in the data file.

use super::sparse::{SparseFormat, SparseIndex};
use crate::config::SyncMode;
use crate::error::{GeoLayerError, Result};
use crate::storage::layout::sync_file;
use crate::storage::wire::{expect_magic, read_u8, write_u8};
use crate::tile::{tile_count, validate_zoom};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

const TILE_INDEX_MAGIC: &[u8] = b"GLTILES1";

/// Slot value of a tile the layer knows nothing about.
pub const UNKNOWN: i64 = -1;
/// Slot value of a tile the layer knows to hold nothing.
pub const EMPTY: i64 = -2;

/// What a layer records about one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileEntry {
    /// Never written by this layer; readers must ask the parent.
    Unknown,
    /// Locally complete and empty.
    Empty,
    /// Offset of the first record of the tile's chain.
    Pointer(u64),
}

impl TileEntry {
    fn from_raw(raw: i64) -> Self {
        match raw {
            EMPTY => TileEntry::Empty,
            v if v >= 0 => TileEntry::Pointer(v as u64),
            _ => TileEntry::Unknown,
        }
    }

    pub fn is_known(self) -> bool {
        !matches!(self, TileEntry::Unknown)
    }
}

#[derive(Debug, Clone)]
pub struct TileIndex {
    zoom: u8,
    slots: SparseIndex,
}

impl TileIndex {
    pub fn new(zoom: u8, block_bits: u32) -> Result<Self> {
        validate_zoom(zoom)?;
        Ok(Self {
            zoom,
            slots: SparseIndex::with_block_bits(tile_count(zoom), UNKNOWN, block_bits),
        })
    }

    pub fn zoom(&self) -> u8 {
        self.zoom
    }

    pub fn entry(&self, tile_id: u32) -> TileEntry {
        TileEntry::from_raw(self.slots.get(tile_id as u64))
    }

    pub fn head(&self, tile_id: u32) -> Option<u64> {
        match self.entry(tile_id) {
            TileEntry::Pointer(offset) => Some(offset),
            _ => None,
        }
    }

    pub fn set_head(&mut self, tile_id: u32, offset: u64) -> Result<()> {
        let raw = i64::try_from(offset)
            .map_err(|_| GeoLayerError::integrity(format!("tile head offset {offset} overflows")))?;
        self.slots.set(tile_id as u64, raw)
    }

    /// Mark a tile as locally complete. Tiles that already have a head keep it.
    pub fn mark_empty(&mut self, tile_id: u32) -> Result<()> {
        if self.head(tile_id).is_some() {
            return Ok(());
        }
        self.slots.set(tile_id as u64, EMPTY)
    }

    /// Known tiles in ascending local id order.
    pub fn known(&self) -> impl Iterator<Item = (u32, TileEntry)> + '_ {
        self.slots
            .entries()
            .map(|(id, raw)| (id as u32, TileEntry::from_raw(raw)))
    }

    /// Tiles with a chain, with their head offsets.
    pub fn heads(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.known().filter_map(|(id, entry)| match entry {
            TileEntry::Pointer(offset) => Some((id, offset)),
            _ => None,
        })
    }

    pub fn head_count(&self) -> usize {
        self.heads().count()
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(TILE_INDEX_MAGIC)?;
        write_u8(writer, self.zoom)?;
        self.slots.write_to(writer, SparseFormat::COMPACT)
    }

    pub fn save(&self, path: &Path, sync: SyncMode) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        sync_file(&file, sync)
    }

    pub fn read_from<R: std::io::Read>(reader: &mut R) -> Result<Self> {
        expect_magic(reader, TILE_INDEX_MAGIC, "tile index")?;
        let zoom = read_u8(reader)?;
        validate_zoom(zoom).map_err(|_| GeoLayerError::integrity(format!("tile index: zoom {zoom}")))?;

        let slots = SparseIndex::read_from(reader)?;
        if slots.len() != tile_count(zoom) || slots.default_value() != UNKNOWN {
            return Err(GeoLayerError::integrity(
                "tile index: slot space does not match its zoom",
            ));
        }
        if let Some((id, raw)) = slots.entries().find(|&(_, raw)| raw < EMPTY) {
            return Err(GeoLayerError::integrity(format!(
                "tile index: tile {id} holds invalid value {raw}"
            )));
        }
        Ok(Self { zoom, slots })
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_entries() {
        let mut index = TileIndex::new(4, 4).unwrap();
        assert_eq!(index.entry(3), TileEntry::Unknown);

        index.set_head(3, 0).unwrap();
        index.set_head(9, 4096).unwrap();
        index.mark_empty(10).unwrap();
        index.mark_empty(9).unwrap();

        assert_eq!(index.entry(3), TileEntry::Pointer(0));
        assert_eq!(index.entry(9), TileEntry::Pointer(4096));
        assert_eq!(index.entry(10), TileEntry::Empty);
        assert!(index.entry(10).is_known());
        assert_eq!(index.heads().collect::<Vec<_>>(), vec![(3, 0), (9, 4096)]);
        assert_eq!(index.known().count(), 3);
    }

    #[test]
    fn test_tile_beyond_zoom_rejected() {
        let mut index = TileIndex::new(2, 4).unwrap();
        assert!(matches!(
            index.set_head(16, 0),
            Err(GeoLayerError::IndexOutOfBounds { .. })
        ));
        assert!(TileIndex::new(3, 4).is_err());
    }

    #[test]
    fn test_save_and_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiles.idx");

        let mut index = TileIndex::new(14, 12).unwrap();
        index.set_head(1_000_000, 77).unwrap();
        index.mark_empty(5).unwrap();
        index.save(&path, SyncMode::All).unwrap();

        let back = TileIndex::open(&path).unwrap();
        assert_eq!(back.zoom(), 14);
        assert_eq!(back.entry(1_000_000), TileEntry::Pointer(77));
        assert_eq!(back.entry(5), TileEntry::Empty);
        assert_eq!(back.entry(6), TileEntry::Unknown);
    }

    #[test]
    fn test_corrupt_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tiles.idx");
        std::fs::write(&path, b"GLTILES1").unwrap();
        assert!(TileIndex::open(&path).is_err());

        std::fs::write(&path, b"garbage!").unwrap();
        assert!(matches!(
            TileIndex::open(&path),
            Err(GeoLayerError::DataIntegrity(_))
        ));
    }
}
