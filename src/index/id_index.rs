//! Sorted `(encoded key, pointer)` records with binary-search lookup.
//!
//! Keys of all kinds share one `i64` space: each kind owns a disjoint
//! `2^60`-wide range and ids are shifted into it, so the natural integer order
//! of encoded keys equals the `EntityKey` order.

use crate::error::{GeoLayerError, Result};
use crate::storage::wire::{slice_i64, write_i64};
use bytes::Bytes;
use geolayer_types::entity::{EntityKey, EntityKind};
use std::io::Write;
use std::path::Path;

const ID_INDEX_MAGIC: &[u8] = b"GLIDS001";
const RECORD_SIZE: usize = 16;
const KIND_SPAN: i64 = 1 << 60;
const DELETED: i64 = -1;

/// Ids must lie in `[-ID_LIMIT, ID_LIMIT)`.
pub const ID_LIMIT: i64 = 1 << 59;

pub fn encode_key(key: EntityKey) -> Result<i64> {
    if !(-ID_LIMIT..ID_LIMIT).contains(&key.id) {
        return Err(GeoLayerError::IdOutOfRange(key.id));
    }
    Ok(key.kind.ordinal() as i64 * KIND_SPAN + (key.id + ID_LIMIT))
}

pub fn decode_key(encoded: i64) -> Option<EntityKey> {
    if encoded < 0 {
        return None;
    }
    let kind = EntityKind::from_ordinal((encoded / KIND_SPAN) as u8)?;
    Some(EntityKey::new(kind, encoded % KIND_SPAN - ID_LIMIT))
}

/// What a layer's id index says about one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdEntry {
    /// Offset of the entity's record in the data file.
    Pointer(u64),
    /// The key was deleted in this layer.
    Deleted,
}

impl IdEntry {
    fn to_raw(self) -> Result<i64> {
        match self {
            IdEntry::Deleted => Ok(DELETED),
            IdEntry::Pointer(offset) => i64::try_from(offset)
                .map_err(|_| GeoLayerError::integrity(format!("pointer {offset} overflows"))),
        }
    }

    fn from_raw(raw: i64) -> Result<Self> {
        match raw {
            DELETED => Ok(IdEntry::Deleted),
            v if v >= 0 => Ok(IdEntry::Pointer(v as u64)),
            v => Err(GeoLayerError::integrity(format!("id index: invalid pointer {v}"))),
        }
    }
}

/// Read side of an id index file, held fully in memory.
#[derive(Debug, Clone, Default)]
pub struct IdIndex {
    records: Bytes,
}

impl IdIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Wrap a complete id index image, header included.
    pub fn from_bytes(data: Bytes) -> Result<Self> {
        if data.len() < ID_INDEX_MAGIC.len() || &data[..ID_INDEX_MAGIC.len()] != ID_INDEX_MAGIC {
            return Err(GeoLayerError::integrity("id index: bad magic"));
        }
        let records = data.slice(ID_INDEX_MAGIC.len()..);
        if records.len() % RECORD_SIZE != 0 {
            return Err(GeoLayerError::integrity(format!(
                "id index: {} trailing bytes",
                records.len() % RECORD_SIZE
            )));
        }
        Ok(Self { records })
    }

    pub fn open(path: &Path) -> Result<Self> {
        Self::from_bytes(Bytes::from(std::fs::read(path)?))
    }

    pub fn len(&self) -> usize {
        self.records.len() / RECORD_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&self, i: usize) -> Result<(i64, i64)> {
        let at = i * RECORD_SIZE;
        match (slice_i64(&self.records, at), slice_i64(&self.records, at + 8)) {
            (Some(key), Some(pointer)) => Ok((key, pointer)),
            _ => Err(GeoLayerError::integrity(format!("id index: record {i} truncated"))),
        }
    }

    pub fn lookup(&self, key: EntityKey) -> Result<Option<IdEntry>> {
        let Ok(target) = encode_key(key) else {
            return Ok(None);
        };

        let (mut lo, mut hi) = (0usize, self.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (encoded, pointer) = self.record(mid)?;
            match encoded.cmp(&target) {
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
                std::cmp::Ordering::Equal => return IdEntry::from_raw(pointer).map(Some),
            }
        }
        Ok(None)
    }

    pub fn contains(&self, key: EntityKey) -> Result<bool> {
        Ok(self.lookup(key)?.is_some())
    }

    /// All records in key order.
    pub fn iter(&self) -> impl Iterator<Item = Result<(EntityKey, IdEntry)>> + '_ {
        (0..self.len()).map(move |i| {
            let (encoded, pointer) = self.record(i)?;
            let key = decode_key(encoded)
                .ok_or_else(|| GeoLayerError::integrity(format!("id index: bad key {encoded}")))?;
            Ok((key, IdEntry::from_raw(pointer)?))
        })
    }
}

/// Sequential writer for an id index.
pub struct IdIndexWriter<W: Write> {
    out: W,
    last: Option<(i64, EntityKey)>,
    count: u64,
}

impl<W: Write> IdIndexWriter<W> {
    pub fn new(mut out: W) -> Result<Self> {
        out.write_all(ID_INDEX_MAGIC)?;
        Ok(Self {
            out,
            last: None,
            count: 0,
        })
    }

    /// Append a record. Keys must be strictly increasing.
    pub fn append(&mut self, key: EntityKey, entry: IdEntry) -> Result<()> {
        let encoded = encode_key(key)?;
        if let Some((previous_encoded, previous)) = self.last
            && encoded <= previous_encoded
        {
            return Err(GeoLayerError::UnsortedInput { previous, key });
        }
        write_i64(&mut self.out, encoded)?;
        write_i64(&mut self.out, entry.to_raw()?)?;
        self.last = Some((encoded, key));
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(mut self) -> Result<(W, u64)> {
        self.out.flush()?;
        Ok((self.out, self.count))
    }
}
