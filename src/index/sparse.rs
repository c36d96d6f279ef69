//! Block-allocated sparse array of `i64`.
//!
//! A `SparseIndex` behaves like a `length`-sized array filled with a default
//! value. Storage is split into fixed-size blocks that exist only once a
//! non-default value has been written into them, so memory stays proportional
//! to the number of interesting slots rather than to `length`.

use crate::error::{GeoLayerError, Result};
use crate::storage::wire::{read_i64, read_u32, read_u64, read_u8, write_i64, write_u32, write_u64, write_u8};
use rustc_hash::FxHashMap;
use std::io::{Read, Write};

pub const DEFAULT_BLOCK_BITS: u32 = 12;
const MIN_BLOCK_BITS: u32 = 4;
const MAX_BLOCK_BITS: u32 = 20;

const FLAG_COUNTED: u8 = 0b0000_0001;
const FLAG_RANGES: u8 = 0b0000_0010;
const END_MARKER: u64 = u64::MAX;

/// Serialization options for [`SparseIndex::write_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SparseFormat {
    /// Prefix the entries with their count so readers can size themselves.
    pub counted: bool,
    /// Store runs of consecutive non-default slots instead of single pairs.
    pub ranges: bool,
}

impl SparseFormat {
    pub const COMPACT: SparseFormat = SparseFormat {
        counted: true,
        ranges: true,
    };
}

#[derive(Debug, Clone)]
pub struct SparseIndex {
    length: u64,
    default: i64,
    block_bits: u32,
    blocks: FxHashMap<u64, Box<[i64]>>,
}

impl SparseIndex {
    pub fn new(length: u64, default: i64) -> Self {
        Self::with_block_bits(length, default, DEFAULT_BLOCK_BITS)
    }

    /// Create an index whose blocks hold `1 << block_bits` slots.
    ///
    /// Block sizes outside `16..=1M` slots are clamped.
    pub fn with_block_bits(length: u64, default: i64, block_bits: u32) -> Self {
        Self {
            length,
            default,
            block_bits: block_bits.clamp(MIN_BLOCK_BITS, MAX_BLOCK_BITS),
            blocks: FxHashMap::default(),
        }
    }

    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn default_value(&self) -> i64 {
        self.default
    }

    pub fn block_size(&self) -> usize {
        1 << self.block_bits
    }

    pub fn allocated_blocks(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    fn split(&self, index: u64) -> (u64, usize) {
        (
            index >> self.block_bits,
            (index & ((1u64 << self.block_bits) - 1)) as usize,
        )
    }

    /// Value at `index`; the default for unallocated or out-of-range slots.
    pub fn get(&self, index: u64) -> i64 {
        if index >= self.length {
            return self.default;
        }
        let (block, slot) = self.split(index);
        self.blocks
            .get(&block)
            .map_or(self.default, |values| values[slot])
    }

    pub fn set(&mut self, index: u64, value: i64) -> Result<()> {
        if index >= self.length {
            return Err(GeoLayerError::IndexOutOfBounds {
                index,
                length: self.length,
            });
        }
        let (block, slot) = self.split(index);

        if value == self.default {
            if let Some(values) = self.blocks.get_mut(&block) {
                values[slot] = value;
                if values.iter().all(|&v| v == self.default) {
                    self.blocks.remove(&block);
                }
            }
            return Ok(());
        }

        let size = self.block_size();
        let default = self.default;
        let values = self
            .blocks
            .entry(block)
            .or_insert_with(|| vec![default; size].into_boxed_slice());
        values[slot] = value;
        Ok(())
    }

    /// Grow the logical length. Shrinking is not supported and is ignored.
    pub fn grow(&mut self, new_length: u64) {
        if new_length > self.length {
            self.length = new_length;
        }
    }

    /// Number of slots holding a non-default value.
    pub fn non_default_count(&self) -> u64 {
        self.blocks
            .values()
            .map(|values| values.iter().filter(|&&v| v != self.default).count() as u64)
            .sum()
    }

    /// Non-default `(index, value)` pairs in ascending index order.
    pub fn entries(&self) -> impl Iterator<Item = (u64, i64)> + '_ {
        let mut block_ids: Vec<u64> = self.blocks.keys().copied().collect();
        block_ids.sort_unstable();
        block_ids.into_iter().flat_map(move |block| {
            let base = block << self.block_bits;
            self.blocks[&block]
                .iter()
                .enumerate()
                .filter(move |(_, v)| **v != self.default)
                .map(move |(slot, &v)| (base + slot as u64, v))
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W, format: SparseFormat) -> Result<()> {
        let mut flags = 0u8;
        if format.counted {
            flags |= FLAG_COUNTED;
        }
        if format.ranges {
            flags |= FLAG_RANGES;
        }

        write_u64(writer, self.length)?;
        write_i64(writer, self.default)?;
        write_u32(writer, self.block_bits)?;
        write_u8(writer, flags)?;

        if format.counted {
            write_u64(writer, self.non_default_count())?;
        }

        if format.ranges {
            let mut run: Vec<i64> = Vec::new();
            let mut run_start = 0u64;
            let mut previous: Option<u64> = None;
            for (index, value) in self.entries() {
                let same_block = previous
                    .is_some_and(|p| p + 1 == index && (p >> self.block_bits) == (index >> self.block_bits));
                if !same_block && !run.is_empty() {
                    Self::write_run(writer, run_start, &run)?;
                    run.clear();
                }
                if run.is_empty() {
                    run_start = index;
                }
                run.push(value);
                previous = Some(index);
            }
            if !run.is_empty() {
                Self::write_run(writer, run_start, &run)?;
            }
        } else {
            for (index, value) in self.entries() {
                write_u64(writer, index)?;
                write_i64(writer, value)?;
            }
        }

        write_u64(writer, END_MARKER)?;
        Ok(())
    }

    fn write_run<W: Write>(writer: &mut W, start: u64, values: &[i64]) -> Result<()> {
        write_u64(writer, start)?;
        write_u32(writer, values.len() as u32)?;
        for &value in values {
            write_i64(writer, value)?;
        }
        Ok(())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let length = read_u64(reader)?;
        let default = read_i64(reader)?;
        let block_bits = read_u32(reader)?;
        let flags = read_u8(reader)?;

        if !(MIN_BLOCK_BITS..=MAX_BLOCK_BITS).contains(&block_bits) {
            return Err(GeoLayerError::integrity(format!(
                "sparse index: block bits {block_bits} out of range"
            )));
        }
        if flags & !(FLAG_COUNTED | FLAG_RANGES) != 0 {
            return Err(GeoLayerError::integrity(format!(
                "sparse index: unknown flags {flags:#04x}"
            )));
        }

        let mut index = Self::with_block_bits(length, default, block_bits);

        let expected = if flags & FLAG_COUNTED != 0 {
            let count = read_u64(reader)?;
            let blocks_hint = (count >> block_bits).saturating_add(1).min(1 << 16) as usize;
            index.blocks.reserve(blocks_hint);
            Some(count)
        } else {
            None
        };

        let mut seen = 0u64;
        loop {
            let start = read_u64(reader)?;
            if start == END_MARKER {
                break;
            }
            if flags & FLAG_RANGES != 0 {
                let run_len = read_u32(reader)? as u64;
                for offset in 0..run_len {
                    let value = read_i64(reader)?;
                    index.load(start.saturating_add(offset), value)?;
                }
                seen += run_len;
            } else {
                let value = read_i64(reader)?;
                index.load(start, value)?;
                seen += 1;
            }
        }

        if let Some(count) = expected
            && count != seen
        {
            return Err(GeoLayerError::integrity(format!(
                "sparse index: header announces {count} entries, found {seen}"
            )));
        }

        Ok(index)
    }

    fn load(&mut self, index: u64, value: i64) -> Result<()> {
        self.set(index, value).map_err(|_| {
            GeoLayerError::integrity(format!(
                "sparse index: entry {index} beyond length {}",
                self.length
            ))
        })
    }
}
