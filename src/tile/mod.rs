//! Tile coordinate math
//!
//! Conversions between geographic coordinates and Web Mercator quad tiles,
//! the dense per-zoom "local id" linearization used as an array index, and
//! the relation between a tile and its 16 descendants two zoom levels down.

mod mask;
mod set;

pub use mask::TileMask;
pub use set::TileSet;

use crate::error::{GeoLayerError, Result};
use std::f64::consts::PI;
use std::fmt;

/// Highest supported zoom. Local ids at this zoom use all 32 bits.
pub const MAX_ZOOM: u8 = 16;

/// Latitude limit of the Web Mercator projection.
pub const MAX_LAT: f64 = 85.051_128_78;
pub const MIN_LAT: f64 = -MAX_LAT;

/// Number of zoom levels between a tile and the children covered by a mask.
pub const MASK_DEPTH: u8 = 2;

/// A quad-tree cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tile {
    pub x: u32,
    pub y: u32,
    pub zoom: u8,
}

/// Reject zoom levels the engine cannot address.
///
/// Zooms step by two so that a tile's mask children are always an addressable
/// level themselves.
pub fn validate_zoom(zoom: u8) -> Result<u8> {
    if zoom % 2 != 0 || zoom > MAX_ZOOM {
        return Err(GeoLayerError::InvalidZoom(zoom));
    }
    Ok(zoom)
}

/// Number of tiles along one axis at `zoom`.
#[inline]
pub fn tiles_per_axis(zoom: u8) -> u64 {
    1u64 << zoom
}

/// Number of tiles at `zoom`, i.e. the length of a local id space.
#[inline]
pub fn tile_count(zoom: u8) -> u64 {
    1u64 << (2 * zoom as u32)
}

/// The tile containing `(lon, lat)` at `zoom`.
///
/// Coordinates outside the projection are clamped onto its border, so every
/// point lands in exactly one tile.
pub fn tile_of(lon: f64, lat: f64, zoom: u8) -> Result<Tile> {
    validate_zoom(zoom)?;
    Ok(Tile::containing(lon, lat, zoom))
}

/// Dense linearization of `tile` within its zoom level.
#[inline]
pub fn local_id(tile: &Tile) -> u32 {
    tile.local_id()
}

/// The 16 children of `tile` at `deeper_zoom`, which must be `tile.zoom + 2`.
pub fn children_at(tile: &Tile, deeper_zoom: u8) -> Result<[Tile; 16]> {
    if Some(deeper_zoom) != tile.zoom.checked_add(MASK_DEPTH) {
        return Err(GeoLayerError::InvalidZoom(deeper_zoom));
    }
    tile.children()
}

/// Bit index of `child` within `tile`'s mask, if it is one of its children.
#[inline]
pub fn mask_of_child(tile: &Tile, child: &Tile) -> Option<u8> {
    tile.mask_bit_of(child)
}

/// The children of `tile` whose bit is set in `mask`.
pub fn tiles_for_mask(tile: &Tile, mask: TileMask) -> Result<impl Iterator<Item = Tile> + '_> {
    let zoom = tile.child_zoom()?;
    Ok(mask.iter().map(move |bit| tile.child_at_bit(bit, zoom)))
}

impl Tile {
    /// Create a tile, checking the zoom and that `x`/`y` exist at it.
    pub fn new(x: u32, y: u32, zoom: u8) -> Result<Self> {
        validate_zoom(zoom)?;
        let n = tiles_per_axis(zoom);
        for v in [x, y] {
            if v as u64 >= n {
                return Err(GeoLayerError::IndexOutOfBounds {
                    index: v as u64,
                    length: n,
                });
            }
        }
        Ok(Self { x, y, zoom })
    }

    /// Infallible counterpart of [`tile_of`] for an already validated zoom.
    pub(crate) fn containing(lon: f64, lat: f64, zoom: u8) -> Self {
        debug_assert!(validate_zoom(zoom).is_ok());
        let n = tiles_per_axis(zoom) as f64;
        let max = tiles_per_axis(zoom) - 1;

        let lon = if lon.is_nan() { 0.0 } else { lon.clamp(-180.0, 180.0) };
        let lat = if lat.is_nan() { 0.0 } else { lat.clamp(MIN_LAT, MAX_LAT) };

        let x = ((lon + 180.0) / 360.0 * n).floor();
        let lat_rad = lat.to_radians();
        let y = ((1.0 - lat_rad.tan().asinh() / PI) / 2.0 * n).floor();

        Self {
            x: (x.max(0.0) as u64).min(max) as u32,
            y: (y.max(0.0) as u64).min(max) as u32,
            zoom,
        }
    }

    /// Tile for a local id at `zoom`.
    pub fn from_local_id(id: u32, zoom: u8) -> Result<Self> {
        validate_zoom(zoom)?;
        if id as u64 >= tile_count(zoom) {
            return Err(GeoLayerError::IndexOutOfBounds {
                index: id as u64,
                length: tile_count(zoom),
            });
        }
        Ok(Self::from_local_id_unchecked(id, zoom))
    }

    pub(crate) fn from_local_id_unchecked(id: u32, zoom: u8) -> Self {
        let mask = (tiles_per_axis(zoom) - 1) as u32;
        Self {
            x: id & mask,
            y: ((id as u64) >> zoom) as u32,
            zoom,
        }
    }

    #[inline]
    pub fn local_id(&self) -> u32 {
        (((self.y as u64) << self.zoom) | self.x as u64) as u32
    }

    /// The tile two zoom levels up whose mask covers this one.
    pub fn parent(&self) -> Option<Tile> {
        let zoom = self.zoom.checked_sub(MASK_DEPTH)?;
        Some(Tile {
            x: self.x >> MASK_DEPTH,
            y: self.y >> MASK_DEPTH,
            zoom,
        })
    }

    /// The 16 children two zoom levels down, in mask bit order (row major).
    pub fn children(&self) -> Result<[Tile; 16]> {
        let zoom = self.child_zoom()?;
        let mut out = [*self; 16];
        for (bit, child) in out.iter_mut().enumerate() {
            *child = self.child_at_bit(bit as u8, zoom);
        }
        Ok(out)
    }

    pub fn mask_bit_of(&self, child: &Tile) -> Option<u8> {
        if Some(child.zoom) != self.zoom.checked_add(MASK_DEPTH) || child.parent()? != *self {
            return None;
        }
        let dx = child.x - self.x * 4;
        let dy = child.y - self.y * 4;
        Some((dy * 4 + dx) as u8)
    }

    /// Zoom of this tile's mask children. Also checks the tile itself, since
    /// its fields can be set by hand.
    fn child_zoom(&self) -> Result<u8> {
        Tile::new(self.x, self.y, self.zoom)?;
        let zoom = self
            .zoom
            .checked_add(MASK_DEPTH)
            .ok_or(GeoLayerError::InvalidZoom(self.zoom))?;
        validate_zoom(zoom)
    }

    fn child_at_bit(&self, bit: u8, zoom: u8) -> Tile {
        Tile {
            x: self.x * 4 + (bit as u32 % 4),
            y: self.y * 4 + (bit as u32 / 4),
            zoom,
        }
    }

    /// Longitude/latitude of the tile's northwest corner.
    pub fn northwest(&self) -> (f64, f64) {
        let n = tiles_per_axis(self.zoom) as f64;
        let lon = self.x as f64 / n * 360.0 - 180.0;
        let lat = (PI * (1.0 - 2.0 * self.y as f64 / n)).sinh().atan().to_degrees();
        (lon, lat)
    }
}

impl fmt::Display for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}
