use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// One bit per child tile two zoom levels down, in row-major order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TileMask(u16);

impl TileMask {
    pub const EMPTY: TileMask = TileMask(0);
    pub const FULL: TileMask = TileMask(u16::MAX);

    pub fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// Copy of the mask with `bit` set. Bits above 15 are ignored.
    pub fn with(self, bit: u8) -> Self {
        if bit >= 16 {
            return self;
        }
        Self(self.0 | (1 << bit))
    }

    pub fn set(&mut self, bit: u8) {
        *self = self.with(bit);
    }

    pub fn contains(self, bit: u8) -> bool {
        bit < 16 && self.0 & (1 << bit) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn count(self) -> u32 {
        self.0.count_ones()
    }

    /// Set bits in ascending order.
    pub fn iter(self) -> impl Iterator<Item = u8> {
        (0u8..16).filter(move |&bit| self.contains(bit))
    }
}

impl BitOr for TileMask {
    type Output = TileMask;

    fn bitor(self, rhs: TileMask) -> TileMask {
        TileMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for TileMask {
    fn bitor_assign(&mut self, rhs: TileMask) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for TileMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TileMask({:#018b})", self.0)
    }
}
