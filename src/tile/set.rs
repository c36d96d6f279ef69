use super::Tile;
use smallvec::SmallVec;

/// Sorted, duplicate-free set of tile local ids at one zoom.
///
/// Most entities live in a handful of tiles, so the ids are kept inline.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct TileSet(SmallVec<[u32; 4]>);

impl TileSet {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn single(id: u32) -> Self {
        let mut ids = SmallVec::new();
        ids.push(id);
        Self(ids)
    }

    /// Insert `id`, returning whether it was absent.
    pub fn insert(&mut self, id: u32) -> bool {
        match self.0.binary_search(&id) {
            Ok(_) => false,
            Err(pos) => {
                self.0.insert(pos, id);
                true
            }
        }
    }

    pub fn union_with(&mut self, other: &TileSet) {
        if other.is_empty() {
            return;
        }
        if self.is_empty() {
            self.0.clone_from(&other.0);
            return;
        }
        let mut merged = SmallVec::with_capacity(self.len() + other.len());
        let (mut a, mut b) = (self.0.iter().peekable(), other.0.iter().peekable());
        loop {
            let next = match (a.peek(), b.peek()) {
                (Some(&&x), Some(&&y)) if x < y => a.next(),
                (Some(&&x), Some(&&y)) if x > y => b.next(),
                (Some(_), Some(_)) => {
                    b.next();
                    a.next()
                }
                (Some(_), None) => a.next(),
                (None, Some(_)) => b.next(),
                (None, None) => break,
            };
            if let Some(&id) = next {
                merged.push(id);
            }
        }
        self.0 = merged;
    }

    pub fn intersection(&self, other: &TileSet) -> TileSet {
        self.iter().filter(|id| other.contains(*id)).collect()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.0.binary_search(&id).is_ok()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    /// Materialize the ids as tiles at `zoom`.
    pub fn to_tiles(&self, zoom: u8) -> Vec<Tile> {
        self.iter()
            .map(|id| Tile::from_local_id_unchecked(id, zoom))
            .collect()
    }
}

impl FromIterator<u32> for TileSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        let mut ids: SmallVec<[u32; 4]> = iter.into_iter().collect();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }
}

impl<'a> IntoIterator for &'a TileSet {
    type Item = u32;
    type IntoIter = std::iter::Copied<std::slice::Iter<'a, u32>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_iter_sorts_and_dedups() {
        let set: TileSet = [9, 3, 9, 1, 3].into_iter().collect();
        assert_eq!(set.as_slice(), &[1, 3, 9]);
    }

    #[test]
    fn test_insert() {
        let mut set = TileSet::new();
        assert!(set.insert(5));
        assert!(set.insert(2));
        assert!(!set.insert(5));
        assert_eq!(set.as_slice(), &[2, 5]);
    }

    #[test]
    fn test_union_and_intersection() {
        let mut a: TileSet = [1, 4, 7].into_iter().collect();
        let b: TileSet = [2, 4, 8, 9].into_iter().collect();
        assert_eq!(a.intersection(&b).as_slice(), &[4]);

        a.union_with(&b);
        assert_eq!(a.as_slice(), &[1, 2, 4, 7, 8, 9]);

        let mut empty = TileSet::new();
        empty.union_with(&b);
        assert_eq!(empty, b);
    }

    #[test]
    fn test_to_tiles() {
        let set: TileSet = [0, 5].into_iter().collect();
        let tiles = set.to_tiles(2);
        assert_eq!(tiles[1], Tile::new(1, 1, 2).unwrap());
    }
}
