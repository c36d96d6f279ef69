use super::TileHit;
use crate::error::Result;
use std::cmp::Ordering;

/// Merge two key-ordered hit sequences.
///
/// On a key present in both, the `local` entity wins and the tile sets are
/// combined.
pub struct MergeByKey<L, P> {
    local: L,
    parent: P,
    local_head: Option<TileHit>,
    parent_head: Option<TileHit>,
    local_done: bool,
    parent_done: bool,
    failed: bool,
}

impl<L, P> MergeByKey<L, P>
where
    L: Iterator<Item = Result<TileHit>>,
    P: Iterator<Item = Result<TileHit>>,
{
    pub fn new(local: L, parent: P) -> Self {
        Self {
            local,
            parent,
            local_head: None,
            parent_head: None,
            local_done: false,
            parent_done: false,
            failed: false,
        }
    }

    fn fill(&mut self) -> Result<()> {
        if self.local_head.is_none() && !self.local_done {
            match self.local.next().transpose()? {
                Some(hit) => self.local_head = Some(hit),
                None => self.local_done = true,
            }
        }
        if self.parent_head.is_none() && !self.parent_done {
            match self.parent.next().transpose()? {
                Some(hit) => self.parent_head = Some(hit),
                None => self.parent_done = true,
            }
        }
        Ok(())
    }
}

impl<L, P> Iterator for MergeByKey<L, P>
where
    L: Iterator<Item = Result<TileHit>>,
    P: Iterator<Item = Result<TileHit>>,
{
    type Item = Result<TileHit>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Err(e) = self.fill() {
            self.failed = true;
            return Some(Err(e));
        }

        let order = match (&self.local_head, &self.parent_head) {
            (None, None) => return None,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some(local), Some(parent)) => local.entity.key().cmp(&parent.entity.key()),
        };

        let hit = match order {
            Ordering::Less => self.local_head.take(),
            Ordering::Greater => self.parent_head.take(),
            Ordering::Equal => {
                let parent = self.parent_head.take();
                self.local_head.take().map(|mut local| {
                    if let Some(parent) = parent {
                        local.tiles.union_with(&parent.tiles);
                    }
                    local
                })
            }
        };
        hit.map(Ok)
    }
}
