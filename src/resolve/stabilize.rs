//! Fixpoint resolution of group tile sets over a possibly cyclic member graph.
//!
//! Every group starts with the footprint of its point and line members. Group
//! members form a directed graph; a group is stable once every group member
//! of it is stable, and then its tile set is its footprint plus theirs.
//!
//! Cycles are found with an explicit-stack depth-first walk. The path segment
//! closing a cycle becomes an equivalence class (union-find), merged with any
//! class it touches. A class settles as a unit once none of its members is on
//! the walk path and every member's children are stable or inside the class;
//! all members then share one tile set.

use crate::config::CyclePolicy;
use crate::error::{GeoLayerError, Result};
use crate::tile::TileSet;
use rustc_hash::FxHashMap;

/// One group of the batch.
#[derive(Debug, Clone)]
pub(crate) struct GroupNode {
    pub id: i64,
    /// Tiles of the point, line and out-of-batch group members.
    pub direct: TileSet,
    /// Ids of member groups that are part of the same batch.
    pub children: Vec<i64>,
}

#[derive(Debug, Default)]
pub(crate) struct Stabilized {
    /// Tile set per input node, in input order.
    pub tiles: Vec<TileSet>,
    pub rounds: usize,
    pub cycle_classes: usize,
    /// Ids of cyclic classes that reached no tile at all.
    pub residual: Vec<Vec<i64>>,
}

struct Graph {
    ids: Vec<i64>,
    direct: Vec<TileSet>,
    children: Vec<Vec<usize>>,
    stable: Vec<Option<TileSet>>,
    parent: Vec<usize>,
    members: Vec<Vec<usize>>,
    cyclic: Vec<bool>,
    on_path: Vec<Option<usize>>,
    visited: Vec<u64>,
    epoch: u64,
    policy: CyclePolicy,
    cycle_classes: usize,
    residual: Vec<Vec<i64>>,
}

pub(crate) fn stabilize(nodes: Vec<GroupNode>, policy: CyclePolicy) -> Result<Stabilized> {
    let n = nodes.len();
    let index: FxHashMap<i64, usize> = nodes.iter().enumerate().map(|(i, g)| (g.id, i)).collect();

    let mut graph = Graph {
        ids: Vec::with_capacity(n),
        direct: Vec::with_capacity(n),
        children: Vec::with_capacity(n),
        stable: vec![None; n],
        parent: (0..n).collect(),
        members: (0..n).map(|i| vec![i]).collect(),
        cyclic: vec![false; n],
        on_path: vec![None; n],
        visited: vec![0; n],
        epoch: 0,
        policy,
        cycle_classes: 0,
        residual: Vec::new(),
    };
    for node in nodes {
        let mut children: Vec<usize> = node
            .children
            .iter()
            .filter_map(|id| index.get(id).copied())
            .collect();
        children.sort_unstable();
        children.dedup();
        graph.ids.push(node.id);
        graph.direct.push(node.direct);
        graph.children.push(children);
    }

    let mut rounds = 0;
    loop {
        rounds += 1;
        graph.epoch += 1;
        let before = graph.stable_count();
        for start in 0..n {
            if graph.stable[start].is_none() && graph.visited[start] != graph.epoch {
                graph.walk(start)?;
            }
        }
        let after = graph.stable_count();
        if after == n || after == before {
            break;
        }
    }

    graph.settle_leftovers()?;

    let tiles = graph
        .stable
        .into_iter()
        .map(Option::unwrap_or_default)
        .collect();
    Ok(Stabilized {
        tiles,
        rounds,
        cycle_classes: graph.cycle_classes,
        residual: graph.residual,
    })
}

impl Graph {
    fn stable_count(&self) -> usize {
        self.stable.iter().filter(|s| s.is_some()).count()
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        let (big, small) = if self.members[ra].len() >= self.members[rb].len() {
            (ra, rb)
        } else {
            (rb, ra)
        };
        let moved = std::mem::take(&mut self.members[small]);
        self.members[big].extend(moved);
        self.parent[small] = big;
        self.cyclic[big] = true;
    }

    /// Merge every node on the path from `from` up to the top into one class.
    fn merge_path(&mut self, stack: &[(usize, usize)], from: usize) {
        let anchor = stack[from].0;
        let root = self.find(anchor);
        self.cyclic[root] = true;
        for &(node, _) in &stack[from + 1..] {
            self.union(anchor, node);
        }
    }

    /// Lowest path position held by any member of `node`'s class.
    fn lowest_on_path(&mut self, node: usize) -> Option<usize> {
        let root = self.find(node);
        self.members[root]
            .iter()
            .filter_map(|&m| self.on_path[m])
            .min()
    }

    fn walk(&mut self, start: usize) -> Result<()> {
        let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
        self.visited[start] = self.epoch;
        self.on_path[start] = Some(0);

        while let Some(frame) = stack.last_mut() {
            let node = frame.0;
            if let Some(&child) = self.children[node].get(frame.1) {
                frame.1 += 1;
                if self.stable[child].is_some() {
                    continue;
                }
                if self.visited[child] != self.epoch {
                    self.visited[child] = self.epoch;
                    self.on_path[child] = Some(stack.len());
                    stack.push((child, 0));
                    continue;
                }
                if let Some(pos) = self.lowest_on_path(child) {
                    self.merge_path(&stack, pos);
                    self.union(child, stack[pos].0);
                }
                continue;
            }

            stack.pop();
            self.on_path[node] = None;
            if !self.try_settle(node)?
                && let Some(pos) = self.lowest_on_path(node)
            {
                self.merge_path(&stack, pos);
                self.union(node, stack[pos].0);
            }
        }
        Ok(())
    }

    fn try_settle(&mut self, node: usize) -> Result<bool> {
        if self.stable[node].is_some() {
            return Ok(true);
        }
        let root = self.find(node);
        if self.members[root].iter().any(|&m| self.on_path[m].is_some()) {
            return Ok(false);
        }

        let mut union = TileSet::new();
        for k in 0..self.members[root].len() {
            let member = self.members[root][k];
            union.union_with(&self.direct[member]);
            for i in 0..self.children[member].len() {
                let child = self.children[member][i];
                if let Some(tiles) = &self.stable[child] {
                    union.union_with(tiles);
                } else if self.find(child) != root {
                    return Ok(false);
                }
            }
        }

        let members = std::mem::take(&mut self.members[root]);
        let assigned = self.assign(root, &members, union);
        self.members[root] = members;
        assigned?;
        Ok(true)
    }

    fn assign(&mut self, root: usize, members: &[usize], union: TileSet) -> Result<()> {
        if self.cyclic[root] {
            self.cycle_classes += 1;
            if union.is_empty() {
                self.on_residual(members)?;
            }
        }
        for &member in members {
            self.stable[member] = Some(union.clone());
        }
        Ok(())
    }

    fn on_residual(&mut self, members: &[usize]) -> Result<()> {
        let mut ids: Vec<i64> = members.iter().map(|&m| self.ids[m]).collect();
        ids.sort_unstable();
        match self.policy {
            CyclePolicy::Reject => Err(GeoLayerError::UnresolvableCycleState(ids)),
            CyclePolicy::Union => {
                log::warn!("groups {ids:?} form a cycle reaching no tile; storing them untiled");
                self.residual.push(ids);
                Ok(())
            }
        }
    }

    /// Classes no round could settle get the union of what they reach.
    fn settle_leftovers(&mut self) -> Result<()> {
        let mut classes: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for node in 0..self.ids.len() {
            if self.stable[node].is_none() {
                let root = self.find(node);
                classes.entry(root).or_default().push(node);
            }
        }
        let mut roots: Vec<usize> = classes.keys().copied().collect();
        roots.sort_unstable();

        for root in roots {
            let members = &classes[&root];
            let mut union = TileSet::new();
            for &member in members {
                union.union_with(&self.direct[member]);
                for &child in &self.children[member] {
                    if let Some(tiles) = &self.stable[child] {
                        union.union_with(tiles);
                    }
                }
            }
            let members = members.clone();
            let mut ids: Vec<i64> = members.iter().map(|&m| self.ids[m]).collect();
            ids.sort_unstable();
            match self.policy {
                CyclePolicy::Reject => return Err(GeoLayerError::UnresolvableCycleState(ids)),
                CyclePolicy::Union => {
                    log::warn!("groups {ids:?} never stabilized; using the union of their members");
                    self.residual.push(ids);
                }
            }
            for member in members {
                self.stable[member] = Some(union.clone());
            }
        }
        Ok(())
    }
}
