use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::types::TilePos;

/// Rectangular 4-connected grid with optional blocked cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridMap {
    width: i32,
    height: i32,
    blocked: BTreeSet<TilePos>,
}

impl GridMap {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width: width.max(0),
            height: height.max(0),
            blocked: BTreeSet::new(),
        }
    }

    pub fn with_blocked(mut self, tiles: impl IntoIterator<Item = TilePos>) -> Self {
        self.blocked.extend(tiles);
        self
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_open(&self, tile: &TilePos) -> bool {
        tile.x >= 0
            && tile.y >= 0
            && tile.x < self.width
            && tile.y < self.height
            && !self.blocked.contains(tile)
    }

    pub fn vertices(&self) -> Vec<TilePos> {
        let mut vertices = Vec::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let tile = TilePos::new(x, y);
                if self.is_open(&tile) {
                    vertices.push(tile);
                }
            }
        }
        vertices
    }

    pub fn neighbors(&self, tile: &TilePos) -> Vec<TilePos> {
        [(1, 0), (-1, 0), (0, 1), (0, -1)]
            .iter()
            .map(|(dx, dy)| TilePos::new(tile.x + dx, tile.y + dy))
            .filter(|n| self.is_open(n))
            .collect()
    }

    /// Breadth-first route from `from` to `to`, excluding `from` itself.
    /// `None` when `to` is closed or walled off.
    pub fn shortest_path(&self, from: TilePos, to: TilePos) -> Option<Vec<TilePos>> {
        self.shortest_path_avoiding(from, to, &BTreeSet::new())
    }

    /// Like [`GridMap::shortest_path`], but never steps on `avoid` tiles
    /// other than `to` itself.
    pub fn shortest_path_avoiding(
        &self,
        from: TilePos,
        to: TilePos,
        avoid: &BTreeSet<TilePos>,
    ) -> Option<Vec<TilePos>> {
        if !self.is_open(&to) {
            return None;
        }
        if from == to {
            return Some(Vec::new());
        }

        let mut parents: BTreeMap<TilePos, TilePos> = BTreeMap::new();
        let mut frontier = VecDeque::from([from]);
        while let Some(tile) = frontier.pop_front() {
            for next in self.neighbors(&tile) {
                if next == from || parents.contains_key(&next) {
                    continue;
                }
                if next != to && avoid.contains(&next) {
                    continue;
                }
                parents.insert(next, tile);
                if next == to {
                    let mut path = vec![to];
                    let mut cursor = to;
                    while let Some(&parent) = parents.get(&cursor) {
                        if parent == from {
                            break;
                        }
                        path.push(parent);
                        cursor = parent;
                    }
                    path.reverse();
                    return Some(path);
                }
                frontier.push_back(next);
            }
        }
        None
    }
}
