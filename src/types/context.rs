use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{PartitionId, TilePos};
use crate::providers::map::GridMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub vertices: Vec<TilePos>,
}

/// Simulation-owned state shared read-only with every component of every agent.
#[derive(Debug, Clone)]
pub struct SwarmContext {
    pub map: GridMap,
    partitions: BTreeMap<PartitionId, Partition>,
    owner_of: BTreeMap<TilePos, PartitionId>,
}

impl SwarmContext {
    pub fn new(map: GridMap, partitions: Vec<Partition>) -> Self {
        let mut owner_of = BTreeMap::new();
        for partition in &partitions {
            for vertex in &partition.vertices {
                owner_of.insert(*vertex, partition.id);
            }
        }

        Self {
            map,
            partitions: partitions.into_iter().map(|p| (p.id, p)).collect(),
            owner_of,
        }
    }

    /// Splits the map's open vertices into `count` vertical stripes of roughly
    /// equal width, numbered from the left edge.
    pub fn striped(map: GridMap, count: u32) -> Self {
        let count = count.max(1);
        let width = map.width().max(1);
        let mut partitions: Vec<Partition> = (0..count)
            .map(|id| Partition {
                id,
                vertices: Vec::new(),
            })
            .collect();

        for vertex in map.vertices() {
            let stripe = (vertex.x.max(0) as u32 * count / width as u32).min(count - 1);
            partitions[stripe as usize].vertices.push(vertex);
        }

        Self::new(map, partitions)
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    pub fn partition_ids(&self) -> impl Iterator<Item = PartitionId> + '_ {
        self.partitions.keys().copied()
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    pub fn partition_of(&self, tile: &TilePos) -> Option<PartitionId> {
        self.owner_of.get(tile).copied()
    }

    pub fn vertices_of(&self, id: PartitionId) -> &[TilePos] {
        self.partitions
            .get(&id)
            .map(|p| p.vertices.as_slice())
            .unwrap_or(&[])
    }
}
