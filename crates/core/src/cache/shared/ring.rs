// Copyright © 2026 Kirky.X
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use sha2::{Digest, Sha256};

pub const DEFAULT_REPLICAS: usize = 160;

/// Consistent-hash ring over shard names.
///
/// Immutable once built: a membership change means building a new ring.
/// Points are derived from shard names rather than addresses, so moving a
/// shard to a new host does not remap any key.
#[derive(Debug, Clone)]
pub struct HashRing {
    points: Vec<(u64, usize)>,
    nodes: Vec<String>,
}

impl HashRing {
    pub fn new(nodes: Vec<String>, replicas: usize) -> Self {
        let replicas = replicas.max(1);
        let mut points = Vec::with_capacity(nodes.len() * replicas);

        for (idx, name) in nodes.iter().enumerate() {
            for replica in 0..replicas {
                points.push((hash64(format!("{}-{}", name, replica).as_bytes()), idx));
            }
        }
        points.sort_unstable();

        Self { points, nodes }
    }

    /// Index of the shard owning `key`, or `None` for an empty ring.
    pub fn locate(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }

        let hash = hash64(key.as_bytes());
        let pos = self.points.partition_point(|(point, _)| *point < hash);
        let (_, idx) = self.points[pos % self.points.len()];
        Some(idx)
    }

    pub fn locate_name(&self, key: &str) -> Option<&str> {
        self.locate(key).map(|idx| self.nodes[idx].as_str())
    }

    pub fn nodes(&self) -> &[String] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

fn hash64(data: &[u8]) -> u64 {
    let digest = Sha256::digest(data);
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(buf)
}
