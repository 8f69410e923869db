// Copyright 2022 Ryan Seipp
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

//! NUMA topology discovery.
//!
//! Reads `/sys/devices/system/node/node*/cpulist` to build the node/CPU
//! layout used to pin acceptor and worker threads. On platforms lacking
//! that sysfs tree (non-Linux, containers without `/sys` mounted, or a
//! machine with a single node) falls back to one synthetic node spanning
//! every CPU `std::thread::available_parallelism` reports.

use std::fs;
use std::path::Path;

/// A single NUMA node and the logical CPUs that belong to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumaNode {
    /// Kernel node id (0 on single-node/synthetic topologies).
    pub id: usize,
    /// Logical CPU ids belonging to this node, ascending.
    pub cpus: Vec<usize>,
}

/// Discovered system topology: an ordered list of NUMA nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Nodes in ascending id order. Always non-empty.
    pub nodes: Vec<NumaNode>,
}

impl Topology {
    /// Discovers the topology of the running machine.
    pub fn discover() -> Self {
        Self::discover_at(Path::new("/sys/devices/system/node"))
    }

    fn discover_at(sysfs_node_root: &Path) -> Self {
        match Self::read_sysfs(sysfs_node_root) {
            Some(nodes) if !nodes.is_empty() => Topology { nodes },
            _ => Topology {
                nodes: vec![Self::synthetic_node()],
            },
        }
    }

    fn read_sysfs(root: &Path) -> Option<Vec<NumaNode>> {
        let entries = fs::read_dir(root).ok()?;
        let mut nodes = Vec::new();

        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = name.to_str()?;
            let Some(id_str) = name.strip_prefix("node") else {
                continue;
            };
            let Ok(id) = id_str.parse::<usize>() else {
                continue;
            };

            let cpulist_path = entry.path().join("cpulist");
            let cpulist = fs::read_to_string(&cpulist_path).ok()?;
            let cpus = parse_cpulist(cpulist.trim());
            if !cpus.is_empty() {
                nodes.push(NumaNode { id, cpus });
            }
        }

        nodes.sort_by_key(|n| n.id);
        Some(nodes)
    }

    fn synthetic_node() -> NumaNode {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        NumaNode {
            id: 0,
            cpus: (0..cpu_count).collect(),
        }
    }

    /// Total CPU count across all nodes.
    pub fn total_cpus(&self) -> usize {
        self.nodes.iter().map(|n| n.cpus.len()).sum()
    }

    /// `true` when more than one NUMA node was discovered.
    pub fn is_multi_node(&self) -> bool {
        self.nodes.len() > 1
    }
}

/// Parses a Linux cpulist such as `0-3,8-11` into individual CPU ids.
fn parse_cpulist(s: &str) -> Vec<usize> {
    let mut cpus = Vec::new();
    if s.is_empty() {
        return cpus;
    }
    for range in s.split(',') {
        let range = range.trim();
        if range.is_empty() {
            continue;
        }
        match range.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.parse::<usize>(), hi.parse::<usize>()) {
                    cpus.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(n) = range.parse::<usize>() {
                    cpus.push(n);
                }
            }
        }
    }
    cpus
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parse_cpulist_handles_ranges_and_singletons() {
        assert_eq!(parse_cpulist("0-3,8,10-11"), vec![0, 1, 2, 3, 8, 10, 11]);
        assert_eq!(parse_cpulist(""), Vec::<usize>::new());
    }

    #[test]
    fn synthetic_fallback_covers_every_reported_cpu() {
        let topo = Topology::discover_at(Path::new("/nonexistent-path-for-tests"));
        assert_eq!(topo.nodes.len(), 1);
        assert_eq!(topo.nodes[0].id, 0);
        assert!(!topo.nodes[0].cpus.is_empty());
    }

    #[test]
    fn reads_two_node_sysfs_layout() {
        let dir = tempfile::tempdir().unwrap();
        for (id, list) in [(0, "0-1"), (1, "2-3")] {
            let node_dir = dir.path().join(format!("node{id}"));
            fs::create_dir_all(&node_dir).unwrap();
            let mut f = fs::File::create(node_dir.join("cpulist")).unwrap();
            write!(f, "{list}\n").unwrap();
        }
        let topo = Topology::discover_at(dir.path());
        assert_eq!(topo.nodes.len(), 2);
        assert_eq!(topo.nodes[0].cpus, vec![0, 1]);
        assert_eq!(topo.nodes[1].cpus, vec![2, 3]);
        assert!(topo.is_multi_node());
    }
}
