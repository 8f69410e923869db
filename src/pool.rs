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

//! NUMA-aware worker thread pool.
//!
//! One [`queue::MsQueue`] per discovered NUMA node backs the pool; workers
//! pinned to cores on their own node drain it first and steal from a
//! neighboring node's queue only once their own is empty. A condvar per node
//! parks idle workers instead of spinning.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::queue::MsQueue;
use crate::topology::Topology;

/// A unit of work submitted to the pool.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

struct NodeQueue {
    queue: MsQueue<Job>,
    wake: Condvar,
    parked: Mutex<()>,
}

impl NodeQueue {
    fn new() -> Self {
        NodeQueue {
            queue: MsQueue::new(),
            wake: Condvar::new(),
            parked: Mutex::new(()),
        }
    }

    fn push(&self, job: Job) {
        self.queue.push(job);
        self.wake.notify_one();
    }
}

/// A pool of OS threads, one per CPU in the discovered topology, each pinned
/// to its core and preferring jobs submitted to its own node's queue.
pub struct ThreadPool {
    nodes: Vec<Arc<NodeQueue>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown: Arc<AtomicBool>,
}

impl ThreadPool {
    /// Spawns one worker thread per CPU reported by `topology`, pinned to
    /// that CPU, grouped into one job queue per NUMA node.
    pub fn new(topology: &Topology) -> Arc<Self> {
        let nodes: Vec<_> = topology.nodes.iter().map(|_| Arc::new(NodeQueue::new())).collect();
        let shutdown = Arc::new(AtomicBool::new(false));

        let pool = Arc::new(ThreadPool {
            nodes: nodes.clone(),
            workers: Mutex::new(Vec::new()),
            shutdown: Arc::clone(&shutdown),
        });

        let mut workers = Vec::new();
        for (node_idx, node) in topology.nodes.iter().enumerate() {
            for &cpu in &node.cpus {
                let nodes = nodes.clone();
                let shutdown = Arc::clone(&shutdown);
                workers.push(
                    thread::Builder::new()
                        .name(format!("rask-worker-n{node_idx}-c{cpu}"))
                        .spawn(move || {
                            core_affinity::set_for_current(core_affinity::CoreId { id: cpu });
                            worker_loop(node_idx, nodes, shutdown);
                        })
                        .expect("failed to spawn worker thread"),
                );
            }
        }
        *pool.workers.lock().unwrap() = workers;
        pool
    }

    /// Submits `job` to `preferred_node`'s queue, falling back to node 0 if
    /// out of range (e.g. the caller guessed a node count that has since
    /// changed, which cannot happen after construction but keeps this safe).
    pub fn submit(&self, preferred_node: usize, job: Job) {
        let idx = if preferred_node < self.nodes.len() { preferred_node } else { 0 };
        self.nodes[idx].push(job);
    }

    /// Number of NUMA-node queues backing this pool.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Signals every worker to exit once its queue drains, and waits for
    /// them to stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        for node in &self.nodes {
            node.wake.notify_all();
        }
        let mut workers = self.workers.lock().unwrap();
        for handle in workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(node_idx: usize, nodes: Vec<Arc<NodeQueue>>, shutdown: Arc<AtomicBool>) {
    let own = &nodes[node_idx];
    loop {
        if let Some(job) = own.queue.pop() {
            job();
            continue;
        }

        if let Some(job) = steal(node_idx, &nodes) {
            job();
            continue;
        }

        if shutdown.load(Ordering::SeqCst) {
            return;
        }

        let guard = own.parked.lock().unwrap();
        let (_guard, _timeout) = own
            .wake
            .wait_timeout(guard, Duration::from_millis(50))
            .unwrap();
    }
}

fn steal(own_idx: usize, nodes: &[Arc<NodeQueue>]) -> Option<Job> {
    for (idx, node) in nodes.iter().enumerate() {
        if idx == own_idx {
            continue;
        }
        if let Some(job) = node.queue.pop() {
            return Some(job);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc as StdArc;

    fn single_node_topology(cpus: usize) -> Topology {
        use crate::topology::NumaNode;
        Topology {
            nodes: vec![NumaNode {
                id: 0,
                cpus: (0..cpus).collect(),
            }],
        }
    }

    #[test]
    fn submitted_jobs_all_run() {
        let topo = single_node_topology(2);
        let pool = ThreadPool::new(&topo);
        let counter = StdArc::new(AtomicUsize::new(0));

        for _ in 0..100 {
            let counter = StdArc::clone(&counter);
            pool.submit(0, Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        // Give workers time to drain; shutdown() joins after signaling, but
        // jobs submitted before shutdown must still run to completion first.
        std::thread::sleep(Duration::from_millis(200));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 100);
    }

    #[test]
    fn node_count_matches_topology() {
        let topo = single_node_topology(1);
        let pool = ThreadPool::new(&topo);
        assert_eq!(pool.node_count(), 1);
        pool.shutdown();
    }
}
