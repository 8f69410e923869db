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

//! Michael-Scott lock-free MPMC queue.
//!
//! One queue per NUMA node backs the job dispatch path: acceptor threads
//! enqueue, worker threads in the pool dequeue or steal from a neighboring
//! node's queue. Nodes are reclaimed with `crossbeam_epoch` rather than
//! hand-rolled hazard pointers, which sidesteps the ABA problem on the
//! `head`/`tail` CAS loop.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_epoch::{self as epoch, Atomic, Owned, Shared};

struct Node<T> {
    // Interior mutability: the sentinel's `data` starts `None` and is filled
    // in by `push`; `pop` takes it back out of whichever node becomes the
    // new sentinel. Only ever touched by the thread that just linked or
    // unlinked the node, guarded by the epoch reclamation scheme.
    data: UnsafeCell<Option<T>>,
    next: Atomic<Node<T>>,
}

/// An unbounded, lock-free, multi-producer multi-consumer FIFO queue.
pub struct MsQueue<T> {
    head: Atomic<Node<T>>,
    tail: Atomic<Node<T>>,
    len: AtomicUsize,
}

impl<T> MsQueue<T> {
    /// Creates an empty queue with a single sentinel node.
    pub fn new() -> Self {
        let sentinel = Owned::new(Node {
            data: UnsafeCell::new(None),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        let sentinel = sentinel.into_shared(&guard);
        MsQueue {
            head: Atomic::from(sentinel),
            tail: Atomic::from(sentinel),
            len: AtomicUsize::new(0),
        }
    }

    /// Pushes `value` onto the tail of the queue.
    pub fn push(&self, value: T) {
        let new_node = Owned::new(Node {
            data: UnsafeCell::new(Some(value)),
            next: Atomic::null(),
        });
        let guard = epoch::pin();
        let new_node = new_node.into_shared(&guard);

        loop {
            let tail = self.tail.load(Ordering::Acquire, &guard);
            // SAFETY: `tail` is never reclaimed while reachable from `self.tail`,
            // and we hold an epoch guard for the duration of this dereference.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(Ordering::Acquire, &guard);

            if next.is_null() {
                if tail_ref
                    .next
                    .compare_exchange(
                        Shared::null(),
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                        &guard,
                    )
                    .is_ok()
                {
                    let _ = self.tail.compare_exchange(
                        tail,
                        new_node,
                        Ordering::Release,
                        Ordering::Relaxed,
                        &guard,
                    );
                    self.len.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            } else {
                // Another thread linked a node but hasn't swung `tail` yet; help it along.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
            }
        }
    }

    /// Pops a value from the head of the queue, or `None` if empty.
    pub fn pop(&self) -> Option<T> {
        let guard = epoch::pin();
        loop {
            let head = self.head.load(Ordering::Acquire, &guard);
            // SAFETY: see `push`.
            let head_ref = unsafe { head.deref() };
            let next = head_ref.next.load(Ordering::Acquire, &guard);

            let tail = self.tail.load(Ordering::Acquire, &guard);
            if head == tail {
                if next.is_null() {
                    return None;
                }
                // Tail has fallen behind; help swing it forward and retry.
                let _ = self.tail.compare_exchange(
                    tail,
                    next,
                    Ordering::Release,
                    Ordering::Relaxed,
                    &guard,
                );
                continue;
            }

            if next.is_null() {
                continue;
            }

            if self
                .head
                .compare_exchange(head, next, Ordering::Release, Ordering::Relaxed, &guard)
                .is_ok()
            {
                self.len.fetch_sub(1, Ordering::Relaxed);
                // `next` becomes the new sentinel; its `data` is the value
                // being dequeued. Exactly one thread wins the CAS above, so
                // only the winner ever touches this cell.
                let data = unsafe { (*next.deref().data.get()).take() };
                // SAFETY: `head` is now unreachable from any live queue
                // traversal; the epoch guard defers its actual deallocation
                // until no thread could still hold a reference to it.
                unsafe {
                    guard.defer_destroy(head);
                }
                return data;
            }
        }
    }

    /// Approximate length; exact only absent concurrent mutation.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    /// `true` if the queue held no elements at the time of the check.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for MsQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MsQueue<T> {
    fn drop(&mut self) {
        while self.pop().is_some() {}
        let guard = epoch::pin();
        let head = self.head.load(Ordering::Relaxed, &guard);
        unsafe {
            guard.defer_destroy(head);
        }
    }
}

// SAFETY: `T: Send` is sufficient because the queue never exposes shared
// references to `T` across threads without transferring ownership through
// `push`/`pop`.
unsafe impl<T: Send> Send for MsQueue<T> {}
unsafe impl<T: Send> Sync for MsQueue<T> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn push_then_pop_returns_fifo_order() {
        let q = MsQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), Some(3));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn empty_queue_pops_none() {
        let q: MsQueue<u32> = MsQueue::new();
        assert_eq!(q.pop(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn concurrent_producers_and_consumers_preserve_total_count() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 2_000;

        let q = Arc::new(MsQueue::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let q = Arc::clone(&q);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        q.push(p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut seen = 0usize;
        while q.pop().is_some() {
            seen += 1;
        }
        assert_eq!(seen, PRODUCERS * PER_PRODUCER);
    }
}
