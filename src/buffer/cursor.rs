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

//! Read/write cursor buffer: a single contiguous allocation with independent
//! read and write offsets, used to forward bytes between two streams without
//! per-call allocation.

use std::io::{Read, Write};

/// Invariant: `0 <= read_pos <= write_pos <= capacity` at all times.
#[derive(Debug)]
pub struct CursorBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    read_pos: usize,
    write_pos: usize,
}

impl CursorBuffer {
    /// Creates a cursor buffer of exactly `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0u8; capacity],
            capacity,
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Fixed capacity of this buffer.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// The readable range `[read_pos, write_pos)`.
    #[inline]
    pub fn readable(&self) -> &[u8] {
        &self.bytes[self.read_pos..self.write_pos]
    }

    /// The writable range `[write_pos, capacity)`.
    #[inline]
    pub fn writable_mut(&mut self) -> &mut [u8] {
        &mut self.bytes[self.write_pos..self.capacity]
    }

    /// Bytes available to read.
    #[inline]
    pub fn readable_len(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Bytes available to write before the buffer is full.
    #[inline]
    pub fn writable_len(&self) -> usize {
        self.capacity - self.write_pos
    }

    /// Marks `amount` bytes as read. On full consume (`read_pos == write_pos`)
    /// both offsets reset to 0 so the buffer behaves as freshly allocated.
    pub fn mark_read(&mut self, amount: usize) {
        debug_assert!(self.read_pos + amount <= self.write_pos);
        self.read_pos += amount;
        if self.read_pos == self.write_pos {
            self.read_pos = 0;
            self.write_pos = 0;
        }
    }

    /// Marks `amount` bytes as written.
    pub fn mark_written(&mut self, amount: usize) {
        debug_assert!(self.write_pos + amount <= self.capacity);
        self.write_pos += amount;
    }

    /// Shifts the readable range to offset 0, reclaiming space consumed by
    /// already-read bytes at the front of the buffer.
    pub fn compact(&mut self) {
        if self.read_pos == 0 {
            return;
        }
        self.bytes.copy_within(self.read_pos..self.write_pos, 0);
        self.write_pos -= self.read_pos;
        self.read_pos = 0;
    }

    /// Reads one chunk from `from` into the writable tail, compacting first
    /// if the writable window has shrunk below a quarter of capacity, then
    /// writes the readable range to `to`. Returns the number of bytes read
    /// from `from` (0 signals EOF).
    pub fn forward<R: Read, W: Write>(&mut self, from: &mut R, to: &mut W) -> std::io::Result<usize> {
        if self.writable_len() < self.capacity / 4 {
            self.compact();
        }

        let read_n = if self.writable_len() > 0 {
            match from.read(self.writable_mut()) {
                Ok(n) => {
                    self.mark_written(n);
                    n
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => 0,
                Err(e) => return Err(e),
            }
        } else {
            0
        };

        if self.readable_len() > 0 {
            let n = to.write(self.readable())?;
            self.mark_read(n);
        }

        Ok(read_n)
    }

    /// Repeatedly `forward`s until `from` yields EOF (`Ok(0)` with nothing
    /// left buffered) or a non-`WouldBlock` I/O error occurs.
    pub fn forward_all<R: Read, W: Write>(&mut self, from: &mut R, to: &mut W) -> std::io::Result<u64> {
        let mut total = 0u64;
        loop {
            let n = self.forward(from, to)?;
            total += n as u64;
            if n == 0 && self.readable_len() == 0 {
                // flush any bytes still sitting in the buffer before exiting
                if self.readable_len() > 0 {
                    let written = to.write(self.readable())?;
                    self.mark_read(written);
                    continue;
                }
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariants_hold_after_construction() {
        let c = CursorBuffer::new(128);
        assert_eq!(c.capacity(), 128);
        assert_eq!(c.readable_len(), 0);
        assert_eq!(c.writable_len(), 128);
    }

    #[test]
    fn mark_read_advances_by_exact_amount() {
        let mut c = CursorBuffer::new(16);
        c.mark_written(10);
        c.mark_read(4);
        assert_eq!(c.readable_len(), 6);
    }

    #[test]
    fn full_consume_resets_both_pointers() {
        let mut c = CursorBuffer::new(16);
        c.mark_written(8);
        c.mark_read(8);
        assert_eq!(c.readable_len(), 0);
        assert_eq!(c.writable_len(), 16);
    }

    #[test]
    fn compact_shifts_readable_bytes_to_front() {
        let mut c = CursorBuffer::new(16);
        c.writable_mut()[..4].copy_from_slice(b"data");
        c.mark_written(4);
        c.mark_read(2);
        c.compact();
        assert_eq!(c.readable(), b"ta");
        assert_eq!(c.writable_len(), 14);
    }

    #[test]
    fn forward_all_copies_entire_source_to_sink() {
        let mut c = CursorBuffer::new(8);
        let mut source = std::io::Cursor::new(b"the quick brown fox".to_vec());
        let mut sink = Vec::new();
        let n = c.forward_all(&mut source, &mut sink).unwrap();
        assert_eq!(n, 19);
        assert_eq!(sink, b"the quick brown fox");
    }
}
