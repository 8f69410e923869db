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

//! Scatter/gather buffer: an ordered sequence of owned byte slices written in
//! a single vectored I/O call where the underlying stream supports it.

use std::io::{IoSlice, Write};

/// An ordered collection of owned byte chunks suitable for a single
/// `writev`-style syscall.
#[derive(Debug, Default)]
pub struct VectoredBuffer {
    chunks: Vec<Vec<u8>>,
}

impl VectoredBuffer {
    /// Creates an empty vectored buffer.
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Appends a copy of `data` as a new chunk.
    pub fn append_copy(&mut self, data: &[u8]) {
        self.chunks.push(data.to_vec());
    }

    /// Appends `data`, taking ownership without copying.
    pub fn append_move(&mut self, data: Vec<u8>) {
        self.chunks.push(data);
    }

    /// Total bytes across all chunks.
    pub fn len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// `true` if no chunks (or only empty chunks) are present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frees all contained chunks, leaving the buffer empty.
    pub fn reset(&mut self) {
        self.chunks.clear();
    }

    /// Writes every chunk to `stream` in one scatter/gather call where the
    /// stream supports vectored writes, falling back to per-slice writes
    /// (stopping at the first short write) otherwise.
    pub fn write_to<W: Write>(&mut self, stream: &mut W) -> std::io::Result<usize> {
        if self.chunks.is_empty() {
            return Ok(0);
        }

        if stream.is_write_vectored() {
            let slices: Vec<IoSlice<'_>> = self.chunks.iter().map(|c| IoSlice::new(c)).collect();
            let total: usize = slices.iter().map(|s| s.len()).sum();
            let mut written = 0;
            while written < total {
                let remaining = Self::remaining_slices(&slices, written);
                match stream.write_vectored(&remaining) {
                    Ok(0) => break,
                    Ok(n) => written += n,
                    Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            self.reset();
            return Ok(written);
        }

        let mut total = 0;
        for chunk in &self.chunks {
            match stream.write(chunk) {
                Ok(n) => {
                    total += n;
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }
        self.reset();
        Ok(total)
    }

    /// Builds the subset of `slices` that remains after `already_written`
    /// bytes have been consumed from the front, trimming the first partially
    /// written slice.
    fn remaining_slices<'a>(slices: &'a [IoSlice<'a>], already_written: usize) -> Vec<IoSlice<'a>> {
        let mut skip = already_written;
        let mut out = Vec::with_capacity(slices.len());
        for s in slices {
            if skip >= s.len() {
                skip -= s.len();
                continue;
            }
            out.push(IoSlice::new(&s[skip..]));
            skip = 0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_copy_and_move_both_grow_len() {
        let mut v = VectoredBuffer::new();
        v.append_copy(b"hello");
        v.append_move(b" world".to_vec());
        assert_eq!(v.len(), 11);
        assert!(!v.is_empty());
    }

    #[test]
    fn reset_frees_all_chunks() {
        let mut v = VectoredBuffer::new();
        v.append_copy(b"abc");
        v.reset();
        assert!(v.is_empty());
    }

    #[test]
    fn write_to_concatenates_chunks_in_order() {
        let mut v = VectoredBuffer::new();
        v.append_copy(b"HTTP/1.1 200 OK\r\n\r\n");
        v.append_copy(b"body");
        let mut out = Vec::new();
        let n = v.write_to(&mut out).unwrap();
        assert_eq!(n, 23);
        assert_eq!(&out, b"HTTP/1.1 200 OK\r\n\r\nbody");
        assert!(v.is_empty());
    }
}
