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

//! Per-connection stream table.
//!
//! Client-initiated stream ids are always odd (RFC 9113 5.1.1), so
//! `id >> 1` gives a dense, gap-free index into a `Vec<Option<Stream>>`
//! instead of needing a hash map keyed by stream id.

use super::frame::FrameError;
use super::stream::Stream;

/// Number of streams processed between sweeps that drop closed entries.
const SWEEP_INTERVAL: u32 = 10;

/// Owns every stream on one HTTP/2 connection.
#[derive(Debug, Default)]
pub struct Multiplexer {
    streams: Vec<Option<Stream>>,
    highest_seen: u32,
    max_concurrent: u32,
    frames_since_sweep: u32,
}

impl Multiplexer {
    /// Creates an empty stream table allowing up to `max_concurrent`
    /// simultaneously open streams.
    pub fn new(max_concurrent: u32) -> Self {
        Multiplexer {
            streams: Vec::new(),
            highest_seen: 0,
            max_concurrent,
            frames_since_sweep: 0,
        }
    }

    fn index_of(id: u32) -> usize {
        (id >> 1) as usize
    }

    /// Opens a new stream for `id`, failing if it isn't a strictly
    /// increasing odd id (reuse/reordering is a connection error) or the
    /// concurrency limit has been hit.
    pub fn open(&mut self, id: u32, initial_window: u32) -> Result<&mut Stream, FrameError> {
        if id == 0 || id % 2 == 0 || id <= self.highest_seen {
            return Err(FrameError::InvalidStreamId);
        }
        if self.open_count() >= self.max_concurrent as usize {
            return Err(FrameError::InvalidFramePayload);
        }

        let idx = Self::index_of(id);
        if self.streams.len() <= idx {
            self.streams.resize_with(idx + 1, || None);
        }
        self.streams[idx] = Some(Stream::new(id, initial_window));
        self.highest_seen = id;
        Ok(self.streams[idx].as_mut().unwrap())
    }

    /// Looks up an already-open stream.
    pub fn get_mut(&mut self, id: u32) -> Option<&mut Stream> {
        self.streams.get_mut(Self::index_of(id))?.as_mut()
    }

    /// Number of streams currently occupying a slot, open or not-yet-swept.
    pub fn open_count(&self) -> usize {
        self.streams.iter().filter(|s| s.is_some()).count()
    }

    /// Call once per processed frame; every [`SWEEP_INTERVAL`] calls,
    /// reclaims slots for streams that reached [`super::stream::StreamState::Closed`].
    pub fn tick(&mut self) {
        self.frames_since_sweep += 1;
        if self.frames_since_sweep >= SWEEP_INTERVAL {
            self.sweep();
            self.frames_since_sweep = 0;
        }
    }

    fn sweep(&mut self) {
        for slot in &mut self.streams {
            if slot.as_ref().is_some_and(Stream::is_closed) {
                *slot = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_assigns_dense_index() {
        let mut mux = Multiplexer::new(100);
        mux.open(1, 65_535).unwrap();
        mux.open(3, 65_535).unwrap();
        assert!(mux.get_mut(1).is_some());
        assert!(mux.get_mut(3).is_some());
        assert_eq!(mux.open_count(), 2);
    }

    #[test]
    fn rejects_non_increasing_stream_id() {
        let mut mux = Multiplexer::new(100);
        mux.open(5, 65_535).unwrap();
        assert_eq!(mux.open(3, 65_535).unwrap_err(), FrameError::InvalidStreamId);
    }

    #[test]
    fn rejects_even_stream_id() {
        let mut mux = Multiplexer::new(100);
        assert_eq!(mux.open(2, 65_535).unwrap_err(), FrameError::InvalidStreamId);
    }

    #[test]
    fn sweep_reclaims_closed_stream_slots() {
        let mut mux = Multiplexer::new(100);
        mux.open(1, 65_535).unwrap();
        mux.get_mut(1).unwrap().state = crate::http2::stream::StreamState::Closed;
        for _ in 0..SWEEP_INTERVAL {
            mux.tick();
        }
        assert_eq!(mux.open_count(), 0);
    }

    #[test]
    fn enforces_max_concurrent_streams() {
        let mut mux = Multiplexer::new(1);
        mux.open(1, 65_535).unwrap();
        assert!(mux.open(3, 65_535).is_err());
    }
}
