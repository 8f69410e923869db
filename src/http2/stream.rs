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

//! HTTP/2 stream state machine, RFC 9113 Section 5.1 (push promise states
//! omitted — this engine never pushes).

use super::header_codec::HeaderList;

/// Stream lifecycle state. The `Idle` state is implicit: a slot not present
/// in the stream table is idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Headers received, stream accepting DATA frames both ways.
    Open,
    /// This endpoint sent END_STREAM; only receiving now.
    HalfClosedLocal,
    /// Peer sent END_STREAM; only sending now.
    HalfClosedRemote,
    /// Both sides done, or the stream was reset.
    Closed,
}

impl StreamState {
    /// Transitions on receiving END_STREAM from the peer.
    pub fn on_remote_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedRemote,
            StreamState::HalfClosedLocal => StreamState::Closed,
            other => other,
        }
    }

    /// Transitions on this endpoint sending END_STREAM.
    pub fn on_local_end_stream(self) -> Self {
        match self {
            StreamState::Open => StreamState::HalfClosedLocal,
            StreamState::HalfClosedRemote => StreamState::Closed,
            other => other,
        }
    }
}

/// Per-stream state tracked by the [`super::multiplexer::Multiplexer`].
#[derive(Debug)]
pub struct Stream {
    /// Odd, client-initiated stream identifier.
    pub id: u32,
    /// Current lifecycle state.
    pub state: StreamState,
    /// Headers received so far (request headers on a server-terminated
    /// stream).
    pub headers: HeaderList,
    /// Body bytes buffered from DATA frames.
    pub body: Vec<u8>,
    /// Remaining flow-control credit this endpoint has to send DATA.
    pub send_window: i64,
    /// Header block fragment accumulated from a HEADERS frame and any
    /// CONTINUATION frames following it, pending `END_HEADERS`.
    pub pending_header_block: Vec<u8>,
    /// Whether the HEADERS frame that opened the in-progress header block
    /// also carried `END_STREAM`, remembered until the block completes.
    pub end_stream_after_headers: bool,
}

impl Stream {
    /// Opens a new stream at the connection's negotiated initial window.
    pub fn new(id: u32, initial_window: u32) -> Self {
        Stream {
            id,
            state: StreamState::Open,
            headers: Vec::new(),
            body: Vec::new(),
            send_window: initial_window as i64,
            pending_header_block: Vec::new(),
            end_stream_after_headers: false,
        }
    }

    /// `true` once both directions have ended.
    pub fn is_closed(&self) -> bool {
        matches!(self.state, StreamState::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_to_closed_via_both_directions() {
        let mut state = StreamState::Open;
        state = state.on_remote_end_stream();
        assert_eq!(state, StreamState::HalfClosedRemote);
        state = state.on_local_end_stream();
        assert_eq!(state, StreamState::Closed);
    }

    #[test]
    fn new_stream_starts_open_with_full_window() {
        let stream = Stream::new(1, 65_535);
        assert_eq!(stream.state, StreamState::Open);
        assert_eq!(stream.send_window, 65_535);
        assert!(!stream.is_closed());
    }
}
