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

//! HTTP/2 frame header codec, RFC 9113 Section 4.1:
//!
//! ```text
//!  +-----------------------------------------------+
//!  |                 Length (24)                    |
//!  +---------------+---------------+---------------+
//!  |   Type (8)    |   Flags (8)   |
//!  +-+-------------+---------------+-------------------------------+
//!  |R|                 Stream Identifier (31)                      |
//!  +=+=============================================================+
//! ```

use std::fmt;

/// Fixed size, in bytes, of a frame header.
pub const FRAME_HEADER_LEN: usize = 9;

/// Frame type, RFC 9113 Section 6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// 6.1
    Data,
    /// 6.2
    Headers,
    /// 6.3
    Priority,
    /// 6.4
    RstStream,
    /// 6.5
    Settings,
    /// 6.6
    PushPromise,
    /// 6.7
    Ping,
    /// 6.8
    GoAway,
    /// 6.9
    WindowUpdate,
    /// 6.10
    Continuation,
    /// Reserved or vendor-extension frame type; carried through unchanged.
    Unknown(u8),
}

impl FrameType {
    fn from_byte(b: u8) -> Self {
        match b {
            0x0 => Self::Data,
            0x1 => Self::Headers,
            0x2 => Self::Priority,
            0x3 => Self::RstStream,
            0x4 => Self::Settings,
            0x5 => Self::PushPromise,
            0x6 => Self::Ping,
            0x7 => Self::GoAway,
            0x8 => Self::WindowUpdate,
            0x9 => Self::Continuation,
            other => Self::Unknown(other),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Data => 0x0,
            Self::Headers => 0x1,
            Self::Priority => 0x2,
            Self::RstStream => 0x3,
            Self::Settings => 0x4,
            Self::PushPromise => 0x5,
            Self::Ping => 0x6,
            Self::GoAway => 0x7,
            Self::WindowUpdate => 0x8,
            Self::Continuation => 0x9,
            Self::Unknown(b) => b,
        }
    }
}

bitflags::bitflags! {
    /// Frame flags, meaning depends on [`FrameType`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u8 {
        /// END_STREAM (DATA, HEADERS)
        const END_STREAM = 0x1;
        /// END_HEADERS (HEADERS, CONTINUATION) / ACK (SETTINGS, PING)
        const END_HEADERS_OR_ACK = 0x4;
        /// PADDED (DATA, HEADERS)
        const PADDED = 0x8;
        /// PRIORITY (HEADERS)
        const PRIORITY = 0x20;
    }
}

/// Decoded 9-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length; maximum negotiable via SETTINGS_MAX_FRAME_SIZE.
    pub length: u32,
    /// Frame type.
    pub frame_type: FrameType,
    /// Type-specific flags.
    pub flags: Flags,
    /// Stream this frame belongs to; 0 for connection-level frames.
    pub stream_id: u32,
}

impl FrameHeader {
    /// Parses a frame header from the first [`FRAME_HEADER_LEN`] bytes of
    /// `buf`. `buf` must be at least that long.
    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Err(FrameError::Truncated);
        }
        let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
        let frame_type = FrameType::from_byte(buf[3]);
        let flags = Flags::from_bits_truncate(buf[4]);
        let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]) & 0x7fff_ffff;

        Ok(FrameHeader {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Serializes this header to its 9-byte wire form.
    pub fn write_to(&self, out: &mut [u8; FRAME_HEADER_LEN]) {
        let len_bytes = self.length.to_be_bytes();
        out[0] = len_bytes[1];
        out[1] = len_bytes[2];
        out[2] = len_bytes[3];
        out[3] = self.frame_type.as_byte();
        out[4] = self.flags.bits();
        let id_bytes = (self.stream_id & 0x7fff_ffff).to_be_bytes();
        out[5..9].copy_from_slice(&id_bytes);
    }
}

/// A frame header paired with its payload.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Decoded header.
    pub header: FrameHeader,
    /// Raw payload bytes, `header.length` long.
    pub payload: Vec<u8>,
}

/// Failures while decoding or validating a frame against connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes were available than the frame header or declared payload
    /// requires; the caller should buffer more and retry.
    Truncated,
    /// Frame length exceeded the negotiated `SETTINGS_MAX_FRAME_SIZE`.
    FrameSizeExceeded,
    /// A frame referenced stream 0 where a nonzero stream id is mandatory,
    /// or vice versa.
    InvalidStreamId,
    /// A `SETTINGS`/`PING` frame carried the `ACK` flag with a nonempty
    /// payload, or other frame-specific size invariant was violated.
    InvalidFramePayload,
    /// A frame arrived for a stream already closed or never opened.
    StreamClosed,
    /// A HEADERS frame completed without the required `:method`/`:path`
    /// pseudo-headers (RFC 9113 Section 8.3). Stream-scoped: RST_STREAM,
    /// not GOAWAY.
    MissingPseudoHeader,
}

impl FrameError {
    /// `true` if this violates a connection-wide invariant (RFC 9113
    /// mandates `GOAWAY`) rather than one scoped to a single stream
    /// (`RST_STREAM` suffices).
    pub fn is_connection_level(&self) -> bool {
        matches!(
            self,
            FrameError::FrameSizeExceeded | FrameError::InvalidFramePayload
        )
    }
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameError::Truncated => "truncated frame",
            FrameError::FrameSizeExceeded => "frame exceeded negotiated max size",
            FrameError::InvalidStreamId => "invalid stream identifier for frame type",
            FrameError::InvalidFramePayload => "invalid frame payload",
            FrameError::StreamClosed => "frame for closed or unknown stream",
            FrameError::MissingPseudoHeader => "missing required pseudo-header",
        })
    }
}

impl std::error::Error for FrameError {}

/// Attempts to parse one full frame (header + payload) from the front of
/// `buf`. Returns `Ok(None)` if `buf` doesn't yet hold a complete frame.
pub fn parse_frame(buf: &[u8], max_frame_size: u32) -> Result<Option<(Frame, usize)>, FrameError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Ok(None);
    }
    let header = FrameHeader::parse(buf)?;
    if header.length > max_frame_size {
        return Err(FrameError::FrameSizeExceeded);
    }
    let total = FRAME_HEADER_LEN + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }
    let payload = buf[FRAME_HEADER_LEN..total].to_vec();
    Ok(Some((Frame { header, payload }, total)))
}
