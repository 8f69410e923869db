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

//! Connection-level HTTP/2 engine: turns bytes into decoded frames (via
//! [`super::frame::parse_frame`]), negotiates `SETTINGS`, and dispatches
//! frames into the stream table. Transport I/O (reading the socket, writing
//! the reply bytes) is the caller's job — this type is pure state transition.

use tracing::{debug, trace, warn};

use super::frame::{parse_frame, Flags, Frame, FrameError, FrameHeader, FrameType, FRAME_HEADER_LEN};
use super::header_codec::{HeaderCodec, HeaderList, SimpleHeaderCodec};
use super::multiplexer::Multiplexer;
use super::settings::Settings;
use super::stream::StreamState;

/// Connection preface a client must send before any frames, RFC 9113 3.4.
/// The [`crate::discriminator`] already consumes this to classify the
/// connection as HTTP/2; this engine starts reading right after it.
pub const CLIENT_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// A fully-received request, ready to hand to the router.
#[derive(Debug)]
pub struct RequestEvent {
    /// Stream the request arrived on; the eventual response must be sent on
    /// the same id.
    pub stream_id: u32,
    /// Decoded pseudo- and regular headers, in wire order.
    pub headers: HeaderList,
    /// Body bytes accumulated from `DATA` frames.
    pub body: Vec<u8>,
}

/// Per-connection HTTP/2 state machine.
pub struct H2Connection {
    local_settings: Settings,
    peer_settings: Settings,
    streams: Multiplexer,
    codec: SimpleHeaderCodec,
    local_settings_sent: bool,
    goaway_sent: bool,
    /// Stream id a HEADERS frame without `END_HEADERS` is waiting on
    /// CONTINUATION frames for. RFC 9113 6.10: no other frame may be
    /// interleaved until the header block completes.
    header_block_stream: Option<u32>,
}

impl Default for H2Connection {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl H2Connection {
    /// Creates a new connection that will advertise `local_settings` once
    /// [`Self::initial_frames`] is written.
    pub fn new(local_settings: Settings) -> Self {
        let max_concurrent = local_settings.max_concurrent_streams.min(4096);
        H2Connection {
            local_settings,
            peer_settings: Settings::default(),
            streams: Multiplexer::new(max_concurrent),
            codec: SimpleHeaderCodec,
            local_settings_sent: false,
            goaway_sent: false,
            header_block_stream: None,
        }
    }

    /// The bytes to write immediately after the client preface is consumed:
    /// our initial `SETTINGS` frame.
    pub fn initial_frames(&mut self) -> Vec<u8> {
        self.local_settings_sent = true;
        settings_frame(&self.local_settings, false)
    }

    /// Consumes as many complete frames as `input` holds, applying each to
    /// connection state. Returns the number of bytes consumed, any bytes
    /// that must be written back to the peer (SETTINGS ACK, PING ACK,
    /// RST_STREAM, ...), and any requests that completed.
    ///
    /// A stream-scoped error (RFC 9113's RST_STREAM cases) resets that
    /// stream and keeps the connection going; only a connection-level error
    /// (per [`FrameError::is_connection_level`]) aborts `receive` itself, so
    /// the caller can GOAWAY and tear down every stream at once.
    pub fn receive(&mut self, input: &[u8]) -> Result<(usize, Vec<u8>, Vec<RequestEvent>), FrameError> {
        let mut consumed = 0;
        let mut out = Vec::new();
        let mut events = Vec::new();

        loop {
            let remaining = &input[consumed..];
            match parse_frame(remaining, self.local_settings.max_frame_size)? {
                None => break,
                Some((frame, len)) => {
                    consumed += len;
                    self.streams.tick();
                    let stream_id = frame.header.stream_id;
                    match self.dispatch(frame, &mut out) {
                        Ok(Some(event)) => events.push(event),
                        Ok(None) => {}
                        Err(e) if !e.is_connection_level() => out.extend(self.rst_stream(stream_id, e)),
                        Err(e) => return Err(e),
                    }
                }
            }
        }

        Ok((consumed, out, events))
    }

    fn dispatch(&mut self, frame: Frame, out: &mut Vec<u8>) -> Result<Option<RequestEvent>, FrameError> {
        trace!(frame_type = ?frame.header.frame_type, stream_id = frame.header.stream_id, len = frame.payload.len(), "h2 frame");
        if let Some(expected) = self.header_block_stream {
            if !matches!(frame.header.frame_type, FrameType::Continuation) || frame.header.stream_id != expected {
                return Err(FrameError::InvalidFramePayload);
            }
        }
        match frame.header.frame_type {
            FrameType::Settings => self.on_settings(frame, out),
            FrameType::Headers => self.on_headers(frame),
            FrameType::Continuation => self.on_continuation(frame),
            FrameType::Data => Ok(self.on_data(frame)?),
            FrameType::WindowUpdate => self.on_window_update(frame),
            FrameType::RstStream => self.on_rst_stream(frame),
            FrameType::Ping => self.on_ping(frame, out),
            FrameType::GoAway => {
                debug!("peer sent GOAWAY");
                Ok(None)
            }
            FrameType::Priority => Ok(None), // scheduling by priority is not implemented
            FrameType::PushPromise => Err(FrameError::InvalidFramePayload), // server never receives these
            FrameType::Unknown(id) => {
                warn!(frame_type = id, "ignoring unknown h2 frame type");
                Ok(None)
            }
        }
    }

    fn on_settings(&mut self, frame: Frame, out: &mut Vec<u8>) -> Result<Option<RequestEvent>, FrameError> {
        if frame.header.stream_id != 0 {
            return Err(FrameError::InvalidStreamId);
        }
        if frame.header.flags.contains(Flags::END_HEADERS_OR_ACK) {
            if !frame.payload.is_empty() {
                return Err(FrameError::InvalidFramePayload);
            }
            debug!("peer acked our SETTINGS");
            return Ok(None);
        }
        self.peer_settings.apply_payload(&frame.payload)?;
        out.extend(settings_frame(&Settings::default(), true));
        Ok(None)
    }

    fn on_headers(&mut self, frame: Frame) -> Result<Option<RequestEvent>, FrameError> {
        if frame.header.stream_id == 0 {
            return Err(FrameError::InvalidStreamId);
        }

        let fragment = strip_padding(&frame.payload, frame.header.flags)?;
        let end_headers = frame.header.flags.contains(Flags::END_HEADERS_OR_ACK);
        let end_stream = frame.header.flags.contains(Flags::END_STREAM);

        let stream = self
            .streams
            .open(frame.header.stream_id, self.local_settings.initial_window_size)?;
        stream.pending_header_block.extend_from_slice(fragment);
        stream.end_stream_after_headers = end_stream;

        if !end_headers {
            self.header_block_stream = Some(frame.header.stream_id);
            return Ok(None);
        }
        self.finish_headers(frame.header.stream_id)
    }

    /// A HEADERS frame without `END_HEADERS` arrived; this frame is the
    /// CONTINUATION (possibly one of several) completing that header block.
    fn on_continuation(&mut self, frame: Frame) -> Result<Option<RequestEvent>, FrameError> {
        // dispatch() already verified stream_id matches header_block_stream
        // and that no other frame type interleaved.
        let end_headers = frame.header.flags.contains(Flags::END_HEADERS_OR_ACK);
        let stream = self
            .streams
            .get_mut(frame.header.stream_id)
            .ok_or(FrameError::StreamClosed)?;
        stream.pending_header_block.extend_from_slice(&frame.payload);

        if !end_headers {
            return Ok(None);
        }
        self.finish_headers(frame.header.stream_id)
    }

    /// Decodes the accumulated header block for `stream_id` now that
    /// `END_HEADERS` has arrived, either on the original HEADERS frame or
    /// the CONTINUATION that completed it.
    fn finish_headers(&mut self, stream_id: u32) -> Result<Option<RequestEvent>, FrameError> {
        self.header_block_stream = None;

        let stream = self.streams.get_mut(stream_id).ok_or(FrameError::StreamClosed)?;
        let block = std::mem::take(&mut stream.pending_header_block);
        let headers = self.codec.decode(&block).map_err(|_| FrameError::InvalidFramePayload)?;
        stream.headers = headers;
        let end_stream = stream.end_stream_after_headers;

        if end_stream {
            stream.state = stream.state.on_remote_end_stream();
            return Ok(Some(RequestEvent {
                stream_id,
                headers: stream.headers.clone(),
                body: std::mem::take(&mut stream.body),
            }));
        }
        Ok(None)
    }

    fn on_data(&mut self, frame: Frame) -> Result<Option<RequestEvent>, FrameError> {
        let stream = self
            .streams
            .get_mut(frame.header.stream_id)
            .ok_or(FrameError::StreamClosed)?;
        if stream.is_closed() {
            return Err(FrameError::StreamClosed);
        }

        let body = strip_padding(&frame.payload, frame.header.flags)?;
        stream.body.extend_from_slice(body);

        if frame.header.flags.contains(Flags::END_STREAM) {
            stream.state = stream.state.on_remote_end_stream();
            return Ok(Some(RequestEvent {
                stream_id: frame.header.stream_id,
                headers: stream.headers.clone(),
                body: std::mem::take(&mut stream.body),
            }));
        }
        Ok(None)
    }

    fn on_window_update(&mut self, frame: Frame) -> Result<Option<RequestEvent>, FrameError> {
        if frame.payload.len() != 4 {
            return Err(FrameError::InvalidFramePayload);
        }
        let increment = u32::from_be_bytes(frame.payload[..4].try_into().unwrap()) & 0x7fff_ffff;
        if frame.header.stream_id != 0 {
            if let Some(stream) = self.streams.get_mut(frame.header.stream_id) {
                stream.send_window += increment as i64;
            }
        }
        Ok(None)
    }

    fn on_rst_stream(&mut self, frame: Frame) -> Result<Option<RequestEvent>, FrameError> {
        if frame.payload.len() != 4 {
            return Err(FrameError::InvalidFramePayload);
        }
        if let Some(stream) = self.streams.get_mut(frame.header.stream_id) {
            stream.state = StreamState::Closed;
        }
        Ok(None)
    }

    fn on_ping(&mut self, frame: Frame, out: &mut Vec<u8>) -> Result<Option<RequestEvent>, FrameError> {
        if frame.header.stream_id != 0 || frame.payload.len() != 8 {
            return Err(FrameError::InvalidFramePayload);
        }
        if !frame.header.flags.contains(Flags::END_HEADERS_OR_ACK) {
            let header = FrameHeader {
                length: 8,
                frame_type: FrameType::Ping,
                flags: Flags::END_HEADERS_OR_ACK,
                stream_id: 0,
            };
            let mut wire = [0u8; FRAME_HEADER_LEN];
            header.write_to(&mut wire);
            out.extend_from_slice(&wire);
            out.extend_from_slice(&frame.payload);
        }
        Ok(None)
    }

    /// Encodes a response's headers and body as `HEADERS` (+ `DATA`) frames
    /// for `stream_id`, ending the local side of the stream.
    pub fn encode_response(&mut self, stream_id: u32, headers: &[(String, String)], body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let block = self.codec.encode(headers);
        let headers_header = FrameHeader {
            length: block.len() as u32,
            frame_type: FrameType::Headers,
            flags: if body.is_empty() {
                Flags::END_HEADERS_OR_ACK | Flags::END_STREAM
            } else {
                Flags::END_HEADERS_OR_ACK
            },
            stream_id,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        headers_header.write_to(&mut wire);
        out.extend_from_slice(&wire);
        out.extend_from_slice(&block);

        if !body.is_empty() {
            let data_header = FrameHeader {
                length: body.len() as u32,
                frame_type: FrameType::Data,
                flags: Flags::END_STREAM,
                stream_id,
            };
            let mut wire = [0u8; FRAME_HEADER_LEN];
            data_header.write_to(&mut wire);
            out.extend_from_slice(&wire);
            out.extend_from_slice(body);
        }

        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.state = stream.state.on_local_end_stream();
        }
        out
    }

    /// Resets a single stream with `error`, leaving the rest of the
    /// connection untouched. Used for stream-scoped failures (missing
    /// pseudo-headers, a frame for an already-closed stream, ...) where RFC
    /// 9113 calls for RST_STREAM rather than tearing down the connection.
    pub fn rst_stream(&mut self, stream_id: u32, error: FrameError) -> Vec<u8> {
        if let Some(stream) = self.streams.get_mut(stream_id) {
            stream.state = StreamState::Closed;
        }

        let payload = (error as u32).to_be_bytes();
        let header = FrameHeader {
            length: payload.len() as u32,
            frame_type: FrameType::RstStream,
            flags: Flags::empty(),
            stream_id,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        header.write_to(&mut wire);
        let mut out = wire.to_vec();
        out.extend_from_slice(&payload);
        out
    }

    /// Sends `GOAWAY` to the peer and marks this connection as draining.
    /// Idempotent: a second call is a no-op.
    pub fn goaway(&mut self, last_stream_id: u32, error: FrameError) -> Vec<u8> {
        if self.goaway_sent {
            return Vec::new();
        }
        self.goaway_sent = true;

        let mut payload = Vec::with_capacity(8);
        payload.extend_from_slice(&(last_stream_id & 0x7fff_ffff).to_be_bytes());
        payload.extend_from_slice(&(error as u32).to_be_bytes());

        let header = FrameHeader {
            length: payload.len() as u32,
            frame_type: FrameType::GoAway,
            flags: Flags::empty(),
            stream_id: 0,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        header.write_to(&mut wire);
        let mut out = wire.to_vec();
        out.extend_from_slice(&payload);
        out
    }
}

fn settings_frame(settings: &Settings, ack: bool) -> Vec<u8> {
    let mut payload = Vec::new();
    if !ack {
        push_setting(&mut payload, 0x3, settings.max_concurrent_streams);
        push_setting(&mut payload, 0x4, settings.initial_window_size);
        push_setting(&mut payload, 0x5, settings.max_frame_size);
    }
    let header = FrameHeader {
        length: payload.len() as u32,
        frame_type: FrameType::Settings,
        flags: if ack { Flags::END_HEADERS_OR_ACK } else { Flags::empty() },
        stream_id: 0,
    };
    let mut wire = [0u8; FRAME_HEADER_LEN];
    header.write_to(&mut wire);
    let mut out = wire.to_vec();
    out.extend_from_slice(&payload);
    out
}

fn push_setting(payload: &mut Vec<u8>, id: u16, value: u32) {
    payload.extend_from_slice(&id.to_be_bytes());
    payload.extend_from_slice(&value.to_be_bytes());
}

/// Strips the padding `DATA`/`HEADERS` frames may carry (RFC 9113 6.1/6.2):
/// a 1-byte pad length prefix followed by that many trailing padding bytes.
/// Priority fields (also optional on HEADERS) are not supported and are
/// rejected rather than silently misparsed.
fn strip_padding(payload: &[u8], flags: Flags) -> Result<&[u8], FrameError> {
    if flags.contains(Flags::PRIORITY) {
        return Err(FrameError::InvalidFramePayload);
    }
    if !flags.contains(Flags::PADDED) {
        return Ok(payload);
    }
    let pad_len = *payload.first().ok_or(FrameError::InvalidFramePayload)? as usize;
    let body = &payload[1..];
    if pad_len > body.len() {
        return Err(FrameError::InvalidFramePayload);
    }
    Ok(&body[..body.len() - pad_len])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_frame(stream_id: u32, block: &[u8], end_stream: bool) -> Vec<u8> {
        let flags = if end_stream {
            Flags::END_HEADERS_OR_ACK | Flags::END_STREAM
        } else {
            Flags::END_HEADERS_OR_ACK
        };
        let header = FrameHeader {
            length: block.len() as u32,
            frame_type: FrameType::Headers,
            flags,
            stream_id,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        header.write_to(&mut wire);
        let mut out = wire.to_vec();
        out.extend_from_slice(block);
        out
    }

    #[test]
    fn initial_frames_emits_settings() {
        let mut conn = H2Connection::default();
        let out = conn.initial_frames();
        let (frame, _) = parse_frame(&out, 16_384).unwrap().unwrap();
        assert_eq!(frame.header.frame_type, FrameType::Settings);
        assert!(!frame.header.flags.contains(Flags::END_HEADERS_OR_ACK));
    }

    #[test]
    fn settings_ack_round_trip() {
        let mut conn = H2Connection::default();
        let settings = settings_frame(&Settings::default(), false);
        let (_, out, events) = conn.receive(&settings).unwrap();
        assert!(events.is_empty());
        let (frame, _) = parse_frame(&out, 16_384).unwrap().unwrap();
        assert_eq!(frame.header.frame_type, FrameType::Settings);
        assert!(frame.header.flags.contains(Flags::END_HEADERS_OR_ACK));
    }

    #[test]
    fn headers_with_end_stream_yields_request_event() {
        let mut conn = H2Connection::default();
        let mut codec = SimpleHeaderCodec;
        let block = codec.encode(&[
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/".to_string()),
        ]);
        let frame = header_frame(1, &block, true);

        let (consumed, _out, events) = conn.receive(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].stream_id, 1);
        assert_eq!(events[0].headers[0].1, "GET");
    }

    #[test]
    fn headers_then_data_accumulates_body_before_event() {
        let mut conn = H2Connection::default();
        let mut codec = SimpleHeaderCodec;
        let block = codec.encode(&[(":method".to_string(), "POST".to_string())]);
        let mut input = header_frame(1, &block, false);

        let data_header = FrameHeader {
            length: 5,
            frame_type: FrameType::Data,
            flags: Flags::END_STREAM,
            stream_id: 1,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        data_header.write_to(&mut wire);
        input.extend_from_slice(&wire);
        input.extend_from_slice(b"hello");

        let (_, _, events) = conn.receive(&input).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].body, b"hello");
    }

    #[test]
    fn ping_without_ack_is_echoed() {
        let mut conn = H2Connection::default();
        let header = FrameHeader {
            length: 8,
            frame_type: FrameType::Ping,
            flags: Flags::empty(),
            stream_id: 0,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        header.write_to(&mut wire);
        let mut input = wire.to_vec();
        input.extend_from_slice(b"12345678");

        let (_, out, _) = conn.receive(&input).unwrap();
        let (frame, _) = parse_frame(&out, 16_384).unwrap().unwrap();
        assert_eq!(frame.header.frame_type, FrameType::Ping);
        assert!(frame.header.flags.contains(Flags::END_HEADERS_OR_ACK));
        assert_eq!(frame.payload, b"12345678");
    }

    #[test]
    fn data_on_unknown_stream_resets_only_that_stream() {
        let mut conn = H2Connection::default();
        let header = FrameHeader {
            length: 1,
            frame_type: FrameType::Data,
            flags: Flags::empty(),
            stream_id: 7,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        header.write_to(&mut wire);
        let mut input = wire.to_vec();
        input.push(b'x');

        let (consumed, out, events) = conn.receive(&input).unwrap();
        assert_eq!(consumed, input.len());
        assert!(events.is_empty());
        let (frame, _) = parse_frame(&out, 16_384).unwrap().unwrap();
        assert_eq!(frame.header.frame_type, FrameType::RstStream);
        assert_eq!(frame.header.stream_id, 7);
    }

    #[test]
    fn headers_split_across_continuation_frames_yields_request_event() {
        let mut conn = H2Connection::default();
        let mut codec = SimpleHeaderCodec;
        let block = codec.encode(&[
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/".to_string()),
        ]);
        let (first_half, second_half) = block.split_at(block.len() / 2);

        let headers_header = FrameHeader {
            length: first_half.len() as u32,
            frame_type: FrameType::Headers,
            flags: Flags::END_STREAM,
            stream_id: 1,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        headers_header.write_to(&mut wire);
        let mut input = wire.to_vec();
        input.extend_from_slice(first_half);

        let continuation_header = FrameHeader {
            length: second_half.len() as u32,
            frame_type: FrameType::Continuation,
            flags: Flags::END_HEADERS_OR_ACK,
            stream_id: 1,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        continuation_header.write_to(&mut wire);
        input.extend_from_slice(&wire);
        input.extend_from_slice(second_half);

        let (consumed, _out, events) = conn.receive(&input).unwrap();
        assert_eq!(consumed, input.len());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].headers[0].1, "GET");
    }

    #[test]
    fn frame_interleaved_mid_header_block_is_a_connection_error() {
        let mut conn = H2Connection::default();
        let mut codec = SimpleHeaderCodec;
        let block = codec.encode(&[(":method".to_string(), "GET".to_string())]);

        let headers_header = FrameHeader {
            length: block.len() as u32,
            frame_type: FrameType::Headers,
            flags: Flags::empty(),
            stream_id: 1,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        headers_header.write_to(&mut wire);
        let mut input = wire.to_vec();
        input.extend_from_slice(&block);

        let ping_header = FrameHeader {
            length: 8,
            frame_type: FrameType::Ping,
            flags: Flags::empty(),
            stream_id: 0,
        };
        let mut wire = [0u8; FRAME_HEADER_LEN];
        ping_header.write_to(&mut wire);
        input.extend_from_slice(&wire);
        input.extend_from_slice(b"12345678");

        assert_eq!(conn.receive(&input).unwrap_err(), FrameError::InvalidFramePayload);
    }

    #[test]
    fn encode_response_closes_local_side() {
        let mut conn = H2Connection::default();
        let mut codec = SimpleHeaderCodec;
        let block = codec.encode(&[(":method".to_string(), "GET".to_string())]);
        conn.receive(&header_frame(1, &block, true)).unwrap();

        let out = conn.encode_response(1, &[(":status".to_string(), "200".to_string())], b"ok");
        assert!(!out.is_empty());
        assert!(conn.streams.get_mut(1).unwrap().is_closed());
    }
}
