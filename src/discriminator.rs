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

//! Protocol discriminator: classifies a freshly-accepted connection by
//! peeking bytes off the socket without consuming them, so the eventual
//! parser still sees the full byte stream from offset zero.

use std::io;

/// Protocol family detected on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// HTTP/1.1, upgradeable to WebSocket once headers are parsed.
    Http1,
    /// HTTP/2 cleartext, identified by the connection preface.
    Http2,
    /// Not enough bytes have arrived yet to classify the connection.
    Unknown,
}

const H2_PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Peeks at a readable socket-like source and classifies the protocol, never
/// advancing its read position.
///
/// `peek` must behave like `TcpStream::peek`: repeated calls with the same
/// (or a larger) buffer return the same leading bytes until a `read` call
/// actually consumes them.
pub fn classify<F>(mut peek: F) -> io::Result<Protocol>
where
    F: FnMut(&mut [u8]) -> io::Result<usize>,
{
    let mut buf = [0u8; 24];
    let n = peek(&mut buf)?;

    if n >= H2_PREFACE.len() && &buf[..H2_PREFACE.len()] == H2_PREFACE {
        return Ok(Protocol::Http2);
    }

    if n >= H2_PREFACE.len() {
        // Enough bytes to have matched the preface and didn't; anything that
        // starts with a request line is HTTP/1.1 (the only other protocol
        // this gateway terminates directly — WebSocket rides in as an
        // HTTP/1.1 Upgrade).
        return Ok(Protocol::Http1);
    }

    // Fewer bytes than the full preface: if what we have diverges from the
    // preface already, it can only be HTTP/1.1; otherwise wait for more.
    if buf[..n] != H2_PREFACE[..n] {
        return Ok(Protocol::Http1);
    }

    Ok(Protocol::Unknown)
}

/// `true` if `headers` (name, value) pairs indicate a WebSocket upgrade
/// request per RFC 6455 Section 4.2.1.
pub fn is_websocket_upgrade<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> bool {
    let mut has_upgrade_websocket = false;
    let mut has_connection_upgrade = false;

    for (name, value) in headers {
        if name.eq_ignore_ascii_case("upgrade") && value.eq_ignore_ascii_case("websocket") {
            has_upgrade_websocket = true;
        }
        if name.eq_ignore_ascii_case("connection")
            && value.split(',').any(|tok| tok.trim().eq_ignore_ascii_case("upgrade"))
        {
            has_connection_upgrade = true;
        }
    }

    has_upgrade_websocket && has_connection_upgrade
}
