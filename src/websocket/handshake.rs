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

//! WebSocket opening handshake, RFC 6455 Section 1.3 / 4.2.2.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha1::{Digest, Sha1};

/// The magic GUID concatenated to `Sec-WebSocket-Key` before hashing.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client's
/// `Sec-WebSocket-Key` header.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    BASE64.encode(hasher.finalize())
}

/// `true` if `headers` carry the upgrade request a WebSocket handshake
/// requires: a `Sec-WebSocket-Key` and `Sec-WebSocket-Version: 13`. Caller
/// is expected to have already checked `Upgrade: websocket` via
/// [`crate::discriminator::is_websocket_upgrade`].
pub fn is_valid_handshake<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Option<&'a str> {
    let mut key = None;
    let mut version_ok = false;
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("sec-websocket-key") {
            key = Some(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-version") {
            version_ok = value.trim() == "13";
        }
    }
    if version_ok {
        key
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc6455_example() {
        // RFC 6455 Section 1.3 worked example.
        let accept = accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn valid_handshake_requires_version_13() {
        let headers = [("Sec-WebSocket-Key", "abc"), ("Sec-WebSocket-Version", "8")];
        assert_eq!(is_valid_handshake(headers), None);
    }

    #[test]
    fn valid_handshake_extracts_key() {
        let headers = [("Sec-WebSocket-Key", "abc"), ("Sec-WebSocket-Version", "13")];
        assert_eq!(is_valid_handshake(headers), Some("abc"));
    }
}
