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

//! Header (de)compression seam.
//!
//! RFC 9113 mandates HPACK (RFC 7541), which maintains a dynamic table
//! shared across a connection's HEADERS/CONTINUATION frames. This engine
//! instead encodes headers as plain `name:value\0`-delimited pairs behind
//! the [`HeaderCodec`] trait, so a real HPACK codec can be dropped in later
//! without changing callers.

use std::fmt;

/// A decoded header list, in wire order.
pub type HeaderList = Vec<(String, String)>;

/// Failures while encoding or decoding a header block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCodecError {
    /// The block ended mid-field.
    Truncated,
    /// A header name or value contained a byte the codec can't represent.
    InvalidEncoding,
}

impl fmt::Display for HeaderCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HeaderCodecError::Truncated => "truncated header block",
            HeaderCodecError::InvalidEncoding => "invalid header encoding",
        })
    }
}

impl std::error::Error for HeaderCodecError {}

/// Encodes and decodes the header block carried by HEADERS/CONTINUATION
/// frames. Implementations may keep per-connection state (as HPACK's
/// dynamic table does); callers must use one codec instance per connection.
pub trait HeaderCodec {
    /// Encodes `headers` into a single contiguous block.
    fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8>;

    /// Decodes a complete header block (the concatenation of a HEADERS
    /// frame's fragment with any CONTINUATION fragments).
    fn decode(&mut self, block: &[u8]) -> Result<HeaderList, HeaderCodecError>;
}

/// `name:value\0`-delimited header codec. Carries no cross-call state: each
/// block is self-describing, at the cost of the compression HPACK provides.
#[derive(Debug, Default)]
pub struct SimpleHeaderCodec;

impl HeaderCodec for SimpleHeaderCodec {
    fn encode(&mut self, headers: &[(String, String)]) -> Vec<u8> {
        let mut out = Vec::new();
        for (name, value) in headers {
            out.extend_from_slice(name.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
            out.push(0);
        }
        out
    }

    fn decode(&mut self, block: &[u8]) -> Result<HeaderList, HeaderCodecError> {
        let mut headers = Vec::new();
        for field in block.split(|&b| b == 0) {
            if field.is_empty() {
                continue;
            }
            let sep = field
                .iter()
                .position(|&b| b == b':')
                .ok_or(HeaderCodecError::Truncated)?;
            let name = std::str::from_utf8(&field[..sep])
                .map_err(|_| HeaderCodecError::InvalidEncoding)?;
            let value = std::str::from_utf8(&field[sep + 1..])
                .map_err(|_| HeaderCodecError::InvalidEncoding)?;
            headers.push((name.to_string(), value.to_string()));
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_list() {
        let mut codec = SimpleHeaderCodec;
        let headers = vec![
            (":method".to_string(), "GET".to_string()),
            (":path".to_string(), "/".to_string()),
        ];
        let encoded = codec.encode(&headers);
        let decoded = codec.decode(&encoded).unwrap();
        assert_eq!(decoded, headers);
    }

    #[test]
    fn rejects_field_without_colon() {
        let mut codec = SimpleHeaderCodec;
        assert_eq!(
            codec.decode(b"no-colon-here\0"),
            Err(HeaderCodecError::Truncated)
        );
    }
}
