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

//! Owned, fully-buffered HTTP/1.1 request, built on top of the zero-copy
//! [`crate::parser::h1::request::H1Request`] once the full head and body are
//! available in the connection's read buffer.

use super::body::{body_length, BodyLength, ChunkedDecoder};
use crate::parser::h1::request::H1Request;
use crate::parser::h1::ParseError;
use crate::parser::{Method, Version};

/// A complete request: request line, headers, and body, all owned so it can
/// outlive the buffer it was parsed from.
#[derive(Debug, Clone)]
pub struct Request {
    /// Request method.
    pub method: Method,
    /// Request target, as sent on the wire (origin-form path in the common
    /// case).
    pub target: String,
    /// Declared HTTP version.
    pub version: Version,
    /// Headers in wire order.
    pub headers: Vec<(String, String)>,
    /// Fully assembled body, decoded if chunked.
    pub body: Vec<u8>,
}

impl Request {
    /// Returns the first header matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Finds the byte offset just past the header section's terminating blank
/// line, or `None` if `buf` doesn't contain one yet.
fn head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Attempts to parse one complete request (head plus body) from the front of
/// `buf`. Returns `Ok(None)` when more bytes are needed — either the header
/// section or a `Content-Length`/chunked body isn't fully buffered yet.
pub fn try_parse(buf: &[u8]) -> Result<Option<(Request, usize)>, ParseError> {
    let Some(head_len) = head_end(buf) else {
        return Ok(None);
    };

    let mut h1 = H1Request::new();
    h1.parse(&buf[..head_len])?;

    let method = h1.method.ok_or(ParseError::Method)?;
    let target = h1.target.ok_or(ParseError::Target)?.to_string();
    let version = h1.version.ok_or(ParseError::Version)?;
    let headers: Vec<(String, String)> = h1
        .headers
        .iter()
        .map(|h| (h.name.to_string(), h.value.to_string()))
        .collect();

    let length = body_length(h1.headers.iter().map(|h| (h.name, h.value)))?;
    drop(h1);

    match length {
        BodyLength::None => Ok(Some((
            Request {
                method,
                target,
                version,
                headers,
                body: Vec::new(),
            },
            head_len,
        ))),
        BodyLength::Fixed(n) => {
            if buf.len() - head_len < n {
                return Ok(None);
            }
            let body = buf[head_len..head_len + n].to_vec();
            Ok(Some((
                Request {
                    method,
                    target,
                    version,
                    headers,
                    body,
                },
                head_len + n,
            )))
        }
        BodyLength::Chunked => {
            let mut decoder = ChunkedDecoder::new();
            let consumed = decoder.feed(&buf[head_len..])?;
            if !decoder.is_done() {
                return Ok(None);
            }
            Ok(Some((
                Request {
                    method,
                    target,
                    version,
                    headers,
                    body: decoder.body().to_vec(),
                },
                head_len + consumed,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn waits_for_full_headers() {
        assert_eq!(try_parse(b"GET / HTTP/1.1\r\nHost: x").unwrap(), None);
    }

    #[test]
    fn parses_request_with_no_body() {
        let (req, consumed) = try_parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").unwrap().unwrap();
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.target, "/");
        assert_eq!(consumed, "GET / HTTP/1.1\r\nHost: x\r\n\r\n".len());
        assert!(req.body.is_empty());
    }

    #[test]
    fn waits_for_full_fixed_body() {
        let head = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n";
        assert_eq!(try_parse(head).unwrap(), None);
    }

    #[test]
    fn parses_request_with_fixed_body() {
        let mut buf = b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\n".to_vec();
        buf.extend_from_slice(b"hello");
        let (req, consumed) = try_parse(&buf).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn parses_request_with_chunked_body() {
        let mut buf = b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        buf.extend_from_slice(b"5\r\nhello\r\n0\r\n\r\n");
        let (req, consumed) = try_parse(&buf).unwrap().unwrap();
        assert_eq!(req.body, b"hello");
        assert_eq!(consumed, buf.len());
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let (req, _) = try_parse(b"GET / HTTP/1.1\r\nHost: example\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(req.header("HOST"), Some("example"));
    }
}
