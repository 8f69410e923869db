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

//! HTTP/1.1 request-line and header parsing.

use core::str::from_utf8_unchecked;

use super::tokens::is_request_target_token;
use super::{parse_header, take_after_newline, Header, ParseError};
use crate::parser::raw_request::RawRequest;
use crate::parser::{Method, Version};

/// Maximum number of headers retained per request; excess headers are a
/// parse error rather than silently dropped.
pub const MAX_HEADERS: usize = 64;

/// Request line and headers of an HTTP/1.1 request, borrowed from the
/// connection's read buffer. Body bytes are handled separately by
/// [`crate::http1`] once `Content-Length`/`Transfer-Encoding` is known.
#[derive(Debug, Default)]
pub struct H1Request<'buf> {
    /// Request method.
    pub method: Option<Method>,
    /// Request target (origin-form path, typically).
    pub target: Option<&'buf str>,
    /// HTTP version declared on the request line.
    pub version: Option<Version>,
    /// Headers in wire order, including duplicates.
    pub headers: Vec<Header<'buf>>,
}

impl<'b> H1Request<'b> {
    /// Creates an empty, unparsed request.
    pub fn new() -> Self {
        H1Request {
            method: None,
            target: None,
            version: None,
            headers: Vec::new(),
        }
    }

    /// Parses a request line and header section from `buf`. `buf` must
    /// contain at least the full header section (through the blank line
    /// terminating it); the caller is responsible for buffering until then.
    ///
    /// # Example
    /// ```
    /// # use rask_gateway::parser::{Method, Version};
    /// # use rask_gateway::parser::h1::ParseError;
    /// # use rask_gateway::parser::h1::request::H1Request;
    /// # fn main() -> Result<(), ParseError> {
    /// let mut req = H1Request::new();
    /// req.parse(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n")?;
    /// assert_eq!(Some(Method::Get), req.method);
    /// assert_eq!(Some("/"), req.target);
    /// assert_eq!(Some(Version::H1_1), req.version);
    /// # Ok(())
    /// # }
    /// ```
    pub fn parse(&mut self, buf: &'b [u8]) -> Result<(), ParseError> {
        let mut req = RawRequest::new(buf);
        self.set_method(&mut req)?;
        self.set_target(&mut req)?;
        self.set_version(&mut req)?;
        take_after_newline(&mut req)?;
        self.set_headers(&mut req)?;
        Ok(())
    }

    fn set_method(&mut self, buf: &mut RawRequest<'b>) -> Result<(), ParseError> {
        let slice = buf.take_until(|b| b == b' ').ok_or(ParseError::Method)?;
        let method = Method::from_bytes(slice).ok_or(ParseError::Method)?;
        buf.next(); // consume the space
        buf.slice();
        self.method = Some(method);
        Ok(())
    }

    fn set_target(&mut self, buf: &mut RawRequest<'b>) -> Result<(), ParseError> {
        let slice = buf
            .take_until(|b| b == b' ' || !is_request_target_token(b))
            .ok_or(ParseError::Target)?;
        if buf.peek() != Some(b' ') {
            return Err(ParseError::Target);
        }
        buf.next();
        buf.slice();
        // SAFETY: every byte in `slice` passed `is_request_target_token`,
        // which excludes all non-ASCII and control bytes.
        self.target = Some(unsafe { from_utf8_unchecked(slice) });
        Ok(())
    }

    fn set_version(&mut self, buf: &mut RawRequest<'b>) -> Result<(), ParseError> {
        let slice = buf.take_until(|b| b == b'\r').ok_or(ParseError::Version)?;
        let version = match slice {
            b"HTTP/1.0" => Version::H1_0,
            b"HTTP/1.1" => Version::H1_1,
            _ => return Err(ParseError::Version),
        };
        self.version = Some(version);
        Ok(())
    }

    fn set_headers(&mut self, buf: &mut RawRequest<'b>) -> Result<(), ParseError> {
        loop {
            match parse_header(buf)? {
                Some(header) => {
                    if self.headers.len() >= MAX_HEADERS {
                        return Err(ParseError::TooManyHeaders);
                    }
                    self.headers.push(header);
                }
                None => return Ok(()),
            }
        }
    }

    /// Returns the first header matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_request_with_no_headers() {
        let mut req = H1Request::new();
        req.parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!(req.method, Some(Method::Get));
        assert_eq!(req.target, Some("/"));
        assert_eq!(req.version, Some(Version::H1_1));
        assert!(req.headers.is_empty());
    }

    #[test]
    fn parses_headers_in_wire_order() {
        let mut req = H1Request::new();
        req.parse(b"POST /submit HTTP/1.1\r\nHost: a\r\nContent-Length: 4\r\n\r\n")
            .unwrap();
        assert_eq!(req.headers.len(), 2);
        assert_eq!(req.header("host"), Some("a"));
        assert_eq!(req.header("content-length"), Some("4"));
    }

    #[test]
    fn rejects_unknown_method() {
        let mut req = H1Request::new();
        assert_eq!(
            req.parse(b"FROB / HTTP/1.1\r\n\r\n"),
            Err(ParseError::Method)
        );
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut req = H1Request::new();
        assert_eq!(
            req.parse(b"GET / HTTP/0.9\r\n\r\n"),
            Err(ParseError::Version)
        );
    }
}
