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

//! Zero-copy HTTP/1.1 request-line and header parsing.

use core::fmt::Display;

use super::raw_request::RawRequest;
use tokens::is_header_value_token;

pub mod request;
pub mod response;
mod tokens;

/// A single borrowed `name: value` header pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header<'a> {
    /// Header field name, lowercased by the caller before comparison.
    pub name: &'a str,
    /// Header field value, with leading/trailing optional whitespace stripped.
    pub value: &'a str,
}

/// Possible failures while parsing an HTTP/1.1 message.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    /// Invalid byte in method.
    Method,
    /// Invalid byte in target.
    Target,
    /// Invalid HTTP version.
    Version,
    /// Invalid byte in header name.
    HeaderName,
    /// Invalid byte in header value.
    HeaderValue,
    /// Invalid or missing new line.
    NewLine,
    /// Invalid whitespace.
    Whitespace,
    /// Header section exceeded the configured size cap.
    HeadersTooLarge,
    /// Too many headers for the configured limit.
    TooManyHeaders,
}

impl ParseError {
    fn description_str(&self) -> &'static str {
        match *self {
            ParseError::Method => "invalid token in method",
            ParseError::Target => "invalid token in target",
            ParseError::Version => "invalid version",
            ParseError::HeaderName => "invalid token in header name",
            ParseError::HeaderValue => "invalid token in header value",
            ParseError::NewLine => "invalid or missing new line",
            ParseError::Whitespace => "invalid whitespace",
            ParseError::HeadersTooLarge => "header section exceeded size limit",
            ParseError::TooManyHeaders => "too many headers",
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description_str())
    }
}

impl std::error::Error for ParseError {}

/// Result whose `Err` variant is [`ParseError`].
pub type ParseResult<T> = std::result::Result<T, ParseError>;

/// Consumes optional whitespace from `buf`.
/// RFC 9110 5.6.3: `OWS = *( SP / HTAB )`.
#[inline]
pub fn discard_whitespace(buf: &mut RawRequest<'_>) {
    buf.take_until(|b| b != b' ' && b != b'\t');
}

/// Consumes required whitespace from `buf`, erroring if none was present.
/// RFC 9110 5.6.3: `RWS = 1*( SP / HTAB )`.
#[inline]
pub fn discard_required_whitespace(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    let pos = buf.pos();
    buf.take_until(|b| b != b' ' && b != b'\t');
    if pos == buf.pos() {
        return Err(ParseError::Whitespace);
    }
    Ok(())
}

/// Consumes `buf` through the next `CRLF` sequence.
#[inline]
pub fn discard_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    take_after_newline(buf)
}

/// Advances `buf` past the next `\r\n`, returning an error if the stream ends
/// first without one.
pub fn take_after_newline(buf: &mut RawRequest<'_>) -> ParseResult<()> {
    loop {
        match buf.next() {
            Some(&b'\r') => {
                if buf.next() == Some(&b'\n') {
                    buf.slice();
                    return Ok(());
                }
                return Err(ParseError::NewLine);
            }
            Some(_) => continue,
            None => return Err(ParseError::NewLine),
        }
    }
}

/// Parses a single `name: value` header line, assuming the leading position
/// is the first byte of the header name. Returns `None` (without consuming)
/// if `buf` is positioned at the empty line terminating the header section.
pub fn parse_header<'a>(buf: &mut RawRequest<'a>) -> ParseResult<Option<Header<'a>>> {
    if buf.peek() == Some(b'\r') {
        take_after_newline(buf)?;
        return Ok(None);
    }

    let name_bytes = buf
        .take_until(|b| b == b':')
        .ok_or(ParseError::HeaderName)?;
    if name_bytes.is_empty() || !name_bytes.iter().all(|&b| tokens::is_tchar(b)) {
        return Err(ParseError::HeaderName);
    }
    buf.next(); // consume ':'
    buf.slice();

    discard_whitespace(buf);

    let value_bytes = buf.take_until(|b| b == b'\r').unwrap_or(&[]);
    if !value_bytes.iter().all(|&b| is_header_value_token(b)) {
        return Err(ParseError::HeaderValue);
    }
    take_after_newline(buf)?;

    // SAFETY: both slices were validated above to contain only a subset of
    // ASCII visible characters, which is always valid UTF-8.
    let name = unsafe { core::str::from_utf8_unchecked(name_bytes) };
    let value = unsafe { core::str::from_utf8_unchecked(value_bytes) };
    let value = value.trim_end_matches([' ', '\t']);

    Ok(Some(Header { name, value }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_header_reads_name_and_value() {
        let mut buf = RawRequest::new(b"Host: example.com\r\n");
        let header = parse_header(&mut buf).unwrap().unwrap();
        assert_eq!(header.name, "Host");
        assert_eq!(header.value, "example.com");
    }

    #[test]
    fn parse_header_returns_none_at_blank_line() {
        let mut buf = RawRequest::new(b"\r\n");
        assert_eq!(parse_header(&mut buf).unwrap(), None);
    }

    #[test]
    fn parse_header_rejects_invalid_name_token() {
        let mut buf = RawRequest::new(b"Bad Name: x\r\n");
        assert_eq!(parse_header(&mut buf), Err(ParseError::HeaderName));
    }
}
