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

//! Request body framing, RFC 9112 Section 6: `Content-Length` and
//! `Transfer-Encoding: chunked`. `chunked` takes precedence when both are
//! present, per 6.3 step 3.

use crate::parser::h1::ParseError;

/// How a message body's length is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyLength {
    /// No body: no `Content-Length`/`Transfer-Encoding`, or a method/status
    /// that never carries one.
    None,
    /// Exactly this many bytes follow the header section.
    Fixed(usize),
    /// Body is chunk-encoded; length isn't known up front.
    Chunked,
}

/// Determines how the body following a parsed header section is delimited.
/// Rejects a message that specifies a `Content-Length` alongside
/// `Transfer-Encoding: chunked` ambiguously, or a non-numeric/duplicate
/// `Content-Length`.
pub fn body_length<'a>(headers: impl IntoIterator<Item = (&'a str, &'a str)>) -> Result<BodyLength, ParseError> {
    let mut content_length: Option<usize> = None;
    let mut chunked = false;

    for (name, value) in headers {
        if name.eq_ignore_ascii_case("transfer-encoding") {
            if value
                .rsplit(',')
                .next()
                .map(str::trim)
                .is_some_and(|enc| enc.eq_ignore_ascii_case("chunked"))
            {
                chunked = true;
            }
        } else if name.eq_ignore_ascii_case("content-length") {
            let n: usize = value.trim().parse().map_err(|_| ParseError::HeaderValue)?;
            if content_length.is_some_and(|existing| existing != n) {
                return Err(ParseError::HeaderValue);
            }
            content_length = Some(n);
        }
    }

    if chunked {
        return Ok(BodyLength::Chunked);
    }
    Ok(content_length.map_or(BodyLength::None, BodyLength::Fixed))
}

/// Incremental chunked-transfer-coding decoder, RFC 9112 Section 7.1.
/// Chunk extensions are accepted but discarded; trailers are consumed but
/// not surfaced as headers.
#[derive(Debug)]
pub struct ChunkedDecoder {
    state: State,
    body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Size,
    Data(usize),
    DataCrlf,
    Trailer,
    Done,
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedDecoder {
    /// Creates a decoder positioned at the start of the first chunk.
    pub fn new() -> Self {
        ChunkedDecoder {
            state: State::Size,
            body: Vec::new(),
        }
    }

    /// `true` once the terminating `0`-length chunk and trailer section have
    /// both been consumed.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Decoded body bytes accumulated so far.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Feeds as much of `buf` as forms complete chunk-framing into the
    /// decoder. Returns the number of bytes consumed; call repeatedly as
    /// more bytes arrive until [`Self::is_done`].
    pub fn feed(&mut self, buf: &[u8]) -> Result<usize, ParseError> {
        let mut pos = 0;
        loop {
            match self.state {
                State::Done => return Ok(pos),
                State::Size => {
                    let Some(line_end) = find_crlf(&buf[pos..]) else {
                        return Ok(pos);
                    };
                    let line = &buf[pos..pos + line_end];
                    let size_str = line.split(|&b| b == b';').next().unwrap_or(line);
                    let size_str =
                        std::str::from_utf8(size_str).map_err(|_| ParseError::HeaderValue)?;
                    let size = usize::from_str_radix(size_str.trim(), 16)
                        .map_err(|_| ParseError::HeaderValue)?;
                    pos += line_end + 2;
                    self.state = if size == 0 { State::Trailer } else { State::Data(size) };
                }
                State::Data(remaining) => {
                    let available = buf.len() - pos;
                    if available == 0 {
                        return Ok(pos);
                    }
                    let take = remaining.min(available);
                    self.body.extend_from_slice(&buf[pos..pos + take]);
                    pos += take;
                    self.state = if take == remaining {
                        State::DataCrlf
                    } else {
                        State::Data(remaining - take)
                    };
                }
                State::DataCrlf => {
                    if buf.len() - pos < 2 {
                        return Ok(pos);
                    }
                    if &buf[pos..pos + 2] != b"\r\n" {
                        return Err(ParseError::NewLine);
                    }
                    pos += 2;
                    self.state = State::Size;
                }
                State::Trailer => {
                    let Some(line_end) = find_crlf(&buf[pos..]) else {
                        return Ok(pos);
                    };
                    pos += line_end + 2;
                    if line_end == 0 {
                        self.state = State::Done;
                    }
                }
            }
        }
    }
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_length_wins_when_alone() {
        let headers = [("Content-Length", "42")];
        assert_eq!(body_length(headers).unwrap(), BodyLength::Fixed(42));
    }

    #[test]
    fn chunked_takes_precedence_over_content_length() {
        let headers = [("Content-Length", "42"), ("Transfer-Encoding", "chunked")];
        assert_eq!(body_length(headers).unwrap(), BodyLength::Chunked);
    }

    #[test]
    fn no_length_headers_means_no_body() {
        assert_eq!(body_length(std::iter::empty()).unwrap(), BodyLength::None);
    }

    #[test]
    fn conflicting_content_length_is_rejected() {
        let headers = [("Content-Length", "1"), ("Content-Length", "2")];
        assert!(body_length(headers).is_err());
    }

    #[test]
    fn chunked_decoder_assembles_multiple_chunks() {
        let mut decoder = ChunkedDecoder::new();
        let input = b"4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n";
        let consumed = decoder.feed(input).unwrap();
        assert_eq!(consumed, input.len());
        assert!(decoder.is_done());
        assert_eq!(decoder.body(), b"Wikipedia");
    }

    #[test]
    fn chunked_decoder_handles_partial_feeds() {
        let mut decoder = ChunkedDecoder::new();
        let consumed = decoder.feed(b"4\r\nWi").unwrap();
        assert_eq!(consumed, 5); // size line plus the 2 data bytes available so far
        assert!(!decoder.is_done());

        let rest = decoder.feed(b"ki\r\n0\r\n\r\n").unwrap();
        assert_eq!(rest, 9);
        assert!(decoder.is_done());
        assert_eq!(decoder.body(), b"Wiki");
    }
}
