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

//! HTTP/1.1 response serialization.

use std::io::{self, Write};

use crate::parser::{Status, Version};

/// An HTTP/1.1 response built up for serialization to the wire. Headers are
/// owned rather than borrowed since responses are usually synthesized, not
/// parsed, from within the gateway.
#[derive(Debug)]
pub struct Response {
    version: Version,
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(version: Version, status: Status) -> Self {
        Response {
            version,
            status,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Appends a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets the response body, and appends a matching `Content-Length`.
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Length".into(), body.len().to_string()));
        self.body = body;
        self
    }

    /// Writes the status line, headers, and body to `out`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        out.write_all(&self.head_bytes())?;
        out.write_all(&self.body)?;
        Ok(())
    }

    /// Splits this response into its head (status line, headers, and the
    /// blank-line terminator) and its body, for callers that write the two
    /// as separate segments rather than one concatenated buffer.
    pub fn into_parts(self) -> (Vec<u8>, Vec<u8>) {
        let head = self.head_bytes();
        (head, self.body)
    }

    fn head_bytes(&self) -> Vec<u8> {
        let mut head = Vec::new();
        // A `Vec<u8>` `Write` impl never fails.
        write!(head, "{} {} {}\r\n", self.version, self.status as u16, reason_phrase(self.status)).unwrap();
        for (name, value) in &self.headers {
            write!(head, "{name}: {value}\r\n").unwrap();
        }
        head.extend_from_slice(b"\r\n");
        head
    }
}

/// Minimal reason-phrase table for the status codes the gateway itself emits.
fn reason_phrase(status: Status) -> &'static str {
    match status {
        Status::Continue => "Continue",
        Status::SwitchingProtocols => "Switching Protocols",
        Status::Ok => "OK",
        Status::Created => "Created",
        Status::Accepted => "Accepted",
        Status::NoContent => "No Content",
        Status::MovedPermanently => "Moved Permanently",
        Status::Found => "Found",
        Status::NotModified => "Not Modified",
        Status::BadRequest => "Bad Request",
        Status::Unauthorized => "Unauthorized",
        Status::Forbidden => "Forbidden",
        Status::NotFound => "Not Found",
        Status::MethodNotAllowed => "Method Not Allowed",
        Status::RequestTimeout => "Request Timeout",
        Status::UpgradeRequired => "Upgrade Required",
        Status::TooManyRequests => "Too Many Requests",
        Status::InternalServerError => "Internal Server Error",
        Status::NotImplemented => "Not Implemented",
        Status::BadGateway => "Bad Gateway",
        Status::ServiceUnavailable => "Service Unavailable",
        Status::GatewayTimeout => "Gateway Timeout",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_status_line_headers_and_body() {
        let resp = Response::new(Version::H1_1, Status::Ok)
            .header("Content-Type", "text/plain")
            .body(b"hi".to_vec());
        let mut out = Vec::new();
        resp.write_to(&mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Type: text/plain\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));
    }
}
