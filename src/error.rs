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

//! Unified error type for the gateway.
//!
//! Internal components keep their own narrow error types (`parser::h1::ParseError`,
//! `http2::frame::FrameError`, ...) for use on hot paths; `GatewayError` is where
//! those converge once a caller needs to decide an HTTP-visible disposition (close
//! the connection, answer with a status code, or exit the process).

use std::fmt;

use crate::http2::frame::FrameError;
use crate::parser::h1::ParseError as H1ParseError;

/// Result alias using [`GatewayError`].
pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Unified error type for the gateway core.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    /// Transient network condition; the connection is closed silently and the
    /// caller's loop continues.
    #[error("transient network error: {0}")]
    Transient(#[from] std::io::Error),

    /// A peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// An HTTP/1.1 request failed to parse.
    #[error("malformed HTTP/1.1 request: {0}")]
    H1Parse(#[from] H1ParseError),

    /// An HTTP/2 frame failed to parse or violated a framing invariant.
    #[error("HTTP/2 framing error: {0}")]
    H2Frame(#[from] FrameError),

    /// No configured route matched the request.
    #[error("no route matched {method} {path}")]
    RouteNotFound {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// A middleware in the chain rejected the request.
    #[error("middleware rejected request: {message} ({status})")]
    MiddlewareRejected {
        /// Status the middleware wants returned to the client.
        status: u16,
        /// Human-readable rejection reason.
        message: String,
    },

    /// A resource limit (stream table, buffer pool) was exhausted.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Connecting to, or reading from, the upstream target failed.
    #[error("upstream failure for {target}: {source}")]
    Upstream {
        /// Canonical upstream target URL.
        target: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file failed to parse or referenced an invalid value.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An invariant the implementation relies on was violated. Logged at
    /// `error` level; terminates only the connection that tripped it.
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Maps this error to the HTTP status code that should be returned to the
    /// client, where one makes sense. Transient and internal errors have no
    /// meaningful status — the connection is simply closed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            GatewayError::Transient(_) => None,
            GatewayError::Protocol(_) => None,
            GatewayError::H1Parse(_) => Some(400),
            GatewayError::H2Frame(_) => None,
            GatewayError::RouteNotFound { .. } => Some(404),
            GatewayError::MiddlewareRejected { status, .. } => Some(*status),
            GatewayError::ResourceExhausted(_) => Some(503),
            GatewayError::Upstream { .. } => Some(502),
            GatewayError::Config(_) => None,
            GatewayError::Internal(_) => Some(500),
        }
    }

    /// `true` if this error is a connection-level HTTP/2 condition (as opposed
    /// to a single stream failing) and should trigger GOAWAY rather than
    /// RST_STREAM.
    pub fn is_connection_level(&self) -> bool {
        matches!(self, GatewayError::H2Frame(e) if e.is_connection_level())
    }
}

/// Minimal, allocation-free description used in log lines where `Display`
/// would be too verbose (e.g. high-frequency transient network noise).
pub struct Brief<'a>(pub &'a GatewayError);

impl fmt::Display for Brief<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            GatewayError::Transient(e) => write!(f, "transient({})", e.kind()),
            other => write!(f, "{other}"),
        }
    }
}
