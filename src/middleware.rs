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

//! Request middleware: a chain of checks run before a route's handler, each
//! of which may let the request continue or short-circuit it with a
//! response status.

use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::http1::Request;

/// The result of one middleware's evaluation of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Proceed to the next middleware, or the route handler if this was the
    /// last one.
    Continue,
    /// Stop the chain and answer the client with `status` directly.
    Reject { status: u16, message: String },
}

/// One link in the middleware chain.
pub trait Middleware: Send + Sync {
    /// Short, stable name used in logs.
    fn name(&self) -> &str;

    /// Evaluates `request`, arriving from `client_ip`.
    fn handle(&self, request: &Request, client_ip: IpAddr) -> Outcome;
}

/// An ordered, immutable sequence of middlewares run before routing a
/// request's body to its handler.
#[derive(Default)]
pub struct Chain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl Chain {
    /// Builds a chain that runs `middlewares` in order.
    pub fn new(middlewares: Vec<Box<dyn Middleware>>) -> Self {
        Chain { middlewares }
    }

    /// Runs every middleware in order, stopping at the first rejection.
    pub fn run(&self, request: &Request, client_ip: IpAddr) -> Outcome {
        for mw in &self.middlewares {
            match mw.handle(request, client_ip) {
                Outcome::Continue => continue,
                rejected @ Outcome::Reject { .. } => return rejected,
            }
        }
        Outcome::Continue
    }
}

/// Fixed-window token-bucket rate limiter, keyed by client IP.
pub struct RateLimitMiddleware {
    buckets: DashMap<IpAddr, Mutex<Bucket>>,
    capacity: u32,
    refill_interval: Duration,
}

struct Bucket {
    tokens: u32,
    last_refill: Instant,
}

impl RateLimitMiddleware {
    /// Allows `capacity` requests per client IP, refilling the full bucket
    /// every `refill_interval`.
    pub fn new(capacity: u32, refill_interval: Duration) -> Self {
        RateLimitMiddleware {
            buckets: DashMap::new(),
            capacity,
            refill_interval,
        }
    }

    fn take_token(&self, ip: IpAddr) -> bool {
        let entry = self.buckets.entry(ip).or_insert_with(|| {
            Mutex::new(Bucket {
                tokens: self.capacity,
                last_refill: Instant::now(),
            })
        });
        let mut bucket = entry.lock().unwrap();

        if bucket.last_refill.elapsed() >= self.refill_interval {
            bucket.tokens = self.capacity;
            bucket.last_refill = Instant::now();
        }

        if bucket.tokens == 0 {
            return false;
        }
        bucket.tokens -= 1;
        true
    }
}

impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate_limit"
    }

    fn handle(&self, _request: &Request, client_ip: IpAddr) -> Outcome {
        if self.take_token(client_ip) {
            Outcome::Continue
        } else {
            Outcome::Reject {
                status: 429,
                message: "rate limit exceeded".to_string(),
            }
        }
    }
}

/// Rejects requests missing a valid `Authorization: Bearer <token>` header.
pub struct BearerAuthMiddleware {
    expected_token: String,
}

impl BearerAuthMiddleware {
    /// Requires every request to carry `Authorization: Bearer {token}`.
    pub fn new(token: impl Into<String>) -> Self {
        BearerAuthMiddleware {
            expected_token: token.into(),
        }
    }
}

impl Middleware for BearerAuthMiddleware {
    fn name(&self) -> &str {
        "bearer_auth"
    }

    fn handle(&self, request: &Request, _client_ip: IpAddr) -> Outcome {
        let presented = request
            .header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "));

        match presented {
            Some(token) if token == self.expected_token => Outcome::Continue,
            _ => Outcome::Reject {
                status: 401,
                message: "missing or invalid bearer token".to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Method, Version};
    use std::net::Ipv4Addr;

    fn request() -> Request {
        Request {
            method: Method::Get,
            target: "/".to_string(),
            version: Version::H1_1,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn rate_limit_allows_up_to_capacity_then_rejects() {
        let mw = RateLimitMiddleware::new(2, Duration::from_secs(60));
        let req = request();
        assert_eq!(mw.handle(&req, localhost()), Outcome::Continue);
        assert_eq!(mw.handle(&req, localhost()), Outcome::Continue);
        assert!(matches!(mw.handle(&req, localhost()), Outcome::Reject { status: 429, .. }));
    }

    #[test]
    fn rate_limit_tracks_clients_independently() {
        let mw = RateLimitMiddleware::new(1, Duration::from_secs(60));
        let req = request();
        assert_eq!(mw.handle(&req, IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))), Outcome::Continue);
        assert_eq!(mw.handle(&req, IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2))), Outcome::Continue);
    }

    #[test]
    fn bearer_auth_rejects_missing_header() {
        let mw = BearerAuthMiddleware::new("secret");
        assert!(matches!(mw.handle(&request(), localhost()), Outcome::Reject { status: 401, .. }));
    }

    #[test]
    fn bearer_auth_accepts_matching_token() {
        let mw = BearerAuthMiddleware::new("secret");
        let mut req = request();
        req.headers.push(("Authorization".to_string(), "Bearer secret".to_string()));
        assert_eq!(mw.handle(&req, localhost()), Outcome::Continue);
    }

    #[test]
    fn chain_stops_at_first_rejection() {
        let chain = Chain::new(vec![
            Box::new(BearerAuthMiddleware::new("secret")),
            Box::new(RateLimitMiddleware::new(0, Duration::from_secs(60))),
        ]);
        assert!(matches!(chain.run(&request(), localhost()), Outcome::Reject { status: 401, .. }));
    }
}
