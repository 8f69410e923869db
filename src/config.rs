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

//! Static startup configuration, loaded once from a YAML file with a handful
//! of environment overrides for values operators commonly change per
//! deployment without editing the file (listen port, log level). Runtime
//! reload is out of scope — a changed file takes effect on the next restart.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::GatewayError;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Network listener settings.
    pub listen: ListenConfig,
    /// Route table, in priority order (most specific wins regardless of
    /// order, but ties prefer the earliest entry).
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Named upstream targets routes proxy to.
    #[serde(default)]
    pub upstreams: HashMap<String, UpstreamConfig>,
    /// Per-client request rate limiting; disabled if absent.
    pub rate_limit: Option<RateLimitConfig>,
    /// If set, every request must carry `Authorization: Bearer <token>`.
    pub auth_token: Option<String>,
    /// `tracing-subscriber` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "rask_gateway=info".to_string()
}

/// Listener bind settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind, e.g. `"0.0.0.0"`.
    pub address: String,
    /// Port to bind.
    pub port: u16,
    /// Path to a PEM certificate chain; enables TLS when set alongside
    /// `tls_key_path`.
    pub tls_cert_path: Option<String>,
    /// Path to the PEM private key matching `tls_cert_path`.
    pub tls_key_path: Option<String>,
}

/// One routing rule as written in the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    /// HTTP method the route applies to, or `null`/absent for any method.
    pub method: Option<String>,
    /// Path pattern, e.g. `/api/:id` or `/assets/*path`.
    pub path: String,
    /// Name of the upstream (from [`Config::upstreams`]) this route proxies
    /// to.
    pub upstream: String,
}

/// A proxyable backend target.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// `host:port` of the backend.
    pub address: String,
    /// Connection timeout, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

fn default_connect_timeout_ms() -> u64 {
    2_000
}

/// Fixed-window rate limit applied per client IP.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub capacity: u32,
    /// Window length, in seconds.
    pub window_seconds: u64,
}

impl Config {
    /// Parses configuration from a YAML string, then applies environment
    /// overrides.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, GatewayError> {
        let mut config: Config =
            serde_yaml::from_str(yaml).map_err(|e| GatewayError::Config(e.to_string()))?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GatewayError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| GatewayError::Config(format!("reading {}: {e}", path.as_ref().display())))?;
        Self::from_yaml_str(&contents)
    }

    /// Overrides a handful of fields from environment variables, letting
    /// operators adjust common deployment knobs without editing the file.
    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("RASK_LISTEN_PORT") {
            if let Ok(port) = port.parse() {
                self.listen.port = port;
            }
        }
        if let Ok(level) = std::env::var("RASK_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(token) = std::env::var("RASK_AUTH_TOKEN") {
            self.auth_token = Some(token);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
listen:
  address: "0.0.0.0"
  port: 8080
routes:
  - method: GET
    path: /api/:id
    upstream: api
upstreams:
  api:
    address: "127.0.0.1:9000"
rate_limit:
  capacity: 100
  window_seconds: 60
"#;

    #[test]
    fn parses_minimal_config() {
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.listen.port, 8080);
        assert_eq!(config.routes.len(), 1);
        assert_eq!(config.upstreams["api"].address, "127.0.0.1:9000");
        assert_eq!(config.log_level, "rask_gateway=info");
    }

    #[test]
    fn env_override_replaces_listen_port() {
        std::env::set_var("RASK_LISTEN_PORT", "9999");
        let config = Config::from_yaml_str(SAMPLE).unwrap();
        std::env::remove_var("RASK_LISTEN_PORT");
        assert_eq!(config.listen.port, 9999);
    }

    #[test]
    fn invalid_yaml_is_a_config_error() {
        assert!(Config::from_yaml_str("not: [valid").is_err());
    }
}
