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

//! Logging setup: a `tracing-subscriber` `fmt` layer driven by `RUST_LOG`
//! (or the configured default), initialized once at process startup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initializes the global `tracing` subscriber. `default_directive` is used
/// when `RUST_LOG` isn't set in the environment (e.g. `"rask_gateway=info"`).
///
/// # Panics
/// Panics if a global subscriber has already been installed; callers should
/// invoke this exactly once, at process startup.
pub fn init(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
