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

//! `rask-gateway`: a NUMA-aware reverse proxy / API gateway core.
//!
//! Modules are laid out in dependency order, leaves first: buffer pools
//! (`buffer`) and topology discovery (`topology`) have no dependents inside
//! this crate, while `server` wires everything else together.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod context;
pub mod discriminator;
pub mod error;
pub mod http1;
pub mod http2;
pub mod listener;
pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod net;
pub mod parser;
pub mod pool;
pub mod queue;
pub mod router;
pub mod server;
pub mod topology;
pub mod upstream;
pub mod websocket;

pub use error::{GatewayError, GatewayResult};
