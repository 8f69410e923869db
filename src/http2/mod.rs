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

//! Hand-rolled HTTP/2 engine: frame codec, per-connection stream table, and
//! the multiplexer that demultiplexes frames onto streams.
//!
//! Header compression is deliberately not HPACK-compliant. [`header_codec`]
//! defines a [`header_codec::HeaderCodec`] trait so a real HPACK
//! implementation can be substituted later without touching the rest of the
//! engine.

pub mod connection;
pub mod frame;
pub mod header_codec;
pub mod multiplexer;
pub mod settings;
pub mod stream;

pub use connection::{H2Connection, RequestEvent, CLIENT_PREFACE};
pub use frame::{Frame, FrameError, FrameHeader, FrameType};
pub use multiplexer::Multiplexer;
pub use stream::{Stream, StreamState};
