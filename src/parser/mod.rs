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

//! Low-level, allocation-free parsing primitives shared by the HTTP/1.1
//! engine: byte-level method/version/status tokens and the zero-copy
//! [`raw_request::RawRequest`] cursor they're parsed from.
//!
//! Higher-level concerns (header maps, bodies, upgrade detection) live in
//! [`crate::http1`], which is built on top of these primitives.

pub mod h1;
pub mod method;
pub mod raw_request;
pub mod status;
pub mod version;

pub use method::Method;
pub use raw_request::RawRequest;
pub use status::Status;
pub use version::Version;
