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

//! High-level HTTP/1.1: assembling a full, owned [`request::Request`] (head
//! plus body) from a connection's read buffer, and serializing responses via
//! [`crate::parser::h1::response::Response`].

pub mod body;
pub mod request;

pub use crate::parser::h1::response::Response;
pub use request::Request;
