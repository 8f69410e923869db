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

//! WebSocket upgrade handshake and frame codec, RFC 6455. Detecting that a
//! request wants to upgrade at all is [`crate::discriminator::is_websocket_upgrade`]'s
//! job; this module covers the handshake response and the data-frame wire
//! format once upgraded.

pub mod frame;
pub mod handshake;

pub use frame::{Frame, Opcode, WsError};
