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

//! Buffer subsystem: pooled byte buffers, scatter/gather vectored buffers,
//! and read/write cursor buffers used to forward request/response bodies
//! without incidental reallocation.

pub mod cursor;
pub mod pool;
pub mod vectored;

pub use cursor::CursorBuffer;
pub use pool::{BufferPool, PooledBuffer};
pub use vectored::VectoredBuffer;
