// Copyright 2025 jonefeewang@gmail.com
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

//! Network Module Implementation
//!
//! Framing and per-connection I/O, built on tokio's async primitives.
//!
//! # Components
//!
//! - `Frame`/`FrameDecoder`: the wire format and its incremental reader
//! - `Connection`: one socket with a read pipeline (header, then body, then
//!   hand-off to an `InboundSink`) and a write pipeline draining its own
//!   outbound queue
//!
//! A read or write failure is terminal for that connection only: the socket
//! is closed and the failure is logged, nothing propagates to callers.

pub use connection::{Connection, ConnectionRef, InboundEnvelope, InboundSink, WriteState};
pub use frame::{Frame, FrameDecoder, FrameHeader, FrameTag, ReadState, Scalar};
mod connection;
mod frame;
