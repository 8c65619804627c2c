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

//! Length-prefixed binary message transport.
//!
//! Frames (a tag plus an opaque body) travel over persistent TCP connections.
//! A [`Server`] accepts many connections, decodes their frames on a single
//! background I/O runner, and hands them to the application through
//! [`Server::pump`], which calls the [`ServerHandler`] hooks on the caller's
//! thread. [`Client`] is the one-connection counterpart.

mod network;
mod service;
mod utils;

pub use network::{
    Connection, ConnectionRef, Frame, FrameDecoder, FrameHeader, FrameTag, InboundEnvelope,
    InboundSink, ReadState, Scalar, WriteState,
};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, Client, IoRunner, LogConfig,
    NetworkConfig, Relay, Server, ServerEvent, ServerHandler, Shutdown, TransportConfig,
    CLIENT_CONNECTION_ID,
};
pub use utils::ConcurrentQueue;
