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

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::info;

use crate::network::{Connection, ConnectionRef, Frame, FrameTag, InboundEnvelope};
use crate::utils::ConcurrentQueue;
use crate::AppResult;

use super::{IoRunner, NetworkConfig};

/// Id given to a client's only connection; server-side ids start higher.
pub const CLIENT_CONNECTION_ID: u32 = 0;

/// The client side of the transport: one connection, its own I/O runner and
/// inbound queue, no registry.
pub struct Client<T: FrameTag> {
    connection: ConnectionRef<T>,
    inbound: Arc<ConcurrentQueue<InboundEnvelope<T>>>,
    runner: IoRunner,
}

impl<T: FrameTag> Client<T> {
    /// Connects to `address` and starts both pipelines.
    pub fn connect<A: ToSocketAddrs>(address: A, config: &NetworkConfig) -> AppResult<Client<T>> {
        let stream = std::net::TcpStream::connect(address)?;
        stream.set_nonblocking(true)?;

        let runner = IoRunner::start("framewire-client-io")?;
        let stream = {
            let _enter = runner.handle().enter();
            TcpStream::from_std(stream)?
        };
        let inbound: Arc<ConcurrentQueue<InboundEnvelope<T>>> = Arc::new(ConcurrentQueue::new());
        let connection = Arc::new(Connection::new(
            CLIENT_CONNECTION_ID,
            stream,
            runner.handle().clone(),
            inbound.clone(),
            config,
        ));
        connection.start();
        info!(peer = ?connection.peer_addr(), "client connected");

        Ok(Client {
            connection,
            inbound,
            runner,
        })
    }

    pub fn connection(&self) -> &ConnectionRef<T> {
        &self.connection
    }

    pub fn send(&self, frame: Frame<T>) {
        self.connection.send(frame);
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn disconnect(&self) {
        self.connection.disconnect();
    }

    /// Frames received and not yet taken.
    pub fn incoming(&self) -> &ConcurrentQueue<InboundEnvelope<T>> {
        &self.inbound
    }

    pub fn try_recv(&self) -> Option<Frame<T>> {
        self.inbound.pop_front().map(|envelope| envelope.frame)
    }

    /// Waits up to `timeout` for the next frame.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Frame<T>> {
        if self.inbound.wait_for(timeout) {
            self.try_recv()
        } else {
            None
        }
    }

    /// Disconnects and joins the I/O runner.
    pub fn stop(&mut self) {
        self.runner.stop();
        self.inbound.clear();
    }
}

impl<T: FrameTag> Drop for Client<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
