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

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{self, Duration};
use tracing::{debug, error, info, warn};

use crate::network::{Connection, ConnectionRef, Frame, FrameTag, InboundEnvelope, InboundSink};
use crate::utils::ConcurrentQueue;
use crate::AppError;
use crate::AppResult;

use super::{IoRunner, NetworkConfig};

const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(1);

/// What the I/O runner hands to the application context.
#[derive(Debug)]
pub enum ServerEvent<T: FrameTag> {
    /// A socket was accepted and waits for `on_client_connect`.
    Accepted(ConnectionRef<T>),
    Message(InboundEnvelope<T>),
}

impl<T: FrameTag> InboundSink<T> for ConcurrentQueue<ServerEvent<T>> {
    fn deliver(&self, envelope: InboundEnvelope<T>) {
        self.push_back(ServerEvent::Message(envelope));
    }
}

/// The application's hooks into a [`Server`].
///
/// Every hook runs on the thread calling [`Server::pump`] (or
/// `send_to`/`broadcast`), never on the I/O runner.
pub trait ServerHandler<T: FrameTag>: Sized {
    /// Defaults to relaying the frame to every other client.
    fn on_message(&mut self, server: &mut Server<T>, connection: ConnectionRef<T>, frame: Frame<T>) {
        server.broadcast(self, &frame, Some(&connection));
    }

    /// Return false to refuse the connection; it is closed without ever
    /// entering the registry.
    fn on_client_connect(&mut self, connection: &ConnectionRef<T>) -> bool {
        let _ = connection;
        true
    }

    /// Called once when a registered connection is found dead.
    fn on_client_disconnect(&mut self, connection: &ConnectionRef<T>) {
        let _ = connection;
    }
}

/// Accepts everyone and relays every frame to all other clients.
#[derive(Debug, Default, Clone, Copy)]
pub struct Relay;

impl<T: FrameTag> ServerHandler<T> for Relay {}

/// Owns the listening socket, the registry of live connections and the I/O
/// runner.
///
/// The registry is only touched from the application context. The runner
/// never inserts or removes entries; a dead connection is noticed lazily
/// through [`Connection::is_connected`] when something is sent to it.
pub struct Server<T: FrameTag> {
    config: NetworkConfig,
    listener: Option<std::net::TcpListener>,
    local_addr: SocketAddr,
    inbound: Arc<ConcurrentQueue<ServerEvent<T>>>,
    registry: BTreeMap<u32, ConnectionRef<T>>,
    next_connection_id: Arc<AtomicU32>,
    runner: Option<IoRunner>,
}

impl<T: FrameTag> Server<T> {
    /// Binds and listens. Nothing is accepted until [`run`](Self::run).
    pub fn bind(config: NetworkConfig) -> AppResult<Server<T>> {
        if config.max_connection == 0 || config.max_connection > Semaphore::MAX_PERMITS {
            return Err(AppError::InvalidValue(format!(
                "max_connection must be between 1 and {}, got {}",
                Semaphore::MAX_PERMITS,
                config.max_connection
            )));
        }
        let listen_address = config.listen_address();
        let listener = std::net::TcpListener::bind(&listen_address).map_err(|source| {
            error!(address = %listen_address, error = %source, "failed to bind server");
            AppError::Bind {
                address: listen_address.clone(),
                source,
            }
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        info!("tcp server binding to {} for listening", local_addr);

        Ok(Server {
            next_connection_id: Arc::new(AtomicU32::new(config.first_connection_id)),
            config,
            listener: Some(listener),
            local_addr,
            inbound: Arc::new(ConcurrentQueue::new()),
            registry: BTreeMap::new(),
            runner: None,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts the I/O runner and the accept loop.
    ///
    /// A stopped server cannot be run again: the listener went down with the
    /// runner.
    pub fn run(&mut self) -> AppResult<()> {
        if self.runner.is_some() {
            return Err(AppError::IllegalState("server is already running".to_string()));
        }
        let listener = self.listener.take().ok_or_else(|| {
            AppError::IllegalState("server was stopped and cannot be restarted".to_string())
        })?;

        let runner = IoRunner::start("framewire-io")?;
        let listener = {
            let _enter = runner.handle().enter();
            TcpListener::from_std(listener)?
        };
        let acceptor = Acceptor {
            listener,
            limit_connections: Arc::new(Semaphore::new(self.config.max_connection)),
            next_connection_id: Arc::clone(&self.next_connection_id),
            inbound: Arc::clone(&self.inbound),
            config: self.config.clone(),
        };
        runner.handle().spawn(acceptor.run());
        info!("server is waiting to accept new clients");

        self.runner = Some(runner);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.runner.as_ref().is_some_and(IoRunner::is_running)
    }

    /// Halts the I/O runner and joins it. Undelivered inbound frames are
    /// dropped.
    pub fn stop(&mut self) {
        if let Some(mut runner) = self.runner.take() {
            runner.stop();
            self.inbound.clear();
            info!("server stopped");
        }
    }

    /// Dispatches queued frames to `handler` on the calling thread.
    ///
    /// With `block_if_empty` the call first parks until something arrives.
    /// At most `max_messages` frames are dispatched (all available when
    /// `None`); connection-accepted events are processed along the way and
    /// do not count. Returns how many frames were dispatched.
    pub fn pump<H: ServerHandler<T>>(
        &mut self,
        handler: &mut H,
        max_messages: Option<usize>,
        block_if_empty: bool,
    ) -> usize {
        if block_if_empty {
            self.inbound.wait();
        }

        let max_messages = max_messages.unwrap_or(usize::MAX);
        let mut dispatched = 0;
        while dispatched < max_messages {
            let Some(event) = self.inbound.pop_front() else {
                break;
            };
            match event {
                ServerEvent::Accepted(connection) => self.admit(handler, connection),
                ServerEvent::Message(InboundEnvelope { frame, origin }) => {
                    handler.on_message(self, origin, frame);
                    dispatched += 1;
                }
            }
        }
        dispatched
    }

    /// Sends to one client, or drops it from the registry if it is gone.
    pub fn send_to<H: ServerHandler<T>>(
        &mut self,
        handler: &mut H,
        connection: &ConnectionRef<T>,
        frame: Frame<T>,
    ) {
        if connection.is_connected() {
            connection.send(frame);
        } else {
            self.evict(handler, connection.id());
        }
    }

    /// Sends to every live client except `except`. Dead clients found on the
    /// way are removed once the sweep is over.
    pub fn broadcast<H: ServerHandler<T>>(
        &mut self,
        handler: &mut H,
        frame: &Frame<T>,
        except: Option<&ConnectionRef<T>>,
    ) {
        let mut departed = Vec::new();
        for connection in self.registry.values() {
            if !connection.is_connected() {
                departed.push(connection.id());
                continue;
            }
            if except.is_some_and(|except| Arc::ptr_eq(except, connection)) {
                continue;
            }
            connection.send(frame.clone());
        }
        for id in departed {
            self.evict(handler, id);
        }
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn connection(&self, id: u32) -> Option<&ConnectionRef<T>> {
        self.registry.get(&id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &ConnectionRef<T>> {
        self.registry.values()
    }

    /// Parks until an event is queued or `timeout` passes.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        self.inbound.wait_for(timeout)
    }

    /// Events waiting for the next `pump`.
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    fn admit<H: ServerHandler<T>>(&mut self, handler: &mut H, connection: ConnectionRef<T>) {
        if !handler.on_client_connect(&connection) {
            info!(connection_id = connection.id(), "connection denied");
            connection.disconnect();
            return;
        }
        info!(
            connection_id = connection.id(),
            peer = ?connection.peer_addr(),
            "new connection has been established"
        );
        if let Some(previous) = self.registry.get(&connection.id()).cloned() {
            // ids come from one counter, a clash means it wrapped around
            warn!(connection_id = previous.id(), "connection id reused, dropping the older entry");
            previous.disconnect();
            self.evict(handler, previous.id());
        }
        self.registry.insert(connection.id(), Arc::clone(&connection));
        connection.start();
    }

    fn evict<H: ServerHandler<T>>(&mut self, handler: &mut H, id: u32) {
        if let Some(connection) = self.registry.remove(&id) {
            debug!(connection_id = id, "removing disconnected client");
            handler.on_client_disconnect(&connection);
        }
    }
}

impl<T: FrameTag> Drop for Server<T> {
    fn drop(&mut self) {
        self.stop();
        debug!("tcp server dropped");
    }
}

/// The accept loop, living on the I/O runner.
struct Acceptor<T: FrameTag> {
    listener: TcpListener,
    limit_connections: Arc<Semaphore>,
    next_connection_id: Arc<AtomicU32>,
    inbound: Arc<ConcurrentQueue<ServerEvent<T>>>,
    config: NetworkConfig,
}

impl<T: FrameTag> Acceptor<T> {
    async fn run(self) {
        loop {
            let Ok(permit) = self.limit_connections.clone().acquire_owned().await else {
                return;
            };
            let (socket, peer) = self.accept().await;

            let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
            let connection = Arc::new(Connection::new(
                id,
                socket,
                Handle::current(),
                self.inbound.clone(),
                &self.config,
            ));
            connection.hold_permit(permit);
            debug!(connection_id = id, %peer, "accepted new connection");
            self.inbound.push_back(ServerEvent::Accepted(connection));
        }
    }

    /// Accept failures are treated as transient: back off and try again.
    async fn accept(&self) -> (TcpStream, SocketAddr) {
        let mut backoff = Duration::from_millis(1);
        loop {
            match self.listener.accept().await {
                Ok(accepted) => return accepted,
                Err(err) => {
                    error!(error = %err, "new connection error, retrying in {:?}", backoff);
                }
            }
            time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_ACCEPT_BACKOFF);
        }
    }
}
