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

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{Notify, OwnedSemaphorePermit};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

use crate::network::{Frame, FrameDecoder, FrameHeader, FrameTag, ReadState};
use crate::utils::ConcurrentQueue;
use crate::{AppResult, NetworkConfig};

type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Shared handle to a live connection. Every holder keeps it alive.
pub type ConnectionRef<T> = Arc<Connection<T>>;

/// A decoded frame together with the connection it arrived on.
#[derive(Debug)]
pub struct InboundEnvelope<T: FrameTag> {
    pub frame: Frame<T>,
    pub origin: ConnectionRef<T>,
}

/// Where a connection's read pipeline hands finished frames.
///
/// Called on the I/O runner; implementations must not block.
pub trait InboundSink<T: FrameTag>: Send + Sync {
    fn deliver(&self, envelope: InboundEnvelope<T>);
}

impl<T: FrameTag> InboundSink<T> for ConcurrentQueue<InboundEnvelope<T>> {
    fn deliver(&self, envelope: InboundEnvelope<T>) {
        self.push_back(envelope);
    }
}

#[derive(Debug)]
pub enum WriteState<T> {
    Idle,
    WritingHeader(Frame<T>),
    WritingBody(Frame<T>),
}

/// One framed byte stream with independent read and write pipelines.
///
/// Both pipelines run as tasks on the I/O runner. Anything called from other
/// threads only touches the outbound queue or signals those tasks, so the
/// socket itself is never used off the runner.
pub struct Connection<T: FrameTag> {
    id: u32,
    peer_addr: Option<SocketAddr>,
    runner: Handle,
    open: AtomicBool,
    close: CancellationToken,
    outbound: ConcurrentQueue<Frame<T>>,
    write_ready: Notify,
    stream: Mutex<Option<(BoxedReader, BoxedWriter)>>,
    inbound: Arc<dyn InboundSink<T>>,
    max_package_size: u64,
    read_buffer_size: usize,
    permit: Mutex<Option<OwnedSemaphorePermit>>,
}

impl<T: FrameTag> Connection<T> {
    pub fn new(
        id: u32,
        socket: TcpStream,
        runner: Handle,
        inbound: Arc<dyn InboundSink<T>>,
        config: &NetworkConfig,
    ) -> Connection<T> {
        if let Err(e) = socket.set_nodelay(true) {
            warn!(connection_id = id, error = %e, "failed to set TCP_NODELAY");
        }
        let peer_addr = socket.peer_addr().ok();
        let (reader, writer) = socket.into_split();
        Self::from_io(id, reader, writer, peer_addr, runner, inbound, config)
    }

    /// Builds a connection over any split byte stream.
    pub fn from_io<R, W>(
        id: u32,
        reader: R,
        writer: W,
        peer_addr: Option<SocketAddr>,
        runner: Handle,
        inbound: Arc<dyn InboundSink<T>>,
        config: &NetworkConfig,
    ) -> Connection<T>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Connection {
            id,
            peer_addr,
            runner,
            open: AtomicBool::new(true),
            close: CancellationToken::new(),
            outbound: ConcurrentQueue::new(),
            write_ready: Notify::new(),
            stream: Mutex::new(Some((Box::new(reader), Box::new(writer)))),
            inbound,
            max_package_size: config.max_package_size,
            read_buffer_size: config.conn_read_buffer_size,
            permit: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// True until the socket is closed, by request or by an I/O failure.
    pub fn is_connected(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Frames queued but not yet fully written.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Ties a connection-limit permit to this connection's lifetime.
    pub(crate) fn hold_permit(&self, permit: OwnedSemaphorePermit) {
        *self.permit.lock() = Some(permit);
    }

    /// Arms the read and write pipelines on the I/O runner.
    pub fn start(self: &Arc<Self>) {
        let Some((reader, writer)) = self.stream.lock().take() else {
            warn!(connection_id = self.id, "connection already started");
            return;
        };
        // guards travel with the futures, so an unpolled task still closes
        let read_guard = CloseOnExit(Arc::clone(self));
        let write_guard = CloseOnExit(Arc::clone(self));
        self.runner.spawn(Arc::clone(self).read_pipeline(reader, read_guard));
        self.runner.spawn(Arc::clone(self).write_pipeline(writer, write_guard));
    }

    /// Queues `frame` for writing. Frames go out whole, in call order.
    pub fn send(&self, frame: Frame<T>) {
        if !self.is_connected() {
            debug!(connection_id = self.id, "dropping frame for closed connection");
            return;
        }
        if self.outbound.push_back(frame) {
            self.write_ready.notify_one();
        }
        // lost a race with shutdown clearing the queue
        if !self.is_connected() {
            self.outbound.clear();
        }
    }

    /// Requests the socket be closed on the I/O runner. Idempotent.
    pub fn disconnect(self: &Arc<Self>) {
        if !self.is_connected() {
            return;
        }
        // closes on drop, even if the runner is gone and never polls this
        let guard = CloseOnExit(Arc::clone(self));
        self.runner.spawn(async move {
            let connection = &guard.0;
            connection.close.cancel();
            // not started yet, the halves are still parked here
            drop(connection.stream.lock().take());
        });
    }

    fn shutdown(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            self.close.cancel();
            self.outbound.clear();
            drop(self.permit.lock().take());
            debug!(connection_id = self.id, peer = ?self.peer_addr, "connection closed");
        }
    }

    async fn read_pipeline(self: Arc<Self>, mut reader: BoxedReader, _guard: CloseOnExit<T>) {
        let mut decoder = FrameDecoder::<T>::new(self.max_package_size);
        let mut buffer = BytesMut::with_capacity(self.read_buffer_size);

        loop {
            loop {
                match decoder.decode(&mut buffer) {
                    Ok(Some(frame)) => {
                        trace!(connection_id = self.id, %frame, "frame received");
                        self.inbound.deliver(InboundEnvelope {
                            frame,
                            origin: Arc::clone(&self),
                        });
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(connection_id = self.id, error = %e, "malformed frame, closing the connection");
                        return;
                    }
                }
            }

            let read = tokio::select! {
                res = reader.read_buf(&mut buffer) => res,
                _ = self.close.cancelled() => {
                    debug!(connection_id = self.id, "read pipeline cancelled");
                    return;
                }
            };
            match read {
                Ok(0) => {
                    if buffer.is_empty() && matches!(decoder.state(), ReadState::AwaitingHeader) {
                        debug!(connection_id = self.id, "peer closed the connection");
                    } else {
                        warn!(connection_id = self.id, "peer closed the connection mid-frame");
                    }
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    error!(connection_id = self.id, error = %e, "read failed, closing the connection");
                    return;
                }
            }
        }
    }

    async fn write_pipeline(self: Arc<Self>, writer: BoxedWriter, _guard: CloseOnExit<T>) {
        let mut writer = BufWriter::new(writer);
        let mut state = WriteState::Idle;

        loop {
            let next = tokio::select! {
                res = self.advance(state, &mut writer) => res,
                _ = self.close.cancelled() => {
                    debug!(connection_id = self.id, "write pipeline cancelled");
                    return;
                }
            };
            state = match next {
                Ok(next) => next,
                Err(e) => {
                    error!(connection_id = self.id, error = %e, "write failed, closing the connection");
                    return;
                }
            };
        }
    }

    /// One step of the write state machine.
    async fn advance<W>(&self, state: WriteState<T>, writer: &mut W) -> AppResult<WriteState<T>>
    where
        W: AsyncWrite + Unpin,
    {
        match state {
            WriteState::Idle => match self.outbound.pop_front() {
                Some(frame) => Ok(WriteState::WritingHeader(frame)),
                None => {
                    writer.flush().await?;
                    self.write_ready.notified().await;
                    Ok(WriteState::Idle)
                }
            },
            WriteState::WritingHeader(frame) => {
                let mut header = BytesMut::with_capacity(FrameHeader::<T>::SIZE);
                frame.header().encode(&mut header);
                writer.write_all(&header).await?;
                if frame.is_empty() {
                    Ok(WriteState::Idle)
                } else {
                    Ok(WriteState::WritingBody(frame))
                }
            }
            WriteState::WritingBody(frame) => {
                writer.write_all(frame.body()).await?;
                trace!(connection_id = self.id, %frame, "frame written");
                Ok(WriteState::Idle)
            }
        }
    }
}

impl<T: FrameTag> fmt::Debug for Connection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl<T: FrameTag> Drop for Connection<T> {
    fn drop(&mut self) {
        trace!(connection_id = self.id, "connection dropped");
    }
}

/// Marks the connection closed however a pipeline task ends, including the
/// runner dropping it mid-flight.
struct CloseOnExit<T: FrameTag>(ConnectionRef<T>);

impl<T: FrameTag> Drop for CloseOnExit<T> {
    fn drop(&mut self) {
        self.0.shutdown();
    }
}
