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

use std::thread::{self, JoinHandle};

use tokio::runtime::{self, Handle};
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::{AppResult, Shutdown};

/// The single background worker that drives every connection's socket I/O.
///
/// A current-thread tokio runtime parked on its own OS thread. Work reaches it
/// only through [`handle`](Self::handle). Stopping drops the runtime, which
/// cancels all pipeline tasks and closes their sockets.
#[derive(Debug)]
pub struct IoRunner {
    handle: Handle,
    notify_shutdown: broadcast::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl IoRunner {
    pub fn start(name: &str) -> AppResult<IoRunner> {
        let rt = runtime::Builder::new_current_thread().enable_all().build()?;
        let handle = rt.handle().clone();
        let (notify_shutdown, _) = broadcast::channel(1);
        let mut shutdown = Shutdown::new(notify_shutdown.subscribe());

        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!("io runner started");
                rt.block_on(shutdown.recv());
                drop(rt);
                debug!("io runner exited");
            })?;

        Ok(IoRunner {
            handle,
            notify_shutdown,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Halts the runner and joins its thread.
    pub fn stop(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // no receiver left means the thread is already on its way out
        let _ = self.notify_shutdown.send(());
        if thread.join().is_err() {
            error!("io runner thread panicked");
        }
    }
}

impl Drop for IoRunner {
    fn drop(&mut self) {
        self.stop();
    }
}
