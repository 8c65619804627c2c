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

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use framewire::{
    setup_tracing, AppResult, ConnectionRef, Frame, Server, ServerHandler, TransportConfig,
};
use tokio::{runtime, signal};
use tracing::{error, info};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// overrides network.port from the config file
    #[arg(short, long)]
    pub port: Option<u16>,
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
}

/// Relays every frame to the other clients and logs membership changes.
struct LoggingRelay;

impl ServerHandler<u32> for LoggingRelay {
    fn on_message(&mut self, server: &mut Server<u32>, connection: ConnectionRef<u32>, frame: Frame<u32>) {
        info!(connection_id = connection.id(), %frame, "relaying");
        server.broadcast(self, &frame, Some(&connection));
    }

    fn on_client_connect(&mut self, connection: &ConnectionRef<u32>) -> bool {
        info!(connection_id = connection.id(), peer = ?connection.peer_addr(), "client joined");
        true
    }

    fn on_client_disconnect(&mut self, connection: &ConnectionRef<u32>) {
        info!(connection_id = connection.id(), "client left");
    }
}

fn main() -> AppResult<()> {
    let commandline: CommandLine = CommandLine::parse();
    let mut config = match &commandline.conf {
        Some(path) => TransportConfig::set_up_config(PathBuf::from(path))?,
        None => TransportConfig::default(),
    };
    if let Some(port) = commandline.port {
        config.network.port = port;
    }
    if let Some(Command::PrintConfig) = commandline.command {
        println!("{:#?}", config);
        return Ok(());
    }

    let _log_guard = setup_tracing(&config.log)?;

    let mut server = Server::<u32>::bind(config.network.clone())?;
    server.run()?;

    // ctrl-c is watched on its own small runtime so the pump loop stays plain
    let stop = Arc::new(AtomicBool::new(false));
    let rt = runtime::Builder::new_current_thread().enable_all().build()?;
    let signal_stop = Arc::clone(&stop);
    thread::spawn(move || {
        if let Err(e) = rt.block_on(signal::ctrl_c()) {
            error!(error = %e, "failed to listen for ctrl-c");
        }
        info!("get shutdown signal");
        signal_stop.store(true, Ordering::Release);
    });

    let mut handler = LoggingRelay;
    while !stop.load(Ordering::Acquire) {
        if server.wait_for(Duration::from_millis(200)) {
            server.pump(&mut handler, None, false);
        }
    }

    server.stop();
    info!("relay shutdown complete");
    Ok(())
}
