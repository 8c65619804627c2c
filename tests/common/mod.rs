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

#![allow(dead_code)]

use std::time::{Duration, Instant};

use framewire::{ConnectionRef, Frame, NetworkConfig, Server, ServerHandler};

/// Records everything the server hands to the application.
#[derive(Default)]
pub struct Recorder {
    pub messages: Vec<(u32, Frame<u32>)>,
    pub joined: Vec<u32>,
    pub left: Vec<u32>,
    pub refuse: bool,
}

impl ServerHandler<u32> for Recorder {
    fn on_message(&mut self, _server: &mut Server<u32>, connection: ConnectionRef<u32>, frame: Frame<u32>) {
        self.messages.push((connection.id(), frame));
    }

    fn on_client_connect(&mut self, connection: &ConnectionRef<u32>) -> bool {
        if self.refuse {
            return false;
        }
        self.joined.push(connection.id());
        true
    }

    fn on_client_disconnect(&mut self, connection: &ConnectionRef<u32>) {
        self.left.push(connection.id());
    }
}

pub fn running_server(config: NetworkConfig) -> Server<u32> {
    let mut server = Server::bind(config).expect("bind");
    server.run().expect("run");
    server
}

pub fn local_config() -> NetworkConfig {
    NetworkConfig::new("127.0.0.1", 0)
}

/// Pumps until `done` holds, failing the test after five seconds.
pub fn pump_until<H, F>(server: &mut Server<u32>, handler: &mut H, mut done: F)
where
    H: ServerHandler<u32>,
    F: FnMut(&Server<u32>, &H) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(&*server, &*handler) {
        assert!(Instant::now() < deadline, "condition not reached in time");
        if server.wait_for(Duration::from_millis(20)) {
            server.pump(handler, None, false);
        }
    }
}

pub fn eventually(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}
