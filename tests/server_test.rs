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

use std::collections::BTreeSet;
use std::time::Duration;

use framewire::{setup_local_tracing, Client, Frame, NetworkConfig, Relay};
use rstest::{fixture, rstest};

mod common;
use common::{eventually, local_config, pump_until, running_server, Recorder};

#[fixture]
#[once]
fn setup() {
    setup_local_tracing().expect("failed to setup tracing");
}

fn connect(server_addr: std::net::SocketAddr) -> Client<u32> {
    Client::connect(server_addr, &NetworkConfig::default()).expect("connect")
}

#[rstest]
fn ids_are_unique_and_start_at_base(_setup: ()) {
    let mut server = running_server(local_config());
    let mut handler = Recorder::default();
    let clients: Vec<_> = (0..5).map(|_| connect(server.local_addr())).collect();

    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 5);
    let ids: BTreeSet<u32> = server.connections().map(|c| c.id()).collect();
    assert_eq!(ids, (1000..1005).collect());
    assert_eq!(handler.joined.len(), 5);

    // everyone leaves, three newcomers must get fresh ids
    drop(clients);
    eventually(|| {
        ids.iter()
            .all(|id| server.connection(*id).is_some_and(|c| !c.is_connected()))
    });
    let _more: Vec<_> = (0..3).map(|_| connect(server.local_addr())).collect();
    pump_until(&mut server, &mut handler, |_, h| h.joined.len() == 8);
    server.broadcast(&mut handler, &Frame::new(0), None);

    let ids: BTreeSet<u32> = server.connections().map(|c| c.id()).collect();
    assert_eq!(ids, (1005..1008).collect());
    assert_eq!(handler.left.len(), 5);
}

#[rstest]
fn relay_reaches_everyone_but_the_sender(_setup: ()) {
    let mut server = running_server(local_config());
    let mut relay = Relay;
    let a = connect(server.local_addr());
    let b = connect(server.local_addr());
    let c = connect(server.local_addr());
    pump_until(&mut server, &mut relay, |s, _| s.connection_count() == 3);

    let mut frame = Frame::new(11);
    frame.set_text("hello, everyone");
    a.send(frame);
    pump_until(&mut server, &mut relay, |s, _| s.inbound_len() == 0 && b.incoming().len() + c.incoming().len() == 2);

    for receiver in [&b, &c] {
        let got = receiver.recv_timeout(Duration::from_secs(5)).expect("relayed frame");
        assert_eq!(got.tag(), 11);
        assert_eq!(got.text(), "hello, everyone");
    }
    assert!(a.recv_timeout(Duration::from_millis(100)).is_none());
}

#[rstest]
fn departed_client_is_evicted_once(_setup: ()) {
    let mut server = running_server(local_config());
    let mut handler = Recorder::default();
    let stays = connect(server.local_addr());
    let leaves = connect(server.local_addr());
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 2);
    let leaving_id = handler.joined[1];

    leaves.disconnect();
    eventually(|| !leaves.is_connected());
    eventually(|| {
        server
            .connection(leaving_id)
            .is_some_and(|c| !c.is_connected())
    });

    server.broadcast(&mut handler, &Frame::new(4), None);
    server.broadcast(&mut handler, &Frame::new(4), None);
    assert_eq!(handler.left, vec![leaving_id]);
    assert_eq!(server.connection_count(), 1);
    assert!(stays.recv_timeout(Duration::from_secs(5)).is_some());
    assert!(stays.recv_timeout(Duration::from_secs(5)).is_some());
}

#[rstest]
fn refused_client_is_closed(_setup: ()) {
    let mut server = running_server(local_config());
    let mut handler = Recorder {
        refuse: true,
        ..Default::default()
    };
    let client = connect(server.local_addr());
    eventually(|| {
        server.pump(&mut handler, None, false);
        !client.is_connected()
    });
    assert_eq!(server.connection_count(), 0);
}

#[rstest]
fn connection_limit_holds_back_accepts(_setup: ()) {
    let mut server = running_server(local_config().with_max_connection(1));
    let mut handler = Recorder::default();
    let first = connect(server.local_addr());
    let _second = connect(server.local_addr());
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 1);

    std::thread::sleep(Duration::from_millis(100));
    server.pump(&mut handler, None, false);
    assert_eq!(handler.joined, vec![1000]);

    first.disconnect();
    pump_until(&mut server, &mut handler, |_, h| h.joined.len() == 2);
    assert_eq!(handler.joined, vec![1000, 1001]);
}

#[rstest]
fn stop_closes_every_connection(_setup: ()) {
    let mut server = running_server(local_config());
    let mut handler = Recorder::default();
    let client = connect(server.local_addr());
    pump_until(&mut server, &mut handler, |s, _| s.connection_count() == 1);

    server.stop();
    assert!(!server.is_running());
    eventually(|| !client.is_connected());
    assert!(server.connections().all(|c| !c.is_connected()));
}
