use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use bp_evt::EventClient;
use bp_net::ClientId;
use bp_rpc::{GenericBlob, RpcClient};
use bp_server::{Server, client::RpcEventControl, config::ServerConfig};

fn spawn_server() -> Arc<Server> {
    let config = ServerConfig {
        rpc_addr: "127.0.0.1:0".to_string(),
        evt_addr: "127.0.0.1:0".to_string(),
        arena_capacity: 64 * 1024,
        snapshot_path: std::env::temp_dir().join(format!("bp-test-evt-{:?}.snapshot", thread::current().id())),
        no_snapshot: true,
        stats_interval_secs: 3600,
        log_level: "info".to_string(),
    };
    let server = Arc::new(Server::build(&config).expect("server should bind"));
    {
        let server = server.clone();
        thread::spawn(move || server.rpc.run());
    }
    {
        let server = server.clone();
        thread::spawn(move || server.evt.run());
    }
    thread::sleep(Duration::from_millis(30));
    server
}

#[test]
fn pubsub_delivers_emitted_payload() {
    let server = spawn_server();
    let evt_addr = server.evt.local_addr().unwrap();
    let rpc_addr = server.rpc.local_addr().unwrap();

    let control_a = Arc::new(RpcEventControl(RpcClient::connect(rpc_addr, ClientId(101)).unwrap()));
    let client_a = EventClient::connect(evt_addr, ClientId(1), control_a, "test-a", "host").unwrap();

    let control_b = Arc::new(RpcEventControl(RpcClient::connect(rpc_addr, ClientId(102)).unwrap()));
    let client_b = EventClient::connect(evt_addr, ClientId(2), control_b, "test-b", "host").unwrap();

    client_a.register("t::e").unwrap();

    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    assert!(client_b.subscribe("t::e", move |payload| {
        *received_clone.lock().unwrap() = Some(payload.to_vec());
    }));

    thread::sleep(Duration::from_millis(50));
    assert!(client_a.emit("t::e", b"hello"));

    thread::sleep(Duration::from_millis(100));
    assert_eq!(received.lock().unwrap().as_deref(), Some(&b"hello"[..]));

    server.shutdown();
}

#[test]
fn watch_fires_event_on_matching_write() {
    let server = spawn_server();
    let evt_addr = server.evt.local_addr().unwrap();
    let rpc_addr = server.rpc.local_addr().unwrap();

    let control = Arc::new(RpcEventControl(RpcClient::connect(rpc_addr, ClientId(201)).unwrap()));
    let client = EventClient::connect(evt_addr, ClientId(3), control, "watcher", "host").unwrap();

    let watch_rpc = RpcClient::connect(rpc_addr, ClientId(202)).unwrap();
    let payload = GenericBlob::new(b"/x/*/value".to_vec()).encode();
    let (_, body) = watch_rpc.call(bp_server::procedures::RDB_WATCH, &payload).unwrap();
    let event_name = String::from_utf8(body).unwrap();
    assert_eq!(event_name, bp_rdb::WatchSet::make_event_name("/x/*/value"));

    // `RdbStore::watch` registers the event with the bus before returning
    // its name, so a client can subscribe straight away without a separate
    // `register` round trip.
    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    assert!(client.subscribe(&event_name, move |payload| {
        *received_clone.lock().unwrap() = Some(payload.to_vec());
    }));

    thread::sleep(Duration::from_millis(50));

    let mut create_payload = GenericBlob::new(b"/x/y/value".to_vec()).encode();
    create_payload.push(bp_rdb::RdbValueType::Int32 as u8);
    create_payload.extend_from_slice(&0u64.to_le_bytes());
    create_payload.extend_from_slice(&GenericBlob::new(vec![1, 0, 0, 0]).encode());
    watch_rpc.call(bp_server::procedures::RDB_CREATE_VALUE_DIRECT, &create_payload).unwrap();

    thread::sleep(Duration::from_millis(100));

    let frame = received.lock().unwrap().clone().expect("watch event should have fired");
    assert_eq!(&frame[..bp_rdb::RDB_MAX_KEY_SIZE][..10], b"/x/y/value");
    let size = u64::from_le_bytes(frame[bp_rdb::RDB_MAX_KEY_SIZE..bp_rdb::RDB_MAX_KEY_SIZE + 8].try_into().unwrap());
    assert_eq!(size, 4);
    assert_eq!(&frame[bp_rdb::RDB_MAX_KEY_SIZE + 8..], &[1, 0, 0, 0]);

    server.shutdown();
}
