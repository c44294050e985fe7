use std::{
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

use bp_evt::EventClient;
use bp_net::ClientId;
use bp_rdb::{RdbProxyValue, RdbValueType};
use bp_rpc::RpcClient;
use bp_server::{
    Server,
    client::{EventClientSubscribe, RpcEventControl, RpcRdbControl},
    config::ServerConfig,
};

fn spawn_server() -> Arc<Server> {
    let config = ServerConfig {
        rpc_addr: "127.0.0.1:0".to_string(),
        evt_addr: "127.0.0.1:0".to_string(),
        arena_capacity: 64 * 1024,
        snapshot_path: std::env::temp_dir().join(format!("bp-test-proxy-{:?}.snapshot", thread::current().id())),
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

/// Drives `RdbProxyValue` over real sockets: `create`/`set_*`/`get_*` through
/// `RpcRdbControl`, and `watch` through the same channel followed by a real
/// `EventClient` subscribe, exactly as `RdbProxyValue::watch` wires them.
#[test]
fn proxy_create_write_read_round_trips_over_rpc() {
    let server = spawn_server();
    let rpc_addr = server.rpc.local_addr().unwrap();

    let rdb = RpcRdbControl(RpcClient::connect(rpc_addr, ClientId(1)).unwrap());
    let evt_control = Arc::new(RpcEventControl(RpcClient::connect(rpc_addr, ClientId(2)).unwrap()));
    let events = EventClientSubscribe(
        EventClient::connect(server.evt.local_addr().unwrap(), ClientId(10), evt_control, "proxy-test", "host").unwrap(),
    );

    let proxy = RdbProxyValue::new(&rdb, &events, "/x/count");
    assert!(proxy.create(RdbValueType::Uint32, 0));
    assert!(proxy.exists());
    assert!(proxy.set_u32(7));
    assert_eq!(proxy.get_u32(), Some(7));
    assert_eq!(proxy.metadata(), Some(RdbValueType::Uint32));

    server.shutdown();
}

#[test]
fn proxy_watch_auto_subscribes_and_delivers_the_write() {
    let server = spawn_server();
    let rpc_addr = server.rpc.local_addr().unwrap();

    let rdb = RpcRdbControl(RpcClient::connect(rpc_addr, ClientId(3)).unwrap());
    let evt_control = Arc::new(RpcEventControl(RpcClient::connect(rpc_addr, ClientId(4)).unwrap()));
    let events = EventClientSubscribe(
        EventClient::connect(server.evt.local_addr().unwrap(), ClientId(11), evt_control, "proxy-watcher", "host").unwrap(),
    );

    let watched = RdbProxyValue::new(&rdb, &events, "/x/*/value");
    let received: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    let received_clone = received.clone();
    assert!(watched.watch(move |payload| {
        *received_clone.lock().unwrap() = Some(payload.to_vec());
    }));

    thread::sleep(Duration::from_millis(50));

    let target = RdbProxyValue::new(&rdb, &events, "/x/y/value");
    assert!(target.create(RdbValueType::Int32, 0));
    assert!(target.set_i32(5));

    thread::sleep(Duration::from_millis(100));

    let frame = received.lock().unwrap().clone().expect("watch callback should have fired");
    assert_eq!(&frame[..bp_rdb::RDB_MAX_KEY_SIZE][..10], b"/x/y/value");
    let size = u64::from_le_bytes(frame[bp_rdb::RDB_MAX_KEY_SIZE..bp_rdb::RDB_MAX_KEY_SIZE + 8].try_into().unwrap());
    assert_eq!(size, 4);
    assert_eq!(&frame[bp_rdb::RDB_MAX_KEY_SIZE + 8..], &5i32.to_le_bytes());

    assert!(watched.unwatch());

    server.shutdown();
}
