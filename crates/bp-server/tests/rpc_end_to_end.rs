use std::{sync::Arc, thread, time::Duration};

use bp_net::ClientId;
use bp_rpc::RpcClient;
use bp_server::{Server, config::ServerConfig};

fn spawn_server() -> (Arc<Server>, ServerConfig) {
    let config = ServerConfig {
        rpc_addr: "127.0.0.1:0".to_string(),
        evt_addr: "127.0.0.1:0".to_string(),
        arena_capacity: 64 * 1024,
        snapshot_path: std::env::temp_dir().join(format!("bp-test-{:?}.snapshot", thread::current().id())),
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
    (server, config)
}

fn rpc_addr(server: &Server) -> std::net::SocketAddr {
    // `ServerConfig::rpc_addr` is "127.0.0.1:0"; the actual bound port lives
    // on the listener itself, so tests connect through it directly.
    server.rpc.local_addr().expect("rpc listener should have an address")
}

#[test]
fn echo_round_trips_payload() {
    let (server, _config) = spawn_server();
    let client = RpcClient::connect(rpc_addr(&server), ClientId(1)).unwrap();

    let (status, body) = client.call(bp_server::procedures::ECHO, &42u32.to_le_bytes()).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);
    assert_eq!(body, 42u32.to_le_bytes());

    server.shutdown();
}

#[test]
fn create_then_read_scalar_via_rpc() {
    let (server, _config) = spawn_server();
    let client = RpcClient::connect(rpc_addr(&server), ClientId(1)).unwrap();

    let key = bp_rpc::GenericBlob::new(b"/x/a".to_vec()).encode();
    let mut create_payload = key.clone();
    create_payload.push(bp_rdb::RdbValueType::Int32 as u8);
    create_payload.extend_from_slice(&0u64.to_le_bytes());
    create_payload.extend_from_slice(&bp_rpc::GenericBlob::new(vec![10, 0, 0, 0]).encode());

    let (status, _) = client.call(bp_server::procedures::RDB_CREATE_VALUE_DIRECT, &create_payload).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);

    let read_payload = bp_rpc::GenericBlob::new(b"/x/a".to_vec()).encode();
    let (status, body) = client.call(bp_server::procedures::RDB_READ_VALUE_DIRECT, &read_payload).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);
    assert_eq!(body, vec![10, 0, 0, 0]);

    server.shutdown();
}

#[test]
fn array_read_decodes_multiple_elements() {
    let (server, _config) = spawn_server();
    let client = RpcClient::connect(rpc_addr(&server), ClientId(1)).unwrap();

    let floats: [f32; 3] = [9.0, 9.0, 9.0];
    let mut bytes = Vec::new();
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }

    let mut create_payload = bp_rpc::GenericBlob::new(b"/x/arr".to_vec()).encode();
    create_payload.push(bp_rdb::RdbValueType::Float32 as u8);
    create_payload.extend_from_slice(&3u64.to_le_bytes());
    create_payload.extend_from_slice(&bp_rpc::GenericBlob::new(bytes.clone()).encode());

    let (status, _) = client.call(bp_server::procedures::RDB_CREATE_VALUE_DIRECT, &create_payload).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);

    let read_payload = bp_rpc::GenericBlob::new(b"/x/arr".to_vec()).encode();
    let (_, body) = client.call(bp_server::procedures::RDB_READ_VALUE_DIRECT, &read_payload).unwrap();
    assert_eq!(body.len(), 12);
    assert_eq!(body, bytes);

    server.shutdown();
}

#[test]
fn run_control_start_stop_cycles_status() {
    let (server, _config) = spawn_server();
    let client = RpcClient::connect(rpc_addr(&server), ClientId(1)).unwrap();

    let (status, _) = client.call(bp_server::procedures::RUN_START, &[]).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);
    assert_eq!(server.store.read_value("/system/run/status"), Some(vec![bp_server::run_control::RUNNING]));

    let (status, _) = client.call(bp_server::procedures::RUN_STOP, &[]).unwrap();
    assert_eq!(status, bp_rpc::Status::Ok);
    assert_eq!(server.store.read_value("/system/run/status"), Some(vec![bp_server::run_control::STOPPED]));

    server.shutdown();
}

#[test]
fn unknown_key_read_is_not_found() {
    let (server, _config) = spawn_server();
    let client = RpcClient::connect(rpc_addr(&server), ClientId(1)).unwrap();

    let read_payload = bp_rpc::GenericBlob::new(b"/no/such/key".to_vec()).encode();
    let (status, _) = client.call(bp_server::procedures::RDB_READ_VALUE_DIRECT, &read_payload).unwrap();
    assert_eq!(status, bp_rpc::Status::NotFound);

    server.shutdown();
}
