use std::{sync::Arc, thread, time::Duration};

use bp_net::ClientId;
use bp_rpc::{GenericBlob, RpcClient};
use bp_rdb::RdbValueType;
use bp_server::{Server, config::ServerConfig};

fn config(snapshot_path: std::path::PathBuf, no_snapshot: bool) -> ServerConfig {
    ServerConfig {
        rpc_addr: "127.0.0.1:0".to_string(),
        evt_addr: "127.0.0.1:0".to_string(),
        arena_capacity: 256 * 1024,
        snapshot_path,
        no_snapshot,
        stats_interval_secs: 3600,
        log_level: "info".to_string(),
    }
}

fn spawn(config: &ServerConfig) -> Arc<Server> {
    let server = Arc::new(Server::build(config).expect("server should bind"));
    {
        let server = server.clone();
        thread::spawn(move || server.rpc.run());
    }
    thread::sleep(Duration::from_millis(20));
    server
}

const VALUE_TYPES: [RdbValueType; 6] = [
    RdbValueType::Int32,
    RdbValueType::Uint32,
    RdbValueType::Int64,
    RdbValueType::Float32,
    RdbValueType::Float64,
    RdbValueType::Bool,
];

fn payload_for(value_type: RdbValueType, seed: u64) -> Vec<u8> {
    match value_type {
        RdbValueType::Int32 => (seed as i32).to_le_bytes().to_vec(),
        RdbValueType::Uint32 => (seed as u32).to_le_bytes().to_vec(),
        RdbValueType::Int64 => (seed as i64).to_le_bytes().to_vec(),
        RdbValueType::Float32 => (seed as f32).to_le_bytes().to_vec(),
        RdbValueType::Float64 => (seed as f64).to_le_bytes().to_vec(),
        RdbValueType::Bool => vec![(seed % 2) as u8],
        _ => unreachable!("test only exercises fixed-width scalar types"),
    }
}

#[test]
fn snapshot_round_trips_one_hundred_mixed_keys() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot_path = dir.path().join("bp-rdb.snapshot");

    let first_config = config(snapshot_path.clone(), false);
    let server = spawn(&first_config);
    let client = RpcClient::connect(server.rpc.local_addr().unwrap(), ClientId(1)).unwrap();

    let mut expected = Vec::new();
    for i in 0..100u64 {
        let value_type = VALUE_TYPES[(i % VALUE_TYPES.len() as u64) as usize];
        let key = format!("/snap/{i}");
        let value = payload_for(value_type, i);

        let mut create_payload = GenericBlob::new(key.as_bytes().to_vec()).encode();
        create_payload.push(value_type as u8);
        create_payload.extend_from_slice(&0u64.to_le_bytes());
        create_payload.extend_from_slice(&GenericBlob::new(value.clone()).encode());

        let (status, _) = client.call(bp_server::procedures::RDB_CREATE_VALUE_DIRECT, &create_payload).unwrap();
        assert_eq!(status, bp_rpc::Status::Ok, "create should succeed for {key}");

        expected.push((key, value));
    }

    server.save_snapshot(&first_config);
    server.shutdown();

    let second_config = config(snapshot_path, false);
    let restarted = spawn(&second_config);

    for (key, value) in expected {
        assert_eq!(restarted.store.read_value(&key), Some(value), "key {key} should survive the restart");
    }
    assert_eq!(restarted.store.list_keys().iter().filter(|k| k.starts_with("/snap/")).count(), 100);

    restarted.shutdown();
}
