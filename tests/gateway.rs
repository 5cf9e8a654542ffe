//! End-to-end gateway tests
//!
//! Each test boots the full stack (TCP listener, negotiator, worker, sink,
//! JSONL store) on an ephemeral port, connects as a device and checks both
//! the wire acks and the persisted records.

use avlgate_core::core::{
    CanonicalStatusRecord, DeviceFamily, DeviceResponse, FileStore, GatewayServer, Negotiator,
    WorkerSettings,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const TELTONIKA_LOGIN: &str = "000f333536333037303433373231353739";
const TELTONIKA_FRAME: &str = "000000002d0801000001905a2fcb00010f272306209c8f560070010e090040ef0402ef0171610118004001100016e3600001530c";
const GT06_LOGIN: &str = "78781101012345678901234505184dd80001cb970d0a";
const GT06_GPS: &str = "7878171218061b0e3514c9026b3f6d0c3d46d550290e00029bdc0d0a";
const GT06_LOGIN_ACK: &str = "78781101000168910d0a";
const INTELLITRAC_LOGIN: &str = "00010001000800007048860ddf79";
const INTELLITRAC_POSITION: &str = "00020002002e00007048860ddf79240627145320015806cb06ccb59300003403250a8c0016e360000c090001000103ca00050000";
const INTELLITRAC_RESPONSE: &str = "000902040008244f4b3a504f4c4c";
const AQUILA_LINE: &str = "$$AQTRK,869867038152396,21,22.546123,114.079123,240627145320,1,63,270,9,52,1500000,124,87,1,3;0C:0FA0;0D:3F;05:5A*40\r\n";

struct TestGateway {
    addr: std::net::SocketAddr,
    data_dir: TempDir,
    _server: tokio::task::JoinHandle<()>,
}

async fn start_gateway(verify: bool, allowlist: Option<&str>) -> TestGateway {
    let data_dir = TempDir::new().unwrap();

    let allowlist_path = allowlist.map(|content| {
        let path = data_dir.path().join("devices.csv");
        std::fs::write(&path, content).unwrap();
        path
    });
    let store = FileStore::open(data_dir.path(), allowlist_path.as_deref())
        .await
        .unwrap();

    let negotiator = Negotiator::with_families(
        &[
            DeviceFamily::Teltonika,
            DeviceFamily::Gt06,
            DeviceFamily::IntelliTrac,
            DeviceFamily::Aquila,
        ],
        true,
    );
    let server = GatewayServer::new(
        negotiator,
        Arc::new(store),
        WorkerSettings {
            queue_capacity: 64,
            verify_devices: verify,
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let _ = server.serve_on(listener).await;
    });

    TestGateway {
        addr,
        data_dir,
        _server: handle,
    }
}

async fn read_jsonl(path: &Path) -> Vec<String> {
    // the worker persists asynchronously; poll briefly
    for _ in 0..50 {
        if let Ok(text) = tokio::fs::read_to_string(path).await {
            if !text.is_empty() {
                return text.lines().map(str::to_string).collect();
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Vec::new()
}

#[tokio::test]
async fn test_teltonika_device_round_trip() {
    let gateway = start_gateway(false, None).await;
    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();

    socket
        .write_all(&hex::decode(TELTONIKA_LOGIN).unwrap())
        .await
        .unwrap();
    let mut ack = [0u8; 1];
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x01]);

    socket
        .write_all(&hex::decode(TELTONIKA_FRAME).unwrap())
        .await
        .unwrap();
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x01], "data ack echoes the record count");
    socket.shutdown().await.unwrap();

    let lines = read_jsonl(&gateway.data_dir.path().join("356307043721579.jsonl")).await;
    assert_eq!(lines.len(), 1);
    let record: CanonicalStatusRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.family, DeviceFamily::Teltonika);
    assert_eq!(record.battery_level, Some(97));
    assert_eq!(record.odometer, Some(1_500_000));
}

#[tokio::test]
async fn test_gt06_device_round_trip() {
    let gateway = start_gateway(false, None).await;
    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();

    socket
        .write_all(&hex::decode(GT06_LOGIN).unwrap())
        .await
        .unwrap();
    let expected_ack = hex::decode(GT06_LOGIN_ACK).unwrap();
    let mut ack = vec![0u8; expected_ack.len()];
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, expected_ack);

    socket
        .write_all(&hex::decode(GT06_GPS).unwrap())
        .await
        .unwrap();
    socket.shutdown().await.unwrap();

    let lines = read_jsonl(&gateway.data_dir.path().join("123456789012345.jsonl")).await;
    assert_eq!(lines.len(), 1);
    let record: CanonicalStatusRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.family, DeviceFamily::Gt06);
    assert!((record.position.latitude - 22.546_122_777_777_78).abs() < 1e-9);
    assert_eq!(record.position.satellites, 9);
}

#[tokio::test]
async fn test_intellitrac_telemetry_and_command_response() {
    let gateway = start_gateway(false, None).await;
    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();

    socket
        .write_all(&hex::decode(INTELLITRAC_LOGIN).unwrap())
        .await
        .unwrap();
    let mut ack = [0u8; 6];
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack.to_vec(), hex::decode("000100030000").unwrap());

    socket
        .write_all(&hex::decode(INTELLITRAC_POSITION).unwrap())
        .await
        .unwrap();
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack.to_vec(), hex::decode("000200030000").unwrap());

    socket
        .write_all(&hex::decode(INTELLITRAC_RESPONSE).unwrap())
        .await
        .unwrap();
    socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack.to_vec(), hex::decode("000902030000").unwrap());
    socket.shutdown().await.unwrap();

    let lines = read_jsonl(&gateway.data_dir.path().join("123456789012345.jsonl")).await;
    assert_eq!(lines.len(), 1);
    let record: CanonicalStatusRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.family, DeviceFamily::IntelliTrac);
    assert_eq!(record.vehicle.overspeed, Some(true));

    let responses = read_jsonl(
        &gateway
            .data_dir
            .path()
            .join("123456789012345.responses.jsonl"),
    )
    .await;
    assert_eq!(responses.len(), 1);
    let response: DeviceResponse = serde_json::from_str(&responses[0]).unwrap();
    assert_eq!(response.content, "$OK:POLL");
}

#[tokio::test]
async fn test_aquila_line_needs_no_ack() {
    let gateway = start_gateway(false, None).await;
    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();

    socket.write_all(AQUILA_LINE.as_bytes()).await.unwrap();
    socket.shutdown().await.unwrap();

    // nothing comes back; the connection just closes
    let mut buf = Vec::new();
    socket.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());

    let lines = read_jsonl(&gateway.data_dir.path().join("869867038152396.jsonl")).await;
    assert_eq!(lines.len(), 1);
    let record: CanonicalStatusRecord = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(record.family, DeviceFamily::Aquila);
    assert_eq!(record.odometer, Some(1_500_000));
}

#[tokio::test]
async fn test_unknown_protocol_closes_without_ack() {
    let gateway = start_gateway(false, None).await;
    let mut socket = TcpStream::connect(gateway.addr).await.unwrap();

    socket
        .write_all(&[0x76, 0x76, 0xFA, 0xFA, 0xFA, 0xFA])
        .await
        .unwrap();
    socket.shutdown().await.unwrap();

    let mut buf = Vec::new();
    socket.read_to_end(&mut buf).await.unwrap();
    assert!(buf.is_empty());
}

#[tokio::test]
async fn test_allowlist_rejects_unknown_imei() {
    let gateway = start_gateway(true, Some("356307043721579,teltonika\n")).await;

    // listed device gets through
    let mut ok_socket = TcpStream::connect(gateway.addr).await.unwrap();
    ok_socket
        .write_all(&hex::decode(TELTONIKA_LOGIN).unwrap())
        .await
        .unwrap();
    let mut ack = [0u8; 1];
    ok_socket.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack, [0x01]);
    ok_socket.shutdown().await.unwrap();

    // unlisted device is cut off after the login ack, frames go nowhere
    let mut bad_socket = TcpStream::connect(gateway.addr).await.unwrap();
    bad_socket
        .write_all(&hex::decode(GT06_LOGIN).unwrap())
        .await
        .unwrap();
    bad_socket
        .write_all(&hex::decode(GT06_GPS).unwrap())
        .await
        .unwrap();
    bad_socket.shutdown().await.unwrap();
    let mut rest = Vec::new();
    let _ = bad_socket.read_to_end(&mut rest).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!gateway.data_dir.path().join("123456789012345.jsonl").exists());
}

#[tokio::test]
async fn test_two_devices_interleave_without_crosstalk() {
    let gateway = start_gateway(false, None).await;

    let mut teltonika = TcpStream::connect(gateway.addr).await.unwrap();
    let mut gt06 = TcpStream::connect(gateway.addr).await.unwrap();

    teltonika
        .write_all(&hex::decode(TELTONIKA_LOGIN).unwrap())
        .await
        .unwrap();
    gt06.write_all(&hex::decode(GT06_LOGIN).unwrap())
        .await
        .unwrap();

    let mut ack = [0u8; 1];
    teltonika.read_exact(&mut ack).await.unwrap();
    let mut gt06_ack = vec![0u8; hex::decode(GT06_LOGIN_ACK).unwrap().len()];
    gt06.read_exact(&mut gt06_ack).await.unwrap();

    gt06.write_all(&hex::decode(GT06_GPS).unwrap()).await.unwrap();
    teltonika
        .write_all(&hex::decode(TELTONIKA_FRAME).unwrap())
        .await
        .unwrap();
    teltonika.read_exact(&mut ack).await.unwrap();

    teltonika.shutdown().await.unwrap();
    gt06.shutdown().await.unwrap();

    let teltonika_lines =
        read_jsonl(&gateway.data_dir.path().join("356307043721579.jsonl")).await;
    let gt06_lines = read_jsonl(&gateway.data_dir.path().join("123456789012345.jsonl")).await;
    assert_eq!(teltonika_lines.len(), 1);
    assert_eq!(gt06_lines.len(), 1);

    let teltonika_record: CanonicalStatusRecord =
        serde_json::from_str(&teltonika_lines[0]).unwrap();
    let gt06_record: CanonicalStatusRecord = serde_json::from_str(&gt06_lines[0]).unwrap();
    assert_eq!(teltonika_record.device_id, "356307043721579");
    assert_eq!(gt06_record.device_id, "123456789012345");
}
