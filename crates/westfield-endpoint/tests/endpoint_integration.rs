//! Endpoint integration tests
//!
//! Real clients over unix sockets in a temporary runtime directory.

use pretty_assertions::assert_eq;
use std::io::Write;
use std::os::unix::net::UnixStream;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use westfield_endpoint::*;

fn frame(object: u32, opcode: u16, payload_words: usize) -> Vec<u8> {
    let size = (8 + payload_words * 4) as u32;
    let mut out = Vec::new();
    out.extend_from_slice(&object.to_ne_bytes());
    out.extend_from_slice(&(size << 16 | u32::from(opcode)).to_ne_bytes());
    out.resize(size as usize, 0);
    out
}

fn endpoint(dir: &TempDir) -> Endpoint {
    let mut config = EndpointConfig::default();
    config.display.runtime_dir = Some(dir.path().to_path_buf());
    Endpoint::new(&config).unwrap()
}

fn pump_until(endpoint: &Endpoint, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for endpoint");
        endpoint.dispatch(Some(Duration::from_millis(20))).unwrap();
    }
}

#[test]
fn test_counts_complete_frames_across_reads() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint(&dir);
    let stats = endpoint.stats();
    assert_eq!(endpoint.socket_name(), "wayland-0");

    let mut stream = UnixStream::connect(dir.path().join(endpoint.socket_name())).unwrap();
    pump_until(&endpoint, || stats.live_clients() == 1);
    let id = endpoint.display().clients()[0].id();

    let mut bytes = frame(1, 0, 2);
    bytes.extend(frame(2, 1, 0));
    bytes.extend(frame(3, 2, 3));
    let (head, tail) = bytes.split_at(20);

    stream.write_all(head).unwrap();
    pump_until(&endpoint, || stats.client(id).unwrap().frames == 1);
    assert_eq!(stats.client(id).unwrap().bytes, 16);

    stream.write_all(tail).unwrap();
    pump_until(&endpoint, || stats.client(id).unwrap().frames == 3);
    assert_eq!(
        stats.client(id).unwrap(),
        ClientStats {
            frames: 3,
            bytes: bytes.len() as u64,
            fds: 0
        }
    );
}

#[test]
fn test_malformed_frame_drops_client() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint(&dir);
    let stats = endpoint.stats();

    let mut stream = UnixStream::connect(dir.path().join(endpoint.socket_name())).unwrap();
    pump_until(&endpoint, || stats.live_clients() == 1);

    let mut bad = frame(1, 0, 0);
    bad[4..8].copy_from_slice(&(6u32 << 16).to_ne_bytes());
    stream.write_all(&bad).unwrap();
    pump_until(&endpoint, || stats.live_clients() == 0);

    let totals = stats.totals();
    assert_eq!(totals.framing_errors, 1);
    assert_eq!(totals.clients_closed, 1);
    assert_eq!(endpoint.display().client_count(), 0);
}

#[test]
fn test_explicit_socket_name_and_shm() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = EndpointConfig::default();
    config.display.runtime_dir = Some(dir.path().to_path_buf());
    config.endpoint.socket_name = Some("westfield-test".to_string());
    let endpoint = Endpoint::new(&config).unwrap();

    assert_eq!(endpoint.socket_name(), "westfield-test");
    assert!(dir.path().join("westfield-test").exists());
    assert_eq!(endpoint.display().shm_formats().len(), 2);

    endpoint.shutdown();
    assert!(!dir.path().join("westfield-test").exists());
}

#[tokio::test(flavor = "current_thread")]
async fn test_run_serves_until_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let endpoint = endpoint(&dir);
    let stats = endpoint.stats();
    let path = dir.path().join(endpoint.socket_name());

    let mut stream = UnixStream::connect(&path).unwrap();
    stream.write_all(&frame(1, 0, 1)).unwrap();

    let watched = stats.clone();
    let shutdown = async move {
        let deadline = Instant::now() + Duration::from_secs(5);
        while watched.totals().traffic.frames < 1 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    };
    endpoint.run(shutdown).await.unwrap();

    let totals = stats.totals();
    assert_eq!(totals.clients_seen, 1);
    assert_eq!(totals.traffic.frames, 1);
    // Teardown closed the remaining client
    assert_eq!(totals.clients_closed, 1);
    assert_eq!(stats.live_clients(), 0);
}
