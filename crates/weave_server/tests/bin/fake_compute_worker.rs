//! Fixture binary for the integration tests in this crate's `tests/` directory.
//!
//! Speaks the real compute worker's wire protocol (`weave_protocol`) over a Unix socket, so
//! `ComputeClient::spawn` in a test exercises an actual process boundary instead of a mock
//! struct standing in for one. Every request gets a success response unless a `delay_ms` file
//! sits next to the socket (see [`read_delay`]) or `FAKE_COMPUTE_MODE=error` is set, in which
//! case every request gets a `ResponseErr` instead.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::Duration;

use weave_protocol::{decode_request, encode_err, encode_ok, GenerationError, ImageResult, HEADER_LEN};

fn socket_path_arg() -> PathBuf {
    let args: Vec<String> = std::env::args().collect();
    let value = args
        .iter()
        .position(|a| a == "--socket-path")
        .and_then(|i| args.get(i + 1))
        .expect("--socket-path is required");
    PathBuf::from(value)
}

/// Tests control the artificial per-response latency by writing milliseconds as text to
/// `<socket-path>.delay_ms`, read fresh before every response so a running test can change it
/// mid-scenario without restarting the worker.
fn read_delay(socket_path: &Path) -> Duration {
    let marker = socket_path.with_extension("delay_ms");
    match std::fs::read_to_string(&marker) {
        Ok(text) => Duration::from_millis(text.trim().parse().unwrap_or(0)),
        Err(_) => Duration::ZERO,
    }
}

fn main() {
    let socket_path = socket_path_arg();
    let mut stream = UnixStream::connect(&socket_path).expect("failed to connect to test socket");
    let force_error = std::env::var("FAKE_COMPUTE_MODE").as_deref() == Ok("error");

    loop {
        let mut header = [0u8; HEADER_LEN];
        if stream.read_exact(&mut header).is_err() {
            break;
        }
        let payload_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut frame = Vec::with_capacity(HEADER_LEN + payload_len);
        frame.extend_from_slice(&header);
        frame.resize(HEADER_LEN + payload_len, 0);
        if stream.read_exact(&mut frame[HEADER_LEN..]).is_err() {
            break;
        }

        let request = decode_request(&frame).expect("test harness sent a malformed request frame");

        let delay = read_delay(&socket_path);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let response = if force_error {
            encode_err(&GenerationError {
                request_id: request.request_id,
                code: 500,
                message: "fake compute worker forced failure".into(),
            })
        } else {
            let image_bytes = vec![0xABu8; request.width as usize * request.height as usize * 3];
            encode_ok(&ImageResult {
                request_id: request.request_id,
                width: request.width,
                height: request.height,
                channels: 3,
                generation_time_ms: delay.as_millis() as u32,
                image_bytes,
            })
        };

        if stream.write_all(&response).is_err() {
            break;
        }
    }
}
