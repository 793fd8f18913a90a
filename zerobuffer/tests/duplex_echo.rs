//! Request/response over a duplex channel pair

use std::time::Duration;
use zerobuffer::duplex::{DuplexClient, DuplexServer, ProcessingMode};
use zerobuffer::{BufferConfig, BufferResult};

fn test_channel(suffix: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static CTR: AtomicU32 = AtomicU32::new(0);
    let id = CTR.fetch_add(1, Ordering::Relaxed);
    format!("zb-duplex-{}-{id}-{suffix}", std::process::id())
}

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(5));

#[test]
fn echo_roundtrips_various_sizes() -> BufferResult<()> {
    let name = test_channel("echo");
    let config = BufferConfig::new(4096, 1 << 20)?;

    let mut server = DuplexServer::bind(&name, config, ProcessingMode::SingleThread)?;
    let server_thread = std::thread::spawn(move || -> BufferResult<()> {
        // Echo three requests back verbatim.
        for _ in 0..3 {
            server.process_one(TIMEOUT, |request| request.to_vec())?;
        }
        Ok(())
    });

    let mut client = DuplexClient::connect(&name, config, TIMEOUT)?;
    for size in [1usize, 1024, 100 * 1024] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let request_seq = client.send_request(&payload, TIMEOUT)?;

        let response = client.receive_response(TIMEOUT)?;
        assert_eq!(
            response.sequence(),
            request_seq,
            "response sequence must echo the request's"
        );
        assert_eq!(&response[..], &payload[..]);
    }

    server_thread.join().expect("server thread")?;
    Ok(())
}

#[test]
fn zero_copy_request_path() -> BufferResult<()> {
    let name = test_channel("zercopy");
    let config = BufferConfig::new(0, 1 << 16)?;

    let mut server = DuplexServer::bind(&name, config, ProcessingMode::SingleThread)?;
    let server_thread = std::thread::spawn(move || -> BufferResult<()> {
        // Respond with the request's checksum.
        server.process_one(TIMEOUT, |request| {
            let sum: u64 = request.iter().map(|&b| b as u64).sum();
            sum.to_le_bytes().to_vec()
        })?;
        Ok(())
    });

    let mut client = DuplexClient::connect(&name, config, TIMEOUT)?;
    let seq = {
        let mut pending = client.acquire_request(512, TIMEOUT)?;
        pending.fill(3);
        pending.commit()
    };
    assert_eq!(seq, 1);

    let response = client.receive_response(TIMEOUT)?;
    assert_eq!(response.sequence(), seq);
    assert_eq!(u64::from_le_bytes(response[..8].try_into().unwrap()), 512 * 3);

    server_thread.join().expect("server thread")?;
    Ok(())
}

#[test]
fn serve_loop_ends_when_client_leaves() -> BufferResult<()> {
    let name = test_channel("serve");
    let config = BufferConfig::new(0, 1 << 16)?;

    let mut server = DuplexServer::bind(&name, config, ProcessingMode::SingleThread)?;
    let server_thread = std::thread::spawn(move || server.serve(|request| request.to_vec()));

    {
        let mut client = DuplexClient::connect(&name, config, TIMEOUT)?;
        for i in 1..=5u64 {
            let seq = client.send_request(format!("ping {i}").as_bytes(), TIMEOUT)?;
            let response = client.receive_response(TIMEOUT)?;
            assert_eq!(response.sequence(), seq);
        }
        // Client drops here: its request-channel reader is torn down and
        // the serve loop observes the dead peer.
    }

    server_thread.join().expect("server thread")?;
    Ok(())
}
