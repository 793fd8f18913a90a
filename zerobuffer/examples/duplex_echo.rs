//! Duplex example: echo server and client in one process
//!
//! The server half runs on a thread; the client sends three requests and
//! checks that each response carries its request's sequence number.

use std::time::Duration;
use zerobuffer::duplex::{DuplexClient, DuplexServer, ProcessingMode};
use zerobuffer::{BufferConfig, BufferResult};

fn main() -> BufferResult<()> {
    zerobuffer::init_tracing();

    let name = format!("duplex-demo-{}", std::process::id());
    let config = BufferConfig::new(4096, 1 << 20)?;
    let timeout = Some(Duration::from_secs(5));

    let mut server = DuplexServer::bind(&name, config, ProcessingMode::SingleThread)?;
    let server_thread = std::thread::spawn(move || server.serve(|request| request.to_vec()));

    let mut client = DuplexClient::connect(&name, config, timeout)?;
    for size in [1usize, 1024, 100 * 1024] {
        let payload = vec![0x42u8; size];
        let seq = client.send_request(&payload, timeout)?;
        let response = client.receive_response(timeout)?;
        assert_eq!(response.sequence(), seq);
        assert_eq!(response.len(), size);
        println!("echoed {size} bytes, sequence {seq}");
    }

    drop(client);
    server_thread.join().expect("server thread")?;
    println!("server finished cleanly");
    Ok(())
}
