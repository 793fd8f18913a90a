//! Consumer example: create a channel and print incoming frames

use std::time::Duration;
use zerobuffer::{BufferConfig, BufferError, BufferResult, Reader};

fn main() -> BufferResult<()> {
    zerobuffer::init_tracing();

    let channel = "zerobuffer-demo";
    let config = BufferConfig::new(1024, 1 << 20)?;
    println!("Creating channel '{channel}' ({} payload bytes)...", config.payload_size);
    let mut reader = Reader::new(channel, config)?;

    println!("Waiting for a writer...");
    loop {
        match reader.read_frame(Some(Duration::from_secs(10))) {
            Ok(frame) => {
                println!(
                    "frame seq={} len={} first_bytes={:?}",
                    frame.sequence(),
                    frame.len(),
                    &frame[..frame.len().min(16)]
                );
            }
            Err(BufferError::Timeout) => {
                println!("no frames for 10s, still waiting...");
            }
            Err(BufferError::WriterDead) => {
                println!("writer left; shutting down");
                break;
            }
            Err(e) => return Err(e),
        }
        if let Some(metadata) = reader.metadata() {
            if reader.frames_read() == 1 {
                println!("metadata: {:?}", String::from_utf8_lossy(metadata));
            }
        }
    }

    println!("read {} frames, {} bytes", reader.frames_read(), reader.bytes_read());
    Ok(())
}
