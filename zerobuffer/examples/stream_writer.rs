//! Producer example: attach to a channel and stream frames
//!
//! Run `stream_reader` first, then this binary in a second terminal.

use std::time::Duration;
use zerobuffer::{BufferResult, Writer};

fn main() -> BufferResult<()> {
    zerobuffer::init_tracing();

    let channel = "zerobuffer-demo";
    println!("Connecting to channel '{channel}'...");
    let mut writer = Writer::connect(channel)?;
    writer.set_metadata(b"demo stream v1")?;

    for i in 0..100u32 {
        let payload = format!("frame payload {i}").into_bytes();
        let seq = writer.write_frame(&payload, Some(Duration::from_secs(5)))?;
        println!("published frame seq={seq} ({} bytes)", payload.len());
        std::thread::sleep(Duration::from_millis(50));
    }

    println!(
        "done: {} frames, {} bytes",
        writer.frames_written(),
        writer.bytes_written()
    );
    Ok(())
}
