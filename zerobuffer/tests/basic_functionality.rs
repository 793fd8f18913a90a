//! Basic write/read functionality across one channel

use std::time::Duration;
use zerobuffer::{BufferConfig, BufferError, BufferResult, Reader, Writer};

/// Generate a unique channel name for test isolation; tests in one binary
/// run concurrently and channels are global to the machine.
fn test_channel(suffix: &str) -> String {
    use std::sync::atomic::{AtomicU32, Ordering};
    static CTR: AtomicU32 = AtomicU32::new(0);
    let id = CTR.fetch_add(1, Ordering::Relaxed);
    format!("zb-basic-{}-{id}-{suffix}", std::process::id())
}

const TIMEOUT: Option<Duration> = Some(Duration::from_secs(2));

#[test]
fn metadata_then_first_frame() -> BufferResult<()> {
    let name = test_channel("meta-frame");
    let mut reader = Reader::new(&name, BufferConfig::new(1024, 10240)?)?;
    let mut writer = Writer::connect(&name)?;

    assert!(reader.metadata().is_none());

    writer.set_metadata(&[b'A'; 100])?;
    writer.write_frame(&[0x5A; 1024], TIMEOUT)?;

    let metadata = reader.metadata().expect("metadata should be visible");
    assert_eq!(metadata.len(), 100);
    assert!(metadata.iter().all(|&b| b == b'A'));

    let frame = reader.read_frame(TIMEOUT)?;
    assert_eq!(frame.sequence(), 1);
    assert_eq!(frame.len(), 1024);
    assert!(frame.iter().all(|&b| b == 0x5A));

    Ok(())
}

#[test]
fn frames_arrive_in_sequence_order() -> BufferResult<()> {
    let name = test_channel("order");
    let mut reader = Reader::new(&name, BufferConfig::new(0, 10240)?)?;
    let mut writer = Writer::connect(&name)?;

    for i in 0..50u8 {
        let payload = vec![i; 64 + i as usize];
        let seq = writer.write_frame(&payload, TIMEOUT)?;
        assert_eq!(seq, i as u64 + 1);

        let frame = reader.read_frame(TIMEOUT)?;
        assert_eq!(frame.sequence(), i as u64 + 1);
        assert_eq!(&frame[..], &payload[..]);
    }

    assert_eq!(reader.frames_read(), 50);
    assert_eq!(writer.frames_written(), 50);
    assert_eq!(reader.bytes_read(), writer.bytes_written());
    Ok(())
}

#[test]
fn random_payload_roundtrip() -> BufferResult<()> {
    use rand::{Rng, SeedableRng};

    let name = test_channel("roundtrip");
    let mut reader = Reader::new(&name, BufferConfig::new(0, 10240)?)?;
    let mut writer = Writer::connect(&name)?;

    let mut rng = rand::rngs::StdRng::seed_from_u64(0x5EED);
    for _ in 0..20 {
        let len: usize = rng.gen_range(1..=10240 - 16);
        let payload: Vec<u8> = (0..len).map(|_| rng.r#gen()).collect();

        writer.write_frame(&payload, TIMEOUT)?;
        let frame = reader.read_frame(TIMEOUT)?;
        assert_eq!(&frame[..], &payload[..]);
    }
    Ok(())
}

#[test]
fn zero_copy_acquire_commit() -> BufferResult<()> {
    let name = test_channel("zerocopy");
    let mut reader = Reader::new(&name, BufferConfig::new(0, 4096)?)?;
    let mut writer = Writer::connect(&name)?;

    let mut pending = writer.acquire_frame(256, TIMEOUT)?;
    assert_eq!(pending.sequence(), 1);
    pending.fill(0xAB);
    let seq = pending.commit();
    assert_eq!(seq, 1);

    let frame = reader.read_frame(TIMEOUT)?;
    assert_eq!(frame.sequence(), 1);
    assert!(frame.iter().all(|&b| b == 0xAB));
    drop(frame);

    // An abandoned acquisition publishes nothing.
    let pending = writer.acquire_frame(256, TIMEOUT)?;
    drop(pending);
    assert!(matches!(
        reader.read_frame(Some(Duration::from_millis(50))),
        Err(BufferError::Timeout)
    ));

    // The next committed frame continues the sequence with no gap.
    writer.write_frame(&[1, 2, 3], TIMEOUT)?;
    let frame = reader.read_frame(TIMEOUT)?;
    assert_eq!(frame.sequence(), 2);
    assert_eq!(&frame[..], &[1, 2, 3]);
    Ok(())
}

#[test]
fn fill_then_drain() -> BufferResult<()> {
    let name = test_channel("fill-drain");
    let mut reader = Reader::new(&name, BufferConfig::new(0, 10240)?)?;
    let mut writer = Writer::connect(&name)?;

    // Each 1 KiB frame occupies 16 + 1024 bytes: exactly 9 fit in 10240.
    let payload = [0u8; 1024];
    for _ in 0..9 {
        writer.try_write_frame(&payload)?;
    }
    assert!(matches!(
        writer.try_write_frame(&payload),
        Err(BufferError::BufferFull)
    ));
    assert!(matches!(
        writer.write_frame(&payload, Some(Duration::from_millis(50))),
        Err(BufferError::Timeout)
    ));

    // Releasing one frame makes room for exactly one more.
    let frame = reader.read_frame(TIMEOUT)?;
    assert_eq!(frame.sequence(), 1);
    drop(frame);
    writer.write_frame(&payload, TIMEOUT)?;

    // Drain the rest in order.
    for expected in 2..=10u64 {
        let frame = reader.read_frame(TIMEOUT)?;
        assert_eq!(frame.sequence(), expected);
    }
    Ok(())
}

#[test]
fn second_writer_is_rejected() -> BufferResult<()> {
    let name = test_channel("exclusive");
    let _reader = Reader::new(&name, BufferConfig::new(0, 4096)?)?;
    let mut writer = Writer::connect(&name)?;

    assert!(matches!(
        Writer::connect(&name),
        Err(BufferError::WriterAlreadyExists { .. })
    ));

    // The rejected attach must not have corrupted the channel.
    writer.write_frame(b"still works", TIMEOUT)?;
    Ok(())
}

#[test]
fn metadata_is_write_once() -> BufferResult<()> {
    let name = test_channel("meta-once");
    let reader = Reader::new(&name, BufferConfig::new(256, 4096)?)?;
    let mut writer = Writer::connect(&name)?;

    writer.set_metadata(b"first")?;
    assert!(matches!(
        writer.set_metadata(b"second"),
        Err(BufferError::MetadataAlreadyWritten)
    ));
    assert_eq!(reader.metadata(), Some(&b"first"[..]));
    Ok(())
}

#[test]
fn metadata_too_large() -> BufferResult<()> {
    let name = test_channel("meta-large");
    let _reader = Reader::new(&name, BufferConfig::new(64, 4096)?)?;
    let mut writer = Writer::connect(&name)?;

    // 64-byte block holds at most 56 metadata bytes after the prefix.
    assert!(matches!(
        writer.set_metadata(&[0u8; 57]),
        Err(BufferError::MetadataTooLarge { .. })
    ));
    writer.set_metadata(&[0u8; 56])?;
    Ok(())
}

#[test]
fn frame_size_limits() -> BufferResult<()> {
    let name = test_channel("limits");
    let _reader = Reader::new(&name, BufferConfig::new(0, 4096)?)?;
    let mut writer = Writer::connect(&name)?;

    assert!(matches!(
        writer.write_frame(&[], TIMEOUT),
        Err(BufferError::InvalidFrameSize { size: 0 })
    ));
    assert!(matches!(
        writer.write_frame(&vec![0u8; 4096 - 15], TIMEOUT),
        Err(BufferError::FrameTooLarge { .. })
    ));
    // The largest admissible frame goes through.
    writer.write_frame(&vec![0u8; 4096 - 16], TIMEOUT)?;
    Ok(())
}

#[test]
fn connect_to_missing_channel() {
    assert!(matches!(
        Writer::connect(&test_channel("missing")),
        Err(BufferError::NotFound { .. })
    ));
}

#[test]
fn invalid_channel_names_rejected() {
    let config = BufferConfig::new(0, 4096).unwrap();
    assert!(matches!(
        Reader::new("bad name", config),
        Err(BufferError::InvalidChannelName { .. })
    ));
    assert!(matches!(
        Writer::connect("bad/name"),
        Err(BufferError::InvalidChannelName { .. })
    ));
}
