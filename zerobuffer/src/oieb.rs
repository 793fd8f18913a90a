//! Operation Info Exchange Block and frame header layout
//!
//! The OIEB is the fixed 128-byte control structure at offset 0 of every
//! segment. Both endpoints mutate it under the ownership rules of the
//! protocol: the writer owns `payload_write_pos` and `payload_written_count`,
//! the reader owns `payload_read_pos` and `payload_read_count`, and
//! `payload_free_bytes` is shared and updated with atomic fetch-add/sub.
//!
//! ## Segment layout
//!
//! ```text
//! offset 0                128          128+metadata_size          end
//!        ┌────────────────┬────────────┬──────────────────────────┐
//!        │ OIEB (128 B)   │ metadata   │ payload ring             │
//!        └────────────────┴────────────┴──────────────────────────┘
//! ```
//!
//! All regions start on a 64-byte boundary. The metadata block begins with an
//! 8-byte written-length prefix; the payload ring holds frames prefixed by a
//! 16-byte [`FrameHeader`]. A header with `payload_size == 0` is the wrap
//! marker.

use crate::error::{BufferError, BufferResult};
use static_assertions::const_assert_eq;
use std::sync::atomic::{AtomicU64, Ordering};

/// Alignment granularity for all block offsets and sizes.
pub const BLOCK_ALIGNMENT: u64 = 64;

/// Fixed size of the OIEB, also its `operation_size` field value.
pub const OIEB_SIZE: u64 = 128;

/// Bytes occupied by a frame header in the payload ring.
pub const FRAME_HEADER_SIZE: u64 = 16;

/// Bytes reserved at the start of the metadata block for the length prefix.
pub const METADATA_PREFIX_SIZE: u64 = 8;

/// Round `size` up to the next multiple of `align` (power of two).
#[inline]
pub const fn align_up(size: u64, align: u64) -> u64 {
    (size + align - 1) & !(align - 1)
}

/// Sizing of the two data regions of a segment.
///
/// Both sizes must be multiples of [`BLOCK_ALIGNMENT`]; `metadata_size` may
/// be zero, `payload_size` may not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    /// Metadata block size in bytes (0 = no metadata block).
    pub metadata_size: u64,
    /// Payload ring size in bytes.
    pub payload_size: u64,
}

impl BufferConfig {
    /// Create a config, validating the alignment rules.
    pub fn new(metadata_size: u64, payload_size: u64) -> BufferResult<Self> {
        if metadata_size % BLOCK_ALIGNMENT != 0 {
            return Err(BufferError::InvalidConfig {
                what: "metadata_size",
                value: metadata_size,
            });
        }
        if payload_size == 0 || payload_size % BLOCK_ALIGNMENT != 0 {
            return Err(BufferError::InvalidConfig {
                what: "payload_size",
                value: payload_size,
            });
        }
        Ok(Self {
            metadata_size,
            payload_size,
        })
    }

    /// Total segment length: OIEB + metadata block + payload ring.
    pub fn total_size(&self) -> u64 {
        OIEB_SIZE + align_up(self.metadata_size, BLOCK_ALIGNMENT) + align_up(self.payload_size, BLOCK_ALIGNMENT)
    }

    /// Largest frame payload this config can carry.
    pub fn max_frame_size(&self) -> u64 {
        self.payload_size.saturating_sub(FRAME_HEADER_SIZE)
    }
}

/// Operation Info Exchange Block: 128 bytes, cache-line aligned.
///
/// Lives at offset 0 of the mapped segment. Every field is an unsigned
/// 64-bit value accessed with aligned atomic loads and stores; cross-field
/// consistency is established by the publication ordering of the endpoints,
/// not by any lock.
#[repr(C, align(64))]
pub struct Oieb {
    /// Total OIEB size; always [`OIEB_SIZE`]. Doubles as the version check.
    pub operation_size: AtomicU64,
    /// Metadata block size in bytes.
    pub metadata_size: AtomicU64,
    /// Remaining free bytes in the metadata block.
    pub metadata_free_bytes: AtomicU64,
    /// Bytes written to the metadata block (prefix included); 0 = unwritten.
    pub metadata_written_bytes: AtomicU64,
    /// Payload ring size in bytes.
    pub payload_size: AtomicU64,
    /// Free bytes in the payload ring. Decremented by the writer on publish,
    /// incremented by the reader on release. Shared; fetch-add/sub only.
    pub payload_free_bytes: AtomicU64,
    /// Next write offset into the ring. Writer-owned.
    pub payload_write_pos: AtomicU64,
    /// Next read offset into the ring. Reader-owned.
    pub payload_read_pos: AtomicU64,
    /// Frames published so far. Writer-owned.
    pub payload_written_count: AtomicU64,
    /// Frames released so far. Reader-owned.
    pub payload_read_count: AtomicU64,
    /// PID of the attached writer; 0 = none. Claimed by CAS on attach.
    pub writer_pid: AtomicU64,
    /// PID of the owning reader; 0 = none.
    pub reader_pid: AtomicU64,
    /// Reserved for future protocol revisions.
    pub _reserved: [u8; 32],
}

const_assert_eq!(core::mem::size_of::<Oieb>(), 128);
const_assert_eq!(core::mem::align_of::<Oieb>(), 64);

impl Oieb {
    /// Initialize a freshly created (zero-filled) OIEB for `config`.
    ///
    /// Called exactly once by the segment-owning reader before the
    /// semaphores exist, so plain release stores are sufficient.
    pub fn init(&self, config: &BufferConfig, reader_pid: u64) {
        self.operation_size.store(OIEB_SIZE, Ordering::Relaxed);
        self.metadata_size.store(config.metadata_size, Ordering::Relaxed);
        self.metadata_free_bytes.store(config.metadata_size, Ordering::Relaxed);
        self.metadata_written_bytes.store(0, Ordering::Relaxed);
        self.payload_size.store(config.payload_size, Ordering::Relaxed);
        self.payload_free_bytes.store(config.payload_size, Ordering::Relaxed);
        self.payload_write_pos.store(0, Ordering::Relaxed);
        self.payload_read_pos.store(0, Ordering::Relaxed);
        self.payload_written_count.store(0, Ordering::Relaxed);
        self.payload_read_count.store(0, Ordering::Relaxed);
        self.writer_pid.store(0, Ordering::Relaxed);
        self.reader_pid.store(reader_pid, Ordering::Release);
    }

    /// Validate a mapped OIEB against the actual segment length.
    ///
    /// This is the protocol compatibility check a connecting writer performs:
    /// `operation_size` must equal 128 and the declared block sizes must be
    /// aligned and add up to the mapped length.
    pub fn validate(&self, mapped_len: u64) -> BufferResult<()> {
        let op = self.operation_size.load(Ordering::Acquire);
        if op != OIEB_SIZE {
            return Err(BufferError::InvalidOieb {
                reason: format!("operation_size {op} != {OIEB_SIZE}"),
            });
        }
        let metadata = self.metadata_size.load(Ordering::Acquire);
        let payload = self.payload_size.load(Ordering::Acquire);
        if metadata % BLOCK_ALIGNMENT != 0 {
            return Err(BufferError::InvalidOieb {
                reason: format!("metadata_size {metadata} not 64-byte aligned"),
            });
        }
        if payload == 0 || payload % BLOCK_ALIGNMENT != 0 {
            return Err(BufferError::InvalidOieb {
                reason: format!("payload_size {payload} not a positive 64-byte multiple"),
            });
        }
        let expected = OIEB_SIZE + metadata + payload;
        if expected != mapped_len {
            return Err(BufferError::InvalidOieb {
                reason: format!("declared sizes total {expected} but segment is {mapped_len} bytes"),
            });
        }
        Ok(())
    }

    /// Declared block sizes as a [`BufferConfig`].
    pub fn config(&self) -> BufferConfig {
        BufferConfig {
            metadata_size: self.metadata_size.load(Ordering::Acquire),
            payload_size: self.payload_size.load(Ordering::Acquire),
        }
    }
}

/// Frame header: 16 bytes at the start of every payload record.
///
/// `payload_size == 0` marks a wrap: the reader jumps to ring offset 0 and
/// ignores `sequence_number` (stored as zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct FrameHeader {
    /// Payload length in bytes; 0 for a wrap marker.
    pub payload_size: u64,
    /// Writer-assigned frame identity, starting at 1. Zero in wrap markers.
    pub sequence_number: u64,
}

const_assert_eq!(core::mem::size_of::<FrameHeader>(), 16);

impl FrameHeader {
    /// The wrap marker value.
    pub const WRAP_MARKER: FrameHeader = FrameHeader {
        payload_size: 0,
        sequence_number: 0,
    };

    /// True if this header is a wrap marker.
    #[inline]
    pub fn is_wrap_marker(&self) -> bool {
        self.payload_size == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oieb_layout_is_frozen() {
        assert_eq!(core::mem::size_of::<Oieb>(), 128);
        assert_eq!(core::mem::align_of::<Oieb>(), 64);
        assert_eq!(core::mem::size_of::<FrameHeader>(), 16);
    }

    #[test]
    fn align_up_rounds_to_block() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
        assert_eq!(align_up(10240, 64), 10240);
    }

    #[test]
    fn config_validation() {
        assert!(BufferConfig::new(1024, 10240).is_ok());
        assert!(BufferConfig::new(0, 10240).is_ok());

        assert!(matches!(
            BufferConfig::new(100, 10240),
            Err(BufferError::InvalidConfig { what: "metadata_size", .. })
        ));
        assert!(matches!(
            BufferConfig::new(0, 0),
            Err(BufferError::InvalidConfig { what: "payload_size", .. })
        ));
        assert!(matches!(
            BufferConfig::new(0, 10241),
            Err(BufferError::InvalidConfig { what: "payload_size", .. })
        ));
    }

    #[test]
    fn config_total_size() {
        let config = BufferConfig::new(1024, 10240).unwrap();
        assert_eq!(config.total_size(), 128 + 1024 + 10240);
        assert_eq!(config.max_frame_size(), 10240 - 16);
    }

    #[test]
    fn init_then_validate() {
        let config = BufferConfig::new(1024, 10240).unwrap();
        let oieb = Oieb {
            operation_size: AtomicU64::new(0),
            metadata_size: AtomicU64::new(0),
            metadata_free_bytes: AtomicU64::new(0),
            metadata_written_bytes: AtomicU64::new(0),
            payload_size: AtomicU64::new(0),
            payload_free_bytes: AtomicU64::new(0),
            payload_write_pos: AtomicU64::new(0),
            payload_read_pos: AtomicU64::new(0),
            payload_written_count: AtomicU64::new(0),
            payload_read_count: AtomicU64::new(0),
            writer_pid: AtomicU64::new(0),
            reader_pid: AtomicU64::new(0),
            _reserved: [0; 32],
        };
        oieb.init(&config, 4242);

        assert!(oieb.validate(config.total_size()).is_ok());
        assert_eq!(oieb.reader_pid.load(Ordering::Relaxed), 4242);
        assert_eq!(oieb.payload_free_bytes.load(Ordering::Relaxed), 10240);

        // Wrong segment length must be rejected.
        assert!(matches!(
            oieb.validate(config.total_size() + 64),
            Err(BufferError::InvalidOieb { .. })
        ));

        // Corrupted operation_size must be rejected.
        oieb.operation_size.store(256, Ordering::Relaxed);
        assert!(matches!(
            oieb.validate(config.total_size()),
            Err(BufferError::InvalidOieb { .. })
        ));
    }

    #[test]
    fn wrap_marker_detection() {
        assert!(FrameHeader::WRAP_MARKER.is_wrap_marker());
        let real = FrameHeader {
            payload_size: 512,
            sequence_number: 7,
        };
        assert!(!real.is_wrap_marker());
    }
}
