//! # ZeroBuffer
//!
//! A cross-process, single-producer / single-consumer, zero-copy framed
//! message channel built on a file-backed shared memory segment and two
//! named semaphores. Designed for video and telemetry pipelines where one
//! process writes variable-sized frames and another reads them with bounded
//! latency and no copies between address spaces.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────┐      ┌──────────────────────────┐      ┌─────────────────┐
//! │   Writer        │      │   Shared Segment         │      │   Reader        │
//! │                 │ ───► │ [OIEB|metadata|payload]  │ ───► │                 │
//! │ attaches,       │      │                          │      │ owns segment,   │
//! │ publishes       │      │ sem-w-<name> (wake rdr)  │      │ consumes,       │
//! │ frames          │ ◄─── │ sem-r-<name> (wake wtr)  │      │ releases        │
//! └─────────────────┘      └──────────────────────────┘      └─────────────────┘
//! ```
//!
//! The reader creates and owns the segment, the two semaphores, and a lock
//! file under the temp directory; the writer attaches by claiming the
//! `writer_pid` slot in the Operation Info Exchange Block ([`Oieb`]) with a
//! compare-and-swap. Frames carry a 16-byte header and a writer-assigned
//! sequence number starting at 1; the reader verifies the sequence is
//! gapless and fails fatally otherwise. When a frame does not fit the ring's
//! tail, the writer publishes a wrap marker and the unusable tail bytes are
//! charged against the free pool until the reader passes the wrap point.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use zerobuffer::{BufferConfig, Reader, Writer};
//! use std::time::Duration;
//!
//! # fn main() -> zerobuffer::BufferResult<()> {
//! // Consumer process
//! let mut reader = Reader::new("camera-0", BufferConfig::new(1024, 1 << 20)?)?;
//!
//! // Producer process
//! let mut writer = Writer::connect("camera-0")?;
//! writer.set_metadata(b"h264 1920x1080")?;
//! writer.write_frame(&[0u8; 4096], Some(Duration::from_secs(1)))?;
//!
//! // Consumer
//! let frame = reader.read_frame(Some(Duration::from_secs(1)))?;
//! assert_eq!(frame.sequence(), 1);
//! drop(frame); // releases the bytes back to the ring
//! # Ok(())
//! # }
//! ```
//!
//! ## Zero-copy paths
//!
//! [`Writer::acquire_frame`] reserves a span of the ring for in-place
//! filling; [`Reader::read_frame`] borrows the frame bytes directly from the
//! ring until the [`Frame`] guard drops. Neither path copies payload between
//! producer and consumer address spaces.
//!
//! ## Liveness and cleanup
//!
//! Peer death is detected without kernel notifications: each endpoint caches
//! its peer's `(pid, start-time)` pair and re-verifies it whenever a
//! semaphore wait times out. A reader that crashes leaves its lock file
//! unheld; the next `Reader::new` on any channel reaps such leftovers
//! (segment, semaphores, lock file) before creating its own.
//!
//! ## Duplex channels
//!
//! [`DuplexServer`] / [`DuplexClient`] pair two one-way channels
//! (`<name>_request`, `<name>_response`) into a request/response primitive
//! correlated by frame sequence numbers.
//!
//! ## Thread Safety
//!
//! - **[`Reader`] / [`Writer`]**: NOT thread-safe; callers serialize
//!   operations on one endpoint, and concurrency is structural (one process
//!   per side).
//! - The only shared mutable state is the OIEB and the ring bytes, governed
//!   by the release/acquire publication protocol.
//!
//! ## Platform Support
//!
//! Linux: segments under `/dev/shm`, POSIX named semaphores
//! (`/dev/shm/sem.sem-{w,r}-<name>`), `flock`-guarded lock files under
//! `<TMPDIR>/zerobuffer/`. The platform module is the seam for other
//! mappings.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod duplex;
pub mod error;
pub mod lifecycle;
pub mod naming;
pub mod oieb;
pub mod platform;
pub mod reader;
pub mod segment;
pub mod writer;

pub use duplex::{DuplexClient, DuplexServer, ProcessingMode};
pub use error::{BufferError, BufferResult};
pub use lifecycle::reap_stale_channels;
pub use naming::BufferNamingService;
pub use oieb::{BLOCK_ALIGNMENT, BufferConfig, FRAME_HEADER_SIZE, FrameHeader, OIEB_SIZE, Oieb};
pub use reader::{Frame, Reader};
pub use writer::{PendingFrame, Writer};

/// Initialize tracing with an env-filter for buffer diagnostics
pub fn init_tracing() {
    use tracing_subscriber::{EnvFilter, fmt};

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_thread_ids(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}
