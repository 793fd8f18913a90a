//! Reader endpoint: owns the segment, consumes frames
//!
//! The reader creates the segment, the semaphores, and the lock file, and
//! removes all three when dropped. `read_frame` hands out at most one
//! [`Frame`] at a time; dropping the frame performs the release steps
//! (advance the read cursor, return the bytes to the free pool, bump the
//! read count, wake the writer).

use crate::error::{BufferError, BufferResult};
use crate::lifecycle::{lock_path, reap_stale_channels, remove_channel_resources};
use crate::naming::{sem_read_name, sem_write_name, validate_channel_name};
use crate::oieb::{BufferConfig, FRAME_HEADER_SIZE, FrameHeader, Oieb};
use crate::platform::{
    LockGuard, NamedSemaphore, PeerInfo, WaitOutcome, current_pid, remove_semaphore, remove_shm,
    try_acquire_lockfile,
};
use crate::segment::MappedSegment;
use std::sync::atomic::{Ordering, fence};
use std::time::{Duration, Instant};

/// Polling step for connection waits.
const CONNECT_POLL: Duration = Duration::from_millis(5);

/// Consuming endpoint of a channel.
///
/// Not thread-safe; callers serialize operations on one instance.
pub struct Reader {
    sem_write: NamedSemaphore,
    sem_read: NamedSemaphore,
    segment: MappedSegment,
    name: String,
    next_sequence: u64,
    /// Wasted tail bytes observed while skipping a wrap, returned to the
    /// free pool with the next frame's release.
    pending_wrap_waste: u64,
    writer: Option<PeerInfo>,
    frames_read: u64,
    bytes_read: u64,
    // Dropped last so every other teardown step happens under the lock.
    lock: Option<LockGuard>,
}

impl Reader {
    /// Create a channel: lock file, stale reaping, segment, semaphores.
    pub fn new(name: &str, config: BufferConfig) -> BufferResult<Self> {
        validate_channel_name(name)?;
        // Re-validate even pre-built configs; the OIEB depends on it.
        let config = BufferConfig::new(config.metadata_size, config.payload_size)?;

        let lock = try_acquire_lockfile(&lock_path(name))?;

        if let Err(e) = reap_stale_channels() {
            tracing::warn!(channel = name, error = %e, "stale reaping failed");
        }

        // Holding the lock proves no live owner; clear any leftover segment
        // from a crashed predecessor before creating ours. The scan above
        // skips our own name because we already hold its lock.
        remove_shm(name);

        let segment = match MappedSegment::create(name, &config) {
            Ok(segment) => segment,
            Err(BufferError::AlreadyExists { .. }) => {
                Self::abandon_lock(lock);
                return Err(BufferError::NameInUse {
                    name: name.to_string(),
                });
            }
            Err(e) => {
                Self::abandon_lock(lock);
                return Err(e);
            }
        };
        segment.oieb().init(&config, current_pid());

        // The lock guarantees the name is ours; clear semaphore leftovers
        // from any prior owner before creating fresh ones.
        let w_name = sem_write_name(name);
        let r_name = sem_read_name(name);
        remove_semaphore(&w_name);
        remove_semaphore(&r_name);
        let sem_write = match NamedSemaphore::create(&w_name, 0) {
            Ok(sem) => sem,
            Err(e) => {
                remove_channel_resources(name);
                Self::abandon_lock(lock);
                return Err(e);
            }
        };
        let sem_read = match NamedSemaphore::create(&r_name, 0) {
            Ok(sem) => sem,
            Err(e) => {
                remove_channel_resources(name);
                Self::abandon_lock(lock);
                return Err(e);
            }
        };

        tracing::info!(
            channel = name,
            metadata_size = config.metadata_size,
            payload_size = config.payload_size,
            "channel created"
        );

        Ok(Self {
            sem_write,
            sem_read,
            segment,
            name: name.to_string(),
            next_sequence: 1,
            pending_wrap_waste: 0,
            writer: None,
            frames_read: 0,
            bytes_read: 0,
            lock: Some(lock),
        })
    }

    fn abandon_lock(lock: LockGuard) {
        let path = lock.path().to_path_buf();
        drop(lock);
        let _ = std::fs::remove_file(path);
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared block sizes.
    pub fn config(&self) -> BufferConfig {
        self.segment.config()
    }

    /// Metadata written by the writer, if any.
    pub fn metadata(&self) -> Option<&[u8]> {
        self.segment.metadata()
    }

    /// The shared OIEB, for inspection of cursors and counters.
    pub fn oieb(&self) -> &Oieb {
        self.segment.oieb()
    }

    /// Frames returned so far.
    pub fn frames_read(&self) -> u64 {
        self.frames_read
    }

    /// Payload bytes returned so far (headers excluded).
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// True if a writer is attached and its process is alive. Polls for up
    /// to `wait` before giving up.
    pub fn is_writer_connected(&mut self, wait: Option<Duration>) -> bool {
        let deadline = wait.map(|w| Instant::now() + w);
        loop {
            self.refresh_writer();
            if let Some(writer) = &self.writer {
                let pid = self.segment.oieb().writer_pid.load(Ordering::Acquire);
                if pid == writer.pid && writer.is_alive() {
                    return true;
                }
            }
            match deadline {
                Some(d) if Instant::now() < d => std::thread::sleep(CONNECT_POLL),
                _ => return false,
            }
        }
    }

    /// Wait for the next frame.
    ///
    /// `None` waits indefinitely. Wrap markers are skipped transparently;
    /// their wasted tail is returned to the free pool when the following
    /// frame is released.
    pub fn read_frame(&mut self, timeout: Option<Duration>) -> BufferResult<Frame<'_>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        loop {
            self.refresh_writer();
            let oieb = self.segment.oieb();
            let written = oieb.payload_written_count.load(Ordering::Acquire);
            let read = oieb.payload_read_count.load(Ordering::Relaxed);

            if written == read {
                if self.writer_gone() {
                    return Err(BufferError::WriterDead);
                }
                let remaining = match deadline {
                    None => None,
                    Some(d) => {
                        let now = Instant::now();
                        if now >= d {
                            return Err(self.empty_wait_error());
                        }
                        Some(d - now)
                    }
                };
                match self.sem_write.wait(remaining)? {
                    WaitOutcome::Signaled | WaitOutcome::Interrupted => continue,
                    WaitOutcome::Timeout => return Err(self.empty_wait_error()),
                }
            }

            // The count increment was a release; pair it before touching
            // the header and payload bytes.
            fence(Ordering::Acquire);

            let n = oieb.payload_size.load(Ordering::Relaxed);
            let pos = oieb.payload_read_pos.load(Ordering::Relaxed);

            // A tail too short for a header is an implicit wrap; a header
            // with payload_size == 0 is an explicit one.
            if n - pos < FRAME_HEADER_SIZE {
                oieb.payload_read_pos.store(0, Ordering::Release);
                self.pending_wrap_waste += n - pos;
                continue;
            }
            let header = unsafe { read_frame_header(self.segment.payload_ptr(), pos) };
            if header.is_wrap_marker() {
                oieb.payload_read_pos.store(0, Ordering::Release);
                self.pending_wrap_waste += n - pos;
                continue;
            }

            if header.payload_size > n - FRAME_HEADER_SIZE {
                return Err(BufferError::InvalidFrame {
                    reason: format!(
                        "payload_size {} exceeds ring capacity {}",
                        header.payload_size,
                        n - FRAME_HEADER_SIZE
                    ),
                });
            }
            if header.sequence_number != self.next_sequence {
                return Err(BufferError::SequenceError {
                    expected: self.next_sequence,
                    got: header.sequence_number,
                });
            }

            let len = header.payload_size;
            let advance = FRAME_HEADER_SIZE + len;
            let waste = std::mem::take(&mut self.pending_wrap_waste);
            self.next_sequence += 1;
            self.frames_read += 1;
            self.bytes_read += len;

            let data = unsafe {
                self.segment
                    .payload_ptr()
                    .add((pos + FRAME_HEADER_SIZE) as usize)
            };
            let sem_read = &self.sem_read;
            let oieb = self.segment.oieb();
            return Ok(Frame {
                data,
                len: len as usize,
                sequence: header.sequence_number,
                end_pos: (pos + advance) % n,
                advance,
                waste,
                oieb,
                sem_read,
            });
        }
    }

    fn empty_wait_error(&mut self) -> BufferError {
        if self.writer_gone() {
            BufferError::WriterDead
        } else {
            BufferError::Timeout
        }
    }

    fn refresh_writer(&mut self) {
        let pid = self.segment.oieb().writer_pid.load(Ordering::Acquire);
        if pid != 0 && self.writer.as_ref().map(|w| w.pid) != Some(pid) {
            tracing::debug!(channel = %self.name, pid, "writer attached");
            self.writer = Some(PeerInfo::capture(pid));
        }
    }

    /// A writer was connected at some point and is now gone (pid cleared by
    /// a clean drop, or the process died).
    fn writer_gone(&self) -> bool {
        let Some(writer) = &self.writer else {
            return false;
        };
        let pid = self.segment.oieb().writer_pid.load(Ordering::Acquire);
        pid == 0 || (pid == writer.pid && !writer.is_alive())
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        let oieb = self.segment.oieb();
        oieb.reader_pid.store(0, Ordering::Release);
        // Wake a writer blocked on free space; it will observe the cleared
        // pid and report ReaderDead.
        let _ = self.sem_read.post();
        remove_channel_resources(&self.name);
        if let Some(lock) = self.lock.take() {
            Self::abandon_lock(lock);
        }
        tracing::info!(channel = %self.name, "channel removed");
    }
}

/// Read a frame header at `pos`; headers have no alignment guarantee.
///
/// # Safety
/// `pos + 16` must be within the payload ring.
pub(crate) unsafe fn read_frame_header(base: *const u8, pos: u64) -> FrameHeader {
    unsafe {
        let p = base.add(pos as usize) as *const u64;
        FrameHeader {
            payload_size: p.read_unaligned(),
            sequence_number: p.add(1).read_unaligned(),
        }
    }
}

/// A borrowed frame. Dropping it releases the bytes back to the ring.
pub struct Frame<'a> {
    data: *const u8,
    len: usize,
    sequence: u64,
    end_pos: u64,
    advance: u64,
    waste: u64,
    oieb: &'a Oieb,
    sem_read: &'a NamedSemaphore,
}

impl Frame<'_> {
    /// Writer-assigned sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for a zero-length payload (never produced by a valid writer).
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Release the frame back to the ring, explicitly.
    ///
    /// Equivalent to dropping it; the bytes may be overwritten afterwards.
    pub fn release(self) {}
}

impl std::ops::Deref for Frame<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl Drop for Frame<'_> {
    fn drop(&mut self) {
        self.oieb.payload_read_pos.store(self.end_pos, Ordering::Release);
        self.oieb
            .payload_free_bytes
            .fetch_add(self.advance + self.waste, Ordering::AcqRel);
        self.oieb.payload_read_count.fetch_add(1, Ordering::Release);
        if let Err(e) = self.sem_read.post() {
            tracing::warn!(error = %e, "release wakeup failed");
        }
    }
}

impl std::fmt::Debug for Frame<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("len", &self.len)
            .finish()
    }
}
