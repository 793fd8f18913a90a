//! Writer endpoint: attaches to an existing segment, publishes frames
//!
//! The writer claims the `writer_pid` slot in the OIEB with a CAS, publishes
//! frames with release ordering (payload bytes, then header, then counters,
//! then the wakeup post), and handles ring wrap-around by giving up the
//! unusable tail and accounting for it in `payload_free_bytes`.

use crate::error::{BufferError, BufferResult};
use crate::naming::{sem_read_name, sem_write_name, validate_channel_name};
use crate::oieb::{BufferConfig, FRAME_HEADER_SIZE, FrameHeader, METADATA_PREFIX_SIZE, Oieb};
use crate::platform::{
    NamedSemaphore, PeerInfo, WaitOutcome, current_pid, process_alive,
};
use crate::segment::MappedSegment;
use std::sync::atomic::{Ordering, fence};
use std::time::{Duration, Instant};

/// Producing endpoint of a channel.
///
/// Not thread-safe; callers serialize operations on one instance.
pub struct Writer {
    sem_write: NamedSemaphore,
    sem_read: NamedSemaphore,
    segment: MappedSegment,
    name: String,
    pid: u64,
    next_sequence: u64,
    reader: Option<PeerInfo>,
    frames_written: u64,
    bytes_written: u64,
}

/// Placement decision for one frame.
struct Placement {
    start: u64,
    waste: u64,
}

impl Writer {
    /// Attach to an existing channel.
    ///
    /// Validates the OIEB, claims the writer slot (taking over from a dead
    /// writer if necessary), and opens both semaphores.
    pub fn connect(name: &str) -> BufferResult<Self> {
        validate_channel_name(name)?;
        let segment = MappedSegment::open(name)?;
        let oieb = segment.oieb();
        let pid = current_pid();

        loop {
            let current = oieb.writer_pid.load(Ordering::Acquire);
            if current != 0 && process_alive(current) {
                return Err(BufferError::WriterAlreadyExists { pid: current });
            }
            if current != 0 {
                tracing::info!(channel = name, stale_pid = current, "taking over writer slot");
            }
            match oieb
                .writer_pid
                .compare_exchange(current, pid, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(_) => continue,
            }
        }

        let release_slot = || {
            let _ = oieb
                .writer_pid
                .compare_exchange(pid, 0, Ordering::AcqRel, Ordering::Acquire);
        };
        let sem_write = NamedSemaphore::open(&sem_write_name(name)).inspect_err(|_| release_slot())?;
        let sem_read = NamedSemaphore::open(&sem_read_name(name)).inspect_err(|_| release_slot())?;

        let reader_pid = oieb.reader_pid.load(Ordering::Acquire);
        let reader = (reader_pid != 0).then(|| PeerInfo::capture(reader_pid));

        // Sequence numbers continue across a writer takeover: the last
        // published frame's sequence equals the published count.
        let next_sequence = oieb.payload_written_count.load(Ordering::Acquire) + 1;

        tracing::info!(channel = name, pid, "writer connected");

        Ok(Self {
            sem_write,
            sem_read,
            segment,
            name: name.to_string(),
            pid,
            next_sequence,
            reader,
            frames_written: 0,
            bytes_written: 0,
        })
    }

    /// Channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared block sizes.
    pub fn config(&self) -> BufferConfig {
        self.segment.config()
    }

    /// The shared OIEB, for inspection of cursors and counters.
    pub fn oieb(&self) -> &Oieb {
        self.segment.oieb()
    }

    /// Frames published so far by this instance.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    /// Payload bytes published so far by this instance (headers excluded).
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// True if the owning reader's process is alive.
    pub fn is_reader_connected(&self) -> bool {
        let pid = self.segment.oieb().reader_pid.load(Ordering::Acquire);
        pid != 0 && process_alive(pid)
    }

    /// Write the channel metadata. Allowed exactly once.
    pub fn set_metadata(&mut self, bytes: &[u8]) -> BufferResult<()> {
        let oieb = self.segment.oieb();
        if oieb.metadata_written_bytes.load(Ordering::Acquire) != 0 {
            return Err(BufferError::MetadataAlreadyWritten);
        }
        let capacity = oieb.metadata_size.load(Ordering::Relaxed);
        let total = bytes.len() as u64 + METADATA_PREFIX_SIZE;
        if total > capacity {
            return Err(BufferError::MetadataTooLarge {
                size: total,
                capacity,
            });
        }

        unsafe {
            let base = self.segment.metadata_ptr_mut();
            (base as *mut u64).write_unaligned(bytes.len() as u64);
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                base.add(METADATA_PREFIX_SIZE as usize),
                bytes.len(),
            );
        }
        // Bytes before the published length, mirrored by the reader's
        // acquire load of metadata_written_bytes.
        fence(Ordering::Release);
        let oieb = self.segment.oieb();
        oieb.metadata_free_bytes.fetch_sub(total, Ordering::AcqRel);
        oieb.metadata_written_bytes.store(total, Ordering::Release);
        tracing::debug!(channel = %self.name, bytes = bytes.len(), "metadata written");
        Ok(())
    }

    /// Copy `data` into the ring as one frame, blocking while the ring is
    /// full. Returns the frame's sequence number.
    pub fn write_frame(&mut self, data: &[u8], timeout: Option<Duration>) -> BufferResult<u64> {
        let sequence = self.next_sequence;
        self.write_with_sequence(data, sequence, timeout, true)
    }

    /// Like [`write_frame`](Self::write_frame) but fails with
    /// [`BufferError::BufferFull`] instead of blocking.
    pub fn try_write_frame(&mut self, data: &[u8]) -> BufferResult<u64> {
        let sequence = self.next_sequence;
        self.write_with_sequence(data, sequence, None, false)
    }

    /// Reserve `len` bytes in the ring for zero-copy filling.
    ///
    /// The returned [`PendingFrame`] gives mutable access to the payload
    /// span; nothing is observable to the reader until
    /// [`PendingFrame::commit`] runs. Dropping it uncommitted publishes
    /// nothing and mutates no shared state.
    pub fn acquire_frame(
        &mut self,
        len: usize,
        timeout: Option<Duration>,
    ) -> BufferResult<PendingFrame<'_>> {
        let sequence = self.next_sequence;
        self.acquire_with_sequence(len, sequence, timeout, true)
    }

    /// Duplex seam: publish a frame carrying an explicit sequence number so
    /// a response can echo its request's sequence.
    pub(crate) fn write_frame_with_sequence(
        &mut self,
        data: &[u8],
        sequence: u64,
        timeout: Option<Duration>,
    ) -> BufferResult<u64> {
        self.write_with_sequence(data, sequence, timeout, true)
    }

    fn write_with_sequence(
        &mut self,
        data: &[u8],
        sequence: u64,
        timeout: Option<Duration>,
        blocking: bool,
    ) -> BufferResult<u64> {
        let mut pending = self.acquire_with_sequence(data.len(), sequence, timeout, blocking)?;
        pending.copy_from_slice(data);
        Ok(pending.commit())
    }

    fn acquire_with_sequence(
        &mut self,
        len: usize,
        sequence: u64,
        timeout: Option<Duration>,
        blocking: bool,
    ) -> BufferResult<PendingFrame<'_>> {
        let len = len as u64;
        let n = self.segment.config().payload_size;
        if len == 0 {
            return Err(BufferError::InvalidFrameSize { size: len });
        }
        if len > n - FRAME_HEADER_SIZE {
            return Err(BufferError::FrameTooLarge {
                size: len,
                max: n - FRAME_HEADER_SIZE,
            });
        }

        let deadline = timeout.map(|t| Instant::now() + t);
        let placement = loop {
            self.refresh_reader();
            if let Some(placement) = self.try_place(len) {
                break placement;
            }
            if self.reader_gone() {
                return Err(BufferError::ReaderDead);
            }
            if !blocking {
                return Err(BufferError::BufferFull);
            }
            let remaining = match deadline {
                None => None,
                Some(d) => {
                    let now = Instant::now();
                    if now >= d {
                        return Err(BufferError::Timeout);
                    }
                    Some(d - now)
                }
            };
            match self.sem_read.wait(remaining)? {
                WaitOutcome::Signaled | WaitOutcome::Interrupted => continue,
                WaitOutcome::Timeout => {
                    return Err(if self.reader_gone() {
                        BufferError::ReaderDead
                    } else {
                        BufferError::Timeout
                    });
                }
            }
        };

        let data = unsafe {
            self.segment
                .payload_ptr_mut()
                .add((placement.start + FRAME_HEADER_SIZE) as usize)
        };
        Ok(PendingFrame {
            data,
            len: len as usize,
            start: placement.start,
            waste: placement.waste,
            sequence,
            committed: false,
            writer: self,
        })
    }

    /// Find a contiguous span for a `16 + len` byte record, or `None` if the
    /// free pool cannot cover it (including any wasted tail).
    fn try_place(&self, len: u64) -> Option<Placement> {
        let oieb = self.segment.oieb();
        let n = oieb.payload_size.load(Ordering::Relaxed);
        let need = FRAME_HEADER_SIZE + len;
        let w = oieb.payload_write_pos.load(Ordering::Relaxed);
        let r = oieb.payload_read_pos.load(Ordering::Acquire);
        let free = oieb.payload_free_bytes.load(Ordering::Acquire);

        // In-flight bytes live in [r, w); the tail is only usable when the
        // cursor is at or past the read position.
        let placement = if w >= r {
            let tail = n - w;
            if need <= tail {
                Placement { start: w, waste: 0 }
            } else {
                Placement {
                    start: 0,
                    waste: tail,
                }
            }
        } else {
            Placement { start: w, waste: 0 }
        };

        (free >= need + placement.waste).then_some(placement)
    }

    /// Publish a committed frame: wrap marker (if wrapping), header after
    /// payload, counters, wakeup.
    fn publish(&mut self, start: u64, len: u64, waste: u64, sequence: u64) {
        let n = self.segment.config().payload_size;
        let base = self.segment.payload_ptr_mut();
        unsafe {
            if waste >= FRAME_HEADER_SIZE {
                // Tail fits an explicit wrap marker; a shorter tail is an
                // implicit wrap the reader detects from the remaining span.
                write_frame_header(base, n - waste, FrameHeader::WRAP_MARKER);
            }
            // Payload bytes were filled through the PendingFrame; order the
            // header after them.
            fence(Ordering::Release);
            write_frame_header(
                base,
                start,
                FrameHeader {
                    payload_size: len,
                    sequence_number: sequence,
                },
            );
        }

        let oieb = self.segment.oieb();
        // Waste is charged in the same update as the frame so free-space
        // checks never observe the marker without its cost.
        oieb.payload_free_bytes
            .fetch_sub(waste + FRAME_HEADER_SIZE + len, Ordering::AcqRel);
        oieb.payload_write_pos
            .store((start + FRAME_HEADER_SIZE + len) % n, Ordering::Release);
        oieb.payload_written_count.fetch_add(1, Ordering::Release);
        if let Err(e) = self.sem_write.post() {
            tracing::warn!(channel = %self.name, error = %e, "publish wakeup failed");
        }

        self.next_sequence = sequence + 1;
        self.frames_written += 1;
        self.bytes_written += len;
    }

    fn refresh_reader(&mut self) {
        let pid = self.segment.oieb().reader_pid.load(Ordering::Acquire);
        if pid != 0 && self.reader.as_ref().map(|r| r.pid) != Some(pid) {
            self.reader = Some(PeerInfo::capture(pid));
        }
    }

    /// The owning reader dropped cleanly (pid cleared) or its process died.
    fn reader_gone(&self) -> bool {
        let pid = self.segment.oieb().reader_pid.load(Ordering::Acquire);
        if pid == 0 {
            return true;
        }
        match &self.reader {
            Some(reader) if reader.pid == pid => !reader.is_alive(),
            _ => !process_alive(pid),
        }
    }
}

impl Drop for Writer {
    fn drop(&mut self) {
        let oieb = self.segment.oieb();
        // Clear the slot only if it is still ours; a takeover writer may
        // have replaced a stale pid already.
        let _ = oieb
            .writer_pid
            .compare_exchange(self.pid, 0, Ordering::AcqRel, Ordering::Acquire);
        // Wake a reader blocked on an empty ring; it will observe the
        // cleared pid and report WriterDead.
        let _ = self.sem_write.post();
        tracing::info!(channel = %self.name, "writer disconnected");
    }
}

/// Write a frame header at `pos`; headers have no alignment guarantee.
///
/// # Safety
/// `pos + 16` must be within the payload ring.
unsafe fn write_frame_header(base: *mut u8, pos: u64, header: FrameHeader) {
    unsafe {
        let p = base.add(pos as usize) as *mut u64;
        p.write_unaligned(header.payload_size);
        p.add(1).write_unaligned(header.sequence_number);
    }
}

/// A reserved, not-yet-published frame span.
///
/// Deref gives the payload bytes to fill in place. [`commit`](Self::commit)
/// publishes; dropping without committing leaves the ring untouched.
pub struct PendingFrame<'a> {
    data: *mut u8,
    len: usize,
    start: u64,
    waste: u64,
    sequence: u64,
    committed: bool,
    writer: &'a mut Writer,
}

impl PendingFrame<'_> {
    /// Sequence number this frame will carry once committed.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false; zero-length frames are rejected at acquisition.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Publish the frame and return its sequence number.
    pub fn commit(mut self) -> u64 {
        self.committed = true;
        let (start, len, waste, sequence) = (self.start, self.len as u64, self.waste, self.sequence);
        self.writer.publish(start, len, waste, sequence);
        sequence
    }
}

impl std::ops::Deref for PendingFrame<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data, self.len) }
    }
}

impl std::ops::DerefMut for PendingFrame<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.data, self.len) }
    }
}

impl Drop for PendingFrame<'_> {
    fn drop(&mut self) {
        if !self.committed {
            tracing::debug!(sequence = self.sequence, "pending frame abandoned");
        }
    }
}
