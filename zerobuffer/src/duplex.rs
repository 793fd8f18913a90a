//! Duplex request/response channel
//!
//! A thin composition of two one-way channels: `<name>_request` (client
//! writes, server reads) and `<name>_response` (server writes, client
//! reads). Correlation is carried entirely by frame sequence numbers: the
//! client's request sequence comes from its writer, and the server echoes it
//! as the response sequence. No envelope is added.
//!
//! Each side creates the sub-channel it reads from, so the two writers
//! connect with a retry loop while the peer is still binding.

use crate::error::{BufferError, BufferResult};
use crate::oieb::BufferConfig;
use crate::reader::{Frame, Reader};
use crate::writer::{PendingFrame, Writer};
use std::time::{Duration, Instant};

/// Retry step while waiting for the peer to create its sub-channel.
const BIND_POLL: Duration = Duration::from_millis(5);

/// How the server maps requests onto responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// One request in flight; responses preserve request order.
    SingleThread,
    /// Reserved: correlated but unordered responses from a worker pool.
    ThreadPool,
}

/// Name of the request sub-channel.
pub fn request_channel(name: &str) -> String {
    format!("{name}_request")
}

/// Name of the response sub-channel.
pub fn response_channel(name: &str) -> String {
    format!("{name}_response")
}

/// Server half: reads requests, writes responses from its own ring.
///
/// This is the immutable-server variant; a mutable variant that echoes the
/// request buffer in place is reserved but not implemented.
pub struct DuplexServer {
    request: Reader,
    response: Option<Writer>,
    name: String,
}

impl DuplexServer {
    /// Create the request sub-channel and prepare to serve.
    ///
    /// The response writer connects lazily on first use, because the
    /// response sub-channel is created by the client.
    pub fn bind(name: &str, config: BufferConfig, mode: ProcessingMode) -> BufferResult<Self> {
        if mode == ProcessingMode::ThreadPool {
            return Err(BufferError::Unsupported {
                feature: "thread-pool processing mode",
            });
        }
        let request = Reader::new(&request_channel(name), config)?;
        Ok(Self {
            request,
            response: None,
            name: name.to_string(),
        })
    }

    /// Logical duplex channel name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reader side, for connection checks and counters.
    pub fn request_reader(&mut self) -> &mut Reader {
        &mut self.request
    }

    fn response_writer(&mut self, deadline: Option<Instant>) -> BufferResult<&mut Writer> {
        let writer = match self.response.take() {
            Some(writer) => writer,
            None => {
                let channel = response_channel(&self.name);
                loop {
                    match Writer::connect(&channel) {
                        Ok(writer) => break writer,
                        Err(BufferError::NotFound { .. }) => match deadline {
                            Some(d) if Instant::now() >= d => return Err(BufferError::Timeout),
                            _ => std::thread::sleep(BIND_POLL),
                        },
                        Err(e) => return Err(e),
                    }
                }
            }
        };
        Ok(self.response.insert(writer))
    }

    /// Read one request, run `handler`, write exactly one response stamped
    /// with the request's sequence number. Returns that sequence.
    ///
    /// If the client dies while the response ring is full, the in-flight
    /// request is dropped and [`BufferError::ReaderDead`] surfaces.
    pub fn process_one<F>(&mut self, timeout: Option<Duration>, handler: F) -> BufferResult<u64>
    where
        F: FnOnce(&[u8]) -> Vec<u8>,
    {
        let deadline = timeout.map(|t| Instant::now() + t);
        let (sequence, response_bytes) = {
            let frame = self.request.read_frame(timeout)?;
            (frame.sequence(), handler(&frame))
        };
        let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
        let writer = self.response_writer(deadline)?;
        writer.write_frame_with_sequence(&response_bytes, sequence, remaining)?;
        Ok(sequence)
    }

    /// Serve until the client tears down its half.
    ///
    /// Returns `Ok(())` once the peer is gone; every other error propagates.
    pub fn serve<F>(&mut self, mut handler: F) -> BufferResult<()>
    where
        F: FnMut(&[u8]) -> Vec<u8>,
    {
        loop {
            match self.process_one(None, &mut handler) {
                Ok(_) => {}
                Err(BufferError::WriterDead | BufferError::ReaderDead) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Client half: writes requests, reads responses.
pub struct DuplexClient {
    response: Reader,
    request: Writer,
}

impl DuplexClient {
    /// Create the response sub-channel and connect to the server's request
    /// sub-channel, waiting up to `timeout` for the server to bind.
    pub fn connect(
        name: &str,
        config: BufferConfig,
        timeout: Option<Duration>,
    ) -> BufferResult<Self> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let response = Reader::new(&response_channel(name), config)?;
        let request = loop {
            match Writer::connect(&request_channel(name)) {
                Ok(writer) => break writer,
                Err(BufferError::NotFound { .. }) => match deadline {
                    Some(d) if Instant::now() >= d => return Err(BufferError::Timeout),
                    _ => std::thread::sleep(BIND_POLL),
                },
                Err(e) => return Err(e),
            }
        };
        Ok(Self { response, request })
    }

    /// Send a request; the returned sequence number is the correlation key.
    pub fn send_request(&mut self, data: &[u8], timeout: Option<Duration>) -> BufferResult<u64> {
        self.request.write_frame(data, timeout)
    }

    /// Zero-copy request staging; the pending frame's sequence is the
    /// correlation key once committed.
    pub fn acquire_request(
        &mut self,
        len: usize,
        timeout: Option<Duration>,
    ) -> BufferResult<PendingFrame<'_>> {
        self.request.acquire_frame(len, timeout)
    }

    /// Receive the next response; its sequence equals the request it
    /// answers.
    pub fn receive_response(&mut self, timeout: Option<Duration>) -> BufferResult<Frame<'_>> {
        self.response.read_frame(timeout)
    }

    /// Writer side, for metadata and counters.
    pub fn request_writer(&mut self) -> &mut Writer {
        &mut self.request
    }

    /// Reader side, for metadata and counters.
    pub fn response_reader(&mut self) -> &mut Reader {
        &mut self.response
    }
}
