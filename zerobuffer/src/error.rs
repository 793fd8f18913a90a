//! Error types for buffer operations

use thiserror::Error;

/// Errors that can occur while creating, attaching to, or using a buffer
#[derive(Error, Debug)]
pub enum BufferError {
    /// A resource with this name already exists
    #[error("Resource already exists: {name}")]
    AlreadyExists {
        /// Resource name
        name: String,
    },

    /// A named resource was not found
    #[error("Resource not found: {name}")]
    NotFound {
        /// Resource name
        name: String,
    },

    /// Permission denied accessing a named resource
    #[error("Permission denied accessing: {name}")]
    PermissionDenied {
        /// Resource name
        name: String,
    },

    /// System resources exhausted
    #[error("System resource exhausted - cleanup required")]
    OutOfResources,

    /// The channel's lock file is held by a live reader
    #[error("Channel is busy: {name}")]
    Busy {
        /// Channel name
        name: String,
    },

    /// The segment name is still taken after stale reaping
    #[error("Channel name in use: {name}")]
    NameInUse {
        /// Channel name
        name: String,
    },

    /// The operation info exchange block failed validation
    #[error("Invalid OIEB: {reason}")]
    InvalidOieb {
        /// What failed to validate
        reason: String,
    },

    /// A live writer is already attached to this channel
    #[error("Writer already connected (pid {pid})")]
    WriterAlreadyExists {
        /// PID of the connected writer
        pid: u64,
    },

    /// The peer writer has disconnected or died
    #[error("Writer is dead or disconnected")]
    WriterDead,

    /// The peer reader has disconnected or died
    #[error("Reader is dead or disconnected")]
    ReaderDead,

    /// Not enough free space for the frame (non-blocking write)
    #[error("Buffer is full")]
    BufferFull,

    /// A blocking operation exceeded its timeout
    #[error("Operation timed out")]
    Timeout,

    /// Frame payload exceeds what the ring can ever hold
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Requested payload size
        size: u64,
        /// Largest payload the ring can hold
        max: u64,
    },

    /// Frame payload size is not acceptable (zero-length)
    #[error("Invalid frame size: {size}")]
    InvalidFrameSize {
        /// Requested payload size
        size: u64,
    },

    /// Metadata was already written once
    #[error("Metadata already written")]
    MetadataAlreadyWritten,

    /// Metadata does not fit the metadata block
    #[error("Metadata too large: {size} bytes (capacity {capacity})")]
    MetadataTooLarge {
        /// Metadata length plus length prefix
        size: u64,
        /// Metadata block capacity
        capacity: u64,
    },

    /// A frame header in the ring failed validation
    #[error("Invalid frame: {reason}")]
    InvalidFrame {
        /// What failed to validate
        reason: String,
    },

    /// The reader observed a gap or duplicate in the sequence
    #[error("Sequence error: expected {expected}, got {got}")]
    SequenceError {
        /// Next sequence number the reader expected
        expected: u64,
        /// Sequence number actually observed
        got: u64,
    },

    /// A buffer configuration value is invalid
    #[error("Invalid {what}: {value} (must be a non-zero multiple of 64 where required)")]
    InvalidConfig {
        /// Which configuration value
        what: &'static str,
        /// The offending value
        value: u64,
    },

    /// A channel name violates the naming rules
    #[error("Invalid channel name {name:?}: {reason}")]
    InvalidChannelName {
        /// The offending name
        name: String,
        /// Which rule was violated
        reason: &'static str,
    },

    /// A reserved feature that is not implemented
    #[error("Unsupported: {feature}")]
    Unsupported {
        /// The requested feature
        feature: &'static str,
    },

    /// IO error
    #[error("IO error: {source}")]
    Io {
        /// Source IO error
        #[from]
        source: std::io::Error,
    },

    /// Nix system call error
    #[error("System call error: {source}")]
    Nix {
        /// Source nix error
        #[from]
        source: nix::Error,
    },
}

/// Result type for buffer operations
pub type BufferResult<T> = Result<T, BufferError>;
