//! Mapped-segment wrapper with typed access to the three regions

use crate::error::{BufferError, BufferResult};
use crate::oieb::{BufferConfig, METADATA_PREFIX_SIZE, OIEB_SIZE, Oieb};
use crate::platform::{create_shm, open_shm};
use memmap2::MmapMut;
use std::sync::atomic::Ordering;

/// A mapped channel segment: `[OIEB | metadata | payload]`.
///
/// Owns the mapping, not the underlying file; segment files are created and
/// unlinked by the reader endpoint.
pub struct MappedSegment {
    name: String,
    mmap: MmapMut,
    metadata_size: u64,
    payload_size: u64,
}

impl MappedSegment {
    /// Create and map a fresh segment sized for `config`.
    ///
    /// The OIEB is left zero-filled; the caller initializes it.
    pub fn create(name: &str, config: &BufferConfig) -> BufferResult<Self> {
        let mmap = create_shm(name, config.total_size())?;
        Ok(Self {
            name: name.to_string(),
            mmap,
            metadata_size: config.metadata_size,
            payload_size: config.payload_size,
        })
    }

    /// Map an existing segment and validate its OIEB against the mapped
    /// length. This is the connecting writer's compatibility check.
    pub fn open(name: &str) -> BufferResult<Self> {
        let (mmap, len) = open_shm(name)?;
        if (len as usize) < core::mem::size_of::<Oieb>() {
            return Err(BufferError::InvalidOieb {
                reason: format!("segment is only {len} bytes, smaller than the OIEB"),
            });
        }
        let oieb = unsafe { &*(mmap.as_ptr() as *const Oieb) };
        oieb.validate(len)?;
        let config = oieb.config();
        Ok(Self {
            name: name.to_string(),
            mmap,
            metadata_size: config.metadata_size,
            payload_size: config.payload_size,
        })
    }

    /// Segment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared block sizes.
    pub fn config(&self) -> BufferConfig {
        BufferConfig {
            metadata_size: self.metadata_size,
            payload_size: self.payload_size,
        }
    }

    /// The OIEB at offset 0. Interior mutability via its atomic fields.
    pub fn oieb(&self) -> &Oieb {
        unsafe { &*(self.mmap.as_ptr() as *const Oieb) }
    }

    /// Metadata region start (after the OIEB).
    pub fn metadata_ptr(&self) -> *const u8 {
        unsafe { self.mmap.as_ptr().add(OIEB_SIZE as usize) }
    }

    /// Metadata region start, writable.
    pub fn metadata_ptr_mut(&mut self) -> *mut u8 {
        unsafe { self.mmap.as_mut_ptr().add(OIEB_SIZE as usize) }
    }

    /// Payload ring start (after the metadata block).
    pub fn payload_ptr(&self) -> *const u8 {
        unsafe {
            self.mmap
                .as_ptr()
                .add((OIEB_SIZE + self.metadata_size) as usize)
        }
    }

    /// Payload ring start, writable.
    pub fn payload_ptr_mut(&mut self) -> *mut u8 {
        unsafe {
            self.mmap
                .as_mut_ptr()
                .add((OIEB_SIZE + self.metadata_size) as usize)
        }
    }

    /// Borrow the written metadata, if any.
    ///
    /// Returns `None` while `metadata_written_bytes` is zero. The returned
    /// slice excludes the 8-byte length prefix.
    pub fn metadata(&self) -> Option<&[u8]> {
        let written = self.oieb().metadata_written_bytes.load(Ordering::Acquire);
        if written == 0 {
            return None;
        }
        let base = self.metadata_ptr();
        let len = unsafe { (base as *const u64).read_volatile() };
        if len + METADATA_PREFIX_SIZE > self.metadata_size {
            // Prefix disagrees with the block size; treat as unwritten
            // rather than hand out wild bytes.
            return None;
        }
        Some(unsafe {
            std::slice::from_raw_parts(base.add(METADATA_PREFIX_SIZE as usize), len as usize)
        })
    }
}
