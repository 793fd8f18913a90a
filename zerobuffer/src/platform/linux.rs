//! Linux implementations of the platform primitives
//!
//! Segments are plain files under `/dev/shm` mapped with `memmap2`.
//! Semaphores are POSIX named semaphores (`sem_open` family), which the
//! kernel materializes as `/dev/shm/sem.<name>`. Lock files carry a
//! `{pid, start_time}` record and are guarded with `flock`.

use crate::error::{BufferError, BufferResult};
use memmap2::{MmapMut, MmapOptions};
use nix::unistd::getpid;
use serde::{Deserialize, Serialize};
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory where POSIX shared memory objects appear.
const SHM_DIR: &str = "/dev/shm";

fn shm_path(name: &str) -> PathBuf {
    Path::new(SHM_DIR).join(name)
}

/// Map an errno-flavoured IO error onto the buffer error taxonomy.
fn classify_io(name: &str, err: std::io::Error) -> BufferError {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::AlreadyExists => BufferError::AlreadyExists {
            name: name.to_string(),
        },
        ErrorKind::NotFound => BufferError::NotFound {
            name: name.to_string(),
        },
        ErrorKind::PermissionDenied => BufferError::PermissionDenied {
            name: name.to_string(),
        },
        _ => match err.raw_os_error() {
            Some(libc::ENOMEM | libc::ENOSPC | libc::EMFILE | libc::ENFILE) => {
                BufferError::OutOfResources
            }
            _ => BufferError::Io { source: err },
        },
    }
}

// ─── Shared memory segments ─────────────────────────────────────────

/// Create a new zero-filled segment of exactly `size` bytes.
///
/// Fails with [`BufferError::AlreadyExists`] if the name is taken.
pub fn create_shm(name: &str, size: u64) -> BufferResult<MmapMut> {
    let path = shm_path(name);
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| classify_io(name, e))?;

    if let Err(e) = file.set_len(size) {
        // Don't leave a truncated husk behind.
        let _ = std::fs::remove_file(&path);
        return Err(classify_io(name, e));
    }

    let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| classify_io(name, e))?;
    tracing::debug!(name, size, "created shared memory segment");
    Ok(mmap)
}

/// Map an existing segment, returning the mapping and its length.
///
/// Fails with [`BufferError::NotFound`] if no such segment exists.
pub fn open_shm(name: &str) -> BufferResult<(MmapMut, u64)> {
    let path = shm_path(name);
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&path)
        .map_err(|e| classify_io(name, e))?;
    let len = file.metadata().map_err(|e| classify_io(name, e))?.len();
    let mmap = unsafe { MmapOptions::new().map_mut(&file) }.map_err(|e| classify_io(name, e))?;
    Ok((mmap, len))
}

/// Remove a segment. Idempotent: a missing segment is not an error.
pub fn remove_shm(name: &str) {
    match std::fs::remove_file(shm_path(name)) {
        Ok(()) => tracing::debug!(name, "removed shared memory segment"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(name, error = %e, "failed to remove segment"),
    }
}

// ─── Named semaphores ───────────────────────────────────────────────

/// Outcome of a semaphore wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A token was consumed.
    Signaled,
    /// The timeout elapsed without a token.
    Timeout,
    /// The wait was interrupted by a signal; callers loop.
    Interrupted,
}

/// RAII handle to a POSIX named counting semaphore.
pub struct NamedSemaphore {
    sem: *mut libc::sem_t,
    name: String,
}

// The sem_t pointer refers to a process-shared kernel object; the handle
// itself is safe to move between threads.
unsafe impl Send for NamedSemaphore {}

impl NamedSemaphore {
    fn c_name(name: &str) -> BufferResult<CString> {
        CString::new(format!("/{name}")).map_err(|_| BufferError::InvalidChannelName {
            name: name.to_string(),
            reason: "contains NUL byte",
        })
    }

    /// Create a semaphore with the given initial value.
    ///
    /// Fails with [`BufferError::AlreadyExists`] if the name is taken.
    pub fn create(name: &str, initial: u32) -> BufferResult<Self> {
        let c_name = Self::c_name(name)?;
        let sem = unsafe {
            libc::sem_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL,
                0o600 as libc::c_uint,
                initial,
            )
        };
        if sem == libc::SEM_FAILED {
            return Err(classify_io(name, std::io::Error::last_os_error()));
        }
        tracing::debug!(name, initial, "created semaphore");
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Open an existing semaphore.
    pub fn open(name: &str) -> BufferResult<Self> {
        let c_name = Self::c_name(name)?;
        let sem = unsafe { libc::sem_open(c_name.as_ptr(), 0) };
        if sem == libc::SEM_FAILED {
            return Err(classify_io(name, std::io::Error::last_os_error()));
        }
        Ok(Self {
            sem,
            name: name.to_string(),
        })
    }

    /// Increment the semaphore, waking one waiter.
    pub fn post(&self) -> BufferResult<()> {
        let ret = unsafe { libc::sem_post(self.sem) };
        if ret != 0 {
            return Err(BufferError::Io {
                source: std::io::Error::last_os_error(),
            });
        }
        Ok(())
    }

    /// Wait for a token. `None` blocks indefinitely.
    ///
    /// `Interrupted` is returned as-is; the endpoint loops around it so the
    /// deadline accounting stays in one place.
    pub fn wait(&self, timeout: Option<Duration>) -> BufferResult<WaitOutcome> {
        let ret = match timeout {
            None => unsafe { libc::sem_wait(self.sem) },
            Some(timeout) => {
                let mut ts: libc::timespec = unsafe { std::mem::zeroed() };
                unsafe { libc::clock_gettime(libc::CLOCK_REALTIME, &mut ts) };
                let ns_total = ts.tv_nsec as u64 + timeout.subsec_nanos() as u64;
                ts.tv_sec += timeout.as_secs() as libc::time_t
                    + (ns_total / 1_000_000_000) as libc::time_t;
                ts.tv_nsec = (ns_total % 1_000_000_000) as libc::c_long;
                unsafe { libc::sem_timedwait(self.sem, &ts) }
            }
        };
        if ret == 0 {
            return Ok(WaitOutcome::Signaled);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::ETIMEDOUT) => Ok(WaitOutcome::Timeout),
            Some(libc::EINTR) => Ok(WaitOutcome::Interrupted),
            _ => Err(BufferError::Io {
                source: std::io::Error::last_os_error(),
            }),
        }
    }

    /// Consume a token if one is available, without blocking.
    pub fn try_wait(&self) -> BufferResult<bool> {
        let ret = unsafe { libc::sem_trywait(self.sem) };
        if ret == 0 {
            return Ok(true);
        }
        match std::io::Error::last_os_error().raw_os_error() {
            Some(libc::EAGAIN | libc::EINTR) => Ok(false),
            _ => Err(BufferError::Io {
                source: std::io::Error::last_os_error(),
            }),
        }
    }

    /// Semaphore name (without the leading slash).
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NamedSemaphore {
    fn drop(&mut self) {
        unsafe {
            libc::sem_close(self.sem);
        }
    }
}

/// Unlink a named semaphore. Idempotent.
pub fn remove_semaphore(name: &str) {
    if let Ok(c_name) = CString::new(format!("/{name}")) {
        let ret = unsafe { libc::sem_unlink(c_name.as_ptr()) };
        if ret == 0 {
            tracing::debug!(name, "removed semaphore");
        }
    }
}

// ─── Lock files ─────────────────────────────────────────────────────

/// Owner record stored in a lock file for diagnostics and reaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRecord {
    /// PID of the lock holder at acquisition time.
    pub pid: u64,
    /// `/proc` start time of the holder, to disambiguate PID reuse.
    pub start_time: u64,
}

/// Exclusive advisory lock on a record file, held for the guard's lifetime.
///
/// The flock is released when the file descriptor closes; the kernel closes
/// it when the holding process dies, which is what makes lock files usable
/// as crash detectors.
pub struct LockGuard {
    file: File,
    path: PathBuf,
}

impl LockGuard {
    /// Path of the underlying lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
    }
}

/// True if `file` still is the filesystem object `path` names.
///
/// A reaper may lock-and-unlink a lock file between another process's open
/// and flock; comparing (dev, ino) detects that the lock landed on a dead
/// inode.
fn same_file(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), std::fs::metadata(path)) {
        (Ok(held), Ok(named)) => held.dev() == named.dev() && held.ino() == named.ino(),
        _ => false,
    }
}

/// Acquire `path` exclusively and stamp it with the caller's identity.
///
/// Fails with [`BufferError::Busy`] if another process holds the lock.
pub fn try_acquire_lockfile(path: &Path) -> BufferResult<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    loop {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if ret != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                return Err(BufferError::Busy {
                    name: path.display().to_string(),
                });
            }
            return Err(BufferError::Io { source: err });
        }

        // A concurrent reaper may have unlinked the inode we just locked;
        // start over on the file that now carries the name.
        if !same_file(&file, path) {
            continue;
        }

        let record = LockRecord {
            pid: current_pid(),
            start_time: current_process_start_time(),
        };
        let mut handle = file.try_clone()?;
        handle.set_len(0)?;
        serde_json::to_writer(&mut handle, &record)
            .map_err(|e| BufferError::Io { source: e.into() })?;
        handle.flush()?;

        return Ok(LockGuard {
            file,
            path: path.to_path_buf(),
        });
    }
}

/// Read the owner record from a lock file, if parseable.
pub fn read_lock_record(path: &Path) -> Option<LockRecord> {
    let mut contents = String::new();
    File::open(path).ok()?.read_to_string(&mut contents).ok()?;
    serde_json::from_str(&contents).ok()
}

/// Remove a lock file only if no process currently holds it.
///
/// Returns `Ok(true)` if the file was removed (or vanished concurrently),
/// `Ok(false)` if a live holder still has it flocked.
pub fn try_remove_stale(path: &Path) -> BufferResult<bool> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(e) => return Err(BufferError::Io { source: e }),
    };
    let ret = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock {
            return Ok(false);
        }
        return Err(BufferError::Io { source: err });
    }
    // Only remove the exact inode we locked; if the name was re-created in
    // the meantime it has a live owner.
    let removed = if same_file(&file, path) {
        let _ = std::fs::remove_file(path);
        true
    } else {
        false
    };
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
    Ok(removed)
}

// ─── Process identity ───────────────────────────────────────────────

/// Current process ID.
pub fn current_pid() -> u64 {
    getpid().as_raw() as u64
}

/// Check if a process exists using the null-signal probe.
pub fn process_alive(pid: u64) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == 0 || pid > i32::MAX as u64 {
        return false;
    }
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::Error::EPERM) => true, // exists, not signallable by us
        Err(_) => false,
    }
}

/// Start time of a process in clock ticks since boot (field 22 of
/// `/proc/<pid>/stat`). A `(pid, start_time)` pair uniquely identifies a
/// process for the lifetime of the machine's boot.
pub fn process_start_time(pid: u64) -> Option<u64> {
    let contents = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // The comm field is parenthesized and may itself contain spaces or
    // parentheses; everything after the last ')' is whitespace-delimited.
    let after = &contents[contents.rfind(')')? + 1..];
    // starttime is field 22 overall, i.e. the 20th field after state.
    after.split_whitespace().nth(19)?.parse().ok()
}

/// Start time of the current process.
pub fn current_process_start_time() -> u64 {
    process_start_time(current_pid()).unwrap_or(0)
}

/// Cached identity of a peer endpoint, captured when the peer's PID is first
/// observed in the OIEB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// Peer PID as published in the OIEB.
    pub pid: u64,
    /// Peer start time at capture, if its `/proc` entry was readable.
    pub start_time: Option<u64>,
}

impl PeerInfo {
    /// Capture the identity of `pid` now.
    pub fn capture(pid: u64) -> Self {
        Self {
            pid,
            start_time: process_start_time(pid),
        }
    }

    /// True if the captured process is still the one running under this PID.
    pub fn is_alive(&self) -> bool {
        if !process_alive(self.pid) {
            return false;
        }
        match (self.start_time, process_start_time(self.pid)) {
            (Some(captured), Some(now)) => captured == now,
            // Start time unreadable on either side: fall back to existence.
            _ => true,
        }
    }
}
