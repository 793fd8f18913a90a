//! Platform primitives: shared memory files, named semaphores, lock files,
//! and process-identity queries.
//!
//! Only the Linux mapping is implemented; the module boundary is the seam a
//! Windows global-object mapping would plug into.

pub mod linux;

pub use linux::{
    LockGuard, LockRecord, NamedSemaphore, PeerInfo, WaitOutcome, create_shm, current_pid,
    current_process_start_time, open_shm, process_alive, process_start_time, read_lock_record,
    remove_semaphore, remove_shm, try_acquire_lockfile, try_remove_stale,
};
