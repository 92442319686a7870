//! # rtmutex-core
//!
//! POSIX-style mutexes for a preemptive, priority-driven kernel.
//!
//! Supports the normal, error-checking and recursive disciplines and the
//! robust-mutex contract (owner-death detection and recovery). The scheduler
//! is reached only through the collaborator traits in [`sched`], so the core
//! runs unchanged on the host collaborators or on a test double. No `unsafe`
//! code is permitted at the crate level.

#![deny(unsafe_code)]

pub mod config;
pub mod contract;
pub mod errno;
pub mod error;
pub mod mutex;
pub mod sched;
pub mod semaphore;

pub use error::LockError;
pub use mutex::{AcquireReport, MAX_LOCK_COUNT, Mutex, MutexAttr, MutexKind, MutexSnapshot};
pub use sched::host::{HostPreemption, HostThreads};
pub use sched::{Kernel, LiveThread, Preemption, PreemptionGuard, Priority, ThreadId, ThreadRegistry};
pub use semaphore::{SemError, Semaphore, Wait};

/// A kernel over the host collaborators.
pub type HostKernel = Kernel<HostThreads, HostPreemption>;

/// Build a [`HostKernel`] with no registered threads.
#[must_use]
pub fn host_kernel() -> HostKernel {
    Kernel::new(HostThreads::new(), HostPreemption::new())
}
