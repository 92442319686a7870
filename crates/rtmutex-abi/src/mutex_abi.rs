//! ABI layer for the `rtmutex_*` mutex functions.
//!
//! Handles are opaque: `rtmutex_init` allocates one and `rtmutex_destroy`
//! frees it. Every function returns 0 or an errno.

use std::ffi::c_int;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use rtmutex_core::errno;
use rtmutex_core::error::result_errno;
use rtmutex_core::{LockError, Mutex, MutexKind, Wait};

use crate::kernel::{self, process_kernel};

/// Opaque mutex handle handed to C callers.
pub struct RtMutex {
    inner: Mutex,
}

static MUTEX_CONTENDED_BRANCHES: AtomicU64 = AtomicU64::new(0);
static MUTEX_WAIT_BRANCHES: AtomicU64 = AtomicU64::new(0);
static MUTEX_WAKE_BRANCHES: AtomicU64 = AtomicU64::new(0);
static MUTEX_OWNER_DIED_BRANCHES: AtomicU64 = AtomicU64::new(0);

/// Snapshot of the branch counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BranchCounters {
    /// Acquire attempts that found the mutex held by another thread.
    pub contended: u64,
    /// Acquires that actually blocked on the semaphore.
    pub wait: u64,
    /// Final unlocks that woke a waiter.
    pub wake: u64,
    /// Acquires that reported `EOWNERDEAD`.
    pub owner_died: u64,
}

/// Test hook: zero the branch counters.
#[doc(hidden)]
pub fn rtmutex_reset_state_for_tests() {
    MUTEX_CONTENDED_BRANCHES.store(0, Ordering::Relaxed);
    MUTEX_WAIT_BRANCHES.store(0, Ordering::Relaxed);
    MUTEX_WAKE_BRANCHES.store(0, Ordering::Relaxed);
    MUTEX_OWNER_DIED_BRANCHES.store(0, Ordering::Relaxed);
}

/// Test hook: snapshot contended/wait/wake/owner-died branch counters.
#[doc(hidden)]
#[must_use]
pub fn rtmutex_branch_counters_for_tests() -> BranchCounters {
    BranchCounters {
        contended: MUTEX_CONTENDED_BRANCHES.load(Ordering::Relaxed),
        wait: MUTEX_WAIT_BRANCHES.load(Ordering::Relaxed),
        wake: MUTEX_WAKE_BRANCHES.load(Ordering::Relaxed),
        owner_died: MUTEX_OWNER_DIED_BRANCHES.load(Ordering::Relaxed),
    }
}

fn acquire(m: &RtMutex, wait: Wait) -> c_int {
    let me = kernel::enter();
    if m.inner.owner().is_some_and(|owner| owner != me) {
        MUTEX_CONTENDED_BRANCHES.fetch_add(1, Ordering::Relaxed);
    }
    let report = m.inner.acquire_with(process_kernel(), wait);
    if report.waited {
        MUTEX_WAIT_BRANCHES.fetch_add(1, Ordering::Relaxed);
    }
    if report.result == Err(LockError::OwnerDied) {
        MUTEX_OWNER_DIED_BRANCHES.fetch_add(1, Ordering::Relaxed);
    }
    result_errno(report.result)
}

/// Turn a `CLOCK_MONOTONIC` absolute time into an `Instant`.
fn monotonic_deadline(abstime: &libc::timespec) -> Option<Instant> {
    if abstime.tv_sec < 0 || !(0..1_000_000_000).contains(&abstime.tv_nsec) {
        return None;
    }
    let mut now = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `now` is a valid, writable timespec.
    if unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut now) } != 0 {
        return None;
    }
    let target = Duration::new(abstime.tv_sec as u64, abstime.tv_nsec as u32);
    let current = Duration::new(
        now.tv_sec.max(0) as u64,
        now.tv_nsec.clamp(0, 999_999_999) as u32,
    );
    Some(Instant::now() + target.saturating_sub(current))
}

/// Create a mutex of `kind` (`PTHREAD_MUTEX_*`). `robust` non-zero enables
/// owner-death detection.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_init(
    out: *mut *mut RtMutex,
    kind: c_int,
    robust: c_int,
) -> c_int {
    if out.is_null() {
        return errno::EINVAL;
    }
    let kind = match MutexKind::from_raw(kind) {
        Ok(kind) => kind,
        Err(e) => return e.errno(),
    };
    let handle = Box::new(RtMutex {
        inner: Mutex::init(kind, robust != 0),
    });
    // SAFETY: `out` was checked non-null; the caller provides writable storage.
    unsafe { *out = Box::into_raw(handle) };
    0
}

/// Borrow a handle, or `None` for null.
///
/// # Safety
///
/// `m` is null or a live handle from `rtmutex_init`.
unsafe fn handle<'a>(m: *mut RtMutex) -> Option<&'a RtMutex> {
    // SAFETY: non-null handles come from `Box::into_raw` and stay live until
    // a successful `rtmutex_destroy`.
    unsafe { m.as_ref() }
}

/// Lock, blocking until acquired or the owner is found dead.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_lock(m: *mut RtMutex) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    match unsafe { handle(m) } {
        Some(m) => acquire(m, Wait::Forever),
        None => errno::EINVAL,
    }
}

/// Lock without blocking; `EBUSY` if another thread holds it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_trylock(m: *mut RtMutex) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    match unsafe { handle(m) } {
        Some(m) => acquire(m, Wait::NoWait),
        None => errno::EINVAL,
    }
}

/// Lock with an absolute `CLOCK_MONOTONIC` deadline.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_timedlock(
    m: *mut RtMutex,
    abstime: *const libc::timespec,
) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    let Some(m) = (unsafe { handle(m) }) else {
        return errno::EINVAL;
    };
    // SAFETY: non-null `abstime` points to a readable timespec.
    let Some(abstime) = (unsafe { abstime.as_ref() }) else {
        return errno::EINVAL;
    };
    match monotonic_deadline(abstime) {
        Some(deadline) => acquire(m, Wait::Until(deadline)),
        None => errno::EINVAL,
    }
}

/// Unlock one level; the last level wakes the best waiter.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_unlock(m: *mut RtMutex) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    let Some(m) = (unsafe { handle(m) }) else {
        return errno::EINVAL;
    };
    let me = kernel::enter();
    let had_waiters = m.inner.waiters() > 0;
    let result = m.inner.unlock(process_kernel());
    // A recursive unlock that only decremented leaves the caller as owner.
    if result.is_ok() && had_waiters && m.inner.owner() != Some(me) {
        MUTEX_WAKE_BRANCHES.fetch_add(1, Ordering::Relaxed);
    }
    result_errno(result)
}

/// Mark an abandoned robust mutex consistent.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_consistent(m: *mut RtMutex) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    let Some(m) = (unsafe { handle(m) }) else {
        return errno::EINVAL;
    };
    kernel::enter();
    result_errno(m.inner.make_consistent(process_kernel()))
}

/// Destroy and free the handle. On error the handle stays valid.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn rtmutex_destroy(m: *mut RtMutex) -> c_int {
    // SAFETY: caller passes a handle from `rtmutex_init`.
    let Some(handle_ref) = (unsafe { handle(m) }) else {
        return errno::EINVAL;
    };
    match handle_ref.inner.destroy(process_kernel()) {
        Ok(()) => {
            // SAFETY: `m` came from `Box::into_raw` in `rtmutex_init` and is
            // destroyed, so no other call may use it.
            drop(unsafe { Box::from_raw(m) });
            0
        }
        Err(e) => e.errno(),
    }
}

/// Terminate the calling thread's kernel identity. Robust mutexes it still
/// holds report `EOWNERDEAD` to their next locker, including one already
/// blocked.
#[unsafe(no_mangle)]
pub extern "C" fn rtmutex_thread_exit() {
    kernel::exit_current();
}
