//! Default robustness configuration.
//!
//! The robustness of mutexes created from [`MutexAttr::default`] is set via the
//! `RTMUTEX_ROBUST_DEFAULT` environment variable:
//! - `robust` (default): a lock attempt on a mutex whose owner terminated
//!   returns `OwnerDied` and the mutex must be made consistent.
//! - `stalled`: owner death is not detected; waiters block until the mutex is
//!   released, which for a dead owner is never.
//!
//! Attributes built explicitly with [`MutexAttr::robust`] ignore this setting.
//!
//! [`MutexAttr::default`]: crate::mutex::MutexAttr
//! [`MutexAttr::robust`]: crate::mutex::MutexAttr::robust

use std::sync::atomic::{AtomicU8, Ordering};

/// Robustness selected for default-constructed mutex attributes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RobustDefault {
    /// Detect and report owner death.
    #[default]
    Robust,
    /// POSIX `PTHREAD_MUTEX_STALLED`: owner death goes unnoticed.
    Stalled,
}

impl RobustDefault {
    /// Parse from string (case-insensitive). Unknown values select `Robust`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "stalled" | "unsafe" | "none" | "off" => Self::Stalled,
            _ => Self::Robust,
        }
    }

    /// Returns true if owner death is detected.
    #[must_use]
    pub const fn is_robust(self) -> bool {
        matches!(self, Self::Robust)
    }
}

// 0=unresolved, 1=Robust, 2=Stalled, 255=resolving.
static CACHED_DEFAULT: AtomicU8 = AtomicU8::new(0);

const DEFAULT_UNRESOLVED: u8 = 0;
const DEFAULT_ROBUST: u8 = 1;
const DEFAULT_STALLED: u8 = 2;
const DEFAULT_RESOLVING: u8 = 255;

/// Name of the environment variable read by [`robust_default`].
pub const ROBUST_DEFAULT_ENV: &str = "RTMUTEX_ROBUST_DEFAULT";

fn to_u8(value: RobustDefault) -> u8 {
    match value {
        RobustDefault::Robust => DEFAULT_ROBUST,
        RobustDefault::Stalled => DEFAULT_STALLED,
    }
}

fn from_u8(v: u8) -> RobustDefault {
    match v {
        DEFAULT_STALLED => RobustDefault::Stalled,
        _ => RobustDefault::Robust,
    }
}

/// Get the configured default robustness (reads the environment on first
/// call, caches thereafter).
///
/// A call racing with the first resolution sees `Robust`.
#[must_use]
pub fn robust_default() -> RobustDefault {
    let cached = CACHED_DEFAULT.load(Ordering::Acquire);
    if cached != DEFAULT_UNRESOLVED && cached != DEFAULT_RESOLVING {
        return from_u8(cached);
    }
    if cached == DEFAULT_RESOLVING {
        return RobustDefault::Robust;
    }

    if CACHED_DEFAULT
        .compare_exchange(
            DEFAULT_UNRESOLVED,
            DEFAULT_RESOLVING,
            Ordering::SeqCst,
            Ordering::Relaxed,
        )
        .is_err()
    {
        let v = CACHED_DEFAULT.load(Ordering::Acquire);
        return if v != DEFAULT_UNRESOLVED && v != DEFAULT_RESOLVING {
            from_u8(v)
        } else {
            RobustDefault::Robust
        };
    }

    let value = std::env::var(ROBUST_DEFAULT_ENV)
        .map(|v| RobustDefault::from_str_loose(&v))
        .unwrap_or_default();
    CACHED_DEFAULT.store(to_u8(value), Ordering::Release);
    value
}

/// Override the cached default. Intended for tests and embedders that
/// configure the kernel programmatically.
pub fn set_robust_default(value: RobustDefault) {
    CACHED_DEFAULT.store(to_u8(value), Ordering::Release);
}
