//! Result codes of the mutex state machine.

use thiserror::Error;

use crate::errno;

/// Error returned by every mutex operation.
///
/// None of these is fatal. `OwnerDied` is the only recoverable one: the
/// caller repairs the protected data and then calls `make_consistent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum LockError {
    /// Malformed handle, unknown mutex kind, or a destroyed mutex.
    #[error("invalid argument")]
    InvalidArgument,
    /// The caller already holds this non-recursive mutex.
    #[error("resource deadlock would occur")]
    Deadlock,
    /// The recursion counter is saturated.
    #[error("recursive lock count overflow")]
    Overflow,
    /// The previous owner terminated while holding the mutex.
    #[error("previous owner died while holding the mutex")]
    OwnerDied,
    /// Unlock by a thread that is not the owner.
    #[error("operation not permitted: caller does not own the mutex")]
    PermissionError,
    /// Trylock contention, or destroy of a held mutex.
    #[error("mutex is busy")]
    Busy,
    /// The timedlock deadline elapsed first.
    #[error("timed out waiting for the mutex")]
    TimedOut,
    /// `make_consistent` on a mutex that is not inconsistent.
    #[error("mutex is not in an inconsistent state")]
    InvalidState,
}

impl LockError {
    /// POSIX errno reported for this error at the C boundary.
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::InvalidArgument | Self::InvalidState => errno::EINVAL,
            Self::Deadlock => errno::EDEADLK,
            Self::Overflow => errno::EOVERFLOW,
            Self::OwnerDied => errno::EOWNERDEAD,
            Self::PermissionError => errno::EPERM,
            Self::Busy => errno::EBUSY,
            Self::TimedOut => errno::ETIMEDOUT,
        }
    }

    /// Stable name used in fixtures and structured logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::Deadlock => "Deadlock",
            Self::Overflow => "Overflow",
            Self::OwnerDied => "OwnerDied",
            Self::PermissionError => "PermissionError",
            Self::Busy => "Busy",
            Self::TimedOut => "TimedOut",
            Self::InvalidState => "InvalidState",
        }
    }

    /// Inverse of [`LockError::name`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Every variant, in declaration order.
    pub const ALL: [Self; 8] = [
        Self::InvalidArgument,
        Self::Deadlock,
        Self::Overflow,
        Self::OwnerDied,
        Self::PermissionError,
        Self::Busy,
        Self::TimedOut,
        Self::InvalidState,
    ];
}

/// Convert an operation result into the C convention (0 or errno).
#[must_use]
pub fn result_errno(result: Result<(), LockError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => e.errno(),
    }
}
