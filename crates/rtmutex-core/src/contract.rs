//! Abstract transition contract for the mutex state machine.
//!
//! States are seen from the calling thread and abstract away the recursion
//! depth: `Unlock` from `LockedBySelf` describes releasing the last level.
//! The integration suite and the harness check [`Mutex`](crate::Mutex)
//! against this table.

use crate::error::LockError;
use crate::mutex::{MutexKind, MutexSnapshot};
use crate::sched::ThreadId;

/// Mutex state relative to the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractState {
    Unlocked,
    LockedBySelf,
    /// Held by a live thread other than the caller.
    LockedByOther,
    /// Held by a terminated thread; nobody has noticed yet.
    LockedByDead,
    /// Owner death was reported; awaiting `make_consistent`.
    Inconsistent,
    /// Made consistent by the caller, who may now release the dead hold.
    RecoveringBySelf,
    /// Made consistent by another live thread.
    RecoveringByOther,
    Destroyed,
}

impl ContractState {
    pub const ALL: [Self; 8] = [
        Self::Unlocked,
        Self::LockedBySelf,
        Self::LockedByOther,
        Self::LockedByDead,
        Self::Inconsistent,
        Self::RecoveringBySelf,
        Self::RecoveringByOther,
        Self::Destroyed,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Unlocked => "Unlocked",
            Self::LockedBySelf => "LockedBySelf",
            Self::LockedByOther => "LockedByOther",
            Self::LockedByDead => "LockedByDead",
            Self::Inconsistent => "Inconsistent",
            Self::RecoveringBySelf => "RecoveringBySelf",
            Self::RecoveringByOther => "RecoveringByOther",
            Self::Destroyed => "Destroyed",
        }
    }

    /// Returns true if a mutex of the given robustness can be in this state.
    #[must_use]
    pub const fn is_reachable(self, robust: bool) -> bool {
        robust
            || !matches!(
                self,
                Self::Inconsistent | Self::RecoveringBySelf | Self::RecoveringByOther
            )
    }

    /// Classify a snapshot as seen by `caller`.
    pub fn observe(
        snapshot: &MutexSnapshot,
        caller: ThreadId,
        is_alive: impl Fn(ThreadId) -> bool,
    ) -> Self {
        if snapshot.destroyed {
            return Self::Destroyed;
        }
        let Some(owner) = snapshot.owner else {
            return Self::Unlocked;
        };
        if owner == caller {
            return Self::LockedBySelf;
        }
        if is_alive(owner) {
            return Self::LockedByOther;
        }
        if snapshot.inconsistent {
            return Self::Inconsistent;
        }
        match snapshot.recovered_by {
            Some(r) if r == caller => Self::RecoveringBySelf,
            Some(r) if is_alive(r) => Self::RecoveringByOther,
            _ => Self::LockedByDead,
        }
    }
}

/// Operations covered by the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContractOp {
    Lock,
    TryLock,
    TimedLock,
    Unlock,
    MakeConsistent,
    Destroy,
}

impl ContractOp {
    pub const ALL: [Self; 6] = [
        Self::Lock,
        Self::TryLock,
        Self::TimedLock,
        Self::Unlock,
        Self::MakeConsistent,
        Self::Destroy,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lock => "Lock",
            Self::TryLock => "TryLock",
            Self::TimedLock => "TimedLock",
            Self::Unlock => "Unlock",
            Self::MakeConsistent => "MakeConsistent",
            Self::Destroy => "Destroy",
        }
    }

    const fn is_acquire(self) -> bool {
        matches!(self, Self::Lock | Self::TryLock | Self::TimedLock)
    }
}

/// Deterministic result of applying an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContractOutcome {
    pub next: ContractState,
    pub error: Option<LockError>,
    /// The call waits for another thread; `TimedLock` ends in `TimedOut`
    /// if that never happens before its deadline.
    pub blocks: bool,
}

impl ContractOutcome {
    const fn ok(next: ContractState) -> Self {
        Self {
            next,
            error: None,
            blocks: false,
        }
    }

    const fn fail(stay: ContractState, error: LockError) -> Self {
        Self {
            next: stay,
            error: Some(error),
            blocks: false,
        }
    }

    const fn blocked(stay: ContractState) -> Self {
        Self {
            next: stay,
            error: None,
            blocks: true,
        }
    }

    /// Errno the C layer reports for this outcome (0 when it succeeds or
    /// blocks).
    #[must_use]
    pub const fn errno(&self) -> i32 {
        match self.error {
            Some(e) => e.errno(),
            None => 0,
        }
    }
}

/// Contended acquire: blocking ops wait, `TryLock` fails fast.
const fn contend(state: ContractState, op: ContractOp) -> ContractOutcome {
    match op {
        ContractOp::TryLock => ContractOutcome::fail(state, LockError::Busy),
        _ => ContractOutcome::blocked(state),
    }
}

/// Transition table for every kind and robustness.
#[must_use]
pub const fn transition(
    kind: MutexKind,
    robust: bool,
    state: ContractState,
    op: ContractOp,
) -> ContractOutcome {
    use ContractState as S;

    if let S::Destroyed = state {
        return ContractOutcome::fail(state, LockError::InvalidArgument);
    }

    match op {
        ContractOp::Destroy => {
            return match state {
                S::Unlocked => ContractOutcome::ok(S::Destroyed),
                _ => ContractOutcome::fail(state, LockError::Busy),
            };
        }
        ContractOp::MakeConsistent => {
            return match state {
                S::Inconsistent => ContractOutcome::ok(S::RecoveringBySelf),
                _ => ContractOutcome::fail(state, LockError::InvalidState),
            };
        }
        ContractOp::Unlock => {
            return match state {
                S::LockedBySelf | S::RecoveringBySelf => ContractOutcome::ok(S::Unlocked),
                _ => ContractOutcome::fail(state, LockError::PermissionError),
            };
        }
        _ => {}
    }

    debug_assert!(op.is_acquire());
    match state {
        S::Unlocked => ContractOutcome::ok(S::LockedBySelf),
        S::LockedBySelf => match kind {
            MutexKind::Recursive => ContractOutcome::ok(S::LockedBySelf),
            MutexKind::Normal | MutexKind::ErrorCheck => {
                ContractOutcome::fail(state, LockError::Deadlock)
            }
        },
        S::LockedByOther | S::RecoveringByOther => contend(state, op),
        S::LockedByDead if robust => ContractOutcome::fail(S::Inconsistent, LockError::OwnerDied),
        S::LockedByDead => contend(state, op),
        S::Inconsistent => ContractOutcome::fail(state, LockError::OwnerDied),
        S::RecoveringBySelf => ContractOutcome::fail(state, LockError::Deadlock),
        S::Destroyed => ContractOutcome::fail(state, LockError::InvalidArgument),
    }
}
