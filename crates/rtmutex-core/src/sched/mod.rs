//! Scheduler collaborators consumed by the mutex core.
//!
//! The core never talks to a scheduler directly. It is handed a [`Kernel`]
//! that bundles two capabilities:
//!
//! - a [`ThreadRegistry`], which names the calling thread and tells live
//!   threads from terminated ones;
//! - a [`Preemption`] control, which makes the calling thread the only one
//!   able to touch kernel objects until it is re-enabled.
//!
//! [`host`] provides implementations of both on top of OS threads.

pub mod host;

use std::fmt;
use std::sync::Arc;

use crate::semaphore::Semaphore;

/// Kernel-level thread identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u32);

impl ThreadId {
    /// Wrap a raw identifier.
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw identifier value.
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tid:{}", self.0)
    }
}

/// Scheduling priority. Higher values run first.
pub type Priority = u8;

/// A thread the registry still knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveThread {
    pub id: ThreadId,
    pub priority: Priority,
}

/// Maps thread identifiers to live threads.
pub trait ThreadRegistry: Send + Sync {
    /// Identifier of the calling thread.
    fn current(&self) -> ThreadId;

    /// Resolve `id`, or `None` if that thread has terminated.
    fn resolve(&self, id: ThreadId) -> Option<LiveThread>;

    /// Priority the calling thread waits with.
    fn current_priority(&self) -> Priority {
        self.resolve(self.current()).map_or(0, |t| t.priority)
    }

    /// Ask to have `sem`'s waiters interrupted when `id` terminates.
    /// Returns false if `id` is already dead.
    ///
    /// Registries that never report a death while a thread waits can keep
    /// the default, which only checks liveness.
    fn watch_death(&self, id: ThreadId, _sem: &Arc<Semaphore>) -> bool {
        self.resolve(id).is_some()
    }
}

/// Nestable preemption control for the calling thread.
///
/// `disable`/`enable` calls nest; preemption comes back only when the
/// outermost `enable` runs. `suspend` and `resume` bracket a blocking wait:
/// a blocked thread cannot keep other threads from running.
pub trait Preemption: Send + Sync {
    fn disable(&self);
    fn enable(&self);

    /// Fully re-enable preemption, returning the nesting depth that was held.
    fn suspend(&self) -> u32;

    /// Restore a nesting depth previously returned by [`Preemption::suspend`].
    fn resume(&self, depth: u32);
}

/// Scoped preemption disable. Re-enables on drop, on every exit path.
#[must_use = "preemption is re-enabled as soon as the guard is dropped"]
pub struct PreemptionGuard<'a, P: Preemption + ?Sized> {
    preemption: &'a P,
}

impl<'a, P: Preemption + ?Sized> PreemptionGuard<'a, P> {
    pub fn new(preemption: &'a P) -> Self {
        preemption.disable();
        Self { preemption }
    }

    /// Run `f` with preemption temporarily enabled, then disable it again
    /// at the same nesting depth.
    ///
    /// This is the only way the mutex core suspends: `f` is the blocking
    /// semaphore wait.
    pub fn unlocked<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        struct Resume<'b, Q: Preemption + ?Sized> {
            preemption: &'b Q,
            depth: u32,
        }

        impl<Q: Preemption + ?Sized> Drop for Resume<'_, Q> {
            fn drop(&mut self) {
                self.preemption.resume(self.depth);
            }
        }

        let _resume = Resume {
            preemption: self.preemption,
            depth: self.preemption.suspend(),
        };
        f()
    }
}

impl<P: Preemption + ?Sized> Drop for PreemptionGuard<'_, P> {
    fn drop(&mut self) {
        self.preemption.enable();
    }
}

/// The collaborators one kernel instance runs on.
#[derive(Debug, Default)]
pub struct Kernel<R, P> {
    registry: R,
    preemption: P,
}

impl<R: ThreadRegistry, P: Preemption> Kernel<R, P> {
    pub const fn new(registry: R, preemption: P) -> Self {
        Self {
            registry,
            preemption,
        }
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn preemption(&self) -> &P {
        &self.preemption
    }

    /// Disable preemption until the returned guard is dropped.
    pub fn lock_preemption(&self) -> PreemptionGuard<'_, P> {
        PreemptionGuard::new(&self.preemption)
    }

    /// Identifier of the calling thread.
    pub fn current(&self) -> ThreadId {
        self.registry.current()
    }

    /// Returns true if `id` names a thread that has not terminated.
    pub fn is_alive(&self, id: ThreadId) -> bool {
        self.registry.resolve(id).is_some()
    }
}
