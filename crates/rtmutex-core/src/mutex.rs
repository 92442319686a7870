//! Kernel mutex: ownership, recursion and robust owner-death recovery.
//!
//! Every operation runs its check-then-mutate sequence under a
//! [`PreemptionGuard`](crate::sched::PreemptionGuard). The only suspension
//! point is the semaphore take in `lock`/`timedlock`, during which the guard
//! is fully released.

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex as StateLock;

use crate::config;
use crate::error::LockError;
use crate::sched::{Kernel, Preemption, ThreadId, ThreadRegistry};
use crate::semaphore::{SemError, Semaphore, Wait};

pub const PTHREAD_MUTEX_NORMAL: i32 = 0;
pub const PTHREAD_MUTEX_RECURSIVE: i32 = 1;
pub const PTHREAD_MUTEX_ERRORCHECK: i32 = 2;
pub const PTHREAD_MUTEX_DEFAULT: i32 = PTHREAD_MUTEX_NORMAL;

/// Deepest recursion a recursive mutex allows.
pub const MAX_LOCK_COUNT: u16 = i16::MAX as u16;

/// Locking discipline, fixed at creation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MutexKind {
    /// Relock by the owner is reported as `Deadlock`.
    #[default]
    Normal,
    /// Relock by the owner is reported as `Deadlock`; unlock is owner-checked.
    ErrorCheck,
    /// The owner may relock up to [`MAX_LOCK_COUNT`] times.
    Recursive,
}

impl MutexKind {
    pub const ALL: [Self; 3] = [Self::Normal, Self::ErrorCheck, Self::Recursive];

    /// Decode a `PTHREAD_MUTEX_*` value.
    pub fn from_raw(raw: i32) -> Result<Self, LockError> {
        match raw {
            PTHREAD_MUTEX_NORMAL => Ok(Self::Normal),
            PTHREAD_MUTEX_RECURSIVE => Ok(Self::Recursive),
            PTHREAD_MUTEX_ERRORCHECK => Ok(Self::ErrorCheck),
            _ => Err(LockError::InvalidArgument),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> i32 {
        match self {
            Self::Normal => PTHREAD_MUTEX_NORMAL,
            Self::Recursive => PTHREAD_MUTEX_RECURSIVE,
            Self::ErrorCheck => PTHREAD_MUTEX_ERRORCHECK,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::ErrorCheck => "errorcheck",
            Self::Recursive => "recursive",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name.trim()))
    }
}

/// Creation attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexAttr {
    pub kind: MutexKind,
    pub robust: bool,
}

impl Default for MutexAttr {
    /// `Normal`, with the robustness selected by [`config::robust_default`].
    fn default() -> Self {
        Self {
            kind: MutexKind::Normal,
            robust: config::robust_default().is_robust(),
        }
    }
}

impl MutexAttr {
    #[must_use]
    pub fn kind(mut self, kind: MutexKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn robust(mut self, robust: bool) -> Self {
        self.robust = robust;
        self
    }
}

#[derive(Debug, Default)]
struct MutexState {
    owner: Option<ThreadId>,
    lock_count: u16,
    inconsistent: bool,
    recovered_by: Option<ThreadId>,
    destroyed: bool,
}

/// Point-in-time view of a mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexSnapshot {
    pub kind: MutexKind,
    pub robust: bool,
    pub owner: Option<ThreadId>,
    pub lock_count: u16,
    pub inconsistent: bool,
    pub recovered_by: Option<ThreadId>,
    pub destroyed: bool,
    pub waiters: usize,
}

impl MutexSnapshot {
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.owner.is_none() && self.lock_count == 0
    }
}

enum Admission {
    /// Recursive relock already counted.
    Relocked,
    /// Must take the semaphore. Carries the thread whose death would
    /// change the outcome of waiting, if any.
    Contend(Option<ThreadId>),
}

/// Outcome of an acquire attempt, with whether the caller had to block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireReport {
    pub result: Result<(), LockError>,
    pub waited: bool,
}

/// A kernel mutex.
#[derive(Debug)]
pub struct Mutex {
    kind: MutexKind,
    robust: bool,
    state: StateLock<MutexState>,
    sem: Arc<Semaphore>,
}

impl Mutex {
    /// Create an unlocked mutex.
    #[must_use]
    pub fn init(kind: MutexKind, robust: bool) -> Self {
        Self {
            kind,
            robust,
            state: StateLock::new(MutexState::default()),
            sem: Arc::new(Semaphore::binary()),
        }
    }

    #[must_use]
    pub fn with_attr(attr: MutexAttr) -> Self {
        Self::init(attr.kind, attr.robust)
    }

    /// Acquire, blocking as long as it takes.
    ///
    /// Returns `OwnerDied` without acquiring when a robust mutex's owner has
    /// terminated, including when it dies while the caller is blocked.
    /// Never reports an interrupted wait.
    pub fn lock<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
    ) -> Result<(), LockError> {
        self.acquire_with(kernel, Wait::Forever).result
    }

    /// Acquire without blocking; `Busy` if another thread holds the mutex.
    pub fn trylock<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
    ) -> Result<(), LockError> {
        self.acquire_with(kernel, Wait::NoWait).result
    }

    /// Acquire, giving up with `TimedOut` at `deadline`.
    pub fn timedlock<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
        deadline: Instant,
    ) -> Result<(), LockError> {
        self.acquire_with(kernel, Wait::Until(deadline)).result
    }

    /// Release one level of ownership, waking one waiter on the last level.
    pub fn unlock<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
    ) -> Result<(), LockError> {
        let _guard = kernel.lock_preemption();
        let me = kernel.current();
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(LockError::InvalidArgument);
        }

        match state.owner {
            Some(owner) if owner == me => {
                if self.kind == MutexKind::Recursive && state.lock_count > 1 {
                    state.lock_count -= 1;
                    self.check_invariants(&state);
                    return Ok(());
                }
            }
            Some(owner)
                if state.recovered_by == Some(me)
                    && !state.inconsistent
                    && !kernel.is_alive(owner) => {}
            _ => return Err(LockError::PermissionError),
        }

        state.owner = None;
        state.lock_count = 0;
        state.inconsistent = false;
        state.recovered_by = None;
        self.check_invariants(&state);
        drop(state);
        self.sem.give();
        Ok(())
    }

    /// Mark an abandoned robust mutex consistent again.
    ///
    /// Any live thread may call this while the mutex is inconsistent, not
    /// only one that received `OwnerDied`. The caller becomes entitled to
    /// release the dead owner's hold with [`Mutex::unlock`]. Ownership is
    /// not transferred.
    pub fn make_consistent<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
    ) -> Result<(), LockError> {
        let _guard = kernel.lock_preemption();
        let me = kernel.current();
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(LockError::InvalidArgument);
        }
        if !state.inconsistent {
            return Err(LockError::InvalidState);
        }
        state.inconsistent = false;
        state.recovered_by = Some(me);
        self.check_invariants(&state);
        Ok(())
    }

    /// Retire the mutex. Fails with `Busy` while it is held or while a
    /// woken waiter has not yet claimed it.
    pub fn destroy<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
    ) -> Result<(), LockError> {
        let _guard = kernel.lock_preemption();
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(LockError::InvalidArgument);
        }
        if state.owner.is_some() || !self.sem.is_idle() {
            return Err(LockError::Busy);
        }
        state.destroyed = true;
        Ok(())
    }

    /// Acquire as `wait` allows, reporting whether the caller blocked.
    ///
    /// The owner-death check runs again every time a wait is interrupted,
    /// so a blocked locker of a robust mutex whose owner terminates gets
    /// `OwnerDied` once the registry reports the death.
    pub fn acquire_with<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
        wait: Wait,
    ) -> AcquireReport {
        let mut waited = false;
        let result = self.acquire(kernel, wait, &mut waited);
        AcquireReport { result, waited }
    }

    fn acquire<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
        wait: Wait,
        waited: &mut bool,
    ) -> Result<(), LockError> {
        let mut guard = kernel.lock_preemption();
        let me = kernel.current();
        let priority = kernel.registry().current_priority();

        loop {
            // Read before admission: a death after this point interrupts
            // the wait below even if it lands before we queue.
            let epoch = self.sem.interrupt_epoch();
            let watched = match self.admit(kernel, me)? {
                Admission::Relocked => return Ok(()),
                Admission::Contend(watched) => watched,
            };
            if self.sem.try_take().is_ok() {
                break;
            }
            if wait == Wait::NoWait {
                return Err(LockError::Busy);
            }
            if let Some(id) = watched
                && !kernel.registry().watch_death(id, &self.sem)
            {
                continue;
            }

            if matches!(wait, Wait::Until(deadline) if deadline <= Instant::now()) {
                return Err(LockError::TimedOut);
            }

            *waited = true;
            match guard.unlocked(|| self.sem.take_since(wait, priority, epoch)) {
                Ok(()) => break,
                Err(SemError::Interrupted) => {}
                Err(SemError::TimedOut) => return Err(LockError::TimedOut),
                Err(SemError::WouldBlock) => return Err(LockError::Busy),
            }
        }
        self.claim(me)
    }

    /// Steps that never block: relock by the owner and owner-death
    /// detection.
    fn admit<R: ThreadRegistry, P: Preemption>(
        &self,
        kernel: &Kernel<R, P>,
        me: ThreadId,
    ) -> Result<Admission, LockError> {
        let mut state = self.state.lock();
        if state.destroyed {
            return Err(LockError::InvalidArgument);
        }

        let admission = match state.owner {
            Some(owner) if owner == me => match self.kind {
                MutexKind::Recursive if state.lock_count < MAX_LOCK_COUNT => {
                    state.lock_count += 1;
                    Ok(Admission::Relocked)
                }
                MutexKind::Recursive => Err(LockError::Overflow),
                MutexKind::Normal | MutexKind::ErrorCheck => Err(LockError::Deadlock),
            },
            Some(owner) if self.robust && !kernel.is_alive(owner) => {
                match state.recovered_by {
                    Some(recoverer) if recoverer == me => Err(LockError::Deadlock),
                    Some(recoverer) if kernel.is_alive(recoverer) => {
                        Ok(Admission::Contend(Some(recoverer)))
                    }
                    // Unrecovered, or the recovering thread died too.
                    _ => {
                        state.recovered_by = None;
                        state.inconsistent = true;
                        Err(LockError::OwnerDied)
                    }
                }
            }
            Some(owner) if self.robust => Ok(Admission::Contend(Some(owner))),
            _ => Ok(Admission::Contend(None)),
        };
        self.check_invariants(&state);
        admission
    }

    /// Record ownership after the semaphore has been taken.
    fn claim(&self, me: ThreadId) -> Result<(), LockError> {
        let mut state = self.state.lock();
        if state.destroyed {
            drop(state);
            self.sem.give();
            return Err(LockError::InvalidArgument);
        }
        debug_assert!(state.owner.is_none(), "semaphore taken while owned");
        state.owner = Some(me);
        state.lock_count = 1;
        self.check_invariants(&state);
        Ok(())
    }

    fn check_invariants(&self, state: &MutexState) {
        debug_assert_eq!(
            state.owner.is_none(),
            state.lock_count == 0,
            "owner and lock count disagree"
        );
        debug_assert!(
            self.kind == MutexKind::Recursive || state.lock_count <= 1,
            "non-recursive mutex locked more than once"
        );
        debug_assert!(state.lock_count <= MAX_LOCK_COUNT);
        debug_assert!(self.robust || !state.inconsistent);
        debug_assert!(!(state.inconsistent && state.recovered_by.is_some()));
    }

    /// Wake every blocked locker with a spurious interruption. Lockers
    /// check the owner again and resume waiting with their original
    /// deadline.
    pub fn interrupt_waiters(&self) -> usize {
        self.sem.interrupt_all()
    }

    #[must_use]
    pub fn kind(&self) -> MutexKind {
        self.kind
    }

    #[must_use]
    pub fn is_robust(&self) -> bool {
        self.robust
    }

    #[must_use]
    pub fn owner(&self) -> Option<ThreadId> {
        self.state.lock().owner
    }

    #[must_use]
    pub fn lock_count(&self) -> u16 {
        self.state.lock().lock_count
    }

    #[must_use]
    pub fn is_inconsistent(&self) -> bool {
        self.state.lock().inconsistent
    }

    #[must_use]
    pub fn recovered_by(&self) -> Option<ThreadId> {
        self.state.lock().recovered_by
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    /// Threads blocked waiting for the mutex.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.sem.waiters()
    }

    #[must_use]
    pub fn snapshot(&self) -> MutexSnapshot {
        let state = self.state.lock();
        MutexSnapshot {
            kind: self.kind,
            robust: self.robust,
            owner: state.owner,
            lock_count: state.lock_count,
            inconsistent: state.inconsistent,
            recovered_by: state.recovered_by,
            destroyed: state.destroyed,
            waiters: self.sem.waiters(),
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::with_attr(MutexAttr::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::LiveThread;
    use std::collections::HashSet;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// One OS thread playing several kernel threads. Nothing here may block.
    #[derive(Default)]
    struct FakeThreads {
        acting: AtomicU32,
        dead: StdMutex<HashSet<u32>>,
    }

    impl ThreadRegistry for FakeThreads {
        fn current(&self) -> ThreadId {
            ThreadId::new(self.acting.load(Ordering::Relaxed))
        }
        fn resolve(&self, id: ThreadId) -> Option<LiveThread> {
            if self.dead.lock().unwrap().contains(&id.raw()) {
                None
            } else {
                Some(LiveThread { id, priority: 1 })
            }
        }
    }

    #[derive(Default)]
    struct FlatPreemption {
        depth: AtomicU32,
    }

    impl Preemption for FlatPreemption {
        fn disable(&self) {
            self.depth.fetch_add(1, Ordering::Relaxed);
        }
        fn enable(&self) {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        fn suspend(&self) -> u32 {
            self.depth.swap(0, Ordering::Relaxed)
        }
        fn resume(&self, depth: u32) {
            self.depth.store(depth, Ordering::Relaxed);
        }
    }

    type TestKernel = Kernel<FakeThreads, FlatPreemption>;

    const A: u32 = 1;
    const B: u32 = 2;
    const C: u32 = 3;

    fn kernel() -> TestKernel {
        Kernel::new(FakeThreads::default(), FlatPreemption::default())
    }

    fn act(k: &TestKernel, id: u32) {
        k.registry().acting.store(id, Ordering::Relaxed);
    }

    fn kill(k: &TestKernel, id: u32) {
        k.registry().dead.lock().unwrap().insert(id);
    }

    fn tid(id: u32) -> ThreadId {
        ThreadId::new(id)
    }

    fn preemption_depth(k: &TestKernel) -> u32 {
        k.preemption().depth.load(Ordering::Relaxed)
    }

    #[test]
    fn lock_unlock_restores_unlocked_for_every_kind() {
        let k = kernel();
        act(&k, A);
        for kind in MutexKind::ALL {
            for robust in [false, true] {
                let m = Mutex::init(kind, robust);
                m.lock(&k).unwrap();
                assert_eq!(m.owner(), Some(tid(A)));
                assert_eq!(m.lock_count(), 1);
                m.unlock(&k).unwrap();
                assert!(m.snapshot().is_unlocked());
                assert_eq!(preemption_depth(&k), 0);
            }
        }
    }

    #[test]
    fn acquire_report_marks_only_real_waits() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Normal, true);
        assert_eq!(
            m.acquire_with(&k, Wait::Forever),
            AcquireReport {
                result: Ok(()),
                waited: false
            }
        );

        act(&k, B);
        let expired = m.acquire_with(&k, Wait::Until(Instant::now()));
        assert_eq!(expired.result, Err(LockError::TimedOut));
        assert!(!expired.waited);
        assert!(!m.acquire_with(&k, Wait::NoWait).waited);

        kill(&k, A);
        let died = m.acquire_with(&k, Wait::Forever);
        assert_eq!(died.result, Err(LockError::OwnerDied));
        assert!(!died.waited);
        assert_eq!(preemption_depth(&k), 0);
    }

    #[test]
    fn recursive_counts_down_to_unlocked() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Recursive, false);
        const N: u16 = 5;
        for _ in 0..N {
            m.lock(&k).unwrap();
        }
        assert_eq!(m.lock_count(), N);
        for done in 1..N {
            m.unlock(&k).unwrap();
            assert_eq!(m.owner(), Some(tid(A)));
            assert_eq!(m.lock_count(), N - done);
        }
        m.unlock(&k).unwrap();
        assert!(m.snapshot().is_unlocked());
    }

    #[test]
    fn recursive_overflow_leaves_count() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Recursive, false);
        m.lock(&k).unwrap();
        m.state.lock().lock_count = MAX_LOCK_COUNT;
        assert_eq!(m.lock(&k), Err(LockError::Overflow));
        assert_eq!(m.trylock(&k), Err(LockError::Overflow));
        assert_eq!(m.lock_count(), MAX_LOCK_COUNT);
    }

    #[test]
    fn relock_of_non_recursive_is_deadlock() {
        let k = kernel();
        act(&k, A);
        for kind in [MutexKind::Normal, MutexKind::ErrorCheck] {
            let m = Mutex::init(kind, false);
            m.lock(&k).unwrap();
            let before = m.snapshot();
            assert_eq!(m.lock(&k), Err(LockError::Deadlock));
            assert_eq!(m.trylock(&k), Err(LockError::Deadlock));
            assert_eq!(
                m.timedlock(&k, Instant::now() + Duration::from_secs(1)),
                Err(LockError::Deadlock)
            );
            assert_eq!(m.snapshot(), before);
            assert_eq!(preemption_depth(&k), 0);
        }
    }

    #[test]
    fn unlock_by_non_owner_is_permission_error() {
        let k = kernel();
        let m = Mutex::init(MutexKind::ErrorCheck, false);
        act(&k, A);
        assert_eq!(m.unlock(&k), Err(LockError::PermissionError));
        m.lock(&k).unwrap();
        act(&k, B);
        assert_eq!(m.unlock(&k), Err(LockError::PermissionError));
        assert_eq!(m.owner(), Some(tid(A)));
        assert_eq!(m.lock_count(), 1);
    }

    #[test]
    fn trylock_on_held_mutex_is_busy() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Normal, true);
        act(&k, A);
        m.lock(&k).unwrap();
        act(&k, B);
        assert_eq!(m.trylock(&k), Err(LockError::Busy));
        assert_eq!(m.owner(), Some(tid(A)));
    }

    #[test]
    fn timedlock_past_deadline_times_out_unchanged() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Normal, false);
        act(&k, A);
        m.lock(&k).unwrap();
        act(&k, B);
        let before = m.snapshot();
        assert_eq!(
            m.timedlock(&k, Instant::now() + Duration::from_millis(10)),
            Err(LockError::TimedOut)
        );
        assert_eq!(m.snapshot(), before);
        assert_eq!(preemption_depth(&k), 0);
    }

    #[test]
    fn timedlock_on_free_mutex_ignores_stale_deadline() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Normal, false);
        let stale = Instant::now();
        std::thread::sleep(Duration::from_millis(1));
        assert_eq!(m.timedlock(&k, stale), Ok(()));
    }

    #[test]
    fn owner_death_reports_owner_died_and_keeps_owner() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Normal, true);
        act(&k, A);
        m.lock(&k).unwrap();
        kill(&k, A);

        act(&k, B);
        assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
        assert!(m.is_inconsistent());
        assert_eq!(m.owner(), Some(tid(A)));

        // Every acquirer sees it until someone recovers.
        act(&k, C);
        assert_eq!(m.trylock(&k), Err(LockError::OwnerDied));

        act(&k, B);
        m.make_consistent(&k).unwrap();
        assert!(!m.is_inconsistent());
        assert_eq!(m.owner(), Some(tid(A)));
        assert_eq!(m.recovered_by(), Some(tid(B)));
    }

    #[test]
    fn recovering_thread_releases_dead_owner_hold() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Recursive, true);
        act(&k, A);
        m.lock(&k).unwrap();
        m.lock(&k).unwrap();
        kill(&k, A);

        act(&k, B);
        assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
        m.make_consistent(&k).unwrap();
        assert_eq!(m.lock(&k), Err(LockError::Deadlock));

        act(&k, C);
        assert_eq!(m.trylock(&k), Err(LockError::Busy));
        assert_eq!(m.unlock(&k), Err(LockError::PermissionError));

        act(&k, B);
        m.unlock(&k).unwrap();
        assert!(m.snapshot().is_unlocked());
        assert_eq!(m.recovered_by(), None);

        act(&k, C);
        m.trylock(&k).unwrap();
        assert_eq!(m.owner(), Some(tid(C)));
    }

    #[test]
    fn dead_recoverer_reabandons_mutex() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Normal, true);
        act(&k, A);
        m.lock(&k).unwrap();
        kill(&k, A);
        act(&k, B);
        assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
        m.make_consistent(&k).unwrap();
        kill(&k, B);

        act(&k, C);
        assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
        assert_eq!(m.recovered_by(), None);
        assert!(m.is_inconsistent());
    }

    #[test]
    fn make_consistent_requires_inconsistent() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Normal, true);
        assert_eq!(m.make_consistent(&k), Err(LockError::InvalidState));
        m.lock(&k).unwrap();
        assert_eq!(m.make_consistent(&k), Err(LockError::InvalidState));
    }

    #[test]
    fn stalled_mutex_ignores_owner_death() {
        let k = kernel();
        let m = Mutex::init(MutexKind::ErrorCheck, false);
        act(&k, A);
        m.lock(&k).unwrap();
        kill(&k, A);
        act(&k, B);
        assert_eq!(m.trylock(&k), Err(LockError::Busy));
        assert!(!m.is_inconsistent());
    }

    #[test]
    fn destroy_held_is_busy_unheld_succeeds() {
        let k = kernel();
        act(&k, A);
        let m = Mutex::init(MutexKind::Normal, false);
        m.lock(&k).unwrap();
        assert_eq!(m.destroy(&k), Err(LockError::Busy));
        m.unlock(&k).unwrap();
        m.destroy(&k).unwrap();
        assert!(m.is_destroyed());
        assert_eq!(m.lock(&k), Err(LockError::InvalidArgument));
        assert_eq!(m.trylock(&k), Err(LockError::InvalidArgument));
        assert_eq!(m.unlock(&k), Err(LockError::InvalidArgument));
        assert_eq!(m.make_consistent(&k), Err(LockError::InvalidArgument));
        assert_eq!(m.destroy(&k), Err(LockError::InvalidArgument));
    }

    #[test]
    fn recursive_scenario_between_two_threads() {
        let k = kernel();
        let m = Mutex::init(MutexKind::Recursive, false);

        act(&k, A);
        m.lock(&k).unwrap();
        assert_eq!(m.lock_count(), 1);
        m.lock(&k).unwrap();
        assert_eq!(m.lock_count(), 2);

        act(&k, B);
        assert_eq!(m.trylock(&k), Err(LockError::Busy));

        act(&k, A);
        m.unlock(&k).unwrap();
        assert_eq!(m.lock_count(), 1);
        assert_eq!(m.owner(), Some(tid(A)));
        m.unlock(&k).unwrap();
        assert!(m.snapshot().is_unlocked());

        act(&k, B);
        m.trylock(&k).unwrap();
        assert_eq!(m.owner(), Some(tid(B)));
    }

    #[test]
    fn kind_from_raw() {
        assert_eq!(MutexKind::from_raw(0), Ok(MutexKind::Normal));
        assert_eq!(MutexKind::from_raw(1), Ok(MutexKind::Recursive));
        assert_eq!(MutexKind::from_raw(2), Ok(MutexKind::ErrorCheck));
        assert_eq!(MutexKind::from_raw(PTHREAD_MUTEX_DEFAULT), Ok(MutexKind::Normal));
        assert_eq!(MutexKind::from_raw(7), Err(LockError::InvalidArgument));
        assert_eq!(MutexKind::from_raw(-1), Err(LockError::InvalidArgument));
        for kind in MutexKind::ALL {
            assert_eq!(MutexKind::from_raw(kind.as_raw()), Ok(kind));
        }
        assert_eq!(MutexKind::from_name("ErrorCheck"), Some(MutexKind::ErrorCheck));
    }

    #[test]
    fn attr_builder_overrides_default() {
        let attr = MutexAttr::default().kind(MutexKind::Recursive).robust(false);
        let m = Mutex::with_attr(attr);
        assert_eq!(m.kind(), MutexKind::Recursive);
        assert!(!m.is_robust());
    }
}
