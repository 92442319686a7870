//! Counting semaphore with priority-ordered waiters.
//!
//! `give` hands the unit directly to the best waiter instead of bumping the
//! count, so a woken waiter can never lose the unit to a thread that arrived
//! later. Waiters are ordered by priority, then by arrival.

use std::collections::{HashMap, VecDeque};
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::errno;
use crate::sched::Priority;

/// How long [`Semaphore::take`] may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Forever,
    NoWait,
    /// Absolute deadline.
    Until(Instant),
}

/// Why a take did not obtain a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SemError {
    #[error("semaphore unavailable")]
    WouldBlock,
    #[error("semaphore wait timed out")]
    TimedOut,
    #[error("semaphore wait interrupted")]
    Interrupted,
}

impl SemError {
    #[must_use]
    pub const fn errno(self) -> i32 {
        match self {
            Self::WouldBlock => errno::EAGAIN,
            Self::TimedOut => errno::ETIMEDOUT,
            Self::Interrupted => errno::EINTR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Wake {
    Granted,
    Interrupted,
}

#[derive(Debug, Clone, Copy)]
struct Waiter {
    seq: u64,
    priority: Priority,
}

#[derive(Debug, Default)]
struct SemState {
    count: u32,
    next_seq: u64,
    /// Bumped by every [`Semaphore::interrupt_all`].
    interrupts: u64,
    pending: VecDeque<Waiter>,
    woken: HashMap<u64, Wake>,
}

impl SemState {
    fn enqueue(&mut self, priority: Priority) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        // Behind every waiter of equal or higher priority.
        let at = self
            .pending
            .iter()
            .position(|w| w.priority < priority)
            .unwrap_or(self.pending.len());
        self.pending.insert(at, Waiter { seq, priority });
        seq
    }

    fn dequeue(&mut self, seq: u64) {
        self.pending.retain(|w| w.seq != seq);
    }
}

/// Counting semaphore. The mutex core uses it as a binary one.
#[derive(Debug)]
pub struct Semaphore {
    state: Mutex<SemState>,
    wake: Condvar,
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::binary()
    }
}

impl Semaphore {
    #[must_use]
    pub fn new(initial: u32) -> Self {
        Self {
            state: Mutex::new(SemState {
                count: initial,
                ..SemState::default()
            }),
            wake: Condvar::new(),
        }
    }

    /// Binary semaphore, initially free.
    #[must_use]
    pub fn binary() -> Self {
        Self::new(1)
    }

    /// Take one unit, waiting as `wait` allows. `priority` orders this caller
    /// among other waiters.
    pub fn take(&self, wait: Wait, priority: Priority) -> Result<(), SemError> {
        self.take_inner(wait, priority, None)
    }

    /// Like [`Semaphore::take`], but fails with `Interrupted` without
    /// queueing if [`Semaphore::interrupt_all`] ran after `epoch` was read
    /// from [`Semaphore::interrupt_epoch`].
    pub fn take_since(&self, wait: Wait, priority: Priority, epoch: u64) -> Result<(), SemError> {
        self.take_inner(wait, priority, Some(epoch))
    }

    /// Number of [`Semaphore::interrupt_all`] calls so far.
    #[must_use]
    pub fn interrupt_epoch(&self) -> u64 {
        self.state.lock().interrupts
    }

    fn take_inner(
        &self,
        wait: Wait,
        priority: Priority,
        epoch: Option<u64>,
    ) -> Result<(), SemError> {
        let mut state = self.state.lock();
        if state.count > 0 {
            state.count -= 1;
            return Ok(());
        }
        if wait != Wait::NoWait && epoch.is_some_and(|e| e != state.interrupts) {
            return Err(SemError::Interrupted);
        }
        let deadline = match wait {
            Wait::NoWait => return Err(SemError::WouldBlock),
            Wait::Until(deadline) if deadline <= Instant::now() => {
                return Err(SemError::TimedOut);
            }
            Wait::Until(deadline) => Some(deadline),
            Wait::Forever => None,
        };

        let seq = state.enqueue(priority);
        loop {
            match state.woken.remove(&seq) {
                Some(Wake::Granted) => return Ok(()),
                Some(Wake::Interrupted) => return Err(SemError::Interrupted),
                None => {}
            }
            match deadline {
                None => self.wake.wait(&mut state),
                Some(deadline) => {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        // A give may have raced the timeout.
                        return match state.woken.remove(&seq) {
                            Some(Wake::Granted) => Ok(()),
                            Some(Wake::Interrupted) => Err(SemError::Interrupted),
                            None => {
                                state.dequeue(seq);
                                Err(SemError::TimedOut)
                            }
                        };
                    }
                }
            }
        }
    }

    /// Non-blocking take.
    pub fn try_take(&self) -> Result<(), SemError> {
        self.take(Wait::NoWait, 0)
    }

    /// Release one unit: hand it to the best waiter, or bank it.
    pub fn give(&self) {
        let mut state = self.state.lock();
        match state.pending.pop_front() {
            Some(waiter) => {
                state.woken.insert(waiter.seq, Wake::Granted);
                drop(state);
                self.wake.notify_all();
            }
            None => state.count += 1,
        }
    }

    /// Wake every current waiter with [`SemError::Interrupted`]. Returns the
    /// number of waiters interrupted.
    ///
    /// Stands in for signal delivery to blocked threads.
    pub fn interrupt_all(&self) -> usize {
        let mut state = self.state.lock();
        state.interrupts += 1;
        let interrupted: Vec<u64> = state.pending.drain(..).map(|w| w.seq).collect();
        for seq in &interrupted {
            state.woken.insert(*seq, Wake::Interrupted);
        }
        drop(state);
        if !interrupted.is_empty() {
            self.wake.notify_all();
        }
        interrupted.len()
    }

    /// Units currently available.
    #[must_use]
    pub fn value(&self) -> u32 {
        self.state.lock().count
    }

    /// Threads blocked in `take`.
    #[must_use]
    pub fn waiters(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns true if a unit is available, nobody is queued, and no woken
    /// waiter is still on its way out of `take`.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.count > 0 && state.pending.is_empty() && state.woken.is_empty()
    }
}
