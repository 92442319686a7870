//! Host collaborators: preemption control and a thread registry over OS
//! threads.
//!
//! `HostPreemption` emulates single-processor preemption disable: while one
//! OS thread holds it, every other thread that tries to disable preemption
//! waits. `HostThreads` hands out kernel thread ids to OS threads and lets
//! tests terminate them.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::{Condvar, Mutex, RwLock};

use super::{LiveThread, Preemption, Priority, ThreadId, ThreadRegistry};
use crate::semaphore::Semaphore;

/// Priority given to threads that register implicitly.
pub const DEFAULT_PRIORITY: Priority = 100;

#[derive(Debug, Default)]
struct Holder {
    thread: Option<thread::ThreadId>,
    depth: u32,
}

/// Nestable, owner-tracked exclusive section standing in for "preemption
/// disabled" on a multi-threaded host.
#[derive(Debug, Default)]
pub struct HostPreemption {
    holder: Mutex<Holder>,
    released: Condvar,
}

impl HostPreemption {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the calling OS thread has preemption disabled.
    #[must_use]
    pub fn held_by_current(&self) -> bool {
        self.holder.lock().thread == Some(thread::current().id())
    }

    /// Nesting depth held by the calling OS thread (0 if none).
    #[must_use]
    pub fn depth(&self) -> u32 {
        let holder = self.holder.lock();
        if holder.thread == Some(thread::current().id()) {
            holder.depth
        } else {
            0
        }
    }

    fn acquire(&self, depth: u32) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        while holder.thread.is_some() {
            self.released.wait(&mut holder);
        }
        holder.thread = Some(me);
        holder.depth = depth;
    }
}

impl Preemption for HostPreemption {
    fn disable(&self) {
        let me = thread::current().id();
        {
            let mut holder = self.holder.lock();
            if holder.thread == Some(me) {
                holder.depth += 1;
                return;
            }
        }
        self.acquire(1);
    }

    fn enable(&self) {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        debug_assert_eq!(holder.thread, Some(me), "enable without matching disable");
        if holder.thread != Some(me) {
            return;
        }
        holder.depth -= 1;
        if holder.depth == 0 {
            holder.thread = None;
            drop(holder);
            self.released.notify_one();
        }
    }

    fn suspend(&self) -> u32 {
        let me = thread::current().id();
        let mut holder = self.holder.lock();
        if holder.thread != Some(me) {
            return 0;
        }
        let depth = std::mem::take(&mut holder.depth);
        holder.thread = None;
        drop(holder);
        self.released.notify_one();
        depth
    }

    fn resume(&self, depth: u32) {
        if depth > 0 {
            self.acquire(depth);
        }
    }
}

#[derive(Debug)]
struct ThreadTable {
    next_id: u32,
    by_os: HashMap<thread::ThreadId, ThreadId>,
    live: HashMap<ThreadId, Priority>,
    /// Semaphores to interrupt when the keyed thread terminates.
    watchers: HashMap<ThreadId, Vec<Weak<Semaphore>>>,
}

impl Default for ThreadTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            by_os: HashMap::new(),
            live: HashMap::new(),
            watchers: HashMap::new(),
        }
    }
}

impl ThreadTable {
    fn register(&mut self, os: thread::ThreadId, priority: Priority) -> ThreadId {
        let id = ThreadId::new(self.next_id);
        self.next_id += 1;
        self.by_os.insert(os, id);
        self.live.insert(id, priority);
        id
    }

    /// Drop `id` from the live set, handing back what must be woken.
    fn terminate(&mut self, id: ThreadId) -> Option<Vec<Weak<Semaphore>>> {
        self.live.remove(&id)?;
        Some(self.watchers.remove(&id).unwrap_or_default())
    }
}

fn wake_watchers(watchers: Vec<Weak<Semaphore>>) {
    for sem in watchers.iter().filter_map(Weak::upgrade) {
        sem.interrupt_all();
    }
}

/// Thread registry over OS threads.
///
/// An OS thread gets a kernel id the first time it asks for one. Once that
/// id is terminated the same OS thread is treated as a new kernel thread on
/// its next call.
///
/// Terminating an id interrupts the waiters of every semaphore registered
/// through [`ThreadRegistry::watch_death`] for it, so blocked lockers see the
/// death without polling.
#[derive(Debug, Default)]
pub struct HostThreads {
    table: RwLock<ThreadTable>,
}

impl HostThreads {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling OS thread with `priority`, replacing any id it
    /// already had. The previous id, if any, is terminated.
    pub fn register_current(&self, priority: Priority) -> ThreadId {
        let os = thread::current().id();
        let mut table = self.table.write();
        let orphaned = match table.by_os.remove(&os) {
            Some(old) => table.terminate(old).unwrap_or_default(),
            None => Vec::new(),
        };
        let id = table.register(os, priority);
        drop(table);
        wake_watchers(orphaned);
        id
    }

    /// Terminate the calling thread's kernel identity.
    ///
    /// Mutexes it still holds are now held by a dead owner.
    pub fn exit_current(&self) -> Option<ThreadId> {
        let os = thread::current().id();
        let mut table = self.table.write();
        let id = table.by_os.remove(&os)?;
        let watchers = table.terminate(id);
        drop(table);
        wake_watchers(watchers.unwrap_or_default());
        Some(id)
    }

    /// Terminate `id`. Returns false if it was not live.
    pub fn kill(&self, id: ThreadId) -> bool {
        let mut table = self.table.write();
        table.by_os.retain(|_, v| *v != id);
        let watchers = table.terminate(id);
        drop(table);
        match watchers {
            Some(watchers) => {
                wake_watchers(watchers);
                true
            }
            None => false,
        }
    }

    /// Change the priority of a live thread.
    pub fn set_priority(&self, id: ThreadId, priority: Priority) -> bool {
        match self.table.write().live.get_mut(&id) {
            Some(p) => {
                *p = priority;
                true
            }
            None => false,
        }
    }

    /// Number of live threads.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.table.read().live.len()
    }
}

impl ThreadRegistry for HostThreads {
    fn current(&self) -> ThreadId {
        let os = thread::current().id();
        if let Some(id) = self.table.read().by_os.get(&os) {
            return *id;
        }
        let mut table = self.table.write();
        match table.by_os.get(&os) {
            Some(id) => *id,
            None => table.register(os, DEFAULT_PRIORITY),
        }
    }

    fn resolve(&self, id: ThreadId) -> Option<LiveThread> {
        self.table
            .read()
            .live
            .get(&id)
            .map(|&priority| LiveThread { id, priority })
    }

    fn watch_death(&self, id: ThreadId, sem: &Arc<Semaphore>) -> bool {
        let mut table = self.table.write();
        if !table.live.contains_key(&id) {
            return false;
        }
        let watchers = table.watchers.entry(id).or_default();
        watchers.retain(|w| w.strong_count() > 0);
        if !watchers.iter().any(|w| std::ptr::eq(w.as_ptr(), Arc::as_ptr(sem))) {
            watchers.push(Arc::downgrade(sem));
        }
        true
    }
}
