//! Multi-threaded behavior of the mutex over the host collaborators.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex as StdMutex};
use std::thread;
use std::time::{Duration, Instant};

use rtmutex_core::{HostKernel, LockError, Mutex, MutexKind, host_kernel};

fn shared(kind: MutexKind, robust: bool) -> (Arc<HostKernel>, Arc<Mutex>) {
    (Arc::new(host_kernel()), Arc::new(Mutex::init(kind, robust)))
}

fn wait_for_waiters(m: &Mutex, n: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while m.waiters() < n {
        assert!(
            Instant::now() < deadline,
            "expected {n} waiters, saw {}",
            m.waiters()
        );
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn lock_blocks_until_holder_unlocks() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let acquired = Arc::new(AtomicBool::new(false));
    let handle = {
        let (k, m, acquired) = (Arc::clone(&k), Arc::clone(&m), Arc::clone(&acquired));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            acquired.store(true, Ordering::Release);
            let me = k.current();
            assert_eq!(m.owner(), Some(me));
            m.unlock(&k).unwrap();
        })
    };

    wait_for_waiters(&m, 1);
    thread::sleep(Duration::from_millis(20));
    assert!(!acquired.load(Ordering::Acquire));

    m.unlock(&k).unwrap();
    handle.join().unwrap();
    assert!(acquired.load(Ordering::Acquire));
    assert!(m.snapshot().is_unlocked());
}

#[test]
fn trylock_fails_fast_on_held_mutex() {
    let (k, m) = shared(MutexKind::ErrorCheck, false);
    m.lock(&k).unwrap();

    let result = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let start = Instant::now();
            let r = m.trylock(&k);
            (r, start.elapsed())
        })
        .join()
        .unwrap()
    };
    assert_eq!(result.0, Err(LockError::Busy));
    assert!(result.1 < Duration::from_secs(1), "trylock took {:?}", result.1);
    m.unlock(&k).unwrap();
}

#[test]
fn timedlock_times_out_then_succeeds_with_later_deadline() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let timed_out = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let start = Instant::now();
            let r = m.timedlock(&k, start + Duration::from_millis(30));
            (r, start.elapsed())
        })
        .join()
        .unwrap()
    };
    assert_eq!(timed_out.0, Err(LockError::TimedOut));
    assert!(timed_out.1 >= Duration::from_millis(30));
    assert_eq!(m.waiters(), 0);
    assert_eq!(m.lock_count(), 1);

    let handle = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let r = m.timedlock(&k, Instant::now() + Duration::from_secs(10));
            if r.is_ok() {
                m.unlock(&k).unwrap();
            }
            r
        })
    };
    wait_for_waiters(&m, 1);
    m.unlock(&k).unwrap();
    assert_eq!(handle.join().unwrap(), Ok(()));
}

#[test]
fn interrupted_wait_is_not_surfaced() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let handle = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let r = m.lock(&k);
            m.unlock(&k).unwrap();
            r
        })
    };

    wait_for_waiters(&m, 1);
    assert_eq!(m.interrupt_waiters(), 1);
    // The waiter re-queues instead of returning.
    wait_for_waiters(&m, 1);
    assert!(!handle.is_finished());

    m.unlock(&k).unwrap();
    assert_eq!(handle.join().unwrap(), Ok(()));
}

#[test]
fn interrupted_timedlock_keeps_its_deadline() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let start = Instant::now();
    let deadline = start + Duration::from_millis(80);
    let handle = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || m.timedlock(&k, deadline))
    };
    wait_for_waiters(&m, 1);
    m.interrupt_waiters();

    assert_eq!(handle.join().unwrap(), Err(LockError::TimedOut));
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(80));
    assert!(elapsed < Duration::from_secs(5));
    m.unlock(&k).unwrap();
}

#[test]
fn waiters_acquire_in_priority_order() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let order = Arc::new(StdMutex::new(Vec::new()));
    let mut handles = Vec::new();
    for priority in [10u8, 200, 50, 200] {
        let (k2, m2, order2) = (Arc::clone(&k), Arc::clone(&m), Arc::clone(&order));
        let queued = m.waiters();
        handles.push(thread::spawn(move || {
            let me = k2.registry().register_current(priority);
            m2.lock(&k2).unwrap();
            order2.lock().unwrap().push((priority, me));
            m2.unlock(&k2).unwrap();
        }));
        wait_for_waiters(&m, queued + 1);
    }

    m.unlock(&k).unwrap();
    for h in handles {
        h.join().unwrap();
    }
    let order = order.lock().unwrap();
    let priorities: Vec<u8> = order.iter().map(|(p, _)| *p).collect();
    assert_eq!(priorities, vec![200, 200, 50, 10]);
    // Equal priorities keep arrival order.
    assert!(order[0].1 < order[1].1);
}

#[test]
fn owner_exit_reports_owner_died_to_next_locker() {
    let (k, m) = shared(MutexKind::ErrorCheck, true);

    let dead = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            k.registry().exit_current()
        })
        .join()
        .unwrap()
    };
    let dead = dead.expect("worker was registered");

    let start = Instant::now();
    assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
    assert!(start.elapsed() < Duration::from_secs(1));
    assert!(m.is_inconsistent());
    assert_eq!(m.owner(), Some(dead));

    m.make_consistent(&k).unwrap();
    assert_eq!(m.owner(), Some(dead));
    m.unlock(&k).unwrap();
    m.lock(&k).unwrap();
    assert_eq!(m.owner(), Some(k.current()));
    m.unlock(&k).unwrap();
}

#[test]
fn waiter_on_recovering_mutex_gets_it_after_release() {
    let (k, m) = shared(MutexKind::Normal, true);
    {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            k.registry().exit_current();
        })
        .join()
        .unwrap();
    }
    assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
    m.make_consistent(&k).unwrap();

    let handle = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            let owner = m.owner();
            m.unlock(&k).unwrap();
            owner == Some(k.current())
        })
    };
    wait_for_waiters(&m, 1);
    m.unlock(&k).unwrap();
    assert!(handle.join().unwrap());
}

#[test]
fn blocked_timedlock_sees_owner_killed() {
    let (k, m) = shared(MutexKind::Normal, true);
    let owner = k.current();
    m.lock(&k).unwrap();

    let handle = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let start = Instant::now();
            let r = m.timedlock(&k, start + Duration::from_secs(3));
            (r, start.elapsed())
        })
    };
    wait_for_waiters(&m, 1);
    assert!(k.registry().kill(owner));

    let (result, elapsed) = handle.join().unwrap();
    assert_eq!(result, Err(LockError::OwnerDied));
    assert!(elapsed < Duration::from_secs(2), "woke after {elapsed:?}");
    assert!(m.is_inconsistent());
    assert_eq!(m.owner(), Some(owner));
    assert_eq!(m.waiters(), 0);
}

#[test]
fn blocked_lock_sees_owner_exit() {
    let (k, m) = shared(MutexKind::ErrorCheck, true);
    let holding = Arc::new(Barrier::new(2));
    let leave = Arc::new(Barrier::new(2));

    let owner = {
        let (k, m, holding, leave) = (
            Arc::clone(&k),
            Arc::clone(&m),
            Arc::clone(&holding),
            Arc::clone(&leave),
        );
        thread::spawn(move || {
            m.lock(&k).unwrap();
            holding.wait();
            leave.wait();
            k.registry().exit_current()
        })
    };
    holding.wait();

    let waiter = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || m.lock(&k))
    };
    wait_for_waiters(&m, 1);
    leave.wait();

    let dead = owner.join().unwrap().expect("owner was registered");
    assert_eq!(waiter.join().unwrap(), Err(LockError::OwnerDied));
    assert_eq!(m.owner(), Some(dead));
}

#[test]
fn waiter_behind_dying_recoverer_gets_owner_died() {
    let (k, m) = shared(MutexKind::Normal, true);
    {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            k.registry().exit_current();
        })
        .join()
        .unwrap();
    }
    assert_eq!(m.lock(&k), Err(LockError::OwnerDied));
    m.make_consistent(&k).unwrap();
    let recoverer = k.current();

    let waiter = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            let r = m.lock(&k);
            (r, m.recovered_by())
        })
    };
    wait_for_waiters(&m, 1);
    assert!(k.registry().kill(recoverer));

    let (result, recovered_by) = waiter.join().unwrap();
    assert_eq!(result, Err(LockError::OwnerDied));
    assert_eq!(recovered_by, None);
    assert!(m.is_inconsistent());
}

#[test]
fn any_live_thread_may_repair_an_abandoned_mutex() {
    let (k, m) = shared(MutexKind::ErrorCheck, true);
    {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            k.registry().exit_current();
        })
        .join()
        .unwrap();
    }
    assert_eq!(m.trylock(&k), Err(LockError::OwnerDied));

    // This thread never saw OwnerDied itself.
    let repaired = {
        let (k, m) = (Arc::clone(&k), Arc::clone(&m));
        thread::spawn(move || {
            m.make_consistent(&k)?;
            let by = m.recovered_by();
            m.unlock(&k)?;
            Ok::<_, LockError>(by == Some(k.current()))
        })
        .join()
        .unwrap()
    };
    assert_eq!(repaired, Ok(true));
    assert!(m.snapshot().is_unlocked());
    m.lock(&k).unwrap();
    m.unlock(&k).unwrap();
}

#[test]
fn destroy_is_busy_while_a_waiter_is_pending() {
    let (k, m) = shared(MutexKind::Normal, false);
    m.lock(&k).unwrap();

    let release = Arc::new(Barrier::new(2));
    let handle = {
        let (k, m, release) = (Arc::clone(&k), Arc::clone(&m), Arc::clone(&release));
        thread::spawn(move || {
            m.lock(&k).unwrap();
            release.wait();
            m.unlock(&k).unwrap();
        })
    };
    wait_for_waiters(&m, 1);
    assert_eq!(m.destroy(&k), Err(LockError::Busy));
    m.unlock(&k).unwrap();
    // Handed off: either claimed or about to be.
    assert_eq!(m.destroy(&k), Err(LockError::Busy));
    release.wait();
    handle.join().unwrap();

    m.destroy(&k).unwrap();
    assert_eq!(m.lock(&k), Err(LockError::InvalidArgument));
}

#[test]
fn contended_increments_are_serialized() {
    const THREADS: usize = 6;
    const ROUNDS: u64 = 200;
    let (k, m) = shared(MutexKind::Recursive, true);
    let counter = Arc::new(AtomicU64::new(0));
    let start = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let (k, m, counter, start) = (
                Arc::clone(&k),
                Arc::clone(&m),
                Arc::clone(&counter),
                Arc::clone(&start),
            );
            thread::spawn(move || {
                start.wait();
                for _ in 0..ROUNDS {
                    m.lock(&k).unwrap();
                    m.lock(&k).unwrap();
                    let v = counter.load(Ordering::Relaxed);
                    thread::yield_now();
                    counter.store(v + 1, Ordering::Relaxed);
                    m.unlock(&k).unwrap();
                    m.unlock(&k).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(counter.load(Ordering::Relaxed), THREADS as u64 * ROUNDS);
    assert!(m.snapshot().is_unlocked());
}
