//! Process-wide kernel shared by every ABI handle.

use std::cell::Cell;
use std::sync::OnceLock;

use rtmutex_core::{HostKernel, ThreadId, host_kernel};

/// The kernel every `rtmutex_*` entry point runs on.
pub fn process_kernel() -> &'static HostKernel {
    static KERNEL: OnceLock<HostKernel> = OnceLock::new();
    KERNEL.get_or_init(host_kernel)
}

/// Marks the owning OS thread's kernel identity dead when the thread ends.
struct ExitHook {
    id: Cell<Option<ThreadId>>,
}

impl Drop for ExitHook {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            process_kernel().registry().kill(id);
        }
    }
}

thread_local! {
    static EXIT_HOOK: ExitHook = const { ExitHook { id: Cell::new(None) } };
}

/// Identify the calling thread, arming its exit hook.
pub(crate) fn enter() -> ThreadId {
    let id = process_kernel().current();
    // Fails only during thread teardown, when there is nothing left to arm.
    let _ = EXIT_HOOK.try_with(|hook| hook.id.set(Some(id)));
    id
}

/// Terminate the calling thread's kernel identity now.
pub(crate) fn exit_current() {
    let _ = EXIT_HOOK.try_with(|hook| hook.id.set(None));
    process_kernel().registry().exit_current();
}
