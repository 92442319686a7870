//! Scenario execution engine.
//!
//! Every logical thread of a fixture gets its own OS thread, all sharing one
//! fresh kernel and one mutex. Steps are issued strictly in fixture order. A
//! step expected to block is left running; a later `wait` step on the same
//! thread collects its result. Calls still blocked when the script ends are
//! released by unlocking on behalf of the holder, so their threads can be
//! joined.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use rtmutex_core::{HostKernel, LockError, Mutex, ThreadId, host_kernel};
use serde::{Deserialize, Serialize};

use crate::error::HarnessError;
use crate::fixtures::{Expected, LoadedFixture, ScenarioFixture, Step, StepOp};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};

/// How long a step expected to block must stay blocked.
pub const DEFAULT_BLOCK_WINDOW: Duration = Duration::from_millis(50);
/// How long a step expected to finish may take.
pub const DEFAULT_COMPLETION_LIMIT: Duration = Duration::from_secs(2);
/// Relative `timedlock` deadline when a step names none.
pub const DEFAULT_TIMEDLOCK_MS: u64 = 100;
/// Unlocks issued on behalf of holders before blocked calls are given up on.
pub const MAX_RELEASE_ROUNDS: usize = 64;

struct Shared {
    kernel: HostKernel,
    mutex: Mutex,
}

/// A call a worker performs. `wait` never reaches a worker.
#[derive(Debug, Clone, Copy)]
enum Call {
    Lock,
    Trylock,
    Timedlock(Duration),
    Unlock,
    Consistent,
    Destroy,
    Exit,
}

impl Call {
    fn from_step(step: &Step) -> Option<Self> {
        let timeout = Duration::from_millis(step.timeout_ms.unwrap_or(DEFAULT_TIMEDLOCK_MS));
        Some(match step.op {
            StepOp::Lock => Self::Lock,
            StepOp::Trylock => Self::Trylock,
            StepOp::Timedlock => Self::Timedlock(timeout),
            StepOp::Unlock => Self::Unlock,
            StepOp::Consistent => Self::Consistent,
            StepOp::Destroy => Self::Destroy,
            StepOp::Exit => Self::Exit,
            StepOp::Wait => return None,
        })
    }

    fn perform(self, shared: &Shared) -> Result<(), LockError> {
        let (k, m) = (&shared.kernel, &shared.mutex);
        match self {
            Self::Lock => m.lock(k),
            Self::Trylock => m.trylock(k),
            Self::Timedlock(timeout) => m.timedlock(k, Instant::now() + timeout),
            Self::Unlock => m.unlock(k),
            Self::Consistent => m.make_consistent(k),
            Self::Destroy => m.destroy(k),
            Self::Exit => {
                k.registry().exit_current();
                Ok(())
            }
        }
    }
}

struct Reply {
    result: Result<(), LockError>,
    latency_ns: u64,
}

struct Worker {
    name: String,
    calls: Sender<Call>,
    replies: Receiver<Reply>,
    handle: JoinHandle<()>,
    /// Kernel id the worker made its latest call as.
    id: Arc<AtomicU32>,
    /// A call was issued and has not replied yet.
    pending: bool,
}

impl Worker {
    fn spawn(name: &str, shared: Arc<Shared>, priority: Option<u8>) -> Result<Self, HarnessError> {
        let (calls, call_rx) = mpsc::channel::<Call>();
        let (reply_tx, replies) = mpsc::channel();
        let (ready_tx, ready) = mpsc::channel();
        let id = Arc::new(AtomicU32::new(0));
        let worker_id = Arc::clone(&id);
        let handle = thread::Builder::new()
            .name(format!("scenario-{name}"))
            .spawn(move || {
                let me = match priority {
                    Some(priority) => shared.kernel.registry().register_current(priority),
                    None => shared.kernel.current(),
                };
                worker_id.store(me.raw(), Ordering::Release);
                if ready_tx.send(()).is_err() {
                    return;
                }
                for call in call_rx {
                    // An earlier `exit` leaves the next call under a new id.
                    worker_id.store(shared.kernel.current().raw(), Ordering::Release);
                    let start = Instant::now();
                    let result = call.perform(&shared);
                    let latency_ns = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
                    if reply_tx.send(Reply { result, latency_ns }).is_err() {
                        break;
                    }
                }
            })?;
        ready
            .recv()
            .map_err(|_| HarnessError::WorkerLost(name.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            calls,
            replies,
            handle,
            id,
            pending: false,
        })
    }

    fn id(&self) -> ThreadId {
        ThreadId::new(self.id.load(Ordering::Acquire))
    }

    fn issue(&mut self, call: Call) -> Result<(), HarnessError> {
        self.calls
            .send(call)
            .map_err(|_| HarnessError::WorkerLost(self.name.clone()))?;
        self.pending = true;
        Ok(())
    }

    /// Wait up to `limit` for the outstanding call. `None` if still running.
    fn collect(&mut self, limit: Duration) -> Result<Option<Reply>, HarnessError> {
        match self.replies.recv_timeout(limit) {
            Ok(reply) => {
                self.pending = false;
                Ok(Some(reply))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(HarnessError::WorkerLost(self.name.clone())),
        }
    }

    /// Stop the worker. A worker stuck in a call is detached.
    fn finish(self) {
        let Self {
            calls,
            handle,
            pending,
            ..
        } = self;
        drop(calls);
        if !pending {
            let _ = handle.join();
        }
    }
}

/// Result of one executed step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub thread: String,
    pub op: StepOp,
    pub expected: Expected,
    /// `ok`, an error name, or `blocks` if the call had not returned.
    pub actual: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ns: Option<u64>,
}

impl StepResult {
    fn new(index: usize, step: &Step, reply: Option<&Reply>) -> Self {
        let (actual, passed, latency_ns) = match reply {
            Some(reply) => (
                Expected::describe(reply.result),
                step.expect.matches(reply.result),
                Some(reply.latency_ns),
            ),
            None => (
                Expected::Blocks.to_string(),
                step.expect == Expected::Blocks,
                None,
            ),
        };
        Self {
            index,
            thread: step.thread.clone(),
            op: step.op,
            expected: step.expect,
            actual,
            passed,
            latency_ns,
        }
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        if self.passed {
            Outcome::Pass
        } else if self.actual == "blocks" {
            Outcome::Timeout
        } else {
            Outcome::Fail
        }
    }
}

/// Result of one scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    /// Threads whose last call was still blocked when the scenario ended.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dangling: Vec<String>,
    /// Dangling threads that could not be released and were left running.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detached: Vec<String>,
}

impl ScenarioReport {
    pub fn failures(&self) -> impl Iterator<Item = &StepResult> {
        self.steps.iter().filter(|s| !s.passed)
    }

    /// Write one JSONL record per step, bracketed by start and end records.
    pub fn emit<W: Write>(&self, emitter: &mut LogEmitter<W>) -> std::io::Result<()> {
        emitter.emit(&self.name, LogLevel::Info, "scenario_start")?;
        for step in &self.steps {
            let level = if step.passed {
                LogLevel::Info
            } else {
                LogLevel::Error
            };
            let mut entry = LogEntry::new("", level, "step")
                .with_scenario(&self.name)
                .with_step(&step.thread, step.op.name())
                .with_outcome(step.outcome())
                .with_details(serde_json::json!({
                    "index": step.index,
                    "expected": step.expected.to_string(),
                    "actual": step.actual,
                }));
            if let Some(err) = LockError::from_name(&step.actual) {
                entry = entry.with_errno(err.errno());
            }
            if let Some(ns) = step.latency_ns {
                entry = entry.with_latency_ns(ns);
            }
            emitter.emit_entry(entry)?;
        }
        let (level, outcome) = if self.passed {
            (LogLevel::Info, Outcome::Pass)
        } else {
            (LogLevel::Error, Outcome::Fail)
        };
        emitter.emit_entry(
            LogEntry::new("", level, "scenario_end")
                .with_scenario(&self.name)
                .with_outcome(outcome)
                .with_details(serde_json::json!({
                    "steps": self.steps.len(),
                    "failed": self.failures().count(),
                    "dangling": self.dangling,
                    "detached": self.detached,
                    "sha256": self.sha256,
                })),
        )
    }
}

/// Runs scenario fixtures against a fresh host kernel each.
#[derive(Debug, Clone)]
pub struct ScenarioRunner {
    block_window: Duration,
    completion_limit: Duration,
}

impl Default for ScenarioRunner {
    fn default() -> Self {
        Self {
            block_window: DEFAULT_BLOCK_WINDOW,
            completion_limit: DEFAULT_COMPLETION_LIMIT,
        }
    }
}

impl ScenarioRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_block_window(mut self, window: Duration) -> Self {
        self.block_window = window;
        self
    }

    #[must_use]
    pub fn with_completion_limit(mut self, limit: Duration) -> Self {
        self.completion_limit = limit;
        self
    }

    /// Run a loaded fixture, recording where it came from.
    pub fn run(&self, loaded: &LoadedFixture) -> Result<ScenarioReport, HarnessError> {
        let mut report = self.run_fixture(&loaded.fixture)?;
        report.path = Some(loaded.path.clone());
        report.sha256 = Some(loaded.sha256.clone());
        Ok(report)
    }

    /// Run a fixture. Malformed scripts are errors; unmet expectations are
    /// failed steps in the report.
    pub fn run_fixture(&self, fixture: &ScenarioFixture) -> Result<ScenarioReport, HarnessError> {
        let invalid = |message| HarnessError::InvalidFixture {
            path: PathBuf::from(&fixture.name),
            message,
        };
        fixture.check().map_err(invalid)?;
        let attr = fixture.mutex.attr().map_err(invalid)?;

        let shared = Arc::new(Shared {
            kernel: host_kernel(),
            mutex: Mutex::with_attr(attr),
        });
        let mut workers: HashMap<&str, Worker> = HashMap::new();
        for name in fixture.threads() {
            let priority = fixture
                .steps
                .iter()
                .filter(|s| s.thread == name)
                .find_map(|s| s.priority);
            workers.insert(name, Worker::spawn(name, Arc::clone(&shared), priority)?);
        }

        let outcome = self.drive(fixture, &mut workers);

        let mut dangling: Vec<String> = workers
            .values()
            .filter(|w| w.pending)
            .map(|w| w.name.clone())
            .collect();
        dangling.sort();
        let detached = self.release_blocked(&shared, &mut workers);
        for (_, worker) in workers {
            worker.finish();
        }

        let steps = outcome?;
        Ok(ScenarioReport {
            name: fixture.name.clone(),
            path: None,
            sha256: None,
            passed: dangling.is_empty() && steps.iter().all(|s| s.passed),
            steps,
            dangling,
            detached,
        })
    }

    /// Unlock on behalf of whichever live thread may release the mutex until
    /// no call is blocked. Returns the workers still blocked after that.
    fn release_blocked(&self, shared: &Shared, workers: &mut HashMap<&str, Worker>) -> Vec<String> {
        for _ in 0..MAX_RELEASE_ROUNDS {
            for worker in workers.values_mut().filter(|w| w.pending) {
                let _ = worker.collect(Duration::ZERO);
            }
            if workers.values().all(|w| !w.pending) {
                break;
            }

            let Some(holder) = releasing_thread(shared) else {
                // Free, or held by a dead owner nobody can release. Give a
                // granted or timing-out call one window to come back.
                let mut returned = false;
                for worker in workers.values_mut().filter(|w| w.pending) {
                    returned |= matches!(worker.collect(self.block_window), Ok(Some(_)));
                }
                if returned {
                    continue;
                }
                break;
            };
            let Some(worker) = workers.values_mut().find(|w| w.id() == holder) else {
                break;
            };
            // A woken waiter replies as soon as it has claimed the mutex.
            if worker.pending && !matches!(worker.collect(self.completion_limit), Ok(Some(_))) {
                break;
            }
            if worker.issue(Call::Unlock).is_err() {
                break;
            }
            match worker.collect(self.completion_limit) {
                Ok(Some(Reply { result: Ok(()), .. })) => {}
                _ => break,
            }
        }

        let mut detached: Vec<String> = workers
            .values()
            .filter(|w| w.pending)
            .map(|w| w.name.clone())
            .collect();
        detached.sort();
        detached
    }

    fn drive(
        &self,
        fixture: &ScenarioFixture,
        workers: &mut HashMap<&str, Worker>,
    ) -> Result<Vec<StepResult>, HarnessError> {
        let mut results = Vec::with_capacity(fixture.steps.len());
        for (index, step) in fixture.steps.iter().enumerate() {
            let worker = workers
                .get_mut(step.thread.as_str())
                .ok_or_else(|| HarnessError::WorkerLost(step.thread.clone()))?;
            let script = |message: String| HarnessError::Script {
                step: index,
                message,
            };

            let reply = match Call::from_step(step) {
                None => {
                    if !worker.pending {
                        return Err(script(format!(
                            "thread '{}' has no blocked call to wait for",
                            step.thread
                        )));
                    }
                    worker.collect(self.completion_limit)?
                }
                Some(call) => {
                    if worker.pending {
                        return Err(script(format!("thread '{}' is still blocked", step.thread)));
                    }
                    if let Call::Timedlock(timeout) = call
                        && step.expect == Expected::Blocks
                        && timeout <= self.block_window
                    {
                        return Err(script(format!(
                            "timedlock of {timeout:?} cannot outlast the {:?} block window",
                            self.block_window
                        )));
                    }
                    worker.issue(call)?;
                    let limit = if step.expect == Expected::Blocks {
                        self.block_window
                    } else {
                        self.completion_limit
                    };
                    worker.collect(limit)?
                }
            };
            results.push(StepResult::new(index, step, reply.as_ref()));
        }
        Ok(results)
    }
}

/// The live thread entitled to unlock the mutex, if any.
fn releasing_thread(shared: &Shared) -> Option<ThreadId> {
    let snapshot = shared.mutex.snapshot();
    let owner = snapshot.owner?;
    if shared.kernel.is_alive(owner) {
        return Some(owner);
    }
    snapshot
        .recovered_by
        .filter(|&recoverer| shared.kernel.is_alive(recoverer))
}
