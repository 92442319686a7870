//! Fixture loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use rtmutex_core::{LockError, MutexAttr, MutexKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::HarnessError;

/// Operation a step performs on the scenario's mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOp {
    Lock,
    Trylock,
    Timedlock,
    Unlock,
    Consistent,
    Destroy,
    /// Terminate the thread's kernel identity.
    Exit,
    /// Collect the result of the thread's blocked call.
    Wait,
}

impl StepOp {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Trylock => "trylock",
            Self::Timedlock => "timedlock",
            Self::Unlock => "unlock",
            Self::Consistent => "consistent",
            Self::Destroy => "destroy",
            Self::Exit => "exit",
            Self::Wait => "wait",
        }
    }
}

/// Expected result of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Expected {
    Ok,
    /// The call must still be running after the block window.
    Blocks,
    Err(LockError),
}

impl Expected {
    /// Does a finished call's result satisfy this expectation?
    #[must_use]
    pub fn matches(self, result: Result<(), LockError>) -> bool {
        match (self, result) {
            (Self::Ok, Ok(())) => true,
            (Self::Err(want), Err(got)) => want == got,
            _ => false,
        }
    }

    #[must_use]
    pub fn describe(result: Result<(), LockError>) -> String {
        match result {
            Ok(()) => "ok".to_string(),
            Err(e) => e.name().to_string(),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Blocks => f.write_str("blocks"),
            Self::Err(e) => f.write_str(e.name()),
        }
    }
}

impl TryFrom<String> for Expected {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "ok" => Ok(Self::Ok),
            "blocks" => Ok(Self::Blocks),
            other => LockError::from_name(other)
                .map(Self::Err)
                .ok_or_else(|| format!("unknown expectation '{other}'")),
        }
    }
}

impl From<Expected> for String {
    fn from(value: Expected) -> Self {
        value.to_string()
    }
}

/// One step of a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Logical thread name; each distinct name gets its own OS thread.
    pub thread: String,
    pub op: StepOp,
    pub expect: Expected,
    /// Relative deadline for `timedlock`, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Scheduling priority the thread registers with before its first step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u8>,
}

/// Mutex attributes as written in a fixture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutexSpec {
    /// `normal`, `errorcheck` or `recursive`.
    pub kind: String,
    #[serde(default)]
    pub robust: bool,
}

impl MutexSpec {
    pub fn attr(&self) -> Result<MutexAttr, String> {
        let kind = MutexKind::from_name(&self.kind)
            .ok_or_else(|| format!("unknown mutex kind '{}'", self.kind))?;
        Ok(MutexAttr {
            kind,
            robust: self.robust,
        })
    }
}

/// A scenario: one mutex and an ordered list of steps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioFixture {
    /// Schema version.
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub mutex: MutexSpec,
    pub steps: Vec<Step>,
}

impl ScenarioFixture {
    /// Load a fixture from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Load and check a fixture file.
    pub fn from_file(path: &Path) -> Result<LoadedFixture, HarnessError> {
        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes);
        let fixture = Self::from_json(&text).map_err(|e| HarnessError::InvalidFixture {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        fixture
            .check()
            .map_err(|message| HarnessError::InvalidFixture {
                path: path.to_path_buf(),
                message,
            })?;
        Ok(LoadedFixture {
            path: path.to_path_buf(),
            sha256: sha256_hex(&bytes),
            fixture,
        })
    }

    /// Static checks that do not need to run the scenario.
    pub fn check(&self) -> Result<(), String> {
        self.mutex.attr()?;
        if self.steps.is_empty() {
            return Err("scenario has no steps".to_string());
        }
        for (i, step) in self.steps.iter().enumerate() {
            if step.thread.trim().is_empty() {
                return Err(format!("step {i}: empty thread name"));
            }
            let blocking_op = matches!(step.op, StepOp::Lock | StepOp::Timedlock);
            if step.expect == Expected::Blocks && !blocking_op {
                return Err(format!(
                    "step {i}: only lock and timedlock may be expected to block"
                ));
            }
            if step.op == StepOp::Wait && step.expect == Expected::Blocks {
                return Err(format!("step {i}: wait cannot expect blocks"));
            }
        }
        Ok(())
    }

    /// Logical thread names in order of first appearance.
    #[must_use]
    pub fn threads(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for step in &self.steps {
            if !names.contains(&step.thread.as_str()) {
                names.push(&step.thread);
            }
        }
        names
    }
}

/// A fixture plus where it came from.
#[derive(Debug, Clone)]
pub struct LoadedFixture {
    pub path: PathBuf,
    pub sha256: String,
    pub fixture: ScenarioFixture,
}

/// Load one fixture file, or every `*.json` file in a directory (sorted).
pub fn load_fixtures(path: &Path) -> Result<Vec<LoadedFixture>, HarnessError> {
    if path.is_file() {
        return Ok(vec![ScenarioFixture::from_file(path)?]);
    }
    let mut paths: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();
    if paths.is_empty() {
        return Err(HarnessError::NoFixtures(path.to_path_buf()));
    }
    paths.iter().map(|p| ScenarioFixture::from_file(p)).collect()
}

fn hex_lower(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(&mut out, "{b:02x}");
    }
    out
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex_lower(&Sha256::digest(bytes))
}
