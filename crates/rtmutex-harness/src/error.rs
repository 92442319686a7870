use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("{path}: {message}")]
    InvalidFixture { path: PathBuf, message: String },
    #[error("no fixture JSON files found in {0}")]
    NoFixtures(PathBuf),
    #[error("step {step}: {message}")]
    Script { step: usize, message: String },
    #[error("worker thread for '{0}' stopped unexpectedly")]
    WorkerLost(String),
}
