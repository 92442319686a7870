//! Machine-readable export of the mutex transition contract.
//!
//! One row per (kind, robustness, reachable state, operation), in the order
//! [`MutexKind::ALL`] x robust/non-robust x [`ContractState::ALL`] x
//! [`ContractOp::ALL`].

use std::collections::BTreeMap;

use rtmutex_core::MutexKind;
use rtmutex_core::contract::{ContractOp, ContractState, transition};
use serde::{Deserialize, Serialize};

/// One cell of the contract table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixRow {
    pub kind: String,
    pub robust: bool,
    pub state: String,
    pub op: String,
    pub next: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub errno: i32,
    pub blocks: bool,
}

/// Row counts grouped by result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixSummary {
    pub rows: usize,
    pub ok: usize,
    pub blocking: usize,
    /// Error name -> row count.
    pub errors: BTreeMap<String, usize>,
}

/// Full contract matrix plus its summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatrixReport {
    pub summary: MatrixSummary,
    pub rows: Vec<MatrixRow>,
}

/// Enumerate every reachable transition.
#[must_use]
pub fn contract_matrix() -> Vec<MatrixRow> {
    let mut rows = Vec::new();
    for kind in MutexKind::ALL {
        for robust in [false, true] {
            for state in ContractState::ALL {
                if !state.is_reachable(robust) {
                    continue;
                }
                for op in ContractOp::ALL {
                    let outcome = transition(kind, robust, state, op);
                    rows.push(MatrixRow {
                        kind: kind.name().to_string(),
                        robust,
                        state: state.name().to_string(),
                        op: op.name().to_string(),
                        next: outcome.next.name().to_string(),
                        error: outcome.error.map(|e| e.name().to_string()),
                        errno: outcome.errno(),
                        blocks: outcome.blocks,
                    });
                }
            }
        }
    }
    rows
}

/// Build the matrix and summarize it.
#[must_use]
pub fn matrix_report() -> MatrixReport {
    let rows = contract_matrix();
    let mut summary = MatrixSummary {
        rows: rows.len(),
        ..MatrixSummary::default()
    };
    for row in &rows {
        match (&row.error, row.blocks) {
            (Some(e), _) => *summary.errors.entry(e.clone()).or_default() += 1,
            (None, true) => summary.blocking += 1,
            (None, false) => summary.ok += 1,
        }
    }
    MatrixReport { summary, rows }
}
