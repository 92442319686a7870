//! CLI entrypoint for the rtmutex scenario harness.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rtmutex_harness::ScenarioRunner;
use rtmutex_harness::fixtures::load_fixtures;
use rtmutex_harness::matrix::matrix_report;
use rtmutex_harness::structured_log::{LogEmitter, validate_log_file};

/// Scenario tooling for rtmutex.
#[derive(Debug, Parser)]
#[command(name = "rtmutex-harness")]
#[command(about = "Scenario harness for the rtmutex mutex core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run scenario fixtures against a fresh kernel each.
    Run {
        /// Fixture JSON file, or a directory of them.
        #[arg(long)]
        fixture: PathBuf,
        /// Structured JSONL log output path.
        #[arg(long)]
        log: Option<PathBuf>,
        /// Run identifier used as the trace-id prefix.
        #[arg(long, default_value = "rtmutex")]
        run_id: String,
        /// Optional JSON report output path.
        #[arg(long)]
        report: Option<PathBuf>,
        /// Milliseconds a step expected to block must stay blocked.
        #[arg(long, default_value_t = 50)]
        block_window_ms: u64,
    },
    /// Emit the transition contract as JSON.
    Matrix {
        /// Output JSON path (if omitted, prints to stdout).
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Validate a structured JSONL log.
    ValidateLog {
        /// JSONL log path.
        #[arg(long)]
        log: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Command::Run {
            fixture,
            log,
            run_id,
            report,
            block_window_ms,
        } => {
            let fixtures = load_fixtures(&fixture)?;
            eprintln!(
                "Running {} scenario(s) from {}",
                fixtures.len(),
                fixture.display()
            );
            let runner = ScenarioRunner::new()
                .with_block_window(std::time::Duration::from_millis(block_window_ms));
            let mut emitter = match &log {
                Some(path) => Some(LogEmitter::to_file(path, &run_id)?),
                None => None,
            };

            let mut reports = Vec::with_capacity(fixtures.len());
            for loaded in &fixtures {
                let result = runner.run(loaded)?;
                if let Some(emitter) = emitter.as_mut() {
                    result.emit(emitter)?;
                }
                let status = if result.passed { "PASS" } else { "FAIL" };
                eprintln!("[{status}] {} ({} steps)", result.name, result.steps.len());
                for step in result.failures() {
                    eprintln!(
                        "    step {} [{}] {}: expected {}, got {}",
                        step.index,
                        step.thread,
                        step.op.name(),
                        step.expected,
                        step.actual
                    );
                }
                if !result.dangling.is_empty() {
                    eprintln!("    still blocked: {}", result.dangling.join(", "));
                }
                if !result.detached.is_empty() {
                    eprintln!("    left running: {}", result.detached.join(", "));
                }
                reports.push(result);
            }
            if let Some(emitter) = emitter.as_mut() {
                emitter.flush()?;
            }

            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&reports)?)?;
                eprintln!("Wrote report to {}", path.display());
            }

            let failed = reports.iter().filter(|r| !r.passed).count();
            eprintln!("{} passed, {failed} failed", reports.len() - failed);
            if failed > 0 {
                return Err(format!("{failed} scenario(s) failed").into());
            }
        }
        Command::Matrix { output } => {
            let report = matrix_report();
            let json = serde_json::to_string_pretty(&report)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)?;
                    eprintln!(
                        "Wrote {} contract rows to {}",
                        report.summary.rows,
                        path.display()
                    );
                }
                None => println!("{json}"),
            }
        }
        Command::ValidateLog { log } => {
            let (lines, errors) = validate_log_file(&log)?;
            for error in &errors {
                eprintln!("{error}");
            }
            if !errors.is_empty() {
                return Err(format!(
                    "{} validation error(s) in {lines} line(s) of {}",
                    errors.len(),
                    log.display()
                )
                .into());
            }
            eprintln!("{}: {lines} valid line(s)", log.display());
        }
    }

    Ok(())
}
