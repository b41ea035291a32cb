//! The loop over rounds and the run's conclusion.

use std::fmt;
use std::io::Write;

use crate::round::{RoundController, RoundOutcome, RoundReport};

/// Final verdict of a run. A later failure or timeout replaces an earlier
/// one; a success never clears either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conclusion {
    Success,
    Failure(String),
    TimedOut(String),
}

impl Conclusion {
    #[must_use]
    pub const fn status(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure(_) => "failure",
            Self::TimedOut(_) => "timeout",
        }
    }

    #[must_use]
    pub fn output(&self) -> &str {
        match self {
            Self::Success => "",
            Self::Failure(output) | Self::TimedOut(output) => output,
        }
    }

    /// Process exit code: 0 for success, 1 otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Failure(_) | Self::TimedOut(_) => 1,
        }
    }
}

impl fmt::Display for Conclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conclusion: {}", self.status())?;
        if !self.output().is_empty() {
            write!(f, "\n{}", self.output())?;
        }
        Ok(())
    }
}

/// Whether the loop goes on after a round.
fn report_round<W: Write>(
    out: &mut W,
    controller: &RoundController,
    report: &RoundReport,
    conclusion: &mut Conclusion,
) -> std::io::Result<bool> {
    let config = controller.config();
    let log_path = |out: &mut W| match &report.log_path {
        Some(path) => writeln!(out, "log path: {}", path.display()),
        None => Ok(()),
    };
    match &report.outcome {
        RoundOutcome::Success { rows } => {
            tracing::info!(round = report.ordinal, rows, "round passed");
            Ok(true)
        }
        RoundOutcome::Skipped(reason) => {
            tracing::warn!(round = report.ordinal, "round skipped: {reason}");
            Ok(true)
        }
        RoundOutcome::Failure(error) => {
            writeln!(out, "{error}")?;
            log_path(out)?;
            *conclusion = Conclusion::Failure(error.to_string());
            Ok(!config.failfast)
        }
        RoundOutcome::TimedOut => {
            writeln!(out, "round timeout after {:?}, dumping log...", config.timeout)?;
            log_path(out)?;
            *conclusion = Conclusion::TimedOut(format!("timed out after {:?}", config.timeout));
            Ok(config.continue_on_timeout)
        }
    }
}

/// Run rounds until the configured budget is spent (never, for a budget
/// of 0) or a round outcome stops the loop. Progress goes to `out`.
///
/// # Errors
///
/// Returns an error only if `out` cannot be written.
pub async fn run<W: Write>(controller: &RoundController, out: &mut W) -> std::io::Result<Conclusion> {
    let budget = controller.config().rounds;
    let mut conclusion = Conclusion::Success;
    let mut ordinal = 0;
    while budget == 0 || ordinal < budget {
        ordinal += 1;
        writeln!(out, "round: {ordinal}")?;
        let report = controller.run_round(ordinal).await;
        if !report_round(out, controller, &report, &mut conclusion)? {
            break;
        }
    }
    Ok(conclusion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RunConfig;
    use crate::store::{MemoryOptions, MemoryStore, StallPoint};
    use crate::time::SimulatedTimeSource;
    use std::sync::Arc;
    use std::time::Duration;

    fn controller(config: RunConfig, store: MemoryStore) -> RoundController {
        RoundController::new(
            config,
            Arc::new(store),
            None,
            Arc::new(SimulatedTimeSource::stepping(0, 1)),
        )
    }

    fn config(dir: &std::path::Path) -> RunConfig {
        RunConfig {
            dml_threads: 2,
            dml_count: 4,
            log_dir: dir.to_path_buf(),
            ..RunConfig::default()
        }
    }

    #[test]
    fn test_conclusion_rendering() {
        assert_eq!(Conclusion::Success.to_string(), "conclusion: success");
        assert_eq!(Conclusion::Success.exit_code(), 0);
        let failed = Conclusion::Failure("boom".to_string());
        assert_eq!(failed.to_string(), "conclusion: failure\nboom");
        assert_eq!(failed.exit_code(), 1);
        assert_eq!(Conclusion::TimedOut(String::new()).exit_code(), 1);
    }

    #[tokio::test]
    async fn test_bounded_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            rounds: 3,
            ..config(dir.path())
        };
        let mut out = Vec::new();
        let conclusion = run(&controller(config, MemoryStore::new()), &mut out)
            .await
            .unwrap();
        assert_eq!(conclusion, Conclusion::Success);
        let out = String::from_utf8(out).unwrap();
        assert_eq!(out, "round: 1\nround: 2\nround: 3\n");
    }

    #[tokio::test]
    async fn test_failfast_stops_at_first_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::with_options(MemoryOptions::new(0).with_refused_connections(1));
        let mut out = Vec::new();
        let conclusion = run(&controller(config(dir.path()), store), &mut out)
            .await
            .unwrap();
        assert!(matches!(conclusion, Conclusion::Failure(_)));
        let out = String::from_utf8(out).unwrap();
        assert!(out.starts_with("round: 1\n"));
        assert!(out.contains("log path: "));
        assert!(!out.contains("round: 2"));
    }

    #[tokio::test]
    async fn test_failure_survives_later_success() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunConfig {
            rounds: 2,
            failfast: false,
            ..config(dir.path())
        };
        let store = MemoryStore::with_options(MemoryOptions::new(0).with_refused_connections(1));
        let mut out = Vec::new();
        let conclusion = run(&controller(config, store), &mut out).await.unwrap();
        assert!(matches!(conclusion, Conclusion::Failure(_)));
        assert!(String::from_utf8(out).unwrap().contains("round: 2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_unless_configured() {
        let dir = tempfile::tempdir().unwrap();
        let stalled = || MemoryStore::with_options(MemoryOptions::new(0).with_stall(StallPoint::Commit));
        let base = RunConfig {
            timeout: Duration::from_secs(5),
            ..config(dir.path())
        };

        let mut out = Vec::new();
        let conclusion = run(&controller(base.clone(), stalled()), &mut out)
            .await
            .unwrap();
        assert!(matches!(conclusion, Conclusion::TimedOut(_)));
        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("round timeout after 5s, dumping log..."));
        assert!(!out.contains("round: 2"));

        let config = RunConfig {
            rounds: 2,
            continue_on_timeout: true,
            ..base
        };
        let mut out = Vec::new();
        run(&controller(config, stalled()), &mut out).await.unwrap();
        assert!(String::from_utf8(out).unwrap().contains("round: 2"));
    }
}
