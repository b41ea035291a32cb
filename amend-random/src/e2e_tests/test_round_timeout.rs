//! A worker stuck in its commit times the round out and leaves the log on
//! disk.

use std::time::Duration;

use crate::e2e_tests::helpers::{base_config, controller};
use crate::round::RoundOutcome;
use crate::store::{MemoryOptions, MemoryStore, StallPoint};

#[tokio::test(start_paused = true)]
async fn test_stalled_commit_times_out_and_flushes_log() {
    let dir = tempfile::tempdir().unwrap();
    let primary = MemoryStore::with_options(MemoryOptions::new(3).with_stall(StallPoint::Commit));
    let config = crate::config::RunConfig {
        timeout: Duration::from_secs(10),
        ..base_config(dir.path())
    };

    let report = controller(config, &primary, None).run_round(4).await;

    assert!(matches!(report.outcome, RoundOutcome::TimedOut));
    let path = report.log_path.unwrap();
    assert!(path.starts_with(dir.path()));
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("round-4-"));

    let artifact: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(artifact["round"], 4);
    let entries = artifact["threads"]["dml-0"].as_array().unwrap();
    let last = entries.last().unwrap();
    assert_eq!(last["statement"], "COMMIT");
    assert!(last["done_us"].is_null());
}
