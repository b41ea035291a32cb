//! Schema changes land inside every worker's transaction window, whatever
//! the task counts and store latencies.

use std::time::Duration;

use proptest::prelude::*;

use crate::config::RunConfig;
use crate::ddl::DdlMode;
use crate::dml::DmlExecutor;
use crate::e2e_tests::helpers::{base_config, controller, entries_with_prefix};
use crate::round::RoundOutcome;
use crate::store::{BEGIN, COMMIT, MemoryOptions, MemoryStore};

fn run_round(config: RunConfig, latency_ms: u64, seed: u64) -> crate::round::RoundReport {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();
    runtime.block_on(async move {
        let mut options = MemoryOptions::new(seed);
        if latency_ms > 0 {
            options = options.with_latency(Duration::from_millis(latency_ms));
        }
        let primary = MemoryStore::with_options(options);
        controller(config, &primary, None).run_round(1).await
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_ddl_runs_between_begin_and_commit(
        mode_mask in proptest::collection::vec(any::<bool>(), DdlMode::ALL.len()),
        workers in 1usize..5,
        rows in 0u64..16,
        insert_update in any::<bool>(),
        latency_ms in 0u64..20,
        seed in any::<u64>(),
    ) {
        let dir = tempfile::tempdir().unwrap();
        let modes: Vec<DdlMode> = DdlMode::ALL
            .into_iter()
            .zip(&mode_mask)
            .filter_map(|(mode, on)| on.then_some(mode))
            .collect();
        let config = RunConfig {
            modes,
            ddl_count: 3,
            dml_threads: workers,
            dml_count: rows,
            batch: 2,
            executor: if insert_update {
                DmlExecutor::InsertUpdate
            } else {
                DmlExecutor::UpdateConflict
            },
            seed,
            ..base_config(dir.path())
        };

        let report = run_round(config, latency_ms, seed);
        prop_assert!(
            matches!(report.outcome, RoundOutcome::Success { .. }),
            "{:?}",
            report.outcome
        );

        let dml = entries_with_prefix(&report.log, "dml-");
        let ddl = entries_with_prefix(&report.log, "ddl-");
        let begins: Vec<_> = dml.iter().filter(|e| e.statement == BEGIN).collect();
        prop_assert_eq!(begins.len(), workers);

        let first_begin = begins.iter().map(|e| e.start_us).min().unwrap();
        let last_opened = begins.iter().filter_map(|e| e.done_us).max().unwrap();
        for entry in &ddl {
            prop_assert!(entry.start_us >= first_begin);
            prop_assert!(entry.start_us > last_opened, "{} before a BEGIN returned", entry.statement);
        }

        let last_ddl_done = ddl.iter().filter_map(|e| e.done_us).max();
        if let Some(last_ddl_done) = last_ddl_done {
            for commit in dml.iter().filter(|e| e.statement == COMMIT) {
                prop_assert!(commit.start_us > last_ddl_done);
            }
        }
    }
}
