//! A replica that disagrees with the primary fails the round.

use std::sync::Arc;
use std::time::Duration;

use crate::e2e_tests::helpers::{LossyReplica, base_config, controller, replicated};
use crate::oracle::CheckError;
use crate::round::{RoundError, RoundOutcome};

#[tokio::test(start_paused = true)]
async fn test_lost_row_on_replica_fails_round() {
    let dir = tempfile::tempdir().unwrap();
    let (primary, replica) = replicated(Duration::from_millis(50));

    let report = controller(
        base_config(dir.path()),
        &primary,
        Some(Arc::new(LossyReplica { inner: replica })),
    )
    .run_round(1)
    .await;

    let RoundOutcome::Failure(RoundError::Check(error)) = &report.outcome else {
        panic!("unexpected outcome {:?}", report.outcome);
    };
    assert_eq!(
        *error,
        CheckError::RowCountMismatch {
            primary: 5,
            replica: 4
        }
    );
    assert!(report.log_path.unwrap().exists());
}
