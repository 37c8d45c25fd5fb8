mod common;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use common::*;
use s3_to_warehouse::error::{ErrorCategory, LoaderError, RefreshStep};
use s3_to_warehouse::refresh::swap::SwapLoader;
use s3_to_warehouse::refresh::MaintenanceStatus;

fn loader(warehouse: &FakeWarehouse) -> SwapLoader {
    SwapLoader::new(Arc::new(warehouse.clone()), "public", Some('|'), true, true)
}

#[tokio::test]
async fn test_swaps_snapshot_into_existing_table() {
    let warehouse = FakeWarehouse::new().with_table("public", "schools", live_columns(), None);
    let queue = RecordingQueue::default();
    let loader = Arc::new(loader(&warehouse).with_maintenance(Arc::new(queue.clone())));

    let report = loader
        .refresh_snapshots(
            &bucket(),
            "2017/",
            vec!["schools".to_string()],
            1,
            &CancellationToken::new(),
        )
        .await;
    let outcomes = report.into_result().unwrap();

    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].table, "schools");
    assert_eq!(outcomes[0].maintenance, MaintenanceStatus::Enqueued);
    assert_eq!(queue.requests(), vec![("public".to_string(), "schools".to_string())]);

    let committed = warehouse.committed();
    assert_eq!(committed.len(), 5);
    assert!(committed[0].starts_with("CREATE TEMP TABLE \"tmp_schools_"));
    assert!(committed[0].ends_with("(LIKE \"public\".\"schools\")"));
    assert!(committed[1].contains("FROM 's3://metrics/2017/schools.txt.gz' WITH GZIP DELIMITER AS '|'"));
    assert_eq!(committed[2], "DELETE FROM \"public\".\"schools\"");
    assert!(committed[3].starts_with("INSERT INTO \"public\".\"schools\" SELECT * FROM \"tmp_schools_"));
    assert!(committed[4].starts_with("DROP TABLE \"tmp_schools_"));
}

#[tokio::test]
async fn test_swap_refuses_missing_table() {
    let warehouse = FakeWarehouse::new();
    let loader = Arc::new(loader(&warehouse));

    let report = loader
        .refresh_snapshots(
            &bucket(),
            "",
            vec!["districts".to_string()],
            1,
            &CancellationToken::new(),
        )
        .await;

    let (table, result) = &report.results[0];
    assert_eq!(table, "districts");
    let err = result.as_ref().unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Configuration);
    assert!(err.to_string().contains("public.districts does not exist"));
    assert_eq!(warehouse.begins(), 0);
}

#[tokio::test]
async fn test_failed_swap_keeps_old_rows_and_skips_vacuum() {
    let warehouse = FakeWarehouse::new()
        .with_table("public", "schools", live_columns(), None)
        .with_table("public", "districts", live_columns(), None)
        .fail_on("INSERT INTO \"public\".\"districts\"");
    let queue = RecordingQueue::default();
    let loader = Arc::new(loader(&warehouse).with_maintenance(Arc::new(queue.clone())));

    let report = loader
        .refresh_snapshots(
            &bucket(),
            "",
            vec!["schools".to_string(), "districts".to_string()],
            2,
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(report.failed_tables(), vec!["districts"]);
    match &report.results[1].1 {
        Err(LoaderError::Statement { step, .. }) => assert_eq!(*step, RefreshStep::Swap),
        other => panic!("unexpected result: {:?}", other),
    }

    assert_eq!(queue.requests(), vec![("public".to_string(), "schools".to_string())]);
    assert!(warehouse
        .committed()
        .iter()
        .all(|sql| !sql.contains("\"districts\"")));
    let rolled_back = warehouse.rolled_back();
    assert_eq!(rolled_back.len(), 1);
    assert_eq!(rolled_back[0].len(), 4);
}

#[tokio::test]
async fn test_swap_without_queue_reports_unconfigured() {
    let warehouse = FakeWarehouse::new().with_table("public", "schools", live_columns(), None);
    let loader = Arc::new(loader(&warehouse));

    let report = loader
        .refresh_snapshots(
            &bucket(),
            "",
            vec!["schools".to_string()],
            1,
            &CancellationToken::new(),
        )
        .await;

    let outcomes = report.into_result().unwrap();
    assert_eq!(outcomes[0].maintenance, MaintenanceStatus::Unconfigured);
}

#[tokio::test]
async fn test_cancelled_batch_reports_every_table() {
    let warehouse = FakeWarehouse::new().with_table("public", "schools", live_columns(), None);
    let loader = Arc::new(loader(&warehouse));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = loader
        .refresh_snapshots(
            &bucket(),
            "",
            vec!["schools".to_string(), "districts".to_string()],
            1,
            &cancel,
        )
        .await;

    assert_eq!(report.failed_tables(), vec!["schools", "districts"]);
    assert!(report
        .results
        .iter()
        .all(|(_, r)| matches!(r, Err(LoaderError::Cancelled(_)))));
    assert_eq!(warehouse.begins(), 0);
}
