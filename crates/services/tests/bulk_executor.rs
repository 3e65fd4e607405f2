//! Bulk executor semantics: ordering, stop-on-error, partial results
//! and exit-code mapping.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use trellis_services::services::bulk::{self, BulkOptions};

fn items(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("item-{i}")).collect()
}

/// Five items, one worker, stop on first error at the third item.
#[tokio::test]
async fn sequential_stops_at_first_failure() {
    let processed = Arc::new(Mutex::new(Vec::new()));
    let op = {
        let processed = processed.clone();
        move |item: String| {
            let processed = processed.clone();
            async move {
                processed.lock().unwrap().push(item.clone());
                if item == "c" {
                    anyhow::bail!("refused to process {item}");
                }
                Ok(())
            }
        }
    };

    let outcome = bulk::run(
        ["a", "b", "c", "d", "e"].map(String::from).to_vec(),
        &BulkOptions {
            jobs: 1,
            continue_on_error: false,
            ..Default::default()
        },
        op,
    )
    .await;

    assert_eq!(outcome.total, 5);
    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].item, "c");
    assert_eq!(outcome.exit_code(), 5);
    assert_eq!(*processed.lock().unwrap(), ["a", "b", "c"]);
}

#[tokio::test]
async fn sequential_continue_on_error_processes_everything() {
    let outcome = bulk::run(
        items(6),
        &BulkOptions {
            jobs: 1,
            continue_on_error: true,
            ..Default::default()
        },
        |item: String| async move {
            if item.ends_with('2') || item.ends_with('4') {
                anyhow::bail!("no");
            }
            Ok(())
        },
    )
    .await;

    assert_eq!(outcome.total, 6);
    assert_eq!(outcome.succeeded, 4);
    assert_eq!(outcome.failed, 2);
    assert_eq!(outcome.exit_code(), 5);
}

/// `ordered` forces input order even when jobs would allow a pool.
#[tokio::test]
async fn ordered_runs_in_input_order() {
    let processed = Arc::new(Mutex::new(Vec::new()));
    let op = {
        let processed = processed.clone();
        move |item: String| {
            let processed = processed.clone();
            async move {
                processed.lock().unwrap().push(item);
                Ok(())
            }
        }
    };

    let input = items(8);
    let outcome = bulk::run(
        input.clone(),
        &BulkOptions {
            jobs: 4,
            ordered: true,
            continue_on_error: true,
            ..Default::default()
        },
        op,
    )
    .await;

    assert_eq!(outcome.succeeded, 8);
    assert_eq!(*processed.lock().unwrap(), input);
}

#[tokio::test]
async fn parallel_continue_on_error_reaches_every_item() {
    let outcome = bulk::run(
        items(20),
        &BulkOptions {
            jobs: 4,
            continue_on_error: true,
            ..Default::default()
        },
        |item: String| async move {
            if item == "item-7" || item == "item-13" {
                anyhow::bail!("bad item");
            }
            Ok(())
        },
    )
    .await;

    assert_eq!(outcome.total, 20);
    assert_eq!(outcome.succeeded, 18);
    assert_eq!(outcome.failed, 2);
    let mut failed: Vec<_> = outcome.failures.iter().map(|f| f.item.clone()).collect();
    failed.sort();
    assert_eq!(failed, ["item-13", "item-7"]);
}

/// First failure raises the stop flag: in-flight items finish, the rest
/// of the queue is abandoned, and shutdown never deadlocks.
#[tokio::test]
async fn parallel_stop_on_first_error_leaves_work_undone() {
    let outcome = bulk::run(
        items(50),
        &BulkOptions {
            jobs: 2,
            batch_size: 4,
            continue_on_error: false,
            ..Default::default()
        },
        |item: String| async move {
            if item == "item-0" {
                anyhow::bail!("instant failure");
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
            Ok(())
        },
    )
    .await;

    assert_eq!(outcome.total, 50);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.failures[0].item, "item-0");
    assert!(
        outcome.succeeded + outcome.failed < outcome.total,
        "stop flag should abandon queued items, processed {}",
        outcome.succeeded + outcome.failed
    );
    assert_eq!(outcome.exit_code(), if outcome.succeeded == 0 { 1 } else { 5 });
}

#[tokio::test]
async fn zero_jobs_auto_detects_and_runs_everything() {
    let outcome = bulk::run(
        items(12),
        &BulkOptions {
            jobs: 0,
            continue_on_error: true,
            ..Default::default()
        },
        |_item: String| async move { Ok(()) },
    )
    .await;
    assert_eq!(outcome.succeeded, 12);
    assert_eq!(outcome.exit_code(), 0);
}

#[tokio::test]
async fn empty_input_is_a_clean_success() {
    let outcome = bulk::run(
        Vec::new(),
        &BulkOptions::default(),
        |_item: String| async move { Ok(()) },
    )
    .await;
    assert_eq!(outcome.total, 0);
    assert_eq!(outcome.exit_code(), 0);
}
