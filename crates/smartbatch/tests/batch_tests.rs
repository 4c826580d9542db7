//! Batch-mode generation through the engine.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::*;
use smartbatch::coherence::{AggregateMatchRule, TerminologyRule};
use smartbatch::config::{AggregateFunction, TermDefinition};
use smartbatch::{
    BatchProcessingConfig, JobEventKind, JobStatus, SmartBatchError, TaskStatus,
    TemplateBinding, ValidationError,
};

#[test]
fn test_every_record_becomes_one_document() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(5), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.tasks.len(), 5);
    for (i, task) in snapshot.tasks.iter().enumerate() {
        assert_eq!(task.index(), i);
        assert_eq!(task.status(), TaskStatus::Succeeded);
        assert_eq!(task.attempts(), 1);
    }

    let third = harness.document_text(&snapshot, 2);
    assert!(third.contains("Report 3 of 5"));
    assert!(third.contains("Region: region-2"));
    assert!(third.contains("Revenue: 300"));
    assert!(snapshot.started_at.is_some());
    assert!(snapshot.completed_at.is_some());
}

#[test]
fn test_retry_recovers_from_one_coherence_violation() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config()
        .concurrency(2)
        .max_retries(1)
        .rule(Arc::new(FailOnce { index: 1 }))
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(3), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    let attempts: Vec<u32> = snapshot.tasks.iter().map(|t| t.attempts()).collect();
    assert_eq!(attempts, vec![1, 2, 1]);
    assert!(snapshot.tasks[1].error().is_none());
}

#[test]
fn test_exhausted_retries_end_partially_completed() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config()
        .max_retries(0)
        .rule(Arc::new(AlwaysFail { indices: vec![2] }))
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(3), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::PartiallyCompleted);
    let counts = snapshot.counts();
    assert_eq!(counts.succeeded, 2);
    assert_eq!(counts.failed, 1);

    let failed = &snapshot.tasks[2];
    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.attempts(), 1);
    let error = failed.error().unwrap();
    assert_eq!(error.kind, "coherence_violation");
    assert!(error.retryable);
    assert!(failed.artifact().is_none());
    assert!(!harness
        .job_dir(&id)
        .join("document-0002.txt")
        .exists());
}

#[test]
fn test_all_documents_failing_fails_the_job() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config()
        .max_retries(2)
        .rule(Arc::new(AlwaysFail {
            indices: vec![0, 1],
        }))
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert!(snapshot.tasks.iter().all(|t| t.attempts() == 3));
}

#[test]
fn test_unresolved_record_placeholder_is_not_retried() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = BatchProcessingConfig::builder(TemplateBinding::new("bad", "Hello $missing"))
        .max_retries(3)
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    for task in &snapshot.tasks {
        assert_eq!(task.attempts(), 1);
        assert!(!task.error().unwrap().retryable);
    }
}

#[test]
fn test_in_flight_documents_never_exceed_concurrency() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let gauge = ConcurrencyGauge::new(Duration::from_millis(30));
    let config = sales_config()
        .concurrency(2)
        .rule(gauge.clone())
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(8), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    assert!(gauge.max_seen() <= 2, "saw {} in flight", gauge.max_seen());
    assert!(gauge.max_seen() >= 1);
}

#[test]
fn test_coherence_rules_run_against_context() {
    let harness = TestHarness::new();
    let engine = harness.engine();

    let mut terminology = BTreeMap::new();
    terminology.insert(
        "customer".to_string(),
        TermDefinition {
            canonical: "client".to_string(),
            variants: vec!["customer".to_string(), "buyer".to_string()],
        },
    );
    let template = TemplateBinding::new(
        "summary",
        "Our customer in $region.\nGroup total: $agg.total\n",
    );
    let config = BatchProcessingConfig::builder(template)
        .term(
            "customer",
            terminology["customer"].clone(),
        )
        .aggregate("total", "revenue", AggregateFunction::Sum)
        .rule(Arc::new(TerminologyRule::new(&terminology).unwrap()))
        .rule(Arc::new(
            AggregateMatchRule::new("total", "Group total:", 0.0).unwrap(),
        ))
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(3), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Completed);
    let text = harness.document_text(&snapshot, 0);
    assert!(text.contains("Our client in region-0."), "{}", text);
    assert!(text.contains("Group total: 600"), "{}", text);
}

#[test]
fn test_invalid_dataset_creates_no_job() {
    let harness = TestHarness::new();
    let engine = harness.engine_with_db();
    let config = sales_config().build().unwrap();

    let err = engine
        .submit_batch(DatasetBuilder::new().build(), &config)
        .unwrap_err();
    assert!(matches!(
        err,
        SmartBatchError::Validation(ValidationError::Empty)
    ));

    let mismatched = DatasetBuilder::new()
        .row(&[("region", text("a")), ("revenue", int(1))])
        .row(&[("region", text("b"))])
        .build();
    assert!(matches!(
        engine.submit_batch(mismatched, &config),
        Err(SmartBatchError::Validation(
            ValidationError::ColumnSetMismatch { row: 1, .. }
        ))
    ));

    let page = engine.list_jobs(&Default::default()).unwrap();
    assert_eq!(page.total, 0);
}

#[test]
fn test_unknown_aggregate_column_fails_before_job() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config()
        .aggregate("total", "profit", AggregateFunction::Sum)
        .build()
        .unwrap();

    assert!(matches!(
        engine.submit_batch(sales_dataset(2), &config),
        Err(SmartBatchError::Validation(_))
    ));
    assert!(engine.incomplete_jobs().unwrap().is_empty());
}

#[test]
fn test_events_follow_job_lifecycle() {
    let harness = TestHarness::new();
    let engine = harness.builder().event_capacity(1024).build();
    let mut rx = engine.subscribe();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(3), &config).unwrap();
    engine.wait_for(&id).unwrap();

    let mut job_statuses = Vec::new();
    let mut succeeded = Vec::new();
    while let Ok(event) = rx.try_recv() {
        assert_eq!(event.generation_id, id);
        match event.kind {
            JobEventKind::JobStatusChanged { status } => job_statuses.push(status),
            JobEventKind::TaskStatusChanged {
                index,
                status: TaskStatus::Succeeded,
                ..
            } => succeeded.push(index),
            JobEventKind::TaskStatusChanged { .. } => {}
        }
    }

    assert_eq!(
        job_statuses,
        vec![JobStatus::Created, JobStatus::Running, JobStatus::Completed]
    );
    succeeded.sort_unstable();
    assert_eq!(succeeded, vec![0, 1, 2]);
}

#[test]
fn test_cancel_skips_pending_documents() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let gauge = ConcurrencyGauge::new(Duration::from_millis(100));
    let config = sales_config()
        .concurrency(1)
        .rule(gauge)
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(6), &config).unwrap();
    engine.cancel(&id).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert!(snapshot.is_terminal());
    let counts = snapshot.counts();
    assert_eq!(counts.pending + counts.running, 0);
    assert!(counts.skipped >= 4, "{:?}", counts);
    assert!(snapshot
        .tasks
        .iter()
        .filter(|t| t.status() == TaskStatus::Skipped)
        .all(|t| t.attempts() == 0));
}

#[test]
fn test_job_timeout_stops_dispatching() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let gauge = ConcurrencyGauge::new(Duration::from_millis(80));
    let config = sales_config()
        .concurrency(1)
        .rule(gauge)
        .job_timeout(Duration::from_millis(100))
        .build()
        .unwrap();

    let id = engine.submit_batch(sales_dataset(6), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::PartiallyCompleted);
    let counts = snapshot.counts();
    assert!(counts.succeeded >= 1);
    assert!(counts.skipped >= 1);
    assert_eq!(counts.succeeded + counts.skipped + counts.failed, 6);
}

#[test]
fn test_jobs_survive_engine_restart() {
    let harness = TestHarness::new();
    let config = sales_config().build().unwrap();

    let id = {
        let engine = harness.engine_with_db();
        let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
        engine.wait_for(&id).unwrap();
        id
    };

    let engine = harness.engine_with_db();
    let snapshot = engine.job_status(&id).unwrap();
    assert_eq!(snapshot.status, JobStatus::Completed);
    assert_eq!(snapshot.tasks.len(), 2);
    assert!(snapshot.tasks.iter().all(|t| t.artifact().is_some()));

    let page = engine.list_jobs(&Default::default()).unwrap();
    assert_eq!(page.total, 1);
    assert!(engine.incomplete_jobs().unwrap().is_empty());
}

#[test]
fn test_submit_as_records_owner() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine
        .submit_batch_as("alice", sales_dataset(1), &config)
        .unwrap();
    let snapshot = engine.wait_for(&id).unwrap();
    assert_eq!(snapshot.owner.as_deref(), Some("alice"));
}
