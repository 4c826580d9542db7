//! Stepwise (operator-confirmed) generation.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::*;
use smartbatch::{
    JobEventKind, JobStatus, SmartBatchError, StepEdits, StepError, StepOutcome, TaskStatus,
};

fn people_dataset() -> smartbatch::Dataset {
    DatasetBuilder::new()
        .row(&[("name", text("Alice")), ("revenue", int(100))])
        .row(&[("name", text("Bob")), ("revenue", int(200))])
        .build()
}

#[test]
fn test_operator_edit_reaches_next_document() {
    let harness = TestHarness::new();
    let engine = harness.engine_with_renderer(Arc::new(FactEchoRenderer));
    let config = sales_config()
        .concurrency(8)
        .fact("lead", "$name")
        .build()
        .unwrap();

    let id = engine.start_stepwise(people_dataset(), &config).unwrap();
    let first = engine.start_step(&id).unwrap();
    assert_eq!(first.index(), 0);
    assert_eq!(first.status(), TaskStatus::Succeeded);
    assert_eq!(engine.job_status(&id).unwrap().status, JobStatus::Paused);

    let second = match engine
        .confirm_step(&id, Some(StepEdits::new().fact("lead", "Zed")))
        .unwrap()
    {
        StepOutcome::Task(task) => task,
        other => panic!("expected a task, got {:?}", other),
    };
    assert_eq!(second.index(), 1);

    let text = harness.read_document(&second.artifact().unwrap().location);
    assert!(text.contains("fact.lead=Zed"), "{}", text);

    match engine.confirm_step(&id, None).unwrap() {
        StepOutcome::JobComplete(snapshot) => {
            assert_eq!(snapshot.status, JobStatus::Completed);
            assert_eq!(snapshot.tasks.len(), 2);
        }
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_published_fact_visible_to_next_step_without_edits() {
    let harness = TestHarness::new();
    let engine = harness.engine_with_renderer(Arc::new(FactEchoRenderer));
    let config = sales_config().fact("lead", "$name").build().unwrap();

    let id = engine.start_stepwise(people_dataset(), &config).unwrap();
    let first = engine.start_step(&id).unwrap();
    let first_text = harness.read_document(&first.artifact().unwrap().location);
    assert!(!first_text.contains("fact.lead"), "{}", first_text);

    let StepOutcome::Task(second) = engine.confirm_step(&id, None).unwrap() else {
        panic!("expected a task");
    };
    let text = harness.read_document(&second.artifact().unwrap().location);
    assert!(text.contains("fact.lead=Alice"), "{}", text);
}

#[test]
fn test_one_document_in_flight_in_index_order() {
    let harness = TestHarness::new();
    let engine = harness.builder().event_capacity(1024).build();
    let mut rx = engine.subscribe();
    let config = sales_config()
        .concurrency(4)
        .rule(Arc::new(FailOnce { index: 1 }))
        .build()
        .unwrap();

    let id = engine.start_stepwise(sales_dataset(4), &config).unwrap();
    engine.start_step(&id).unwrap();
    loop {
        match engine.confirm_step(&id, None).unwrap() {
            StepOutcome::Task(_) => continue,
            StepOutcome::JobComplete(snapshot) => {
                assert_eq!(snapshot.status, JobStatus::Completed);
                assert_eq!(snapshot.tasks[1].attempts(), 2);
                break;
            }
        }
    }

    let mut statuses: BTreeMap<usize, TaskStatus> = BTreeMap::new();
    while let Ok(event) = rx.try_recv() {
        if let JobEventKind::TaskStatusChanged { index, status, .. } = event.kind {
            if status == TaskStatus::Running {
                let running = statuses
                    .values()
                    .filter(|s| **s == TaskStatus::Running)
                    .count();
                assert_eq!(running, 0, "document {} started while another ran", index);
                for earlier in 0..index {
                    assert!(
                        statuses.get(&earlier).is_some_and(|s| s.is_terminal()),
                        "document {} started before {} settled",
                        index,
                        earlier
                    );
                }
            }
            statuses.insert(index, status);
        }
    }
    assert_eq!(statuses.len(), 4);
}

#[test]
fn test_step_calls_out_of_order_are_rejected() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.start_stepwise(sales_dataset(1), &config).unwrap();
    assert!(engine.current_step(&id).unwrap().is_none());
    assert!(matches!(
        engine.confirm_step(&id, None),
        Err(SmartBatchError::Step(StepError::NotPaused {
            status: JobStatus::Created,
            ..
        }))
    ));

    engine.start_step(&id).unwrap();
    assert_eq!(engine.current_step(&id).unwrap().unwrap().index(), 0);
    assert!(matches!(
        engine.start_step(&id),
        Err(SmartBatchError::Step(StepError::AwaitingConfirmation { index: 0, .. }))
    ));

    // The job pauses after its last document as well.
    assert_eq!(engine.job_status(&id).unwrap().status, JobStatus::Paused);
    assert!(matches!(
        engine.confirm_step(&id, None).unwrap(),
        StepOutcome::JobComplete(_)
    ));
    assert!(engine.current_step(&id).unwrap().is_none());
    assert!(matches!(
        engine.confirm_step(&id, None),
        Err(SmartBatchError::Step(StepError::AlreadyFinished {
            status: JobStatus::Completed,
            ..
        }))
    ));
}

#[test]
fn test_step_calls_on_batch_job_are_rejected() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    assert!(matches!(
        engine.start_step(&id),
        Err(SmartBatchError::Step(StepError::NotStepwise(_)))
    ));
    engine.wait_for(&id).unwrap();
    assert!(matches!(
        engine.confirm_step(&id, None),
        Err(SmartBatchError::Step(StepError::NotStepwise(_)))
    ));
}

#[test]
fn test_cancel_while_paused_skips_the_rest() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.start_stepwise(sales_dataset(3), &config).unwrap();
    engine.start_step(&id).unwrap();
    let snapshot = engine.cancel(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::PartiallyCompleted);
    let statuses: Vec<TaskStatus> = snapshot.tasks.iter().map(|t| t.status()).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Succeeded, TaskStatus::Skipped, TaskStatus::Skipped]
    );
    assert!(matches!(
        engine.start_step(&id),
        Err(SmartBatchError::Step(StepError::AlreadyFinished { .. }))
    ));
}

#[test]
fn test_cancel_before_first_step_fails_job() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.start_stepwise(sales_dataset(2), &config).unwrap();
    let snapshot = engine.cancel(&id).unwrap();

    assert_eq!(snapshot.status, JobStatus::Failed);
    assert_eq!(snapshot.counts().skipped, 2);
}
