//! Artifact resolution and download through the engine.

mod common;

use std::sync::Arc;

use common::*;
use smartbatch::storage::checksum;
use smartbatch::{
    Caller, GenerationId, JobStatus, OwnerOnly, ResolveError, SmartBatchError, StorageError,
    TaskStatus,
};

#[test]
fn test_download_returns_stored_bytes() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    engine.wait_for(&id).unwrap();

    let handle = engine.resolve(&Caller::anonymous(), &id, 1).unwrap();
    assert_eq!(handle.generation_id, id);
    assert_eq!(handle.index, 1);
    assert_eq!(handle.content_type, "text/plain");

    let bytes = engine.download_document(&Caller::anonymous(), &id, 1).unwrap();
    assert_eq!(bytes.len() as u64, handle.size);
    assert_eq!(checksum(&bytes), handle.checksum);
    assert!(String::from_utf8(bytes).unwrap().contains("Region: region-1"));
}

#[test]
fn test_unknown_job_and_index_are_not_found() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();
    let caller = Caller::anonymous();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    engine.wait_for(&id).unwrap();

    assert!(matches!(
        engine.resolve(&caller, &id, 2),
        Err(SmartBatchError::Resolve(ResolveError::NotFound {
            index: Some(2),
            ..
        }))
    ));
    assert!(matches!(
        engine.resolve(&caller, &GenerationId::new(), 0),
        Err(SmartBatchError::Resolve(ResolveError::NotFound { index: None, .. }))
    ));
}

#[test]
fn test_pending_and_failed_documents_are_not_ready() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config()
        .max_retries(0)
        .rule(Arc::new(AlwaysFail { indices: vec![0] }))
        .build()
        .unwrap();
    let caller = Caller::anonymous();

    let id = engine.start_stepwise(sales_dataset(3), &config).unwrap();
    assert!(matches!(
        engine.resolve(&caller, &id, 0),
        Err(SmartBatchError::Resolve(ResolveError::NotReady {
            status: TaskStatus::Pending,
            ..
        }))
    ));

    engine.start_step(&id).unwrap();
    assert!(matches!(
        engine.resolve(&caller, &id, 0),
        Err(SmartBatchError::Resolve(ResolveError::NotReady {
            status: TaskStatus::Failed,
            ..
        }))
    ));

    engine.confirm_step(&id, None).unwrap();
    assert!(engine.resolve(&caller, &id, 1).is_ok());
    assert!(matches!(
        engine.resolve(&caller, &id, 2),
        Err(SmartBatchError::Resolve(ResolveError::NotReady { .. }))
    ));
}

#[test]
fn test_owner_only_authorization() {
    let harness = TestHarness::new();
    let engine = harness.engine_with_authorizer(Arc::new(OwnerOnly));
    let config = sales_config().build().unwrap();

    let id = engine
        .submit_batch_as("alice", sales_dataset(1), &config)
        .unwrap();
    engine.wait_for(&id).unwrap();

    assert!(engine
        .download_document(&Caller::user("alice"), &id, 0)
        .is_ok());
    assert!(matches!(
        engine.download_document(&Caller::user("mallory"), &id, 0),
        Err(SmartBatchError::Resolve(ResolveError::Forbidden { .. }))
    ));
    assert!(matches!(
        engine.resolve(&Caller::anonymous(), &id, 0),
        Err(SmartBatchError::Resolve(ResolveError::Forbidden { .. }))
    ));
}

#[test]
fn test_tampered_artifact_fails_checksum() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(1), &config).unwrap();
    let snapshot = engine.wait_for(&id).unwrap();
    let location = snapshot.tasks[0].artifact().unwrap().location.clone();
    std::fs::write(harness.output_dir.join(&location), "tampered").unwrap();

    assert!(matches!(
        engine.download_document(&Caller::anonymous(), &id, 0),
        Err(SmartBatchError::Storage(StorageError::ChecksumMismatch { .. }))
    ));
}

#[test]
fn test_purge_removes_job_and_artifacts() {
    let harness = TestHarness::new();
    let engine = harness.engine_with_db();
    let config = sales_config().build().unwrap();

    let id = engine.submit_batch(sales_dataset(2), &config).unwrap();
    assert_eq!(engine.wait_for(&id).unwrap().status, JobStatus::Completed);
    assert!(harness.job_dir(&id).exists());

    assert!(engine.purge(&id).unwrap());
    assert!(!harness.job_dir(&id).exists());
    assert!(matches!(
        engine.job_status(&id),
        Err(SmartBatchError::UnknownJob(_))
    ));
    assert!(matches!(
        engine.resolve(&Caller::anonymous(), &id, 0),
        Err(SmartBatchError::Resolve(ResolveError::NotFound { .. }))
    ));
    assert!(!engine.purge(&id).unwrap());
}

#[test]
fn test_purge_refuses_active_job() {
    let harness = TestHarness::new();
    let engine = harness.engine();
    let config = sales_config().build().unwrap();

    let id = engine.start_stepwise(sales_dataset(2), &config).unwrap();
    engine.start_step(&id).unwrap();

    assert!(!engine.purge(&id).unwrap());
    assert_eq!(engine.job_status(&id).unwrap().status, JobStatus::Paused);
}
