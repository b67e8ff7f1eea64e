// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Updates racing concurrent instance writes.

mod common;

use std::time::Duration;

use common::{ConflictingInstances, RecordingLabels, TestContext, context, context_update};
use runtime_broker_core::BrokerError;
use runtime_broker_core::model::{ErsContext, OperationType, UpdatingParameters};
use runtime_broker_core::orchestrator::{OrchestratorConfig, UpdateRequest};
use runtime_broker_core::retry::RetryPolicy;
use runtime_broker_core::store::Storage;

fn conflicting_context(retry: RetryPolicy) -> (TestContext, std::sync::Arc<ConflictingInstances>) {
    let (storage, instances) = ConflictingInstances::wrap(&Storage::memory());
    let config = OrchestratorConfig {
        update_retry: retry,
        ..Default::default()
    };
    let ctx = TestContext::with_storage(storage, config, RecordingLabels::default());
    (ctx, instances)
}

fn rename(name: &str) -> UpdateRequest {
    UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some(name.into()),
            ..Default::default()
        }),
        ..context_update(context())
    }
}

#[tokio::test(start_paused = true)]
async fn test_parameter_write_retried_after_conflict() {
    let (mut ctx, instances) = conflicting_context(RetryPolicy::new(
        Duration::from_millis(100),
        Duration::from_secs(1),
    ));
    ctx.provisioned("inst-1").await;

    // the context write goes through, the parameter write conflicts twice
    instances.arm(1, 2);
    let started = tokio::time::Instant::now();
    let response = ctx.orchestrator.update("inst-1", rename("renamed")).await.unwrap();

    assert_eq!(instances.update_calls(), 4);
    assert_eq!(started.elapsed(), Duration::from_millis(200));
    let operation_id = response.operation_id.unwrap();
    assert_eq!(ctx.updates.try_recv().unwrap(), operation_id);

    let stored = ctx
        .storage
        .instances
        .get_by_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.parameters.parameters.name, "renamed");
    assert_eq!(stored.last_operation_id.as_deref(), Some(operation_id.as_str()));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_are_an_internal_error() {
    let (mut ctx, instances) = conflicting_context(RetryPolicy::new(
        Duration::from_millis(100),
        Duration::from_millis(300),
    ));
    let provisioning_id = ctx.provisioned("inst-1").await;

    instances.arm(1, usize::MAX);
    let err = ctx
        .orchestrator
        .update("inst-1", rename("renamed"))
        .await
        .unwrap_err();

    assert_eq!(err, BrokerError::internal("unable to update instance"));
    assert_eq!(err.status_code(), 500);
    // the context write plus one attempt and three retries
    assert_eq!(instances.update_calls(), 5);
    assert!(ctx.updates.try_recv().is_err());

    let stored = ctx
        .storage
        .instances
        .get_by_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.parameters.parameters.name, "my-cluster");
    assert_eq!(stored.last_operation_id.as_deref(), Some(provisioning_id.as_str()));
    let operations = ctx
        .storage
        .operations
        .list_operations_by_instance_id("inst-1")
        .await
        .unwrap();
    assert!(operations.iter().all(|op| op.operation_type == OperationType::Provision));
}

#[tokio::test]
async fn test_conflict_after_suspension_does_not_queue_update() {
    let (mut ctx, instances) = conflicting_context(RetryPolicy::default());
    ctx.provisioned("inst-1").await;

    instances.arm(0, 1);
    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some("renamed".into()),
            ..Default::default()
        }),
        ..context_update(ErsContext {
            active: Some(false),
            ..context()
        })
    };
    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();

    assert!(!response.is_async);
    assert_eq!(instances.update_calls(), 2);
    let suspension_id = ctx.deprovisioning.try_recv().unwrap();
    assert!(ctx.deprovisioning.try_recv().is_err(), "suspended only once");
    assert!(ctx.updates.try_recv().is_err(), "parameters ignored while suspending");
    assert!(ctx.operation(&suspension_id).await.temporary);

    let stored = ctx
        .storage
        .instances
        .get_by_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.parameters.parameters.name, "my-cluster");
}
