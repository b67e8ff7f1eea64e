// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Suspension, deprovisioning, last-operation polling and archival of one
//! instance over its whole life.

mod common;

use common::{TestContext, context, context_update};
use runtime_broker_core::model::{ErsContext, OperationState, OperationType, UpdatingParameters};
use runtime_broker_core::orchestrator::{LastOperationState, UpdateRequest};
use runtime_broker_core::{ArchiveWorker, ArchiveWorkerConfig, BrokerError};

fn activity(active: bool) -> UpdateRequest {
    context_update(ErsContext {
        active: Some(active),
        ..context()
    })
}

#[tokio::test]
async fn test_suspend_and_resume_through_update() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let mut suspend = activity(false);
    suspend.parameters = Some(UpdatingParameters {
        name: Some("ignored".into()),
        ..Default::default()
    });
    let response = ctx.orchestrator.update("inst-1", suspend).await.unwrap();
    assert!(!response.is_async);
    assert!(ctx.updates.try_recv().is_err(), "parameters ignored while suspending");

    let suspension_id = ctx.deprovisioning.try_recv().unwrap();
    let suspension = ctx.operation(&suspension_id).await;
    assert_eq!(suspension.operation_type, OperationType::Deprovision);
    assert!(suspension.temporary);

    // repeating the request does not suspend twice
    ctx.orchestrator.update("inst-1", activity(false)).await.unwrap();
    assert!(ctx.deprovisioning.try_recv().is_err());
    ctx.finish(&suspension.id, OperationState::Succeeded).await;

    ctx.orchestrator.update("inst-1", activity(true)).await.unwrap();
    let unsuspension_id = ctx.provisioning.try_recv().unwrap();
    let unsuspension = ctx.operation(&unsuspension_id).await;
    assert_eq!(unsuspension.operation_type, OperationType::Provision);
    assert_eq!(unsuspension.state, OperationState::Pending);

    let stored = ctx
        .storage
        .instances
        .get_by_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.last_operation_id.as_deref(), Some(unsuspension.id.as_str()));
    assert_eq!(
        unsuspension.instance_details.shoot_name,
        stored.instance_details.shoot_name
    );
}

#[tokio::test]
async fn test_deprovision_is_idempotent_while_running() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let first = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    let second = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(ctx.deprovisioning.try_recv().unwrap(), first.operation_id);
    assert!(ctx.deprovisioning.try_recv().is_err());

    ctx.finish(&first.operation_id, OperationState::Failed).await;
    let retried = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    assert_ne!(retried.operation_id, first.operation_id);
    assert_eq!(ctx.deprovisioning.try_recv().unwrap(), retried.operation_id);
}

#[tokio::test]
async fn test_deprovision_of_removed_instance() {
    let mut ctx = TestContext::new();

    let err = ctx.orchestrator.deprovision("missing", true).await.unwrap_err();
    assert!(matches!(err, BrokerError::Gone { .. }));
    assert_eq!(err.status_code(), 410);

    ctx.provisioned("inst-1").await;
    let err = ctx.orchestrator.deprovision("inst-1", false).await.unwrap_err();
    assert_eq!(err, BrokerError::AsyncRequired);

    ctx.mark_deleted("inst-1").await.unwrap();
    let err = ctx.orchestrator.deprovision("inst-1", true).await.unwrap_err();
    assert!(matches!(err, BrokerError::Gone { .. }));
}

#[tokio::test]
async fn test_last_operation_states() {
    let ctx = TestContext::new();

    let err = ctx.orchestrator.last_operation("inst-1", None).await.unwrap_err();
    assert!(matches!(err, BrokerError::InstanceNotFound { .. }));

    let provisioned = ctx
        .orchestrator
        .provision("inst-1", common::provision_request())
        .await
        .unwrap();
    let response = ctx.orchestrator.last_operation("inst-1", None).await.unwrap();
    assert_eq!(response.state, LastOperationState::InProgress);

    let mut op = ctx.operation(&provisioned.operation_id).await;
    op.state = OperationState::Succeeded;
    op.description = "Operation succeeded".into();
    ctx.storage.operations.update_operation(&op).await.unwrap();

    let response = ctx
        .orchestrator
        .last_operation("inst-1", Some(&provisioned.operation_id))
        .await
        .unwrap();
    assert_eq!(response.state, LastOperationState::Succeeded);
    assert_eq!(response.description, "Operation succeeded");

    // a pending deprovisioning is not "last" until the executor starts it
    let deprovisioning = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    let response = ctx.orchestrator.last_operation("inst-1", None).await.unwrap();
    assert_eq!(response.state, LastOperationState::Succeeded);
    let response = ctx
        .orchestrator
        .last_operation("inst-1", Some(&deprovisioning.operation_id))
        .await
        .unwrap();
    assert_eq!(response.state, LastOperationState::InProgress);

    let err = ctx
        .orchestrator
        .last_operation("other-instance", Some(&deprovisioning.operation_id))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::OperationNotFound { .. }));
}

#[tokio::test]
async fn test_archive_after_suspension_and_deprovisioning() {
    let mut ctx = TestContext::new();
    let provisioning_id = ctx.provisioned("inst-1").await;

    ctx.orchestrator.update("inst-1", activity(false)).await.unwrap();
    let suspension_id = ctx.deprovisioning.try_recv().unwrap();
    let suspension = ctx.finish(&suspension_id, OperationState::Succeeded).await;

    let deprovisioning = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    let deprovisioning = ctx
        .finish(&deprovisioning.operation_id, OperationState::Succeeded)
        .await;
    ctx.mark_deleted("inst-1").await.unwrap();

    let worker = ArchiveWorker::new(ctx.storage.clone(), ArchiveWorkerConfig::default());
    assert_eq!(worker.sweep().await.unwrap(), 1);
    assert_eq!(worker.sweep().await.unwrap(), 0);

    let archived = ctx
        .storage
        .instances_archived
        .get_by_instance_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    let provisioning = ctx.operation(&provisioning_id).await;

    assert_eq!(archived.global_account_id, "ga-1");
    assert_eq!(archived.subaccount_id, "sa-1");
    assert_eq!(archived.plan_name, "aws");
    assert_eq!(archived.subaccount_region, "cf-eu10");
    assert!(!archived.internal_user);
    assert_eq!(archived.provisioning_state, OperationState::Succeeded);
    assert_eq!(archived.provisioning_started_at, provisioning.created_at);
    assert_eq!(
        archived.first_deprovisioning_started_at,
        Some(suspension.created_at)
    );
    assert_eq!(
        archived.real_deprovisioning_started_at,
        Some(deprovisioning.created_at)
    );
    assert_eq!(
        archived.last_deprovisioning_finished_at,
        deprovisioning.updated_at
    );
}
