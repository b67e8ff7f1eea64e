// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! The orchestrator and archive worker against the SQLite store.

mod common;

use common::{RecordingLabels, TestContext, context, context_update, provision_request};
use runtime_broker_core::model::{ErsContext, OperationState, UpdatingParameters};
use runtime_broker_core::orchestrator::{OrchestratorConfig, UpdateRequest};
use runtime_broker_core::store::{SqliteStore, Storage};
use runtime_broker_core::{ArchiveWorker, ArchiveWorkerConfig};

async fn sqlite_context(dir: &tempfile::TempDir, config: OrchestratorConfig) -> TestContext {
    let store = SqliteStore::from_path(dir.path().join("broker.db"))
        .await
        .unwrap();
    TestContext::with_storage(
        Storage::from_backend(store),
        config,
        RecordingLabels::default(),
    )
}

#[tokio::test]
async fn test_full_lifecycle_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let config = OrchestratorConfig {
        subaccount_movement_enabled: true,
        ..Default::default()
    };
    let mut ctx = sqlite_context(&dir, config).await;

    let provisioning_id = ctx.provisioned("inst-1").await;
    let retry = ctx
        .orchestrator
        .provision("inst-1", provision_request())
        .await
        .unwrap();
    assert_eq!(retry.operation_id, provisioning_id);

    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some("renamed".into()),
            ..Default::default()
        }),
        ..context_update(ErsContext {
            global_account_id: "ga-2".into(),
            ..context()
        })
    };
    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();
    let update_id = response.operation_id.unwrap();
    assert_eq!(ctx.updates.try_recv().unwrap(), update_id);
    ctx.finish(&update_id, OperationState::Succeeded).await;

    let stored = ctx
        .storage
        .instances
        .get_by_id("inst-1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.global_account_id, "ga-2");
    assert_eq!(stored.subscription_global_account_id, "ga-1");
    assert_eq!(stored.parameters.parameters.name, "renamed");
    assert_eq!(stored.last_operation_id.as_deref(), Some(update_id.as_str()));

    let deprovisioning = ctx.orchestrator.deprovision("inst-1", true).await.unwrap();
    ctx.finish(&deprovisioning.operation_id, OperationState::Succeeded)
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
    assert_eq!(archived.global_account_id, "ga-2");
    assert_eq!(archived.subscription_global_account_id, "ga-1");
    assert_eq!(archived.provider, "AWS");
    assert!(archived.first_deprovisioning_started_at.is_some());
    assert_eq!(
        archived.first_deprovisioning_started_at,
        archived.real_deprovisioning_started_at
    );
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = sqlite_context(&dir, OrchestratorConfig::default()).await;
    let provisioning_id = ctx.provisioned("inst-1").await;
    drop(ctx);

    let ctx = sqlite_context(&dir, OrchestratorConfig::default()).await;
    let retry = ctx
        .orchestrator
        .provision("inst-1", provision_request())
        .await
        .unwrap();
    assert_eq!(retry.operation_id, provisioning_id);
}
