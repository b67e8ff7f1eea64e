// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Update handling: guards, account moves, parameter changes.

mod common;

use chrono::Utc;
use common::{
    RecordingLabels, TestContext, context, context_update, provision_request, trial_request,
};
use runtime_broker_core::BrokerError;
use runtime_broker_core::labels::LabelPropagationError;
use runtime_broker_core::model::{
    ErsContext, Instance, OidcConfig, Operation, OperationState, OperationType,
    UpdatingParameters,
};
use runtime_broker_core::orchestrator::{OrchestratorConfig, UpdateRequest};
use runtime_broker_core::plans::{Plan, PlanUpgrades};

fn moved_to(global_account_id: &str) -> ErsContext {
    ErsContext {
        global_account_id: global_account_id.into(),
        ..context()
    }
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

fn account_move_config() -> OrchestratorConfig {
    OrchestratorConfig {
        subaccount_movement_enabled: true,
        update_custom_resources_labels_on_account_move: true,
        ..Default::default()
    }
}

async fn instance(ctx: &TestContext, instance_id: &str) -> Instance {
    ctx.storage
        .instances
        .get_by_id(instance_id)
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_update_of_unknown_instance() {
    let ctx = TestContext::new();
    let err = ctx
        .orchestrator
        .update("missing", context_update(context()))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::InstanceNotFound { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_context_only_update_is_synchronous() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let response = ctx
        .orchestrator
        .update("inst-1", context_update(context()))
        .await
        .unwrap();

    assert!(!response.is_async);
    assert!(response.operation_id.is_none());
    assert!(ctx.updates.try_recv().is_err());
}

#[tokio::test]
async fn test_expired_instance_rejected_unless_allowed() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;
    let mut expired = instance(&ctx, "inst-1").await;
    expired.expired_at = Some(Utc::now());
    ctx.storage.instances.update(&expired).await.unwrap();

    let err = ctx
        .orchestrator
        .update("inst-1", rename("new-name"))
        .await
        .unwrap_err();
    assert_eq!(err, BrokerError::validation("cannot update an expired instance"));

    let mut ctx = TestContext::with_config(OrchestratorConfig {
        allow_update_expired_instance_with_context: true,
        ..Default::default()
    });
    ctx.provisioned("inst-1").await;
    let mut expired = instance(&ctx, "inst-1").await;
    expired.expired_at = Some(Utc::now());
    ctx.storage.instances.update(&expired).await.unwrap();

    // the context is stored but parameters of an expired instance stay put
    let response = ctx
        .orchestrator
        .update("inst-1", rename("new-name"))
        .await
        .unwrap();
    assert!(!response.is_async);
    assert!(ctx.updates.try_recv().is_err());
    assert_eq!(
        instance(&ctx, "inst-1").await.parameters.parameters.name,
        "my-cluster"
    );
}

#[tokio::test]
async fn test_failed_instance_cannot_be_updated() {
    let mut ctx = TestContext::new();
    let operation_id = ctx.provisioned("inst-1").await;
    ctx.finish(&operation_id, OperationState::Failed).await;

    let err = ctx
        .orchestrator
        .update("inst-1", rename("new-name"))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BrokerError::unprocessable("Unable to process an update of a failed instance")
    );
}

#[tokio::test]
async fn test_deprovisioned_instance_cannot_be_updated() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;
    ctx.orchestrator.deprovision("inst-1", true).await.unwrap();

    let err = ctx
        .orchestrator
        .update("inst-1", rename("new-name"))
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 422);
    assert_eq!(
        err.to_string(),
        "Unable to process an update of a deprovisioned instance"
    );
}

#[tokio::test]
async fn test_parameter_change_creates_update_operation() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some("renamed".into()),
            administrators: vec!["admin@example.com".into()],
            ..Default::default()
        }),
        ..context_update(context())
    };
    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();

    assert!(response.is_async);
    let operation_id = response.operation_id.unwrap();
    assert_eq!(ctx.updates.try_recv().unwrap(), operation_id);

    let op = ctx.operation(&operation_id).await;
    assert_eq!(op.operation_type, OperationType::Update);
    assert_eq!(op.state, OperationState::Pending);
    assert_eq!(
        op.provisioning_parameters.parameters.administrators,
        vec!["admin@example.com".to_string()]
    );

    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.parameters.parameters.name, "renamed");
    assert_eq!(stored.last_operation_id.as_deref(), Some(operation_id.as_str()));
}

#[tokio::test]
async fn test_empty_oidc_keeps_provisioned_config() {
    let ctx = TestContext::new();
    let oidc = OidcConfig {
        client_id: "c".into(),
        issuer_url: "https://issuer.example.com".into(),
        ..Default::default()
    };
    let mut request = provision_request();
    request.parameters.oidc = Some(oidc.clone());
    let provisioned = ctx.orchestrator.provision("inst-1", request).await.unwrap();
    ctx.finish(&provisioned.operation_id, OperationState::Succeeded)
        .await;

    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some("renamed".into()),
            oidc: Some(OidcConfig::default()),
            ..Default::default()
        }),
        ..context_update(context())
    };
    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();
    let op = ctx.operation(&response.operation_id.unwrap()).await;

    assert_eq!(op.provisioning_parameters.parameters.oidc, Some(oidc.clone()));
    assert_eq!(op.provisioning_parameters.parameters.name, "renamed");
    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.parameters.parameters.oidc, Some(oidc));
}

#[tokio::test]
async fn test_parameter_change_requires_async() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let mut request = rename("renamed");
    request.async_allowed = false;
    let err = ctx.orchestrator.update("inst-1", request).await.unwrap_err();
    assert_eq!(err, BrokerError::AsyncRequired);
}

#[tokio::test]
async fn test_trial_update_drops_machine_type() {
    let ctx = TestContext::new();
    let provisioned = ctx
        .orchestrator
        .provision("trial-1", trial_request("ga-1"))
        .await
        .unwrap();
    ctx.finish(&provisioned.operation_id, OperationState::Succeeded)
        .await;

    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            machine_type: Some("m6i.large".into()),
            administrators: vec!["admin@example.com".into()],
            ..Default::default()
        }),
        ..context_update(context())
    };
    let response = ctx.orchestrator.update("trial-1", request).await.unwrap();

    let op = ctx.operation(&response.operation_id.unwrap()).await;
    let params = op.updating_parameters.unwrap();
    assert!(params.machine_type.is_none());
    assert!(op.provisioning_parameters.parameters.machine_type.is_none());
}

#[tokio::test]
async fn test_plan_change_must_be_allowed() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let mut request = context_update(context());
    request.plan_id = Some(Plan::Azure.id().to_string());
    let err = ctx
        .orchestrator
        .update("inst-1", request.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Validation { .. }));
    assert!(err.to_string().starts_with("plan upgrade from aws"));
    assert!(err.to_string().ends_with("is not allowed"));

    let mut ctx = TestContext::with_config(OrchestratorConfig {
        plan_upgrades: PlanUpgrades::default().allow(Plan::Aws, Plan::Azure),
        ..Default::default()
    });
    ctx.provisioned("inst-1").await;

    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();
    let op = ctx.operation(&response.operation_id.unwrap()).await;
    assert_eq!(op.updated_plan_id.as_deref(), Some(Plan::Azure.id()));
    assert_eq!(op.provisioning_parameters.plan_id, Plan::Azure.id());

    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.service_plan_id, Plan::Azure.id());
    assert_eq!(stored.service_plan_name, "azure");
}

#[tokio::test]
async fn test_update_processing_disabled() {
    let mut ctx = TestContext::with_config(OrchestratorConfig {
        update_processing_enabled: false,
        ..Default::default()
    });
    ctx.provisioned("inst-1").await;

    let response = ctx
        .orchestrator
        .update("inst-1", rename("renamed"))
        .await
        .unwrap();
    assert!(!response.is_async);
    assert!(ctx.updates.try_recv().is_err());
    assert_eq!(
        instance(&ctx, "inst-1").await.parameters.parameters.name,
        "my-cluster"
    );
}

#[tokio::test]
async fn test_empty_update_answered_without_operation() {
    let mut ctx = TestContext::with_config(OrchestratorConfig {
        sync_empty_update_response_enabled: true,
        ..Default::default()
    });
    ctx.provisioned("inst-1").await;

    let empty = UpdateRequest {
        parameters: Some(UpdatingParameters::default()),
        ..context_update(context())
    };
    let response = ctx
        .orchestrator
        .update("inst-1", empty.clone())
        .await
        .unwrap();
    assert!(!response.is_async);
    assert!(ctx.updates.try_recv().is_err());

    let changed = ctx
        .orchestrator
        .update("inst-1", rename("renamed"))
        .await
        .unwrap();
    let pending = changed.operation_id.unwrap();
    assert_eq!(ctx.updates.try_recv().unwrap(), pending);

    // an empty update while the previous one runs reports that one
    let response = ctx.orchestrator.update("inst-1", empty.clone()).await.unwrap();
    assert!(response.is_async);
    assert_eq!(response.operation_id.as_deref(), Some(pending.as_str()));
    assert!(ctx.updates.try_recv().is_err());

    // after a failure the same request produces a fresh operation
    ctx.finish(&pending, OperationState::Failed).await;
    let response = ctx.orchestrator.update("inst-1", empty).await.unwrap();
    let retried = response.operation_id.unwrap();
    assert_ne!(retried, pending);
    assert_eq!(ctx.updates.try_recv().unwrap(), retried);
}

#[tokio::test]
async fn test_account_move_keeps_first_subscription_account() {
    let mut ctx = TestContext::with_config(account_move_config());
    ctx.provisioned("inst-1").await;

    let response = ctx
        .orchestrator
        .update("inst-1", context_update(moved_to("ga-2")))
        .await
        .unwrap();
    assert!(response.label_error.is_none());

    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.global_account_id, "ga-2");
    assert_eq!(stored.subscription_global_account_id, "ga-1");

    ctx.orchestrator
        .update("inst-1", context_update(moved_to("ga-3")))
        .await
        .unwrap();

    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.global_account_id, "ga-3");
    assert_eq!(stored.subscription_global_account_id, "ga-1");

    let calls = ctx.labels.calls.lock().unwrap().clone();
    let accounts: Vec<&str> = calls.iter().map(|(_, ga)| ga.as_str()).collect();
    assert_eq!(accounts, ["ga-2", "ga-3"]);
}

#[tokio::test]
async fn test_account_move_ignored_when_disabled() {
    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    ctx.orchestrator
        .update("inst-1", context_update(moved_to("ga-2")))
        .await
        .unwrap();

    let stored = instance(&ctx, "inst-1").await;
    assert_eq!(stored.global_account_id, "ga-1");
    assert!(stored.subscription_global_account_id.is_empty());
    assert!(ctx.labels.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_label_failure_is_reported_but_not_fatal() {
    let labels = RecordingLabels {
        failure: Some(LabelPropagationError::default()),
        ..Default::default()
    };
    let mut ctx = TestContext::build(account_move_config(), labels);
    ctx.provisioned("inst-1").await;

    let request = UpdateRequest {
        parameters: Some(UpdatingParameters {
            name: Some("renamed".into()),
            ..Default::default()
        }),
        ..context_update(moved_to("ga-2"))
    };
    let response = ctx.orchestrator.update("inst-1", request).await.unwrap();

    assert_eq!(response.label_error, Some(LabelPropagationError::default()));
    assert!(response.is_async, "parameter update still processed");
    assert!(ctx.updates.try_recv().is_ok());
    assert_eq!(instance(&ctx, "inst-1").await.global_account_id, "ga-2");
}

#[tokio::test]
async fn test_operator_credentials_force_update_operation() {
    use runtime_broker_core::model::ServiceManagerOperatorCredentials;

    let mut ctx = TestContext::new();
    ctx.provisioned("inst-1").await;

    let context = ErsContext {
        sm_operator_credentials: Some(ServiceManagerOperatorCredentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
            ..Default::default()
        }),
        ..context()
    };
    let response = ctx
        .orchestrator
        .update("inst-1", context_update(context))
        .await
        .unwrap();

    assert!(response.is_async);
    let op: Operation = ctx.operation(&response.operation_id.unwrap()).await;
    assert!(
        op.provisioning_parameters
            .ers_context
            .sm_operator_credentials
            .is_some()
    );
}
