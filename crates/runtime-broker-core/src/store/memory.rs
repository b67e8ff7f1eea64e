// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! In-memory store backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::model::{Instance, InstanceArchived, Operation, OperationState, OperationType};

use super::{Instances, InstancesArchived, Operations};

#[derive(Default)]
struct State {
    instances: HashMap<String, Instance>,
    // insertion order doubles as the creation-order tiebreaker
    operations: Vec<Operation>,
    archived: HashMap<String, InstanceArchived>,
}

impl State {
    fn operations_of<'a>(&'a self, instance_id: &'a str) -> impl Iterator<Item = &'a Operation> {
        self.operations
            .iter()
            .filter(move |op| op.instance_id == instance_id)
    }

    fn latest<'a>(
        &'a self,
        instance_id: &'a str,
        keep: impl Fn(&Operation) -> bool,
    ) -> Option<Operation> {
        let mut ops: Vec<(usize, &Operation)> = self
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.instance_id == instance_id && keep(op))
            .collect();
        ops.sort_by_key(|(seq, op)| (op.created_at, *seq));
        ops.last().map(|(_, op)| (*op).clone())
    }
}

/// Store backend keeping everything in process memory.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Instances for MemoryStore {
    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.instances.contains_key(&instance.instance_id) {
            return Err(StoreError::Conflict {
                kind: "instance",
                id: instance.instance_id.clone(),
                reason: "already exists".to_string(),
            });
        }
        state
            .instances
            .insert(instance.instance_id.clone(), instance.clone());
        Ok(())
    }

    async fn update(&self, instance: &Instance) -> Result<Instance, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .instances
            .get_mut(&instance.instance_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "instance",
                id: instance.instance_id.clone(),
            })?;
        if stored.version != instance.version {
            return Err(StoreError::Conflict {
                kind: "instance",
                id: instance.instance_id.clone(),
                reason: format!(
                    "stale version {} (current {})",
                    instance.version, stored.version
                ),
            });
        }

        let last_operation_id = stored.last_operation_id.take();
        *stored = Instance {
            last_operation_id,
            updated_at: Utc::now(),
            version: instance.version + 1,
            ..instance.clone()
        };
        Ok(stored.clone())
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<Instance>, StoreError> {
        Ok(self.state.lock().await.instances.get(instance_id).cloned())
    }

    async fn update_last_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })?;
        stored.last_operation_id = Some(operation_id.to_string());
        Ok(())
    }

    async fn get_number_of_instances_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .instances
            .values()
            .filter(|i| {
                i.deleted_at.is_none()
                    && i.global_account_id == global_account_id
                    && i.service_plan_id == plan_id
            })
            .count())
    }

    async fn mark_deleted(&self, instance_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .instances
            .get_mut(instance_id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            })?;
        stored.deleted_at = Some(at);
        stored.version += 1;
        Ok(())
    }

    async fn list_deleted_not_archived(&self, limit: usize) -> Result<Vec<Instance>, StoreError> {
        let state = self.state.lock().await;
        let mut deleted: Vec<Instance> = state
            .instances
            .values()
            .filter(|i| i.deleted_at.is_some() && !state.archived.contains_key(&i.instance_id))
            .cloned()
            .collect();
        deleted.sort_by_key(|i| (i.deleted_at, i.instance_id.clone()));
        deleted.truncate(limit);
        Ok(deleted)
    }
}

#[async_trait]
impl Operations for MemoryStore {
    async fn insert_operation(&self, operation: &Operation) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.operations.iter().any(|op| op.id == operation.id) {
            return Err(StoreError::Conflict {
                kind: "operation",
                id: operation.id.clone(),
                reason: "already exists".to_string(),
            });
        }
        state.operations.push(operation.clone());
        Ok(())
    }

    async fn get_operation_by_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .operations
            .iter()
            .find(|op| op.id == operation_id)
            .cloned())
    }

    async fn update_operation(&self, operation: &Operation) -> Result<Operation, StoreError> {
        let mut state = self.state.lock().await;
        let stored = state
            .operations
            .iter_mut()
            .find(|op| op.id == operation.id)
            .ok_or_else(|| StoreError::NotFound {
                kind: "operation",
                id: operation.id.clone(),
            })?;
        if stored.version != operation.version {
            return Err(StoreError::Conflict {
                kind: "operation",
                id: operation.id.clone(),
                reason: format!(
                    "stale version {} (current {})",
                    operation.version, stored.version
                ),
            });
        }
        *stored = Operation {
            updated_at: Utc::now(),
            version: operation.version + 1,
            ..operation.clone()
        };
        Ok(stored.clone())
    }

    async fn get_provisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.latest(instance_id, |op| {
            op.operation_type == OperationType::Provision && op.state != OperationState::Canceled
        }))
    }

    async fn get_deprovisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.latest(instance_id, |op| {
            op.operation_type == OperationType::Deprovision
        }))
    }

    async fn get_last_operation(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.latest(instance_id, |op| {
            !matches!(op.state, OperationState::Pending | OperationState::Canceled)
        }))
    }

    async fn get_last_operation_with_all_states(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.latest(instance_id, |_| true))
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation>, StoreError> {
        let state = self.state.lock().await;
        let mut ops: Vec<(usize, Operation)> = state
            .operations_of(instance_id)
            .cloned()
            .enumerate()
            .collect();
        ops.sort_by_key(|(seq, op)| (op.created_at, *seq));
        Ok(ops.into_iter().map(|(_, op)| op).collect())
    }
}

#[async_trait]
impl InstancesArchived for MemoryStore {
    async fn insert(&self, archived: &InstanceArchived) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.archived.contains_key(&archived.instance_id) {
            return Err(StoreError::Conflict {
                kind: "archived instance",
                id: archived.instance_id.clone(),
                reason: "already archived".to_string(),
            });
        }
        state
            .archived
            .insert(archived.instance_id.clone(), archived.clone());
        Ok(())
    }

    async fn get_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceArchived>, StoreError> {
        Ok(self.state.lock().await.archived.get(instance_id).cloned())
    }

    async fn total_number_of_instances_archived_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .archived
            .values()
            .filter(|a| a.global_account_id == global_account_id && a.plan_id == plan_id)
            .count())
    }
}
