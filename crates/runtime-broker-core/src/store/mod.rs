// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Store contract and backends.
//!
//! Three capabilities are kept apart so callers depend only on what they use:
//! [`Instances`], [`Operations`] and [`InstancesArchived`]. Each backend
//! implements all three on one value; [`Storage`] bundles them behind trait
//! objects.
//!
//! Instance writes use optimistic concurrency: [`Instances::update`] succeeds
//! only when the caller's `version` matches the stored one and returns the
//! record with the bumped version. The `last_operation_id` pointer is written
//! through [`Instances::update_last_operation`] only, so a stale full update
//! never rewinds it.

pub mod memory;
pub mod sqlite;

pub use self::memory::MemoryStore;
pub use self::sqlite::SqliteStore;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::model::{Instance, InstanceArchived, Operation};

/// Instance records.
#[async_trait]
pub trait Instances: Send + Sync {
    /// Insert a new instance. An existing ID is a [`StoreError::Conflict`].
    async fn insert(&self, instance: &Instance) -> Result<(), StoreError>;

    /// Replace an instance if `instance.version` is current.
    ///
    /// Returns the stored record. A stale version is a
    /// [`StoreError::Conflict`]; a missing instance is
    /// [`StoreError::NotFound`].
    async fn update(&self, instance: &Instance) -> Result<Instance, StoreError>;

    /// Look an instance up, soft-deleted ones included.
    async fn get_by_id(&self, instance_id: &str) -> Result<Option<Instance>, StoreError>;

    /// Point the instance at its most recent operation.
    async fn update_last_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> Result<(), StoreError>;

    /// Count non-deleted instances of a global account on a plan.
    async fn get_number_of_instances_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError>;

    /// Soft-delete an instance once its deprovisioning finished.
    async fn mark_deleted(&self, instance_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Soft-deleted instances without an archived summary, oldest deletion first.
    async fn list_deleted_not_archived(&self, limit: usize) -> Result<Vec<Instance>, StoreError>;
}

/// Operation records.
#[async_trait]
pub trait Operations: Send + Sync {
    /// Insert an operation. An existing ID is a [`StoreError::Conflict`].
    async fn insert_operation(&self, operation: &Operation) -> Result<(), StoreError>;

    /// Look an operation up by ID.
    async fn get_operation_by_id(&self, operation_id: &str)
    -> Result<Option<Operation>, StoreError>;

    /// Replace an operation if `operation.version` is current; returns the stored record.
    async fn update_operation(&self, operation: &Operation) -> Result<Operation, StoreError>;

    /// Latest provisioning operation of an instance, canceled ones skipped.
    async fn get_provisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError>;

    /// Latest deprovisioning operation of an instance, temporary or not.
    async fn get_deprovisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError>;

    /// Latest operation that is neither pending nor canceled.
    async fn get_last_operation(&self, instance_id: &str)
    -> Result<Option<Operation>, StoreError>;

    /// Latest operation in any state.
    async fn get_last_operation_with_all_states(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError>;

    /// Every operation of an instance in creation order.
    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation>, StoreError>;
}

/// Archived instance summaries.
#[async_trait]
pub trait InstancesArchived: Send + Sync {
    /// Insert a summary. An existing instance ID is a [`StoreError::Conflict`].
    async fn insert(&self, archived: &InstanceArchived) -> Result<(), StoreError>;

    /// Look a summary up by instance ID.
    async fn get_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceArchived>, StoreError>;

    /// Count archived instances of a global account on a plan.
    async fn total_number_of_instances_archived_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError>;
}

/// The three store capabilities behind shared trait objects.
#[derive(Clone)]
pub struct Storage {
    /// Instance records.
    pub instances: Arc<dyn Instances>,
    /// Operation records.
    pub operations: Arc<dyn Operations>,
    /// Archived summaries.
    pub instances_archived: Arc<dyn InstancesArchived>,
}

impl Storage {
    /// Bundle one backend implementing every capability.
    pub fn from_backend<B>(backend: B) -> Self
    where
        B: Instances + Operations + InstancesArchived + 'static,
    {
        let backend = Arc::new(backend);
        Self {
            instances: backend.clone(),
            operations: backend.clone(),
            instances_archived: backend,
        }
    }

    /// In-memory storage.
    pub fn memory() -> Self {
        Self::from_backend(MemoryStore::new())
    }
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage").finish_non_exhaustive()
    }
}
