//! SQLite-backed store implementation.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;

use crate::error::StoreError;
use crate::model::{Instance, InstanceArchived, Operation};

use super::{Instances, InstancesArchived, Operations};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/sqlite");

const INSTANCE_COLUMNS: &str = r#"
    instance_id, runtime_id, global_account_id, subscription_global_account_id,
    sub_account_id, service_id, service_name, service_plan_id, service_plan_name,
    dashboard_url, provisioning_parameters, provider_region, provider,
    instance_details, last_operation_id, created_at, updated_at, expired_at,
    deleted_at, version
"#;

const OPERATION_COLUMNS: &str = r#"
    id, instance_id, type, state, description, temporary, created_at, updated_at,
    version, provisioning_parameters, instance_details, global_account_id, region,
    dashboard_url, updating_parameters, updated_plan_id
"#;

/// Instance row as stored.
#[derive(Debug, sqlx::FromRow)]
struct InstanceRow {
    instance_id: String,
    runtime_id: String,
    global_account_id: String,
    subscription_global_account_id: String,
    sub_account_id: String,
    service_id: String,
    service_name: String,
    service_plan_id: String,
    service_plan_name: String,
    dashboard_url: String,
    provisioning_parameters: String,
    provider_region: String,
    provider: String,
    instance_details: String,
    last_operation_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    expired_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
    version: i64,
}

impl TryFrom<InstanceRow> for Instance {
    type Error = StoreError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(Instance {
            instance_id: row.instance_id,
            runtime_id: row.runtime_id,
            global_account_id: row.global_account_id,
            subscription_global_account_id: row.subscription_global_account_id,
            sub_account_id: row.sub_account_id,
            service_id: row.service_id,
            service_name: row.service_name,
            service_plan_id: row.service_plan_id,
            service_plan_name: row.service_plan_name,
            dashboard_url: row.dashboard_url,
            parameters: serde_json::from_str(&row.provisioning_parameters)?,
            provider_region: row.provider_region,
            provider: row.provider.parse().unwrap_or_default(),
            instance_details: serde_json::from_str(&row.instance_details)?,
            last_operation_id: row.last_operation_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
            expired_at: row.expired_at,
            deleted_at: row.deleted_at,
            version: row.version,
        })
    }
}

/// Operation row as stored.
#[derive(Debug, sqlx::FromRow)]
struct OperationRow {
    id: String,
    instance_id: String,
    #[sqlx(rename = "type")]
    operation_type: String,
    state: String,
    description: String,
    temporary: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: i64,
    provisioning_parameters: String,
    instance_details: String,
    global_account_id: String,
    region: String,
    dashboard_url: String,
    updating_parameters: Option<String>,
    updated_plan_id: Option<String>,
}

fn decode_error(details: String) -> StoreError {
    StoreError::Database {
        operation: "decode".to_string(),
        details,
    }
}

impl TryFrom<OperationRow> for Operation {
    type Error = StoreError;

    fn try_from(row: OperationRow) -> Result<Self, Self::Error> {
        let updating_parameters = row
            .updating_parameters
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        Ok(Operation {
            id: row.id,
            instance_id: row.instance_id,
            operation_type: row.operation_type.parse().map_err(decode_error)?,
            state: row.state.parse().map_err(decode_error)?,
            description: row.description,
            temporary: row.temporary,
            created_at: row.created_at,
            updated_at: row.updated_at,
            version: row.version,
            provisioning_parameters: serde_json::from_str(&row.provisioning_parameters)?,
            instance_details: serde_json::from_str(&row.instance_details)?,
            global_account_id: row.global_account_id,
            region: row.region,
            dashboard_url: row.dashboard_url,
            updating_parameters,
            updated_plan_id: row.updated_plan_id,
        })
    }
}

/// Archived summary row as stored.
#[derive(Debug, sqlx::FromRow)]
struct ArchivedRow {
    instance_id: String,
    global_account_id: String,
    subaccount_id: String,
    subscription_global_account_id: String,
    plan_id: String,
    plan_name: String,
    subaccount_region: String,
    region: String,
    provider: String,
    last_runtime_id: String,
    internal_user: bool,
    shoot_name: String,
    provisioning_started_at: DateTime<Utc>,
    provisioning_finished_at: DateTime<Utc>,
    provisioning_state: String,
    first_deprovisioning_started_at: Option<DateTime<Utc>>,
    first_deprovisioning_finished_at: Option<DateTime<Utc>>,
    real_deprovisioning_started_at: Option<DateTime<Utc>>,
    real_deprovisioning_finished_at: Option<DateTime<Utc>>,
    last_deprovisioning_finished_at: DateTime<Utc>,
}

impl TryFrom<ArchivedRow> for InstanceArchived {
    type Error = StoreError;

    fn try_from(row: ArchivedRow) -> Result<Self, Self::Error> {
        Ok(InstanceArchived {
            instance_id: row.instance_id,
            global_account_id: row.global_account_id,
            subaccount_id: row.subaccount_id,
            subscription_global_account_id: row.subscription_global_account_id,
            plan_id: row.plan_id,
            plan_name: row.plan_name,
            subaccount_region: row.subaccount_region,
            region: row.region,
            provider: row.provider,
            last_runtime_id: row.last_runtime_id,
            internal_user: row.internal_user,
            shoot_name: row.shoot_name,
            provisioning_started_at: row.provisioning_started_at,
            provisioning_finished_at: row.provisioning_finished_at,
            provisioning_state: row.provisioning_state.parse().map_err(decode_error)?,
            first_deprovisioning_started_at: row.first_deprovisioning_started_at,
            first_deprovisioning_finished_at: row.first_deprovisioning_finished_at,
            real_deprovisioning_started_at: row.real_deprovisioning_started_at,
            real_deprovisioning_finished_at: row.real_deprovisioning_finished_at,
            last_deprovisioning_finished_at: row.last_deprovisioning_finished_at,
        })
    }
}

/// Map a unique-key violation on insert to a conflict.
fn insert_error(err: sqlx::Error, kind: &'static str, id: &str) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict {
            kind,
            id: id.to_string(),
            reason: "already exists".to_string(),
        },
        _ => err.into(),
    }
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store from an existing, migrated pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (or create) a database file and run migrations.
    ///
    /// Parent directories are created as needed.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Database {
                operation: "create_dir".to_string(),
                details: format!("Failed to create directory {:?}: {}", parent, e),
            })?;
        }

        let url = format!("sqlite:{}?mode=rwc", path.to_string_lossy());
        Self::connect(&url).await
    }

    /// Connect to a database URL and run migrations.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StoreError::Database {
                operation: "connect".to_string(),
                details: format!("Failed to connect to SQLite at {}: {}", url, e),
            })?;

        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    /// Run the embedded migrations against `pool`.
    pub async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        MIGRATOR.run(pool).await?;
        Ok(())
    }

    async fn instance_version(&self, instance_id: &str) -> Result<Option<i64>, StoreError> {
        let row: Option<(i64,)> = sqlx::query_as("SELECT version FROM instances WHERE instance_id = ?")
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn fetch_operation(
        &self,
        filter: &str,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let query = format!(
            "SELECT {} FROM operations WHERE instance_id = ? {} ORDER BY created_at DESC, seq DESC LIMIT 1",
            OPERATION_COLUMNS, filter
        );
        let row = sqlx::query_as::<_, OperationRow>(&query)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Operation::try_from).transpose()
    }
}

#[async_trait]
impl Instances for SqliteStore {
    async fn insert(&self, instance: &Instance) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances (
                instance_id, runtime_id, global_account_id, subscription_global_account_id,
                sub_account_id, service_id, service_name, service_plan_id, service_plan_name,
                dashboard_url, provisioning_parameters, provider_region, provider,
                instance_details, last_operation_id, created_at, updated_at, expired_at,
                deleted_at, version
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&instance.instance_id)
        .bind(&instance.runtime_id)
        .bind(&instance.global_account_id)
        .bind(&instance.subscription_global_account_id)
        .bind(&instance.sub_account_id)
        .bind(&instance.service_id)
        .bind(&instance.service_name)
        .bind(&instance.service_plan_id)
        .bind(&instance.service_plan_name)
        .bind(&instance.dashboard_url)
        .bind(serde_json::to_string(&instance.parameters)?)
        .bind(&instance.provider_region)
        .bind(instance.provider.as_str())
        .bind(serde_json::to_string(&instance.instance_details)?)
        .bind(&instance.last_operation_id)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .bind(instance.expired_at)
        .bind(instance.deleted_at)
        .bind(instance.version)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "instance", &instance.instance_id))?;

        Ok(())
    }

    async fn update(&self, instance: &Instance) -> Result<Instance, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET runtime_id = ?, global_account_id = ?, subscription_global_account_id = ?,
                sub_account_id = ?, service_id = ?, service_name = ?, service_plan_id = ?,
                service_plan_name = ?, dashboard_url = ?, provisioning_parameters = ?,
                provider_region = ?, provider = ?, instance_details = ?,
                updated_at = ?, expired_at = ?, deleted_at = ?, version = version + 1
            WHERE instance_id = ? AND version = ?
            "#,
        )
        .bind(&instance.runtime_id)
        .bind(&instance.global_account_id)
        .bind(&instance.subscription_global_account_id)
        .bind(&instance.sub_account_id)
        .bind(&instance.service_id)
        .bind(&instance.service_name)
        .bind(&instance.service_plan_id)
        .bind(&instance.service_plan_name)
        .bind(&instance.dashboard_url)
        .bind(serde_json::to_string(&instance.parameters)?)
        .bind(&instance.provider_region)
        .bind(instance.provider.as_str())
        .bind(serde_json::to_string(&instance.instance_details)?)
        .bind(Utc::now())
        .bind(instance.expired_at)
        .bind(instance.deleted_at)
        .bind(&instance.instance_id)
        .bind(instance.version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(match self.instance_version(&instance.instance_id).await? {
                None => StoreError::NotFound {
                    kind: "instance",
                    id: instance.instance_id.clone(),
                },
                Some(current) => StoreError::Conflict {
                    kind: "instance",
                    id: instance.instance_id.clone(),
                    reason: format!("stale version {} (current {})", instance.version, current),
                },
            });
        }

        self.get_by_id(&instance.instance_id)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: "instance",
                id: instance.instance_id.clone(),
            })
    }

    async fn get_by_id(&self, instance_id: &str) -> Result<Option<Instance>, StoreError> {
        let query = format!("SELECT {} FROM instances WHERE instance_id = ?", INSTANCE_COLUMNS);
        let row = sqlx::query_as::<_, InstanceRow>(&query)
            .bind(instance_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Instance::try_from).transpose()
    }

    async fn update_last_operation(
        &self,
        instance_id: &str,
        operation_id: &str,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET last_operation_id = ?
            WHERE instance_id = ?
            "#,
        )
        .bind(operation_id)
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn get_number_of_instances_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM instances
            WHERE global_account_id = ? AND service_plan_id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(global_account_id)
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }

    async fn mark_deleted(&self, instance_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE instances
            SET deleted_at = ?, updated_at = ?, version = version + 1
            WHERE instance_id = ?
            "#,
        )
        .bind(at)
        .bind(Utc::now())
        .bind(instance_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: "instance",
                id: instance_id.to_string(),
            });
        }
        Ok(())
    }

    async fn list_deleted_not_archived(&self, limit: usize) -> Result<Vec<Instance>, StoreError> {
        let query = format!(
            r#"
            SELECT {} FROM instances
            WHERE deleted_at IS NOT NULL
              AND instance_id NOT IN (SELECT instance_id FROM instances_archived)
            ORDER BY deleted_at ASC, instance_id ASC
            LIMIT ?
            "#,
            INSTANCE_COLUMNS
        );
        let rows = sqlx::query_as::<_, InstanceRow>(&query)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Instance::try_from).collect()
    }
}

#[async_trait]
impl Operations for SqliteStore {
    async fn insert_operation(&self, operation: &Operation) -> Result<(), StoreError> {
        let updating_parameters = operation
            .updating_parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO operations (
                id, instance_id, type, state, description, temporary, created_at,
                updated_at, version, provisioning_parameters, instance_details,
                global_account_id, region, dashboard_url, updating_parameters, updated_plan_id
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.instance_id)
        .bind(operation.operation_type.as_str())
        .bind(operation.state.as_str())
        .bind(&operation.description)
        .bind(operation.temporary)
        .bind(operation.created_at)
        .bind(operation.updated_at)
        .bind(operation.version)
        .bind(serde_json::to_string(&operation.provisioning_parameters)?)
        .bind(serde_json::to_string(&operation.instance_details)?)
        .bind(&operation.global_account_id)
        .bind(&operation.region)
        .bind(&operation.dashboard_url)
        .bind(updating_parameters)
        .bind(&operation.updated_plan_id)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "operation", &operation.id))?;

        Ok(())
    }

    async fn get_operation_by_id(
        &self,
        operation_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        let query = format!("SELECT {} FROM operations WHERE id = ?", OPERATION_COLUMNS);
        let row = sqlx::query_as::<_, OperationRow>(&query)
            .bind(operation_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Operation::try_from).transpose()
    }

    async fn update_operation(&self, operation: &Operation) -> Result<Operation, StoreError> {
        let updating_parameters = operation
            .updating_parameters
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE operations
            SET state = ?, description = ?, temporary = ?, updated_at = ?,
                provisioning_parameters = ?, instance_details = ?, global_account_id = ?,
                region = ?, dashboard_url = ?, updating_parameters = ?, updated_plan_id = ?,
                version = version + 1
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(operation.state.as_str())
        .bind(&operation.description)
        .bind(operation.temporary)
        .bind(Utc::now())
        .bind(serde_json::to_string(&operation.provisioning_parameters)?)
        .bind(serde_json::to_string(&operation.instance_details)?)
        .bind(&operation.global_account_id)
        .bind(&operation.region)
        .bind(&operation.dashboard_url)
        .bind(updating_parameters)
        .bind(&operation.updated_plan_id)
        .bind(&operation.id)
        .bind(operation.version)
        .execute(&self.pool)
        .await?;

        let stored = self.get_operation_by_id(&operation.id).await?;
        match stored {
            None => Err(StoreError::NotFound {
                kind: "operation",
                id: operation.id.clone(),
            }),
            Some(current) if result.rows_affected() == 0 => Err(StoreError::Conflict {
                kind: "operation",
                id: operation.id.clone(),
                reason: format!(
                    "stale version {} (current {})",
                    operation.version, current.version
                ),
            }),
            Some(current) => Ok(current),
        }
    }

    async fn get_provisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.fetch_operation("AND type = 'provision' AND state != 'canceled'", instance_id)
            .await
    }

    async fn get_deprovisioning_operation_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.fetch_operation("AND type = 'deprovision'", instance_id)
            .await
    }

    async fn get_last_operation(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.fetch_operation("AND state NOT IN ('pending', 'canceled')", instance_id)
            .await
    }

    async fn get_last_operation_with_all_states(
        &self,
        instance_id: &str,
    ) -> Result<Option<Operation>, StoreError> {
        self.fetch_operation("", instance_id).await
    }

    async fn list_operations_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Vec<Operation>, StoreError> {
        let query = format!(
            "SELECT {} FROM operations WHERE instance_id = ? ORDER BY created_at ASC, seq ASC",
            OPERATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, OperationRow>(&query)
            .bind(instance_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(Operation::try_from).collect()
    }
}

#[async_trait]
impl InstancesArchived for SqliteStore {
    async fn insert(&self, archived: &InstanceArchived) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO instances_archived (
                instance_id, global_account_id, subaccount_id, subscription_global_account_id,
                plan_id, plan_name, subaccount_region, region, provider, last_runtime_id,
                internal_user, shoot_name, provisioning_started_at, provisioning_finished_at,
                provisioning_state, first_deprovisioning_started_at,
                first_deprovisioning_finished_at, real_deprovisioning_started_at,
                real_deprovisioning_finished_at, last_deprovisioning_finished_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&archived.instance_id)
        .bind(&archived.global_account_id)
        .bind(&archived.subaccount_id)
        .bind(&archived.subscription_global_account_id)
        .bind(&archived.plan_id)
        .bind(&archived.plan_name)
        .bind(&archived.subaccount_region)
        .bind(&archived.region)
        .bind(&archived.provider)
        .bind(&archived.last_runtime_id)
        .bind(archived.internal_user)
        .bind(&archived.shoot_name)
        .bind(archived.provisioning_started_at)
        .bind(archived.provisioning_finished_at)
        .bind(archived.provisioning_state.as_str())
        .bind(archived.first_deprovisioning_started_at)
        .bind(archived.first_deprovisioning_finished_at)
        .bind(archived.real_deprovisioning_started_at)
        .bind(archived.real_deprovisioning_finished_at)
        .bind(archived.last_deprovisioning_finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| insert_error(e, "archived instance", &archived.instance_id))?;

        Ok(())
    }

    async fn get_by_instance_id(
        &self,
        instance_id: &str,
    ) -> Result<Option<InstanceArchived>, StoreError> {
        let row = sqlx::query_as::<_, ArchivedRow>(
            r#"
            SELECT instance_id, global_account_id, subaccount_id, subscription_global_account_id,
                   plan_id, plan_name, subaccount_region, region, provider, last_runtime_id,
                   internal_user, shoot_name, provisioning_started_at, provisioning_finished_at,
                   provisioning_state, first_deprovisioning_started_at,
                   first_deprovisioning_finished_at, real_deprovisioning_started_at,
                   real_deprovisioning_finished_at, last_deprovisioning_finished_at
            FROM instances_archived
            WHERE instance_id = ?
            "#,
        )
        .bind(instance_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(InstanceArchived::try_from).transpose()
    }

    async fn total_number_of_instances_archived_for_global_account_id(
        &self,
        global_account_id: &str,
        plan_id: &str,
    ) -> Result<usize, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM instances_archived
            WHERE global_account_id = ? AND plan_id = ?
            "#,
        )
        .bind(global_account_id)
        .bind(plan_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as usize)
    }
}
