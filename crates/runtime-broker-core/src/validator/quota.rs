// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Per-global-account limits of the trial and free plans.

use std::collections::HashSet;

use tracing::info;

use crate::error::{BrokerError, store_failure};
use crate::plans::{Plan, is_freemium_plan, is_trial_plan};
use crate::store::Storage;

/// Rejection of a second trial in one global account.
pub const TRIAL_QUOTA_EXCEEDED: &str =
    "trial Kyma was created for the global account, but there is only one allowed";
/// Rejection of a second free instance in one global account.
pub const FREEMIUM_QUOTA_EXCEEDED: &str = "provisioning request rejected, you have already used the available free service plan quota in this global account";

/// Quota switches.
#[derive(Debug, Clone)]
pub struct QuotaPolicy {
    /// Allow one trial instance per global account.
    pub only_single_trial_per_ga: bool,
    /// Allow one free instance per global account.
    pub only_one_free_per_ga: bool,
    /// Global accounts exempt from the free limit.
    pub free_whitelist: HashSet<String>,
}

impl Default for QuotaPolicy {
    fn default() -> Self {
        Self {
            only_single_trial_per_ga: true,
            only_one_free_per_ga: true,
            free_whitelist: HashSet::new(),
        }
    }
}

impl QuotaPolicy {
    /// Check the quota of `plan_id` for `global_account_id`.
    ///
    /// Free instances are counted across archived and live instances.
    pub async fn check(
        &self,
        storage: &Storage,
        plan_id: &str,
        global_account_id: &str,
    ) -> Result<(), BrokerError> {
        if is_trial_plan(plan_id) && self.only_single_trial_per_ga {
            let count = storage
                .instances
                .get_number_of_instances_for_global_account_id(global_account_id, Plan::Trial.id())
                .await
                .map_err(store_failure("unable to check the plan quota"))?;
            if count > 0 {
                info!(global_account_id, count, "Trial quota exceeded");
                return Err(BrokerError::validation(TRIAL_QUOTA_EXCEEDED));
            }
        }

        if is_freemium_plan(plan_id)
            && self.only_one_free_per_ga
            && !self.free_whitelist.contains(global_account_id)
        {
            let archived = storage
                .instances_archived
                .total_number_of_instances_archived_for_global_account_id(
                    global_account_id,
                    Plan::Free.id(),
                )
                .await
                .map_err(store_failure("unable to check the plan quota"))?;
            if archived > 0 {
                info!(global_account_id, archived, "Free quota used by archived instances");
                return Err(BrokerError::validation(FREEMIUM_QUOTA_EXCEEDED));
            }

            let active = storage
                .instances
                .get_number_of_instances_for_global_account_id(global_account_id, Plan::Free.id())
                .await
                .map_err(store_failure("unable to check the plan quota"))?;
            if active > 0 {
                info!(global_account_id, active, "Free quota used by live instances");
                return Err(BrokerError::validation(FREEMIUM_QUOTA_EXCEEDED));
            }
        }

        Ok(())
    }
}
