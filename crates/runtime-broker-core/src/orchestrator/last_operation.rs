// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Broker-protocol view of stored operation state.

use std::fmt;

use tracing::instrument;

use super::{LastOperationResponse, Orchestrator};
use crate::error::{BrokerError, Result, store_failure};
use crate::model::OperationState;

/// Operation state in the broker-protocol vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LastOperationState {
    /// Still running (or waiting to run).
    InProgress,
    /// Done; cancellation counts as done.
    Succeeded,
    /// Done with an error.
    Failed,
}

impl LastOperationState {
    /// Wire form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in progress",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for LastOperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<OperationState> for LastOperationState {
    fn from(state: OperationState) -> Self {
        match state {
            OperationState::Pending | OperationState::InProgress | OperationState::Retrying => {
                Self::InProgress
            }
            OperationState::Succeeded | OperationState::Canceling | OperationState::Canceled => {
                Self::Succeeded
            }
            OperationState::Failed => Self::Failed,
        }
    }
}

impl Orchestrator {
    /// State of `operation_id`, or of the instance's latest started
    /// operation when no ID is given.
    #[instrument(skip(self))]
    pub async fn last_operation(
        &self,
        instance_id: &str,
        operation_id: Option<&str>,
    ) -> Result<LastOperationResponse> {
        let operations = &self.storage.operations;
        let operation = match operation_id.filter(|id| !id.is_empty()) {
            Some(id) => operations
                .get_operation_by_id(id)
                .await
                .map_err(store_failure("unable to get operation"))?
                .filter(|op| op.instance_id == instance_id)
                .ok_or_else(|| BrokerError::OperationNotFound {
                    operation_id: id.to_string(),
                })?,
            None => operations
                .get_last_operation(instance_id)
                .await
                .map_err(store_failure("unable to get operation"))?
                .ok_or_else(|| BrokerError::InstanceNotFound {
                    instance_id: instance_id.to_string(),
                })?,
        };

        Ok(LastOperationResponse {
            state: operation.state.into(),
            description: operation.description,
        })
    }
}
