// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Main pool autoscaler bounds.

use crate::model::AutoScalerParameters;
use crate::plans::AutoScalerDefaults;

/// Largest node count any pool may scale to.
pub const AUTO_SCALER_CEILING: u32 = 300;

fn show(value: Option<u32>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "<nil>".to_string())
}

/// Validate the main pool's bounds, filling unset values from the plan.
pub fn validate(params: &AutoScalerParameters, defaults: AutoScalerDefaults) -> Result<(), String> {
    let min = params.auto_scaler_min.unwrap_or(defaults.min);
    let max = params.auto_scaler_max.unwrap_or(defaults.max);

    if min > max {
        return Err(format!(
            "AutoScalerMax {} should be larger than AutoScalerMin {}. User provided values min:{}, max:{}; plan defaults min:{}, max:{}",
            max,
            min,
            show(params.auto_scaler_min),
            show(params.auto_scaler_max),
            defaults.min,
            defaults.max
        ));
    }
    if let Some(user_min) = params.auto_scaler_min
        && user_min < defaults.floor
    {
        return Err(format!(
            "AutoScalerMin {} should be at least {}",
            user_min, defaults.floor
        ));
    }
    if max > AUTO_SCALER_CEILING {
        return Err(format!(
            "AutoScalerMax {} should not be larger than {}",
            max, AUTO_SCALER_CEILING
        ));
    }
    Ok(())
}
