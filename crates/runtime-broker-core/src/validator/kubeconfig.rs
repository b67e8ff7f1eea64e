// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Own-cluster kubeconfig decoding and structural checks.
//!
//! Only the document shape is checked. Whether the cluster it points at is
//! reachable is left to the provisioning executor.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<Named>,
    #[serde(default)]
    contexts: Vec<NamedContext>,
    #[serde(default)]
    users: Vec<Named>,
    #[serde(default)]
    current_context: String,
}

#[derive(Debug, Deserialize)]
struct Named {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NamedContext {
    name: String,
    context: ContextRef,
}

#[derive(Debug, Deserialize)]
struct ContextRef {
    cluster: String,
    #[serde(default)]
    user: String,
}

/// Decode a base64 kubeconfig and check its structure.
///
/// Returns the decoded document so it can be stored in place of the encoded
/// input.
pub fn decode_and_validate(encoded: &str) -> Result<String, String> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| format!("while decoding kubeconfig: {}", e))?;
    let decoded =
        String::from_utf8(bytes).map_err(|e| format!("while decoding kubeconfig: {}", e))?;
    validate(&decoded).map_err(|e| format!("while validating kubeconfig: {}", e))?;
    Ok(decoded)
}

fn validate(document: &str) -> Result<(), String> {
    let config: Kubeconfig = serde_yaml::from_str(document).map_err(|e| e.to_string())?;

    if config.clusters.is_empty() {
        return Err("no clusters defined".to_string());
    }
    if config.current_context.is_empty() {
        return Err("current-context is not set".to_string());
    }
    let context = config
        .contexts
        .iter()
        .find(|c| c.name == config.current_context)
        .ok_or_else(|| format!("context {} not found", config.current_context))?;
    if !config.clusters.iter().any(|c| c.name == context.context.cluster) {
        return Err(format!("cluster {} not found", context.context.cluster));
    }
    if !context.context.user.is_empty()
        && !config.users.iter().any(|u| u.name == context.context.user)
    {
        return Err(format!("user {} not found", context.context.user));
    }
    Ok(())
}
