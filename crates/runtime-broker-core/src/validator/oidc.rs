// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! OIDC configuration checks.

use crate::model::OidcConfig;

/// Signing algorithms the API server accepts.
pub const SUPPORTED_SIGNING_ALGORITHMS: [&str; 9] = [
    "RS256", "RS384", "RS512", "ES256", "ES384", "ES512", "PS256", "PS384", "PS512",
];

/// Validate an OIDC configuration; every violated rule is listed.
pub fn validate(config: &OidcConfig) -> Result<(), String> {
    let mut errors: Vec<&str> = Vec::new();

    if config.client_id.is_empty() {
        errors.push("clientID must not be empty");
    }
    if config.issuer_url.is_empty() {
        errors.push("issuerURL must not be empty");
    } else {
        match config.issuer_url.split_once("://") {
            Some(("https", rest)) if !rest.is_empty() && !rest.starts_with('/') => {}
            Some((scheme, _)) if scheme != "https" => errors.push("issuerURL must have https scheme"),
            _ => errors.push("issuerURL must be a valid URL"),
        }
    }
    if config
        .signing_algs
        .iter()
        .any(|alg| !SUPPORTED_SIGNING_ALGORITHMS.contains(&alg.as_str()))
    {
        errors.push("signingAlgs must contain valid signing algorithm(s)");
    }
    if config.required_claims.iter().any(|claim| {
        claim
            .split_once('=')
            .is_none_or(|(key, value)| key.is_empty() || value.is_empty())
    }) {
        errors.push("requiredClaims must be in a format key=value");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join(", "))
    }
}
