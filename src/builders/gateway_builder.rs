//! Builders to construct admission controllers, token caches, and gateways.

use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::core::{AdmissionController, CredentialIssuer, GateError, RequestGateway, TokenCache};

/// Build an admission controller from validated configuration.
pub fn build_admission(cfg: &GatewayConfig) -> Result<AdmissionController, GateError> {
    cfg.validate()
        .map_err(|e| GateError::Config(format!("config invalid: {e}")))?;
    AdmissionController::new(cfg.slot_capacity, cfg.connection_capacity)
}

/// Build a token cache around `issuer` from validated configuration.
pub fn build_token_cache<I: CredentialIssuer>(
    cfg: &GatewayConfig,
    issuer: I,
) -> Result<TokenCache<I>, GateError> {
    cfg.validate()
        .map_err(|e| GateError::Config(format!("config invalid: {e}")))?;
    TokenCache::new(issuer, cfg.default_token_ttl())
}

/// Build a complete gateway from configuration and an issuer.
pub fn build_gateway<I: CredentialIssuer>(
    cfg: &GatewayConfig,
    issuer: I,
) -> Result<RequestGateway<I>, GateError> {
    let admission = build_admission(cfg)?;
    let tokens = build_token_cache(cfg, issuer)?;
    tracing::info!(
        slots = cfg.slot_capacity,
        connections = cfg.connection_capacity,
        ttl_secs = cfg.default_token_ttl_secs,
        "gateway built"
    );
    Ok(RequestGateway::new(Arc::new(admission), Arc::new(tokens)))
}
