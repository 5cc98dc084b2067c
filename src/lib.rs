//! # Callgate
//!
//! Admission control and credential caching for call-center telephony backends.
//!
//! Every request that reaches a speech or telephony backend costs two things:
//! a share of local processing capacity and an authenticated session upstream.
//! This crate governs both.
//!
//! ## Core Problem Solved
//!
//! - **Bounded processing**: a small pool of execution slots caps parallel work
//! - **Bounded sessions**: a larger connection budget caps total tenant load
//! - **Authentication cost**: credentials are reused until they expire, and a
//!   burst of callers for the same identity triggers exactly one issuance
//!
//! ## Key Features
//!
//! - **All-or-nothing admission**: a request holds a slot and a connection, or neither
//! - **Non-blocking**: rejection is immediate; backoff policy stays with the caller
//! - **Single-flight refresh**: per-identity, never blocking unrelated identities
//! - **Explicit tickets**: admission and release can happen on different code paths
//!
//! ## AdmissionController
//!
//! ```
//! use callgate::core::AdmissionController;
//!
//! let gate = AdmissionController::new(1_000, 10_000).unwrap();
//! if let Some(ticket) = gate.try_admit() {
//!     // process the request
//!     gate.release(ticket).unwrap();
//! } else {
//!     // rate limit exceeded, try again later
//! }
//! ```
//!
//! ## TokenCache and RequestGateway
//!
//! ```rust,ignore
//! use callgate::builders::build_gateway;
//! use callgate::config::GatewayConfig;
//! use callgate::core::{CallOutcome, IssuedCredential};
//!
//! let issuer = |identity: String| async move {
//!     let token = auth_service.login(&identity).await?;
//!     Ok(IssuedCredential::new(token.value, token.expires_in))
//! };
//! let gateway = build_gateway(&GatewayConfig::from_env()?, issuer)?;
//!
//! match gateway.handle("agent_42", &transcription).await? {
//!     CallOutcome::Completed(text) => println!("{text}"),
//!     CallOutcome::Rejected => println!("rate limit exceeded"),
//! }
//! ```
//!
//! For complete examples, see:
//! - `tests/gateway_test.rs` - End-to-end gateway flow
//! - `tests/token_cache_test.rs` - Single-flight and expiry behavior

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Admission control, credential caching, and the request gateway.
pub mod core;
/// Configuration models for budgets and credential lifetimes.
pub mod config;
/// Builders to construct gateway components from configuration.
pub mod builders;
/// Load-simulation harness.
pub mod runtime;
/// Shared utilities.
pub mod util;
