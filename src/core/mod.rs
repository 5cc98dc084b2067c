//! Admission control, credential caching, and the gateway that combines them.

pub mod admission;
pub mod audit;
pub mod error;
pub mod gateway;
pub mod token_cache;

pub use admission::{AdmissionController, AdmissionGuard, AdmissionStats, AdmissionTicket};
pub use audit::{build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink};
pub use error::{AppResult, GateError};
pub use gateway::{CallOutcome, ProtectedWork, RequestGateway};
pub use token_cache::{
    CredentialIssuer, IssuedCredential, TokenCache, TokenRecord, DEFAULT_TOKEN_TTL, MAX_TOKEN_TTL,
};
