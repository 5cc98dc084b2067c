//! Request gateway: admission, credential lookup, protected work, release.
//!
//! [`RequestGateway::handle`] is the caller flow packaged in one place:
//!
//! 1. ask the [`AdmissionController`] for a slot and a connection
//! 2. fetch a credential for the caller's identity from the [`TokenCache`]
//! 3. run the [`ProtectedWork`] (for example a speech-transcription request)
//! 4. release admission, whether or not steps 2 and 3 succeeded
//!
//! # Example
//!
//! ```rust,ignore
//! use callgate::core::{CallOutcome, ProtectedWork, RequestGateway};
//!
//! #[derive(Clone)]
//! struct Transcribe { audio_path: String }
//!
//! #[async_trait::async_trait]
//! impl ProtectedWork for Transcribe {
//!     type Output = String;
//!     async fn perform(&self, _identity: &str, credential: &str) -> AppResult<String> {
//!         speech_client.recognize_once(credential, &self.audio_path).await
//!     }
//! }
//!
//! match gateway.handle("agent_42", &Transcribe { audio_path }).await? {
//!     CallOutcome::Completed(text) => println!("{text}"),
//!     CallOutcome::Rejected => println!("rate limit exceeded, try again later"),
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::audit::{build_audit_event, AuditAction, AuditSink};
use crate::core::{
    AdmissionController, AdmissionGuard, AppResult, CredentialIssuer, GateError, TokenCache,
};

/// Operation performed once admission and a credential are granted.
#[async_trait]
pub trait ProtectedWork: Send + Sync + 'static {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run the operation on behalf of `identity` using `credential`.
    async fn perform(&self, identity: &str, credential: &str) -> AppResult<Self::Output>;
}

/// Result of a gateway call that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome<T> {
    /// Work ran and produced a value.
    Completed(T),
    /// No capacity; the work never started.
    Rejected,
}

impl<T> CallOutcome<T> {
    /// Whether admission was refused.
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected)
    }

    /// The completed value, if any.
    pub fn into_completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Rejected => None,
        }
    }
}

/// Admission controller and token cache wired in front of protected work.
pub struct RequestGateway<I> {
    admission: Arc<AdmissionController>,
    tokens: Arc<TokenCache<I>>,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl<I: CredentialIssuer> RequestGateway<I> {
    /// Create a gateway from shared components.
    pub const fn new(admission: Arc<AdmissionController>, tokens: Arc<TokenCache<I>>) -> Self {
        Self {
            admission,
            tokens,
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Underlying admission controller.
    pub const fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Underlying token cache.
    pub const fn tokens(&self) -> &Arc<TokenCache<I>> {
        &self.tokens
    }

    /// Run `work` for `identity` if capacity allows.
    ///
    /// Rejection is returned as [`CallOutcome::Rejected`]. Credential and work
    /// failures are returned as errors after admission has been released. If the
    /// returned future is dropped mid-call, admission is still released and a
    /// `release` audit event with detail `cancelled` is recorded.
    pub async fn handle<W: ProtectedWork>(
        &self,
        identity: &str,
        work: &W,
    ) -> AppResult<CallOutcome<W::Output>> {
        let Some(guard) = self.admission.try_admit_guard() else {
            self.record(identity, None, AuditAction::Reject, None);
            return Ok(CallOutcome::Rejected);
        };
        let ticket = guard.ticket_id();
        self.record(identity, Some(ticket), AuditAction::Admit, None);
        let call = AdmittedCall {
            gateway: self,
            identity,
            ticket,
            guard: Some(guard),
        };

        let result = self.run_admitted(identity, ticket, work).await;

        call.finish()?;
        result.map(CallOutcome::Completed)
    }

    async fn run_admitted<W: ProtectedWork>(
        &self,
        identity: &str,
        ticket: u64,
        work: &W,
    ) -> AppResult<W::Output> {
        let credential = match self.tokens.get_token(identity).await {
            Ok(credential) => credential,
            Err(e) => {
                self.record(
                    identity,
                    Some(ticket),
                    AuditAction::TokenFailure,
                    Some(e.to_string()),
                );
                return Err(e.into());
            }
        };
        work.perform(identity, &credential).await
    }
}

impl<I> RequestGateway<I> {
    fn record(
        &self,
        identity: &str,
        ticket: Option<u64>,
        action: AuditAction,
        detail: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock()
                .record(build_audit_event(identity, ticket, action, detail));
        }
    }
}

/// Admission held by an in-progress [`RequestGateway::handle`] call.
///
/// Dropping it without [`AdmittedCall::finish`] means the call was cancelled;
/// capacity is returned and the release is still audited.
struct AdmittedCall<'a, I> {
    gateway: &'a RequestGateway<I>,
    identity: &'a str,
    ticket: u64,
    guard: Option<AdmissionGuard>,
}

impl<I> AdmittedCall<'_, I> {
    fn finish(mut self) -> Result<(), GateError> {
        if let Some(guard) = self.guard.take() {
            guard.release()?;
            self.gateway
                .record(self.identity, Some(self.ticket), AuditAction::Release, None);
        }
        Ok(())
    }
}

impl<I> Drop for AdmittedCall<'_, I> {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            tracing::debug!(ticket = self.ticket, "gateway call cancelled");
            self.gateway.record(
                self.identity,
                Some(self.ticket),
                AuditAction::Release,
                Some("cancelled".into()),
            );
        }
    }
}
