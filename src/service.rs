//! One replay attempt, end to end.
//!
//! `ReplayService::replay` checks the caller, loads the captured request,
//! validates the target, executes against the pinned address and emits an
//! audit event. Every failure leaves as a [`ReplayError`] whose client-facing
//! text never carries validation detail.

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{spawn_record, AuditEvent, AuditSink, Outcome, TracingAuditSink};
use crate::error::Error;
use crate::executor::{ReplayExecutor, ReplayResponse};
use crate::store::RequestStore;
use crate::target_url::canonical_host;
use crate::validate::TargetValidator;

/// Client-facing message for every rejected target.
pub const TARGET_NOT_ALLOWED: &str = "Target URL is not allowed";

/// Client-facing message for unknown, foreign or unauthorized requests.
pub const REQUEST_NOT_FOUND: &str = "Request not found";

/// Identity and plan flag of whoever asked for the replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub may_replay: bool,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, may_replay: bool) -> Self {
        Self {
            user_id: user_id.into(),
            may_replay,
        }
    }
}

/// Why a replay did not produce a response.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ReplayError {
    /// The request itself was unusable.
    #[error("{0}")]
    Input(String),

    #[error("{}", TARGET_NOT_ALLOWED)]
    PolicyRejection,

    /// Not allowed to replay, or no such request for this caller.
    #[error("{}", REQUEST_NOT_FOUND)]
    Authz,

    #[error("Replay timed out")]
    Timeout,

    #[error("{0}")]
    Network(String),

    #[error("Internal error")]
    Internal,
}

impl ReplayError {
    pub fn outcome(&self) -> Option<Outcome> {
        match self {
            Self::Input(_) | Self::PolicyRejection | Self::Authz => Some(Outcome::Rejected),
            Self::Timeout => Some(Outcome::TimedOut),
            Self::Network(_) => Some(Outcome::NetworkError),
            Self::Internal => None,
        }
    }
}

/// Validation failures become `Input` when the URL does not parse and
/// `PolicyRejection` otherwise. Execution failures keep their kind.
impl From<&Error> for ReplayError {
    fn from(e: &Error) -> Self {
        match e {
            Error::MalformedUrl { reason, .. } => {
                Self::Input(format!("Invalid target URL: {reason}"))
            }
            e if e.is_policy_rejection() => Self::PolicyRejection,
            Error::Timeout { .. } => Self::Timeout,
            Error::Network { message, .. } => Self::Network(message.clone()),
            _ => Self::Internal,
        }
    }
}

/// Runs replay attempts. Cheap to clone; all state is shared and immutable.
#[derive(Clone)]
pub struct ReplayService {
    validator: Arc<TargetValidator>,
    executor: Arc<ReplayExecutor>,
    store: Arc<dyn RequestStore>,
    audit: Arc<dyn AuditSink>,
}

impl ReplayService {
    pub fn new(
        validator: TargetValidator,
        executor: ReplayExecutor,
        store: Arc<dyn RequestStore>,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            executor: Arc::new(executor),
            store,
            audit: Arc::new(TracingAuditSink),
        }
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn validator(&self) -> &TargetValidator {
        &self.validator
    }

    /// Replay captured request `request_id` against `target_url` for `caller`.
    #[instrument(skip_all, fields(request_id = %request_id, user_id = %caller.user_id))]
    pub async fn replay(
        &self,
        caller: &Caller,
        request_id: Uuid,
        target_url: &str,
    ) -> Result<ReplayResponse, ReplayError> {
        if !caller.may_replay {
            return Err(self.deny(caller, request_id, target_url, "caller may not replay"));
        }

        let captured = match self.store.get(request_id).await {
            Ok(Some(captured)) if captured.owner_id == caller.user_id => captured,
            Ok(_) => {
                let reason = "request missing or owned by another user";
                return Err(self.deny(caller, request_id, target_url, reason));
            }
            Err(e) => {
                error!(error = %e, "request store lookup failed");
                return Err(ReplayError::Internal);
            }
        };

        let target_url = target_url.trim();
        if target_url.is_empty() {
            return Err(ReplayError::Input("targetUrl must not be empty".into()));
        }

        let validated = match self.validator.validate(target_url).await {
            Ok(validated) => validated,
            Err(e) => {
                warn!(reason = %e, outcome = Outcome::Rejected.as_str(), "target rejected");
                let event = AuditEvent::replay(
                    caller.user_id.as_str(),
                    request_id.to_string(),
                    &audit_target(target_url),
                    Outcome::Rejected,
                )
                .with_error(e.to_string());
                spawn_record(Arc::clone(&self.audit), event);
                return Err(ReplayError::from(&e));
            }
        };
        let target = validated.target.host_and_path();

        match self.executor.execute_validated(&captured, &validated).await {
            Ok(response) => {
                info!(
                    outcome = Outcome::Succeeded.as_str(),
                    status = response.status,
                    truncated = response.truncated,
                    "replay finished"
                );
                let event = AuditEvent::replay(
                    caller.user_id.as_str(),
                    request_id.to_string(),
                    &target,
                    Outcome::Succeeded,
                )
                .with_status(response.status);
                spawn_record(Arc::clone(&self.audit), event);
                Ok(response)
            }
            Err(e) => {
                let err = ReplayError::from(&e);
                let outcome = err.outcome().unwrap_or(Outcome::NetworkError);
                warn!(error = %e, outcome = outcome.as_str(), "replay failed");
                let event = AuditEvent::replay(
                    caller.user_id.as_str(),
                    request_id.to_string(),
                    &target,
                    outcome,
                )
                .with_error(e.to_string());
                spawn_record(Arc::clone(&self.audit), event);
                Err(err)
            }
        }
    }

    /// Audit a denied caller and return the not-found error they see.
    fn deny(
        &self,
        caller: &Caller,
        request_id: Uuid,
        target_url: &str,
        reason: &str,
    ) -> ReplayError {
        info!(outcome = Outcome::Rejected.as_str(), reason, "replay denied");
        let event = AuditEvent::replay(
            caller.user_id.as_str(),
            request_id.to_string(),
            &audit_target(target_url.trim()),
            Outcome::Rejected,
        )
        .with_error(reason);
        spawn_record(Arc::clone(&self.audit), event);
        ReplayError::Authz
    }
}

/// Host and path of a target that did not reach the executor, or the raw text
/// if it does not parse. The host is canonicalized like [`TargetUrl::host`].
///
/// [`TargetUrl::host`]: crate::TargetUrl::host
fn audit_target(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(url) => format!(
            "{}{}",
            canonical_host(url.host_str().unwrap_or_default()),
            url.path()
        ),
        Err(_) => raw.to_string(),
    }
}
