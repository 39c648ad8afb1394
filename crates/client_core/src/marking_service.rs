//! Transport seam to the remote marking service.
//!
//! Classification is body-driven: the service reports its error codes in
//! JSON bodies even on 4xx statuses, so the HTTP status is never consulted.

use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{MarkKind, SessionId},
    error::MarkErrorCode,
    protocol::{MarkRequest, MarkResponse, SessionStatus},
};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MarkSubmitError {
    #[error("failed to reach marking service: {0}")]
    Network(String),
    #[error("malformed marking service response: {0}")]
    MalformedResponse(String),
}

#[async_trait]
pub trait MarkingService: Send + Sync {
    async fn submit_mark(&self, request: &MarkRequest) -> Result<MarkResponse, MarkSubmitError>;
    async fn session_status(&self, session_id: &SessionId)
        -> Result<SessionStatus, MarkSubmitError>;
}

/// Everything a mark submission can resolve to. Drives the only state
/// transition in the controller: converge the set, or revert the control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Accepted,
    AlreadyMarked,
    SessionLocked,
    Forbidden,
    UnknownError,
    NetworkFailure,
}

impl MarkOutcome {
    pub fn classify(result: Result<MarkResponse, MarkSubmitError>) -> Self {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                warn!("attendance: submit failed: {err}");
                return MarkOutcome::NetworkFailure;
            }
        };
        if response.success {
            return MarkOutcome::Accepted;
        }
        match response.error {
            // Idempotency rule: a duplicate mark is a success, not an error.
            Some(MarkErrorCode::AlreadyMarked) => MarkOutcome::AlreadyMarked,
            Some(MarkErrorCode::SessionLocked) => MarkOutcome::SessionLocked,
            Some(MarkErrorCode::Forbidden) => MarkOutcome::Forbidden,
            Some(MarkErrorCode::Unknown) | None => MarkOutcome::UnknownError,
        }
    }

    pub fn confirms_mark(&self) -> bool {
        matches!(self, MarkOutcome::Accepted | MarkOutcome::AlreadyMarked)
    }
}

/// Reqwest-backed implementation posting to the marking service's HTTP API.
pub struct HttpMarkingService {
    http: Client,
    base_url: String,
    kind: MarkKind,
}

impl HttpMarkingService {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            http: Client::new(),
            base_url,
            kind: MarkKind::default(),
        }
    }

    pub fn with_kind(mut self, kind: MarkKind) -> Self {
        self.kind = kind;
        self
    }

    fn mark_endpoint(&self) -> String {
        match self.kind {
            MarkKind::Regular => format!("{}/api/attendance", self.base_url),
            MarkKind::Core => format!("{}/api/attendance/core", self.base_url),
        }
    }
}

#[async_trait]
impl MarkingService for HttpMarkingService {
    async fn submit_mark(&self, request: &MarkRequest) -> Result<MarkResponse, MarkSubmitError> {
        let response = self
            .http
            .post(self.mark_endpoint())
            .json(request)
            .send()
            .await
            .map_err(|err| MarkSubmitError::Network(err.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| MarkSubmitError::Network(err.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|err| MarkSubmitError::MalformedResponse(err.to_string()))
    }

    async fn session_status(
        &self,
        session_id: &SessionId,
    ) -> Result<SessionStatus, MarkSubmitError> {
        let url = format!("{}/api/sessions/{}/status", self.base_url, session_id);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| MarkSubmitError::Network(err.to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|err| MarkSubmitError::Network(err.to_string()))?;
        serde_json::from_slice(&body)
            .map_err(|err| MarkSubmitError::MalformedResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(error: MarkErrorCode) -> Result<MarkResponse, MarkSubmitError> {
        Ok(MarkResponse::failed(error, "scripted"))
    }

    #[test]
    fn success_classifies_as_accepted() {
        let response = MarkResponse {
            success: true,
            error: None,
            message: None,
            attendance: None,
        };
        assert_eq!(MarkOutcome::classify(Ok(response)), MarkOutcome::Accepted);
    }

    #[test]
    fn recognized_codes_classify_to_their_outcomes() {
        assert_eq!(
            MarkOutcome::classify(failed(MarkErrorCode::AlreadyMarked)),
            MarkOutcome::AlreadyMarked
        );
        assert_eq!(
            MarkOutcome::classify(failed(MarkErrorCode::SessionLocked)),
            MarkOutcome::SessionLocked
        );
        assert_eq!(
            MarkOutcome::classify(failed(MarkErrorCode::Forbidden)),
            MarkOutcome::Forbidden
        );
    }

    #[test]
    fn unrecognized_or_missing_code_is_unknown_error() {
        assert_eq!(
            MarkOutcome::classify(failed(MarkErrorCode::Unknown)),
            MarkOutcome::UnknownError
        );
        let no_code = MarkResponse {
            success: false,
            error: None,
            message: None,
            attendance: None,
        };
        assert_eq!(
            MarkOutcome::classify(Ok(no_code)),
            MarkOutcome::UnknownError
        );
    }

    #[test]
    fn transport_errors_classify_as_network_failure() {
        assert_eq!(
            MarkOutcome::classify(Err(MarkSubmitError::Network("refused".into()))),
            MarkOutcome::NetworkFailure
        );
        assert_eq!(
            MarkOutcome::classify(Err(MarkSubmitError::MalformedResponse("not json".into()))),
            MarkOutcome::NetworkFailure
        );
    }

    #[test]
    fn already_marked_counts_as_a_confirmed_mark() {
        assert!(MarkOutcome::Accepted.confirms_mark());
        assert!(MarkOutcome::AlreadyMarked.confirms_mark());
        assert!(!MarkOutcome::SessionLocked.confirms_mark());
        assert!(!MarkOutcome::NetworkFailure.confirms_mark());
    }

    #[test]
    fn endpoint_follows_mark_kind_and_trims_base_slash() {
        let regular = HttpMarkingService::new("http://127.0.0.1:9/");
        assert_eq!(regular.mark_endpoint(), "http://127.0.0.1:9/api/attendance");
        let core = HttpMarkingService::new("http://127.0.0.1:9").with_kind(MarkKind::Core);
        assert_eq!(core.mark_endpoint(), "http://127.0.0.1:9/api/attendance/core");
    }
}
