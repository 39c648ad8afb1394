use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{AttendanceStatus, MarkKind, SessionId, UserId},
    error::MarkErrorCode,
};

/// Payload of one mark submission. Built at activation time, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkRequest {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub status: AttendanceStatus,
}

/// One recorded mark as echoed back by the service on success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub user_id: UserId,
    pub session_id: SessionId,
    pub status: AttendanceStatus,
    pub attendance_type: MarkKind,
    pub timestamp: DateTime<Utc>,
}

/// Response body of a mark submission. The service carries its error codes in
/// the body even on 4xx responses, so every field past `success` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<MarkErrorCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<AttendanceRecord>,
}

impl MarkResponse {
    pub fn accepted(attendance: AttendanceRecord) -> Self {
        Self {
            success: true,
            error: None,
            message: None,
            attendance: Some(attendance),
        }
    }

    pub fn failed(error: MarkErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error),
            message: Some(message.into()),
            attendance: None,
        }
    }
}

/// Lock state of one session, as reported by the session-status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub session_id: SessionId,
    pub is_locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_request_serializes_ids_as_strings() {
        let request = MarkRequest {
            user_id: UserId::from("u1"),
            session_id: SessionId::from("s1"),
            status: AttendanceStatus::Present,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "user_id": "u1",
                "session_id": "s1",
                "status": "present"
            })
        );
    }

    #[test]
    fn unrecognized_error_code_deserializes_to_unknown() {
        let body = r#"{"success": false, "error": "database_error", "message": "boom"}"#;
        let response: MarkResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.error, Some(MarkErrorCode::Unknown));
    }

    #[test]
    fn response_without_error_field_deserializes() {
        let body = r#"{"success": false}"#;
        let response: MarkResponse = serde_json::from_str(body).unwrap();
        assert!(!response.success);
        assert_eq!(response.error, None);
    }
}
