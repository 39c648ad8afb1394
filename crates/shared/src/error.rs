use serde::{Deserialize, Serialize};

/// Error codes the marking service is known to report on `success: false`
/// responses. Anything it sends outside this set deserializes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkErrorCode {
    AlreadyMarked,
    SessionLocked,
    Forbidden,
    #[serde(other)]
    Unknown,
}
