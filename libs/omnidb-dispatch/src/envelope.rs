//! The server's uniform response wrapper.

use serde::{Deserialize, Serialize};

/// `v_error_id` the server uses when the session object was destroyed.
pub const SESSION_DESTROYED_ERROR_ID: i64 = 1;

/// Response envelope returned by every completed call.
///
/// Field names on the wire are `v_error`, `v_error_id` and `v_data`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "v_error", default)]
    pub error: bool,

    #[serde(rename = "v_error_id", default, skip_serializing_if = "Option::is_none")]
    pub error_id: Option<i64>,

    #[serde(rename = "v_data", default)]
    pub data: serde_json::Value,
}

/// How an envelope routes through the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeStatus {
    Success,
    /// Application error the caller may handle
    Failed,
    /// Session is gone; the user must log in again
    SessionDestroyed,
}

impl Envelope {
    #[must_use]
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            error: false,
            error_id: None,
            data,
        }
    }

    #[must_use]
    pub fn failure(data: serde_json::Value, error_id: Option<i64>) -> Self {
        Self {
            error: true,
            error_id,
            data,
        }
    }

    #[must_use]
    pub fn status(&self) -> EnvelopeStatus {
        match (self.error, self.error_id) {
            (false, _) => EnvelopeStatus::Success,
            (true, Some(SESSION_DESTROYED_ERROR_ID)) => EnvelopeStatus::SessionDestroyed,
            (true, _) => EnvelopeStatus::Failed,
        }
    }
}
