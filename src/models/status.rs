//! Response envelope shared by every endpoint.
//!
//! Success and error responses have the same shape:
//!
//! ```json
//! { "status": { "message": "Success", "code": 200 } }
//! ```

use serde::{Deserialize, Serialize};

/// Top-level response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEnvelope {
    pub status: Status,

    /// Queue depth, only reported by the health endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<i64>,
}

/// Human-readable message and the HTTP status code it was sent with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub message: String,
    pub code: u16,
}

impl StatusEnvelope {
    pub fn new(message: impl Into<String>, code: u16) -> Self {
        Self {
            status: Status {
                message: message.into(),
                code,
            },
            pending: None,
        }
    }

    /// 200 envelope.
    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(message, 200)
    }

    pub fn with_pending(mut self, pending: i64) -> Self {
        self.pending = Some(pending);
        self
    }
}
