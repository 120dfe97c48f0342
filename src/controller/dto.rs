use crate::error::DispatchError;
use serde::{Deserialize, Serialize};

pub const HTTP_SUCCESS_CODE: u16 = 200;
pub const HTTP_FAILED_CODE: u16 = 500;

/// Payload for a successful call that carries no messages.
pub const EMPTY_PAYLOAD: &str = "[]";

/// The body of every bridge response. `data` holds already-encoded JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub code: u16,
    pub error: String,
    pub extra: String,
    pub data: String,
}

impl ResponseEnvelope {
    pub fn success(data: String) -> Self {
        ResponseEnvelope {
            code: HTTP_SUCCESS_CODE,
            error: String::new(),
            extra: String::new(),
            data,
        }
    }

    pub fn failure(err: &DispatchError) -> Self {
        ResponseEnvelope {
            code: HTTP_FAILED_CODE,
            error: err.to_string(),
            extra: String::new(),
            data: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == HTTP_SUCCESS_CODE
    }
}
