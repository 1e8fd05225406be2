//! API handlers

pub mod api_keys;
pub mod auth;
pub mod health;
pub mod users;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Plain acknowledgement body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
