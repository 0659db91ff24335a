//! Hello handshake sent by a chime as its first websocket frame.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use validator::Validate;

pub const MESSAGE_TYPE_HELLO: &str = "hello";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct HelloMessage {
    pub message_type: String,
    #[validate(length(min = 1, max = 128))]
    pub sender_name: String,
}

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("hello is not valid json: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unexpected messageType {0:?}")]
    UnexpectedMessageType(String),

    #[error("invalid senderName: {0}")]
    InvalidSenderName(#[from] validator::ValidationErrors),
}

impl HelloMessage {
    pub fn new(sender_name: impl Into<String>) -> Self {
        Self {
            message_type: MESSAGE_TYPE_HELLO.to_string(),
            sender_name: sender_name.into(),
        }
    }

    /// Parse and validate a hello frame.
    pub fn parse(text: &str) -> Result<Self, HandshakeError> {
        let hello: HelloMessage = serde_json::from_str(text)?;
        if hello.message_type != MESSAGE_TYPE_HELLO {
            return Err(HandshakeError::UnexpectedMessageType(hello.message_type));
        }
        hello.validate()?;
        Ok(hello)
    }
}
