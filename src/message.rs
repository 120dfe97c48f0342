use crate::error::DispatchError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    AppMessage,
    SystemMessage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageHeader {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub priority: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageBody {
    pub content: String,
}

/// A bus message. The bridge moves these around but never looks inside the body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(default = "default_message_type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub message_header: MessageHeader,
    pub message_body: MessageBody,
}

fn default_message_type() -> MessageType {
    MessageType::AppMessage
}

impl Message {
    pub fn app(content: impl Into<String>) -> Self {
        Message {
            message_type: MessageType::AppMessage,
            message_header: MessageHeader::default(),
            message_body: MessageBody {
                content: content.into(),
            },
        }
    }
}

fn check_type(msg: &Message, declared: MessageType) -> Result<(), DispatchError> {
    if msg.message_type != declared {
        return Err(DispatchError::MalformedMessage(format!(
            "expected {:?} but got {:?}",
            declared, msg.message_type
        )));
    }
    Ok(())
}

pub fn decode(json: &str, declared: MessageType) -> Result<Message, DispatchError> {
    let msg: Message =
        serde_json::from_str(json).map_err(|e| DispatchError::MalformedMessage(e.to_string()))?;
    check_type(&msg, declared)?;
    Ok(msg)
}

pub fn decode_many(json: &str, declared: MessageType) -> Result<Vec<Message>, DispatchError> {
    let msgs: Vec<Message> =
        serde_json::from_str(json).map_err(|e| DispatchError::MalformedMessage(e.to_string()))?;
    for msg in &msgs {
        check_type(msg, declared)?;
    }
    Ok(msgs)
}

pub fn encode(msg: &Message) -> String {
    // Serializing plain structs with string keys cannot fail.
    serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string())
}

pub fn encode_many(msgs: &[Message]) -> String {
    serde_json::to_string(msgs).unwrap_or_else(|_| "[]".to_string())
}
