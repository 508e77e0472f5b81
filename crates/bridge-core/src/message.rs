//! Wire envelopes exchanged with the native side.
//!
//! Outbound and inbound frames share the envelope shape
//! `{id?, type, payload, timestamp?}`. A frame carrying a `success` field is a
//! response to an earlier request; everything else is an event.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{BridgeError, BridgeResult};
use crate::view::{ViewId, ViewType};

/// Property bag sent to native views.
pub type Props = serde_json::Map<String, Value>;

/// Type tag of the envelope wrapping several queued messages.
pub const BATCH_MESSAGE_TYPE: &str = "batch";

/// Type tag of inbound native view events.
pub const VIEW_EVENT_MESSAGE_TYPE: &str = "viewEvent";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BridgeMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl BridgeMessage {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: None,
            message_type: message_type.into(),
            payload,
            timestamp: None,
        }
    }

    // Reuses the type string allocation of a pooled envelope.
    pub(crate) fn fill(&mut self, message_type: &str, payload: Value, timestamp: u64) {
        self.id = None;
        self.message_type.clear();
        self.message_type.push_str(message_type);
        self.payload = payload;
        self.timestamp = Some(timestamp);
    }

    pub(crate) fn reset(&mut self) {
        self.id = None;
        self.message_type.clear();
        self.payload = Value::Null;
        self.timestamp = None;
    }
}

/// Answer to a request, correlated by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn into_result(self) -> BridgeResult<Value> {
        if self.success {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(BridgeError::Remote(
                self.error
                    .unwrap_or_else(|| "request failed without an error message".to_string()),
            ))
        }
    }
}

/// A parsed inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound {
    Response(Response),
    Event(BridgeMessage),
}

impl Inbound {
    pub fn parse(frame: &[u8]) -> BridgeResult<Self> {
        let value: Value = serde_json::from_slice(frame)
            .map_err(|err| BridgeError::MalformedMessage(err.to_string()))?;
        let is_response = match &value {
            Value::Object(object) => object.contains_key("success"),
            _ => {
                return Err(BridgeError::MalformedMessage(
                    "frame is not a JSON object".to_string(),
                ))
            }
        };
        if is_response {
            serde_json::from_value(value)
                .map(Inbound::Response)
                .map_err(|err| BridgeError::MalformedMessage(err.to_string()))
        } else {
            serde_json::from_value(value)
                .map(Inbound::Event)
                .map_err(|err| BridgeError::MalformedMessage(err.to_string()))
        }
    }
}

/// Delivery class of an outbound message. Flushes drain High, then Normal,
/// then Low.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Normal, Priority::Low];

    pub(crate) fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Normal => 1,
            Priority::Low => 2,
        }
    }
}

/// Structural operations understood by the native side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "camelCase")]
pub enum Operation {
    #[serde(rename_all = "camelCase")]
    CreateView {
        view_id: ViewId,
        view_type: ViewType,
        props: Props,
    },
    #[serde(rename_all = "camelCase")]
    UpdateView { view_id: ViewId, props: Props },
    #[serde(rename_all = "camelCase")]
    RemoveView { view_id: ViewId },
    #[serde(rename_all = "camelCase")]
    AppendChild { parent_id: ViewId, child_id: ViewId },
    #[serde(rename_all = "camelCase")]
    InsertChild {
        parent_id: ViewId,
        child_id: ViewId,
        index: usize,
    },
    #[serde(rename_all = "camelCase")]
    RemoveChild { parent_id: ViewId, child_id: ViewId },
    #[serde(rename_all = "camelCase")]
    SetRootView { view_id: ViewId },
}

impl Operation {
    pub fn message_type(&self) -> &'static str {
        match self {
            Operation::CreateView { .. } => "createView",
            Operation::UpdateView { .. } => "updateView",
            Operation::RemoveView { .. } => "removeView",
            Operation::AppendChild { .. } => "appendChild",
            Operation::InsertChild { .. } => "insertChild",
            Operation::RemoveChild { .. } => "removeChild",
            Operation::SetRootView { .. } => "setRootView",
        }
    }

    /// Splits the operation into its envelope type tag and payload.
    pub fn to_parts(&self) -> BridgeResult<(&'static str, Value)> {
        let mut tagged = serde_json::to_value(self)?;
        let payload = tagged
            .get_mut("payload")
            .map(Value::take)
            .unwrap_or(Value::Null);
        Ok((self.message_type(), payload))
    }

    pub fn from_message(message: &BridgeMessage) -> BridgeResult<Self> {
        let tagged = json!({
            "type": message.message_type,
            "payload": message.payload,
        });
        Ok(serde_json::from_value(tagged)?)
    }
}

#[derive(Serialize)]
struct BatchPayload<'a> {
    operations: &'a [BridgeMessage],
}

pub(crate) fn batch_payload(messages: &[BridgeMessage]) -> BridgeResult<Value> {
    Ok(serde_json::to_value(BatchPayload {
        operations: messages,
    })?)
}
