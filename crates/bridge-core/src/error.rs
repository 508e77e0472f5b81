use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use crate::view::ViewId;

/// Errors surfaced by the bridge, the queue and the renderer.
///
/// `MalformedMessage` and `Handler` never escape the inbound path; they are
/// constructed so the failure can be logged with a uniform message.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no transport could be opened")]
    TransportUnavailable,
    #[error("bridge is not connected")]
    NotConnected,
    #[error("request `{message_type}` timed out after {after_ms}ms")]
    Timeout { message_type: String, after_ms: u64 },
    #[error("malformed inbound message: {0}")]
    MalformedMessage(String),
    #[error("handler for `{event_type}` panicked: {message}")]
    Handler { event_type: String, message: String },
    #[error("native side reported failure: {0}")]
    Remote(String),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("view {0} is not registered")]
    UnknownView(ViewId),
    #[error("no component registered for kind `{0}`")]
    UnknownComponent(String),
    #[error("invalid hierarchy change: {0}")]
    InvalidHierarchy(String),
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Runs a subscriber callback, turning a panic into a [`BridgeError::Handler`].
///
/// One misbehaving subscriber must not stop delivery to the rest, so callers
/// log the error and carry on with the next handler.
pub fn isolate_handler(event_type: &str, handler: impl FnOnce()) -> BridgeResult<()> {
    panic::catch_unwind(AssertUnwindSafe(handler)).map_err(|payload| BridgeError::Handler {
        event_type: event_type.to_string(),
        message: panic_message(payload.as_ref()),
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
