//! Frame Protocol
//!
//! Wire format for host-runner messages. Every message the duplex primitive
//! carries is the JSON encoding of one array-shaped frame:
//!
//! ```text
//! [0, payload, transfer?]   DATA frame carrying an application payload
//! [0]                       DATA frame with no payload (ready handshake)
//! [1]                       CLOSE frame, no payload
//! ```
//!
//! These are the only two tags. Any other leading tag is a protocol
//! violation and fails the channel that produced it, never silently
//! ignored.
//!
//! The payload is an opaque [`serde_json::Value`]; this layer never
//! interprets it. The optional `transfer` list is passed through untouched
//! for transports that support handle passing.

use serde_json::{json, Value};

use crate::error::TransportError;

/// Tag of a DATA frame
pub const DATA_TAG: u8 = 0;

/// Tag of a CLOSE frame
pub const CLOSE_TAG: u8 = 1;

/// One unit the duplex primitive carries: the encoded bytes of a frame
pub type WireMessage = Vec<u8>;

/// A tagged unit of transport-level data
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Application payload, plus an optional transfer list
    Data {
        /// The opaque payload; `None` encodes as the bare `[0]` handshake
        payload: Option<Value>,
        /// Optional transferable handles, passed through untouched
        transfer: Option<Vec<Value>>,
    },
    /// Disconnect request; the sender will not post again on this channel
    Close,
}

impl Frame {
    /// DATA frame carrying `payload`
    #[must_use]
    pub fn data(payload: Value) -> Self {
        Self::Data {
            payload: Some(payload),
            transfer: None,
        }
    }

    /// The ready handshake: a DATA frame with no payload
    ///
    /// Sent by the runner immediately after a port is registered, before any
    /// inbound frame of that port is processed. The remote side must not
    /// send payload data until it has observed this frame.
    #[must_use]
    pub fn ready() -> Self {
        Self::Data {
            payload: None,
            transfer: None,
        }
    }

    /// True for a payload-less DATA frame
    #[must_use]
    pub fn is_ready(&self) -> bool {
        matches!(
            self,
            Self::Data {
                payload: None,
                ..
            }
        )
    }
}

/// Encode a frame to its wire bytes
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if JSON serialization fails.
pub fn encode(frame: &Frame) -> Result<WireMessage, TransportError> {
    let value = match frame {
        Frame::Close => json!([CLOSE_TAG]),
        Frame::Data {
            payload: None,
            transfer: None,
        } => json!([DATA_TAG]),
        Frame::Data {
            payload: Some(payload),
            transfer: None,
        } => json!([DATA_TAG, payload]),
        Frame::Data { payload, transfer } => json!([DATA_TAG, payload, transfer]),
    };

    serde_json::to_vec(&value).map_err(|e| TransportError::Serialization(e.to_string()))
}

/// Decode one wire message into a frame
///
/// # Errors
///
/// Returns [`TransportError::Protocol`] if the bytes are not a JSON array,
/// the leading tag is not in `{0, 1}`, or the transfer list is malformed.
pub fn decode(bytes: &[u8]) -> Result<Frame, TransportError> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| TransportError::Protocol(format!("frame is not valid JSON: {e}")))?;

    let Value::Array(items) = value else {
        return Err(TransportError::Protocol(
            "frame is not an array".to_string(),
        ));
    };

    let Some(tag) = items.first().and_then(Value::as_u64) else {
        return Err(TransportError::Protocol(
            "frame has no numeric tag".to_string(),
        ));
    };

    match tag {
        t if t == u64::from(DATA_TAG) => {
            let payload = items.get(1).cloned();
            let transfer = match items.get(2) {
                None | Some(Value::Null) => None,
                Some(Value::Array(handles)) => Some(handles.clone()),
                Some(other) => {
                    return Err(TransportError::Protocol(format!(
                        "transfer list is not an array: {other}"
                    )))
                }
            };
            Ok(Frame::Data { payload, transfer })
        }
        t if t == u64::from(CLOSE_TAG) => Ok(Frame::Close),
        other => Err(TransportError::Protocol(format!(
            "unrecognized frame tag {other}"
        ))),
    }
}
