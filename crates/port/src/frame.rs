//! JSON frames exchanged over a port.
//!
//! ```text
//! {"type":"request","id":7,"method":"getState","args":[]}
//! {"type":"response","id":7,"result":{"Ok":{...}}}
//! {"type":"response","id":7,"result":{"Err":{"message":"...","code":-32601}}}
//! ```

use bridge::ApplicationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// JSON-RPC code reported when no handler is registered for a method.
pub const METHOD_NOT_FOUND: i64 = -32601;

/// JSON-RPC code reported when a request could not be encoded.
pub const PARSE_ERROR: i64 = -32700;

/// A frame could not be encoded or decoded.
#[derive(Debug, Error)]
#[error("malformed port frame: {0}")]
pub struct FrameError(#[from] serde_json::Error);

/// One message on the port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PortFrame {
    /// Foreground → background: invoke `method`.
    Request {
        /// Correlates the response with this request. Unique per port.
        id: u64,
        method: String,
        args: Vec<Value>,
    },
    /// Background → foreground: outcome of request `id`.
    Response {
        id: u64,
        result: Result<Value, ApplicationError>,
    },
}

impl PortFrame {
    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}
