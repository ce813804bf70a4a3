//! Error taxonomy for the TrueNAS client.
//!
//! Callers classify errors through the kind predicates (`is_not_found`,
//! `is_connection_error`, ...) rather than by destructuring variants; the
//! concrete shape of an error may carry wrapped context, but the predicate
//! answer is stable.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClientError>;

/// JSON-RPC error code the middleware uses for ENOENT-class failures.
const CODE_ENOENT: i64 = -6;

/// Message/data substrings that signal absence. The appliance is not
/// consistent about how "does not exist" is reported, so the matcher is
/// deliberately broad; it may false-positive on unrelated errors whose
/// message happens to contain one of these.
const NOT_FOUND_MARKERS: &[&str] = &[
    "not found",
    "does not exist",
    "no such",
    "instancenotfound",
    "enoent",
];

/// Transport operation during which a connection error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnOp {
    /// Establishing the WebSocket connection.
    Dial,
    /// Receiving a frame.
    Read,
    /// Sending a frame.
    Write,
}

impl std::fmt::Display for ConnOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnOp::Dial => write!(f, "dial"),
            ConnOp::Read => write!(f, "read"),
            ConnOp::Write => write!(f, "write"),
        }
    }
}

/// Application-level error returned by the appliance in the JSON-RPC
/// `error` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    /// Numeric error code (middleware errno conventions, negative).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured payload; free-form JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)?;
        if let Some(data) = &self.data {
            write!(f, " (data: {})", data)?;
        }
        Ok(())
    }
}

impl std::error::Error for RpcError {}

/// Errors produced by the client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure, tagged with the operation that failed.
    #[error("connection {op}: {source}")]
    Connection {
        /// Which transport operation failed.
        op: ConnOp,
        /// Underlying WebSocket error.
        #[source]
        source: WsError,
    },

    /// The appliance returned an error for the call.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// A lookup came back empty.
    #[error("not found")]
    NotFound,

    /// The API key was rejected during the login handshake.
    #[error("authentication failed")]
    AuthFailed,

    /// A call was issued while the session is not authenticated.
    #[error("not connected")]
    NotConnected,

    /// The client was explicitly closed; it cannot be reused.
    #[error("client closed")]
    Closed,

    /// The configuration is invalid. Permanent; retrying cannot help.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// A reply arrived but its `result` did not match the expected shape.
    #[error("decoding response: {0}")]
    Decode(#[source] serde_json::Error),

    /// The per-call deadline elapsed before a reply arrived.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
}

impl ClientError {
    /// Builds a connection error for the given operation.
    pub(crate) fn conn(op: ConnOp, source: WsError) -> Self {
        ClientError::Connection { op, source }
    }

    /// Synthesizes the "session lost while waiting" error surfaced to
    /// callers whose reply can no longer arrive.
    pub(crate) fn conn_closed() -> Self {
        ClientError::Connection {
            op: ConnOp::Read,
            source: WsError::ConnectionClosed,
        }
    }

    /// Whether this error signals that the remote entity is absent.
    ///
    /// Matches the [`ClientError::NotFound`] sentinel, RPC code `-6`
    /// (ENOENT), and a set of free-text markers in the RPC message or data
    /// (`not found`, `does not exist`, `no such`, `instancenotfound`,
    /// `ENOENT`). The appliance itself is inconsistent about how absence
    /// is signalled, so this matcher is broad by design and may
    /// false-positive on unrelated errors containing those substrings.
    pub fn is_not_found(&self) -> bool {
        match self {
            ClientError::NotFound => true,
            ClientError::Rpc(e) => {
                if e.code == CODE_ENOENT {
                    return true;
                }
                let message = e.message.to_lowercase();
                if NOT_FOUND_MARKERS.iter().any(|m| message.contains(m)) {
                    return true;
                }
                match &e.data {
                    Some(data) => {
                        let data = data.to_string().to_lowercase();
                        NOT_FOUND_MARKERS.iter().any(|m| data.contains(m))
                    }
                    None => false,
                }
            }
            _ => false,
        }
    }

    /// Whether this error is a transport-level connection failure.
    ///
    /// Connection errors are transient: the session reconnects in the
    /// background and the call can be retried.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, ClientError::Connection { .. })
    }

    /// Whether this error is a permanent configuration problem.
    pub fn is_config_error(&self) -> bool {
        matches!(self, ClientError::Config(_))
    }

    /// Whether the login handshake was rejected.
    pub fn is_auth_failed(&self) -> bool {
        matches!(self, ClientError::AuthFailed)
    }

    /// Whether the appliance returned an application-level RPC error.
    pub fn is_rpc_error(&self) -> bool {
        matches!(self, ClientError::Rpc(_))
    }
}
