//! Error types for the JSON-RPC pipeline client

use crate::types::{codes, RpcErrorObject};
use bridge_traits::error::BridgeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RpcError {
    /// Non-2xx HTTP status after retries
    #[error("HTTP error (status {status}): {message}")]
    Http { status: u16, message: String },

    /// JSON-RPC error object returned by the server
    #[error("Pipeline server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("Version conflict: {0}")]
    VersionConflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Envelope did not follow JSON-RPC 2.0
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, RpcError>;

impl From<RpcErrorObject> for RpcError {
    fn from(error: RpcErrorObject) -> Self {
        match error.code {
            codes::VERSION_CONFLICT => RpcError::VersionConflict(error.message),
            codes::NOT_FOUND => RpcError::NotFound(error.message),
            code => RpcError::Server {
                code,
                message: error.message,
            },
        }
    }
}

impl From<RpcError> for BridgeError {
    fn from(error: RpcError) -> Self {
        match error {
            RpcError::Http { status, message } if status == 429 || status >= 500 => {
                BridgeError::Transient(format!("HTTP {}: {}", status, message))
            }
            RpcError::Http { status, message } => {
                BridgeError::OperationFailed(format!("HTTP {}: {}", status, message))
            }
            RpcError::Server { code, message } if code == codes::UNAVAILABLE => {
                BridgeError::Transient(message)
            }
            RpcError::Server { code, message } => {
                BridgeError::OperationFailed(format!("RPC error {}: {}", code, message))
            }
            RpcError::VersionConflict(message) => BridgeError::Conflict(message),
            RpcError::NotFound(message) => BridgeError::NotFound(message),
            RpcError::Protocol(message) => {
                BridgeError::OperationFailed(format!("Protocol error: {}", message))
            }
            RpcError::Bridge(inner) => inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_map_to_bridge_errors() {
        let conflict: BridgeError = RpcError::from(RpcErrorObject {
            code: codes::VERSION_CONFLICT,
            message: "v4 taken".into(),
            data: None,
        })
        .into();
        assert!(matches!(conflict, BridgeError::Conflict(_)));

        let unavailable: BridgeError = RpcError::Server {
            code: codes::UNAVAILABLE,
            message: "maintenance".into(),
        }
        .into();
        assert!(unavailable.is_transient());

        let throttled: BridgeError = RpcError::Http {
            status: 429,
            message: String::new(),
        }
        .into();
        assert!(throttled.is_transient());

        let rejected: BridgeError = RpcError::Http {
            status: 403,
            message: "forbidden".into(),
        }
        .into();
        assert!(!rejected.is_transient());
    }
}
