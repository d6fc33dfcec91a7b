//! JSON-RPC 2.0 envelopes and method parameters

use bridge_traits::pipeline::{EntityFilter, NewVersion};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// Method names exposed by the pipeline server.
pub mod methods {
    pub const LIST_ENTITIES: &str = "entities.list";
    pub const LATEST_VERSION: &str = "versions.latest";
    pub const CREATE_VERSION: &str = "versions.create";
    pub const BEGIN_UPLOAD: &str = "uploads.begin";
    pub const CREATE_REPRESENTATION: &str = "representations.create";
}

/// Server-defined error codes outside the reserved JSON-RPC range.
pub mod codes {
    pub const NOT_FOUND: i64 = -32004;
    pub const VERSION_CONFLICT: i64 = -32010;
    pub const UNAVAILABLE: i64 = -32050;
}

/// Request envelope
#[derive(Debug, Clone, Serialize)]
pub struct RpcCall<'a, P> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: P,
    pub id: u64,
}

impl<'a, P> RpcCall<'a, P> {
    pub fn new(method: &'a str, params: P, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
        }
    }
}

/// Response envelope
///
/// `result` stays untyped until the error member has been checked; a
/// `null` result is valid for methods returning an optional value.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub jsonrpc: String,
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Value,
    pub error: Option<RpcErrorObject>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

// =============================================================================
// Method parameters
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct ListEntitiesParams<'a> {
    pub project: &'a str,
    pub filter: &'a EntityFilter,
}

#[derive(Debug, Clone, Serialize)]
pub struct LatestVersionParams<'a> {
    pub project: &'a str,
    pub product_id: &'a str,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateVersionParams<'a> {
    pub project: &'a str,
    #[serde(flatten)]
    pub version: &'a NewVersion,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeginUploadParams<'a> {
    pub project: &'a str,
    pub version_id: &'a str,
    pub format: &'a str,
    pub size: usize,
    pub fingerprint: &'a str,
}

/// Where to PUT representation content before registering it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    /// Server-side file location to record on the representation
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRepresentationParams<'a> {
    pub project: &'a str,
    pub version_id: &'a str,
    pub format: &'a str,
    pub fingerprint: &'a str,
    pub dependencies: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<&'a str>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_envelope() {
        let filter = EntityFilter::all();
        let call = RpcCall::new(
            methods::LIST_ENTITIES,
            ListEntitiesParams {
                project: "P",
                filter: &filter,
            },
            7,
        );
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["jsonrpc"], "2.0");
        assert_eq!(json["method"], "entities.list");
        assert_eq!(json["params"]["project"], "P");
        assert_eq!(json["id"], 7);
    }

    #[test]
    fn test_null_result_is_kept() {
        let response: RpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"result":null}"#).unwrap();
        assert!(response.error.is_none());
        assert!(response.result.is_null());
    }

    #[test]
    fn test_error_object() {
        let response: RpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32010,"message":"taken","data":{"latest":4}}}"#,
        )
        .unwrap();
        let error = response.error.unwrap();
        assert_eq!(error.code, codes::VERSION_CONFLICT);
        assert_eq!(error.data.unwrap()["latest"], 4);
    }
}
