//! JSON-RPC 2.0 envelopes as spoken by `api_jsonrpc.php`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{classify_rpc_error, ApiError};

pub const JSONRPC_VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    pub params: &'a Value,
    pub id: u64,
    /// Legacy token placement, only sent to servers older than 6.4.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<&'a str>,
}

impl<'a> RpcRequest<'a> {
    pub fn new(method: &'a str, params: &'a Value, id: u64) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method,
            params,
            id,
            auth: None,
        }
    }

    pub fn with_auth(mut self, token: &'a str) -> Self {
        self.auth = Some(token);
        self
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: String,
}

impl RpcErrorBody {
    pub fn describe(&self) -> String {
        if self.data.is_empty() {
            self.message.clone()
        } else {
            format!("{} {}", self.message, self.data)
        }
    }
}

impl RpcResponse {
    /// Split the envelope into its payload or a classified error.
    pub fn into_result(self) -> Result<Value, ApiError> {
        if let Some(error) = self.error {
            return Err(classify_rpc_error(&error));
        }
        self.result
            .ok_or_else(|| ApiError::Malformed("response carries neither result nor error".into()))
    }
}
