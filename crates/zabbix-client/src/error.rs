use thiserror::Error;

use crate::rpc::RpcErrorBody;

/// Failures while establishing a session. Fatal for the tenant that raised them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("login rejected: {0}")]
    Rejected(String),

    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("unexpected login response: {0}")]
    Protocol(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ApiError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("malformed request: {0}")]
    Malformed(String),
}

impl ApiError {
    /// Whether the retry loop may try the same call again.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }

    pub fn is_session_expired(&self) -> bool {
        matches!(self, Self::SessionExpired(_))
    }
}

const INTERNAL_ERROR: i64 = -32603;

const SESSION_MARKERS: [&str; 5] = [
    "session terminated",
    "re-login",
    "not authorised",
    "not authorized",
    "api token expired",
];
const RATE_LIMIT_MARKERS: [&str; 2] = ["rate limit", "too many requests"];
const PERMISSION_MARKERS: [&str; 2] = ["no permissions", "permission denied"];

/// Map a JSON-RPC error envelope onto the error taxonomy.
///
/// Zabbix reuses `-32602`/`-32500` for very different conditions, so the
/// human-readable `message`/`data` pair decides first and the numeric code
/// only breaks ties.
pub fn classify_rpc_error(body: &RpcErrorBody) -> ApiError {
    let description = body.describe();
    let lowered = description.to_ascii_lowercase();
    let contains_any = |markers: &[&str]| markers.iter().any(|m| lowered.contains(m));

    if contains_any(&SESSION_MARKERS) {
        ApiError::SessionExpired(description)
    } else if contains_any(&RATE_LIMIT_MARKERS) {
        ApiError::RateLimited(description)
    } else if contains_any(&PERMISSION_MARKERS) {
        ApiError::Permission(description)
    } else if body.code == INTERNAL_ERROR {
        ApiError::Transient(description)
    } else {
        ApiError::Malformed(description)
    }
}
