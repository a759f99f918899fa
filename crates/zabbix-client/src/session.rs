use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{json, Value};
use tokio::sync::{Mutex, RwLock};

use crate::error::{ApiError, AuthError};
use crate::retry::{with_retry, RetryPolicy, Sleeper, TokioSleeper};
use crate::rpc::RpcRequest;
use crate::transport::HttpTransport;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// An independently configured Zabbix client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    pub id: String,
    pub url: String,
    pub credentials: Credentials,
}

/// Where the session token travels on authenticated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    /// The `auth` member of the JSON-RPC body (servers before 6.4).
    RequestField,
    /// An `Authorization: Bearer` header (6.4 and later).
    BearerHeader,
}

impl AuthStyle {
    pub fn for_version(version: &str) -> Self {
        let mut parts = version.trim().split('.').map(|p| p.parse::<u32>().ok());
        match (parts.next().flatten(), parts.next().flatten()) {
            (Some(major), Some(minor)) if (major, minor) >= (6, 4) => Self::BearerHeader,
            (Some(major), None) if major > 6 => Self::BearerHeader,
            _ => Self::RequestField,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Opens one [`Session`] per tenant.
#[derive(Debug, Clone)]
pub struct SessionManager {
    config: SessionConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl SessionManager {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Replace the backoff clock, mainly for tests.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub async fn authenticate(&self, tenant: &Tenant) -> Result<Session, AuthError> {
        let transport = HttpTransport::new(tenant.url.clone(), self.config.request_timeout)
            .map_err(|e| AuthError::Unreachable(e.to_string()))?;
        let mut connection = Connection {
            transport,
            retry: self.config.retry.clone(),
            sleeper: Arc::clone(&self.sleeper),
            next_id: AtomicU64::new(1),
            auth_style: AuthStyle::RequestField,
        };

        let api_version = connection.api_version().await?;
        if let Some(version) = &api_version {
            connection.auth_style = AuthStyle::for_version(version);
        }

        let token = connection.login(&tenant.credentials).await?;
        info!(
            "Tenant {}: authenticated against Zabbix {} ({:?})",
            tenant.id,
            api_version.as_deref().unwrap_or("unknown"),
            connection.auth_style
        );

        Ok(Session {
            tenant: tenant.clone(),
            connection,
            api_version,
            state: RwLock::new(TokenState {
                token,
                generation: 0,
                valid: true,
            }),
            relogin: Mutex::new(()),
        })
    }
}

struct Connection {
    transport: HttpTransport,
    retry: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    next_id: AtomicU64,
    auth_style: AuthStyle,
}

impl Connection {
    async fn send_once(
        &self,
        method: &str,
        params: &Value,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut request = RpcRequest::new(method, params, id);
        let mut bearer = None;
        if let Some(token) = token {
            match self.auth_style {
                AuthStyle::RequestField => request = request.with_auth(token),
                AuthStyle::BearerHeader => bearer = Some(token),
            }
        }
        self.transport.send(&request, bearer).await?.into_result()
    }

    async fn send(
        &self,
        method: &str,
        params: &Value,
        token: Option<&str>,
    ) -> Result<Value, ApiError> {
        with_retry(&self.retry, self.sleeper.as_ref(), method, || {
            self.send_once(method, params, token)
        })
        .await
    }

    async fn api_version(&self) -> Result<Option<String>, AuthError> {
        match self.send("apiinfo.version", &json!([]), None).await {
            Ok(Value::String(version)) => Ok(Some(version)),
            Ok(other) => {
                warn!("Unexpected apiinfo.version result {}; assuming legacy auth", other);
                Ok(None)
            }
            Err(e) if e.is_transient() => Err(AuthError::Unreachable(e.to_string())),
            Err(e) => {
                warn!("apiinfo.version failed: {}; assuming legacy auth", e);
                Ok(None)
            }
        }
    }

    async fn login(&self, credentials: &Credentials) -> Result<String, AuthError> {
        let params = json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        match self.send("user.login", &params, None).await {
            Ok(value) => token_from(value),
            // Servers before 5.4 only know the `user` parameter.
            Err(ApiError::Malformed(reason)) if reason.contains("\"username\"") => {
                debug!("user.login rejected `username` ({}); retrying with `user`", reason);
                let legacy = json!({
                    "user": credentials.username,
                    "password": credentials.password,
                });
                let value = self
                    .send("user.login", &legacy, None)
                    .await
                    .map_err(login_error)?;
                token_from(value)
            }
            Err(e) => Err(login_error(e)),
        }
    }
}

fn token_from(value: Value) -> Result<String, AuthError> {
    match value {
        Value::String(token) if !token.is_empty() => Ok(token),
        other => Err(AuthError::Protocol(format!(
            "user.login returned {} instead of a token",
            other
        ))),
    }
}

fn login_error(error: ApiError) -> AuthError {
    if error.is_transient() {
        AuthError::Unreachable(error.to_string())
    } else {
        AuthError::Rejected(error.to_string())
    }
}

struct TokenState {
    token: String,
    generation: u64,
    valid: bool,
}

/// An authenticated session for one tenant.
///
/// Shared by reference between the tenant's concurrent host tasks. Dropped
/// through [`Session::release`], which consumes it so the token cannot be
/// used afterwards.
pub struct Session {
    tenant: Tenant,
    connection: Connection,
    api_version: Option<String>,
    state: RwLock<TokenState>,
    relogin: Mutex<()>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("tenant", &self.tenant.id)
            .field("url", &self.connection.transport.url())
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl Session {
    pub fn tenant(&self) -> &Tenant {
        &self.tenant
    }

    pub fn api_version(&self) -> Option<&str> {
        self.api_version.as_deref()
    }

    pub fn auth_style(&self) -> AuthStyle {
        self.connection.auth_style
    }

    pub async fn is_valid(&self) -> bool {
        self.state.read().await.valid
    }

    /// Call `method`, retrying transient failures and re-authenticating once
    /// if the server reports the session as terminated.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, ApiError> {
        let (token, generation) = self.current_token().await?;
        match self.connection.send(method, &params, Some(token.as_str())).await {
            Err(ApiError::SessionExpired(reason)) => {
                warn!(
                    "Tenant {}: {} reported an expired session ({}); re-authenticating",
                    self.tenant.id, method, reason
                );
                let token = self.reauthenticate(generation).await?;
                match self.connection.send(method, &params, Some(token.as_str())).await {
                    Err(ApiError::SessionExpired(reason)) => {
                        self.invalidate().await;
                        Err(ApiError::SessionExpired(reason))
                    }
                    other => other,
                }
            }
            other => other,
        }
    }

    async fn current_token(&self) -> Result<(String, u64), ApiError> {
        let state = self.state.read().await;
        if !state.valid {
            return Err(ApiError::SessionExpired(format!(
                "session for tenant {} is no longer valid",
                self.tenant.id
            )));
        }
        Ok((state.token.clone(), state.generation))
    }

    /// Log in again unless another caller already refreshed the token that
    /// `stale_generation` refers to.
    async fn reauthenticate(&self, stale_generation: u64) -> Result<String, ApiError> {
        let _guard = self.relogin.lock().await;
        {
            let state = self.state.read().await;
            if !state.valid {
                return Err(ApiError::SessionExpired(format!(
                    "session for tenant {} is no longer valid",
                    self.tenant.id
                )));
            }
            if state.generation != stale_generation {
                return Ok(state.token.clone());
            }
        }

        match self.connection.login(&self.tenant.credentials).await {
            Ok(token) => {
                let mut state = self.state.write().await;
                state.token = token.clone();
                state.generation += 1;
                info!(
                    "Tenant {}: re-authenticated (generation {})",
                    self.tenant.id, state.generation
                );
                Ok(token)
            }
            Err(e) => {
                self.invalidate().await;
                Err(ApiError::SessionExpired(format!(
                    "re-authentication failed: {}",
                    e
                )))
            }
        }
    }

    async fn invalidate(&self) {
        self.state.write().await.valid = false;
    }

    /// Best-effort logout. Never fails: the token expires server-side anyway.
    pub async fn release(self) {
        let state = self.state.into_inner();
        if !state.valid {
            debug!("Tenant {}: session already invalid, skipping logout", self.tenant.id);
            return;
        }
        match self
            .connection
            .send_once("user.logout", &json!([]), Some(state.token.as_str()))
            .await
        {
            Ok(_) => info!("Tenant {}: logged out", self.tenant.id),
            Err(e) => warn!(
                "Tenant {}: logout failed, leaving the token to expire: {}",
                self.tenant.id, e
            ),
        }
    }
}
