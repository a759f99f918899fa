pub mod api;
pub mod error;
pub mod models;
pub mod retry;
pub mod rpc;
pub mod session;
pub mod transport;

pub use error::{ApiError, AuthError};
pub use models::{GroupRecord, HistoryRecord, HostRecord, ItemRecord, TrendRecord};
pub use retry::{with_retry, RetryMachine, RetryPolicy, RetryStep, Sleeper, TokioSleeper};
pub use session::{AuthStyle, Credentials, Session, SessionConfig, SessionManager, Tenant};
