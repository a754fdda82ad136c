//! Channel dispatch for drafted removal actions.
//!
//! The router picks a channel the effective policy allows, attempts it with
//! bounded retries, and falls back once before reporting failure. Webform
//! dispatch enqueues a durable job and returns immediately; completion is the
//! webform worker's responsibility.

pub mod dispatch_router;
pub mod email_retry;
pub mod provider_dispatch;

pub use dispatch_router::{
    route_action, DispatchOutcome, DispatchRouterConfig, DispatchState, WebformEnqueue,
};
pub use email_retry::{
    next_backoff_ms, next_backoff_ms_with_jitter, parse_retry_after_ms, provider_retry_delay_ms,
    should_retry_status, PROVIDER_BASE_BACKOFF_MS, PROVIDER_MAX_SEND_ATTEMPTS,
};
pub use provider_dispatch::{
    send_with_retry, DirectSendError, DirectSendReceipt, DirectSendRequest, DirectSender,
    HttpDirectSender, HttpDirectSenderConfig,
};
