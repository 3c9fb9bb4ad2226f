//! Event stream consumer for the Strato CLI.
//!
//! Tails application logs and the platform firehose over a persistent
//! websocket-framed connection (with TLS and HTTP CONNECT proxy
//! support), with a bounded fixed-delay auto-reconnect policy, and
//! fetches recent logs / container metrics over a one-shot multipart
//! HTTP path.

pub mod connection;
pub mod consumer;
pub mod error;
pub mod fetcher;
pub mod retry;

pub use connection::ProxySelector;
pub use consumer::Consumer;
pub use error::ConsumerError;
pub use fetcher::{sort_container_metrics, sort_recent_logs};
pub use retry::{MAX_RETRIES, RECONNECT_DELAY};
