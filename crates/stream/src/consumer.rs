//! Event stream consumer.
//!
//! A [`Consumer`] owns at most one live streaming connection at a time.
//! Each streaming call spawns a reader task that decodes binary frames
//! into envelopes and hands them to the caller over a capacity-1 channel
//! — the reader blocks until the caller accepts each item, so
//! backpressure from a slow caller reaches the read loop. A frame that
//! fails to decode is skipped; the stream only ends on a connection-level
//! failure, which surfaces exactly once on the error channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use prost::Message as _;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

use strato_types::{Envelope, LogMessage};

use crate::connection::{ProxySelector, WsStream, establish};
use crate::error::ConsumerError;
use crate::retry::{RetryPolicy, run_with_retry};

type OnConnect = Arc<dyn Fn() + Send + Sync>;

/// Client for the platform's streaming log/metric endpoint.
///
/// Cloning is cheap and clones share the same underlying connection
/// slot and close state.
#[derive(Clone)]
pub struct Consumer {
    endpoint: Url,
    proxy: Option<ProxySelector>,
    on_connect: Option<OnConnect>,
    idle_timeout: Option<Duration>,
    /// Shutdown handle for the live connection; the lock also
    /// serializes establishing against closing.
    active: Arc<Mutex<Option<watch::Sender<bool>>>>,
    stop: CancellationToken,
    closed: Arc<AtomicBool>,
    http: reqwest::Client,
}

impl std::fmt::Debug for Consumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Consumer")
            .field("endpoint", &self.endpoint)
            .field("proxy", &self.proxy.as_ref().map(|_| "..."))
            .field("on_connect", &self.on_connect.as_ref().map(|_| "..."))
            .field("idle_timeout", &self.idle_timeout)
            .field("active", &self.active)
            .field("stop", &self.stop)
            .field("closed", &self.closed)
            .field("http", &self.http)
            .finish()
    }
}

impl Consumer {
    /// Create a consumer for a `ws://` or `wss://` endpoint.
    pub fn new(endpoint: &str) -> Result<Self, ConsumerError> {
        let url = Url::parse(endpoint).map_err(|e| ConsumerError::InvalidEndpoint {
            url: endpoint.to_string(),
            detail: e.to_string(),
        })?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ConsumerError::InvalidEndpoint {
                url: endpoint.to_string(),
                detail: "scheme must be ws or wss".into(),
            });
        }
        Ok(Self {
            endpoint: url,
            proxy: None,
            on_connect: None,
            idle_timeout: None,
            active: Arc::new(Mutex::new(None)),
            stop: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            http: reqwest::Client::new(),
        })
    }

    /// Route connections (streaming and bulk) through an HTTP proxy
    /// chosen per target URL.
    pub fn with_proxy(mut self, selector: ProxySelector) -> Result<Self, ConsumerError> {
        let for_bulk = Arc::clone(&selector);
        self.http = reqwest::Client::builder()
            .proxy(reqwest::Proxy::custom(move |url: &Url| for_bulk(url)))
            .build()
            .map_err(|e| ConsumerError::InvalidEndpoint {
                url: self.endpoint.to_string(),
                detail: e.to_string(),
            })?;
        self.proxy = Some(selector);
        Ok(self)
    }

    /// Invoke `callback` on every successful (re)connection.
    pub fn with_on_connect(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connect = Some(Arc::new(callback));
        self
    }

    /// Fail a stream whose server goes silent for longer than `timeout`.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Tail an app's log messages, reconnecting on failure. Envelopes of
    /// any other type are silently discarded.
    ///
    /// Errors must be drained from the returned channel for reconnection
    /// to continue; both channels close when the retry budget is
    /// exhausted or the consumer is closed.
    pub fn tailing_logs(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> (mpsc::Receiver<LogMessage>, mpsc::Receiver<ConsumerError>) {
        let (out_tx, out_rx) = mpsc::channel(1);
        let errors = self.spawn_stream(
            format!("/apps/{app_id}/stream"),
            auth_token.to_string(),
            Sink::Logs(out_tx),
            RetryPolicy::reconnecting(),
        );
        (out_rx, errors)
    }

    /// [`Consumer::tailing_logs`] without any reconnect attempts.
    pub fn tailing_logs_without_reconnect(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> (mpsc::Receiver<LogMessage>, mpsc::Receiver<ConsumerError>) {
        let (out_tx, out_rx) = mpsc::channel(1);
        let errors = self.spawn_stream(
            format!("/apps/{app_id}/stream"),
            auth_token.to_string(),
            Sink::Logs(out_tx),
            RetryPolicy::single_attempt(),
        );
        (out_rx, errors)
    }

    /// Stream every envelope type for one app, reconnecting on failure.
    pub fn stream(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ConsumerError>) {
        let (out_tx, out_rx) = mpsc::channel(1);
        let errors = self.spawn_stream(
            format!("/apps/{app_id}/stream"),
            auth_token.to_string(),
            Sink::Envelopes(out_tx),
            RetryPolicy::reconnecting(),
        );
        (out_rx, errors)
    }

    /// [`Consumer::stream`] without any reconnect attempts.
    pub fn stream_without_reconnect(
        &self,
        app_id: &str,
        auth_token: &str,
    ) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ConsumerError>) {
        let (out_tx, out_rx) = mpsc::channel(1);
        let errors = self.spawn_stream(
            format!("/apps/{app_id}/stream"),
            auth_token.to_string(),
            Sink::Envelopes(out_tx),
            RetryPolicy::single_attempt(),
        );
        (out_rx, errors)
    }

    /// Stream the whole platform firehose for a subscription id. All
    /// clients sharing an id split the stream between them.
    pub fn firehose(
        &self,
        subscription_id: &str,
        auth_token: &str,
    ) -> (mpsc::Receiver<Envelope>, mpsc::Receiver<ConsumerError>) {
        let (out_tx, out_rx) = mpsc::channel(1);
        let errors = self.spawn_stream(
            format!("/firehose/{subscription_id}"),
            auth_token.to_string(),
            Sink::Envelopes(out_tx),
            RetryPolicy::reconnecting(),
        );
        (out_rx, errors)
    }

    /// Close the live connection and stop all pending retries.
    ///
    /// Safe to call while a read is blocked; the blocked read loop ends
    /// promptly and without surfacing an error. Returns
    /// [`ConsumerError::ConnectionDoesNotExist`] if no connection is
    /// live — the consumer is still marked closed in that case.
    pub async fn close(&self) -> Result<(), ConsumerError> {
        self.closed.store(true, Ordering::SeqCst);
        self.stop.cancel();
        let mut active = self.active.lock().await;
        match active.take() {
            Some(shutdown) => {
                let _ = shutdown.send(true);
                Ok(())
            }
            None => Err(ConsumerError::ConnectionDoesNotExist),
        }
    }

    /// Whether [`Consumer::close`] has been called.
    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub(crate) fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn spawn_stream(
        &self,
        path: String,
        auth_token: String,
        sink: Sink,
        policy: RetryPolicy,
    ) -> mpsc::Receiver<ConsumerError> {
        let (err_tx, err_rx) = mpsc::channel(1);

        let connected = Arc::new(AtomicBool::new(false));
        // Compose the retry wrapper's counter-reset with the user's
        // callback for the duration of this stream only.
        let on_connect: OnConnect = {
            let connected = Arc::clone(&connected);
            let user_callback = self.on_connect.clone();
            Arc::new(move || {
                connected.store(true, Ordering::SeqCst);
                if let Some(callback) = &user_callback {
                    callback();
                }
            })
        };

        let consumer = self.clone();
        let stop = self.stop.clone();
        tokio::spawn(async move {
            run_with_retry(policy, stop, err_tx, connected, move || {
                let consumer = consumer.clone();
                let path = path.clone();
                let auth_token = auth_token.clone();
                let sink = sink.clone();
                let on_connect = Arc::clone(&on_connect);
                async move { consumer.stream_once(&path, &auth_token, &sink, &on_connect).await }
            })
            .await;
        });
        err_rx
    }

    /// One full connect-and-read attempt.
    async fn stream_once(
        &self,
        path: &str,
        auth_token: &str,
        sink: &Sink,
        on_connect: &OnConnect,
    ) -> Result<(), ConsumerError> {
        let (ws, shutdown) = {
            let mut active = self.active.lock().await;
            if self.closed() {
                return Ok(());
            }
            let ws = establish(&self.endpoint, path, auth_token, self.proxy.as_ref()).await?;
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            *active = Some(shutdown_tx);
            (ws, shutdown_rx)
        };

        // The handshake succeeded; this must not fire on any failure path.
        on_connect();

        let result = self.read_loop(ws, shutdown, sink).await;
        *self.active.lock().await = None;
        result
    }

    /// Frame reader: decode each binary frame, skip undecodable ones,
    /// and end only on connection-level conditions.
    async fn read_loop(
        &self,
        mut ws: WsStream,
        mut shutdown: watch::Receiver<bool>,
        sink: &Sink,
    ) -> Result<(), ConsumerError> {
        enum ReadEvent {
            Shutdown,
            IdleTimeout,
            Frame(Option<Result<Message, tokio_tungstenite::tungstenite::Error>>),
        }

        loop {
            let event = tokio::select! {
                biased;
                _ = shutdown.changed() => ReadEvent::Shutdown,
                () = idle_deadline(self.idle_timeout) => ReadEvent::IdleTimeout,
                message = ws.next() => ReadEvent::Frame(message),
            };

            let message = match event {
                ReadEvent::Shutdown => {
                    let _ = ws.close(None).await;
                    return Ok(());
                }
                ReadEvent::IdleTimeout => {
                    let _ = ws.close(None).await;
                    return Err(ConsumerError::Transport { detail: "read timed out".into() });
                }
                ReadEvent::Frame(message) => message,
            };

            match message {
                Some(Ok(Message::Binary(frame))) => match Envelope::decode(frame.as_slice()) {
                    Ok(envelope) => {
                        if sink.deliver(envelope).await.is_err() {
                            // The caller dropped its receiver; shut the
                            // whole stream down rather than retrying.
                            self.stop.cancel();
                            let _ = ws.close(None).await;
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "skipping undecodable frame");
                    }
                },
                Some(Ok(Message::Close(_))) => return Err(ConsumerError::StreamClosed),
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    if self.closed() {
                        return Ok(());
                    }
                    return Err(ConsumerError::Transport { detail: e.to_string() });
                }
                None => {
                    if self.closed() {
                        return Ok(());
                    }
                    return Err(ConsumerError::StreamClosed);
                }
            }
        }
    }
}

/// Pending forever when no idle timeout is configured.
async fn idle_deadline(timeout: Option<Duration>) {
    match timeout {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Stream multiplexer: where decoded envelopes go.
#[derive(Clone)]
enum Sink {
    /// Logs-only mode: forward `LogMessage` payloads, silently discard
    /// every other envelope type.
    Logs(mpsc::Sender<LogMessage>),
    /// Firehose mode: forward every envelope unfiltered.
    Envelopes(mpsc::Sender<Envelope>),
}

impl Sink {
    /// Blocking handoff to the caller; `Err` means the receiver is gone.
    async fn deliver(&self, envelope: Envelope) -> Result<(), ()> {
        match self {
            Sink::Logs(tx) => {
                if envelope.is_log_message() {
                    if let Some(log) = envelope.log_message {
                        return tx.send(log).await.map_err(|_| ());
                    }
                }
                Ok(())
            }
            Sink::Envelopes(tx) => tx.send(envelope).await.map_err(|_| ()),
        }
    }
}
