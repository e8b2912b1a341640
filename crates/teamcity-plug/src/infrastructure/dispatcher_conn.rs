//! Persistent WebSocket connection to the job dispatcher.
//!
//! The plug dials out (the dispatcher never connects to us), announces itself
//! with a login and a register message, and then serves requests until the
//! connection drops.  Lost or failed connections are retried forever with a
//! fixed delay:
//!
//! ```text
//!              ┌────────── retry interval ──────────┐
//!              ▼                                    │
//! Disconnected ──► Connecting ──► Connected ──► Disconnected
//!                      │                            ▲
//!                      └──── handshake failed ──────┘
//! ```
//!
//! # Concurrency
//!
//! Every inbound text frame is handled on its own Tokio task, so a slow
//! TeamCity call never stalls the reader.  Replies go out through one shared
//! sink behind a `tokio::sync::Mutex` as soon as they are ready, in whatever
//! order the builds finish.  The dispatcher correlates them by `requestId`.
//!
//! # Shutdown
//!
//! [`ConnectionManager::shutdown`] clears a shared `AtomicBool`.  The retry
//! wait and the read loop both poll it every 200 ms and return, after which
//! [`ConnectionManager::run`] exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use plug_core::{decode_request_id, PlugResponse};
use rustls::ClientConfig;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio::time::{timeout, Instant};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::application::RequestDispatcher;
use crate::domain::DispatcherConfig;
use crate::infrastructure::tls::dispatcher_tls_config;

/// How often blocking waits re-check the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// A live dispatcher connection, `ws://` or `wss://`.
pub type DispatcherStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

type SharedSink = Arc<Mutex<SplitSink<DispatcherStream, WsMessage>>>;

/// Transport failures.  All of them are retried; none is fatal.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not connect to dispatcher at {url}: {source}")]
    WebSocket {
        url: String,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },

    #[error("could not build TLS configuration: {0}")]
    Tls(#[from] rustls::Error),

    #[error("could not send {step} message: {source}")]
    HandshakeSend {
        step: &'static str,
        #[source]
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
}

/// Observable lifecycle of the dispatcher connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the dispatcher connection and its retry loop.
pub struct ConnectionManager {
    config: DispatcherConfig,
    dispatcher: RequestDispatcher,
    tls: Arc<ClientConfig>,
    /// Set while a `connect_with_retry` call is in flight.
    connecting: AtomicBool,
    running: AtomicBool,
    state: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    /// # Errors
    ///
    /// Returns [`ConnectionError::Tls`] if the TLS client configuration cannot
    /// be built.
    pub fn new(
        config: DispatcherConfig,
        dispatcher: RequestDispatcher,
    ) -> Result<Self, ConnectionError> {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            config,
            dispatcher,
            tls: dispatcher_tls_config()?,
            connecting: AtomicBool::new(false),
            running: AtomicBool::new(true),
            state,
        })
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stops the retry loop and the read loop.  Idempotent.
    pub fn shutdown(&self) {
        if self.running.swap(false, Ordering::Relaxed) {
            info!("dispatcher connection shutting down");
        }
    }

    /// Connects and serves, reconnecting after every drop, until shutdown.
    ///
    /// If another [`connect_with_retry`](Self::connect_with_retry) call is in
    /// flight, waits for it to finish and then makes its own attempt.
    pub async fn run(&self) {
        info!("dispatcher connection manager started for {}", self.config.url);

        while self.is_running() {
            let Some(stream) = self.connect_with_retry().await else {
                if self.is_running() {
                    debug!("waiting for the in-flight connection attempt");
                    self.pause(SHUTDOWN_POLL).await;
                }
                continue;
            };
            self.serve(stream).await;
            if self.is_running() {
                info!("dispatcher connection lost; reconnecting");
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("dispatcher connection manager stopped");
    }

    /// Connects, logs in and registers, retrying every `retry_interval` until
    /// it succeeds.
    ///
    /// Returns `None` without connecting if another call is already in flight,
    /// or if shutdown was requested before a connection was made.
    pub async fn connect_with_retry(&self) -> Option<DispatcherStream> {
        if self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connection attempt already in progress");
            return None;
        }
        let _guard = ConnectingGuard(&self.connecting);

        let mut attempt: u64 = 0;
        while self.is_running() {
            attempt += 1;
            self.set_state(ConnectionState::Connecting);

            match self.connect_once().await {
                Ok(stream) => {
                    self.set_state(ConnectionState::Connected);
                    info!(
                        "connected to dispatcher at {} as {:?}",
                        self.config.url, self.config.plug_name
                    );
                    return Some(stream);
                }
                Err(e) => {
                    self.set_state(ConnectionState::Disconnected);
                    warn!(
                        "connection attempt {attempt} failed: {e}; retrying in {:?}",
                        self.config.retry_interval
                    );
                    self.pause(self.config.retry_interval).await;
                }
            }
        }
        None
    }

    /// Reads frames until the dispatcher closes the connection, a read fails,
    /// or shutdown is requested.
    pub async fn serve(&self, stream: DispatcherStream) {
        let (sink, mut source) = stream.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        while self.is_running() {
            let frame = match timeout(SHUTDOWN_POLL, source.next()).await {
                Err(_) => continue,
                Ok(None) => {
                    info!("dispatcher stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!("dispatcher read failed: {e}");
                    break;
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                WsMessage::Text(raw) => self.spawn_dispatch(raw, Arc::clone(&sink)),
                WsMessage::Close(close) => {
                    info!("dispatcher closed the connection: {close:?}");
                    break;
                }
                WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                WsMessage::Frame(_) => debug!("raw frame ignored"),
            }
        }

        self.set_state(ConnectionState::Disconnected);
    }

    async fn connect_once(&self) -> Result<DispatcherStream, ConnectionError> {
        let connector = Connector::Rustls(Arc::clone(&self.tls));
        let (mut stream, _response) =
            connect_async_tls_with_config(self.config.url.as_str(), None, false, Some(connector))
                .await
                .map_err(|source| ConnectionError::WebSocket {
                    url: self.config.url.clone(),
                    source: Box::new(source),
                })?;

        let session = self.config.session();
        send_handshake(&mut stream, "login", session.login_message()).await?;
        send_handshake(&mut stream, "register", session.register_message()).await?;
        Ok(stream)
    }

    fn spawn_dispatch(&self, raw: String, sink: SharedSink) {
        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let request_id = decode_request_id(&raw);

            // A panicking handler still owes the dispatcher a reply.
            let handler = tokio::spawn(async move { dispatcher.process_message(&raw).await });
            let response = match handler.await {
                Ok(response) => response,
                Err(e) => {
                    error!("handler for request {request_id:?} aborted: {e}");
                    PlugResponse::Error {
                        request_id,
                        message: "internal error while processing the request".to_string(),
                    }
                }
            };

            let mut sink = sink.lock().await;
            if let Err(e) = sink.send(WsMessage::Text(response.encode())).await {
                warn!(
                    "could not send response for request {:?}: {e}",
                    response.request_id()
                );
            }
        });
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!("dispatcher connection {previous:?} -> {next:?}");
        }
    }

    /// Sleeps for `delay`, returning early on shutdown.
    async fn pause(&self, delay: Duration) {
        let deadline = Instant::now() + delay;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep((deadline - now).min(SHUTDOWN_POLL)).await;
        }
    }
}

async fn send_handshake(
    stream: &mut DispatcherStream,
    step: &'static str,
    message: String,
) -> Result<(), ConnectionError> {
    stream
        .send(WsMessage::Text(message))
        .await
        .map_err(|source| ConnectionError::HandshakeSend {
            step,
            source: Box::new(source),
        })
}

/// Clears the in-flight flag when the attempt ends, however it ends.
struct ConnectingGuard<'a>(&'a AtomicBool);

impl Drop for ConnectingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::build_service::MockBuildService;
    use serde_json::Value;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const WAIT: Duration = Duration::from_secs(5);

    struct PanickingService;

    #[async_trait::async_trait]
    impl crate::application::BuildService for PanickingService {
        async fn queue_build(
            &self,
            _plan_id: &str,
            _update_spec: &str,
            _comment: &str,
            _properties: &std::collections::BTreeMap<String, String>,
        ) -> Result<String, crate::application::BuildServiceError> {
            panic!("simulated handler panic")
        }

        async fn query_status(
            &self,
            _build_id: &str,
        ) -> Result<Option<plug_core::BuildStatus>, crate::application::BuildServiceError> {
            panic!("simulated handler panic")
        }
    }

    fn manager(url: &str, retry: Duration, mock: MockBuildService) -> Arc<ConnectionManager> {
        let mut config = DispatcherConfig::new(url, "tc-plug", "secret-key");
        config.retry_interval = retry;
        let dispatcher = RequestDispatcher::new(Arc::new(mock));
        Arc::new(ConnectionManager::new(config, dispatcher).unwrap())
    }

    async fn listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());
        (listener, url)
    }

    async fn accept(listener: &TcpListener) -> WebSocketStream<TcpStream> {
        let (tcp, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        accept_async(tcp).await.unwrap()
    }

    async fn next_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            let frame = timeout(WAIT, ws.next()).await.unwrap().unwrap().unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    async fn expect_handshake(ws: &mut WebSocketStream<TcpStream>) {
        let login = next_json(ws).await;
        assert_eq!(login["action"], "login");
        assert_eq!(login["key"], "secret-key");

        let register = next_json(ws).await;
        assert_eq!(register["action"], "register");
        assert_eq!(register["type"], "ciPlug");
        assert_eq!(register["name"], "tc-plug");
    }

    async fn stop(manager: &ConnectionManager, runner: tokio::task::JoinHandle<()>) {
        manager.shutdown();
        timeout(WAIT, runner).await.unwrap().unwrap();
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_login_and_register_are_sent_first_then_requests_are_answered() {
        // Arrange
        let (listener, url) = listener().await;
        let mut mock = MockBuildService::new();
        mock.expect_queue_build()
            .times(1)
            .returning(|_, _, _, _| Ok("77".to_string()));
        let manager = manager(&url, Duration::from_millis(50), mock);
        let runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        // Act
        let mut ws = accept(&listener).await;
        expect_handshake(&mut ws).await;
        ws.send(WsMessage::Text(
            r#"{"action":"launchplan","requestId":"r-1","planName":"P","objectSpec":"S"}"#
                .to_string(),
        ))
        .await
        .unwrap();
        let reply = next_json(&mut ws).await;

        // Assert
        assert_eq!(reply["requestId"], "r-1");
        assert_eq!(reply["value"], "77");
        assert_eq!(manager.state(), ConnectionState::Connected);

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_unsupported_action_is_answered_on_the_same_connection() {
        let (listener, url) = listener().await;
        let manager = manager(&url, Duration::from_millis(50), MockBuildService::new());
        let runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        let mut ws = accept(&listener).await;
        expect_handshake(&mut ws).await;
        ws.send(WsMessage::Ping(vec![1, 2, 3])).await.unwrap();
        ws.send(WsMessage::Binary(vec![0xff])).await.unwrap();
        ws.send(WsMessage::Text(r#"{"action":"archive","requestId":"x-1"}"#.to_string()))
            .await
            .unwrap();
        let reply = next_json(&mut ws).await;

        assert_eq!(reply["requestId"], "x-1");
        assert_eq!(reply["error"], "The action 'archive' is not supported");

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_panicking_handler_still_gets_an_error_reply() {
        let (listener, url) = listener().await;
        let mut config = DispatcherConfig::new(&url, "tc-plug", "secret-key");
        config.retry_interval = Duration::from_millis(50);
        let dispatcher = RequestDispatcher::new(Arc::new(PanickingService));
        let manager = Arc::new(ConnectionManager::new(config, dispatcher).unwrap());
        let runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        let mut ws = accept(&listener).await;
        expect_handshake(&mut ws).await;
        ws.send(WsMessage::Text(
            r#"{"action":"getstatus","requestId":"p-1","planName":"P","executionId":"1"}"#
                .to_string(),
        ))
        .await
        .unwrap();
        let reply = next_json(&mut ws).await;

        assert_eq!(reply["requestId"], "p-1");
        assert!(reply["error"].is_string());

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_server_close_triggers_reconnect_with_fresh_handshake() {
        // Arrange
        let (listener, url) = listener().await;
        let manager = manager(&url, Duration::from_millis(50), MockBuildService::new());
        let mut states = manager.subscribe();
        let runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        let mut first = accept(&listener).await;
        expect_handshake(&mut first).await;

        // Act: the dispatcher hangs up
        first.close(None).await.unwrap();

        // Assert: the plug comes back and announces itself again
        let mut second = accept(&listener).await;
        expect_handshake(&mut second).await;
        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_failed_handshake_is_retried_after_the_fixed_interval() {
        // Arrange: the first TCP connection is dropped before the upgrade
        let (listener, url) = listener().await;
        let retry = Duration::from_millis(400);
        let manager = manager(&url, retry, MockBuildService::new());
        let runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        // Act
        let (dropped, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
        let first_attempt = Instant::now();
        drop(dropped);
        let mut ws = accept(&listener).await;
        let second_attempt = Instant::now();

        // Assert
        assert!(
            second_attempt - first_attempt >= retry - Duration::from_millis(50),
            "retried after {:?}",
            second_attempt - first_attempt
        );
        expect_handshake(&mut ws).await;

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_second_connect_call_while_one_is_in_flight_is_a_no_op() {
        // Arrange: nothing listens on this port, so the first call keeps retrying
        let (listener, url) = listener().await;
        drop(listener);
        let manager = manager(&url, Duration::from_secs(10), MockBuildService::new());
        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.connect_with_retry().await.is_some() }
        });
        timeout(WAIT, async {
            while !manager.connecting.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Act
        let second = timeout(WAIT, manager.connect_with_retry()).await.unwrap();

        // Assert
        assert!(second.is_none());
        manager.shutdown();
        let first_connected = timeout(WAIT, first).await.unwrap().unwrap();
        assert!(!first_connected);
    }

    #[tokio::test]
    async fn test_run_waits_out_an_in_flight_attempt_and_then_connects_itself() {
        // Arrange: the listener does not accept yet, so the first caller's
        // handshake stays pending with the in-flight flag held
        let (listener, url) = listener().await;
        let manager = manager(&url, Duration::from_secs(10), MockBuildService::new());
        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.connect_with_retry().await.is_some() }
        });
        timeout(WAIT, async {
            while !manager.connecting.load(Ordering::Acquire) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // Act
        let mut runner = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.run().await }
        });

        // Assert: run keeps going while the other attempt holds the flag
        assert!(timeout(Duration::from_secs(1), &mut runner).await.is_err());
        assert!(manager.is_running());

        let mut first_ws = accept(&listener).await;
        expect_handshake(&mut first_ws).await;
        assert!(timeout(WAIT, first).await.unwrap().unwrap());

        // Then run makes its own connection and handshake
        let mut ws = accept(&listener).await;
        expect_handshake(&mut ws).await;
        let mut states = manager.subscribe();
        timeout(WAIT, states.wait_for(|s| *s == ConnectionState::Connected))
            .await
            .unwrap()
            .unwrap();

        stop(&manager, runner).await;
    }

    #[tokio::test]
    async fn test_connect_after_shutdown_returns_none_immediately() {
        let manager = manager("ws://127.0.0.1:9", Duration::from_secs(10), MockBuildService::new());
        manager.shutdown();

        let stream = timeout(WAIT, manager.connect_with_retry()).await.unwrap();

        assert!(stream.is_none());
        assert!(!manager.is_running());
    }

    #[test]
    fn test_connection_error_names_the_failed_step() {
        let err = ConnectionError::HandshakeSend {
            step: "register",
            source: Box::new(tokio_tungstenite::tungstenite::Error::ConnectionClosed),
        };
        assert!(err.to_string().starts_with("could not send register message"));
    }
}
