//! The bridge controller.
//!
//! Owns the lifecycle state machine: authenticate, dial, run the session,
//! consume internal events, reconnect under backoff or latch on kickout.
//! Everything else in the crate is driven from here.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::auth::Authenticator;
use crate::backoff::retry_with_backoff;
use crate::config::{ReconnectConfig, SessionConfig};
use crate::error::{BridgeError, Result};
use crate::events::{Event, EventSender};
use crate::handler::Dispatcher;
use crate::session::{Session, WsStream};
use crate::tool_client::{ToolServerClient, ToolService};

/// How often a still-disconnected bridge forces a reconnect attempt.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(300);

/// Connection state of the bridge. `Kickout` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    /// No live session; eligible for reconnection.
    Disconnected,
    /// Registration or dial in progress.
    Connecting,
    /// A session is live and dispatching.
    Connected,
    /// The gateway terminated this client; no further reconnects.
    Kickout,
}

/// The bridge runtime. Construct through
/// [`BridgeBuilder`](crate::BridgeBuilder), then call [`run`](Bridge::run).
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<Inner>,
}

struct Inner {
    auth: Mutex<Authenticator>,
    tool_server_endpoint: String,
    session_config: SessionConfig,
    reconnect_config: ReconnectConfig,
    status: RwLock<BridgeStatus>,
    /// Created lazily on the first reconnect and reused across reconnects;
    /// released on kickout or shutdown. May be pre-seeded with an embedded
    /// tool host by the builder.
    tools: Mutex<Option<Arc<dyn ToolService>>>,
    session: Mutex<Option<Arc<Session>>>,
    events_tx: mpsc::Sender<Event>,
    events_rx: Mutex<Option<mpsc::Receiver<Event>>>,
    stop: CancellationToken,
}

impl Bridge {
    pub(crate) fn new(
        auth: Authenticator,
        tool_server_endpoint: String,
        session_config: SessionConfig,
        reconnect_config: ReconnectConfig,
        tools: Option<Arc<dyn ToolService>>,
    ) -> Self {
        // Capacity one: duplicate lifecycle signals coalesce.
        let (events_tx, events_rx) = mpsc::channel(1);
        Self {
            inner: Arc::new(Inner {
                auth: Mutex::new(auth),
                tool_server_endpoint,
                session_config,
                reconnect_config,
                status: RwLock::new(BridgeStatus::Disconnected),
                tools: Mutex::new(tools),
                session: Mutex::new(None),
                events_tx,
                events_rx: Mutex::new(Some(events_rx)),
                stop: CancellationToken::new(),
            }),
        }
    }

    /// Start the bridge: health-check timer, event loop, then one
    /// synchronous connection attempt whose error is returned to the caller.
    /// Later failures are retried in the background.
    pub async fn run(&self) -> Result<()> {
        self.inner.spawn_health_check();
        self.inner.spawn_event_loop();
        self.inner.reconnect().await
    }

    /// Current connection state.
    pub async fn status(&self) -> BridgeStatus {
        self.inner.status().await
    }

    /// Cancelled when the bridge stops for good (kickout or
    /// [`shutdown`](Bridge::shutdown)).
    pub fn stopped(&self) -> CancellationToken {
        self.inner.stop.clone()
    }

    /// Tear the bridge down: close the session, release the tool-server
    /// client and cancel every task the bridge spawned.
    pub async fn shutdown(&self) {
        info!("bridge shutting down");
        self.inner.close_session().await;
        if let Some(tools) = self.inner.tools.lock().await.take() {
            tools.close().await;
        }
        self.inner.auth.lock().await.clear();
        self.inner.stop.cancel();
    }
}

impl Inner {
    fn events(&self) -> EventSender {
        EventSender::new(self.events_tx.clone(), self.stop.clone())
    }

    async fn status(&self) -> BridgeStatus {
        *self.status.read().await
    }

    async fn set_status(&self, status: BridgeStatus) {
        let mut guard = self.status.write().await;
        debug!(from = ?*guard, to = ?status, "bridge status transition");
        *guard = status;
    }

    fn spawn_health_check(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_CHECK_INTERVAL);
            ticker.tick().await; // the first tick fires immediately
            loop {
                tokio::select! {
                    _ = inner.stop.cancelled() => return,
                    _ = ticker.tick() => {
                        if inner.status().await == BridgeStatus::Disconnected {
                            warn!("still disconnected at health check, reconnecting");
                            if let Err(err) = inner.reconnect().await {
                                error!(%err, "health-check reconnect failed");
                            }
                        }
                    }
                }
            }
        });
    }

    fn spawn_event_loop(self: &Arc<Self>) {
        let inner = self.clone();
        tokio::spawn(async move {
            let rx = inner.events_rx.lock().await.take();
            let Some(mut rx) = rx else {
                warn!("event loop is already running");
                return;
            };

            loop {
                let event = tokio::select! {
                    _ = inner.stop.cancelled() => {
                        debug!("event loop stopping");
                        return;
                    }
                    maybe = rx.recv() => match maybe {
                        Some(event) => event,
                        None => return,
                    },
                };

                match event {
                    Event::Migrate => {
                        // Teardown only: the session's exit emits the
                        // Disconnect that drives the actual reconnection.
                        inner.teardown().await;
                    }
                    Event::Disconnect => {
                        inner.teardown().await;
                        let policy = inner.reconnect_config.clone();
                        let result = retry_with_backoff(&policy, || {
                            let inner = inner.clone();
                            async move { inner.reconnect().await }
                        })
                        .await;
                        if let Err(err) = result {
                            error!(%err, "reconnection abandoned");
                        }
                    }
                    Event::Kickout => {
                        inner.kickout().await;
                        return;
                    }
                }
            }
        });
    }

    /// One connection attempt. A no-op unless the bridge is currently
    /// disconnected; on any failure the status rolls back to disconnected.
    async fn reconnect(self: &Arc<Self>) -> Result<()> {
        let status = self.status().await;
        if status != BridgeStatus::Disconnected {
            warn!(?status, "not disconnected, skipping reconnect");
            return Ok(());
        }

        // A previous attempt may have left a stale session behind.
        self.close_session().await;

        {
            let mut tools = self.tools.lock().await;
            if tools.is_none() {
                let client = ToolServerClient::connect(&self.tool_server_endpoint).await?;
                *tools = Some(Arc::new(client));
            }
        }

        self.set_status(BridgeStatus::Connecting).await;

        match self.dial().await {
            Ok(stream) => {
                let inner = self.clone();
                tokio::spawn(async move { inner.listener(stream).await });
                Ok(())
            }
            Err(err) => {
                self.set_status(BridgeStatus::Disconnected).await;
                Err(err)
            }
        }
    }

    /// Register, then upgrade the WebSocket with the signed header set.
    async fn dial(&self) -> Result<WsStream> {
        let (url, headers) = {
            let mut auth = self.auth.lock().await;
            auth.authenticate().await?;
            auth.connect_request()?
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| BridgeError::DialFailed(e.to_string()))?;
        for (name, value) in &headers {
            let value = http::HeaderValue::from_str(value)
                .map_err(|e| BridgeError::DialFailed(format!("bad header {name}: {e}")))?;
            request
                .headers_mut()
                .insert(http::HeaderName::from_static(name), value);
        }

        info!(%url, "dialing gateway");
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| BridgeError::DialFailed(e.to_string()))?;
        debug!(status = %response.status(), "websocket upgrade accepted");
        Ok(stream)
    }

    /// Run one session to completion: write pump on its own task, read pump
    /// inline, Disconnect event on the way out.
    async fn listener(self: Arc<Self>, stream: WsStream) {
        let token = self.auth.lock().await.token().map(str::to_owned);
        let tools = self.tools.lock().await.clone();
        let (Some(token), Some(tools)) = (token, tools) else {
            // Torn down between dial and listener start-up.
            warn!("session prerequisites vanished before start, disconnecting");
            self.events().send(Event::Disconnect);
            return;
        };

        let (session, outbound_rx) = Session::new(&self.session_config, self.stop.child_token());
        *self.session.lock().await = Some(session.clone());

        info!("session connected");
        self.set_status(BridgeStatus::Connected).await;

        let dispatcher = Dispatcher::new(tools, token, self.events());
        let (sink, inbound) = stream.split();
        let writer = tokio::spawn(session.clone().write_pump(
            self.session_config.clone(),
            sink,
            outbound_rx,
        ));

        session.read_pump(self.session_config.clone(), inbound, dispatcher).await;

        session.shutdown();
        let _ = writer.await;
        info!("session disconnected");
        self.events().send(Event::Disconnect);
    }

    /// Shut the current session down, if any.
    async fn close_session(&self) {
        if let Some(session) = self.session.lock().await.take() {
            session.shutdown();
        }
    }

    /// Move to disconnected and drop the session. The tool-server client
    /// survives: it dials the local process and is reused on reconnect.
    async fn teardown(&self) {
        if self.status().await == BridgeStatus::Disconnected {
            return;
        }
        self.set_status(BridgeStatus::Disconnected).await;
        self.close_session().await;
    }

    /// Terminal teardown: latch the status and cancel the stop token so the
    /// health check, event loop and any session pumps all exit.
    async fn kickout(&self) {
        warn!("kicked out by gateway, bridge is terminating");
        self.set_status(BridgeStatus::Kickout).await;
        self.close_session().await;
        if let Some(tools) = self.tools.lock().await.take() {
            tools.close().await;
        }
        self.auth.lock().await.clear();
        self.stop.cancel();
    }
}
