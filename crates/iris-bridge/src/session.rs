//! A single live WebSocket session.
//!
//! The session owns one connection and runs two pumps. The write pump drains
//! a bounded outbound queue and drives the periodic ping; the read pump
//! delivers inbound frames to the dispatcher under a rate-limited read
//! deadline. Either pump terminating shuts the session down; a session is
//! never reused.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::SessionConfig;
use crate::error::{BridgeError, Result};
use crate::handler::Dispatcher;

const STATUS_NORMAL: u32 = 1;
const STATUS_STOP: u32 = 2;

/// How often the read deadline may actually be moved forward.
const DEADLINE_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

pub(crate) type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One queued outbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Close,
}

/// Handle to a live WebSocket session.
///
/// Cheap to clone through an [`Arc`]; producers enqueue frames while the
/// write pump is the sole consumer. Once the session has shut down, every
/// write fails with [`BridgeError::SessionClosed`].
pub struct Session {
    outbound: mpsc::Sender<Frame>,
    status: AtomicU32,
    cancel: CancellationToken,
}

impl Session {
    /// Create the session handle and the queue consumed by its write pump.
    pub(crate) fn new(
        config: &SessionConfig,
        cancel: CancellationToken,
    ) -> (Arc<Self>, mpsc::Receiver<Frame>) {
        let (outbound, rx) = mpsc::channel(config.outbound_buffer);
        let session = Arc::new(Self {
            outbound,
            status: AtomicU32::new(STATUS_NORMAL),
            cancel,
        });
        (session, rx)
    }

    /// Whether the session has been shut down.
    pub fn is_closed(&self) -> bool {
        self.status.load(Ordering::SeqCst) == STATUS_STOP
    }

    /// Enqueue a text frame.
    pub async fn write(&self, msg: impl Into<String>) -> Result<()> {
        self.enqueue(Frame::Text(msg.into())).await
    }

    /// Enqueue a binary frame.
    pub async fn write_binary(&self, msg: impl Into<Vec<u8>>) -> Result<()> {
        self.enqueue(Frame::Binary(msg.into())).await
    }

    /// Enqueue a close frame; the write pump exits after sending it.
    pub async fn close(&self) -> Result<()> {
        self.enqueue(Frame::Close).await
    }

    async fn enqueue(&self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::SessionClosed);
        }
        // Blocks only while the queue is full. An error here means the
        // write pump tore the queue down while we were waiting.
        self.outbound
            .send(frame)
            .await
            .map_err(|_| BridgeError::WriteClosed)
    }

    /// Terminate the session exactly once: latch the status and cancel both
    /// pumps, which drop their socket halves. Subsequent calls are no-ops.
    pub(crate) fn shutdown(&self) {
        if self.status.swap(STATUS_STOP, Ordering::SeqCst) == STATUS_STOP {
            return;
        }
        self.cancel.cancel();
        debug!("session shut down");
    }

    /// Drain the outbound queue onto the socket and drive the ping cycle.
    pub(crate) async fn write_pump(
        self: Arc<Self>,
        config: SessionConfig,
        mut sink: SplitSink<WsStream, Message>,
        mut rx: mpsc::Receiver<Frame>,
    ) {
        let mut ping = tokio::time::interval(config.ping_period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // An interval's first tick fires immediately; swallow it so the
        // first ping goes out one full period after connect.
        ping.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("write pump cancelled");
                    break;
                }
                maybe = rx.recv() => {
                    let Some(frame) = maybe else { break };
                    let (message, is_close) = match frame {
                        Frame::Text(text) => (Message::Text(text.into()), false),
                        Frame::Binary(bytes) => (Message::Binary(bytes.into()), false),
                        Frame::Close => (Message::Close(None), true),
                    };
                    if let Err(err) = write_frame(&mut sink, message, config.write_wait).await {
                        error!(%err, "write failed, terminating session");
                        break;
                    }
                    if is_close {
                        break;
                    }
                }
                _ = ping.tick() => {
                    if let Err(err) =
                        write_frame(&mut sink, Message::Ping(Vec::new().into()), config.write_wait).await
                    {
                        error!(%err, "ping failed, terminating session");
                        break;
                    }
                    debug!("ping sent");
                }
            }
        }

        self.shutdown();
        rx.close();
        let _ = sink.close().await;
    }

    /// Read frames until cancellation, deadline, EOF or error, handing each
    /// one to the dispatcher. Runs on the listener task; a slow tool call
    /// therefore serialises subsequent reads on this connection.
    pub(crate) async fn read_pump(
        self: &Arc<Self>,
        config: SessionConfig,
        mut stream: SplitStream<WsStream>,
        dispatcher: Dispatcher,
    ) {
        let mut deadline = Instant::now() + config.read_deadline();
        let mut last_refresh = Instant::now();

        loop {
            if self.is_closed() {
                break;
            }

            let message = tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("read pump cancelled");
                    break;
                }
                next = timeout_at(deadline, stream.next()) => match next {
                    Err(_) => {
                        error!("read deadline exceeded, terminating session");
                        break;
                    }
                    Ok(None) => {
                        warn!("connection closed by peer");
                        break;
                    }
                    Ok(Some(Err(err))) => {
                        error!(%err, "read failed, terminating session");
                        break;
                    }
                    Ok(Some(Ok(message))) => message,
                },
            };

            // Any inbound frame is proof of life, but moving the deadline
            // is rate-limited so a chatty gateway does not turn every frame
            // into timer churn.
            let now = Instant::now();
            if now.duration_since(last_refresh) >= DEADLINE_REFRESH_INTERVAL {
                last_refresh = now;
                deadline = now + config.read_deadline();
            }

            match message {
                Message::Text(text) => {
                    if self.oversized(&config, text.len()) {
                        break;
                    }
                    self.deliver(&dispatcher, text.as_bytes()).await;
                }
                Message::Binary(bytes) => {
                    if self.oversized(&config, bytes.len()) {
                        break;
                    }
                    self.deliver(&dispatcher, &bytes).await;
                }
                Message::Pong(_) => debug!("pong received"),
                // tungstenite answers pings internally on the next flush.
                Message::Ping(_) => debug!("ping received"),
                Message::Close(frame) => {
                    debug!(?frame, "close frame received");
                    break;
                }
                _ => {}
            }
        }

        self.shutdown();
    }

    fn oversized(&self, config: &SessionConfig, len: usize) -> bool {
        match config.max_message_size {
            Some(max) if len > max => {
                error!(len, max, "frame exceeds message size limit");
                true
            }
            _ => false,
        }
    }

    async fn deliver(&self, dispatcher: &Dispatcher, payload: &[u8]) {
        if let Some(reply) = dispatcher.dispatch(payload).await {
            if let Err(err) = self.write_binary(reply.into_bytes()).await {
                warn!(%err, "failed to enqueue reply");
            }
        }
    }
}

async fn write_frame(
    sink: &mut SplitSink<WsStream, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<()> {
    match timeout(write_wait, sink.send(message)).await {
        Err(_) => Err(BridgeError::Socket("write deadline exceeded".into())),
        Ok(Err(err)) => Err(BridgeError::Socket(err.to_string())),
        Ok(Ok(())) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (Arc<Session>, mpsc::Receiver<Frame>) {
        Session::new(&SessionConfig::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn writes_are_queued_in_order() {
        let (session, mut rx) = session();
        session.write("a").await.unwrap();
        session.write_binary(vec![1, 2]).await.unwrap();
        session.close().await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Frame::Text("a".into()));
        assert_eq!(rx.recv().await.unwrap(), Frame::Binary(vec![1, 2]));
        assert_eq!(rx.recv().await.unwrap(), Frame::Close);
    }

    #[tokio::test]
    async fn enqueue_after_shutdown_returns_session_closed() {
        let (session, mut rx) = session();
        session.shutdown();

        assert!(matches!(
            session.write("late").await,
            Err(BridgeError::SessionClosed)
        ));
        assert!(matches!(
            session.write_binary(vec![0]).await,
            Err(BridgeError::SessionClosed)
        ));
        assert!(matches!(session.close().await, Err(BridgeError::SessionClosed)));

        // Nothing reached the queue.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn shutdown_is_one_shot_and_cancels() {
        let cancel = CancellationToken::new();
        let (session, _rx) = Session::new(&SessionConfig::default(), cancel.clone());

        assert!(!session.is_closed());
        session.shutdown();
        session.shutdown();
        assert!(session.is_closed());
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn torn_down_queue_reports_write_closed() {
        let (session, rx) = session();
        drop(rx);
        assert!(matches!(
            session.write("orphan").await,
            Err(BridgeError::WriteClosed)
        ));
    }
}
