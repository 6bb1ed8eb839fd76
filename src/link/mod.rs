//! Connection lifecycle and the WebSocket transport. The manager owns the
//! Closed → Connecting → Open → Closing state machine and hands wire frames
//! to a pump task over a channel; lifecycle transitions come back as
//! [`LinkEvent`]s applied by the session loop, the sole state writer.

use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::protocol::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Closed,
    Connecting,
    Open,
    Closing,
}

/// Lifecycle and traffic events surfaced by the transport pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Opened,
    Inbound(String),
    /// The channel is gone. `error` distinguishes failures from clean closes.
    Closed { error: Option<String> },
}

/// Frames handed from the manager to the pump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("channel is not open")]
    ChannelNotOpen,
}

/// Everything a dialer needs to run one connection attempt.
pub struct DialContext {
    pub url: String,
    pub token: Option<String>,
    pub connect_timeout: Duration,
    pub outbound: mpsc::UnboundedReceiver<Frame>,
    pub events: mpsc::UnboundedSender<LinkEvent>,
}

/// Seam between the manager and the concrete transport; tests swap in a
/// scripted dialer.
pub trait Dialer: Send {
    fn dial(&mut self, ctx: DialContext);
}

/// Dials the real WebSocket endpoint on a spawned task.
pub struct WsDialer;

impl Dialer for WsDialer {
    fn dial(&mut self, ctx: DialContext) {
        tokio::spawn(connect_and_pump(ctx));
    }
}

pub struct ConnectionManager {
    url: String,
    token: Option<String>,
    connect_timeout: Duration,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    events: mpsc::UnboundedSender<LinkEvent>,
    dialer: Box<dyn Dialer>,
}

impl ConnectionManager {
    pub fn new(
        url: String,
        token: Option<String>,
        connect_timeout: Duration,
        events: mpsc::UnboundedSender<LinkEvent>,
        dialer: Box<dyn Dialer>,
    ) -> Self {
        Self {
            url,
            token,
            connect_timeout,
            state: ConnectionState::Closed,
            outbound: None,
            events,
            dialer,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Starts a connection attempt. Valid only from Closed; anything else is
    /// ignored so two attempts can never run concurrently.
    pub fn open(&mut self) {
        if self.state != ConnectionState::Closed {
            tracing::debug!(state = ?self.state, "open ignored");
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.outbound = Some(tx);
        self.state = ConnectionState::Connecting;
        self.dialer.dial(DialContext {
            url: self.url.clone(),
            token: self.token.clone(),
            connect_timeout: self.connect_timeout,
            outbound: rx,
            events: self.events.clone(),
        });
    }

    /// Requests a close. Valid from Open or Connecting; already Closed or
    /// Closing is ignored.
    pub fn close(&mut self) {
        match self.state {
            ConnectionState::Open | ConnectionState::Connecting => {
                self.state = ConnectionState::Closing;
                if let Some(tx) = &self.outbound {
                    let _ = tx.send(Frame::Close);
                }
            }
            ConnectionState::Closed | ConnectionState::Closing => {
                tracing::debug!(state = ?self.state, "close ignored");
            }
        }
    }

    /// Sends a wire string. Callers pre-gate on state; a send while not Open
    /// is a programming error surfaced as [`LinkError::ChannelNotOpen`].
    pub fn send(&self, text: String) -> Result<(), LinkError> {
        if self.state != ConnectionState::Open {
            return Err(LinkError::ChannelNotOpen);
        }
        let tx = self.outbound.as_ref().ok_or(LinkError::ChannelNotOpen)?;
        tx.send(Frame::Text(text))
            .map_err(|_| LinkError::ChannelNotOpen)
    }

    /// Applies a lifecycle event observed by the session loop.
    pub fn apply(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Opened => {
                // A close requested mid-handshake stays Closing; the pump
                // will process the queued Close frame next.
                if self.state == ConnectionState::Connecting {
                    self.state = ConnectionState::Open;
                }
            }
            LinkEvent::Closed { .. } => {
                self.state = ConnectionState::Closed;
                self.outbound = None;
            }
            LinkEvent::Inbound(_) => {}
        }
    }

    /// Forces Closed when the transport never confirms a close.
    pub fn abort(&mut self) {
        self.outbound = None;
        self.state = ConnectionState::Closed;
    }
}

/// Runs one connection attempt end to end: handshake (bounded by the connect
/// timeout, resolving the caller's wait rather than stalling on an
/// unreachable peer), then the frame pump until either side closes.
async fn connect_and_pump(mut ctx: DialContext) {
    let request = match client_request(&ctx.url, ctx.token.as_deref()) {
        Ok(request) => request,
        Err(err) => {
            let _ = ctx.events.send(LinkEvent::Closed {
                error: Some(err.to_string()),
            });
            return;
        }
    };

    let connect = tokio_tungstenite::connect_async(request);
    let ws = tokio::select! {
        attempt = tokio::time::timeout(ctx.connect_timeout, connect) => match attempt {
            Ok(Ok((ws, _response))) => ws,
            Ok(Err(err)) => {
                tracing::warn!(url = %ctx.url, error = %err, "connect failed");
                let _ = ctx.events.send(LinkEvent::Closed { error: Some(err.to_string()) });
                return;
            }
            Err(_) => {
                tracing::warn!(url = %ctx.url, "connect timed out");
                let _ = ctx.events.send(LinkEvent::Closed { error: Some("connect timed out".to_string()) });
                return;
            }
        },
        frame = ctx.outbound.recv() => {
            // Close requested before the handshake finished.
            if let Some(Frame::Text(text)) = frame {
                tracing::warn!(%text, "outbound text dropped before open");
            }
            let _ = ctx.events.send(LinkEvent::Closed { error: None });
            return;
        }
    };

    let _ = ctx.events.send(LinkEvent::Opened);
    let (tx, rx) = ws.split();
    run_pump(tx, rx, ctx.outbound, ctx.events).await;
}

/// Forwards outbound frames to the sink and inbound text to the event
/// channel until either direction ends. Generic over the sink/stream pair so
/// tests run against in-memory channels.
async fn run_pump<TX, RX, E>(
    mut tx: TX,
    mut rx: RX,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    events: mpsc::UnboundedSender<LinkEvent>,
) where
    TX: Sink<Message> + Unpin,
    TX::Error: std::fmt::Display,
    RX: Stream<Item = Result<Message, E>> + Unpin,
    E: std::fmt::Display,
{
    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(err) = tx.send(Message::Text(text)).await {
                        let _ = events.send(LinkEvent::Closed { error: Some(err.to_string()) });
                        return;
                    }
                }
                Some(Frame::Close) | None => {
                    let _ = tx.send(Message::Close(None)).await;
                    let _ = tx.close().await;
                    let _ = events.send(LinkEvent::Closed { error: None });
                    return;
                }
            },
            message = rx.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = events.send(LinkEvent::Inbound(text));
                }
                Some(Ok(Message::Close(_))) | None => {
                    let _ = events.send(LinkEvent::Closed { error: None });
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    let _ = events.send(LinkEvent::Closed { error: Some(err.to_string()) });
                    return;
                }
            },
        }
    }
}

// The auth token rides as the offered WebSocket subprotocol, matching the
// peer's expectation.
fn client_request(
    url: &str,
    token: Option<&str>,
) -> Result<Request, Box<dyn std::error::Error + Send + Sync>> {
    let mut request = url.into_client_request()?;
    if let Some(token) = token {
        request
            .headers_mut()
            .insert("Sec-WebSocket-Protocol", token.parse()?);
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use tokio_tungstenite::tungstenite::Error as WsError;

    #[derive(Default)]
    struct RecordingDialer {
        dials: Arc<Mutex<Vec<String>>>,
        // Keeps each context (and its outbound receiver) alive so sends on
        // the manager's channel don't fail with a dropped receiver.
        ctxs: Vec<DialContext>,
    }

    impl Dialer for RecordingDialer {
        fn dial(&mut self, ctx: DialContext) {
            self.dials.lock().unwrap().push(ctx.url.clone());
            self.ctxs.push(ctx);
        }
    }

    fn manager(dials: Arc<Mutex<Vec<String>>>) -> (ConnectionManager, mpsc::UnboundedReceiver<LinkEvent>) {
        let (events, event_rx) = mpsc::unbounded_channel();
        let manager = ConnectionManager::new(
            "wss://door.test".to_string(),
            Some("token".to_string()),
            Duration::from_millis(100),
            events,
            Box::new(RecordingDialer { dials, ctxs: Vec::new() }),
        );
        (manager, event_rx)
    }

    #[tokio::test]
    async fn open_is_valid_only_from_closed() {
        let dials = Arc::new(Mutex::new(Vec::new()));
        let (mut manager, _events) = manager(dials.clone());

        manager.open();
        assert_eq!(manager.state(), ConnectionState::Connecting);
        manager.open();
        manager.open();
        assert_eq!(dials.lock().unwrap().len(), 1, "no concurrent attempts");
    }

    #[tokio::test]
    async fn send_is_gated_on_open() {
        let dials = Arc::new(Mutex::new(Vec::new()));
        let (mut manager, _events) = manager(dials);

        assert_eq!(
            manager.send("#ping".to_string()),
            Err(LinkError::ChannelNotOpen)
        );
        manager.open();
        assert_eq!(
            manager.send("#ping".to_string()),
            Err(LinkError::ChannelNotOpen)
        );
        manager.apply(&LinkEvent::Opened);
        assert_eq!(manager.state(), ConnectionState::Open);
        assert_eq!(manager.send("#ping".to_string()), Ok(()));
    }

    #[tokio::test]
    async fn close_transitions_and_is_idempotent() {
        let dials = Arc::new(Mutex::new(Vec::new()));
        let (mut manager, _events) = manager(dials);

        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closed);

        manager.open();
        manager.apply(&LinkEvent::Opened);
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closing);
        manager.close();
        assert_eq!(manager.state(), ConnectionState::Closing);
        manager.apply(&LinkEvent::Closed { error: None });
        assert_eq!(manager.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn opened_while_closing_stays_closing() {
        let dials = Arc::new(Mutex::new(Vec::new()));
        let (mut manager, _events) = manager(dials);

        manager.open();
        manager.close();
        manager.apply(&LinkEvent::Opened);
        assert_eq!(manager.state(), ConnectionState::Closing);
    }

    fn pump_fixture() -> (
        mpsc::UnboundedSender<Frame>,
        futures::channel::mpsc::UnboundedSender<Result<Message, WsError>>,
        futures::channel::mpsc::UnboundedReceiver<Message>,
        mpsc::UnboundedReceiver<LinkEvent>,
        tokio::task::JoinHandle<()>,
    ) {
        let (sink_tx, sink_rx) = futures::channel::mpsc::unbounded::<Message>();
        let (stream_tx, stream_rx) = futures::channel::mpsc::unbounded::<Result<Message, WsError>>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run_pump(sink_tx, stream_rx, outbound_rx, event_tx));
        (outbound_tx, stream_tx, sink_rx, event_rx, task)
    }

    #[tokio::test]
    async fn pump_forwards_text_both_ways() {
        let (outbound, stream_tx, mut sink_rx, mut events, _task) = pump_fixture();

        outbound.send(Frame::Text("#ping".to_string())).unwrap();
        assert_eq!(
            sink_rx.next().await,
            Some(Message::Text("#ping".to_string()))
        );

        stream_tx
            .unbounded_send(Ok(Message::Text("#response=pong".to_string())))
            .unwrap();
        assert_eq!(
            events.recv().await,
            Some(LinkEvent::Inbound("#response=pong".to_string()))
        );
    }

    #[tokio::test]
    async fn pump_close_frame_closes_the_sink() {
        let (outbound, _stream_tx, mut sink_rx, mut events, task) = pump_fixture();

        outbound.send(Frame::Close).unwrap();
        assert_eq!(sink_rx.next().await, Some(Message::Close(None)));
        assert_eq!(events.recv().await, Some(LinkEvent::Closed { error: None }));
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_reports_peer_close_and_errors() {
        let (_outbound, stream_tx, _sink_rx, mut events, task) = pump_fixture();

        stream_tx
            .unbounded_send(Err(WsError::ConnectionClosed))
            .unwrap();
        match events.recv().await {
            Some(LinkEvent::Closed { error: Some(_) }) => {}
            other => panic!("expected error close, got {other:?}"),
        }
        task.await.unwrap();
    }

    #[tokio::test]
    async fn pump_ends_when_the_peer_stream_ends() {
        let (_outbound, stream_tx, _sink_rx, mut events, task) = pump_fixture();

        drop(stream_tx);
        assert_eq!(events.recv().await, Some(LinkEvent::Closed { error: None }));
        task.await.unwrap();
    }

    #[test]
    fn client_request_offers_the_token_subprotocol() {
        let request = client_request("wss://door.test/ws", Some("secret")).unwrap();
        assert_eq!(
            request
                .headers()
                .get("Sec-WebSocket-Protocol")
                .map(|v| v.to_str().unwrap()),
            Some("secret")
        );

        let bare = client_request("wss://door.test/ws", None).unwrap();
        assert!(bare.headers().get("Sec-WebSocket-Protocol").is_none());
    }
}
