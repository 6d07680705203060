//! WebSocket link to the task-queue server.
//!
//! [`WsConnector::connect`] performs the handshake (with a timeout), splits
//! the stream, and spawns a background reader task that turns inbound
//! frames into [`LinkEvent`]s. The session reads them from an mpsc channel,
//! which keeps [`Link::recv`] cancel-safe.
//!
//! Outbound frames go through a bounded queue drained by a writer task, so
//! [`Link::send_text`] never waits on the socket. A peer that stops reading
//! fills the queue and sends fail with [`TransportError::Congested`].

use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::{Connector, Link, LinkEvent, TransportError};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSender = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the reader-to-session event channel.
const EVENT_BUFFER: usize = 256;

/// Capacity of the session-to-writer frame queue.
const OUTBOUND_BUFFER: usize = 32;

/// How long [`Link::close`] waits for the writer to flush the close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Opens WebSocket links to a fixed URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for `url` (`ws://` or `wss://`).
    #[must_use]
    pub const fn new(url: Url) -> Self {
        Self {
            url,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Overrides the handshake timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// The URL this connector dials.
    #[must_use]
    pub const fn url(&self) -> &Url {
        &self.url
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    async fn connect(&self) -> Result<WsLink, TransportError> {
        let url = self.url.as_str();
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "WebSocket connect timed out");
                TransportError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(url, e)
            })?;

        let (sender, reader) = stream.split();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader_handle = tokio::spawn(reader_loop(reader, tx));
        let (out_tx, out_rx) = mpsc::channel(OUTBOUND_BUFFER);
        let writer_handle = tokio::spawn(writer_loop(sender, out_rx));

        tracing::info!(url, "WebSocket connected");
        Ok(WsLink {
            outgoing: Some(out_tx),
            incoming: rx,
            closed: false,
            reader_handle,
            writer_handle,
        })
    }
}

/// An open WebSocket link.
pub struct WsLink {
    outgoing: Option<mpsc::Sender<Message>>,
    incoming: mpsc::Receiver<LinkEvent>,
    closed: bool,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
}

impl Link for WsLink {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let Some(outgoing) = self.outgoing.as_ref().filter(|_| !self.closed) else {
            return Err(TransportError::ConnectionClosed);
        };
        outgoing
            .try_send(Message::text(text.to_owned()))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    tracing::debug!("WebSocket outbound queue full");
                    TransportError::Congested
                }
                mpsc::error::TrySendError::Closed(_) => TransportError::ConnectionClosed,
            })
    }

    async fn recv(&mut self) -> LinkEvent {
        if self.closed {
            return LinkEvent::Closed;
        }
        let event = self.incoming.recv().await.unwrap_or(LinkEvent::Closed);
        if event == LinkEvent::Closed {
            self.closed = true;
        }
        event
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Dropping the queue tells the writer to send a close frame and exit.
        self.outgoing = None;
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut self.writer_handle)
            .await
            .is_err()
        {
            tracing::debug!("WebSocket close frame not flushed in time");
            self.writer_handle.abort();
        }
        self.reader_handle.abort();
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.reader_handle.abort();
        self.writer_handle.abort();
    }
}

/// Background task: writes queued frames, then closes the socket once the
/// queue is dropped.
async fn writer_loop(mut sender: WsSender, mut outgoing: mpsc::Receiver<Message>) {
    while let Some(message) = outgoing.recv().await {
        if let Err(e) = sender.send(message).await {
            tracing::debug!(err = %e, "WebSocket send failed");
            return;
        }
    }
    if let Err(e) = sender.close().await {
        tracing::debug!(err = %e, "WebSocket close handshake failed");
    }
    tracing::debug!("WebSocket writer exiting");
}

/// Background task: forwards inbound frames until the socket ends.
///
/// A read error is reported as [`LinkEvent::Error`] and is always followed by
/// [`LinkEvent::Closed`].
async fn reader_loop(mut reader: WsReader, tx: mpsc::Sender<LinkEvent>) {
    while let Some(frame) = reader.next().await {
        let event = match frame {
            Ok(Message::Text(text)) => LinkEvent::Message(text.as_str().to_owned()),
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "WebSocket closed by server");
                break;
            }
            Ok(Message::Binary(data)) => {
                tracing::debug!(len = data.len(), "ignoring binary frame");
                continue;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => continue,
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                let _ = tx.send(LinkEvent::Error(e.to_string())).await;
                break;
            }
        };
        if tx.send(event).await.is_err() {
            // Link dropped.
            return;
        }
    }
    let _ = tx.send(LinkEvent::Closed).await;
    tracing::debug!("WebSocket reader exiting");
}

/// Map a `tokio_tungstenite` connection error to a [`TransportError`].
fn map_ws_connect_error(url: &str, err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => {
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) {
                TransportError::Unreachable(url.to_owned())
            } else {
                TransportError::Io(io_err)
            }
        }
        WsError::Tls(_) => TransportError::Handshake(format!("TLS error: {err}")),
        WsError::Http(response) => {
            TransportError::Handshake(format!("HTTP status {}", response.status()))
        }
        WsError::Url(e) => TransportError::Handshake(format!("invalid URL: {e}")),
        other => TransportError::Io(std::io::Error::other(format!(
            "WebSocket connection error: {other}"
        ))),
    }
}
