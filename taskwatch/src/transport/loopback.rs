//! Loopback transport for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a socket.
//! [`LoopbackConnector::pair`] returns the client-side connector together
//! with a [`LoopbackServer`] handle that decides, attempt by attempt,
//! whether to accept or refuse. An accepted attempt yields a
//! [`LoopbackPeer`] that plays the server end of that one link.

use tokio::sync::{Mutex, mpsc, oneshot};

use super::{Connector, Link, LinkEvent, TransportError};

type Pending = oneshot::Sender<Result<LoopbackLink, TransportError>>;

/// Client side: opens links through the paired [`LoopbackServer`].
pub struct LoopbackConnector {
    requests: mpsc::UnboundedSender<Pending>,
}

impl LoopbackConnector {
    /// Create a connected connector/server pair.
    #[must_use]
    pub fn pair() -> (Self, LoopbackServer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self { requests: tx },
            LoopbackServer {
                requests: Mutex::new(rx),
            },
        )
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn connect(&self) -> Result<LoopbackLink, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.requests
            .send(reply_tx)
            .map_err(|_| TransportError::Unreachable("loopback".into()))?;
        reply_rx
            .await
            .map_err(|_| TransportError::Unreachable("loopback".into()))?
    }
}

/// Server side: answers connect attempts.
pub struct LoopbackServer {
    requests: Mutex<mpsc::UnboundedReceiver<Pending>>,
}

impl LoopbackServer {
    /// Wait for the next connect attempt and accept it.
    ///
    /// Returns `None` if the connector was dropped.
    pub async fn accept(&self) -> Option<LoopbackPeer> {
        loop {
            let pending = self.requests.lock().await.recv().await?;
            let (link, peer) = linked();
            // The attempt may have been abandoned; wait for the next one.
            if pending.send(Ok(link)).is_ok() {
                return Some(peer);
            }
        }
    }

    /// Wait for the next connect attempt and fail it.
    ///
    /// Returns `false` if the connector was dropped.
    pub async fn refuse(&self) -> bool {
        match self.requests.lock().await.recv().await {
            Some(pending) => {
                let _ = pending.send(Err(TransportError::Unreachable("loopback".into())));
                true
            }
            None => false,
        }
    }

    /// Number of attempts waiting for an answer.
    pub async fn pending_attempts(&self) -> usize {
        self.requests.lock().await.len()
    }
}

fn linked() -> (LoopbackLink, LoopbackPeer) {
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let (text_tx, text_rx) = mpsc::unbounded_channel();
    (
        LoopbackLink {
            outgoing: Some(text_tx),
            incoming: event_rx,
            closed: false,
        },
        LoopbackPeer {
            events: event_tx,
            sent: text_rx,
        },
    )
}

/// Client end of an accepted loopback link.
pub struct LoopbackLink {
    outgoing: Option<mpsc::UnboundedSender<String>>,
    incoming: mpsc::UnboundedReceiver<LinkEvent>,
    closed: bool,
}

impl Link for LoopbackLink {
    async fn send_text(&mut self, text: &str) -> Result<(), TransportError> {
        let Some(outgoing) = self.outgoing.as_ref() else {
            return Err(TransportError::ConnectionClosed);
        };
        outgoing
            .send(text.to_owned())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> LinkEvent {
        if self.closed {
            return LinkEvent::Closed;
        }
        let event = self.incoming.recv().await.unwrap_or(LinkEvent::Closed);
        if event == LinkEvent::Closed {
            self.closed = true;
            self.outgoing = None;
        }
        event
    }

    async fn close(&mut self) {
        self.closed = true;
        self.outgoing = None;
        self.incoming.close();
    }
}

/// Server end of one accepted link.
///
/// Dropping the peer closes the link.
pub struct LoopbackPeer {
    events: mpsc::UnboundedSender<LinkEvent>,
    sent: mpsc::UnboundedReceiver<String>,
}

impl LoopbackPeer {
    /// Push a text frame to the client. Returns `false` once the client has
    /// closed the link.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.events.send(LinkEvent::Message(text.into())).is_ok()
    }

    /// Report a channel error, followed by a close.
    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.events.send(LinkEvent::Error(reason.into()));
        let _ = self.events.send(LinkEvent::Closed);
    }

    /// Close the link from the server side.
    pub fn close(self) {
        let _ = self.events.send(LinkEvent::Closed);
    }

    /// Next text frame sent by the client, or `None` once the client end is
    /// closed and drained.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.sent.recv().await
    }

    /// Next text frame sent by the client, without waiting.
    pub fn try_recv_text(&mut self) -> Option<String> {
        self.sent.try_recv().ok()
    }
}
