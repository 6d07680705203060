//! Duplex channel abstraction for the live-sync session.
//!
//! The session never talks to a socket directly. It asks a [`Connector`] for
//! a fresh [`Link`] on every (re)connect attempt and then reads
//! [`LinkEvent`]s from it until the link reports [`LinkEvent::Closed`].
//! Concrete implementations:
//! - [`ws::WsConnector`]: WebSocket client used against a real server
//! - [`loopback::LoopbackConnector`]: in-process channels for tests

pub mod loopback;
pub mod ws;

use std::future::Future;

/// Errors that can occur while opening or using a link.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The link has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The operation timed out before completing.
    #[error("transport operation timed out")]
    Timeout,

    /// The outbound queue is full; the peer is not reading.
    #[error("outbound queue is full")]
    Congested,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The server answered but the WebSocket handshake failed.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Something observed on an open link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// A text frame arrived.
    Message(String),
    /// The channel reported an error. A [`LinkEvent::Closed`] always follows.
    Error(String),
    /// The channel is gone; no further events will be produced.
    Closed,
}

/// Opens links to the server.
///
/// Each call to [`Connector::connect`] is an independent attempt; the
/// session never runs two at once.
pub trait Connector: Send + Sync + 'static {
    /// The link type produced by a successful attempt.
    type Link: Link;

    /// Opens a new link.
    fn connect(&self) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An open duplex text channel.
///
/// [`Link::recv`] must be cancel-safe: the session polls it inside
/// `tokio::select!` and may drop the future when another branch wins.
pub trait Link: Send + 'static {
    /// Queues one text frame. Fire-and-forget; delivery is not confirmed.
    ///
    /// Must not wait on the peer: the session awaits it inline.
    fn send_text(
        &mut self,
        text: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Waits for the next event. Returns [`LinkEvent::Closed`] forever once
    /// the link is gone.
    fn recv(&mut self) -> impl Future<Output = LinkEvent> + Send;

    /// Closes the link from the client side.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
