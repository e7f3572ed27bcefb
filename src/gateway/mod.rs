//! Protocol-layer boundary for the chat session.
//!
//! The routing core never touches the transport: it consumes normalized
//! [`SessionEvent`]s from an mpsc channel and drives the session through the
//! [`GatewaySession`] trait. The concrete XMPP binding lives in
//! [`xmpp`]; tests substitute their own mock implementations.

use async_trait::async_trait;
use thiserror::Error;

pub mod xmpp;

/// Normalized protocol-layer events, in the order the transport emits them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is authenticated and bound; safe to announce presence.
    SessionStart,
    /// An inbound chat message.
    Message {
        /// Full origin address, possibly carrying a `/resource` suffix.
        from: String,
        /// Message body.
        body: String,
    },
    /// A peer asked to subscribe to our presence.
    SubscriptionRequest {
        /// Requesting peer address.
        from: String,
    },
    /// The stream dropped, cleanly or not.
    Disconnected,
}

/// Errors raised at the protocol boundary.
#[derive(Debug, Error)]
pub enum SessionError {
    /// An operation was attempted with no live connection.
    #[error("not connected")]
    NotConnected,
    /// An address could not be parsed into a protocol address.
    #[error("invalid address: {0}")]
    Address(String),
    /// The underlying transport rejected the operation.
    #[error("transport error: {0}")]
    Transport(String),
    /// The per-connection task went away mid-operation.
    #[error("session task unavailable")]
    ChannelClosed,
}

/// Chat session collaborator the bridge core drives.
///
/// One logical session at a time; `connect` after a disconnect establishes
/// a fresh connection that reports its own `SessionStart`.
#[async_trait]
pub trait GatewaySession: Send + Sync {
    /// Establish a connection. Failures surface as a later
    /// [`SessionEvent::Disconnected`] rather than an immediate error.
    async fn connect(&self) -> Result<(), SessionError>;

    /// Tear down the current connection, if any.
    async fn disconnect(&self);

    /// Send a chat message to `to`.
    async fn send_message(&self, to: &str, body: &str) -> Result<(), SessionError>;

    /// Post-connect announcement: fetch the roster, broadcast presence, and
    /// send a subscribed presence toward the gateway domain.
    async fn announce(&self, gateway_domain: &str) -> Result<(), SessionError>;

    /// Auto-accept a presence subscription from `peer`.
    async fn accept_subscription(&self, peer: &str) -> Result<(), SessionError>;
}
