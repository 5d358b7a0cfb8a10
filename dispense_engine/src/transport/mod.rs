//! Transport adapter for the machine-control gateway.
//!
//! One outbound connection is opened per dispense attempt. The gateway speaks a fire-and-forget protocol: a single
//! JSON command frame goes out, and no application-level acknowledgement is guaranteed to come back. The dispatcher
//! is written against the [`GatewayConnector`]/[`GatewayConnection`] traits; [`ws::WsConnector`] is the production
//! implementation, and the dispatcher tests drive the state machine with scripted connections instead.

mod ws;

use thiserror::Error;

pub use ws::{WsConnection, WsConnector};

/// Everything a live connection can report back after the command frame was handed to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// The gateway sent a message. Rare; treated as a true acknowledgement.
    Message(String),
    /// The connection closed. Code 1000 is a normal closure.
    Closed { code: u16, reason: String },
    /// A transport-level error was observed.
    Error(String),
}

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("Failed to connect to the dispense gateway. {0}")]
    ConnectFailed(String),
    #[error("Connection closed before the command was sent (close code {0})")]
    ClosedBeforeSend(u16),
    #[error("Failed to send the dispense command frame. {0}")]
    SendFailed(String),
}

/// A single-use connection to the gateway. The dispatcher sends exactly one frame and then watches events until it
/// settles the attempt.
#[allow(async_fn_in_trait)]
pub trait GatewayConnection {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError>;

    /// The next observable event on this connection. Control frames that carry no information (pings, pongs) are
    /// absorbed; the stream ending without a close frame is reported as an abnormal close (1006).
    async fn next_event(&mut self) -> GatewayEvent;

    /// Best-effort close. Errors are swallowed; the connection is abandoned either way.
    async fn close(&mut self);
}

/// Opens connections to the gateway. Cheap to clone; one value is shared by the whole dispatcher.
#[allow(async_fn_in_trait)]
pub trait GatewayConnector: Clone {
    type Connection: GatewayConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError>;
}
