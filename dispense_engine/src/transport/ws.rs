use futures_util::{SinkExt, StreamExt};
use log::*;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{protocol::Message, Error as WsError},
    MaybeTlsStream,
    WebSocketStream,
};

use crate::transport::{GatewayConnection, GatewayConnector, GatewayEvent, TransportError};

/// Production [`GatewayConnector`] speaking websocket to the machine-control gateway.
#[derive(Clone, Debug, Default)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

impl GatewayConnector for WsConnector {
    type Connection = WsConnection;

    async fn connect(&self, url: &str) -> Result<Self::Connection, TransportError> {
        let (stream, response) = connect_async(url).await.map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        trace!("📡️ Gateway websocket open ({})", response.status());
        Ok(WsConnection { inner: stream })
    }
}

pub struct WsConnection {
    inner: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl GatewayConnection for WsConnection {
    async fn send(&mut self, frame: &str) -> Result<(), TransportError> {
        self.inner.send(Message::Text(frame.to_string())).await.map_err(|e| match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::ClosedBeforeSend(1006),
            e => TransportError::SendFailed(e.to_string()),
        })
    }

    async fn next_event(&mut self) -> GatewayEvent {
        loop {
            match self.inner.next().await {
                Some(Ok(Message::Text(text))) => return GatewayEvent::Message(text),
                Some(Ok(Message::Binary(bytes))) => {
                    return GatewayEvent::Message(String::from_utf8_lossy(&bytes).into_owned())
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    return GatewayEvent::Closed { code, reason };
                },
                // Pings and pongs carry nothing the dispatcher cares about.
                Some(Ok(_)) => continue,
                Some(Err(e)) => return GatewayEvent::Error(e.to_string()),
                None => return GatewayEvent::Closed { code: 1006, reason: "stream ended".to_string() },
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.inner.close(None).await {
            debug!("📡️ Could not close gateway connection cleanly. {e}");
        }
    }
}
