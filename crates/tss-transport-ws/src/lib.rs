//! WebSocket Transport
//!
//! Connects the ceremony to signer nodes over one WebSocket per node and
//! session. Messages travel as JSON text frames.

use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, instrument, trace};
use tss_core::mpc::{async_trait, ClientMessage, Connection, NodeMessage, Transport};
use tss_core::{Error, Result};

/// Path under which nodes serve session sockets
pub const DEFAULT_SOCKET_PATH: &str = "/v1/tss";

/// WebSocket transport
#[derive(Debug, Clone)]
pub struct WsTransport {
    /// Socket path appended to every endpoint origin
    path: String,
    /// Handshake timeout
    timeout: Duration,
}

impl WsTransport {
    /// Create a new transport serving sockets under [`DEFAULT_SOCKET_PATH`]
    pub fn new() -> Self {
        Self {
            path: DEFAULT_SOCKET_PATH.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Serve sockets under another path
    pub fn with_path(mut self, path: &str) -> Self {
        self.path = format!("/{}", path.trim_matches('/'));
        self
    }

    /// Set handshake timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// `ws(s)://origin/path/scope` for an endpoint origin
    pub fn socket_url(&self, endpoint: &str, socket_scope: &str) -> Result<String> {
        let (scheme, rest) = endpoint
            .split_once("://")
            .ok_or_else(|| Error::Configuration(format!("endpoint {:?} has no scheme", endpoint)))?;
        let scheme = match scheme {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(Error::Configuration(format!(
                    "unsupported endpoint scheme {:?}",
                    other
                )))
            }
        };
        Ok(format!(
            "{}://{}{}/{}",
            scheme,
            rest.trim_end_matches('/'),
            self.path,
            socket_scope
        ))
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WsTransport {
    #[instrument(skip(self))]
    async fn connect(&self, endpoint: &str, socket_scope: &str) -> Result<Box<dyn Connection>> {
        let url = self.socket_url(endpoint, socket_scope)?;

        let (stream, response) = tokio::time::timeout(self.timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| Error::Connection(format!("WebSocket handshake with {} timed out", endpoint)))?
            .map_err(|e| Error::Connection(format!("{}: {}", endpoint, e)))?;

        debug!(url = %url, status = %response.status(), "WebSocket connected");
        Ok(Box::new(WsConnection {
            endpoint: endpoint.to_string(),
            stream,
            closed: false,
        }))
    }
}

/// One session socket
pub struct WsConnection {
    endpoint: String,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait]
impl Connection for WsConnection {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        if self.closed {
            return Err(Error::Connection(format!("{} is closed", self.endpoint)));
        }
        let json =
            serde_json::to_string(message).map_err(|e| Error::Serialization(e.to_string()))?;
        self.stream
            .send(Message::Text(json))
            .await
            .map_err(|e| Error::Connection(format!("{}: {}", self.endpoint, e)))?;
        trace!(endpoint = %self.endpoint, kind = message.kind(), "Sent");
        Ok(())
    }

    async fn recv(&mut self) -> Result<NodeMessage> {
        loop {
            let frame = match self.stream.next().await {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    return Err(Error::Connection(format!("{}: {}", self.endpoint, e)))
                }
                None => {
                    return Err(Error::Connection(format!(
                        "{} closed the connection",
                        self.endpoint
                    )))
                }
            };

            let message: NodeMessage = match frame {
                Message::Text(text) => serde_json::from_str(&text),
                Message::Binary(bytes) => serde_json::from_slice(&bytes),
                Message::Close(_) => {
                    return Err(Error::Connection(format!(
                        "{} closed the connection",
                        self.endpoint
                    )))
                }
                // control frames are answered by tungstenite itself
                _ => continue,
            }
            .map_err(|e| Error::Deserialization(e.to_string()))?;

            trace!(endpoint = %self.endpoint, kind = message.kind(), "Received");
            return Ok(message);
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        match self.stream.close(None).await {
            Ok(())
            | Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed)
            | Err(tokio_tungstenite::tungstenite::Error::AlreadyClosed) => {
                debug!(endpoint = %self.endpoint, "WebSocket closed");
                Ok(())
            }
            Err(e) => Err(Error::Connection(format!("{}: {}", self.endpoint, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tss_core::mpc::messages::CleanupRequest;

    #[test]
    fn test_socket_url() {
        let transport = WsTransport::new();
        assert_eq!(
            transport
                .socket_url("https://node-1.example.dev", "abc")
                .unwrap(),
            "wss://node-1.example.dev/v1/tss/abc"
        );
        assert_eq!(
            transport
                .with_path("sockets/")
                .socket_url("http://127.0.0.1:8080/", "abc")
                .unwrap(),
            "ws://127.0.0.1:8080/sockets/abc"
        );
        assert!(WsTransport::new().socket_url("mem://node-1", "abc").is_err());
    }

    #[tokio::test]
    async fn test_round_trip_against_local_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut stream = tokio_tungstenite::accept_async(socket).await.unwrap();
            while let Some(Ok(frame)) = stream.next().await {
                if let Message::Text(text) = frame {
                    let request: ClientMessage = serde_json::from_str(&text).unwrap();
                    assert_eq!(request.kind(), "cleanup");
                    let reply = serde_json::to_string(&NodeMessage::CleanedUp).unwrap();
                    stream.send(Message::Text(reply)).await.unwrap();
                }
            }
        });

        let transport = WsTransport::new();
        let mut connection = transport
            .connect(&format!("http://{}", address), "scope")
            .await
            .unwrap();

        let request = ClientMessage::Cleanup(CleanupRequest {
            session: "session".into(),
            signatures: vec!["sig".into()],
        });
        connection.send(&request).await.unwrap();
        assert_eq!(connection.recv().await.unwrap(), NodeMessage::CleanedUp);

        connection.close().await.unwrap();
        connection.close().await.unwrap();
        assert!(connection.send(&request).await.is_err());

        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreachable_node() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let result = WsTransport::new()
            .connect(&format!("http://{}", address), "scope")
            .await;
        assert!(matches!(result, Err(Error::Connection(_))));
    }
}
