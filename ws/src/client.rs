use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use lri_core::config::HandshakeConfig;
use lri_core::error::{LriError, LriResult, ProtocolError};
use lri_core::frame::{Frame, decode_frame, encode_frame};
use lri_core::handshake::{Connection, Initiator, InitiatorStep};
use lri_core::signing::Verifier;
use lri_core::{Envelope, Payload};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::transport_error;

#[derive(Clone, Default)]
pub struct ClientOptions {
    pub handshake: HandshakeConfig,
    pub thread: Option<String>,
    pub auth: Option<String>,
    /// When set, unsigned or badly signed seals fail the handshake.
    pub verifier: Option<Arc<dyn Verifier>>,
}

/// Something the server sent after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Frame(Frame),
    /// JSON text message, e.g. an error notice.
    Notice(serde_json::Value),
}

/// Initiator side of an LRI WebSocket session.
pub struct LriClient<S = MaybeTlsStream<TcpStream>> {
    ws: WebSocketStream<S>,
    connection: Connection,
}

impl LriClient {
    pub async fn connect(url: &str, options: ClientOptions) -> LriResult<Self> {
        let (ws, _response) = connect_async(url).await.map_err(transport_error)?;
        tracing::debug!(url, "websocket connected");
        Self::handshake(ws, options).await
    }
}

impl<S> LriClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Run Hello → Mirror → Bind → Seal over an open socket, bounded by the
    /// configured timeout.
    pub async fn handshake(mut ws: WebSocketStream<S>, options: ClientOptions) -> LriResult<Self> {
        let timeout = options.handshake.timeout;
        let connection = tokio::time::timeout(timeout, initiate(&mut ws, options))
            .await
            .map_err(|_| LriError::Timeout(timeout))??;
        tracing::debug!(session_id = %connection.session_id, "handshake sealed");
        Ok(Self { ws, connection })
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub async fn send(&mut self, envelope: &Envelope, payload: Option<&Payload>) -> LriResult<()> {
        let frame = encode_frame(envelope, payload, self.connection.encoding)?;
        self.send_raw(frame).await
    }

    /// Send pre-encoded frame bytes as-is.
    pub async fn send_raw(&mut self, bytes: Vec<u8>) -> LriResult<()> {
        self.ws
            .send(Message::Binary(bytes))
            .await
            .map_err(transport_error)
    }

    /// Next frame or notice. `Ok(None)` once the server has closed.
    pub async fn recv(&mut self) -> LriResult<Option<Incoming>> {
        while let Some(message) = self.ws.next().await {
            match message.map_err(transport_error)? {
                Message::Binary(bytes) => {
                    return Ok(Some(Incoming::Frame(decode_frame(
                        &bytes,
                        self.connection.encoding,
                    )?)));
                }
                Message::Text(text) => {
                    let value = serde_json::from_str(&text)
                        .unwrap_or(serde_json::Value::String(text));
                    return Ok(Some(Incoming::Notice(value)));
                }
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> LriResult<()> {
        self.ws.close(None).await.map_err(transport_error)
    }
}

async fn initiate<S>(ws: &mut WebSocketStream<S>, options: ClientOptions) -> LriResult<Connection>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut initiator = Initiator::new(options.handshake, options.thread, options.auth);
    if let Some(verifier) = options.verifier {
        initiator = initiator.with_verifier(verifier);
    }

    let hello = initiator.start()?;
    ws.send(Message::Text(hello.to_text()?))
        .await
        .map_err(transport_error)?;

    while let Some(message) = ws.next().await {
        match message.map_err(transport_error)? {
            Message::Text(text) => match initiator.receive_text(&text, Utc::now())? {
                InitiatorStep::Send(reply) => {
                    ws.send(Message::Text(reply.to_text()?))
                        .await
                        .map_err(transport_error)?;
                }
                InitiatorStep::Sealed(connection) => return Ok(connection),
            },
            Message::Close(frame) => {
                if let Some(frame) = frame {
                    tracing::warn!(code = ?frame.code, reason = %frame.reason, "server closed during handshake");
                }
                return Err(ProtocolError::Closed.into());
            }
            Message::Binary(_) => return Err(ProtocolError::FrameBeforeSeal.into()),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }
    Err(ProtocolError::Closed.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lri_core::handshake::{HandshakeMessage, Mirror, Seal};
    use lri_core::signing::HmacSigner;
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn next_text(ws: &mut WebSocketStream<DuplexStream>) -> HandshakeMessage {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => HandshakeMessage::parse(&text).unwrap(),
            other => panic!("expected text, got {other:?}"),
        }
    }

    /// Hand-driven responder that answers with a fixed seal.
    async fn scripted_server(mut ws: WebSocketStream<DuplexStream>, seal: Seal) {
        assert!(matches!(next_text(&mut ws).await, HandshakeMessage::Hello(_)));
        let mirror = HandshakeMessage::Mirror(Mirror {
            version: "0.2".to_string(),
            encoding: "cbor".to_string(),
            features: vec!["lss".to_string()],
            server_id: Some("scripted".to_string()),
        });
        ws.send(Message::Text(mirror.to_text().unwrap())).await.unwrap();
        assert!(matches!(next_text(&mut ws).await, HandshakeMessage::Bind(_)));
        ws.send(Message::Text(HandshakeMessage::Seal(seal).to_text().unwrap()))
            .await
            .unwrap();
        // keep the socket open until the client is done
        while let Some(Ok(message)) = ws.next().await {
            if matches!(message, Message::Close(_)) {
                break;
            }
        }
    }

    fn seal(signature: Option<String>) -> Seal {
        Seal {
            session_id: "s-1".to_string(),
            thread: None,
            expires: None,
            status: "ready".to_string(),
            signature,
        }
    }

    #[tokio::test]
    async fn client_adopts_negotiated_encoding() {
        let (server, client) = socket_pair().await;
        tokio::spawn(scripted_server(server, seal(None)));
        let client = LriClient::handshake(
            client,
            ClientOptions {
                thread: Some("t-7".to_string()),
                ..ClientOptions::default()
            },
        )
        .await
        .unwrap();
        let conn = client.connection();
        assert_eq!(conn.session_id, "s-1");
        assert_eq!(conn.encoding, lri_core::Encoding::Cbor);
        assert_eq!(conn.thread.as_deref(), Some("t-7"));
        assert_eq!(conn.peer_id.as_deref(), Some("scripted"));
        assert!(conn.features.contains("lss"));
    }

    #[tokio::test]
    async fn verifying_client_rejects_unsigned_seal() {
        let (server, client) = socket_pair().await;
        tokio::spawn(scripted_server(server, seal(None)));
        let result = LriClient::handshake(
            client,
            ClientOptions {
                verifier: Some(Arc::new(HmacSigner::new("secret"))),
                ..ClientOptions::default()
            },
        )
        .await;
        assert!(matches!(
            result,
            Err(LriError::Protocol(ProtocolError::BadSealSignature))
        ));
    }

    #[tokio::test]
    async fn unresponsive_server_times_out() {
        let (_server, client) = socket_pair().await;
        let options = ClientOptions {
            handshake: HandshakeConfig {
                timeout: std::time::Duration::from_millis(50),
                ..HandshakeConfig::default()
            },
            ..ClientOptions::default()
        };
        assert!(matches!(
            LriClient::handshake(client, options).await,
            Err(LriError::Timeout(_))
        ));
    }
}
