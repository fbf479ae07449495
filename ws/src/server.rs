use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use lri_core::auth::{AllowAll, Authenticator, TokenAuthenticator};
use lri_core::config::HandshakeConfig;
use lri_core::error::{LriError, LriResult, ProtocolError};
use lri_core::frame::{decode_frame, encode_frame};
use lri_core::handshake::{Connection, HandshakeMessage, Responder, ResponderStep, Seal};
use lri_core::signing::{HmacSigner, Signer};
use lri_core::validator::validate_envelope;
use lri_core::{Envelope, Payload, SessionStore};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, mpsc};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_async};

use crate::{error_notice, transport_error};

pub const SIGNING_SECRET_ENV: &str = "LRI_SIGNING_SECRET";

/// Responder configuration: negotiation, authentication and seal signing.
#[derive(Clone)]
pub struct ServerOptions {
    pub handshake: HandshakeConfig,
    pub authenticator: Arc<dyn Authenticator>,
    pub signer: Option<Arc<dyn Signer>>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            handshake: HandshakeConfig::default(),
            authenticator: Arc::new(AllowAll),
            signer: None,
        }
    }
}

impl ServerOptions {
    pub fn from_env() -> Self {
        let authenticator: Arc<dyn Authenticator> = match TokenAuthenticator::from_env() {
            Some(tokens) => {
                tracing::info!(tokens = tokens.len(), "bind authentication enabled");
                Arc::new(tokens)
            }
            None => Arc::new(AllowAll),
        };
        let signer = std::env::var(SIGNING_SECRET_ENV)
            .ok()
            .filter(|secret| !secret.is_empty())
            .map(|secret| Arc::new(HmacSigner::new(secret)) as Arc<dyn Signer>);
        Self {
            handshake: HandshakeConfig::from_env(),
            authenticator,
            signer,
        }
    }
}

struct ConnectionHandle {
    connection: Connection,
    outbound: mpsc::UnboundedSender<Message>,
}

/// Owns live connections: accepts sockets, drives the responder handshake,
/// stores inbound frames and sends outbound ones.
#[derive(Clone)]
pub struct ConnectionManager {
    store: Arc<SessionStore>,
    options: Arc<ServerOptions>,
    connections: Arc<RwLock<HashMap<String, ConnectionHandle>>>,
}

fn close_message(code: CloseCode, reason: String) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Owned(reason),
    }))
}

fn notify(err: &LriError, out_tx: &mpsc::UnboundedSender<Message>) {
    out_tx
        .send(Message::Text(error_notice(err.code(), err.detail())))
        .ok();
}

fn close_on(err: &LriError, out_tx: &mpsc::UnboundedSender<Message>) {
    out_tx
        .send(close_message(CloseCode::Protocol, err.to_string()))
        .ok();
}

impl ConnectionManager {
    pub fn new(store: Arc<SessionStore>, options: ServerOptions) -> Self {
        Self {
            store,
            options: Arc::new(options),
            connections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Accept loop. Each socket is handled on its own task.
    pub async fn serve(&self, listener: TcpListener) -> LriResult<()> {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "LRI WebSocket listener ready");
        }
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(error = %err, "accept failed");
                    continue;
                }
            };
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.accept_tcp(stream).await {
                    tracing::debug!(error = %err, %peer, "connection ended with error");
                }
            });
        }
    }

    pub async fn accept_tcp(&self, stream: TcpStream) -> LriResult<()> {
        let ws = accept_async(stream).await.map_err(transport_error)?;
        self.handle_socket(ws).await
    }

    /// Run one connection to completion: handshake, then frames until close.
    pub async fn handle_socket<S>(&self, ws: WebSocketStream<S>) -> LriResult<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut sink, mut source) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();

        let send_task = tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if sink.send(message).await.is_err() || closing {
                    break;
                }
            }
        });

        let timeout = self.options.handshake.timeout;
        let handshake = tokio::time::timeout(timeout, self.respond(&mut source, &out_tx)).await;
        let (seal, connection) = match handshake {
            Ok(Ok(sealed)) => sealed,
            Ok(Err(err)) => {
                tracing::warn!(error = %err, "handshake failed");
                if !matches!(err, LriError::Protocol(ProtocolError::Closed)) {
                    notify(&err, &out_tx);
                    close_on(&err, &out_tx);
                }
                drop(out_tx);
                send_task.await.ok();
                return Err(err);
            }
            Err(_) => {
                let err = LriError::Timeout(timeout);
                tracing::warn!(error = %err, "handshake timed out");
                notify(&err, &out_tx);
                close_on(&err, &out_tx);
                drop(out_tx);
                send_task.await.ok();
                return Err(err);
            }
        };

        // Seal goes out before the connection becomes visible to send/broadcast.
        out_tx
            .send(Message::Text(HandshakeMessage::Seal(seal).to_text()?))
            .ok();
        let session_id = connection.session_id.clone();
        self.connections.write().await.insert(
            session_id.clone(),
            ConnectionHandle {
                connection: connection.clone(),
                outbound: out_tx.clone(),
            },
        );
        tracing::info!(
            session_id = %session_id,
            thread = ?connection.thread,
            encoding = %connection.encoding,
            "connection ready"
        );

        let remaining = connection
            .expires_at
            .map(|at| (at - Utc::now()).to_std().unwrap_or(Duration::ZERO));
        let expiry = async move {
            match remaining {
                Some(remaining) => tokio::time::sleep(remaining).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expiry);

        loop {
            let message = tokio::select! {
                () = &mut expiry => {
                    tracing::info!(session_id = %session_id, "session expired");
                    out_tx
                        .send(close_message(CloseCode::Policy, "session expired".to_string()))
                        .ok();
                    break;
                }
                message = source.next() => match message {
                    Some(message) => message,
                    None => break,
                },
            };
            let handled = match message {
                Ok(Message::Binary(bytes)) => self.on_frame(&connection, &bytes).await,
                Ok(Message::Text(text)) => self.on_text(&connection, &text).await,
                Ok(Message::Ping(payload)) => {
                    out_tx.send(Message::Pong(payload)).ok();
                    Ok(())
                }
                Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => Ok(()),
                Ok(Message::Close(_)) => break,
                Err(err) => {
                    tracing::debug!(session_id = %session_id, error = %err, "read failed");
                    break;
                }
            };
            if let Err(err) = handled {
                tracing::warn!(session_id = %session_id, error = %err, "rejected message");
                notify(&err, &out_tx);
                if err.is_fatal_to_connection() {
                    close_on(&err, &out_tx);
                    break;
                }
            }
        }

        self.connections.write().await.remove(&session_id);
        drop(out_tx);
        send_task.await.ok();
        tracing::info!(session_id = %session_id, "connection closed");
        Ok(())
    }

    /// Responder side of the handshake. Returns the seal to send and the
    /// connection it establishes.
    async fn respond<St>(
        &self,
        source: &mut St,
        out_tx: &mpsc::UnboundedSender<Message>,
    ) -> LriResult<(Seal, Connection)>
    where
        St: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        let mut responder = Responder::new(self.options.handshake.clone());
        while let Some(message) = source.next().await {
            match message.map_err(transport_error)? {
                Message::Text(text) => match responder.receive_text(&text)? {
                    ResponderStep::Reply(reply) => {
                        out_tx.send(Message::Text(reply.to_text()?)).ok();
                    }
                    ResponderStep::Authenticate(bind) => {
                        let accepted = self.options.authenticator.authenticate(&bind).await;
                        return responder.complete_bind(
                            accepted,
                            Utc::now(),
                            self.options.signer.as_deref(),
                        );
                    }
                },
                Message::Binary(_) => responder.check_frame_allowed()?,
                Message::Ping(payload) => {
                    out_tx.send(Message::Pong(payload)).ok();
                }
                Message::Pong(_) | Message::Frame(_) => {}
                Message::Close(_) => break,
            }
        }
        Err(ProtocolError::Closed.into())
    }

    async fn on_frame(&self, connection: &Connection, bytes: &[u8]) -> LriResult<()> {
        let frame = decode_frame(bytes, connection.encoding)?;
        let thread = connection.thread_for(&frame.envelope).to_string();
        let payload = (!frame.payload.is_empty()).then_some(frame.payload);
        self.store.store(&thread, frame.envelope, payload).await?;
        Ok(())
    }

    /// A text message after seal is a bare JSON envelope without payload.
    /// Handshake steps are no longer legal at this point.
    async fn on_text(&self, connection: &Connection, text: &str) -> LriResult<()> {
        if let Ok(message) = HandshakeMessage::parse(text) {
            return Err(ProtocolError::OutOfOrder {
                received: message.step(),
                state: "sealed",
            }
            .into());
        }
        let value: serde_json::Value = serde_json::from_str(text)?;
        validate_envelope(&value).map_err(LriError::Validation)?;
        let envelope: Envelope = serde_json::from_value(value)?;
        let thread = connection.thread_for(&envelope).to_string();
        self.store.store(&thread, envelope, None).await?;
        Ok(())
    }

    /// Ready connections, oldest first.
    pub async fn connections(&self) -> Vec<Connection> {
        let mut connections: Vec<Connection> = self
            .connections
            .read()
            .await
            .values()
            .map(|handle| handle.connection.clone())
            .collect();
        connections.sort_by(|a, b| a.connected_at.cmp(&b.connected_at));
        connections
    }

    /// Send one frame to a ready connection.
    pub async fn send(
        &self,
        session_id: &str,
        envelope: &Envelope,
        payload: Option<&Payload>,
    ) -> LriResult<()> {
        let connections = self.connections.read().await;
        let handle = connections
            .get(session_id)
            .ok_or_else(|| LriError::not_found(session_id))?;
        let frame = encode_frame(envelope, payload, handle.connection.encoding)?;
        handle
            .outbound
            .send(Message::Binary(frame))
            .map_err(|_| LriError::not_found(session_id))
    }

    /// Send one frame to every ready connection. Returns how many were reached.
    pub async fn broadcast(&self, envelope: &Envelope, payload: Option<&Payload>) -> usize {
        let connections = self.connections.read().await;
        let mut reached = 0;
        for (session_id, handle) in connections.iter() {
            match encode_frame(envelope, payload, handle.connection.encoding) {
                Ok(frame) => {
                    if handle.outbound.send(Message::Binary(frame)).is_ok() {
                        reached += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(session_id = %session_id, error = %err, "broadcast encode failed");
                }
            }
        }
        reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{ClientOptions, Incoming, LriClient};
    use lri_core::error::codes;
    use lri_core::lss::SessionEvent;
    use lri_core::{Consent, Encoding, IntentType};
    use tokio::io::DuplexStream;
    use tokio_tungstenite::tungstenite::protocol::Role;

    async fn socket_pair() -> (WebSocketStream<DuplexStream>, WebSocketStream<DuplexStream>) {
        let (server_io, client_io) = tokio::io::duplex(64 * 1024);
        let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
        let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
        (server, client)
    }

    async fn spawn_server(
        options: ServerOptions,
    ) -> (
        ConnectionManager,
        WebSocketStream<DuplexStream>,
        tokio::task::JoinHandle<LriResult<()>>,
    ) {
        let manager = ConnectionManager::new(Arc::new(SessionStore::default()), options);
        let (server, client) = socket_pair().await;
        let task_manager = manager.clone();
        let task = tokio::spawn(async move { task_manager.handle_socket(server).await });
        (manager, client, task)
    }

    async fn expect_close(client: &mut WebSocketStream<DuplexStream>) -> CloseCode {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(Some(frame)))) => return frame.code,
                Some(Ok(_)) => continue,
                other => panic!("expected close frame, got {other:?}"),
            }
        }
    }

    async fn next_step(client: &mut WebSocketStream<DuplexStream>) -> HandshakeMessage {
        match client.next().await {
            Some(Ok(Message::Text(text))) => HandshakeMessage::parse(&text).unwrap(),
            other => panic!("expected handshake message, got {other:?}"),
        }
    }

    async fn send_text(client: &mut WebSocketStream<DuplexStream>, text: &str) {
        client.send(Message::Text(text.to_string())).await.unwrap();
    }

    /// Drive Hello → Bind by hand and return the seal.
    async fn raw_handshake(client: &mut WebSocketStream<DuplexStream>) -> Seal {
        send_text(client, r#"{"step":"hello","encodings":["json"]}"#).await;
        assert!(matches!(next_step(client).await, HandshakeMessage::Mirror(_)));
        send_text(client, r#"{"step":"bind","thread":"t-1"}"#).await;
        match next_step(client).await {
            HandshakeMessage::Seal(seal) => seal,
            other => panic!("expected seal, got {other:?}"),
        }
    }

    fn envelope(thread: &str) -> Envelope {
        Envelope::new(IntentType::Tell, Consent::Private)
            .with_topic("weather")
            .with_thread(thread)
    }

    #[tokio::test]
    async fn bind_before_hello_closes_with_protocol_error() {
        let (_manager, mut client, task) = spawn_server(ServerOptions::default()).await;
        client
            .send(Message::Text(r#"{"step":"bind","thread":"t-1"}"#.to_string()))
            .await
            .unwrap();
        assert_eq!(expect_close(&mut client).await, CloseCode::Protocol);
        assert!(matches!(
            task.await.unwrap(),
            Err(LriError::Protocol(ProtocolError::OutOfOrder { .. }))
        ));
    }

    #[tokio::test]
    async fn frame_before_seal_closes_with_protocol_error() {
        let (_manager, mut client, task) = spawn_server(ServerOptions::default()).await;
        let frame = encode_frame(&envelope("t"), None, Encoding::Json).unwrap();
        client.send(Message::Binary(frame)).await.unwrap();
        assert_eq!(expect_close(&mut client).await, CloseCode::Protocol);
        assert!(matches!(
            task.await.unwrap(),
            Err(LriError::Protocol(ProtocolError::FrameBeforeSeal))
        ));
    }

    #[tokio::test]
    async fn frame_while_awaiting_bind_closes_with_protocol_error() {
        let (_manager, mut client, task) = spawn_server(ServerOptions::default()).await;
        send_text(&mut client, r#"{"step":"hello","encodings":["json"]}"#).await;
        assert!(matches!(next_step(&mut client).await, HandshakeMessage::Mirror(_)));

        let frame = encode_frame(&envelope("t"), None, Encoding::Json).unwrap();
        client.send(Message::Binary(frame)).await.unwrap();
        assert_eq!(expect_close(&mut client).await, CloseCode::Protocol);
        assert!(matches!(
            task.await.unwrap(),
            Err(LriError::Protocol(ProtocolError::FrameBeforeSeal))
        ));
    }

    #[tokio::test]
    async fn handshake_step_after_seal_is_fatal() {
        let (manager, mut client, task) = spawn_server(ServerOptions::default()).await;
        raw_handshake(&mut client).await;

        send_text(&mut client, r#"{"step":"hello","encodings":["json"]}"#).await;
        match client.next().await {
            Some(Ok(Message::Text(text))) => {
                let notice: serde_json::Value = serde_json::from_str(&text).unwrap();
                assert_eq!(notice["error"], codes::PROTOCOL_ERROR);
            }
            other => panic!("expected notice, got {other:?}"),
        }
        assert_eq!(expect_close(&mut client).await, CloseCode::Protocol);
        task.await.unwrap().unwrap();
        assert!(manager.connections().await.is_empty());
    }

    #[tokio::test]
    async fn idle_connection_closes_when_the_session_expires() {
        let options = ServerOptions {
            handshake: HandshakeConfig::default().with_session_duration(Duration::from_millis(150)),
            ..ServerOptions::default()
        };
        let (manager, mut client, task) = spawn_server(options).await;
        let seal = raw_handshake(&mut client).await;
        assert!(seal.expires.is_some());

        assert_eq!(expect_close(&mut client).await, CloseCode::Policy);
        task.await.unwrap().unwrap();
        assert!(manager.connections().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn broadcast_during_handshake_never_precedes_the_seal() {
        let (manager, client_ws, _task) = spawn_server(ServerOptions::default()).await;
        let broadcaster = {
            let manager = manager.clone();
            tokio::spawn(async move {
                while manager.broadcast(&envelope("t"), None).await == 0 {
                    tokio::task::yield_now().await;
                }
            })
        };
        let mut client = LriClient::handshake(client_ws, ClientOptions::default())
            .await
            .unwrap();
        broadcaster.await.unwrap();
        assert!(matches!(
            client.recv().await.unwrap(),
            Some(Incoming::Frame(_))
        ));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let options = ServerOptions {
            handshake: HandshakeConfig {
                timeout: Duration::from_millis(100),
                ..HandshakeConfig::default()
            },
            ..ServerOptions::default()
        };
        let (_manager, mut client, task) = spawn_server(options).await;
        assert_eq!(expect_close(&mut client).await, CloseCode::Protocol);
        assert!(matches!(task.await.unwrap(), Err(LriError::Timeout(_))));
    }

    #[tokio::test]
    async fn handshake_yields_the_same_session_on_both_sides() {
        let (manager, client_ws, _task) = spawn_server(ServerOptions::default()).await;
        let client = LriClient::handshake(
            client_ws,
            ClientOptions {
                thread: Some("t-1".to_string()),
                ..ClientOptions::default()
            },
        )
        .await
        .unwrap();

        let server_side = manager.connections().await;
        assert_eq!(server_side.len(), 1);
        assert_eq!(server_side[0].session_id, client.connection().session_id);
        assert_eq!(server_side[0].thread.as_deref(), Some("t-1"));
        assert!(client.connection().ready);
    }

    #[tokio::test]
    async fn rejected_bind_closes_the_socket() {
        let options = ServerOptions {
            authenticator: Arc::new(TokenAuthenticator::new(["good-token"])),
            ..ServerOptions::default()
        };
        let (manager, client_ws, task) = spawn_server(options).await;
        let result = LriClient::handshake(
            client_ws,
            ClientOptions {
                auth: Some("bad-token".to_string()),
                ..ClientOptions::default()
            },
        )
        .await;
        assert!(result.is_err());
        assert!(matches!(
            task.await.unwrap(),
            Err(LriError::Authentication(_))
        ));
        assert!(manager.connections().await.is_empty());
    }

    #[tokio::test]
    async fn frames_are_stored_under_the_resolved_thread() {
        let (manager, client_ws, _task) = spawn_server(ServerOptions::default()).await;
        let mut events = manager.store().subscribe().await;
        let mut client = LriClient::handshake(
            client_ws,
            ClientOptions {
                thread: Some("bound".to_string()),
                ..ClientOptions::default()
            },
        )
        .await
        .unwrap();

        client
            .send(&envelope("explicit"), Some(&Payload::from("sunny")))
            .await
            .unwrap();
        client
            .send(
                &Envelope::new(IntentType::Ask, Consent::Private),
                None,
            )
            .await
            .unwrap();

        let mut threads = Vec::new();
        while threads.len() < 2 {
            if let Some(SessionEvent::MessageStored { thread_id, .. }) = events.recv().await {
                threads.push(thread_id);
            }
        }
        assert_eq!(threads, vec!["explicit", "bound"]);

        let session = manager.store().get_session("explicit").await.unwrap().unwrap();
        let payload = session.messages[0].payload.as_ref().unwrap();
        assert_eq!(payload.text().as_deref(), Some("sunny"));
    }

    #[tokio::test]
    async fn bad_frames_get_a_notice_and_the_connection_survives() {
        let (manager, client_ws, _task) = spawn_server(ServerOptions::default()).await;
        let mut events = manager.store().subscribe().await;
        let mut client = LriClient::handshake(client_ws, ClientOptions::default())
            .await
            .unwrap();

        client.send_raw(vec![0, 0]).await.unwrap();
        match client.recv().await.unwrap() {
            Some(Incoming::Notice(notice)) => assert_eq!(notice["error"], codes::INVALID_FRAME),
            other => panic!("expected notice, got {other:?}"),
        }

        client.send(&envelope("t-9"), None).await.unwrap();
        match events.recv().await {
            Some(SessionEvent::MessageStored { thread_id, .. }) => assert_eq!(thread_id, "t-9"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_send_and_broadcast_reach_clients() {
        let (manager, client_ws, _task) = spawn_server(ServerOptions::default()).await;
        let mut client = LriClient::handshake(client_ws, ClientOptions::default())
            .await
            .unwrap();
        let session_id = client.connection().session_id.clone();

        manager
            .send(&session_id, &envelope("t"), Some(&Payload::from("hello")))
            .await
            .unwrap();
        match client.recv().await.unwrap() {
            Some(Incoming::Frame(frame)) => {
                assert_eq!(frame.envelope.topic(), Some("weather"));
                assert_eq!(frame.payload.text().as_deref(), Some("hello"));
            }
            other => panic!("expected frame, got {other:?}"),
        }

        assert_eq!(manager.broadcast(&envelope("t"), None).await, 1);
        assert!(matches!(
            manager.send("missing", &envelope("t"), None).await,
            Err(LriError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn closed_connections_are_forgotten() {
        let (manager, client_ws, task) = spawn_server(ServerOptions::default()).await;
        let client = LriClient::handshake(client_ws, ClientOptions::default())
            .await
            .unwrap();
        let session_id = client.connection().session_id.clone();
        client.close().await.unwrap();
        task.await.unwrap().unwrap();
        assert!(manager.connections().await.is_empty());
        assert!(manager.send(&session_id, &envelope("t"), None).await.is_err());
    }
}
