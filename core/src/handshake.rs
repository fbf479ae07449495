//! Hello → Mirror → Bind → Seal negotiation as pure state machines.
//!
//! No I/O happens here: transports feed parsed messages in and send what comes
//! out. The responder pauses after Bind so the transport can run the async
//! authenticate hook, then resumes with [`Responder::complete_bind`].

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::config::{HandshakeConfig, PROTOCOL_VERSION};
use crate::envelope::{Consent, Encoding, Envelope, IntentType};
use crate::error::{LriError, LriResult, ProtocolError};
use crate::signing::{Signer, Verifier, sign_envelope, verify_envelope};

pub const SEAL_STATUS_READY: &str = "ready";

fn default_version() -> String {
    PROTOCOL_VERSION.to_string()
}

fn default_status() -> String {
    SEAL_STATUS_READY.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(alias = "lri_version", default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub encodings: Vec<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mirror {
    #[serde(alias = "lri_version", default = "default_version")]
    pub version: String,
    pub encoding: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bind {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seal {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// One handshake message; each travels as a discrete JSON text message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
pub enum HandshakeMessage {
    Hello(Hello),
    Mirror(Mirror),
    Bind(Bind),
    Seal(Seal),
}

impl HandshakeMessage {
    pub fn step(&self) -> &'static str {
        match self {
            HandshakeMessage::Hello(_) => "hello",
            HandshakeMessage::Mirror(_) => "mirror",
            HandshakeMessage::Bind(_) => "bind",
            HandshakeMessage::Seal(_) => "seal",
        }
    }

    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn to_text(&self) -> LriResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A sealed, ready connection. Only exists after a successful handshake.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Connection {
    pub session_id: String,
    pub thread: Option<String>,
    pub encoding: Encoding,
    #[schema(value_type = Vec<String>)]
    pub features: BTreeSet<String>,
    pub ready: bool,
    pub connected_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub peer_id: Option<String>,
}

impl Connection {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Thread a data frame is stored under: envelope thread, bound thread, session id.
    pub fn thread_for<'a>(&'a self, envelope: &'a Envelope) -> &'a str {
        envelope
            .thread()
            .or(self.thread.as_deref().filter(|t| !t.is_empty()))
            .unwrap_or(&self.session_id)
    }
}

/// Minimal envelope a seal signature covers.
pub fn seal_envelope(seal: &Seal) -> Envelope {
    let mut envelope = Envelope::new(IntentType::Sync, Consent::Private)
        .with_goal("seal")
        .with_thread(seal.session_id.clone());
    if let (Some(memory), Some(expires)) = (envelope.memory.as_mut(), seal.expires) {
        memory.ttl = Some(expires.to_rfc3339());
    }
    envelope
}

fn intersect_features(proposed: &[String], supported: &[String]) -> BTreeSet<String> {
    proposed
        .iter()
        .filter(|f| supported.contains(f))
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponderState {
    AwaitingHello,
    AwaitingBind,
    Authenticating,
    Sealed,
    Failed,
}

impl ResponderState {
    fn describe(self) -> &'static str {
        match self {
            ResponderState::AwaitingHello => "awaiting hello",
            ResponderState::AwaitingBind => "awaiting bind",
            ResponderState::Authenticating => "authenticating",
            ResponderState::Sealed => "sealed",
            ResponderState::Failed => "failed",
        }
    }
}

/// What the transport must do after feeding the responder a message.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponderStep {
    Reply(HandshakeMessage),
    /// Run the authenticate hook, then call `complete_bind`.
    Authenticate(Bind),
}

#[derive(Debug, Clone)]
struct Negotiated {
    encoding: Encoding,
    features: BTreeSet<String>,
    peer_id: Option<String>,
}

#[derive(Debug)]
pub struct Responder {
    config: HandshakeConfig,
    state: ResponderState,
    negotiated: Option<Negotiated>,
    pending_bind: Option<Bind>,
}

impl Responder {
    pub fn new(config: HandshakeConfig) -> Self {
        Self {
            config,
            state: ResponderState::AwaitingHello,
            negotiated: None,
            pending_bind: None,
        }
    }

    pub fn state(&self) -> ResponderState {
        self.state
    }

    pub fn is_sealed(&self) -> bool {
        self.state == ResponderState::Sealed
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.state = ResponderState::Failed;
        err
    }

    /// Parse and feed a raw text message. Malformed input fails the handshake.
    pub fn receive_text(&mut self, text: &str) -> Result<ResponderStep, ProtocolError> {
        if self.state == ResponderState::Failed {
            return Err(ProtocolError::AlreadyFailed);
        }
        match HandshakeMessage::parse(text) {
            Ok(message) => self.receive(message),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn receive(&mut self, message: HandshakeMessage) -> Result<ResponderStep, ProtocolError> {
        match (self.state, message) {
            (ResponderState::Failed, _) => Err(ProtocolError::AlreadyFailed),
            (ResponderState::AwaitingHello, HandshakeMessage::Hello(hello)) => {
                let mirror = self.on_hello(hello)?;
                Ok(ResponderStep::Reply(HandshakeMessage::Mirror(mirror)))
            }
            (ResponderState::AwaitingBind, HandshakeMessage::Bind(bind)) => {
                self.state = ResponderState::Authenticating;
                self.pending_bind = Some(bind.clone());
                Ok(ResponderStep::Authenticate(bind))
            }
            (state, message) => Err(self.fail(ProtocolError::OutOfOrder {
                received: message.step(),
                state: state.describe(),
            })),
        }
    }

    fn on_hello(&mut self, hello: Hello) -> Result<Mirror, ProtocolError> {
        if hello.encodings.is_empty() {
            return Err(self.fail(ProtocolError::NoEncodings));
        }
        let chosen = hello
            .encodings
            .iter()
            .filter_map(|raw| Encoding::parse(raw))
            .find(|e| self.config.encodings.contains(e))
            .or_else(|| self.config.encodings.first().copied());
        let Some(encoding) = chosen else {
            return Err(self.fail(ProtocolError::UnsupportedEncoding(hello.encodings.join(","))));
        };
        let features = intersect_features(&hello.features, &self.config.features);

        tracing::debug!(
            client_id = ?hello.client_id,
            encoding = %encoding,
            features = ?features,
            "hello accepted"
        );

        let mirror = Mirror {
            version: self.config.version.clone(),
            encoding: encoding.as_str().to_string(),
            features: features.iter().cloned().collect(),
            server_id: self.config.local_id.clone(),
        };
        self.negotiated = Some(Negotiated {
            encoding,
            features,
            peer_id: hello.client_id,
        });
        self.state = ResponderState::AwaitingBind;
        Ok(mirror)
    }

    /// Finish the handshake once the authenticate hook has decided.
    pub fn complete_bind(
        &mut self,
        accepted: bool,
        now: DateTime<Utc>,
        signer: Option<&dyn Signer>,
    ) -> LriResult<(Seal, Connection)> {
        if self.state != ResponderState::Authenticating {
            let state = self.state.describe();
            return Err(self
                .fail(ProtocolError::OutOfOrder {
                    received: "bind",
                    state,
                })
                .into());
        }
        let (Some(bind), Some(negotiated)) = (self.pending_bind.take(), self.negotiated.take())
        else {
            return Err(self.fail(ProtocolError::AlreadyFailed).into());
        };
        if !accepted {
            self.state = ResponderState::Failed;
            return Err(LriError::Authentication("bind rejected".to_string()));
        }

        let expires_at = self
            .config
            .session_duration
            .and_then(|d| TimeDelta::from_std(d).ok())
            .and_then(|d| now.checked_add_signed(d));
        let thread = bind.thread.filter(|t| !t.is_empty());
        let mut seal = Seal {
            session_id: Uuid::now_v7().to_string(),
            thread: thread.clone(),
            expires: expires_at,
            status: SEAL_STATUS_READY.to_string(),
            signature: None,
        };
        if let Some(signer) = signer {
            let signed = sign_envelope(&seal_envelope(&seal), signer)?;
            seal.signature = signed.signature;
        }

        let connection = Connection {
            session_id: seal.session_id.clone(),
            thread,
            encoding: negotiated.encoding,
            features: negotiated.features,
            ready: true,
            connected_at: now,
            expires_at,
            peer_id: negotiated.peer_id,
        };
        self.state = ResponderState::Sealed;
        tracing::debug!(session_id = %seal.session_id, "handshake sealed");
        Ok((seal, connection))
    }

    /// Data frames are only legal once sealed.
    pub fn check_frame_allowed(&mut self) -> Result<(), ProtocolError> {
        match self.state {
            ResponderState::Sealed => Ok(()),
            ResponderState::Failed => Err(ProtocolError::AlreadyFailed),
            _ => Err(self.fail(ProtocolError::FrameBeforeSeal)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitiatorState {
    Idle,
    AwaitingMirror,
    AwaitingSeal,
    Sealed,
    Failed,
}

impl InitiatorState {
    fn describe(self) -> &'static str {
        match self {
            InitiatorState::Idle => "idle",
            InitiatorState::AwaitingMirror => "awaiting mirror",
            InitiatorState::AwaitingSeal => "awaiting seal",
            InitiatorState::Sealed => "sealed",
            InitiatorState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitiatorStep {
    Send(HandshakeMessage),
    Sealed(Connection),
}

pub struct Initiator {
    config: HandshakeConfig,
    state: InitiatorState,
    thread: Option<String>,
    auth: Option<String>,
    negotiated: Option<Negotiated>,
    verifier: Option<Arc<dyn Verifier>>,
}

impl std::fmt::Debug for Initiator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Initiator")
            .field("state", &self.state)
            .field("thread", &self.thread)
            .field("verifies_seal", &self.verifier.is_some())
            .finish_non_exhaustive()
    }
}

impl Initiator {
    pub fn new(config: HandshakeConfig, thread: Option<String>, auth: Option<String>) -> Self {
        Self {
            config,
            state: InitiatorState::Idle,
            thread,
            auth,
            negotiated: None,
            verifier: None,
        }
    }

    /// Require a valid seal signature.
    pub fn with_verifier(mut self, verifier: Arc<dyn Verifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn state(&self) -> InitiatorState {
        self.state
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.state = InitiatorState::Failed;
        err
    }

    pub fn start(&mut self) -> Result<HandshakeMessage, ProtocolError> {
        if self.state != InitiatorState::Idle {
            let state = self.state.describe();
            return Err(self.fail(ProtocolError::OutOfOrder {
                received: "hello",
                state,
            }));
        }
        if self.config.encodings.is_empty() {
            return Err(self.fail(ProtocolError::NoEncodings));
        }
        self.state = InitiatorState::AwaitingMirror;
        Ok(HandshakeMessage::Hello(Hello {
            version: self.config.version.clone(),
            encodings: self
                .config
                .encodings
                .iter()
                .map(|e| e.as_str().to_string())
                .collect(),
            features: self.config.features.clone(),
            client_id: self.config.local_id.clone(),
        }))
    }

    pub fn receive_text(
        &mut self,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<InitiatorStep, ProtocolError> {
        if self.state == InitiatorState::Failed {
            return Err(ProtocolError::AlreadyFailed);
        }
        match HandshakeMessage::parse(text) {
            Ok(message) => self.receive(message, now),
            Err(err) => Err(self.fail(err)),
        }
    }

    pub fn receive(
        &mut self,
        message: HandshakeMessage,
        now: DateTime<Utc>,
    ) -> Result<InitiatorStep, ProtocolError> {
        match (self.state, message) {
            (InitiatorState::Failed, _) => Err(ProtocolError::AlreadyFailed),
            (InitiatorState::AwaitingMirror, HandshakeMessage::Mirror(mirror)) => {
                let encoding = match Encoding::parse(&mirror.encoding) {
                    Some(e) if self.config.encodings.contains(&e) => e,
                    _ => return Err(self.fail(ProtocolError::UnsupportedEncoding(mirror.encoding))),
                };
                self.negotiated = Some(Negotiated {
                    encoding,
                    features: intersect_features(&mirror.features, &self.config.features),
                    peer_id: mirror.server_id,
                });
                self.state = InitiatorState::AwaitingSeal;
                Ok(InitiatorStep::Send(HandshakeMessage::Bind(Bind {
                    thread: self.thread.clone(),
                    auth: self.auth.clone(),
                })))
            }
            (InitiatorState::AwaitingSeal, HandshakeMessage::Seal(seal)) => {
                if let Some(verifier) = &self.verifier {
                    let mut envelope = seal_envelope(&seal);
                    envelope.signature = seal.signature.clone();
                    if !verify_envelope(&envelope, verifier.as_ref()) {
                        return Err(self.fail(ProtocolError::BadSealSignature));
                    }
                }
                let Some(negotiated) = self.negotiated.take() else {
                    return Err(self.fail(ProtocolError::AlreadyFailed));
                };
                self.state = InitiatorState::Sealed;
                Ok(InitiatorStep::Sealed(Connection {
                    session_id: seal.session_id,
                    thread: seal.thread.or_else(|| self.thread.clone()),
                    encoding: negotiated.encoding,
                    features: negotiated.features,
                    ready: true,
                    connected_at: now,
                    expires_at: seal.expires,
                    peer_id: negotiated.peer_id,
                }))
            }
            (state, message) => Err(self.fail(ProtocolError::OutOfOrder {
                received: message.step(),
                state: state.describe(),
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signing::HmacSigner;
    use std::time::Duration;

    fn hello(encodings: &[&str], features: &[&str]) -> HandshakeMessage {
        HandshakeMessage::Hello(Hello {
            version: PROTOCOL_VERSION.to_string(),
            encodings: encodings.iter().map(|s| s.to_string()).collect(),
            features: features.iter().map(|s| s.to_string()).collect(),
            client_id: Some("client-1".to_string()),
        })
    }

    fn bind(thread: &str) -> HandshakeMessage {
        HandshakeMessage::Bind(Bind {
            thread: Some(thread.to_string()),
            auth: None,
        })
    }

    fn expect_mirror(step: ResponderStep) -> Mirror {
        match step {
            ResponderStep::Reply(HandshakeMessage::Mirror(mirror)) => mirror,
            other => panic!("expected mirror, got {other:?}"),
        }
    }

    #[test]
    fn wire_shape_uses_step_tag() {
        let text = hello(&["json"], &["lss"]).to_text().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["step"], "hello");
        assert_eq!(value["encodings"][0], "json");

        let legacy = r#"{"step":"hello","lri_version":"0.1","encodings":["cbor"]}"#;
        match HandshakeMessage::parse(legacy).unwrap() {
            HandshakeMessage::Hello(h) => {
                assert_eq!(h.version, "0.1");
                assert!(h.features.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            HandshakeMessage::parse(r#"{"step":"wave"}"#),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn responder_negotiates_first_supported_encoding_and_feature_intersection() {
        let mut responder = Responder::new(HandshakeConfig::default());
        let mirror =
            expect_mirror(responder.receive(hello(&["msgpack", "cbor"], &["lss", "x"])).unwrap());
        assert_eq!(mirror.encoding, "cbor");
        assert_eq!(mirror.features, vec!["lss".to_string()]);
        assert_eq!(responder.state(), ResponderState::AwaitingBind);
    }

    #[test]
    fn responder_falls_back_to_its_first_encoding() {
        let mut responder = Responder::new(HandshakeConfig::default());
        let mirror = expect_mirror(responder.receive(hello(&["msgpack"], &[])).unwrap());
        assert_eq!(mirror.encoding, "json");
    }

    #[test]
    fn hello_without_encodings_fails() {
        let mut responder = Responder::new(HandshakeConfig::default());
        assert_eq!(
            responder.receive(hello(&[], &[])),
            Err(ProtocolError::NoEncodings)
        );
        assert_eq!(responder.state(), ResponderState::Failed);
    }

    #[test]
    fn bind_before_hello_fails_and_stays_failed() {
        let mut responder = Responder::new(HandshakeConfig::default());
        assert!(matches!(
            responder.receive(bind("t-1")),
            Err(ProtocolError::OutOfOrder {
                received: "bind",
                ..
            })
        ));
        assert_eq!(
            responder.receive(hello(&["json"], &[])),
            Err(ProtocolError::AlreadyFailed)
        );
        assert!(responder.receive_text("{}").is_err());
    }

    #[test]
    fn malformed_text_fails_the_responder() {
        let mut responder = Responder::new(HandshakeConfig::default());
        assert!(matches!(
            responder.receive_text("not json"),
            Err(ProtocolError::Malformed(_))
        ));
        assert_eq!(responder.state(), ResponderState::Failed);
    }

    #[test]
    fn frames_before_seal_are_violations() {
        let mut responder = Responder::new(HandshakeConfig::default());
        responder.receive(hello(&["json"], &[])).unwrap();
        assert_eq!(
            responder.check_frame_allowed(),
            Err(ProtocolError::FrameBeforeSeal)
        );
        assert_eq!(responder.state(), ResponderState::Failed);
    }

    #[test]
    fn rejected_bind_is_an_authentication_failure() {
        let mut responder = Responder::new(HandshakeConfig::default());
        responder.receive(hello(&["json"], &[])).unwrap();
        assert!(matches!(
            responder.receive(bind("t-1")).unwrap(),
            ResponderStep::Authenticate(_)
        ));
        let err = responder.complete_bind(false, Utc::now(), None).unwrap_err();
        assert!(matches!(err, LriError::Authentication(_)));
        assert!(err.is_fatal_to_connection());
        assert_eq!(responder.state(), ResponderState::Failed);
    }

    #[test]
    fn both_sides_agree_on_the_sealed_session() {
        let now = Utc::now();
        let secret = HmacSigner::new("seal-secret");
        let config = HandshakeConfig::default().with_session_duration(Duration::from_secs(60));
        let mut responder = Responder::new(config.clone());
        let mut initiator = Initiator::new(
            HandshakeConfig::default(),
            Some("t-42".to_string()),
            Some("token".to_string()),
        )
        .with_verifier(Arc::new(secret.clone()));

        let hello = initiator.start().unwrap();
        let mirror = match responder.receive(hello).unwrap() {
            ResponderStep::Reply(message) => message,
            other => panic!("unexpected {other:?}"),
        };
        let bind = match initiator.receive(mirror, now).unwrap() {
            InitiatorStep::Send(message) => message,
            other => panic!("unexpected {other:?}"),
        };
        match responder.receive(bind).unwrap() {
            ResponderStep::Authenticate(b) => assert_eq!(b.auth.as_deref(), Some("token")),
            other => panic!("unexpected {other:?}"),
        }
        let (seal, server_conn) = responder.complete_bind(true, now, Some(&secret)).unwrap();
        assert_eq!(seal.expires, Some(now + TimeDelta::seconds(60)));
        assert!(seal.signature.is_some());

        // Cross the wire as text to exercise the chrono round trip.
        let text = HandshakeMessage::Seal(seal).to_text().unwrap();
        let client_conn = match initiator.receive_text(&text, now).unwrap() {
            InitiatorStep::Sealed(conn) => conn,
            other => panic!("unexpected {other:?}"),
        };

        assert_eq!(client_conn.session_id, server_conn.session_id);
        assert_eq!(client_conn.thread.as_deref(), Some("t-42"));
        assert_eq!(client_conn.encoding, Encoding::Json);
        assert_eq!(client_conn.features, server_conn.features);
        assert!(client_conn.ready && server_conn.ready);
        assert!(responder.is_sealed());
        assert_eq!(initiator.state(), InitiatorState::Sealed);
        assert!(responder.check_frame_allowed().is_ok());
    }

    #[test]
    fn initiator_rejects_unsigned_or_forged_seal_when_verifying() {
        let mut initiator = Initiator::new(HandshakeConfig::default(), None, None)
            .with_verifier(Arc::new(HmacSigner::new("right")));
        initiator.start().unwrap();
        initiator
            .receive(
                HandshakeMessage::Mirror(Mirror {
                    version: PROTOCOL_VERSION.to_string(),
                    encoding: "json".to_string(),
                    features: vec![],
                    server_id: None,
                }),
                Utc::now(),
            )
            .unwrap();

        let mut seal = Seal {
            session_id: "s-1".to_string(),
            thread: None,
            expires: None,
            status: SEAL_STATUS_READY.to_string(),
            signature: None,
        };
        let forged = sign_envelope(&seal_envelope(&seal), &HmacSigner::new("wrong")).unwrap();
        seal.signature = forged.signature;
        assert_eq!(
            initiator.receive(HandshakeMessage::Seal(seal), Utc::now()),
            Err(ProtocolError::BadSealSignature)
        );
    }

    #[test]
    fn initiator_rejects_encoding_it_did_not_offer() {
        let config = HandshakeConfig {
            encodings: vec![Encoding::Json],
            ..HandshakeConfig::default()
        };
        let mut initiator = Initiator::new(config, None, None);
        initiator.start().unwrap();
        let result = initiator.receive(
            HandshakeMessage::Mirror(Mirror {
                version: PROTOCOL_VERSION.to_string(),
                encoding: "cbor".to_string(),
                features: vec![],
                server_id: None,
            }),
            Utc::now(),
        );
        assert_eq!(
            result,
            Err(ProtocolError::UnsupportedEncoding("cbor".to_string()))
        );
    }

    #[test]
    fn connection_resolves_thread_in_order() {
        let conn = Connection {
            session_id: "s-1".to_string(),
            thread: Some("bound".to_string()),
            encoding: Encoding::Json,
            features: BTreeSet::new(),
            ready: true,
            connected_at: Utc::now(),
            expires_at: None,
            peer_id: None,
        };
        let plain = Envelope::new(IntentType::Tell, Consent::Private);
        assert_eq!(conn.thread_for(&plain), "bound");
        let threaded = plain.clone().with_thread("explicit");
        assert_eq!(conn.thread_for(&threaded), "explicit");
        let unbound = Connection {
            thread: None,
            ..conn
        };
        assert_eq!(unbound.thread_for(&plain), "s-1");
    }
}
