use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{LriError, LriResult};

pub const LCE_VERSION: u8 = 1;

/// Liminal Context Envelope: semantic metadata attached to one application message.
/// Envelopes are immutable once stored; corrections travel as new envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Envelope {
    /// Schema version, always 1 for LCE v0.1
    #[serde(rename = "v", default = "default_version")]
    pub version: u8,
    pub intent: Intent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affect: Option<Affect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meaning: Option<Meaning>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust: Option<Trust>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<Memory>,
    pub policy: Policy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qos: Option<Qos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    /// Compact JWS produced by an external signer
    #[serde(rename = "sig", default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

fn default_version() -> u8 {
    LCE_VERSION
}

/// Communicative intent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Intent {
    #[serde(rename = "type")]
    #[schema(value_type = String, example = "ask")]
    pub kind: IntentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
}

/// Closed intent vocabulary. Unknown strings survive a round trip in `Other`
/// and score as `Tell`; the engines never reject them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentType {
    Ask,
    Tell,
    Propose,
    Confirm,
    Notify,
    Sync,
    Plan,
    Agree,
    Disagree,
    Reflect,
    Other(String),
}

impl IntentType {
    pub const KNOWN: [IntentType; 10] = [
        IntentType::Ask,
        IntentType::Tell,
        IntentType::Propose,
        IntentType::Confirm,
        IntentType::Notify,
        IntentType::Sync,
        IntentType::Plan,
        IntentType::Agree,
        IntentType::Disagree,
        IntentType::Reflect,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            IntentType::Ask => "ask",
            IntentType::Tell => "tell",
            IntentType::Propose => "propose",
            IntentType::Confirm => "confirm",
            IntentType::Notify => "notify",
            IntentType::Sync => "sync",
            IntentType::Plan => "plan",
            IntentType::Agree => "agree",
            IntentType::Disagree => "disagree",
            IntentType::Reflect => "reflect",
            IntentType::Other(raw) => raw,
        }
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, IntentType::Other(_))
    }

    /// The intent used by the scoring engines.
    pub fn for_scoring(&self) -> IntentType {
        match self {
            IntentType::Other(_) => IntentType::Tell,
            known => known.clone(),
        }
    }
}

impl From<String> for IntentType {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "ask" => IntentType::Ask,
            "tell" => IntentType::Tell,
            "propose" => IntentType::Propose,
            "confirm" => IntentType::Confirm,
            "notify" => IntentType::Notify,
            "sync" => IntentType::Sync,
            "plan" => IntentType::Plan,
            "agree" => IntentType::Agree,
            "disagree" => IntentType::Disagree,
            "reflect" => IntentType::Reflect,
            _ => IntentType::Other(raw),
        }
    }
}

impl From<&str> for IntentType {
    fn from(raw: &str) -> Self {
        IntentType::from(raw.to_string())
    }
}

impl From<IntentType> for String {
    fn from(intent: IntentType) -> Self {
        match intent {
            IntentType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emotional context on the PAD model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Affect {
    /// [pleasure, arousal, dominance], each in [-1, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Vec<f64>>)]
    pub pad: Option<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Meaning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// Reference ontology URI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ontology: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Trust {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attest: Option<Vec<String>>,
}

/// Session and temporal context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Memory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,
    /// ISO 8601 timestamp as reported by the sender
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Consent {
    Private,
    Team,
    Public,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Policy {
    pub consent: Consent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub share: Option<Vec<String>>,
    /// Differential privacy parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dp: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Qos {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Trace {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hop: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Vec<String>>,
}

impl Envelope {
    pub fn new(intent: impl Into<IntentType>, consent: Consent) -> Self {
        Self {
            version: LCE_VERSION,
            intent: Intent {
                kind: intent.into(),
                goal: None,
            },
            affect: None,
            meaning: None,
            trust: None,
            memory: None,
            policy: Policy {
                consent,
                share: None,
                dp: None,
            },
            qos: None,
            trace: None,
            signature: None,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.intent.goal = Some(goal.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.meaning
            .get_or_insert(Meaning {
                topic: None,
                ontology: None,
            })
            .topic = Some(topic.into());
        self
    }

    pub fn with_pad(mut self, pleasure: f64, arousal: f64, dominance: f64) -> Self {
        self.affect
            .get_or_insert(Affect {
                pad: None,
                tags: None,
            })
            .pad = Some([pleasure, arousal, dominance]);
        self
    }

    pub fn with_thread(mut self, thread: impl Into<String>) -> Self {
        self.memory
            .get_or_insert(Memory {
                thread: None,
                t: None,
                ttl: None,
            })
            .thread = Some(thread.into());
        self
    }

    pub fn intent_type(&self) -> &IntentType {
        &self.intent.kind
    }

    pub fn topic(&self) -> Option<&str> {
        self.meaning
            .as_ref()
            .and_then(|m| m.topic.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn pad(&self) -> Option<[f64; 3]> {
        self.affect.as_ref().and_then(|a| a.pad)
    }

    pub fn thread(&self) -> Option<&str> {
        self.memory
            .as_ref()
            .and_then(|m| m.thread.as_deref())
            .filter(|t| !t.is_empty())
    }

    /// Serialize with the given wire encoding.
    pub fn to_bytes(&self, encoding: Encoding) -> LriResult<Vec<u8>> {
        match encoding {
            Encoding::Json => Ok(serde_json::to_vec(self)?),
            Encoding::Cbor => Ok(serde_cbor::to_vec(self)?),
        }
    }

    pub fn from_bytes(bytes: &[u8], encoding: Encoding) -> LriResult<Self> {
        match encoding {
            Encoding::Json => Ok(serde_json::from_slice(bytes)?),
            Encoding::Cbor => Ok(serde_cbor::from_slice(bytes)?),
        }
    }
}

/// Wire encoding negotiated during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Cbor,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Cbor => "cbor",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Encoding::Json),
            "cbor" => Some(Encoding::Cbor),
            _ => None,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encoding {
    type Err = LriError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::parse(s).ok_or_else(|| LriError::Codec(format!("unknown encoding '{s}'")))
    }
}

/// Application payload carried next to an envelope.
///
/// Two payloads are equal when their wire bytes are, so a `Json` or `Text`
/// payload equals the `Bytes` a frame decoder hands back for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum Payload {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
}

impl Payload {
    /// Wire bytes: text as UTF-8, structured values as compact JSON.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Payload::Bytes(bytes) => bytes.clone(),
            Payload::Text(text) => text.as_bytes().to_vec(),
            Payload::Json(value) => serde_json::to_vec(value).unwrap_or_default(),
        }
    }

    /// Textual view of the payload, if it has one. Bytes or text holding
    /// JSON read the same as the equivalent `Json` payload; anything else
    /// valid UTF-8 is taken verbatim.
    pub fn text(&self) -> Option<String> {
        let raw = match self {
            Payload::Json(value) => return json_text(value),
            Payload::Text(text) => text.as_str(),
            Payload::Bytes(bytes) => std::str::from_utf8(bytes).ok()?,
        };
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => json_text(&value),
            Err(_) => Some(raw.to_string()),
        }
    }

    /// Structured view: JSON values as-is, bytes/text parsed when they hold JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        match self {
            Payload::Json(value) => Some(value.clone()),
            Payload::Text(text) => serde_json::from_str(text).ok(),
            Payload::Bytes(bytes) => serde_json::from_slice(bytes).ok(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Payload::Bytes(bytes) => bytes.is_empty(),
            Payload::Text(text) => text.is_empty(),
            Payload::Json(value) => value.is_null(),
        }
    }
}

fn json_text(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => ["text", "content", "message"]
            .iter()
            .find_map(|key| map.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string),
        _ => None,
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        Payload::Json(value)
    }
}
