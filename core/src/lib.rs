pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod header;
pub mod lss;
pub mod signing;
pub mod validator;

pub use envelope::{Consent, Encoding, Envelope, IntentType, Payload};
pub use error::{FrameError, LriError, LriResult, ProtocolError};
pub use lss::SessionStore;
