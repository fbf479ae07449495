pub mod connect;
pub mod envelope;
pub mod health;
pub mod send;
pub mod session;
pub mod terma;
pub mod token;
