pub mod connections;
pub mod health;
pub mod sessions;
pub mod termas;
