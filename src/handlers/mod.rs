pub mod actions;
pub mod auth;
pub mod server;
