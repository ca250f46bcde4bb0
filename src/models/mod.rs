pub mod action;
pub mod server;
pub mod user;
