// Public API for integration tests and library usage

pub mod access_code;
pub mod api;
pub mod auth;
pub mod config;
pub mod dedup;
