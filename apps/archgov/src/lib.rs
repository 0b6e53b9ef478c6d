//! # archgov application library
//!
//! HTTP API, CLI, configuration and the HTTP reasoning provider. The binary
//! in `main.rs` is a thin wrapper over [`cli::execute`]; integration tests
//! drive [`api::create_router`] directly.

pub mod api;
pub mod cli;
pub mod config;
pub mod reasoner_http;
