//! testtaker-backend — HTTP backend client.
//!
//! Implements the `AttemptBackend` trait against a REST API and loads the
//! client configuration that points at it.

pub mod config;
pub mod error;
pub mod http;

pub use config::{create_backend, load_config, load_config_from, TesttakerConfig};
pub use error::ClientError;
pub use http::HttpBackend;
