//! Shared types for the Converse backend: the provider-shaped message model,
//! the conversation aggregate, and process configuration.

pub mod config;
pub mod conversation;
pub mod error;
pub mod message;

pub use config::ConverseConfig;
pub use error::{CoreError, Result};
