//! Discord bot for a Compute Engine hosted Minecraft server.
//!
//! The bot answers four slash commands: `ping`, `server up`, `server down`
//! and `whitelist <user>`. Lifecycle commands drive one Compute Engine
//! instance through the REST API; whitelisting goes over a mutually
//! authenticated gRPC channel to the management service on that instance.

pub mod bot;
pub mod commands;
pub mod compute;
pub mod config;
pub mod control;
pub mod controller;
pub mod error;
pub mod logging;
pub mod management;
pub mod tracing;
pub mod waiter;

pub use config::Config;
pub use control::ServerControl;
pub use error::{BotError, BotResult};

/// Result of a user-facing operation: a success flag and the text shown
/// back in the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub success: bool,
    pub message: String,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
