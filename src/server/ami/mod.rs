//! Asterisk Manager Interface integration.
//!
//! This module owns the one TCP connection to the switch:
//! - `protocol`: wire framing (key/value blocks)
//! - `client`: login, correlated `execute`, the unsolicited event stream
//! - `supervisor`: reconnect loop with backoff and resync
//!
//! Nothing outside this module opens a socket to the switch.

mod client;
mod config;
pub mod protocol;
mod supervisor;

pub use client::{AmiConnection, AmiHandle};
pub use config::AmiConfig;
pub use supervisor::{AmiGateway, AmiSupervisor};

use thiserror::Error;

/// Manager-protocol errors.
#[derive(Error, Debug)]
pub enum AmiError {
    #[error("connect to switch failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("switch rejected login: {0}")]
    Auth(String),

    #[error("timed out waiting for response to {0}")]
    Timeout(String),

    #[error("connection to the switch was lost")]
    ConnectionLost,

    #[error("not connected to the switch")]
    NotConnected,
}
