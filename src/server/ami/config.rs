//! Manager interface connection settings.

use std::time::Duration;

/// Where and how to reach the switch's manager port.
#[derive(Debug, Clone)]
pub struct AmiConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub secret: String,
    /// How long `execute` waits for a correlated response.
    pub execute_timeout: Duration,
}

impl Default for AmiConfig {
    fn default() -> Self {
        Self {
            host: "asterisk".to_string(),
            port: 5038,
            username: "admin".to_string(),
            secret: "admin_secret".to_string(),
            execute_timeout: Duration::from_secs(5),
        }
    }
}

impl AmiConfig {
    /// Read settings from environment variables, falling back to the
    /// defaults the switch container ships with.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("ASTERISK_HOST").unwrap_or(defaults.host),
            port: std::env::var("ASTERISK_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(defaults.port),
            username: std::env::var("ASTERISK_USER").unwrap_or(defaults.username),
            secret: std::env::var("ASTERISK_PASSWORD").unwrap_or(defaults.secret),
            execute_timeout: defaults.execute_timeout,
        }
    }
}
