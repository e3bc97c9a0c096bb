use crate::{ConfigError, FromEnv, env_or_default, env_parse};
use std::net::Ipv4Addr;
use std::time::Duration;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Listen address and shutdown bound for an HTTP surface
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// How long cleanup may run once the server has stopped accepting
    pub shutdown_timeout: Duration,
}

impl ServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// "host:port", as accepted by `TcpListener::bind`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromEnv for ServerConfig {
    /// - HOST: default 0.0.0.0
    /// - PORT: default 8080
    /// - SHUTDOWN_TIMEOUT_SECS: default 10
    fn from_env() -> Result<Self, ConfigError> {
        let host = env_or_default("HOST", &Ipv4Addr::UNSPECIFIED.to_string());
        let port = env_parse("PORT", DEFAULT_PORT)?;
        let timeout = env_parse("SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?;

        Ok(Self::new(host, port).with_shutdown_timeout(Duration::from_secs(timeout)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(Ipv4Addr::UNSPECIFIED.to_string(), DEFAULT_PORT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYS: [&str; 3] = ["HOST", "PORT", "SHUTDOWN_TIMEOUT_SECS"];

    #[test]
    fn test_defaults() {
        temp_env::with_vars(KEYS.map(|k| (k, None::<&str>)), || {
            let config = ServerConfig::from_env().unwrap();
            assert_eq!(config, ServerConfig::default());
            assert_eq!(config.address(), "0.0.0.0:8080");
            assert_eq!(config.shutdown_timeout, Duration::from_secs(10));
        });
    }

    #[test]
    fn test_overrides() {
        temp_env::with_vars(
            [
                ("HOST", Some("127.0.0.1")),
                ("PORT", Some("3000")),
                ("SHUTDOWN_TIMEOUT_SECS", Some("25")),
            ],
            || {
                let config = ServerConfig::from_env().unwrap();
                assert_eq!(config.address(), "127.0.0.1:3000");
                assert_eq!(config.shutdown_timeout, Duration::from_secs(25));
            },
        );
    }

    #[test]
    fn test_bad_values_name_the_variable() {
        for (key, value) in [
            ("PORT", "not_a_number"),
            ("PORT", "99999"),
            ("SHUTDOWN_TIMEOUT_SECS", "-1"),
        ] {
            temp_env::with_var(key, Some(value), || {
                let err = ServerConfig::from_env().unwrap_err();
                assert!(err.to_string().contains(key), "{key}={value}");
            });
        }
    }
}
