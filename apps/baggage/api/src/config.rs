use core_config::{AppInfo, FromEnv, app_info, env_list, server::ServerConfig};
use event_queue::QueueConfig;

pub use core_config::Environment;

/// Application-specific configuration
/// Composes shared config components from the `config` library
#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppInfo,
    pub server: ServerConfig,
    pub queue: QueueConfig,
    /// Bearer keys accepted on `POST /v1/events`; empty disables auth
    pub api_keys: Vec<String>,
    pub environment: Environment,
}

impl Config {
    pub fn from_env() -> eyre::Result<Self> {
        let environment = Environment::from_env();
        let server = ServerConfig::from_env()?; // HOST=0.0.0.0, PORT=8080
        let queue = QueueConfig::from_env()?;

        Ok(Self {
            app: app_info!(),
            server,
            queue,
            api_keys: env_list("API_KEYS"),
            environment,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_reads_api_keys() {
        temp_env::with_vars(
            [
                ("API_KEYS", Some(" key-one, ,key-two ")),
                ("PORT", Some("3000")),
                ("RABBITMQ_URL", Some("amqp://rabbit:5672")),
            ],
            || {
                let config = Config::from_env().unwrap();
                assert_eq!(config.api_keys, vec!["key-one", "key-two"]);
                assert_eq!(config.server.port, 3000);
                assert_eq!(config.queue.url, "amqp://rabbit:5672");
                assert_eq!(config.app.name, "baggage_api");
            },
        );
    }

    #[test]
    fn test_config_without_api_keys() {
        temp_env::with_var_unset("API_KEYS", || {
            let config = Config::from_env().unwrap();
            assert!(config.api_keys.is_empty());
        });
    }
}
