use std::env;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub directory_url: String,
    pub directory_database: String,
    pub db_connect_timeout_ms: u64,
    pub db_max_pool_size: u32,
    pub api_port: u16,
    pub default_appointment_duration: u32,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            directory_url: env::var("DIRECTORY_URL")
                .unwrap_or_else(|_| {
                    warn!("DIRECTORY_URL not set, using in-memory directory");
                    "memory://directory".to_string()
                }),
            directory_database: env::var("DIRECTORY_DATABASE")
                .unwrap_or_else(|_| {
                    warn!("DIRECTORY_DATABASE not set, using default");
                    "platform".to_string()
                }),
            db_connect_timeout_ms: parse_or("DB_CONNECT_TIMEOUT_MS", 5_000),
            db_max_pool_size: parse_or("DB_MAX_POOL_SIZE", 10),
            api_port: parse_or("API_PORT", 3000),
            default_appointment_duration: parse_or("DEFAULT_APPOINTMENT_DURATION", 30),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - directory database is in-memory");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.directory_url.is_empty()
            && !self.directory_url.starts_with("memory://")
            && !self.directory_database.is_empty()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connect_timeout_ms)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            directory_url: "memory://directory".to_string(),
            directory_database: "platform".to_string(),
            db_connect_timeout_ms: 5_000,
            db_max_pool_size: 10,
            api_port: 3000,
            default_appointment_duration: 30,
        }
    }
}

fn parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an invalid value '{}', using {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
