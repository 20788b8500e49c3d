use crate::services::configure::SelectionMismatchPolicy;
use std::collections::HashMap;
use std::time::Duration;

const EXTENSION_SETTING_PREFIX: &str = "PORTABILITY_EXT_";
const DEFAULT_PORT: u16 = 8080;

#[derive(Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub transfer: TransferConfig,
}

#[derive(Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub client_timeout: Duration,
    pub keep_alive: Duration,
    pub job_cookie_name: String,
    pub secure_cookies: bool,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
}

#[derive(Clone)]
pub struct TransferConfig {
    /// Base URL handed to auth generators for building callback URLs.
    pub base_api_url: String,
    pub services_file: Option<String>,
    pub mismatch_policy: SelectionMismatchPolicy,
    /// `PORTABILITY_EXT_<NAME>` variables, keyed by `<name>` lowercased, with
    /// `__` standing in for `.` (`PORTABILITY_EXT_SERVICEA__USER_AGENT`).
    pub extension_settings: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        let parse_env_var = |key: &str, default: &str| -> String {
            std::env::var(key).unwrap_or_else(|_| default.to_string())
        };

        let parse_env_number = |key: &str, default: u64| -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        };

        let parse_env_duration = |key: &str, default_secs: u64| -> Duration {
            Duration::from_secs(parse_env_number(key, default_secs))
        };

        let mismatch_policy = std::env::var("PORTABILITY_ON_SELECTION_MISMATCH")
            .ok()
            .and_then(|s| match s.parse::<SelectionMismatchPolicy>() {
                Ok(policy) => Some(policy),
                Err(e) => {
                    tracing::warn!("Ignoring PORTABILITY_ON_SELECTION_MISMATCH: {}", e);
                    None
                }
            })
            .unwrap_or_default();

        Config {
            server: ServerConfig {
                host: parse_env_var("PORTABILITY_HOST", "0.0.0.0"),
                port: parse_port(std::env::var("PORTABILITY_PORT").ok(), DEFAULT_PORT),
                client_timeout: parse_env_duration("PORTABILITY_CLIENT_TIMEOUT", 30),
                keep_alive: parse_env_duration("PORTABILITY_KEEP_ALIVE", 75),
                job_cookie_name: parse_env_var("PORTABILITY_JOB_COOKIE", "portability_job"),
                secure_cookies: parse_env_var("PORTABILITY_SECURE_COOKIES", "true")
                    .eq_ignore_ascii_case("true"),
            },
            database: DatabaseConfig {
                url: parse_env_var(
                    "PORTABILITY_DATABASE_URL",
                    "sqlite:///app/storage/portability.db",
                ),
                max_connections: std::env::var("PORTABILITY_DB_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|s| s.parse().ok()),
            },
            transfer: TransferConfig {
                base_api_url: parse_env_var("PORTABILITY_BASE_API_URL", "http://localhost:8080/"),
                services_file: std::env::var("PORTABILITY_SERVICES_FILE").ok(),
                mismatch_policy,
                extension_settings: extension_settings(std::env::vars()),
            },
        }
    }
}

fn parse_port(raw: Option<String>, default: u16) -> u16 {
    let Some(raw) = raw else {
        return default;
    };
    raw.trim().parse::<u16>().unwrap_or_else(|e| {
        tracing::warn!("Ignoring PORTABILITY_PORT={}: {}; using {}", raw, e, default);
        default
    })
}

fn extension_settings(vars: impl Iterator<Item = (String, String)>) -> HashMap<String, String> {
    vars.filter_map(|(key, value)| {
        key.strip_prefix(EXTENSION_SETTING_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_lowercase().replace("__", "."), value))
    })
    .collect()
}

pub fn load_config() -> Config {
    Config::default()
}
