use std::env;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::llm::Provider;
use crate::session::Credentials;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_addr: SocketAddr,
    pub session_timeout: Duration,
    pub post_cooldown: Duration,
    pub fetch_timeout: Duration,
    pub provider_timeout: Duration,
    pub publish_timeout: Duration,
    pub request_timeout: Duration,
    pub max_sessions: usize,
    /// Attribution headers sent to OpenRouter.
    pub site_url: Option<String>,
    pub site_name: Option<String>,
    /// Secrets picked up from the environment for local use.
    pub env_credentials: Credentials,
    pub seed_sessions_from_env: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        // Load environment variables from .env file if it exists
        dotenv::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("HOST").unwrap_or_else(|| "127.0.0.1".to_string());
        let port = lookup("PORT").unwrap_or_else(|| "3000".to_string());
        let port = port
            .parse::<u16>()
            .map_err(|e| AppError::Config(format!("Invalid port: {}", e)))?;
        let ip = IpAddr::from_str(&host)
            .map_err(|e| AppError::Config(format!("Invalid host address: {}", e)))?;

        let secs = |key: &str, default: u64| -> Result<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|e| AppError::Config(format!("Invalid {}: {}", key, e))),
                None => Ok(Duration::from_secs(default)),
            }
        };

        let session_timeout = secs("SESSION_TIMEOUT_SECS", 30 * 60)?;
        if session_timeout.is_zero() {
            return Err(AppError::Config(
                "SESSION_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }

        let max_sessions = match lookup("MAX_SESSIONS") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .map_err(|e| AppError::Config(format!("Invalid MAX_SESSIONS: {}", e)))?,
            None => 10_000,
        };
        if max_sessions == 0 {
            return Err(AppError::Config(
                "MAX_SESSIONS must be greater than zero".to_string(),
            ));
        }

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut env_credentials = Credentials::default();
        for provider in Provider::ALL {
            if let Some(key) = non_empty(provider.env_key()) {
                env_credentials.set_api_key(provider, key);
            }
        }
        env_credentials.linkedin_token = non_empty("LINKEDIN_ACCESS_TOKEN");

        let seed_sessions_from_env = match lookup("SEED_SESSIONS_FROM_ENV") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                AppError::Config(format!("Invalid SEED_SESSIONS_FROM_ENV: {}", raw))
            })?,
            None => false,
        };

        Ok(Config {
            server_addr: SocketAddr::new(ip, port),
            session_timeout,
            post_cooldown: secs("POST_COOLDOWN_SECS", 60)?,
            fetch_timeout: secs("FETCH_TIMEOUT_SECS", 10)?,
            provider_timeout: secs("PROVIDER_TIMEOUT_SECS", 120)?,
            publish_timeout: secs("PUBLISH_TIMEOUT_SECS", 30)?,
            request_timeout: secs("REQUEST_TIMEOUT_SECS", 300)?,
            max_sessions,
            site_url: non_empty("SITE_URL"),
            site_name: non_empty("SITE_NAME"),
            env_credentials,
            seed_sessions_from_env,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 3000);
        assert_eq!(config.session_timeout, Duration::from_secs(1800));
        assert_eq!(config.post_cooldown, Duration::from_secs(60));
        assert!(config.env_credentials.is_empty());
        assert!(!config.seed_sessions_from_env);
        assert_eq!(config.max_sessions, 10_000);
    }

    #[test]
    fn env_secrets_are_collected_per_provider() {
        let config = Config::from_lookup(lookup_from(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("ANTHROPIC_API_KEY", "   "),
            ("LINKEDIN_ACCESS_TOKEN", "li-token"),
        ]))
        .unwrap();
        assert_eq!(config.env_credentials.api_key(Provider::OpenAi), Some("sk-test"));
        assert_eq!(config.env_credentials.api_key(Provider::Claude), None);
        assert_eq!(config.env_credentials.linkedin_token.as_deref(), Some("li-token"));
    }

    #[test]
    fn bad_values_are_config_errors() {
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("PORT", "http")])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("POST_COOLDOWN_SECS", "-1")])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("SESSION_TIMEOUT_SECS", "0")])),
            Err(AppError::Config(_))
        ));
        assert!(matches!(
            Config::from_lookup(lookup_from(&[("MAX_SESSIONS", "0")])),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn debug_output_hides_secrets() {
        let config =
            Config::from_lookup(lookup_from(&[("OPENROUTER_API_KEY", "sk-or-secret")])).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("sk-or-secret"));
    }
}
