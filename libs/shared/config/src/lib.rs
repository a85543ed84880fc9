use std::env;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_url: String,
    pub store_anon_key: String,
    pub store_jwt_secret: String,
    pub signaling_base_url: String,
    pub signaling_api_token: String,
    pub poll_interval_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub short_drop_seconds: u64,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            store_url: env::var("STORE_URL")
                .unwrap_or_else(|_| {
                    warn!("STORE_URL not set, using empty value");
                    String::new()
                }),
            store_anon_key: env::var("STORE_ANON_KEY")
                .unwrap_or_else(|_| {
                    warn!("STORE_ANON_KEY not set, using empty value");
                    String::new()
                }),
            store_jwt_secret: env::var("STORE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("STORE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            signaling_base_url: env::var("SIGNALING_BASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SIGNALING_BASE_URL not set, using default");
                    "https://rtc.clinic-live.internal/v1".to_string()
                }),
            signaling_api_token: env::var("SIGNALING_API_TOKEN")
                .unwrap_or_else(|_| {
                    warn!("SIGNALING_API_TOKEN not set, using empty value");
                    String::new()
                }),
            poll_interval_seconds: parse_env_u64("QUEUE_POLL_INTERVAL_SECONDS", 7),
            connect_timeout_seconds: parse_env_u64("CALL_CONNECT_TIMEOUT_SECONDS", 30),
            short_drop_seconds: parse_env_u64("CALL_SHORT_DROP_SECONDS", 5),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.store_url.is_empty()
            && !self.store_anon_key.is_empty()
            && !self.store_jwt_secret.is_empty()
    }

    pub fn is_signaling_configured(&self) -> bool {
        !self.signaling_base_url.is_empty() && !self.signaling_api_token.is_empty()
    }
}

fn parse_env_u64(name: &str, default: u64) -> u64 {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} is not a valid integer, using default {}", name, default);
            default
        }),
        Err(_) => default,
    }
}
