use envconfig::Envconfig;
use std::time::Duration;
use url::Url;

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "DATABASE_URL")]
    pub db_url: String,
    #[envconfig(from = "PORT", default = "8080")]
    pub port: u16,
    /// Base64 HMAC secret for session and verification tokens.
    #[envconfig(from = "SESSION_SECRET")]
    pub session_secret: String,
    #[envconfig(from = "SESSION_TTL_HOURS", default = "24")]
    pub session_ttl_hours: u64,
    #[envconfig(from = "VERIFY_TTL_HOURS", default = "48")]
    pub verify_ttl_hours: u64,
    #[envconfig(from = "STATIC_DIR", default = "static")]
    pub static_dir: String,
    #[envconfig(from = "PUBLIC_HOST", default = "http://localhost:8080")]
    pub public_host: String,
    #[envconfig(from = "SEARCH_LIMIT_MAX", default = "50")]
    pub search_limit_max: usize,
}

impl Config {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_hours * 60 * 60)
    }

    pub fn verify_ttl(&self) -> Duration {
        Duration::from_secs(self.verify_ttl_hours * 60 * 60)
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        Ok(Settings {
            public_host: Url::parse(&self.public_host)?,
            search_limit_max: self.search_limit_max,
        })
    }
}

/// Request-time settings shared with the handlers.
#[derive(Debug, Clone)]
pub struct Settings {
    pub public_host: Url,
    pub search_limit_max: usize,
}
