//! API server configuration.

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    /// `host:port` the HTTP server binds to.
    pub bind_address: String,
    /// Postgres connection string; absent means in-memory demo mode.
    pub database_url: Option<String>,
    /// Comma-separated CORS origin allowlist.
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
        bind_address
            .parse::<std::net::SocketAddr>()
            .with_context(|| format!("BIND_ADDRESS {bind_address:?} is not a valid socket address"))?;

        let database_url = std::env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let allowed_origins = std::env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000,http://127.0.0.1:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Self {
            bind_address,
            database_url,
            allowed_origins,
        })
    }
}
