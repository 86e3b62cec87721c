use std::path::PathBuf;

use anyhow::Context;

use pledge_chat::ChatConfig;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: PathBuf,
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    pub jwt_audience: String,
    pub chat: ChatConfig,
}

impl ServerConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PLEDGE_PORT").unwrap_or_else(|| "3000".into());
        Ok(Self {
            db_path: PathBuf::from(lookup("PLEDGE_DB_PATH").unwrap_or_else(|| "pledge.db".into())),
            host: lookup("PLEDGE_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: port
                .parse()
                .with_context(|| format!("Invalid PLEDGE_PORT '{}'", port))?,
            jwt_secret: lookup("PLEDGE_JWT_SECRET").unwrap_or_else(|| "dev-secret-change-me".into()),
            jwt_audience: lookup("PLEDGE_JWT_AUDIENCE").unwrap_or_else(|| "authenticated".into()),
            chat: ChatConfig::from_lookup(&lookup),
        })
    }
}
