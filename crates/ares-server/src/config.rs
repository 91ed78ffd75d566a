use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::lifecycle::{DEFAULT_REAPER_INTERVAL, DEFAULT_STORE_TIMEOUT};
use crate::store::crypto::KEY_LEN;

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// redb file backing the secret store.
    pub database_path: PathBuf,
    /// Raw AES-128 key; always exactly 16 bytes once loaded.
    pub encryption_key: String,
    /// Comma-separated origins, or `*`.
    pub allowed_origins: String,
    /// Prefix for share URLs handed back on create.
    pub base_url: String,
    pub reaper_interval: Duration,
    pub store_timeout: Duration,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_path", &self.database_path)
            .field("encryption_key", &"<redacted>")
            .field("allowed_origins", &self.allowed_origins)
            .field("base_url", &self.base_url)
            .field("reaper_interval", &self.reaper_interval)
            .field("store_timeout", &self.store_timeout)
            .finish()
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let host = var("SERVER_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port = match var("SERVER_PORT") {
            Some(p) => p
                .trim()
                .parse()
                .with_context(|| format!("SERVER_PORT is not a valid port: {p}"))?,
            None => 8080,
        };

        let database_url = var("DATABASE_URL").context("DATABASE_URL is required")?;
        let database_path = parse_database_url(&database_url)?;

        let encryption_key = var("ENCRYPTION_KEY").context("ENCRYPTION_KEY is required")?;
        if encryption_key.len() != KEY_LEN {
            bail!(
                "ENCRYPTION_KEY must be exactly {KEY_LEN} bytes for AES-128, got {}",
                encryption_key.len()
            );
        }

        let allowed_origins = var("ALLOWED_ORIGINS").unwrap_or_else(|| "*".into());
        let base_url = var("BASE_URL")
            .map(|u| u.trim_end_matches('/').to_owned())
            .unwrap_or_else(|| format!("http://localhost:{port}"));

        let reaper_interval = duration_var(&var, "REAPER_INTERVAL", DEFAULT_REAPER_INTERVAL)?;
        let store_timeout = duration_var(&var, "STORE_TIMEOUT", DEFAULT_STORE_TIMEOUT)?;

        Ok(Self {
            host,
            port,
            database_path,
            encryption_key,
            allowed_origins,
            base_url,
            reaper_interval,
            store_timeout,
        })
    }
}

/// Accept `redb://<path>` or a bare filesystem path.
pub fn parse_database_url(url: &str) -> Result<PathBuf> {
    let path = match url.split_once("://") {
        Some(("redb", path)) => path,
        Some((scheme, _)) => bail!("unsupported DATABASE_URL scheme `{scheme}` (expected redb://)"),
        None => url,
    };
    if path.is_empty() {
        bail!("DATABASE_URL has no path");
    }
    Ok(PathBuf::from(path))
}

fn duration_var<F>(var: &F, name: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(v) => {
            let d: humantime::Duration = v
                .trim()
                .parse()
                .with_context(|| format!("{name} is not a valid duration: {v}"))?;
            if d.is_zero() {
                bail!("{name} must be greater than zero");
            }
            Ok(d.into())
        }
        None => Ok(default),
    }
}
