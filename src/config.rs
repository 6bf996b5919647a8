//! Application configuration.

use crate::transport::{Certificate, PrivateKey};
use anyhow::{Context, Error};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};
use serde::Deserialize;
use std::path::Path;
use tokio::{fs, sync::mpsc};
use tracing::warn;

pub use crate::client::config::ClientConfig;
pub use crate::server::config::ServerConfig;

pub const CONFIG_FILE_PATH: &str = "./seledri.toml";

/// Data structure representing the config file scheme.
#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default)]
    pub log_level: LogLevel,
    server: Option<ServerConfig>,
    client: Option<ClientConfig>,
}

#[derive(Clone, Copy, PartialEq, Eq, Default, Deserialize, Debug)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Config {
    pub async fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let buf = fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        let config = toml::from_str(&buf).context("failed to parse config file")?;
        Ok(config)
    }

    pub fn server(&self) -> Result<ServerConfig, Error> {
        self.server
            .clone()
            .context("missing [server] section in config")
    }

    pub fn client(&self) -> Result<ClientConfig, Error> {
        self.client
            .clone()
            .context("missing [client] section in config")
    }
}

pub async fn read_certificate(path: &Path) -> Result<Certificate, Error> {
    let buf = fs::read(path)
        .await
        .with_context(|| format!("failed to read certificate {}", path.display()))?;
    Ok(buf.into())
}

pub async fn read_private_key(path: &Path) -> Result<PrivateKey, Error> {
    let buf = fs::read(path)
        .await
        .with_context(|| format!("failed to read private key {}", path.display()))?;
    Ok(buf.into())
}

/// Watches the config file for changes.
pub struct ConfigWatcher {
    changed: mpsc::Receiver<()>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Resolves when the config file has been rewritten. `None` means the
    /// watcher itself has stopped.
    pub async fn changed(&mut self) -> Option<()> {
        self.changed.recv().await
    }
}

pub fn watch(path: impl AsRef<Path>) -> Result<ConfigWatcher, Error> {
    let (tx, rx) = mpsc::channel(1);

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                // coalesce bursts of notifications into one pending signal
                tx.try_send(()).ok();
            }
            Ok(_) => (),
            Err(err) => warn!(error = %err, "config watch error"),
        }
    })
    .context("failed to create config watcher")?;

    watcher
        .watch(path.as_ref(), RecursiveMode::NonRecursive)
        .with_context(|| format!("failed to watch config file {}", path.as_ref().display()))?;

    Ok(ConfigWatcher {
        changed: rx,
        _watcher: watcher,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_parse_example() {
        let config = Config::read("./example.seledri.toml").await.unwrap();
        assert_eq!(config.log_level, LogLevel::Info);
        config.server().unwrap();
        config.client().unwrap();
    }

    #[test]
    fn test_missing_sections() {
        let config: Config = toml::from_str("log_level = \"debug\"").unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert!(config.server().is_err());
        assert!(config.client().is_err());
    }
}
