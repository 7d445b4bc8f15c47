//! JSON configuration: database connection info, this channel's
//! (world, channel) identity, and the login control-channel address to
//! dial out to (§6).

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

/// Database connection parameters; parsed and kept around even though
/// this binary's [`dbengine::driver::memory::MemoryDriver`] never opens a
/// socket, so the config format matches a production deployment's.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db: String,
}

/// Top-level channel configuration, loaded from a JSON file at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    /// This channel's world index, as login's world list numbers them.
    pub world: u8,
    /// This channel's index within its world.
    pub channel: u8,
    /// Address clients connect to, handed out by login as this channel's
    /// public ip:port.
    pub client_bind: SocketAddr,
    /// Address login's control channel listener is bound to.
    pub login_control_addr: SocketAddr,
    /// Number of session worker threads. Defaults to available parallelism.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

impl Config {
    /// Loads and parses a config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)?;
        Ok(config)
    }
}
