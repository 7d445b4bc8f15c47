//! JSON configuration: database connection info plus the world/channel
//! topology login needs to know about to route clients and accept control
//! channels (§6's observed config schema).

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

/// Database connection parameters. `login` itself never opens a socket to
/// a MySQL server (see `dbengine::driver::memory::MemoryDriver`), but the
/// fields are parsed and kept around so the config format matches what a
/// production deployment would supply.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub db: String,
}

/// One channel within a world: the address login expects its control
/// connection to identify itself from.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    pub host: String,
    pub ip: String,
    pub port: u16,
}

/// One world: an ordered list of channels.
#[derive(Debug, Clone, Deserialize)]
pub struct WorldConfig {
    #[serde(default)]
    pub name: String,
    pub channels: Vec<ChannelConfig>,
}

/// Top-level login configuration, loaded from a JSON file at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub worlds: Vec<WorldConfig>,
    /// Address clients connect to. Not part of the observed schema (which
    /// only describes worlds/channels from the client's perspective), so
    /// this defaults to the login port every retail client expects.
    #[serde(default = "default_client_bind")]
    pub client_bind: SocketAddr,
    /// Address the control channel listener binds, for channels to dial.
    #[serde(default = "default_control_bind")]
    pub control_bind: SocketAddr,
    /// Number of session worker threads. Defaults to available parallelism.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

fn default_client_bind() -> SocketAddr {
    "0.0.0.0:8484".parse().unwrap()
}

fn default_control_bind() -> SocketAddr {
    "0.0.0.0:8585".parse().unwrap()
}

impl Config {
    /// Loads and parses a config file from `path`.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&text)?;
        if config.worlds.is_empty() {
            anyhow::bail!("config must declare at least one world");
        }
        for world in &config.worlds {
            if world.channels.is_empty() {
                anyhow::bail!("world '{}' declares no channels", world.name);
            }
        }
        Ok(config)
    }

    /// Total channel count across every world, for sizing the control
    /// listener's slot table.
    pub fn total_channels(&self) -> usize {
        self.worlds.iter().map(|w| w.channels.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load_str(contents: &str) -> anyhow::Result<Config> {
        let path = std::env::temp_dir().join(format!("login-config-test-{:?}-{}.json", std::thread::current().id(), contents.len()));
        std::fs::write(&path, contents)?;
        let result = Config::load(&path);
        let _ = std::fs::remove_file(&path);
        result
    }

    #[test]
    fn rejects_a_world_with_no_channels() {
        let err = load_str(r#"{"database":{"host":"h","port":1,"user":"u","db":"d"},"worlds":[{"name":"w","channels":[]}]}"#).unwrap_err();
        assert!(err.to_string().contains("no channels"));
    }

    #[test]
    fn total_channels_sums_across_worlds() {
        let config = load_str(
            r#"{"database":{"host":"h","port":1,"user":"u","db":"d"},"worlds":[
                {"name":"a","channels":[{"host":"h","ip":"1.1.1.1","port":1},{"host":"h","ip":"1.1.1.1","port":2}]},
                {"name":"b","channels":[{"host":"h","ip":"1.1.1.1","port":3}]}
            ]}"#,
        )
        .unwrap();
        assert_eq!(config.total_channels(), 3);
    }
}
