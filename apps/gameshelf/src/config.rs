//! Server configuration.
//!
//! Stored as TOML at `~/.config/gameshelf/server.toml` unless `--config`
//! points elsewhere. Paths may start with `~`, expanded against `$HOME`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::Context;
use gameshelf_scanner::{IgnoreSet, ScanConfig};
use serde::{Deserialize, Serialize};

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Library directories to index.
    #[serde(default = "default_roots")]
    pub roots: Vec<PathBuf>,

    /// Regular expressions; matching paths are skipped while scanning.
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Extensions to index, without the dot. Empty indexes every file.
    #[serde(default)]
    pub extensions: Vec<String>,

    /// HTTP port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Address to bind.
    #[serde(default = "default_bind")]
    pub bind: IpAddr,

    /// Registry file.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    /// Download speed ceiling in KiB/s for every request (0 = none).
    #[serde(default)]
    pub max_download_speed_kib: u64,

    /// Run a reindex pass before serving.
    #[serde(default = "default_true")]
    pub index_on_start: bool,
}

fn default_roots() -> Vec<PathBuf> {
    vec![PathBuf::from("~/Games")]
}

fn default_port() -> u16 {
    8080
}

fn default_bind() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_database_path() -> PathBuf {
    PathBuf::from("~/.config/gameshelf/games.json")
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            roots: default_roots(),
            ignore_patterns: Vec::new(),
            extensions: Vec::new(),
            port: default_port(),
            bind: default_bind(),
            database_path: default_database_path(),
            max_download_speed_kib: 0,
            index_on_start: default_true(),
        }
    }
}

impl Config {
    /// Loads the configuration at `path` (or the default location),
    /// writing the defaults there first if the file does not exist.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_path(),
        };

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("invalid configuration in {}", path.display()))?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = Config::default();
            config.save(&path)?;
            tracing::info!(path = %path.display(), "default configuration written");
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.database_path)
    }

    /// Download ceiling in bytes per second.
    pub fn max_download_speed(&self) -> Option<u64> {
        match self.max_download_speed_kib {
            0 => None,
            kib => Some(kib.saturating_mul(1024)),
        }
    }

    /// Scanner settings with `~` expanded and ignore patterns compiled.
    pub fn scan_config(&self) -> anyhow::Result<ScanConfig> {
        Ok(ScanConfig {
            roots: self.roots.iter().map(|r| expand_home(r)).collect(),
            ignore: IgnoreSet::new(&self.ignore_patterns)?,
            extensions: self.extensions.clone(),
        })
    }
}

/// Default configuration file location.
pub fn config_path() -> PathBuf {
    home_dir()
        .join(".config")
        .join("gameshelf")
        .join("server.toml")
}

fn home_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var_os(var)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Replaces a leading `~` component with the home directory.
fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}
