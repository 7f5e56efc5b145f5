// ABOUTME: Configuration types and parsing for agentssh.yml.
// ABOUTME: Supplies dial defaults, host aliases, and the remote environment.

mod deserialize;
mod env_value;

pub use env_value::{EnvValue, resolve_env_map};

use crate::error::{Error, Result};
use crate::ssh::{DialConfig, RusshBackend};
use crate::types::ConnectionTarget;
use deserialize::deserialize_hosts;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILENAME: &str = "agentssh.yml";
pub const CONFIG_FILENAME_ALT: &str = "agentssh.yaml";
pub const CONFIG_FILENAME_DIR: &str = ".agentssh/config.yml";

/// Environment variable naming the agent socket when none is configured.
pub const AUTH_SOCK_VAR: &str = "SSH_AUTH_SOCK";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Agent socket; falls back to `$SSH_AUTH_SOCK`.
    #[serde(default)]
    pub agent_socket: Option<PathBuf>,

    #[serde(default)]
    pub forward_agent: bool,

    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,

    #[serde(default = "default_trust_first_connection")]
    pub trust_first_connection: bool,

    #[serde(default)]
    pub known_hosts: Option<PathBuf>,

    /// Short names for frequently used addresses.
    #[serde(default, deserialize_with = "deserialize_hosts")]
    pub hosts: HashMap<String, ConnectionTarget>,

    #[serde(default)]
    pub env: HashMap<String, EnvValue>,
}

fn default_timeout() -> Duration {
    DialConfig::DEFAULT_TIMEOUT
}

fn default_trust_first_connection() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            agent_socket: None,
            forward_agent: false,
            timeout: default_timeout(),
            trust_first_connection: default_trust_first_connection(),
            known_hosts: None,
            hosts: HashMap::new(),
            env: HashMap::new(),
        }
    }
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        if yaml.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(yaml).map_err(Error::from)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Find the config file in `dir`.
    pub fn discover(dir: &Path) -> Result<Self> {
        Self::find(dir)
            .map(|path| Self::load(&path))
            .unwrap_or_else(|| Err(Error::ConfigNotFound(dir.to_path_buf())))
    }

    /// Like [`discover`](Self::discover), but an absent file yields the defaults.
    pub fn discover_or_default(dir: &Path) -> Result<Self> {
        match Self::find(dir) {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    fn find(dir: &Path) -> Option<PathBuf> {
        [CONFIG_FILENAME, CONFIG_FILENAME_ALT, CONFIG_FILENAME_DIR]
            .into_iter()
            .map(|name| dir.join(name))
            .find(|path| path.exists())
    }

    /// Resolve a host alias, or parse `addr` as `[user@]host[:port]`.
    pub fn resolve_target(&self, addr: &str) -> Result<ConnectionTarget> {
        if let Some(target) = self.hosts.get(addr) {
            return Ok(target.clone());
        }
        ConnectionTarget::parse(addr).map_err(|e| Error::Ssh(e.into()))
    }

    /// Configured agent socket, else `$SSH_AUTH_SOCK`.
    pub fn agent_socket(&self) -> Result<PathBuf> {
        if let Some(path) = &self.agent_socket {
            return Ok(path.clone());
        }
        match std::env::var_os(AUTH_SOCK_VAR) {
            Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
            _ => Err(Error::MissingAgentSocket),
        }
    }

    pub fn resolved_env(&self) -> Result<HashMap<String, String>> {
        resolve_env_map(&self.env)
    }

    pub fn dial_config(&self, target: ConnectionTarget) -> Result<DialConfig> {
        Ok(DialConfig::new(target, self.agent_socket()?)
            .forward_agent(self.forward_agent)
            .timeout(self.timeout))
    }

    /// russh backend with this config's host key policy.
    pub fn backend(&self) -> RusshBackend {
        let backend = RusshBackend::new().trust_on_first_use(self.trust_first_connection);
        match &self.known_hosts {
            Some(path) => backend.known_hosts_path(path),
            None => backend,
        }
    }
}
