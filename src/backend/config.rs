//! Tool backend configuration.
//!
//! Backends are declared in a YAML file mapping name to launch descriptor.
//! An absent file yields an empty catalog and the proxy degrades into a
//! transparent chat-completions forwarder.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable prefix for ad-hoc backend declarations:
/// `TOOL_BACKEND_<NAME>="<command> [args...]"`.
const ENV_PREFIX: &str = "TOOL_BACKEND_";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BackendsConfig {
    /// Backend name -> launch descriptor. BTreeMap keeps startup ordering
    /// deterministic.
    #[serde(default)]
    pub backends: BTreeMap<String, BackendDescriptor>,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct BackendDescriptor {
    #[serde(default)]
    pub transport: Transport,

    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overrides applied on top of the inherited environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Working directory for the child, resolved relative to the proxy's cwd.
    #[serde(default)]
    pub workdir: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl fmt::Debug for BackendDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendDescriptor")
            .field("transport", &self.transport)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("workdir", &self.workdir)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Stdio,
}

impl BackendsConfig {
    /// Load the backend list from a YAML file, then apply `TOOL_BACKEND_*`
    /// environment overrides. A missing file is not an error.
    pub fn load(path: &Path) -> Result<Self, String> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("read {}: {}", path.display(), e))?;
            let config: Self = serde_yaml::from_str(&content)
                .map_err(|e| format!("parse {}: {}", path.display(), e))?;
            info!(
                path = %path.display(),
                backends = config.backends.len(),
                "Loaded backend config"
            );
            config
        } else {
            info!(path = %path.display(), "No backend config file, starting with empty catalog");
            Self::default()
        };

        config.apply_env_overrides(std::env::vars());
        Ok(config)
    }

    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let name = name.to_lowercase();
            let mut parts = value.split_whitespace().map(String::from);
            let Some(command) = parts.next() else {
                warn!(backend = %name, "Ignoring empty backend declaration from environment");
                continue;
            };
            self.backends.insert(
                name.clone(),
                BackendDescriptor {
                    transport: Transport::Stdio,
                    command,
                    args: parts.collect(),
                    env: HashMap::new(),
                    workdir: None,
                    description: None,
                },
            );
            info!(backend = %name, "Backend declared via environment");
        }
    }

    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }
}
