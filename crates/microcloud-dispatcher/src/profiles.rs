//! Static directory mapping fleet node addresses to SSH connection profiles.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

pub const DEFAULT_SSH_PORT: u16 = 22;
const DEFAULT_USER: &str = "ubuntu";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("failed to read profile directory {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid profile directory: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("node {ip} maps to profile {alias:?}, which is not defined")]
    MissingProfile { ip: String, alias: String },
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
struct RawProfile {
    hostname: Option<String>,
    user: Option<String>,
    identity_file: PathBuf,
    port: Option<u16>,
    host_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawDirectory {
    #[serde(default)]
    nodes: HashMap<String, String>,
    #[serde(default)]
    profiles: HashMap<String, RawProfile>,
}

/// Everything needed to open a session to one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub alias: String,
    pub hostname: String,
    pub user: String,
    pub identity_file: PathBuf,
    /// Overrides the port stored for the node, if set.
    pub port: Option<u16>,
    /// Pinned server key fingerprint (`SHA256:...`). Unset means trust on first use.
    pub host_key: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ProfileDirectory {
    nodes: HashMap<String, String>,
    profiles: HashMap<String, ConnectionProfile>,
}

impl ProfileDirectory {
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let text = std::fs::read_to_string(path).map_err(|source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let dir = Self::from_toml_str(&text)?;
        tracing::info!(
            path = %path.display(),
            nodes = dir.nodes.len(),
            profiles = dir.profiles.len(),
            "loaded connection profiles"
        );
        Ok(dir)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ProfileError> {
        let raw: RawDirectory = toml::from_str(text)?;
        let profiles = raw
            .profiles
            .into_iter()
            .map(|(alias, p)| {
                let profile = ConnectionProfile {
                    hostname: p.hostname.unwrap_or_else(|| alias.clone()),
                    user: p.user.unwrap_or_else(|| DEFAULT_USER.to_string()),
                    identity_file: p.identity_file,
                    port: p.port,
                    host_key: p.host_key,
                    alias: alias.clone(),
                };
                (alias, profile)
            })
            .collect();
        Ok(Self {
            nodes: raw.nodes,
            profiles,
        })
    }

    /// Profile name registered for a node address.
    pub fn alias_for(&self, ip: &str) -> Option<&str> {
        self.nodes.get(ip).map(String::as_str)
    }

    /// `Ok(None)` when the address is not in the directory at all.
    pub fn resolve(&self, ip: &str) -> Result<Option<&ConnectionProfile>, ProfileError> {
        let Some(alias) = self.alias_for(ip) else {
            return Ok(None);
        };
        self.profiles
            .get(alias)
            .map(Some)
            .ok_or_else(|| ProfileError::MissingProfile {
                ip: ip.to_string(),
                alias: alias.to_string(),
            })
    }
}
