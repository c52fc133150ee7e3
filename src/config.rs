use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::checks::AgentConfig;

/// Where an agent listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentAddress {
    pub ip: String,
    #[serde(default = "crate::util::get_port")]
    pub port: u16,
}

impl AgentAddress {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentEntry {
    pub socket: AgentAddress,
    pub checks: AgentConfig,
}

/// Every agent a manager drives, keyed by agent name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManagerConfig {
    agents: BTreeMap<String, AgentEntry>,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the agent called `name`.
    pub fn insert(&mut self, name: impl Into<String>, socket: AgentAddress, checks: AgentConfig) {
        self.agents
            .insert(name.into(), AgentEntry { socket, checks });
    }

    pub fn with(
        mut self,
        name: impl Into<String>,
        socket: AgentAddress,
        checks: AgentConfig,
    ) -> Self {
        self.insert(name, socket, checks);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AgentEntry> {
        self.agents.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AgentEntry)> {
        self.agents.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

impl fmt::Display for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Current configuration:")?;
        for (name, entry) in &self.agents {
            writeln!(f)?;
            writeln!(f, "{name} -- {}", entry.socket)?;
            write!(f, "{}", entry.checks)?;
        }
        Ok(())
    }
}

pub fn read_config_file(path: impl AsRef<Path>) -> anyhow::Result<ManagerConfig> {
    let path = path.as_ref();
    let file_content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;

    serde_json::from_str(&file_content)
        .with_context(|| format!("invalid configuration file {}", path.display()))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn write_config_file(path: impl AsRef<Path>, config: &ManagerConfig) -> anyhow::Result<()> {
    let path = path.as_ref();
    let content = serde_json::to_string_pretty(config)?;

    std::fs::write(path, content + "\n")
        .with_context(|| format!("failed to write configuration file {}", path.display()))
}

/// The saved configurations in `dir`, sorted by file name
pub fn list_config_files(dir: impl AsRef<Path>) -> anyhow::Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read configuration directory {}", dir.display()))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path);
        }
    }

    files.sort();
    Ok(files)
}

/// Resolves a configuration given either as a path or as a name saved in `dir`.
pub fn resolve_config_path(dir: Option<&Path>, file: &str) -> PathBuf {
    match dir {
        Some(dir) if Path::new(file).extension().is_none() => dir.join(format!("{file}.json")),
        Some(dir) => dir.join(file),
        None => PathBuf::from(file),
    }
}
