//! Host profile loading
//!
//! A host profile describes the stub host the CLI stands in for: which
//! capabilities it installs and how it answers process lookups.

use anyhow::{bail, Context, Result};
use host_bridge::Protocol;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Stub host profile (loaded from a TOML file)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostProfile {
    #[serde(default)]
    pub host: CapabilitySwitches,
    #[serde(default, rename = "process")]
    pub processes: Vec<ProcessRule>,
    pub library: Option<LibraryConfig>,
}

/// Which capabilities the stub host installs (all by default)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CapabilitySwitches {
    #[serde(default = "default_true")]
    pub release_object: bool,
    #[serde(default = "default_true")]
    pub free_string: bool,
    #[serde(default = "default_true")]
    pub resolve_process: bool,
    #[serde(default = "default_true")]
    pub protect_socket: bool,
    #[serde(default = "default_true")]
    pub invoke_result: bool,
}

impl Default for CapabilitySwitches {
    fn default() -> Self {
        Self {
            release_object: true,
            free_string: true,
            resolve_process: true,
            protect_socket: true,
            invoke_result: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// One entry of the flow → package table. Unset fields match anything.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessRule {
    pub package: String,
    pub protocol: Option<Protocol>,
    pub source: Option<String>,
    pub target: Option<String>,
    pub uid: Option<i32>,
}

impl ProcessRule {
    pub fn matches(&self, protocol: i32, source: &str, target: &str, uid: i32) -> bool {
        self.protocol.map_or(true, |p| p.as_raw() == protocol)
            && self.source.as_deref().map_or(true, |s| s == source)
            && self.target.as_deref().map_or(true, |t| t == target)
            && self.uid.map_or(true, |u| u == uid)
    }
}

/// Shared library exporting a host callback table
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LibraryConfig {
    pub path: PathBuf,
    #[serde(default = "default_symbol")]
    pub symbol: String,
}

fn default_symbol() -> String {
    crate::library::DEFAULT_SYMBOL.to_string()
}

impl HostProfile {
    /// First rule matching the flow
    pub fn lookup(&self, protocol: i32, source: &str, target: &str, uid: i32) -> Option<&str> {
        self.processes
            .iter()
            .find(|rule| rule.matches(protocol, source, target, uid))
            .map(|rule| rule.package.as_str())
    }
}

/// Load a host profile from a TOML file
pub fn load_profile(path: &Path) -> Result<HostProfile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read host profile: {:?}", path))?;

    let profile: HostProfile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse host profile: {:?}", path))?;

    for rule in &profile.processes {
        if rule.package.is_empty() || rule.package.contains('\0') {
            bail!("Invalid package name in host profile: {:?}", rule.package);
        }
    }

    Ok(profile)
}
