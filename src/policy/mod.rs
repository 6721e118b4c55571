//! Security policy model and loading.
//!
//! The policy is the immutable configuration governing one server run. Every
//! option defaults to deny/empty, so an absent section means "nothing is
//! permitted" for that concern.

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Policy file not found: {0}")]
    NotFound(String),

    #[error("Failed to read policy file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse policy YAML: {0}")]
    Parse(#[from] serde_yaml_ng::Error),

    #[error("Invalid policy structure: {0}")]
    Invalid(#[from] serde_json::Error),

    #[error("Policy must be a YAML mapping")]
    NotAMapping,

    #[error("Policy must include 'version' field")]
    MissingVersion,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkPolicy {
    #[serde(default)]
    pub allowed_ranges: Vec<String>,
    #[serde(default)]
    pub allowed_endpoints: Vec<AllowedEndpoint>,
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
    #[serde(default)]
    pub allow_dns: bool,
    #[serde(default)]
    pub dns_allowlist: Vec<String>,
}

/// An exact (hostname, port-set) pair permitted regardless of the resolved
/// IP's range membership.
#[derive(Debug, Clone, Deserialize)]
pub struct AllowedEndpoint {
    pub host: String,
    #[serde(default)]
    pub ports: Vec<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilesystemPolicy {
    #[serde(default)]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub denied_paths: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandPolicy {
    #[serde(default)]
    pub blocked: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolPolicy {
    #[serde(default)]
    pub rate_limits: HashMap<String, usize>,
    #[serde(default = "default_tool_timeout")]
    pub timeout: u64,
}

impl Default for ToolPolicy {
    fn default() -> Self {
        Self {
            rate_limits: HashMap::new(),
            timeout: default_tool_timeout(),
        }
    }
}

fn default_tool_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditPolicy {
    #[serde(default)]
    pub log_file: String,
}

/// Immutable security policy loaded once at process start.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityPolicy {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub network: NetworkPolicy,
    #[serde(default)]
    pub filesystem: FilesystemPolicy,
    #[serde(default)]
    pub commands: CommandPolicy,
    #[serde(default)]
    pub tools: ToolPolicy,
    #[serde(default)]
    pub audit: AuditPolicy,
}

/// Fallback rate limit when neither the tool nor a `default` key is configured.
const FALLBACK_RATE_LIMIT: usize = 60;

impl SecurityPolicy {
    pub fn is_port_blocked(&self, port: u16) -> bool {
        self.network.blocked_ports.contains(&port)
    }

    pub fn is_endpoint_allowed(&self, host: &str, port: u16) -> bool {
        self.network
            .allowed_endpoints
            .iter()
            .any(|e| e.host == host && e.ports.contains(&port))
    }

    pub fn is_dns_allowed(&self, hostname: &str) -> bool {
        if !self.network.allow_dns {
            return false;
        }
        self.network.dns_allowlist.iter().any(|h| h == hostname)
    }

    pub fn is_command_blocked(&self, command: &str) -> bool {
        self.commands.blocked.iter().any(|c| c == command)
    }

    /// Per-tool rate limit, falling back to the `default` key, falling back
    /// to 60 requests per window.
    pub fn rate_limit_for(&self, tool_name: &str) -> usize {
        self.tools
            .rate_limits
            .get(tool_name)
            .or_else(|| self.tools.rate_limits.get("default"))
            .copied()
            .unwrap_or(FALLBACK_RATE_LIMIT)
    }

    pub fn tool_timeout(&self) -> u64 {
        self.tools.timeout
    }

    /// Expand `${NAME}` references in the fields that hold filesystem paths.
    /// Called once at load time; unknown variables stay literal.
    fn expand_env_vars(&mut self) {
        for p in &mut self.filesystem.allowed_paths {
            *p = expand_env(p);
        }
        for p in &mut self.filesystem.denied_paths {
            *p = expand_env(p);
        }
        self.audit.log_file = expand_env(&self.audit.log_file);
    }
}

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var regex"));

/// Expand `${NAME}` environment variable references in a string.
///
/// Unknown names remain literal. `${HOME}` falls back to the home directory
/// when the variable itself is unset.
pub fn expand_env(value: &str) -> String {
    ENV_VAR_RE
        .replace_all(value, |caps: &regex::Captures| {
            let name = &caps[1];
            if let Ok(val) = std::env::var(name) {
                return val;
            }
            if name == "HOME" {
                if let Some(home) = dirs::home_dir() {
                    return home.to_string_lossy().to_string();
                }
            }
            caps[0].to_string()
        })
        .to_string()
}

/// Load and validate a security policy from a YAML file.
pub fn load_policy(path: &Path) -> Result<SecurityPolicy, PolicyError> {
    if !path.exists() {
        return Err(PolicyError::NotFound(path.display().to_string()));
    }

    let content = std::fs::read_to_string(path)?;
    parse_policy(&content)
}

/// Parse a policy from YAML text. Split out from [`load_policy`] so tests
/// can feed documents without touching the filesystem.
pub fn parse_policy(content: &str) -> Result<SecurityPolicy, PolicyError> {
    // Deserialized through serde_json's value tree so the document can be
    // inspected before it is shaped into the typed policy.
    let doc: serde_json::Value = serde_yaml_ng::from_str(content)?;

    let mapping = doc.as_object().ok_or(PolicyError::NotAMapping)?;
    if !mapping.contains_key("version") {
        return Err(PolicyError::MissingVersion);
    }

    let mut policy: SecurityPolicy = serde_json::from_value(doc)?;
    policy.expand_env_vars();
    Ok(policy)
}
