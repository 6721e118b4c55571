//! Tool argument validation and sanitization.
//!
//! Two passes per invocation: structural validation against the tool's JSON
//! Schema (Draft 2020-12), then domain sanitization of leaves tagged
//! `format: "path"` or `format: "command"`. The sanitized tree is returned;
//! path fields come back canonicalized, so re-validating the output is a
//! no-op.

use crate::policy::SecurityPolicy;
use glob::Pattern;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tracing::warn;

pub const DEFAULT_MAX_STRING_LENGTH: usize = 10_000;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Schema validation failed at '{path}': {message}")]
    Schema { path: String, message: String },

    #[error("Invalid schema for tool {tool}: {message}")]
    InvalidSchema { tool: String, message: String },

    #[error("Path contains null bytes")]
    NullBytes,

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path traversal detected: {path} escapes {base}")]
    Traversal { path: String, base: String },

    #[error("Path is denied by policy: {0}")]
    PathDenied(String),

    #[error("Path is not in allowed directories: {0}")]
    PathNotAllowed(String),

    #[error("Field '{field}' exceeds maximum length of {max}")]
    StringTooLong { field: String, max: usize },

    #[error("Command contains blocked metacharacter or pattern: {0}")]
    CommandMetacharacter(String),

    #[error("Command is blocked by policy: {0}")]
    CommandBlocked(String),
}

/// Shell metacharacters that enable chaining, substitution, or grouping.
/// This is a defense-in-depth denylist; plugins that spawn subprocesses are
/// still expected to build argument vectors without a shell.
static SHELL_METACHARACTERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[;&|`$(){}]").expect("metacharacter regex"));

pub struct InputValidator {
    policy: Arc<SecurityPolicy>,
    max_string_length: usize,
    base_path: Option<PathBuf>,
    allowed_patterns: Vec<Pattern>,
    /// Literal prefixes of allowed patterns (everything before the first
    /// glob metacharacter). A path that enters one of these roots via its
    /// raw spelling but resolves outside it is a traversal, not merely
    /// "not allowed".
    allowed_roots: Vec<PathBuf>,
    denied_patterns: Vec<Pattern>,
}

impl InputValidator {
    pub fn new(policy: Arc<SecurityPolicy>) -> Self {
        Self::with_limits(policy, DEFAULT_MAX_STRING_LENGTH, None)
    }

    pub fn with_limits(
        policy: Arc<SecurityPolicy>,
        max_string_length: usize,
        base_path: Option<PathBuf>,
    ) -> Self {
        let compile = |patterns: &[String], kind: &str| -> Vec<Pattern> {
            patterns
                .iter()
                .filter_map(|p| match Pattern::new(p) {
                    Ok(pat) => Some(pat),
                    Err(e) => {
                        warn!("validator: ignoring invalid {} glob '{}': {}", kind, p, e);
                        None
                    }
                })
                .collect()
        };

        let allowed_patterns = compile(&policy.filesystem.allowed_paths, "allowed");
        let denied_patterns = compile(&policy.filesystem.denied_paths, "denied");
        let allowed_roots = policy
            .filesystem
            .allowed_paths
            .iter()
            .filter_map(|p| glob_literal_base(p))
            .collect();

        Self {
            policy,
            max_string_length,
            base_path,
            allowed_patterns,
            allowed_roots,
            denied_patterns,
        }
    }

    /// Validate `arguments` against `schema`, then sanitize tagged fields.
    /// Returns the sanitized argument tree.
    pub fn validate_tool_input(
        &self,
        tool_name: &str,
        schema: &Value,
        arguments: &Value,
    ) -> Result<Value, ValidationError> {
        let validator =
            jsonschema::validator_for(schema).map_err(|e| ValidationError::InvalidSchema {
                tool: tool_name.to_string(),
                message: e.to_string(),
            })?;

        if let Some(error) = validator.iter_errors(arguments).next() {
            let pointer = error.instance_path().to_string();
            let path = if pointer.is_empty() {
                "root".to_string()
            } else {
                pointer
                    .trim_start_matches('/')
                    .replace('/', ".")
            };
            return Err(ValidationError::Schema {
                path,
                message: error.to_string(),
            });
        }

        match arguments {
            Value::Object(map) => Ok(Value::Object(self.process_object(map, schema)?)),
            other => self.process_node(other, schema, "root"),
        }
    }

    fn process_object(
        &self,
        arguments: &Map<String, Value>,
        schema: &Value,
    ) -> Result<Map<String, Value>, ValidationError> {
        let properties = schema.get("properties").and_then(Value::as_object);
        let mut result = Map::with_capacity(arguments.len());
        for (key, value) in arguments {
            let prop_schema = properties
                .and_then(|props| props.get(key))
                .unwrap_or(&Value::Null);
            result.insert(key.clone(), self.process_node(value, prop_schema, key)?);
        }
        Ok(result)
    }

    fn process_node(
        &self,
        value: &Value,
        schema: &Value,
        field_name: &str,
    ) -> Result<Value, ValidationError> {
        match value {
            Value::String(s) => {
                if s.chars().count() > self.max_string_length {
                    return Err(ValidationError::StringTooLong {
                        field: field_name.to_string(),
                        max: self.max_string_length,
                    });
                }
                match schema.get("format").and_then(Value::as_str) {
                    Some("path") => Ok(Value::String(self.sanitize_path(s)?)),
                    Some("command") => Ok(Value::String(self.sanitize_command(s)?)),
                    _ => Ok(value.clone()),
                }
            }
            Value::Object(map) => {
                let is_object_schema = schema.get("type").and_then(Value::as_str)
                    == Some("object")
                    || schema.get("properties").is_some();
                if is_object_schema {
                    Ok(Value::Object(self.process_object(map, schema)?))
                } else {
                    Ok(value.clone())
                }
            }
            Value::Array(items) => {
                let items_schema = schema.get("items").unwrap_or(&Value::Null);
                let processed = items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.process_node(item, items_schema, &format!("{}[{}]", field_name, i))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(processed))
            }
            other => Ok(other.clone()),
        }
    }

    /// Sanitize a `format: "path"` field: reject null bytes, expand `~`,
    /// resolve to an absolute path, then apply the traversal, denied, and
    /// allowed checks in that order.
    pub fn sanitize_path(&self, raw: &str) -> Result<String, ValidationError> {
        if raw.contains('\0') {
            return Err(ValidationError::NullBytes);
        }

        let expanded = expand_tilde(raw)?;

        let absolute = if expanded.is_absolute() {
            expanded
        } else if let Some(base) = &self.base_path {
            base.join(&expanded)
        } else {
            std::env::current_dir()
                .map_err(|e| ValidationError::InvalidPath(e.to_string()))?
                .join(&expanded)
        };

        let resolved = resolve_path(&absolute);

        // Explicit base: the resolved path must stay a descendant.
        if let Some(base) = &self.base_path {
            let base_resolved = resolve_path(base);
            if !resolved.starts_with(&base_resolved) {
                return Err(ValidationError::Traversal {
                    path: raw.to_string(),
                    base: base.display().to_string(),
                });
            }
        }

        // A raw path that spells its way into an allowed root but resolves
        // back out of it is a traversal attempt, reported as such.
        for root in &self.allowed_roots {
            if absolute.starts_with(root) && !resolved.starts_with(root) {
                return Err(ValidationError::Traversal {
                    path: raw.to_string(),
                    base: root.display().to_string(),
                });
            }
        }

        let resolved_str = resolved.to_string_lossy().to_string();

        // Denied patterns override any allow.
        if self
            .denied_patterns
            .iter()
            .any(|p| p.matches(&resolved_str))
        {
            return Err(ValidationError::PathDenied(resolved_str));
        }

        if !self.allowed_patterns.is_empty()
            && !self
                .allowed_patterns
                .iter()
                .any(|p| p.matches(&resolved_str))
        {
            return Err(ValidationError::PathNotAllowed(resolved_str));
        }

        Ok(resolved_str)
    }

    /// Sanitize a `format: "command"` field: reject shell metacharacters,
    /// then check the policy's blocked list against the head token and the
    /// raw command text.
    pub fn sanitize_command(&self, raw: &str) -> Result<String, ValidationError> {
        let command = raw.trim().to_string();

        if let Some(found) = SHELL_METACHARACTERS.find(&command) {
            return Err(ValidationError::CommandMetacharacter(
                found.as_str().to_string(),
            ));
        }

        let head = command.split_whitespace().next().unwrap_or("");
        for blocked in &self.policy.commands.blocked {
            if head == blocked.as_str() || command.contains(blocked.as_str()) {
                return Err(ValidationError::CommandBlocked(command));
            }
        }

        Ok(command)
    }
}

/// Expand a leading `~` to the home directory.
fn expand_tilde(raw: &str) -> Result<PathBuf, ValidationError> {
    if raw == "~" || raw.starts_with("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| ValidationError::InvalidPath("home directory unavailable".into()))?;
        if raw == "~" {
            return Ok(home);
        }
        return Ok(home.join(&raw[2..]));
    }
    Ok(PathBuf::from(raw))
}

/// Resolve a path to its canonical form: symlinks followed when the path
/// exists, lexical `.`/`..` normalization otherwise.
fn resolve_path(path: &Path) -> PathBuf {
    let normalized = normalize_lexically(path);
    std::fs::canonicalize(&normalized).unwrap_or(normalized)
}

/// Normalize `.` and `..` components without touching the filesystem.
/// `..` at the root stays at the root.
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // pop() refuses to remove a root prefix, which is exactly
                // the "`..` above `/` stays at `/`" behavior wanted here.
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Literal directory prefix of a glob pattern: components up to the first
/// one containing a glob metacharacter. `/work/**` yields `/work`.
fn glob_literal_base(pattern: &str) -> Option<PathBuf> {
    let mut base = PathBuf::new();
    let mut saw_literal = false;
    for component in Path::new(pattern).components() {
        let text = component.as_os_str().to_string_lossy();
        if text.contains(['*', '?', '[', ']']) {
            break;
        }
        if matches!(component, Component::Normal(_)) {
            saw_literal = true;
        }
        base.push(component.as_os_str());
    }
    if saw_literal { Some(base) } else { None }
}
