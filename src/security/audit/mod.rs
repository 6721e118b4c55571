//! Append-only audit logging in JSON Lines format.
//!
//! Every record is one JSON object followed by a newline and a flush, so the
//! log survives an abrupt process death up to the last completed write.
//! Sensitive argument values are redacted before they reach the file.

use chrono::{SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};

/// Argument keys whose values are never written to the log.
static SENSITIVE_KEY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)password|secret|api[_-]?key|token|auth|credential|private[_-]?key")
        .expect("sensitive key regex")
});

pub const REDACTED: &str = "[REDACTED]";

/// Replace the value of every sensitive key, at any depth, with
/// [`REDACTED`]. Non-object leaves pass through unchanged.
pub fn redact_arguments(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, val) in map {
                if SENSITIVE_KEY_RE.is_match(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), redact_arguments(val));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_arguments).collect()),
        other => other.clone(),
    }
}

/// ISO-8601 UTC with millisecond precision and `Z` suffix.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    NetworkBlocked,
    UrlBlocked,
    InputValidationFailed,
    RateLimitExceeded,
}

/// The three record shapes that appear in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditRecord {
    Request {
        timestamp: String,
        request_id: String,
        tool_name: String,
        arguments: Value,
    },
    Response {
        timestamp: String,
        request_id: String,
        result_status: String,
        execution_time_ms: f64,
    },
    Security {
        timestamp: String,
        event_type: SecurityEventType,
        details: Value,
    },
}

pub struct AuditLogger {
    file: Mutex<File>,
    path: PathBuf,
}

impl AuditLogger {
    /// Open the log for append, creating the parent directory if needed.
    pub fn new(path: &Path) -> std::io::Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Log an incoming tool request. Arguments are redacted.
    pub fn log_request(
        &self,
        request_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> std::io::Result<()> {
        self.write_record(&AuditRecord::Request {
            timestamp: timestamp(),
            request_id: request_id.to_string(),
            tool_name: tool_name.to_string(),
            arguments: redact_arguments(arguments),
        })
    }

    pub fn log_response(
        &self,
        request_id: &str,
        result_status: &str,
        execution_time_ms: f64,
    ) -> std::io::Result<()> {
        self.write_record(&AuditRecord::Response {
            timestamp: timestamp(),
            request_id: request_id.to_string(),
            result_status: result_status.to_string(),
            execution_time_ms,
        })
    }

    pub fn log_security_event(
        &self,
        event_type: SecurityEventType,
        details: Value,
    ) -> std::io::Result<()> {
        self.write_record(&AuditRecord::Security {
            timestamp: timestamp(),
            event_type,
            details,
        })
    }

    fn write_record(&self, record: &AuditRecord) -> std::io::Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock().expect("audit file lock");
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()
    }
}
