//! Unified security engine.
//!
//! Facade over the firewall, validator, rate limiter, and audit logger.
//! Every denial is written to the audit log before being re-raised, and an
//! audit write failure outranks the denial it was recording: the operator
//! asked for a durable trail, so losing it is the fatal condition.
//!
//! The engine is a scoped resource. The audit file is flushed after every
//! record and closed when the engine drops.

use crate::policy::SecurityPolicy;
use crate::security::audit::{AuditLogger, SecurityEventType};
use crate::security::firewall::{NetworkFirewall, SecurityError};
use crate::security::ratelimiter::{RateLimitExceeded, RateLimiter};
use crate::security::validator::{InputValidator, ValidationError};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Input validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    RateLimit(#[from] RateLimitExceeded),

    #[error("audit log write failed: {0}")]
    Audit(#[from] std::io::Error),
}

pub struct SecurityEngine {
    policy: Arc<SecurityPolicy>,
    firewall: NetworkFirewall,
    validator: InputValidator,
    rate_limiter: RateLimiter,
    audit: Option<AuditLogger>,
}

impl SecurityEngine {
    pub fn new(policy: Arc<SecurityPolicy>) -> std::io::Result<Self> {
        Self::with_rate_limit_window(policy, crate::security::ratelimiter::DEFAULT_WINDOW)
    }

    pub fn with_rate_limit_window(
        policy: Arc<SecurityPolicy>,
        window: Duration,
    ) -> std::io::Result<Self> {
        let audit = if policy.audit.log_file.is_empty() {
            None
        } else {
            Some(AuditLogger::new(Path::new(&policy.audit.log_file))?)
        };

        Ok(Self {
            firewall: NetworkFirewall::new(policy.clone()),
            validator: InputValidator::new(policy.clone()),
            rate_limiter: RateLimiter::with_window(window),
            policy,
            audit,
        })
    }

    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// Validate outbound access to `host:port`, auditing denials.
    pub fn validate_network(&self, host: &str, port: u16) -> Result<(), EngineError> {
        if let Err(e) = self.firewall.validate_address(host, port) {
            self.log_security(
                SecurityEventType::NetworkBlocked,
                json!({"host": host, "port": port, "reason": e.to_string()}),
            )?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate fetching `url`, auditing denials.
    pub fn validate_url(&self, url: &str) -> Result<(), EngineError> {
        if let Err(e) = self.firewall.validate_url(url) {
            self.log_security(
                SecurityEventType::UrlBlocked,
                json!({"url": url, "reason": e.to_string()}),
            )?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Validate and sanitize tool arguments, auditing failures.
    /// Returns the sanitized argument tree.
    pub fn validate_input(
        &self,
        tool_name: &str,
        schema: &Value,
        arguments: &Value,
    ) -> Result<Value, EngineError> {
        match self
            .validator
            .validate_tool_input(tool_name, schema, arguments)
        {
            Ok(sanitized) => Ok(sanitized),
            Err(e) => {
                self.log_security(
                    SecurityEventType::InputValidationFailed,
                    json!({"tool": tool_name, "reason": e.to_string()}),
                )?;
                Err(e.into())
            }
        }
    }

    /// Check the policy's rate limit for `tool_name`, auditing exceedances.
    pub fn check_rate_limit(&self, tool_name: &str) -> Result<(), EngineError> {
        let limit = self.policy.rate_limit_for(tool_name);
        if let Err(e) = self.rate_limiter.check(tool_name, limit) {
            self.log_security(
                SecurityEventType::RateLimitExceeded,
                json!({
                    "tool": tool_name,
                    "limit": limit,
                    "window_seconds": self.rate_limiter.window().as_secs(),
                }),
            )?;
            return Err(e.into());
        }
        Ok(())
    }

    /// Configured per-tool timeout in seconds. Advisory; plugins carry
    /// their own deadlines.
    pub fn tool_timeout(&self) -> u64 {
        self.policy.tool_timeout()
    }

    pub fn generate_request_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn log_tool_execution(
        &self,
        request_id: &str,
        tool_name: &str,
        arguments: &Value,
    ) -> std::io::Result<()> {
        match &self.audit {
            Some(audit) => audit.log_request(request_id, tool_name, arguments),
            None => Ok(()),
        }
    }

    pub fn log_tool_result(
        &self,
        request_id: &str,
        status: &str,
        duration_ms: f64,
    ) -> std::io::Result<()> {
        match &self.audit {
            Some(audit) => audit.log_response(request_id, status, duration_ms),
            None => Ok(()),
        }
    }

    fn log_security(&self, event_type: SecurityEventType, details: Value) -> std::io::Result<()> {
        match &self.audit {
            Some(audit) => audit.log_security_event(event_type, details),
            None => Ok(()),
        }
    }
}
