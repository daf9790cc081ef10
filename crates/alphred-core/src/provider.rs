//! The agent provider contract: event grammar, options, and error taxonomy.
//!
//! These types describe the wire shape any provider adapter must produce;
//! the `Provider` trait and concrete/stub adapters that implement this
//! contract live in `alphred-engine` since they perform I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::ProviderEventType;

/// One event in a provider's ordered output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderEvent {
    #[serde(rename = "type")]
    pub event_type: ProviderEventType,
    pub content: Value,
    pub metadata: Option<Value>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

/// Approval policy for tool execution, enumerated by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    Always,
    OnRequest,
    Never,
}

/// Sandbox isolation mode for tool execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxMode {
    ReadOnly,
    WorkspaceWrite,
    FullAccess,
}

/// Web search capability mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebSearchMode {
    Disabled,
    Enabled,
    RequireApproval,
}

/// Execution permissions threaded through to the provider as part of
/// `ProviderOptions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPermissions {
    pub approval_policy: ApprovalPolicy,
    pub sandbox_mode: SandboxMode,
    pub network_access_enabled: bool,
    /// Must be non-empty when present.
    pub additional_directories: Vec<String>,
    pub web_search_mode: WebSearchMode,
}

/// Options passed to `Provider::run`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderOptions {
    /// Required, non-empty.
    pub working_directory: String,
    /// Trimmed, non-empty when present.
    pub system_prompt: Option<String>,
    /// Sequence of non-empty strings: the assembled upstream context.
    pub context: Vec<String>,
    /// Positive, `<= i32::MAX` milliseconds.
    pub timeout_ms: Option<u64>,
    /// Non-empty when present.
    pub model: Option<String>,
    pub execution_permissions: Option<ExecutionPermissions>,
}

impl ProviderOptions {
    /// Validates the structural requirements of the options contract,
    /// independent of any particular provider's additional restrictions.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.working_directory.trim().is_empty() {
            return Err(ProviderError::invalid_options(
                "working_directory must be non-empty",
            ));
        }
        if let Some(prompt) = &self.system_prompt {
            if prompt.trim().is_empty() {
                return Err(ProviderError::invalid_options(
                    "system_prompt must be non-empty when present",
                ));
            }
        }
        if self.context.iter().any(|c| c.is_empty()) {
            return Err(ProviderError::invalid_options(
                "context entries must be non-empty",
            ));
        }
        if let Some(timeout) = self.timeout_ms {
            if timeout == 0 || timeout > i32::MAX as u64 {
                return Err(ProviderError::invalid_options(
                    "timeout must be positive and <= i32::MAX milliseconds",
                ));
            }
        }
        if let Some(model) = &self.model {
            if model.trim().is_empty() {
                return Err(ProviderError::invalid_options(
                    "model must be non-empty when present",
                ));
            }
        }
        if let Some(perms) = &self.execution_permissions {
            if perms.additional_directories.iter().any(|d| d.is_empty()) {
                return Err(ProviderError::invalid_options(
                    "additional_directories entries must be non-empty",
                ));
            }
        }
        Ok(())
    }
}

/// Classification attached to retryable provider errors, used by the
/// diagnostics recorder and the executor's retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    Auth,
    RateLimit,
    Timeout,
    Transport,
    InternalRetryable,
    Internal,
}

/// The provider adapter's typed error taxonomy.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
pub enum ProviderError {
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("invalid event: {0}")]
    InvalidEvent(String),
    #[error("missing result event")]
    MissingResult,
    #[error("auth error: {0}")]
    AuthError(String),
    #[error("timeout: {0}")]
    Timeout(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("transport error: {0}")]
    TransportError(String),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl ProviderError {
    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidOptions(_) => "PROVIDER_INVALID_OPTIONS",
            Self::InvalidConfig(_) => "PROVIDER_INVALID_CONFIG",
            Self::InvalidEvent(_) => "PROVIDER_INVALID_EVENT",
            Self::MissingResult => "PROVIDER_MISSING_RESULT",
            Self::AuthError(_) => "PROVIDER_AUTH_ERROR",
            Self::Timeout(_) => "PROVIDER_TIMEOUT",
            Self::RateLimited(_) => "PROVIDER_RATE_LIMITED",
            Self::TransportError(_) => "PROVIDER_TRANSPORT_ERROR",
            Self::InternalError(_) => "PROVIDER_INTERNAL_ERROR",
        }
    }

    /// Whether the executor should treat this as a retryable node failure.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::TransportError(_)
        ) || matches!(self, Self::InternalError(msg) if is_5xx(&msg.to_lowercase()))
    }

    pub fn classification(&self) -> ErrorClassification {
        match self {
            Self::AuthError(_) => ErrorClassification::Auth,
            Self::RateLimited(_) => ErrorClassification::RateLimit,
            Self::Timeout(_) => ErrorClassification::Timeout,
            Self::TransportError(_) => ErrorClassification::Transport,
            Self::InternalError(msg) if is_5xx(&msg.to_lowercase()) => {
                ErrorClassification::InternalRetryable
            }
            Self::InternalError(_) => ErrorClassification::Internal,
            _ => ErrorClassification::Internal,
        }
    }

    /// Classifies a raw error message from a provider transport into the
    /// canonical taxonomy, per the classification rules: auth wording or
    /// 401/403 classify as auth (even alongside rate-limit wording);
    /// otherwise 429 or explicit rate-limit wording classifies as
    /// rate-limit; `ETIMEDOUT`/"timeout" classifies as timeout;
    /// `ECONNRESET`/"socket"/"stream" classifies as transport; 5xx
    /// classifies as internal-retryable; anything else is internal.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let has_auth_wording = lower.contains("unauthorized")
            || lower.contains("forbidden")
            || lower.contains("auth")
            || lower.contains(" 401")
            || lower.contains(" 403")
            || lower.starts_with("401")
            || lower.starts_with("403");
        if has_auth_wording {
            return Self::AuthError(message.to_string());
        }
        if lower.contains(" 429")
            || lower.starts_with("429")
            || lower.contains("rate limit")
            || lower.contains("rate-limit")
            || lower.contains("too many requests")
        {
            return Self::RateLimited(message.to_string());
        }
        if lower.contains("etimedout") || lower.contains("timeout") || lower.contains("timed out")
        {
            return Self::Timeout(message.to_string());
        }
        if lower.contains("econnreset") || lower.contains("socket") || lower.contains("stream") {
            return Self::TransportError(message.to_string());
        }
        if is_5xx(&lower) {
            return Self::InternalError(message.to_string());
        }
        Self::InternalError(message.to_string())
    }
}

fn is_5xx(lower: &str) -> bool {
    for code in ["500", "501", "502", "503", "504", "505"] {
        if lower.contains(code) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_prefers_auth_over_rate_limit_wording() {
        let err = ProviderError::classify("403 forbidden: rate limit exceeded");
        assert_eq!(err.classification(), ErrorClassification::Auth);
    }

    #[test]
    fn classify_rate_limited_on_429() {
        let err = ProviderError::classify("HTTP 429 too many requests");
        assert_eq!(err.classification(), ErrorClassification::RateLimit);
        assert!(err.retryable());
    }

    #[test]
    fn classify_timeout_on_etimedout() {
        let err = ProviderError::classify("connect ETIMEDOUT 10.0.0.1:443");
        assert_eq!(err.classification(), ErrorClassification::Timeout);
        assert!(err.retryable());
    }

    #[test]
    fn classify_transport_on_socket_reset() {
        let err = ProviderError::classify("read ECONNRESET");
        assert_eq!(err.classification(), ErrorClassification::Transport);
        assert!(err.retryable());
    }

    #[test]
    fn classify_internal_retryable_on_5xx() {
        let err = ProviderError::classify("upstream returned 503 Service Unavailable");
        assert!(matches!(err, ProviderError::InternalError(_)));
        assert_eq!(err.classification(), ErrorClassification::InternalRetryable);
        assert!(err.retryable());
    }

    #[test]
    fn classify_internal_not_retryable_otherwise() {
        let err = ProviderError::classify("unexpected malformed response");
        assert_eq!(err.classification(), ErrorClassification::Internal);
        assert!(!err.retryable());
    }

    #[test]
    fn validate_rejects_empty_working_directory() {
        let opts = ProviderOptions {
            working_directory: "   ".to_string(),
            system_prompt: None,
            context: vec![],
            timeout_ms: None,
            model: None,
            execution_permissions: None,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout() {
        let opts = ProviderOptions {
            working_directory: "/tmp".to_string(),
            system_prompt: None,
            context: vec![],
            timeout_ms: Some(0),
            model: None,
            execution_permissions: None,
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn validate_accepts_minimal_options() {
        let opts = ProviderOptions {
            working_directory: "/tmp".to_string(),
            system_prompt: None,
            context: vec![],
            timeout_ms: None,
            model: None,
            execution_permissions: None,
        };
        assert!(opts.validate().is_ok());
    }
}
