//! Error taxonomy for handlemail, spanning validators, routing, scheduling, and delivery.

use thiserror::Error;

/// Result type alias used throughout handlemail crates.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error kinds for the email-ingestion/agent/scheduler pipeline.
#[derive(Debug, Error)]
pub enum Error {
    // ==========================================================================
    // Authentication
    // ==========================================================================
    #[error("invalid API key")]
    InvalidApiKey,

    #[error("missing or invalid bearer token")]
    InvalidBearerToken,

    // ==========================================================================
    // Handle Resolution
    // ==========================================================================
    #[error("unsupported email handle: {0}")]
    UnsupportedHandle(String),

    #[error("handle already registered: {0}")]
    HandleAlreadyExists(String),

    // ==========================================================================
    // Attachment Validation
    // ==========================================================================
    #[error("attachment '{filename}' is {size_bytes} bytes, exceeding the per-file limit of {limit_bytes} bytes")]
    AttachmentTooLarge {
        filename: String,
        size_bytes: u64,
        limit_bytes: u64,
    },

    #[error("{count} attachments exceed the maximum of {limit}")]
    TooManyAttachments { count: usize, limit: usize },

    #[error("attachment '{filename}' has unsupported content type '{content_type}'")]
    UnsupportedAttachment {
        filename: String,
        content_type: String,
    },

    // ==========================================================================
    // Rate Limiting
    // ==========================================================================
    #[error("rate limit exceeded for period {period} ({scope})")]
    RateLimitExceeded { period: String, scope: String },

    // ==========================================================================
    // Whitelist
    // ==========================================================================
    #[error("sender not whitelisted (verification_triggered={verification_triggered})")]
    NotWhitelisted { verification_triggered: bool },

    // ==========================================================================
    // Idempotency
    // ==========================================================================
    #[error("duplicate message already queued: {0}")]
    DuplicateQueued(String),

    #[error("duplicate message already processed: {0}")]
    DuplicateProcessed(String),

    // ==========================================================================
    // Model Routing
    // ==========================================================================
    #[error("model router error: {0}")]
    ModelRouterError(String),

    // ==========================================================================
    // Tool Execution
    // ==========================================================================
    #[error("tool '{tool_name}' failed: {message}")]
    ToolError { tool_name: String, message: String },

    // ==========================================================================
    // Delivery
    // ==========================================================================
    #[error("email delivery failed: {0}")]
    DeliveryError(String),

    // ==========================================================================
    // Startup Configuration
    // ==========================================================================
    #[error("model config file missing or unreadable: {0}")]
    ModelConfigMissing(String),

    #[error("no default model group configured")]
    DefaultModelGroupMissing,

    // ==========================================================================
    // Scheduling
    // ==========================================================================
    #[error("cron expression '{cron}' fires more often than the minimum interval of {min_interval_secs}s")]
    ScheduledTaskTooFrequent { cron: String, min_interval_secs: u64 },

    #[error("owner '{owner_email}' already has {count} active scheduled tasks (limit {limit})")]
    TaskLimitReached {
        owner_email: String,
        count: usize,
        limit: usize,
    },

    #[error("recursive scheduling is not allowed from a run triggered by a scheduled task")]
    RecursiveSchedulingNotAllowed,

    // ==========================================================================
    // I/O & Serialization
    // ==========================================================================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==========================================================================
    // Internal
    // ==========================================================================
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns the stable error-kind identifier used in API responses and logs.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidApiKey => "INVALID_API_KEY",
            Self::InvalidBearerToken => "INVALID_BEARER_TOKEN",
            Self::UnsupportedHandle(_) => "UNSUPPORTED_HANDLE",
            Self::HandleAlreadyExists(_) => "HANDLE_ALREADY_EXISTS",
            Self::AttachmentTooLarge { .. } => "ATTACHMENT_TOO_LARGE",
            Self::TooManyAttachments { .. } => "TOO_MANY_ATTACHMENTS",
            Self::UnsupportedAttachment { .. } => "UNSUPPORTED_ATTACHMENT",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::NotWhitelisted { .. } => "NOT_WHITELISTED",
            Self::DuplicateQueued(_) => "DUPLICATE_QUEUED",
            Self::DuplicateProcessed(_) => "DUPLICATE_PROCESSED",
            Self::ModelRouterError(_) => "MODEL_ROUTER_ERROR",
            Self::ToolError { .. } => "TOOL_ERROR",
            Self::DeliveryError(_) => "DELIVERY_ERROR",
            Self::ModelConfigMissing(_) => "MODEL_CONFIG_MISSING",
            Self::DefaultModelGroupMissing => "DEFAULT_MODEL_GROUP_MISSING",
            Self::ScheduledTaskTooFrequent { .. } => "SCHEDULED_TASK_TOO_FREQUENT",
            Self::TaskLimitReached { .. } => "TASK_LIMIT_REACHED",
            Self::RecursiveSchedulingNotAllowed => "RECURSIVE_SCHEDULING_NOT_ALLOWED",
            Self::Io(_) => "OS_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "UNHANDLED_EXCEPTION",
        }
    }

    /// Whether the condition is expected to be transient / safe to retry.
    ///
    /// Per-tool and model-router errors are recoverable (the agent loop or
    /// queue retries them); startup misconfiguration and handle registration
    /// conflicts are not.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedHandle(_)
                | Self::AttachmentTooLarge { .. }
                | Self::TooManyAttachments { .. }
                | Self::UnsupportedAttachment { .. }
                | Self::RateLimitExceeded { .. }
                | Self::NotWhitelisted { .. }
                | Self::DuplicateQueued(_)
                | Self::DuplicateProcessed(_)
                | Self::ModelRouterError(_)
                | Self::ToolError { .. }
                | Self::DeliveryError(_)
                | Self::ScheduledTaskTooFrequent { .. }
                | Self::TaskLimitReached { .. }
                | Self::RecursiveSchedulingNotAllowed
                | Self::Io(_)
                | Self::Serialization(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: &str) -> Error {
        match kind {
            "InvalidApiKey" => Error::InvalidApiKey,
            "InvalidBearerToken" => Error::InvalidBearerToken,
            "UnsupportedHandle" => Error::UnsupportedHandle("nope".into()),
            "HandleAlreadyExists" => Error::HandleAlreadyExists("ask".into()),
            "AttachmentTooLarge" => Error::AttachmentTooLarge {
                filename: "a.pdf".into(),
                size_bytes: 100,
                limit_bytes: 50,
            },
            "TooManyAttachments" => Error::TooManyAttachments { count: 6, limit: 5 },
            "UnsupportedAttachment" => Error::UnsupportedAttachment {
                filename: "a.exe".into(),
                content_type: "application/x-msdownload".into(),
            },
            "RateLimitExceeded" => Error::RateLimitExceeded {
                period: "hour".into(),
                scope: "beta".into(),
            },
            "NotWhitelisted" => Error::NotWhitelisted {
                verification_triggered: true,
            },
            "DuplicateQueued" => Error::DuplicateQueued("abc@1".into()),
            "DuplicateProcessed" => Error::DuplicateProcessed("abc@1".into()),
            "ModelRouterError" => Error::ModelRouterError("timeout".into()),
            "ToolError" => Error::ToolError {
                tool_name: "web_search".into(),
                message: "429".into(),
            },
            "DeliveryError" => Error::DeliveryError("ses rejected".into()),
            "ModelConfigMissing" => Error::ModelConfigMissing("/etc/models.toml".into()),
            "DefaultModelGroupMissing" => Error::DefaultModelGroupMissing,
            "ScheduledTaskTooFrequent" => Error::ScheduledTaskTooFrequent {
                cron: "*/59 * * * *".into(),
                min_interval_secs: 3600,
            },
            "TaskLimitReached" => Error::TaskLimitReached {
                owner_email: "a@b.com".into(),
                count: 5,
                limit: 5,
            },
            "RecursiveSchedulingNotAllowed" => Error::RecursiveSchedulingNotAllowed,
            "Internal" => Error::Internal("bug".into()),
            other => panic!("unknown test kind {other}"),
        }
    }

    const ALL_KINDS: &[&str] = &[
        "InvalidApiKey",
        "InvalidBearerToken",
        "UnsupportedHandle",
        "HandleAlreadyExists",
        "AttachmentTooLarge",
        "TooManyAttachments",
        "UnsupportedAttachment",
        "RateLimitExceeded",
        "NotWhitelisted",
        "DuplicateQueued",
        "DuplicateProcessed",
        "ModelRouterError",
        "ToolError",
        "DeliveryError",
        "ModelConfigMissing",
        "DefaultModelGroupMissing",
        "ScheduledTaskTooFrequent",
        "TaskLimitReached",
        "RecursiveSchedulingNotAllowed",
        "Internal",
    ];

    #[test]
    fn test_error_type_mapping_exhaustive() {
        let expected: &[(&str, &str)] = &[
            ("InvalidApiKey", "INVALID_API_KEY"),
            ("InvalidBearerToken", "INVALID_BEARER_TOKEN"),
            ("UnsupportedHandle", "UNSUPPORTED_HANDLE"),
            ("HandleAlreadyExists", "HANDLE_ALREADY_EXISTS"),
            ("AttachmentTooLarge", "ATTACHMENT_TOO_LARGE"),
            ("TooManyAttachments", "TOO_MANY_ATTACHMENTS"),
            ("UnsupportedAttachment", "UNSUPPORTED_ATTACHMENT"),
            ("RateLimitExceeded", "RATE_LIMIT_EXCEEDED"),
            ("NotWhitelisted", "NOT_WHITELISTED"),
            ("DuplicateQueued", "DUPLICATE_QUEUED"),
            ("DuplicateProcessed", "DUPLICATE_PROCESSED"),
            ("ModelRouterError", "MODEL_ROUTER_ERROR"),
            ("ToolError", "TOOL_ERROR"),
            ("DeliveryError", "DELIVERY_ERROR"),
            ("ModelConfigMissing", "MODEL_CONFIG_MISSING"),
            ("DefaultModelGroupMissing", "DEFAULT_MODEL_GROUP_MISSING"),
            (
                "ScheduledTaskTooFrequent",
                "SCHEDULED_TASK_TOO_FREQUENT",
            ),
            ("TaskLimitReached", "TASK_LIMIT_REACHED"),
            (
                "RecursiveSchedulingNotAllowed",
                "RECURSIVE_SCHEDULING_NOT_ALLOWED",
            ),
            ("Internal", "UNHANDLED_EXCEPTION"),
        ];
        for (kind, want) in expected {
            assert_eq!(sample(kind).error_type(), *want, "kind={kind}");
        }
    }

    #[test]
    fn test_recoverable_classification_exhaustive() {
        let non_recoverable = [
            "InvalidApiKey",
            "InvalidBearerToken",
            "HandleAlreadyExists",
            "ModelConfigMissing",
            "DefaultModelGroupMissing",
            "Internal",
        ];
        for kind in ALL_KINDS {
            let err = sample(kind);
            let expect_recoverable = !non_recoverable.contains(kind);
            assert_eq!(
                err.is_recoverable(),
                expect_recoverable,
                "kind={kind} recoverable mismatch"
            );
        }
    }

    #[test]
    fn test_display_all_non_empty() {
        for kind in ALL_KINDS {
            let display = sample(kind).to_string();
            assert!(!display.is_empty(), "kind={kind} had empty Display");
        }
    }

    #[test]
    fn test_display_rate_limit_mentions_period_and_scope() {
        let err = sample("RateLimitExceeded");
        let s = err.to_string();
        assert!(s.contains("hour"));
        assert!(s.contains("beta"));
    }

    #[test]
    fn test_io_and_serialization_from_conversions() {
        let io_err: Error = std::io::Error::other("disk full").into();
        assert_eq!(io_err.error_type(), "OS_ERROR");
        assert!(io_err.is_recoverable());

        let json_err: serde_json::Error = serde_json::from_str::<i32>("nope").unwrap_err();
        let ser_err: Error = json_err.into();
        assert_eq!(ser_err.error_type(), "SERIALIZATION_ERROR");
        assert!(ser_err.is_recoverable());
    }
}
