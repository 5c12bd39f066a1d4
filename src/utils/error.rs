use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// 錯誤分類：UI 層只根據這個分類決定顯示什麼
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorCategory {
    Validation,
    NotFound,
    InsufficientBalance,
    Transient,
    Unknown,
}

/// The affordance the UI layer should offer for a failed checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SuggestedAction {
    Retry,
    AddFunds,
    FixInput,
    None,
}

impl ErrorCategory {
    /// Only transient failures are safe to retry automatically.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorCategory::Transient)
    }

    pub fn action(self) -> SuggestedAction {
        match self {
            ErrorCategory::Transient => SuggestedAction::Retry,
            ErrorCategory::InsufficientBalance => SuggestedAction::AddFunds,
            ErrorCategory::Validation => SuggestedAction::FixInput,
            ErrorCategory::NotFound | ErrorCategory::Unknown => SuggestedAction::None,
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::NotFound => "not found",
            ErrorCategory::InsufficientBalance => "insufficient balance",
            ErrorCategory::Transient => "transient",
            ErrorCategory::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// The only error shape that crosses a checkout step boundary.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{category} error: {message}")]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub retryable: bool,
    /// Upstream HTTP status, kept for diagnostics.
    pub status: Option<u16>,
    #[source]
    pub source: Option<Box<ClassifiedError>>,
}

impl ClassifiedError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            retryable: category.is_retryable(),
            status: None,
            source: None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::NotFound, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Transient, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Unknown, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_source(mut self, source: ClassifiedError) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn action(&self) -> SuggestedAction {
        self.category.action()
    }

    /// 提供錯誤恢復建議
    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category {
            ErrorCategory::Validation => "Check the selected bundle and try again",
            ErrorCategory::NotFound => "The bundle is no longer available, pick another plan",
            ErrorCategory::InsufficientBalance => "Top up the account balance before purchasing",
            ErrorCategory::Transient => "Check the network connection and retry",
            ErrorCategory::Unknown => {
                "Contact support before retrying, the order may already exist"
            }
        }
    }

    /// 使用者友善的錯誤訊息
    pub fn user_friendly_message(&self) -> String {
        match self.category {
            // 餘額不足的訊息直接顯示給使用者
            ErrorCategory::InsufficientBalance => self.message.clone(),
            ErrorCategory::Validation => format!("Invalid request: {}", self.message),
            ErrorCategory::NotFound => format!("Not available: {}", self.message),
            ErrorCategory::Transient => {
                "The eSIM service is temporarily unreachable".to_string()
            }
            ErrorCategory::Unknown => format!("Checkout failed: {}", self.message),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Regex error: {0}")]
    RegexError(#[from] regex::Error),

    #[error("HTTP client error: {0}")]
    ClientError(#[from] reqwest::Error),

    #[error("Missing configuration field: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigError {
    pub fn recovery_suggestion(&self) -> String {
        match self {
            ConfigError::IoError(_) => "Make sure the config file exists and is readable".into(),
            ConfigError::TomlError(_) => "Fix the TOML syntax in the config file".into(),
            ConfigError::RegexError(_) => "Report this as a bug".into(),
            ConfigError::ClientError(_) => "Check the TLS and timeout settings".into(),
            ConfigError::MissingConfigError { field } => format!("Set '{}' in the config", field),
            ConfigError::InvalidConfigValueError { field, .. } => {
                format!("Correct the value of '{}'", field)
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        format!("Configuration problem: {}", self)
    }
}

pub type Result<T> = std::result::Result<T, ClassifiedError>;

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
