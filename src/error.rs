use std::path::PathBuf;

use reqwest::StatusCode;
use thiserror::Error;

/// Error categories for actionable diagnostics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Authentication/authorization issues - check API key
    Auth,
    /// Rate limiting - slow down requests
    RateLimit,
    /// Network connectivity - check internet connection
    Network,
    /// Server-side error - retry later
    Server,
    /// Client-side error - fix request
    Client,
    /// Malformed EPUB or XHTML input
    Input,
    /// Cache error - check disk space/permissions
    Cache,
    /// Unknown error
    Unknown,
}

impl ErrorCategory {
    /// Get actionable advice for this error category
    pub fn advice(&self) -> &'static str {
        match self {
            Self::Auth => "Check the API key and base URL",
            Self::RateLimit => "Too many requests. Wait and retry",
            Self::Network => "Check internet connection and firewall settings",
            Self::Server => "LLM endpoint issue. Retry in a few minutes",
            Self::Client => "Invalid request. Check model name and prompt",
            Self::Input => "The EPUB or one of its documents is malformed",
            Self::Cache => "Check disk space and permissions for the working directory",
            Self::Unknown => "Unexpected error. Check logs for details",
        }
    }
}

#[derive(Error, Debug)]
pub enum TranslateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("Rate limited (HTTP 429). {}", ErrorCategory::RateLimit.advice())]
    RateLimited,

    #[error("HTTP {status} (retryable). {}", ErrorCategory::Server.advice())]
    RetryableHttp { status: StatusCode },

    #[error("HTTP {status}. {}", ErrorCategory::Client.advice())]
    HttpStatus { status: StatusCode },

    #[error("Authentication failed (HTTP {status}). {}", ErrorCategory::Auth.advice())]
    AuthError { status: StatusCode },

    #[error("LLM response missing `choices[0].message.content`")]
    MalformedResponse,

    #[error("No translated lines could be aligned with the request")]
    EmptyTranslation,

    #[error("Translation failed after {attempts} attempts: {reason}")]
    RetryExhausted { attempts: u32, reason: String },

    #[error("Unsupported language code: {0}")]
    UnsupportedLanguage(String),

    #[error("Missing credentials: {0}. {advice}", advice = ErrorCategory::Auth.advice())]
    MissingCredentials(&'static str),

    #[error("Not a valid EPUB: {0}")]
    Epub(String),

    #[error("Cache error: {0}. {advice}", advice = ErrorCategory::Cache.advice())]
    Cache(String),

    #[error("Failed to translate {}: {source}\nfirst lines: {head}", path.display())]
    Page {
        path: PathBuf,
        head: String,
        #[source]
        source: Box<TranslateError>,
    },
}

impl TranslateError {
    /// Classify error into category for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Io(_) => ErrorCategory::Cache,
            Self::Json(_) => ErrorCategory::Client,
            Self::Http(e) => {
                if e.is_timeout() || e.is_connect() {
                    ErrorCategory::Network
                } else if let Some(status) = e.status() {
                    Self::category_from_status(status)
                } else {
                    ErrorCategory::Unknown
                }
            }
            Self::Zip(_) | Self::Xml(_) | Self::Epub(_) => ErrorCategory::Input,
            Self::RateLimited => ErrorCategory::RateLimit,
            Self::RetryableHttp { status } | Self::HttpStatus { status } => {
                Self::category_from_status(*status)
            }
            Self::AuthError { .. } | Self::MissingCredentials(_) => ErrorCategory::Auth,
            Self::MalformedResponse | Self::EmptyTranslation => ErrorCategory::Server,
            Self::RetryExhausted { .. } => ErrorCategory::Server,
            Self::UnsupportedLanguage(_) => ErrorCategory::Input,
            Self::Cache(_) => ErrorCategory::Cache,
            Self::Page { source, .. } => source.category(),
        }
    }

    /// Determine if this error should trigger a retry
    pub fn is_retryable(&self) -> bool {
        match self {
            // Shape errors are retried with a limit: the model sometimes
            // returns prose on one attempt and numbered lines on the next.
            Self::MalformedResponse | Self::EmptyTranslation => true,
            Self::RetryExhausted { .. } => false,
            _ => matches!(
                self.category(),
                ErrorCategory::RateLimit | ErrorCategory::Server | ErrorCategory::Network
            ),
        }
    }

    /// Classify HTTP status code into error category
    fn category_from_status(status: StatusCode) -> ErrorCategory {
        match status.as_u16() {
            401 | 403 => ErrorCategory::Auth,
            429 => ErrorCategory::RateLimit,
            400..=499 => ErrorCategory::Client,
            500..=599 => ErrorCategory::Server,
            _ => ErrorCategory::Unknown,
        }
    }

    /// Create appropriate error from HTTP status code
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            401 | 403 => Self::AuthError { status },
            429 => Self::RateLimited,
            500..=599 => Self::RetryableHttp { status },
            _ => Self::HttpStatus { status },
        }
    }

    /// Wrap a page-level failure with its file path and the first source
    /// lines of the failing batch, for debugging.
    pub fn page(path: PathBuf, sources: &[String], source: TranslateError) -> Self {
        let head = sources
            .iter()
            .take(3)
            .map(|s| s.chars().take(80).collect::<String>())
            .collect::<Vec<_>>()
            .join(" | ");
        Self::Page {
            path,
            head,
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, TranslateError>;
