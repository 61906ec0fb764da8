//! Error types for prompt and image generation.

use std::time::Duration;

/// Diagnostic fragments the Gemini API uses when rejecting a credential.
const INVALID_KEY_PATTERNS: &[&str] = &["API key not valid", "API_KEY_INVALID"];

/// Maximum length of an upstream error body carried in an error message.
const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// Errors that can occur while synthesizing prompts or images.
#[derive(Debug, thiserror::Error)]
pub enum BlogVizError {
    /// API key missing or rejected by the service.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Required input was empty; nothing was sent.
    #[error("{0}")]
    Validation(String),

    /// Text response did not match the prompt set schema.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Encoded image reference could not be split into MIME type and payload.
    #[error("malformed image reference: {0}")]
    MalformedImage(String),

    /// Service answered without any image part.
    #[error("no image was produced: {0}")]
    NoImageProduced(String),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Sanitized response body.
        message: String,
    },

    /// Rate limit exceeded.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay suggested by the `Retry-After` header.
        retry_after: Option<Duration>,
    },

    /// Content was blocked by safety filters.
    #[error("content blocked: {0}")]
    ContentBlocked(String),

    /// Any other failure reported by a generative service.
    #[error("service error: {0}")]
    Service(String),

    /// Network or HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Failed to decode base64 data.
    #[error("failed to decode: {0}")]
    Decode(String),

    /// I/O error (e.g., saving file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`BlogVizError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing credential.
    Auth,
    /// Empty required input caught before any request.
    Validation,
    /// Response not schema-conforming JSON.
    Parse,
    /// Encoded image reference could not be decoded.
    MalformedImage,
    /// Response contained no image part.
    NoImageProduced,
    /// Catch-all for collaborator failures.
    Service,
    /// Local failures (file I/O, base64 decoding).
    Local,
}

/// The user-triggered operation an error is reported for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Article to prompt set.
    PromptGeneration,
    /// Prompt to image.
    ImageGeneration,
    /// Image plus instruction to new image.
    ImageEdit,
}

impl Operation {
    fn failure_sentence(&self) -> &'static str {
        match self {
            Self::PromptGeneration => "Failed to generate prompts.",
            Self::ImageGeneration => "Failed to generate the image.",
            Self::ImageEdit => "Failed to edit the image.",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PromptGeneration => write!(f, "prompt generation"),
            Self::ImageGeneration => write!(f, "image generation"),
            Self::ImageEdit => write!(f, "image edit"),
        }
    }
}

impl BlogVizError {
    /// Returns the coarse kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Auth(_) => ErrorKind::Auth,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Parse(_) | Self::Json(_) => ErrorKind::Parse,
            Self::MalformedImage(_) => ErrorKind::MalformedImage,
            Self::NoImageProduced(_) => ErrorKind::NoImageProduced,
            Self::Api { .. }
            | Self::RateLimited { .. }
            | Self::ContentBlocked(_)
            | Self::Service(_)
            | Self::Network(_) => ErrorKind::Service,
            Self::Decode(_) | Self::Io(_) => ErrorKind::Local,
        }
    }

    /// Builds a service error, upgrading it to [`BlogVizError::Auth`] when the
    /// diagnostic matches an invalid-credential pattern.
    pub fn from_service_message(message: impl Into<String>) -> Self {
        let message = message.into();
        if is_invalid_key_message(&message) {
            Self::Auth(message)
        } else {
            Self::Service(message)
        }
    }

    /// Renders the single human-readable message stored in the session's
    /// error slot.
    ///
    /// Validation failures are shown verbatim; everything else is prefixed
    /// with a sentence naming the failed operation.
    pub fn user_message(&self, operation: Operation) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Auth(_) => format!(
                "{} The API key is not valid. Check or create a valid key in Google AI Studio.",
                operation.failure_sentence()
            ),
            other => format!("{} {}", operation.failure_sentence(), other),
        }
    }
}

/// Returns true if the diagnostic text reports an invalid API key.
pub fn is_invalid_key_message(text: &str) -> bool {
    INVALID_KEY_PATTERNS.iter().any(|p| text.contains(p))
}

/// Collapses whitespace and truncates an upstream error body so it can be
/// embedded in an error message.
pub(crate) fn sanitize_error_message(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_LEN {
        return collapsed;
    }
    let truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_LEN).collect();
    format!("{truncated}...")
}

/// Reads a `Retry-After` header expressed in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Result type alias for generation operations.
pub type Result<T> = std::result::Result<T, BlogVizError>;
