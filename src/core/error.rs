use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Authentication unavailable: {0}")]
    AuthUnavailable(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Document '{id}' not found in '{path}'")]
    NotFound { path: String, id: String },

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Malformed configuration: {0}")]
    MalformedConfiguration(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Change listener on '{0}' closed")]
    Closed(String),
}

impl StoreError {
    pub fn not_found(path: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            path: path.into(),
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Stable machine-readable code, shared by the REST server and CLI output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthUnavailable(_) => "auth_unavailable",
            Self::PermissionDenied(_) => "permission_denied",
            Self::NotFound { .. } => "not_found",
            Self::NetworkFailure(_) => "network_failure",
            Self::MalformedConfiguration(_) => "malformed_configuration",
            Self::InvalidInput(_) => "invalid_input",
            Self::Http { .. } => "http_error",
            Self::Closed(_) => "closed",
        }
    }

    #[inline]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::Http {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None if err.is_decode() => Self::InvalidInput(err.to_string()),
            None => Self::NetworkFailure(err.to_string()),
        }
    }
}
