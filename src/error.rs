use thiserror::Error;

/// A single problem found while validating configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Unified error type for the view counter and its collaborators.
#[derive(Error, Debug, Clone)]
pub enum ViewCounterError {
    /// Entity not found in the backing store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Writing aggregates to the persistence sink failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Reading or writing the metadata store failed
    #[error("Meta store error: {0}")]
    MetaStore(String),

    /// Week rollover could not be applied
    #[error("Rollover error: {0}")]
    Rollover(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),

    /// Invalid argument
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Validation error with one entry per offending field
    #[error("Validation error: {}", .0.iter().map(|i| i.to_string()).collect::<Vec<_>>().join("; "))]
    ValidationError(Vec<ValidationIssue>),

    /// Parse/serialization error
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl ViewCounterError {
    /// Check if this error is transient, i.e. the same call may succeed later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ViewCounterError::Persistence(_)
                | ViewCounterError::MetaStore(_)
                | ViewCounterError::Rollover(_)
                | ViewCounterError::IoError(_)
        )
    }

    /// Check if this error means the target entity no longer exists.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ViewCounterError::NotFound(_))
    }

    /// Prefix the message with extra context, keeping the variant.
    pub fn context(self, ctx: impl std::fmt::Display) -> Self {
        match self {
            ViewCounterError::NotFound(m) => ViewCounterError::NotFound(format!("{}: {}", ctx, m)),
            ViewCounterError::Persistence(m) => {
                ViewCounterError::Persistence(format!("{}: {}", ctx, m))
            }
            ViewCounterError::MetaStore(m) => {
                ViewCounterError::MetaStore(format!("{}: {}", ctx, m))
            }
            ViewCounterError::Rollover(m) => ViewCounterError::Rollover(format!("{}: {}", ctx, m)),
            ViewCounterError::IoError(m) => ViewCounterError::IoError(format!("{}: {}", ctx, m)),
            ViewCounterError::InvalidArgument(m) => {
                ViewCounterError::InvalidArgument(format!("{}: {}", ctx, m))
            }
            ViewCounterError::ParseError(m) => {
                ViewCounterError::ParseError(format!("{}: {}", ctx, m))
            }
            other @ ViewCounterError::ValidationError(_) => other,
        }
    }
}

// === Conversion Implementations ===

macro_rules! impl_from_error {
    ($err_type:ty, $arm:pat => $body:expr) => {
        impl From<$err_type> for ViewCounterError {
            fn from(err: $err_type) -> Self {
                match err {
                    $arm => $body,
                }
            }
        }
    };
}

impl_from_error!(std::io::Error, e => match e.kind() {
    std::io::ErrorKind::NotFound => ViewCounterError::NotFound(e.to_string()),
    std::io::ErrorKind::InvalidInput => ViewCounterError::InvalidArgument(e.to_string()),
    _ => ViewCounterError::IoError(e.to_string()),
});

impl_from_error!(serde_json::Error, e => ViewCounterError::ParseError(e.to_string()));
impl_from_error!(toml::de::Error, e => ViewCounterError::ParseError(e.to_string()));

/// Result type alias for operations that can fail with ViewCounterError.
pub type ViewCounterResult<T> = Result<T, ViewCounterError>;
