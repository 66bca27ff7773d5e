use thiserror::Error;

/// Error raised by a caller-supplied signing callback.
///
/// It is handed back to the caller untouched through [`Error::Callback`], so
/// it can be downcast to whatever concrete type the callback produced.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or unreachable settings.
    Config,
    /// Intent, ingredient or identity assertion rules were violated.
    Validation,
    /// An asset, archive or destination could not be read or written.
    Io,
    /// Signing failed, either in a callback or inside the engine.
    Signing,
    /// An internal invariant did not hold.
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid settings: {0}")]
    Config(String),

    /// `reason` is the standard phrase for `status`.
    #[error("failed to fetch settings: {status} {reason}")]
    Fetch { status: u16, reason: String },

    /// Transport failure while fetching remote settings. The message is the
    /// one reported by the HTTP client.
    #[error("{0}")]
    Network(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cannot determine the format of {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Callback(CallbackError),

    #[error("invalid certificate chain: {0}")]
    Certificate(String),

    #[error(transparent)]
    Engine(#[from] c2pa::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) | Error::Fetch { .. } | Error::Network(_) => ErrorKind::Config,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Io(_) | Error::Json(_) | Error::UnsupportedFormat(_) => ErrorKind::Io,
            Error::Callback(_) | Error::Certificate(_) | Error::Engine(_) => ErrorKind::Signing,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the original callback error if this failure came from a
    /// caller-supplied signing function.
    pub fn into_callback_error(self) -> std::result::Result<CallbackError, Self> {
        match self {
            Error::Callback(err) => Ok(err),
            other => Err(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
