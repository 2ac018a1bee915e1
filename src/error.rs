use std::fmt;

/// Errors produced by this crate.
///
/// Transient store failures are retried internally where the spec allows
/// (see [`crate::store::adapter`]); everything that reaches the caller here
/// is either a programming error or a failure the retry budget gave up on.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("name or service must be non-empty and must not contain '/': {0:?}")]
    InvalidIdentifier(String),

    #[error("invalid or non-absolute uri: {0:?}")]
    InvalidUri(String),

    #[error("ttl must be >= 1 second, got {0}")]
    InvalidTtl(i64),

    #[error("store unreachable after retry budget")]
    StoreUnreachable(#[source] StoreError),

    #[error("registration failed")]
    RegistrationFailed(#[source] StoreError),

    #[error("unregister failed")]
    UnregisterFailed(#[source] StoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Opaque error from the store dependency (§6 of the design).
///
/// The core never inspects the concrete transport error; it only needs to
/// know whether a call failed, so this type is a thin, cloneable wrapper
/// rather than an enum mirroring a specific client's error type.
#[derive(Debug, Clone)]
pub struct StoreError(pub(crate) std::sync::Arc<dyn std::error::Error + Send + Sync>);

impl StoreError {
    pub fn new<E: std::error::Error + Send + Sync + 'static>(err: E) -> Self {
        Self(std::sync::Arc::new(err))
    }

    pub fn msg(text: impl Into<String>) -> Self {
        #[derive(Debug, thiserror::Error)]
        #[error("{0}")]
        struct Msg(String);
        Self(std::sync::Arc::new(Msg(text.into())))
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
