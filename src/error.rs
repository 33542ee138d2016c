//! The tagged-variant error type the CLI maps to exit codes and that tests
//! match on by kind (spec §7/§9).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Usage,
    Config,
    Resolve,
    Network,
    Checksum,
    Filesystem,
    Subprocess,
    Invariant,
}

#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct GooError {
    pub kind: ErrorKind,
    pub message: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl GooError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        GooError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn wrap(kind: ErrorKind, message: impl Into<String>, source: anyhow::Error) -> Self {
        GooError {
            kind,
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Usage, message)
    }

    pub fn resolve(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resolve, message)
    }

    pub fn checksum(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Checksum, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Invariant, message)
    }
}

/// Best-effort classification of an opaque `anyhow::Error` into an exit-code
/// bucket, used at the CLI boundary when a lower layer returned a bare
/// `anyhow::Error` instead of a `GooError` (e.g. from a third-party crate).
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    if let Some(goo) = err.downcast_ref::<GooError>() {
        return goo.kind();
    }
    if err.downcast_ref::<std::io::Error>().is_some() {
        return ErrorKind::Filesystem;
    }
    if err.downcast_ref::<reqwest::Error>().is_some() {
        return ErrorKind::Network;
    }
    ErrorKind::Invariant
}
