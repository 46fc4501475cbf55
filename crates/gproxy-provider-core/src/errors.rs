use std::fmt;

/// What an upstream HTTP call actually failed with, before any retry or
/// auth-refresh policy has been applied. Adapters return this from their
/// transport layer; `gproxy_core::error::ProxyError` maps it onto the
/// outward-facing error taxonomy.
#[derive(Debug, Clone)]
pub enum UpstreamFailure {
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    Http {
        status: u16,
        body: bytes::Bytes,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Timeout,
    Connect,
    Dns,
    Tls,
    Other,
}

impl fmt::Display for UpstreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamFailure::Transport { kind, message } => {
                write!(f, "transport error ({kind:?}): {message}")
            }
            UpstreamFailure::Http { status, .. } => write!(f, "upstream returned status {status}"),
        }
    }
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("invalid provider configuration: {0}")]
    InvalidConfig(String),
    #[error("missing credential field: {0}")]
    MissingCredentialField(&'static str),
    #[error("upstream call failed: {0}")]
    Upstream(UpstreamFailure),
    #[error("{0}")]
    Other(String),
}

impl From<UpstreamFailure> for ProviderError {
    fn from(failure: UpstreamFailure) -> Self {
        ProviderError::Upstream(failure)
    }
}
