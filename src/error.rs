use std::net::SocketAddr;

/// Crate-wide error type.
///
/// Variants map onto the error taxonomy a caller needs to branch on: parse
/// failures that should become a SIP error response, lookups that should
/// fall through to a policy-specific fallback, and the two socket failure
/// classes the RTP channel distinguishes (transient vs. fatal).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("argument fault: {0}")]
    ArgumentFault(String),

    #[error("transient socket error on {1}: {0}")]
    SocketTransient(std::io::Error, SocketAddr),

    #[error("fatal socket error: {0}")]
    SocketFatal(std::io::Error),

    #[error("failed to parse {what}: {reason}")]
    ParseFault { what: &'static str, reason: String },

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("internal fault: {0}")]
    InternalFault(String),

    #[error("sip message error: {0}")]
    Sip(#[from] rsip::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
