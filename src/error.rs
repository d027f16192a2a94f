//! Error taxonomy for the resilient IMAP push-channel core
//!
//! Each variant is an independent error kind rather than a hierarchy,
//! matching the way the server actually reports failure: a dropped
//! transport looks nothing like a rejected `STORE`, and callers need to
//! tell them apart without string-matching.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("server greeting failed: {0}")]
    GreetingFailed(String),

    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("operation timed out")]
    Timeout,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("identifier set must not be empty")]
    EmptyIdentifierSet,

    #[error("command failed: {0}")]
    CommandFailed(String),

    #[error("command not supported: {0}")]
    CommandNotSupported(String),

    #[error("login failed: {0}")]
    LoginFailed(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("unsupported authentication mechanism: {0}")]
    UnsupportedAuthMechanism(String),

    #[error("CREATE failed: {0}")]
    CreateFailed(String),

    #[error("COPY failed: {0}")]
    CopyFailed(String),

    #[error("STORE failed: {0}")]
    StoreFailed(String),

    #[error("EXPUNGE failed: {0}")]
    ExpungeFailed(String),

    #[error("MOVE failed: {0}")]
    MoveFailed(String),

    #[error("FETCH failed: {0}")]
    FetchFailed(String),

    #[error("SELECT failed: {0}")]
    SelectFailed(String),

    #[error("LOGOUT failed: {0}")]
    LogoutFailed(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("unexpected tagged response: {0}")]
    UnexpectedTaggedResponse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("operation was cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// A short, user-facing recovery hint. Computed once here rather
    /// than scattered across call sites: the hint belongs to the error
    /// kind, not to whichever call site happened to construct it.
    #[must_use]
    pub const fn recovery_hint(&self) -> &'static str {
        match self {
            Self::GreetingFailed(_) | Self::ConnectionFailed(_) | Self::Tls(_) | Self::Io(_) => {
                "Check network connectivity and the server hostname/port."
            }
            Self::Timeout => "The server may be slow or unreachable; it will be retried.",
            Self::InvalidArgument(_) | Self::EmptyIdentifierSet | Self::Config(_) => {
                "Check the arguments or configuration passed to this operation."
            }
            Self::CommandFailed(_)
            | Self::CreateFailed(_)
            | Self::CopyFailed(_)
            | Self::StoreFailed(_)
            | Self::ExpungeFailed(_)
            | Self::MoveFailed(_)
            | Self::FetchFailed(_)
            | Self::SelectFailed(_)
            | Self::LogoutFailed(_) => "The server rejected the command; see its text for detail.",
            Self::CommandNotSupported(_) => {
                "The server does not advertise the capability this command needs."
            }
            Self::LoginFailed(_) => "Verify your username and password.",
            Self::AuthFailed(_) | Self::UnsupportedAuthMechanism(_) => {
                "Check that your email provider supports this authentication mechanism."
            }
            Self::MalformedResponse(_) | Self::UnexpectedTaggedResponse(_) => {
                "The server sent a response that does not conform to IMAP4rev1; this looks like a server-side bug."
            }
            Self::Cancelled => "The operation was cancelled by the caller.",
        }
    }

    /// Whether this error, observed during command submission, should
    /// cause the connection to be recycled per the controller's
    /// recycle predicate (see `connection::is_recycle_error`).
    #[must_use]
    pub fn is_transport_class(&self) -> bool {
        match self {
            Self::ConnectionFailed(_) | Self::Timeout | Self::MalformedResponse(_) | Self::Io(_) => {
                true
            }
            Self::CommandFailed(text)
            | Self::UnexpectedTaggedResponse(text)
            | Self::AuthFailed(text) => contains_transport_phrase(text),
            _ => false,
        }
    }
}

/// Known transport-failure phrases that show up in the *text* of an
/// otherwise-generic error (e.g. an I/O error downcast into a string
/// somewhere upstream). Matches the recycle predicate of §4.5.
fn contains_transport_phrase(text: &str) -> bool {
    const PHRASES: &[&str] = &[
        "channel is not active",
        "connection reset by peer",
        "broken pipe",
        "eof",
        "invalid state",
    ];
    let lower = text.to_ascii_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_class_covers_connection_errors() {
        assert!(Error::ConnectionFailed("x".into()).is_transport_class());
        assert!(Error::Timeout.is_transport_class());
        assert!(Error::MalformedResponse("x".into()).is_transport_class());
    }

    #[test]
    fn transport_class_excludes_command_rejections() {
        assert!(!Error::CommandFailed("NO permission denied".into()).is_transport_class());
    }

    #[test]
    fn transport_phrase_detected_in_command_failed_text() {
        assert!(Error::CommandFailed("connection reset by peer".into()).is_transport_class());
    }

    #[test]
    fn cancellation_is_never_transport_class() {
        assert!(!Error::Cancelled.is_transport_class());
    }

    #[test]
    fn recovery_hint_is_non_empty() {
        assert!(!Error::Timeout.recovery_hint().is_empty());
    }
}
