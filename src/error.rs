//! Error types surfaced by the client.

use crate::model::ResourceKind;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the client and its accessors.
///
/// Errors are `Clone` so that a [`Snapshot`](crate::accessor::Snapshot) can
/// capture a failed read and hand the same error back on every later read.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// The document could not be retrieved (network failure, timeout,
    /// non-success HTTP status, unreadable `file:` URL).
    #[error("could not retrieve {url}: {reason}")]
    Retrieval { url: String, reason: String },

    /// The document was retrieved but its content is malformed or uses an
    /// unrecognised value.
    #[error("could not parse {kind} document: {reason}")]
    Parse { kind: ResourceKind, reason: String },

    /// Invalid configuration, such as a bad cache directory override.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn retrieval(url: &str, reason: impl ToString) -> Self {
        Error::Retrieval {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(kind: ResourceKind, reason: impl ToString) -> Self {
        Error::Parse {
            kind,
            reason: reason.to_string(),
        }
    }

    /// Whether this error came from the transport layer.
    pub fn is_retrieval(&self) -> bool {
        matches!(self, Error::Retrieval { .. })
    }

    /// Whether this error came from document parsing.
    pub fn is_parse(&self) -> bool {
        matches!(self, Error::Parse { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::retrieval("http://example.com/status.xml", "connection refused");
        assert_eq!(
            err.to_string(),
            "could not retrieve http://example.com/status.xml: connection refused"
        );
        assert!(err.is_retrieval());

        let err = Error::parse(ResourceKind::Activity, "no activity values");
        assert_eq!(
            err.to_string(),
            "could not parse activity document: no activity values"
        );
        assert!(err.is_parse());
    }
}
