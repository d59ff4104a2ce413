use std::fmt;

/// Failures reported by an object-store client. These never cross the
/// service boundary directly; `BitStoreError::Io` wraps them.
#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("object store returned HTTP {status}: {code} - {message}")]
    Status {
        status: u16,
        code: String,
        message: String,
    },
    #[error("container not found: {0}")]
    ContainerNotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported backend: {0:?}")]
    UnsupportedBackend(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("backend not initialized")]
    NotInitialized,
}

/// The service operation that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Init,
    Get,
    Put,
    About,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Init => "init",
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::About => "about",
            Operation::Remove => "remove",
        })
    }
}

/// The single failure kind callers of a `BitStoreService` see.
#[derive(Debug, thiserror::Error)]
pub enum BitStoreError {
    #[error("{operation}({key}) failed: {source}")]
    Io {
        operation: Operation,
        key: String,
        #[source]
        source: ObjectStoreError,
    },
}

impl BitStoreError {
    pub fn io(operation: Operation, key: impl Into<String>, source: impl Into<ObjectStoreError>) -> Self {
        BitStoreError::Io {
            operation,
            key: key.into(),
            source: source.into(),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            BitStoreError::Io { operation, .. } => *operation,
        }
    }
}

impl From<BitStoreError> for std::io::Error {
    fn from(err: BitStoreError) -> Self {
        std::io::Error::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_io_error_keeps_cause() {
        let err = BitStoreError::io(
            Operation::Put,
            "assets/abc",
            std::io::Error::other("disk full"),
        );
        assert_eq!(err.operation(), Operation::Put);
        assert!(err.to_string().starts_with("put(assets/abc) failed"));
        let source = err.source().expect("source");
        assert!(source.to_string().contains("disk full"));
    }

    #[test]
    fn test_converts_to_std_io_error() {
        let err = BitStoreError::io(Operation::Get, "k", ObjectStoreError::NotInitialized);
        let io: std::io::Error = err.into();
        assert_eq!(io.kind(), std::io::ErrorKind::Other);
        assert!(io.to_string().contains("not initialized"));
    }
}
