use thiserror::Error;

/// Error returned by every packstore operation.
///
/// Boxed so that `Result<T>` stays one pointer wide on the happy path of the
/// per-document decode loops.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

#[derive(Debug, Error)]
pub enum ErrorKind {
    /// A caller-supplied value is out of range or inconsistent.
    #[error("bad argument `{name}`: {message}")]
    InvalidArgument { name: String, message: String },

    /// Stored bytes (chunk, offsets table, packed value, patch file) are malformed.
    #[error("corrupted {element}: {message}")]
    InvalidFormat { element: String, message: String },

    /// A sub-attribute configuration cannot be used.
    #[error("bad attribute config `{element}`: {message}")]
    Config { element: String, message: String },

    #[error("{what} is {len}, above the limit of {limit}")]
    CapacityExceeded { what: String, len: u64, limit: u64 },

    /// The output buffer cannot hold the result. Callers retry with at least
    /// `required` bytes.
    #[error("output buffer holds {available} bytes, {required} needed")]
    DestBufferTooSmall { required: usize, available: usize },

    #[error("unsupported: {message}")]
    NotImplemented { message: String },

    #[error("i/o failure ({context}): {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    /// True for errors caused by malformed or truncated stored data.
    pub fn is_data_corruption(&self) -> bool {
        matches!(*self.0, ErrorKind::InvalidFormat { .. })
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn invalid_format(element: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidFormat {
            element: element.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn config(element: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::Config {
            element: element.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn capacity(what: impl Into<String>, len: u64, limit: u64) -> Error {
        ErrorKind::CapacityExceeded {
            what: what.into(),
            len,
            limit,
        }
        .into()
    }

    pub fn dest_buffer_too_small(required: usize, available: usize) -> Error {
        ErrorKind::DestBufferTooSmall {
            required,
            available,
        }
        .into()
    }

    pub fn not_implemented(message: impl Into<String>) -> Error {
        ErrorKind::NotImplemented {
            message: message.into(),
        }
        .into()
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Error {
        ErrorKind::Io {
            context: context.into(),
            source,
        }
        .into()
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error(Box::new(kind))
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Error {
        Error::io("storage", source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let e = Error::capacity("chunk payload", 20_000_000, 16_777_215);
        assert_eq!(
            e.to_string(),
            "chunk payload is 20000000, above the limit of 16777215"
        );
        let e = Error::dest_buffer_too_small(10, 4);
        assert_eq!(e.to_string(), "output buffer holds 4 bytes, 10 needed");
    }

    #[test]
    fn test_corruption_classification() {
        let io = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let e: Error = io.into();
        assert!(matches!(e.kind(), ErrorKind::Io { .. }));
        assert!(!e.is_data_corruption());
        assert!(Error::invalid_format("offsets table", "truncated").is_data_corruption());
        assert!(!Error::invalid_arg("doc_id", "out of range").is_data_corruption());
    }

    #[test]
    fn test_into_kind_keeps_payload() {
        match Error::dest_buffer_too_small(64, 8).into_kind() {
            ErrorKind::DestBufferTooSmall {
                required,
                available,
            } => assert_eq!((required, available), (64, 8)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
