use crate::schema::Value;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    Timeout,
    Interrupted,
    InvalidArgument,
    InvalidSchema,
    InvalidProtocol,
    SerializeFailed,
    DeserializeFailed,
    FramingFailed,
    TransportFailed,
    ChannelDestroyed,
    NoActiveChannels,
    InvalidHandshakeRequest,
    InvalidHandshakeResponse,
    IncompatibleProtocol,
    UnknownProtocol,
    InvalidRequest,
    InvalidResponse,
    NotImplemented,
    InternalServerError,
    /// Error reported by a remote handler, carrying the decoded error value.
    Application(Box<Value>),
}

impl ErrorKind {
    /// Wire tag used when the error is reported to a peer as a system error.
    #[must_use]
    pub fn rpc_code(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::InvalidHandshakeRequest => "INVALID_HANDSHAKE_REQUEST",
            ErrorKind::InvalidHandshakeResponse => "INVALID_HANDSHAKE_RESPONSE",
            ErrorKind::IncompatibleProtocol => "INCOMPATIBLE_PROTOCOL",
            ErrorKind::UnknownProtocol => "UNKNOWN_PROTOCOL",
            ErrorKind::InvalidRequest => "INVALID_REQUEST",
            ErrorKind::InvalidResponse => "INVALID_RESPONSE",
            ErrorKind::NotImplemented => "NOT_IMPLEMENTED",
            ErrorKind::Application(_) => "APPLICATION_ERROR",
            _ => "INTERNAL_SERVER_ERROR",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Error {
    pub kind: ErrorKind,
    pub msg: String,
}

impl Error {
    #[must_use]
    pub fn new(kind: ErrorKind, msg: String) -> Self {
        Self { kind, msg }
    }

    #[must_use]
    pub fn kind(kind: ErrorKind) -> Self {
        Self {
            kind,
            msg: String::default(),
        }
    }

    /// Application error with a typed payload, as returned by a handler.
    #[must_use]
    pub fn application(value: Value, msg: String) -> Self {
        Self {
            kind: ErrorKind::Application(Box::new(value)),
            msg,
        }
    }

    #[must_use]
    pub fn is_application(&self) -> bool {
        matches!(self.kind, ErrorKind::Application(_))
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::kind(kind)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidProtocol,
            msg: value.to_string(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.msg.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.msg)
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        let kind = ErrorKind::Timeout;
        let error: Error = kind.into();
        assert_eq!(error.to_string(), "Timeout");

        let error = Error::new(ErrorKind::TransportFailed, "connection reset".into());
        assert_eq!(error.to_string(), "TransportFailed: connection reset");

        let error: Error = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert_eq!(error.kind, ErrorKind::InvalidProtocol);
    }

    #[test]
    fn test_rpc_codes() {
        assert_eq!(
            ErrorKind::IncompatibleProtocol.rpc_code(),
            "INCOMPATIBLE_PROTOCOL"
        );
        assert_eq!(ErrorKind::NotImplemented.rpc_code(), "NOT_IMPLEMENTED");
        assert_eq!(
            ErrorKind::TransportFailed.rpc_code(),
            "INTERNAL_SERVER_ERROR"
        );
        assert_eq!(ErrorKind::Timeout.rpc_code(), "timeout");
    }

    #[test]
    fn test_application_error() {
        let error = Error::application(Value::String("boom".into()), "boom".into());
        assert!(error.is_application());
        assert_eq!(error.kind.rpc_code(), "APPLICATION_ERROR");
    }
}
