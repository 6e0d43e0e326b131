use std::fmt;

#[derive(Debug)]
pub enum Error {
    Disposed,
    Cancelled,
    InvalidArgument(&'static str),
    Io(std::io::Error),
    Codec(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Disposed => write!(f, "queue disposed"),
            Error::Cancelled => write!(f, "operation cancelled"),
            Error::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            Error::Io(err) => write!(f, "io error: {err}"),
            Error::Codec(err) => write!(f, "codec error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(value)
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Error::Codec(value)
    }
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
