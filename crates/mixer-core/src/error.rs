use std::fmt;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Ssh(ssh2::Error),
    Sql(rusqlite::Error),
    Ws(tungstenite::Error),
    BadHeader(String),
    UnknownOperation(String),
    NoSuchChannel,
    NoSuchRequest,
    NoSuchSession,
    PasswordRetriesExhausted,
    NoHostkey,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Ssh(e) => write!(f, "ssh error: {e}"),
            Self::Sql(e) => write!(f, "store error: {e}"),
            Self::Ws(e) => write!(f, "websocket error: {e}"),
            Self::BadHeader(msg) => write!(f, "malformed wire header: {msg}"),
            Self::UnknownOperation(op) => write!(f, "unknown operation: {op}"),
            Self::NoSuchChannel => write!(f, "no such channel"),
            Self::NoSuchRequest => write!(f, "no such request"),
            Self::NoSuchSession => write!(f, "no such session"),
            Self::PasswordRetriesExhausted => write!(f, "password retry ceiling reached"),
            Self::NoHostkey => write!(f, "peer presented no host key"),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<ssh2::Error> for Error {
    fn from(value: ssh2::Error) -> Self {
        Self::Ssh(value)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sql(value)
    }
}

impl From<tungstenite::Error> for Error {
    fn from(value: tungstenite::Error) -> Self {
        Self::Ws(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
