use std::fmt;

/// Errors raised by the arena and trie layers.
///
/// Mirrors the `Arena`/`Trie` error kinds from the design document: arena
/// failures never leave previously returned offsets dangling, and trie
/// failures never partially mutate a tree.
#[derive(Debug)]
pub enum Error {
    OpenFailed(std::io::Error),
    BadMagic,
    BadVersion,
    BadEndian,
    SizeLimit,
    MapFailed(std::io::Error),
    MapMismatch,
    LockFailed(std::io::Error),
    Duplicate,
    NotFound,
    InvalidKeyLength,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenFailed(e) => write!(f, "open failed: {e}"),
            Self::BadMagic => write!(f, "bad magic"),
            Self::BadVersion => write!(f, "bad version"),
            Self::BadEndian => write!(f, "bad endianness"),
            Self::SizeLimit => write!(f, "arena size ceiling exceeded"),
            Self::MapFailed(e) => write!(f, "mmap failed: {e}"),
            Self::MapMismatch => write!(f, "kernel returned a different fixed address"),
            Self::LockFailed(e) => write!(f, "flock failed: {e}"),
            Self::Duplicate => write!(f, "key already present"),
            Self::NotFound => write!(f, "node not found"),
            Self::InvalidKeyLength => write!(f, "key length exceeds VAT_MAXKEY"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
