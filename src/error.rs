use core::fmt;

/// Crate-wide error values. Cryptographic rejections (`IncorrectHash`,
/// `IncorrectSignature`) stay local to validation and are turned into
/// dropped packets at the dispatch boundary; `ConfigError` is fatal at
/// startup; `StorageError` leaves the affected component running degraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RnsError {
    OutOfMemory,
    InvalidArgument,
    IncorrectSignature,
    IncorrectHash,
    CryptoError,
    PacketError,
    ConnectionError,
    ConfigError,
    StorageError,
}

impl fmt::Display for RnsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::IncorrectSignature => write!(f, "incorrect signature"),
            Self::IncorrectHash => write!(f, "incorrect hash"),
            Self::CryptoError => write!(f, "crypto error"),
            Self::PacketError => write!(f, "packet error"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::ConfigError => write!(f, "configuration error"),
            Self::StorageError => write!(f, "storage error"),
        }
    }
}

impl std::error::Error for RnsError {}
