//! Error type shared by the manager and the capability traits it consumes.

/// Errors reported by the public API, the persistence adapter and the
/// radio/IP capability traits. Success is plain [`Result::Ok`].
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A resource allocation (lock, timer, task) failed.
    #[error("out of memory")]
    NoMemory,
    /// A bounded wait for the config lock expired.
    #[error("timed out")]
    Timeout,
    /// Operation refused: a configuration change is in progress, or the
    /// current WiFi mode does not permit the operation.
    #[error("invalid state")]
    InvalidState,
    /// No valid record in the persistent store. Also returned when a stored
    /// blob's length does not match the expected record size.
    #[error("not found")]
    NotFound,
    /// The radio driver, IP adapter or persistent store failed.
    #[error("i/o error")]
    Io,
    /// Malformed argument.
    #[error("invalid argument")]
    InvalidArg,
}

pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_stable() {
        assert_eq!(Error::Timeout.to_string(), "timed out");
        assert_eq!(Error::InvalidState.to_string(), "invalid state");
        assert_eq!(Error::NotFound.to_string(), "not found");
    }
}
