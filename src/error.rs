//! Error types for the ubootenv library

use std::io;
use thiserror::Error;

/// Main error type for ubootenv operations
#[derive(Debug, Error)]
pub enum EnvError {
    /// Malformed variable name, bad offset, or unknown device kind
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The lock file could not be created
    #[error("environment busy: {0}")]
    Busy(String),

    /// A read, write, ioctl, or lock acquisition failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// `stat`/`open` failed, an MTD ioctl failed, the device kind is not
    /// recognized, or UBI volume resolution failed
    #[error("bad device: {0}")]
    BadDevice(String),

    /// Allocation failed, or the serialized environment would exceed the
    /// on-media capacity
    #[error("no memory: {0}")]
    NoMemory(String),

    /// The mutation was blocked by an access/type/range rule or by a
    /// write-allowlist
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Both copies of a redundant environment (or the single copy of a
    /// non-redundant one) failed CRC verification
    #[error("no valid environment data")]
    NoData,
}

/// Result type alias for ubootenv operations
pub type Result<T> = std::result::Result<T, EnvError>;

impl EnvError {
    /// Process exit code mirroring the magnitude of the C errno this kind
    /// corresponds to in the reference implementation.
    pub fn exit_code(&self) -> i32 {
        match self {
            EnvError::InvalidArgument(_) => libc::EINVAL,
            EnvError::Busy(_) => libc::EBUSY,
            EnvError::Io(_) => libc::EIO,
            EnvError::BadDevice(_) => libc::EBADF,
            EnvError::NoMemory(_) => libc::ENOMEM,
            EnvError::PermissionDenied(_) => libc::EPERM,
            EnvError::NoData => libc::ENODATA,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EnvError::InvalidArgument("name contains '='".to_string());
        assert_eq!(err.to_string(), "invalid argument: name contains '='");
    }

    #[test]
    fn test_no_data_display() {
        assert_eq!(EnvError::NoData.to_string(), "no valid environment data");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let env_err: EnvError = io_err.into();
        assert!(matches!(env_err, EnvError::Io(_)));
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(EnvError::Busy(String::new()).exit_code(), libc::EBUSY);
        assert_eq!(EnvError::NoData.exit_code(), libc::ENODATA);
        assert_eq!(
            EnvError::PermissionDenied(String::new()).exit_code(),
            libc::EPERM
        );
    }
}
