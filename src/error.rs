//! Error types for the ring client and its transport.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::config::ConfigError;
use crate::transport::shm::ShmError;

/// Error type for every client and driver operation
#[derive(Error, Debug)]
pub enum UsrbioError {
    /// Request falls outside `[0, file_size)`; raised before any ring activity
    #[error("{op} out of bounds: offset={offset}, size={size}, file_size={file_size}")]
    OutOfBounds {
        op: &'static str,
        offset: u64,
        size: usize,
        file_size: u64,
    },

    /// A completion reported a negative result
    #[error("driver reported errno {errno}: {source}")]
    Driver {
        errno: i32,
        #[source]
        source: io::Error,
    },

    /// A completion reported zero bytes while bytes were still outstanding
    #[error("no progress at file offset {offset}")]
    NoProgress { offset: u64 },

    /// Completion set was empty or reported more bytes than requested
    #[error("invalid completion: {0}")]
    InvalidCompletion(String),

    /// Failure while acquiring a resource during construction
    #[error("failed to {what}: {source}")]
    Resource {
        what: String,
        #[source]
        source: io::Error,
    },

    /// Driver refused a registration or lookup
    #[error("registration error: {0}")]
    Registration(String),

    /// No mount point covers the path
    #[error("no mount point found for {}", .0.display())]
    MountNotFound(PathBuf),

    /// Slice request exceeds the descriptor it is cut from
    #[error("slice {start}..{end} exceeds descriptor of {len} bytes")]
    SliceOutOfRange { start: usize, end: usize, len: usize },

    /// Operation prepared on a ring bound to the other direction
    #[error("ring direction mismatch: ring is for {ring}, operation is {op}")]
    DirectionMismatch {
        ring: &'static str,
        op: &'static str,
    },

    /// Submission queue has no room for another entry
    #[error("submission queue full ({depth} entries)")]
    RingFull { depth: u32 },

    /// Operation on a client that has already been closed
    #[error("client is closed")]
    Closed,

    /// Shared memory error
    #[error("shared memory error: {0}")]
    Shm(#[from] ShmError),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Plain I/O error from truncate, fsync or close
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl UsrbioError {
    /// Build a driver error from a positive errno
    pub fn driver(errno: i32) -> Self {
        UsrbioError::Driver {
            errno,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// Raw OS error code carried by this error, if any
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            UsrbioError::Driver { errno, .. } => Some(*errno),
            UsrbioError::Resource { source, .. } | UsrbioError::Io(source) => {
                source.raw_os_error()
            }
            _ => None,
        }
    }
}

pub type UsrbioResult<T> = Result<T, UsrbioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_driver_error_carries_errno() {
        let err = UsrbioError::driver(libc::EIO);
        assert_eq!(err.raw_os_error(), Some(libc::EIO));
        assert!(err.to_string().contains("errno 5"));
    }

    #[test]
    fn test_out_of_bounds_message() {
        let err = UsrbioError::OutOfBounds {
            op: "read",
            offset: 10,
            size: 20,
            file_size: 16,
        };
        assert_eq!(
            err.to_string(),
            "read out of bounds: offset=10, size=20, file_size=16"
        );
        assert_eq!(err.raw_os_error(), None);
    }
}
