//! Error types returned by the watch registry.

use std::fmt;
use std::io;

/// The reason a call to [`add_watch`](crate::add_watch) (or one of the `watch_*` wrappers)
/// failed.
#[derive(Debug)]
pub enum RegisterError {
    /// The kernel refused to install the watch (bad fd, missing path, permission denied, ...).
    ///
    /// No watch was created and no event will ever be emitted for it.
    Backend(io::Error),

    /// The watch request itself was invalid, e.g. an empty mask or a `Timer` with a
    /// zero-second interval.
    InvalidArgument(String),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegisterError::Backend(error) => write!(f, "failed to register watch: {}", error),
            RegisterError::InvalidArgument(message) => {
                write!(f, "invalid watch request: {}", message)
            }
        }
    }
}

impl std::error::Error for RegisterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegisterError::Backend(error) => Some(error),
            RegisterError::InvalidArgument(_) => None,
        }
    }
}

impl From<io::Error> for RegisterError {
    fn from(error: io::Error) -> Self {
        RegisterError::Backend(error)
    }
}

/// The reason a call to [`cancel`](crate::cancel) failed.
#[derive(Debug)]
pub enum CancelError {
    /// No watch exists with the given descriptor (it was never issued, or has already been
    /// cancelled).
    NotFound,

    /// The watch was found, but the backend failed to unregister its kernel state.
    Backend(io::Error),
}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CancelError::NotFound => write!(f, "no such watch"),
            CancelError::Backend(error) => write!(f, "failed to cancel watch: {}", error),
        }
    }
}

impl std::error::Error for CancelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CancelError::NotFound => None,
            CancelError::Backend(error) => Some(error),
        }
    }
}
