//! Error types for the fsn-watcher crate.
//!
//! This module provides the [`WatchError`] type for errors that can occur
//! while starting, running, or stopping a watch session.

use std::path::PathBuf;

use camino::Utf8PathBuf;

use crate::registry::SessionHandle;

/// Errors that can occur during watch session operations.
///
/// # Error Categories
///
/// - **Configuration** ([`WatchError::NoRoots`], [`WatchError::NonUtf8Path`],
///   [`WatchError::PathNotFound`]): `start` fails before any session exists
/// - **Resource acquisition** ([`WatchError::Notify`], [`WatchError::Backend`],
///   [`WatchError::ThreadSpawn`], [`WatchError::WorkerExited`],
///   [`WatchError::Io`]): `start` fails after rolling back what it acquired
/// - **Runtime invalidation** ([`WatchError::InvalidState`]): reported by the
///   next lifecycle call on a session whose events could not reach the sink
/// - **Caller contract** ([`WatchError::UnknownSession`]): the handle does not
///   name a running session
///
/// # Examples
///
/// ```
/// use fsn_watcher::WatchError;
///
/// fn report(err: &WatchError) -> &'static str {
///     if err.is_configuration() {
///         "fix the watch request"
///     } else if err.is_invalid_state() {
///         "rescan everything, then start a new session"
///     } else {
///         "watching failed"
///     }
/// }
///
/// assert_eq!(report(&WatchError::NoRoots), "fix the watch request");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watch request named no root paths.
    #[error("no paths given to watch")]
    NoRoots,

    /// A root path cannot be represented in the native path encoding.
    #[error("path is not valid UTF-8: {}", _0.display())]
    NonUtf8Path(PathBuf),

    /// A root path does not exist.
    #[error("path does not exist: {0}")]
    PathNotFound(Utf8PathBuf),

    /// The notify watcher failed to initialize or to register a root.
    #[error("notify watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// A native source operation failed.
    #[error("native source failed to {operation}: {reason}")]
    Backend {
        /// The step that failed, e.g. `create stream`.
        operation: &'static str,
        /// Explanation from the backend.
        reason: String,
    },

    /// The background thread could not be spawned.
    #[error("could not create file watcher thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// The background thread ended before publishing its run loop.
    #[error("file watcher thread exited before its run loop started")]
    WorkerExited,

    /// Events for this session could not be delivered at some point.
    ///
    /// Changes reported during the session's lifetime may be incomplete.
    #[error("watcher is in invalid state, reported changes may be incorrect")]
    InvalidState,

    /// The handle does not name a running session.
    #[error("unknown watch session: {0}")]
    UnknownSession(SessionHandle),

    /// An I/O error occurred while preparing a root path.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WatchError {
    /// Creates a new [`WatchError::Backend`] error.
    #[inline]
    pub fn backend(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Backend {
            operation,
            reason: reason.into(),
        }
    }

    /// Creates a new [`WatchError::PathNotFound`] error.
    #[inline]
    pub fn path_not_found(path: impl Into<Utf8PathBuf>) -> Self {
        Self::PathNotFound(path.into())
    }

    /// Returns `true` if the watch request itself was at fault.
    #[inline]
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::NoRoots | Self::NonUtf8Path(_) | Self::PathNotFound(_)
        )
    }

    /// Returns `true` if the engine could not acquire an OS resource.
    ///
    /// Retrying the same request is unlikely to help.
    #[inline]
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::ThreadSpawn(_) | Self::WorkerExited)
    }

    /// Returns `true` if this reports a session that lost event delivery.
    #[inline]
    #[must_use]
    pub const fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState)
    }

    /// Returns the root path associated with this error, if any.
    #[must_use]
    pub fn path(&self) -> Option<&Utf8PathBuf> {
        match self {
            Self::PathNotFound(path) => Some(path),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_errors() {
        assert!(WatchError::NoRoots.is_configuration());
        assert!(WatchError::NonUtf8Path(PathBuf::from("x")).is_configuration());
        assert!(WatchError::path_not_found("/missing").is_configuration());
        assert!(!WatchError::InvalidState.is_configuration());
        assert!(!WatchError::WorkerExited.is_configuration());
    }

    #[test]
    fn test_invalid_state_display() {
        let err = WatchError::InvalidState;
        assert!(err.is_invalid_state());
        assert_eq!(
            err.to_string(),
            "watcher is in invalid state, reported changes may be incorrect"
        );
    }

    #[test]
    fn test_path_accessor() {
        let err = WatchError::path_not_found("/some/path");
        assert_eq!(err.path().map(|p| p.as_str()), Some("/some/path"));
        assert_eq!(err.to_string(), "path does not exist: /some/path");
        assert!(WatchError::NoRoots.path().is_none());
    }

    #[test]
    fn test_backend_display() {
        let err = WatchError::backend("create stream", "out of descriptors");
        assert_eq!(
            err.to_string(),
            "native source failed to create stream: out of descriptors"
        );
    }

    #[test]
    fn test_thread_spawn_keeps_source() {
        use std::error::Error as _;

        let err = WatchError::ThreadSpawn(std::io::Error::new(
            std::io::ErrorKind::OutOfMemory,
            "no threads left",
        ));
        assert!(err.source().is_some());
        assert!(err.is_fatal());
        assert!(err.to_string().contains("watcher thread"));
        assert!(!WatchError::InvalidState.is_fatal());
    }
}
