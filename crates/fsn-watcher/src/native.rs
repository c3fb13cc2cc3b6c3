//! Binding between a watch session and a platform change-notification source.
//!
//! A backend supplies two things:
//!
//! - a native representation for each root path ([`NativeBackend::Path`]),
//!   produced by [`NativeBackend::encode_path`]
//! - a stream object ([`NativeBackend::Stream`]) bound to exactly those
//!   roots, which starts posting [`RawBatch`](crate::RawBatch)es once it is
//!   scheduled on a run loop
//!
//! [`NativeSource`] owns both and releases them in a fixed order: the stream
//! is stopped first, then every root representation is released, then the
//! stream itself. The same order applies whether the source is closed
//! explicitly, dropped, or rolled back halfway through [`NativeSource::open`].

use std::time::Duration;

use camino::Utf8Path;

use crate::error::WatchError;
use crate::registry::SessionHandle;
use crate::roots::RootPathSet;
use crate::run_loop::RunLoopHandle;

/// A platform change-notification API.
pub trait NativeBackend: Send + Sync + 'static {
    /// Native representation of one root path.
    type Path: Send + 'static;

    /// The stream object created over a set of roots.
    type Stream: NativeStream;

    /// Converts a root into the native path representation.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::PathNotFound`] if the root does not exist, or a
    /// backend-specific error if it cannot be encoded.
    fn encode_path(&self, root: &Utf8Path) -> Result<Self::Path, WatchError>;

    /// Creates a stream over `roots`.
    ///
    /// `context` is the only link back to the session; the stream tags every
    /// batch it posts with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS object cannot be created.
    fn create_stream(
        &self,
        roots: &[Self::Path],
        latency: Duration,
        context: SessionHandle,
    ) -> Result<Self::Stream, WatchError>;
}

/// A native stream created by a [`NativeBackend`].
///
/// Dropping the stream releases the OS object.
pub trait NativeStream: Send + 'static {
    /// Schedules the stream on the calling thread's run loop and starts it.
    ///
    /// Called once, from the session's background thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the stream cannot be started.
    fn schedule(&mut self, run_loop: &RunLoopHandle) -> Result<(), WatchError>;

    /// Stops the stream and invalidates it.
    ///
    /// Must tolerate a stream that was never scheduled.
    ///
    /// # Errors
    ///
    /// Returns an error if the OS reports a failure; teardown continues
    /// regardless.
    fn stop(&mut self) -> Result<(), WatchError>;
}

/// An opened native source: encoded roots plus the stream over them.
pub struct NativeSource<B: NativeBackend> {
    context: SessionHandle,
    paths: Vec<B::Path>,
    stream: Option<B::Stream>,
}

impl<B: NativeBackend> std::fmt::Debug for NativeSource<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeSource")
            .field("context", &self.context)
            .field("roots", &self.paths.len())
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl<B: NativeBackend> NativeSource<B> {
    /// Encodes every root and creates the stream over them.
    ///
    /// On failure, everything acquired so far is released before returning.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoRoots`] for an empty root set, otherwise the
    /// first error reported by the backend.
    pub fn open(
        backend: &B,
        roots: &RootPathSet,
        latency: Duration,
        context: SessionHandle,
    ) -> Result<Self, WatchError> {
        if roots.is_empty() {
            return Err(WatchError::NoRoots);
        }

        let mut source = Self {
            context,
            paths: Vec::with_capacity(roots.len()),
            stream: None,
        };
        for root in roots {
            source.paths.push(backend.encode_path(root)?);
        }
        source.stream = Some(backend.create_stream(&source.paths, latency, context)?);

        tracing::debug!(
            session = %context,
            roots = roots.len(),
            latency_ms = latency.as_millis(),
            "Opened native source"
        );
        Ok(source)
    }

    /// Returns the session context this source was opened with.
    #[inline]
    #[must_use]
    pub const fn context(&self) -> SessionHandle {
        self.context
    }

    /// Schedules the stream on the given run loop.
    ///
    /// # Errors
    ///
    /// Returns whatever the backend reports; the source must then be closed.
    pub fn schedule(&mut self, run_loop: &RunLoopHandle) -> Result<(), WatchError> {
        match self.stream.as_mut() {
            Some(stream) => stream.schedule(run_loop),
            None => Err(WatchError::backend("schedule stream", "stream already released")),
        }
    }

    /// Stops the stream and releases everything, in order.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        let Some(mut stream) = self.stream.take() else {
            // Never fully opened: only roots to give back.
            self.release_paths();
            return;
        };
        if let Err(error) = stream.stop() {
            tracing::warn!(session = %self.context, error = %error, "Failed to stop native stream");
        }
        self.release_paths();
        drop(stream);
        tracing::debug!(session = %self.context, "Released native source");
    }

    fn release_paths(&mut self) {
        // Reverse acquisition order.
        while let Some(path) = self.paths.pop() {
            drop(path);
        }
    }
}

impl<B: NativeBackend> Drop for NativeSource<B> {
    fn drop(&mut self) {
        self.release();
    }
}
