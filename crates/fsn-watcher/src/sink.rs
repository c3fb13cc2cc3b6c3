//! Capabilities the engine consumes from its embedding host.
//!
//! - [`CallbackSink`]: receives every canonical event of one session
//! - [`HostRuntime`]: the one-time registration a background thread needs
//!   before it may call into the host
//!
//! Both are called from the session's background thread, never from the
//! thread that started the session.
//!
//! # Examples
//!
//! Any `Fn(&ChangeEvent) -> Result<(), SinkError>` closure is a sink:
//!
//! ```
//! use fsn_watcher::{CallbackSink, ChangeEvent, EventKind, SinkError};
//!
//! let sink = |event: &ChangeEvent| -> Result<(), SinkError> {
//!     println!("{event}");
//!     Ok(())
//! };
//! sink.path_changed(&ChangeEvent::new(EventKind::Created, "/tmp/a"))?;
//! # Ok::<(), SinkError>(())
//! ```

use tokio::sync::mpsc;

use crate::events::ChangeEvent;

/// Errors a sink reports back to the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The calling thread can no longer reach the host.
    ///
    /// Invalidates the session: this and every later event is dropped.
    #[error("callback sink is unreachable from the watcher thread")]
    Unreachable,

    /// The host refused this one event; delivery continues.
    #[error("callback sink rejected event: {0}")]
    Rejected(String),
}

impl SinkError {
    /// Returns `true` if this failure invalidates the session.
    #[inline]
    #[must_use]
    pub const fn invalidates_session(&self) -> bool {
        matches!(self, Self::Unreachable)
    }
}

/// Receiver of canonical change events.
///
/// # Thread Safety
///
/// Called from a thread the host did not create. Implementations must be
/// [`Send`] and [`Sync`], and must return promptly: the dispatcher does not
/// buffer, so a slow sink delays later events of the same session (other
/// sessions are unaffected).
pub trait CallbackSink: Send + Sync + 'static {
    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Return [`SinkError::Unreachable`] when the host can no longer be
    /// called from this thread, [`SinkError::Rejected`] to have the failure
    /// logged without affecting later events.
    fn path_changed(&self, event: &ChangeEvent) -> Result<(), SinkError>;
}

impl<F> CallbackSink for F
where
    F: Fn(&ChangeEvent) -> Result<(), SinkError> + Send + Sync + 'static,
{
    #[inline]
    fn path_changed(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        self(event)
    }
}

/// Errors from the host runtime registration.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The host refused to register the thread.
    #[error("host refused to attach thread '{thread}': {reason}")]
    AttachRefused {
        /// Name of the thread being attached.
        thread: String,
        /// Explanation from the host.
        reason: String,
    },

    /// The host's interface version is not one the engine can call.
    #[error("host runtime version is not supported")]
    UnsupportedVersion,
}

/// How background threads register with the embedding host.
///
/// One instance is owned by an [`Engine`](crate::Engine) and shared by all
/// its sessions. Each background thread calls
/// [`attach_current_thread`](HostRuntime::attach_current_thread) once before
/// its first delivery, and
/// [`detach_current_thread`](HostRuntime::detach_current_thread) on exit if
/// the attach succeeded.
pub trait HostRuntime: Send + Sync + 'static {
    /// Registers the calling thread with the host.
    ///
    /// # Errors
    ///
    /// A failure invalidates the session served by this thread.
    fn attach_current_thread(&self, thread_name: &str) -> Result<(), HostError>;

    /// Unregisters the calling thread.
    fn detach_current_thread(&self) {}
}

/// Host runtime for pure Rust embedders, where any thread may call any sink.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeThreads;

impl HostRuntime for NativeThreads {
    #[inline]
    fn attach_current_thread(&self, _thread_name: &str) -> Result<(), HostError> {
        Ok(())
    }
}

/// A sink that forwards events into a tokio channel.
///
/// Sending never blocks, so the background thread is never held up by the
/// async consumer. Dropping the receiver makes the sink unreachable, which
/// invalidates the session.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use fsn_watcher::{ChannelSink, Engine};
///
/// # async fn example() -> Result<(), fsn_watcher::WatchError> {
/// let engine = Engine::new();
/// let (sink, mut events) = ChannelSink::channel();
/// let session = engine.start(["/srv/data"], Duration::from_millis(50), sink)?;
///
/// while let Some(event) = events.recv().await {
///     println!("{event}");
/// }
/// engine.stop(session)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver its events arrive on.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChangeEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Returns `true` if the receiving side has been dropped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl CallbackSink for ChannelSink {
    fn path_changed(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        self.tx
            .send(event.clone())
            .map_err(|_closed| SinkError::Unreachable)
    }
}
