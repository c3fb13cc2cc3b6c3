//! Watch sessions and the engine that owns them.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──► Starting ──► Running ──► Stopping ──► Stopped
//!                │
//!                └──► Failed (start rolled back)
//! ```
//!
//! `start` does not return until the background thread has scheduled the
//! native source and published its run loop handle, so a `stop` issued right
//! after a successful `start` always finds a loop to signal.
//!
//! `stop` wakes the loop, joins the thread, and then releases resources in a
//! fixed order: the native stream is stopped, each root's native
//! representation is released, the stream itself is released, and the
//! callback sink goes last.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::Sender;
use fsn_core::WatchConfig;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::NotifyBackend;
use crate::dispatch::Dispatcher;
use crate::error::WatchError;
use crate::native::{NativeBackend, NativeSource};
use crate::registry::{SessionHandle, SessionRegistry, SessionShared};
use crate::roots::RootPathSet;
use crate::run_loop::{RunLoop, RunLoopHandle};
use crate::sink::{CallbackSink, HostRuntime, NativeThreads};

/// Prefix for background thread names unless configured otherwise.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "fsn-session";

/// Lifecycle state of a watch session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Roots validated and sink registered; nothing native exists yet.
    Created,
    /// The native source is open and the background thread is launching.
    Starting,
    /// The background thread is servicing the run loop.
    Running,
    /// A stop was requested; the background thread is winding down.
    Stopping,
    /// Every resource has been released.
    Stopped,
    /// Start failed and was rolled back.
    Failed,
}

impl SessionState {
    /// Returns the lowercase name of the state.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ReadySender = Sender<Result<RunLoopHandle, WatchError>>;

struct Session<B: NativeBackend> {
    roots: RootPathSet,
    state: SessionState,
    shared: Arc<SessionShared>,
    run_loop: Option<RunLoopHandle>,
    worker: Option<JoinHandle<NativeSource<B>>>,
}

impl<B: NativeBackend> Session<B> {
    fn new(roots: RootPathSet, shared: Arc<SessionShared>) -> Self {
        Self {
            roots,
            state: SessionState::Created,
            shared,
            run_loop: None,
            worker: None,
        }
    }

    fn transition(&mut self, to: SessionState) {
        tracing::debug!(session = %self.shared.handle, from = %self.state, to = %to, "Session state change");
        self.state = to;
    }
}

/// Owns every watch session and the resources they share.
///
/// # Thread Safety
///
/// All methods take `&self`; `start` and `stop` may be called from any
/// thread. Both block: `start` until the background thread is running,
/// `stop` until it has been joined.
///
/// # Examples
///
/// ```no_run
/// use std::time::Duration;
/// use fsn_watcher::{ChangeEvent, Engine, SinkError};
///
/// let engine = Engine::new();
/// let session = engine.start(
///     ["/srv/data"],
///     Duration::from_millis(50),
///     |event: &ChangeEvent| -> Result<(), SinkError> {
///         println!("{event}");
///         Ok(())
///     },
/// )?;
///
/// // ...
///
/// engine.stop(session)?;
/// # Ok::<(), fsn_watcher::WatchError>(())
/// ```
pub struct Engine<B: NativeBackend = NotifyBackend> {
    backend: B,
    host: Arc<dyn HostRuntime>,
    registry: Arc<SessionRegistry>,
    sessions: Mutex<FxHashMap<SessionHandle, Session<B>>>,
    thread_name_prefix: String,
}

impl Engine<NotifyBackend> {
    /// Creates an engine over the platform's recommended notification API.
    #[must_use]
    pub fn new() -> Self {
        Self::with_backend(NotifyBackend, Arc::new(NativeThreads))
    }
}

impl Default for Engine<NotifyBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: NativeBackend> Engine<B> {
    /// Creates an engine over an explicit backend and host runtime.
    #[must_use]
    pub fn with_backend(backend: B, host: Arc<dyn HostRuntime>) -> Self {
        Self {
            backend,
            host,
            registry: Arc::new(SessionRegistry::new()),
            sessions: Mutex::new(FxHashMap::default()),
            thread_name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_owned(),
        }
    }

    /// Sets the prefix of background thread names (`<prefix>-<handle>`).
    #[must_use]
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Returns the backend this engine opens native sources with.
    #[inline]
    #[must_use]
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Starts watching `roots`, delivering events to `sink`.
    ///
    /// `latency` is the coalescing window handed to the native source.
    ///
    /// # Errors
    ///
    /// - [`WatchError::NoRoots`] / [`WatchError::NonUtf8Path`] for a bad
    ///   request; nothing is created.
    /// - Any backend error while opening or scheduling the native source,
    ///   and [`WatchError::ThreadSpawn`] if no thread can be created; every
    ///   piece acquired so far is released in reverse order.
    pub fn start<I, P>(
        &self,
        roots: I,
        latency: Duration,
        sink: impl CallbackSink,
    ) -> Result<SessionHandle, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let roots = RootPathSet::new(roots)?;
        let handle = self.registry.allocate();
        let shared = Arc::new(SessionShared::new(handle, Box::new(sink)));
        self.registry.register(Arc::clone(&shared));

        let mut session = Session::new(roots, shared);
        session.transition(SessionState::Starting);

        match self.launch(&session.roots, latency, handle) {
            Ok((run_loop, worker)) => {
                session.run_loop = Some(run_loop);
                session.worker = Some(worker);
                session.transition(SessionState::Running);
                tracing::info!(
                    session = %handle,
                    roots = session.roots.len(),
                    latency_ms = latency.as_millis(),
                    "Watch session started"
                );
                self.sessions.lock().insert(handle, session);
                Ok(handle)
            }
            Err(error) => {
                session.transition(SessionState::Failed);
                drop(self.registry.unregister(handle));
                drop(session);
                tracing::warn!(session = %handle, error = %error, "Failed to start watch session");
                Err(error)
            }
        }
    }

    /// Starts a session with the latency from `config`.
    ///
    /// # Errors
    ///
    /// See [`Engine::start`].
    pub fn start_with_config<I, P>(
        &self,
        roots: I,
        config: &WatchConfig,
        sink: impl CallbackSink,
    ) -> Result<SessionHandle, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.start(roots, config.latency(), sink)
    }

    /// Stops a running session and releases everything it owns.
    ///
    /// Blocks until the background thread has exited. Teardown always runs
    /// to completion; failures of individual release steps are logged.
    ///
    /// # Errors
    ///
    /// - [`WatchError::UnknownSession`] if `handle` does not name a running
    ///   session (never started, already stopped, or being stopped).
    /// - [`WatchError::InvalidState`] if events were dropped at some point
    ///   during the session; the session is torn down regardless.
    pub fn stop(&self, handle: SessionHandle) -> Result<(), WatchError> {
        let (run_loop, worker, shared) = {
            let mut sessions = self.sessions.lock();
            let session = sessions
                .get_mut(&handle)
                .filter(|session| session.state == SessionState::Running)
                .ok_or(WatchError::UnknownSession(handle))?;
            session.transition(SessionState::Stopping);
            (session.run_loop.take(), session.worker.take(), Arc::clone(&session.shared))
        };

        if !run_loop.is_some_and(|run_loop| run_loop.stop()) {
            tracing::debug!(session = %handle, "Run loop had already exited");
        }
        match worker.map(|worker| join_worker(handle, worker)) {
            Some(Some(source)) => source.close(),
            // Whatever the thread had not yet delivered is lost.
            Some(None) => {
                shared.guard.mark();
            }
            None => {}
        }
        drop(shared);

        let session = self.sessions.lock().remove(&handle);
        drop(self.registry.unregister(handle));
        let Some(mut session) = session else {
            return Err(WatchError::UnknownSession(handle));
        };
        session.transition(SessionState::Stopped);
        let outcome = session.shared.guard.check();
        // Last reference to the sink.
        drop(session);

        match &outcome {
            Ok(()) => tracing::info!(session = %handle, "Watch session stopped"),
            Err(_) => tracing::warn!(
                session = %handle,
                "Watch session stopped, reported changes may be incomplete"
            ),
        }
        outcome
    }

    /// Returns the lifecycle state of a session.
    ///
    /// # Errors
    ///
    /// [`WatchError::InvalidState`] once the session has dropped events,
    /// [`WatchError::UnknownSession`] if the handle names no session.
    pub fn state(&self, handle: SessionHandle) -> Result<SessionState, WatchError> {
        let sessions = self.sessions.lock();
        let session = sessions
            .get(&handle)
            .ok_or(WatchError::UnknownSession(handle))?;
        session.shared.guard.check()?;
        Ok(session.state)
    }

    /// Returns the roots a session watches.
    ///
    /// # Errors
    ///
    /// [`WatchError::UnknownSession`] if the handle names no session.
    pub fn roots(&self, handle: SessionHandle) -> Result<RootPathSet, WatchError> {
        self.sessions
            .lock()
            .get(&handle)
            .map(|session| session.roots.clone())
            .ok_or(WatchError::UnknownSession(handle))
    }

    /// Returns the number of sessions that have not been stopped.
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.sessions.lock().len()
    }

    fn launch(
        &self,
        roots: &RootPathSet,
        latency: Duration,
        handle: SessionHandle,
    ) -> Result<(RunLoopHandle, JoinHandle<NativeSource<B>>), WatchError> {
        let source = NativeSource::open(&self.backend, roots, latency, handle)?;

        let thread_name = format!("{}-{}", self.thread_name_prefix, handle.get());
        let dispatcher = Dispatcher::new(
            handle,
            thread_name.clone(),
            Arc::clone(&self.registry),
            Arc::clone(&self.host),
        );
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);

        // On spawn failure the closure is dropped, releasing the source.
        let worker = thread::Builder::new()
            .name(thread_name)
            .spawn(move || run_session(source, dispatcher, &ready_tx))
            .map_err(WatchError::ThreadSpawn)?;

        match ready_rx.recv() {
            Ok(Ok(run_loop)) => Ok((run_loop, worker)),
            Ok(Err(error)) => {
                if let Some(source) = join_worker(handle, worker) {
                    source.close();
                }
                Err(error)
            }
            Err(_disconnected) => {
                if let Some(source) = join_worker(handle, worker) {
                    source.close();
                }
                Err(WatchError::WorkerExited)
            }
        }
    }
}

impl<B: NativeBackend> fmt::Debug for Engine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.sessions.lock().len())
            .field("registered", &self.registry.len())
            .field("thread_name_prefix", &self.thread_name_prefix)
            .finish_non_exhaustive()
    }
}

impl<B: NativeBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        let running: Vec<SessionHandle> = self
            .sessions
            .lock()
            .iter()
            .filter(|(_, session)| session.state == SessionState::Running)
            .map(|(handle, _)| *handle)
            .collect();

        for handle in running {
            tracing::warn!(session = %handle, "Stopping watch session left running at engine shutdown");
            if let Err(error) = self.stop(handle) {
                tracing::warn!(session = %handle, error = %error, "Watch session ended with error");
            }
        }
    }
}

/// Body of a session's background thread.
///
/// Hands the source back to the joining thread, which releases it.
fn run_session<B: NativeBackend>(
    mut source: NativeSource<B>,
    mut dispatcher: Dispatcher,
    ready: &ReadySender,
) -> NativeSource<B> {
    let (run_loop, handle) = RunLoop::new();

    if let Err(error) = source.schedule(&handle) {
        if ready.send(Err(error)).is_err() {
            tracing::debug!(
                session = %source.context(),
                "Starter gone before schedule failure was reported"
            );
        }
        return source;
    }
    if ready.send(Ok(handle)).is_err() {
        return source;
    }

    let exit = run_loop.run(|batch| dispatcher.deliver_batch(batch));
    tracing::debug!(
        session = %source.context(),
        exit = ?exit,
        delivered = dispatcher.delivered(),
        "Run loop exited"
    );
    drop(dispatcher);
    source
}

fn join_worker<B: NativeBackend>(
    handle: SessionHandle,
    worker: JoinHandle<NativeSource<B>>,
) -> Option<NativeSource<B>> {
    match worker.join() {
        Ok(source) => Some(source),
        Err(_panic) => {
            // The source was dropped, and so released, during unwinding.
            tracing::error!(session = %handle, "Watcher thread panicked");
            None
        }
    }
}
