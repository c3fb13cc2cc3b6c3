//! Deterministic doubles for the native backend, the sink and the host.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use camino::Utf8Path;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::error::WatchError;
use crate::events::{ChangeEvent, EventKind};
use crate::native::{NativeBackend, NativeStream};
use crate::registry::SessionHandle;
use crate::run_loop::{RawBatch, RunLoopHandle};
use crate::sink::{CallbackSink, HostError, HostRuntime, SinkError};
use crate::taxonomy::RawRecord;

/// Which backend step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailAt {
    /// Encoding the root at this index.
    Encode(usize),
    Create,
    Schedule,
}

/// Allocation and release counts observed by a [`ScriptedBackend`].
#[derive(Debug, Default)]
pub(crate) struct ScriptedCounters {
    paths_allocated: AtomicUsize,
    paths_released: AtomicUsize,
    streams_created: AtomicUsize,
    streams_stopped: AtomicUsize,
    streams_released: AtomicUsize,
}

impl ScriptedCounters {
    pub(crate) fn paths_allocated(&self) -> usize {
        self.paths_allocated.load(Ordering::SeqCst)
    }

    pub(crate) fn paths_released(&self) -> usize {
        self.paths_released.load(Ordering::SeqCst)
    }

    pub(crate) fn streams_created(&self) -> usize {
        self.streams_created.load(Ordering::SeqCst)
    }

    pub(crate) fn streams_stopped(&self) -> usize {
        self.streams_stopped.load(Ordering::SeqCst)
    }

    pub(crate) fn streams_released(&self) -> usize {
        self.streams_released.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    fail_at: Option<FailAt>,
    encode_calls: AtomicUsize,
    counters: ScriptedCounters,
    journal: Mutex<Vec<&'static str>>,
    latencies: Mutex<Vec<Duration>>,
    live: Mutex<FxHashMap<SessionHandle, RunLoopHandle>>,
}

impl ScriptState {
    fn record(&self, step: &'static str) {
        self.journal.lock().push(step);
    }
}

/// A backend whose streams fire only when told to.
///
/// Clones share state, so a test can hand one clone to an engine and keep
/// observing through another.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedBackend {
    state: Arc<ScriptState>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn failing(at: FailAt) -> Self {
        Self {
            state: Arc::new(ScriptState {
                fail_at: Some(at),
                ..ScriptState::default()
            }),
        }
    }

    pub(crate) fn counters(&self) -> &ScriptedCounters {
        &self.state.counters
    }

    /// Teardown steps in the order they happened.
    pub(crate) fn journal(&self) -> Vec<&'static str> {
        self.state.journal.lock().clone()
    }

    /// Latency handed to each `create_stream` call, in call order.
    pub(crate) fn latencies(&self) -> Vec<Duration> {
        self.state.latencies.lock().clone()
    }

    /// Number of sessions whose stream is currently scheduled.
    pub(crate) fn live_streams(&self) -> usize {
        self.state.live.lock().len()
    }

    /// Posts records as if the native source of `session` reported them.
    ///
    /// Returns `false` if that session has no scheduled stream.
    pub(crate) fn emit_to(
        &self,
        session: SessionHandle,
        records: impl IntoIterator<Item = RawRecord>,
    ) -> bool {
        let Some(run_loop) = self.state.live.lock().get(&session).cloned() else {
            return false;
        };
        run_loop.post(RawBatch::new(session, records))
    }

    /// Wraps a sink so its release shows up in the journal as `sink.release`.
    pub(crate) fn journal_sink<S: CallbackSink>(&self, inner: S) -> JournalSink<S> {
        JournalSink {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

impl NativeBackend for ScriptedBackend {
    type Path = ScriptedPath;
    type Stream = ScriptedStream;

    fn encode_path(&self, root: &Utf8Path) -> Result<ScriptedPath, WatchError> {
        let index = self.state.encode_calls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_at == Some(FailAt::Encode(index)) {
            return Err(WatchError::backend("encode path", format!("scripted failure at {root}")));
        }
        self.state.counters.paths_allocated.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedPath {
            state: Arc::clone(&self.state),
        })
    }

    fn create_stream(
        &self,
        _roots: &[ScriptedPath],
        latency: Duration,
        context: SessionHandle,
    ) -> Result<ScriptedStream, WatchError> {
        self.state.latencies.lock().push(latency);
        if self.state.fail_at == Some(FailAt::Create) {
            return Err(WatchError::backend("create stream", "scripted failure"));
        }
        self.state.counters.streams_created.fetch_add(1, Ordering::SeqCst);
        Ok(ScriptedStream {
            context,
            state: Arc::clone(&self.state),
        })
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedPath {
    state: Arc<ScriptState>,
}

impl Drop for ScriptedPath {
    fn drop(&mut self) {
        self.state.counters.paths_released.fetch_add(1, Ordering::SeqCst);
        self.state.record("path.release");
    }
}

#[derive(Debug)]
pub(crate) struct ScriptedStream {
    context: SessionHandle,
    state: Arc<ScriptState>,
}

impl NativeStream for ScriptedStream {
    fn schedule(&mut self, run_loop: &RunLoopHandle) -> Result<(), WatchError> {
        if self.state.fail_at == Some(FailAt::Schedule) {
            return Err(WatchError::backend("schedule stream", "scripted failure"));
        }
        self.state.live.lock().insert(self.context, run_loop.clone());
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WatchError> {
        self.state.live.lock().remove(&self.context);
        self.state.counters.streams_stopped.fetch_add(1, Ordering::SeqCst);
        self.state.record("stream.stop");
        Ok(())
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.state.counters.streams_released.fetch_add(1, Ordering::SeqCst);
        self.state.record("stream.release");
    }
}

/// A sink that journals its own release into a [`ScriptedBackend`].
pub(crate) struct JournalSink<S> {
    inner: S,
    state: Arc<ScriptState>,
}

impl<S: CallbackSink> CallbackSink for JournalSink<S> {
    fn path_changed(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        self.inner.path_changed(event)
    }
}

impl<S> Drop for JournalSink<S> {
    fn drop(&mut self) {
        self.state.record("sink.release");
    }
}

#[derive(Debug, Clone, Copy)]
enum SinkBehaviour {
    Accept,
    UnreachableAfter(usize),
    Rejecting(EventKind),
    PanicOn(EventKind),
}

#[derive(Debug, Default)]
struct SinkLog {
    events: Mutex<Vec<ChangeEvent>>,
    calls: AtomicUsize,
}

/// A sink that records what it accepted.
#[derive(Debug)]
pub(crate) struct RecordingSink {
    behaviour: SinkBehaviour,
    log: Arc<SinkLog>,
}

/// Observer side of a [`RecordingSink`].
#[derive(Debug, Clone)]
pub(crate) struct SinkObserver {
    log: Arc<SinkLog>,
}

impl RecordingSink {
    pub(crate) fn new() -> (Self, SinkObserver) {
        Self::with(SinkBehaviour::Accept)
    }

    /// Accepts `accepted` events, then reports itself unreachable.
    pub(crate) fn unreachable_after(accepted: usize) -> (Self, SinkObserver) {
        Self::with(SinkBehaviour::UnreachableAfter(accepted))
    }

    /// Rejects every event of `kind`.
    pub(crate) fn rejecting(kind: EventKind) -> (Self, SinkObserver) {
        Self::with(SinkBehaviour::Rejecting(kind))
    }

    /// Panics on every event of `kind`.
    pub(crate) fn panicking_on(kind: EventKind) -> (Self, SinkObserver) {
        Self::with(SinkBehaviour::PanicOn(kind))
    }

    fn with(behaviour: SinkBehaviour) -> (Self, SinkObserver) {
        let log = Arc::new(SinkLog::default());
        (
            Self {
                behaviour,
                log: Arc::clone(&log),
            },
            SinkObserver { log },
        )
    }
}

impl CallbackSink for RecordingSink {
    fn path_changed(&self, event: &ChangeEvent) -> Result<(), SinkError> {
        let call = self.log.calls.fetch_add(1, Ordering::SeqCst);
        match self.behaviour {
            SinkBehaviour::UnreachableAfter(accepted) if call >= accepted => {
                return Err(SinkError::Unreachable);
            }
            SinkBehaviour::Rejecting(kind) if event.kind == kind => {
                return Err(SinkError::Rejected(format!("{kind} is not wanted")));
            }
            SinkBehaviour::PanicOn(kind) if event.kind == kind => {
                panic!("sink cannot handle {event}");
            }
            _ => {}
        }
        self.log.events.lock().push(event.clone());
        Ok(())
    }
}

impl SinkObserver {
    /// Events the sink accepted, in delivery order.
    pub(crate) fn events(&self) -> Vec<ChangeEvent> {
        self.log.events.lock().clone()
    }

    /// Number of `path_changed` calls, accepted or not.
    pub(crate) fn calls(&self) -> usize {
        self.log.calls.load(Ordering::SeqCst)
    }

    /// Polls until at least `count` events were accepted or `timeout` passes.
    pub(crate) fn wait_for(&self, count: usize, timeout: Duration) -> Vec<ChangeEvent> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let events = self.events();
            if events.len() >= count || std::time::Instant::now() >= deadline {
                return events;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

/// A host that counts attach and detach calls.
#[derive(Debug, Default)]
pub(crate) struct CountingHost {
    attaches: AtomicUsize,
    detaches: AtomicUsize,
}

impl CountingHost {
    pub(crate) fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub(crate) fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }
}

impl HostRuntime for CountingHost {
    fn attach_current_thread(&self, _thread_name: &str) -> Result<(), HostError> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn detach_current_thread(&self) {
        self.detaches.fetch_add(1, Ordering::SeqCst);
    }
}

/// A host that refuses every thread.
#[derive(Debug, Default)]
pub(crate) struct FailingHost {
    attempts: AtomicUsize,
}

impl FailingHost {
    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl HostRuntime for FailingHost {
    fn attach_current_thread(&self, thread_name: &str) -> Result<(), HostError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(HostError::AttachRefused {
            thread: thread_name.to_owned(),
            reason: "host is shutting down".to_owned(),
        })
    }
}

/// A host that panics while registering a thread.
#[derive(Debug, Default)]
pub(crate) struct PanickingHost;

impl HostRuntime for PanickingHost {
    fn attach_current_thread(&self, thread_name: &str) -> Result<(), HostError> {
        panic!("host cannot register {thread_name}");
    }
}
