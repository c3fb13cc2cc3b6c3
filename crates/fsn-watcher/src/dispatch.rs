//! The single path from native batches to the callback sink.
//!
//! A [`Dispatcher`] lives on a session's background thread for as long as
//! its run loop runs. Before the first delivery it registers the thread with
//! the [`HostRuntime`]; if that fails, or the sink later reports itself
//! unreachable or panics, the session's
//! [`InvalidGuard`](crate::guard::InvalidGuard) is set and every further
//! event is dropped without retrying.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::events::ChangeEvent;
use crate::registry::{SessionHandle, SessionRegistry, SessionShared};
use crate::run_loop::RawBatch;
use crate::sink::HostRuntime;
use crate::taxonomy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Registration {
    Pending,
    Attached,
    Failed,
}

/// Delivers classified events for one session.
pub(crate) struct Dispatcher {
    session: SessionHandle,
    thread_name: String,
    registry: Arc<SessionRegistry>,
    host: Arc<dyn HostRuntime>,
    registration: Registration,
    delivered: u64,
}

impl Dispatcher {
    pub(crate) fn new(
        session: SessionHandle,
        thread_name: String,
        registry: Arc<SessionRegistry>,
        host: Arc<dyn HostRuntime>,
    ) -> Self {
        Self {
            session,
            thread_name,
            registry,
            host,
            registration: Registration::Pending,
            delivered: 0,
        }
    }

    /// Number of events the sink accepted so far.
    pub(crate) const fn delivered(&self) -> u64 {
        self.delivered
    }

    /// Classifies and delivers every record of a batch, in order.
    pub(crate) fn deliver_batch(&mut self, batch: RawBatch) {
        if batch.context != self.session {
            tracing::warn!(
                session = %self.session,
                context = %batch.context,
                "Dropping batch posted to the wrong run loop"
            );
            return;
        }
        let Some(shared) = self.registry.resolve(batch.context) else {
            tracing::debug!(session = %batch.context, "Dropping batch for unregistered session");
            return;
        };
        tracing::debug!(session = %shared.handle, records = batch.len(), "Dispatching batch");
        for record in batch.records {
            self.deliver(&shared, taxonomy::canonicalize(record));
        }
    }

    /// Delivers one event, honouring the session's invalid flag.
    pub(crate) fn deliver(&mut self, shared: &SessionShared, event: ChangeEvent) {
        if shared.guard.is_set() || !self.ensure_registered(shared) {
            return;
        }
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| shared.sink.path_changed(&event)));
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(payload) => {
                if shared.guard.mark() {
                    tracing::warn!(
                        session = %shared.handle,
                        event = %event,
                        panic = panic_message(payload.as_ref()),
                        "Callback sink panicked, dropping all further events"
                    );
                }
                return;
            }
        };
        match outcome {
            Ok(()) => self.delivered += 1,
            Err(error) if error.invalidates_session() => {
                if shared.guard.mark() {
                    tracing::warn!(
                        session = %shared.handle,
                        error = %error,
                        "Callback sink unreachable, dropping all further events"
                    );
                }
            }
            Err(error) => {
                tracing::warn!(session = %shared.handle, event = %event, error = %error, "Callback sink rejected event");
            }
        }
    }

    fn ensure_registered(&mut self, shared: &SessionShared) -> bool {
        match self.registration {
            Registration::Attached => true,
            Registration::Failed => false,
            Registration::Pending => match self.host.attach_current_thread(&self.thread_name) {
                Ok(()) => {
                    tracing::debug!(thread = %self.thread_name, "Attached watcher thread to host");
                    self.registration = Registration::Attached;
                    true
                }
                Err(error) => {
                    self.registration = Registration::Failed;
                    shared.guard.mark();
                    tracing::warn!(
                        session = %shared.handle,
                        thread = %self.thread_name,
                        error = %error,
                        "Could not attach watcher thread to host, session is now invalid"
                    );
                    false
                }
            },
        }
    }
}

/// Best-effort text of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.registration == Registration::Attached {
            self.host.detach_current_thread();
            tracing::debug!(thread = %self.thread_name, "Detached watcher thread from host");
        }
    }
}
