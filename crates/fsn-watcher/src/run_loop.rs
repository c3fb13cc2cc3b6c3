//! The blocking run loop serviced by each session's background thread.
//!
//! A [`RunLoop`] is created on the thread that will run it; the matching
//! [`RunLoopHandle`] is what native sources post raw batches to and what the
//! controlling thread uses to wake the loop for shutdown. Both kinds of
//! message travel through one FIFO queue, so every batch posted before
//! [`RunLoopHandle::stop`] is dispatched before the loop returns.

use crossbeam_channel::{Receiver, Sender};
use smallvec::SmallVec;

use crate::registry::SessionHandle;
use crate::taxonomy::RawRecord;

/// Raw records reported together by a native source.
///
/// Uses [`SmallVec`] with inline storage for up to 8 records; most native
/// callbacks carry only a handful.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBatch {
    /// The opaque context the native source was opened with.
    pub context: SessionHandle,

    /// Records in the order the native source reported them.
    pub records: SmallVec<[RawRecord; 8]>,
}

impl RawBatch {
    /// Creates a batch for the given session context.
    #[must_use]
    pub fn new(context: SessionHandle, records: impl IntoIterator<Item = RawRecord>) -> Self {
        Self {
            context,
            records: records.into_iter().collect(),
        }
    }

    /// Returns the number of records.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if the batch carries no records.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug)]
enum LoopMessage {
    Batch(RawBatch),
    Stop,
}

/// Why [`RunLoop::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// [`RunLoopHandle::stop`] was called.
    Stopped,
    /// Every handle was dropped.
    Disconnected,
}

/// Cloneable handle to a session's run loop.
#[derive(Debug, Clone)]
pub struct RunLoopHandle {
    tx: Sender<LoopMessage>,
}

impl RunLoopHandle {
    /// Queues a batch for dispatch. Never blocks.
    ///
    /// Returns `false` if the loop has already exited.
    pub fn post(&self, batch: RawBatch) -> bool {
        self.tx.send(LoopMessage::Batch(batch)).is_ok()
    }

    /// Asks the loop to return once everything queued so far is dispatched.
    ///
    /// Returns `false` if the loop has already exited.
    pub fn stop(&self) -> bool {
        self.tx.send(LoopMessage::Stop).is_ok()
    }
}

/// A blocking run loop owned by one background thread.
#[derive(Debug)]
pub struct RunLoop {
    rx: Receiver<LoopMessage>,
}

impl RunLoop {
    /// Creates a loop and the handle that feeds it.
    #[must_use]
    pub fn new() -> (Self, RunLoopHandle) {
        let (tx, rx) = crossbeam_channel::unbounded();
        (Self { rx }, RunLoopHandle { tx })
    }

    /// Blocks the calling thread, handing each batch to `on_batch` in order.
    pub fn run(self, mut on_batch: impl FnMut(RawBatch)) -> LoopExit {
        for message in &self.rx {
            match message {
                LoopMessage::Batch(batch) => on_batch(batch),
                LoopMessage::Stop => return LoopExit::Stopped,
            }
        }
        LoopExit::Disconnected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::taxonomy::RawFlags;

    fn batch(n: u64, path: &str) -> RawBatch {
        RawBatch::new(
            SessionHandle::from_raw(n),
            [RawRecord::new(path, RawFlags::ITEM_CREATED)],
        )
    }

    #[test]
    fn test_batches_before_stop_are_dispatched_in_order() {
        let (run_loop, handle) = RunLoop::new();
        assert!(handle.post(batch(1, "/a")));
        assert!(handle.post(batch(1, "/b")));
        assert!(handle.stop());
        assert!(handle.post(batch(1, "/late")));

        let mut seen = Vec::new();
        let exit = run_loop.run(|b| seen.push(b.records[0].path.clone()));

        assert_eq!(exit, LoopExit::Stopped);
        assert_eq!(
            seen,
            vec![Some("/a".into()), Some("/b".into())]
        );
    }

    #[test]
    fn test_dropping_every_handle_ends_loop() {
        let (run_loop, handle) = RunLoop::new();
        drop(handle);
        assert_eq!(run_loop.run(|_| {}), LoopExit::Disconnected);
    }

    #[test]
    fn test_post_after_exit_reports_false() {
        let (run_loop, handle) = RunLoop::new();
        handle.stop();
        run_loop.run(|_| {});
        assert!(!handle.post(batch(1, "/a")));
        assert!(!handle.stop());
    }

    #[test]
    fn test_stop_from_another_thread() {
        let (run_loop, handle) = RunLoop::new();
        let worker = std::thread::spawn(move || run_loop.run(|_| {}));
        handle.stop();
        let exit = worker.join().expect("run loop thread panicked");
        assert_eq!(exit, LoopExit::Stopped);
    }
}
