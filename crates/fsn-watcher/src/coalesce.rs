//! Latency window for backends that report every change immediately.
//!
//! The first record to arrive opens a window of the configured latency;
//! everything reported until the window closes is posted to the run loop as
//! one [`RawBatch`], in arrival order. Records are never merged or dropped,
//! so no event kind is lost.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use smallvec::SmallVec;

use crate::error::WatchError;
use crate::registry::SessionHandle;
use crate::run_loop::{RawBatch, RunLoopHandle};
use crate::taxonomy::RawRecord;

pub(crate) type Records = SmallVec<[RawRecord; 8]>;

enum Feed {
    Records(Records),
    Shutdown,
}

/// Producer side of a coalescing window. Cheap to clone.
#[derive(Clone)]
pub(crate) struct CoalesceSender {
    tx: Sender<Feed>,
}

impl CoalesceSender {
    /// Returns `false` once the window thread has shut down.
    pub(crate) fn send(&self, records: Records) -> bool {
        self.tx.send(Feed::Records(records)).is_ok()
    }
}

/// A thread that groups records into batches of at most one latency window.
pub(crate) struct Coalescer {
    tx: Sender<Feed>,
    worker: Option<JoinHandle<()>>,
}

impl Coalescer {
    pub(crate) fn spawn(
        window: Duration,
        context: SessionHandle,
        run_loop: RunLoopHandle,
    ) -> Result<Self, WatchError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let worker = thread::Builder::new()
            .name(format!("fsn-coalesce-{}", context.get()))
            .spawn(move || coalesce(&rx, window, context, &run_loop))
            .map_err(WatchError::ThreadSpawn)?;
        Ok(Self {
            tx,
            worker: Some(worker),
        })
    }

    pub(crate) fn sender(&self) -> CoalesceSender {
        CoalesceSender {
            tx: self.tx.clone(),
        }
    }

    /// Posts whatever the open window holds and joins the thread.
    pub(crate) fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        if self.tx.send(Feed::Shutdown).is_err() {
            tracing::debug!("Coalescing thread already gone");
        }
        if worker.join().is_err() {
            tracing::error!("Coalescing thread panicked");
        }
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn coalesce(
    rx: &Receiver<Feed>,
    window: Duration,
    context: SessionHandle,
    run_loop: &RunLoopHandle,
) {
    while let Ok(Feed::Records(mut records)) = rx.recv() {
        let deadline = Instant::now() + window;
        let mut open = true;
        loop {
            match rx.recv_deadline(deadline) {
                Ok(Feed::Records(more)) => records.extend(more),
                Err(RecvTimeoutError::Timeout) => break,
                Ok(Feed::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    open = false;
                    break;
                }
            }
        }
        tracing::trace!(session = %context, records = records.len(), "Latency window closed");
        if !run_loop.post(RawBatch { context, records }) || !open {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::run_loop::RunLoop;
    use crate::taxonomy::RawFlags;
    use smallvec::smallvec;

    fn records(path: &str) -> Records {
        smallvec![RawRecord::new(path, RawFlags::ITEM_CREATED)]
    }

    fn paths(batch: &RawBatch) -> Vec<String> {
        batch
            .records
            .iter()
            .filter_map(|r| r.path.as_ref().map(|p| p.display().to_string()))
            .collect()
    }

    #[test]
    fn test_records_inside_one_window_form_one_batch() {
        let (run_loop, handle) = RunLoop::new();
        let session = SessionHandle::from_raw(3);
        let mut coalescer =
            Coalescer::spawn(Duration::from_secs(30), session, handle.clone()).expect("spawn");

        let sender = coalescer.sender();
        assert!(sender.send(records("/w/a")));
        assert!(sender.send(records("/w/b")));
        assert!(sender.send(records("/w/c")));
        coalescer.shutdown();
        handle.stop();

        let mut batches = Vec::new();
        run_loop.run(|batch| batches.push(batch));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].context, session);
        assert_eq!(paths(&batches[0]), vec!["/w/a", "/w/b", "/w/c"]);
        assert!(!sender.send(records("/w/late")));
    }

    #[test]
    fn test_separate_windows_form_separate_batches() {
        let (run_loop, handle) = RunLoop::new();
        let mut coalescer = Coalescer::spawn(
            Duration::from_millis(20),
            SessionHandle::from_raw(1),
            handle.clone(),
        )
        .expect("spawn");

        let sender = coalescer.sender();
        assert!(sender.send(records("/w/a")));
        thread::sleep(Duration::from_millis(300));
        assert!(sender.send(records("/w/b")));
        coalescer.shutdown();
        handle.stop();

        let mut batches = Vec::new();
        run_loop.run(|batch| batches.push(paths(&batch)));
        assert_eq!(batches, vec![vec!["/w/a"], vec!["/w/b"]]);
    }

    #[test]
    fn test_batch_waits_for_the_window() {
        let (run_loop, handle) = RunLoop::new();
        let window = Duration::from_millis(150);
        let coalescer =
            Coalescer::spawn(window, SessionHandle::from_raw(1), handle.clone()).expect("spawn");

        let sent_at = Instant::now();
        assert!(coalescer.sender().send(records("/w/a")));
        let mut waited = None;
        run_loop.run(|_| {
            waited = Some(sent_at.elapsed());
            handle.stop();
        });
        assert!(waited.expect("batch delivered") >= window);
    }
}
