//! Native backend built on the `notify` crate.
//!
//! `notify`'s [`RecommendedWatcher`] picks the platform API (FSEvents on
//! macOS, inotify on Linux, `ReadDirectoryChangesW` on Windows). Its events
//! are translated back into [`RawFlags`] records so every platform goes
//! through the same [`classify`](crate::classify) precedence.
//!
//! notify reports each change as it happens. With a non-zero latency the
//! records pass through a coalescing window first, so the run loop sees one
//! batch per window instead of one per change. Kinds and order are kept.
//!
//! # Translation
//!
//! | notify event                       | raw flags                          |
//! |------------------------------------|------------------------------------|
//! | any event flagged for rescan       | `MUST_SCAN_SUB_DIRS`               |
//! | `Create(_)`                        | `ITEM_CREATED`                     |
//! | `Remove(_)`                        | `ITEM_REMOVED`                     |
//! | `Modify(Name(From))`               | `ITEM_REMOVED`                     |
//! | `Modify(Name(To))`                 | `ITEM_RENAMED`                     |
//! | `Modify(Name(Any \| Other))`       | `ITEM_RENAMED` if the path exists, else `ITEM_REMOVED` |
//! | `Modify(Name(Both))`               | nothing, its halves arrive as `From`/`To` |
//! | `Modify(Metadata(_))`              | metadata flags                     |
//! | `Modify(_)`                        | `ITEM_MODIFIED`                    |
//! | `Access(_)`                        | nothing                            |
//! | `Any`, `Other`                     | empty (classifies as `Unknown`)    |

use std::path::{Path, PathBuf};
use std::time::Duration;

use camino::Utf8Path;
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind as NotifyKind, RecommendedWatcher, RecursiveMode, Watcher};
use smallvec::SmallVec;

use crate::coalesce::{CoalesceSender, Coalescer, Records};
use crate::error::WatchError;
use crate::native::{NativeBackend, NativeStream};
use crate::registry::SessionHandle;
use crate::run_loop::{RawBatch, RunLoopHandle};
use crate::taxonomy::{RawFlags, RawRecord};

/// The default backend: `notify`'s recommended watcher, watching recursively.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyBackend;

impl NativeBackend for NotifyBackend {
    type Path = PathBuf;
    type Stream = NotifyStream;

    fn encode_path(&self, root: &Utf8Path) -> Result<PathBuf, WatchError> {
        if !root.exists() {
            return Err(WatchError::path_not_found(root));
        }
        Ok(root.as_std_path().canonicalize()?)
    }

    fn create_stream(
        &self,
        roots: &[PathBuf],
        latency: Duration,
        context: SessionHandle,
    ) -> Result<NotifyStream, WatchError> {
        Ok(NotifyStream {
            roots: roots.to_vec(),
            latency,
            context,
            watcher: None,
            coalescer: None,
        })
    }
}

/// A `notify` watcher over a fixed set of roots.
pub struct NotifyStream {
    roots: Vec<PathBuf>,
    latency: Duration,
    context: SessionHandle,
    watcher: Option<RecommendedWatcher>,
    coalescer: Option<Coalescer>,
}

impl std::fmt::Debug for NotifyStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotifyStream")
            .field("roots", &self.roots)
            .field("context", &self.context)
            .field("latency", &self.latency)
            .field("running", &self.watcher.is_some())
            .finish_non_exhaustive()
    }
}

impl NativeStream for NotifyStream {
    fn schedule(&mut self, run_loop: &RunLoopHandle) -> Result<(), WatchError> {
        let context = self.context;
        let forward = if self.latency.is_zero() {
            Forward::Direct(run_loop.clone())
        } else {
            let coalescer = Coalescer::spawn(self.latency, context, run_loop.clone())?;
            let sender = coalescer.sender();
            self.coalescer = Some(coalescer);
            Forward::Window(sender)
        };

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let records = translate(&event);
                    if records.is_empty() {
                        tracing::trace!(kind = ?event.kind, "Ignoring non-change notification");
                        return;
                    }
                    if !forward.send(context, records) {
                        tracing::trace!(session = %context, "Run loop gone, dropping notification");
                    }
                }
                Err(error) => {
                    tracing::warn!(session = %context, error = %error, "Native watcher error");
                }
            },
            notify::Config::default(),
        )?;

        for root in &self.roots {
            watcher.watch(root, RecursiveMode::Recursive)?;
        }
        tracing::info!(
            session = %self.context,
            roots = self.roots.len(),
            latency_ms = self.latency.as_millis(),
            "Native stream started"
        );
        self.watcher = Some(watcher);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), WatchError> {
        let mut first_error = None;
        if let Some(mut watcher) = self.watcher.take() {
            for root in &self.roots {
                if let Err(error) = watcher.unwatch(root) {
                    // A root deleted while watched is already gone from the OS side.
                    tracing::debug!(root = %root.display(), error = %error, "Failed to unwatch root");
                    first_error.get_or_insert(error);
                }
            }
        }
        if let Some(mut coalescer) = self.coalescer.take() {
            coalescer.shutdown();
        }
        match first_error {
            Some(error) if !matches!(error.kind, notify::ErrorKind::WatchNotFound) => {
                Err(error.into())
            }
            _ => Ok(()),
        }
    }
}

/// Where the watcher callback sends translated records.
enum Forward {
    Direct(RunLoopHandle),
    Window(CoalesceSender),
}

impl Forward {
    fn send(&self, context: SessionHandle, records: Records) -> bool {
        match self {
            Self::Direct(run_loop) => run_loop.post(RawBatch { context, records }),
            Self::Window(window) => window.send(records),
        }
    }
}

/// Translates one notify event into raw records, one per path.
pub(crate) fn translate(event: &Event) -> Records {
    let mut records = SmallVec::new();

    if event.need_rescan() {
        if event.paths.is_empty() {
            records.push(RawRecord::without_path(RawFlags::MUST_SCAN_SUB_DIRS));
        }
        for path in &event.paths {
            records.push(RawRecord::new(path.clone(), RawFlags::MUST_SCAN_SUB_DIRS));
        }
        return records;
    }

    for path in &event.paths {
        if let Some(flags) = flags_for(event.kind, path) {
            records.push(RawRecord::new(path.clone(), flags));
        }
    }
    if event.paths.is_empty() && matches!(event.kind, NotifyKind::Any | NotifyKind::Other) {
        records.push(RawRecord::without_path(RawFlags::empty()));
    }
    records
}

fn flags_for(kind: NotifyKind, path: &Path) -> Option<RawFlags> {
    let flags = match kind {
        NotifyKind::Access(_) => return None,
        NotifyKind::Create(create) => RawFlags::ITEM_CREATED | create_kind_bits(create),
        NotifyKind::Remove(remove) => RawFlags::ITEM_REMOVED | remove_kind_bits(remove),
        NotifyKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => return None,
            RenameMode::From => RawFlags::ITEM_REMOVED,
            RenameMode::To => RawFlags::ITEM_RENAMED,
            RenameMode::Any | RenameMode::Other => {
                if path.exists() {
                    RawFlags::ITEM_RENAMED
                } else {
                    RawFlags::ITEM_REMOVED
                }
            }
        },
        NotifyKind::Modify(ModifyKind::Metadata(metadata)) => match metadata {
            MetadataKind::Ownership => RawFlags::ITEM_CHANGE_OWNER,
            MetadataKind::Extended => RawFlags::ITEM_XATTR_MOD,
            _ => RawFlags::ITEM_INODE_META_MOD,
        },
        NotifyKind::Modify(_) => RawFlags::ITEM_MODIFIED,
        NotifyKind::Any | NotifyKind::Other => RawFlags::empty(),
    };
    Some(flags)
}

const fn create_kind_bits(kind: CreateKind) -> RawFlags {
    match kind {
        CreateKind::File => RawFlags::ITEM_IS_FILE,
        CreateKind::Folder => RawFlags::ITEM_IS_DIR,
        _ => RawFlags::empty(),
    }
}

const fn remove_kind_bits(kind: RemoveKind) -> RawFlags {
    match kind {
        RemoveKind::File => RawFlags::ITEM_IS_FILE,
        RemoveKind::Folder => RawFlags::ITEM_IS_DIR,
        _ => RawFlags::empty(),
    }
}
