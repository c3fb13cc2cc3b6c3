//! Cross-platform watch sessions with a canonical change-event stream.
//!
//! A watch session observes a set of root directories through the
//! operating system's change-notification API, classifies every raw
//! notification into one of five [`EventKind`]s, and delivers the result to
//! a host-supplied [`CallbackSink`] from a dedicated background thread.
//!
//! # Architecture
//!
//! ```text
//!  caller thread                        background thread (one per session)
//! ┌──────────────────────┐             ┌──────────────────────────────────────┐
//! │ Engine::start        │  spawn +    │ RunLoop::new                         │
//! │  RootPathSet         │  NativeSrc  │ NativeSource::schedule ──► OS stream │
//! │  NativeSource::open  │ ──────────► │ publish RunLoopHandle ───┐           │
//! │  wait for handle  ◄──┼─────────────┼──────────────────────────┘           │
//! │                      │             │ RunLoop::run                         │
//! │                      │             │   RawBatch ─► classify ─► Dispatcher │
//! │ Engine::stop         │   Stop      │                      │               │
//! │  RunLoopHandle::stop │ ──────────► │ loop returns         ▼               │
//! │  join ◄──────────────┼─────────────┼── NativeSource   CallbackSink        │
//! │  close source        │             └──────────────────────────────────────┘
//! │  release sink        │
//! └──────────────────────┘
//! ```
//!
//! Native sources never hold a pointer to their session: they carry the
//! session's [`SessionHandle`], and the dispatcher resolves it through the
//! engine's session arena.
//!
//! # Crate Dependencies
//!
//! ```text
//! fsn-cli ──► fsn-watcher ──► fsn-core
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use fsn_watcher::{ChannelSink, Engine, EventKind};
//!
//! # async fn run() -> Result<(), fsn_watcher::WatchError> {
//! let engine = Engine::new();
//! let (sink, mut events) = ChannelSink::channel();
//! let session = engine.start(["/srv/project"], Duration::from_millis(50), sink)?;
//!
//! while let Some(event) = events.recv().await {
//!     if event.kind == EventKind::Invalidate {
//!         // Rescan everything under the watched roots.
//!     }
//! }
//!
//! engine.stop(session)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! [`Engine`] is `Send + Sync`. Sinks are called only from the session's
//! background thread, one event at a time, in the order the native source
//! reported them.

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod backend;
mod coalesce;
mod dispatch;
pub mod error;
pub mod events;
pub mod guard;
pub mod native;
pub mod registry;
pub mod roots;
pub mod run_loop;
pub mod session;
pub mod sink;
pub mod taxonomy;

#[cfg(test)]
mod testing;

pub use backend::{NotifyBackend, NotifyStream};
pub use error::WatchError;
pub use events::{ChangeEvent, EventKind};
pub use guard::InvalidGuard;
pub use native::{NativeBackend, NativeSource, NativeStream};
pub use registry::SessionHandle;
pub use roots::RootPathSet;
pub use run_loop::{LoopExit, RawBatch, RunLoop, RunLoopHandle};
pub use session::{DEFAULT_THREAD_NAME_PREFIX, Engine, SessionState};
pub use sink::{CallbackSink, ChannelSink, HostError, HostRuntime, NativeThreads, SinkError};
pub use taxonomy::{RawFlags, RawRecord, classify};
