//! Canonical change events delivered to the callback sink.
//!
//! Every native notification, whatever the platform, is reduced to one
//! [`ChangeEvent`]: an [`EventKind`] plus the path it concerns.
//!
//! # Event Flow
//!
//! ```text
//! native source record (flags, path)
//!        │
//!        ▼
//!   taxonomy::classify
//!        │
//!        ▼
//!   ChangeEvent { kind, path }
//!        │
//!        ▼
//!   CallbackSink::path_changed
//! ```

use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// The kind of a canonical change event.
///
/// The discriminants are the stable codes exchanged with embedding hosts.
///
/// # Examples
///
/// ```
/// use fsn_watcher::EventKind;
///
/// assert_eq!(EventKind::Invalidate.code(), 3);
/// assert_eq!(EventKind::from_code(1), Some(EventKind::Removed));
/// assert_eq!(EventKind::from_code(42), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(i32)]
pub enum EventKind {
    /// A path appeared.
    Created = 0,
    /// A path went away.
    Removed = 1,
    /// A path's contents or metadata changed.
    Modified = 2,
    /// Tracking was lost somewhere under a watched root.
    ///
    /// The affected subtree must be treated as stale and rescanned.
    Invalidate = 3,
    /// The native source reported something not recognized.
    Unknown = 4,
}

impl EventKind {
    /// All kinds, in code order.
    pub const ALL: [Self; 5] = [
        Self::Created,
        Self::Removed,
        Self::Modified,
        Self::Invalidate,
        Self::Unknown,
    ];

    /// Returns the host wire code for this kind.
    #[inline]
    #[must_use]
    pub const fn code(self) -> i32 {
        self as i32
    }

    /// Looks up a kind by its host wire code.
    #[must_use]
    pub const fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Removed),
            2 => Some(Self::Modified),
            3 => Some(Self::Invalidate),
            4 => Some(Self::Unknown),
            _ => None,
        }
    }

    /// Returns the lowercase name used in logs and serialized output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Removed => "removed",
            Self::Modified => "modified",
            Self::Invalidate => "invalidate",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` if the receiver must rescan instead of trusting the path.
    #[inline]
    #[must_use]
    pub const fn requires_rescan(self) -> bool {
        matches!(self, Self::Invalidate)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical change event.
///
/// The path is absent when the native source could not attribute the change
/// to a path, which only happens for [`EventKind::Invalidate`] in practice.
///
/// # Examples
///
/// ```
/// use fsn_watcher::{ChangeEvent, EventKind};
///
/// let event = ChangeEvent::new(EventKind::Created, "/srv/data/new.txt");
/// assert_eq!(event.to_string(), "created /srv/data/new.txt");
///
/// let rescan = ChangeEvent::without_path(EventKind::Invalidate);
/// assert!(rescan.path().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// What happened.
    pub kind: EventKind,

    /// Where it happened, if known.
    pub path: Option<Utf8PathBuf>,
}

impl ChangeEvent {
    /// Creates an event for the given path.
    #[inline]
    #[must_use]
    pub fn new(kind: EventKind, path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            kind,
            path: Some(path.into()),
        }
    }

    /// Creates an event that names no path.
    #[inline]
    #[must_use]
    pub const fn without_path(kind: EventKind) -> Self {
        Self { kind, path: None }
    }

    /// Returns the path, if any.
    #[inline]
    #[must_use]
    pub fn path(&self) -> Option<&Utf8Path> {
        self.path.as_deref()
    }

    /// Returns `true` if the event concerns `root` or something beneath it.
    ///
    /// Events without a path are treated as concerning every root.
    #[must_use]
    pub fn is_under(&self, root: &Utf8Path) -> bool {
        self.path().is_none_or(|path| path.starts_with(root))
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{} {path}", self.kind),
            None => write!(f, "{} <no path>", self.kind),
        }
    }
}
