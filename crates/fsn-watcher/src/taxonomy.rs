//! Mapping from native notification flags to canonical event kinds.
//!
//! Native sources describe a change as a set of flags, and a single record
//! frequently carries several of them at once (a file created and then
//! written inside one coalescing window shows up as `ITEM_CREATED |
//! ITEM_MODIFIED`). [`classify`] resolves such sets with a fixed precedence
//! instead of looking at how many flags are present:
//!
//! | Precedence | Flags present                         | Kind         |
//! |------------|---------------------------------------|--------------|
//! | 1          | `MUST_SCAN_SUB_DIRS`                  | `Invalidate` |
//! | 2          | `ITEM_RENAMED` + `ITEM_CREATED`       | `Removed`    |
//! | 2          | `ITEM_RENAMED`                        | `Created`    |
//! | 3          | `ITEM_MODIFIED`                       | `Modified`   |
//! | 4          | `ITEM_REMOVED`                        | `Removed`    |
//! | 5          | `ITEM_CREATED`                        | `Created`    |
//! | 6          | metadata-only flags                   | `Modified`   |
//! | 7          | anything else                         | `Unknown`    |
//!
//! Classification is pure and allocation-free, so it runs directly on the
//! background thread that services the native source.

use std::path::PathBuf;

use camino::Utf8PathBuf;

use crate::events::{ChangeEvent, EventKind};

bitflags::bitflags! {
    /// Raw flags attached to one native notification record.
    ///
    /// Bit values follow the macOS `FSEventStreamEventFlags` layout; other
    /// backends translate their payloads into the same vocabulary. Bits not
    /// named here are kept as-is and ignored by [`classify`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RawFlags: u32 {
        /// Changes under this path were coalesced; rescan the subtree.
        const MUST_SCAN_SUB_DIRS = 0x0000_0001;
        /// Events were dropped in user space.
        const USER_DROPPED = 0x0000_0002;
        /// Events were dropped in the kernel.
        const KERNEL_DROPPED = 0x0000_0004;
        /// A watched root or one of its parents changed.
        const ROOT_CHANGED = 0x0000_0020;
        /// The item was created.
        const ITEM_CREATED = 0x0000_0100;
        /// The item was removed.
        const ITEM_REMOVED = 0x0000_0200;
        /// Inode metadata changed (e.g. the file was locked or unlocked).
        const ITEM_INODE_META_MOD = 0x0000_0400;
        /// The item was renamed.
        const ITEM_RENAMED = 0x0000_0800;
        /// The item's contents changed.
        const ITEM_MODIFIED = 0x0000_1000;
        /// Finder information changed.
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        /// Ownership changed.
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        /// Extended attributes changed.
        const ITEM_XATTR_MOD = 0x0000_8000;
        /// The item is a regular file.
        const ITEM_IS_FILE = 0x0001_0000;
        /// The item is a directory.
        const ITEM_IS_DIR = 0x0002_0000;
        /// The item is a symbolic link.
        const ITEM_IS_SYMLINK = 0x0004_0000;
    }
}

impl RawFlags {
    /// Flags describing a metadata-only change.
    pub const METADATA: Self = Self::ITEM_INODE_META_MOD
        .union(Self::ITEM_FINDER_INFO_MOD)
        .union(Self::ITEM_CHANGE_OWNER)
        .union(Self::ITEM_XATTR_MOD);
}

/// One raw record from a native source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// The path the native source attributed the change to.
    pub path: Option<PathBuf>,

    /// The flags reported for that path.
    pub flags: RawFlags,
}

impl RawRecord {
    /// Creates a record for a path.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, flags: RawFlags) -> Self {
        Self {
            path: Some(path.into()),
            flags,
        }
    }

    /// Creates a record the native source could not attribute to a path.
    #[inline]
    #[must_use]
    pub const fn without_path(flags: RawFlags) -> Self {
        Self { path: None, flags }
    }
}

/// Classifies one native flag set.
///
/// Total and side-effect free: every input, including the empty set and
/// sets with unnamed bits, yields a kind.
///
/// # Examples
///
/// ```
/// use fsn_watcher::{classify, EventKind, RawFlags};
///
/// assert_eq!(classify(RawFlags::ITEM_RENAMED | RawFlags::ITEM_CREATED), EventKind::Removed);
/// assert_eq!(classify(RawFlags::ITEM_RENAMED), EventKind::Created);
/// assert_eq!(classify(RawFlags::empty()), EventKind::Unknown);
/// ```
#[must_use]
pub fn classify(flags: RawFlags) -> EventKind {
    if flags.contains(RawFlags::MUST_SCAN_SUB_DIRS) {
        EventKind::Invalidate
    } else if flags.contains(RawFlags::ITEM_RENAMED) {
        // Renamed together with created marks the name that went away.
        if flags.contains(RawFlags::ITEM_CREATED) {
            EventKind::Removed
        } else {
            EventKind::Created
        }
    } else if flags.contains(RawFlags::ITEM_MODIFIED) {
        EventKind::Modified
    } else if flags.contains(RawFlags::ITEM_REMOVED) {
        EventKind::Removed
    } else if flags.contains(RawFlags::ITEM_CREATED) {
        EventKind::Created
    } else if flags.intersects(RawFlags::METADATA) {
        EventKind::Modified
    } else {
        EventKind::Unknown
    }
}

/// Turns a raw record into the canonical event handed to the sink.
///
/// Paths that are not valid UTF-8 are converted lossily so the change is
/// still reported.
#[must_use]
pub fn canonicalize(record: RawRecord) -> ChangeEvent {
    let kind = classify(record.flags);
    let path = record.path.map(|path| match Utf8PathBuf::from_path_buf(path) {
        Ok(path) => path,
        Err(path) => {
            tracing::debug!(path = %path.display(), "Reporting non-UTF-8 path lossily");
            Utf8PathBuf::from(path.to_string_lossy().into_owned())
        }
    });
    if kind == EventKind::Unknown {
        tracing::debug!(flags = ?record.flags, path = ?path, "Unrecognized native event");
    } else {
        tracing::trace!(flags = ?record.flags, kind = %kind, "Classified native event");
    }
    ChangeEvent { kind, path }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every combination of the named flags.
    fn all_named_combinations() -> impl Iterator<Item = RawFlags> {
        let singles: Vec<RawFlags> = RawFlags::all().iter().collect();
        (0u32..(1 << singles.len())).map(move |mask| {
            singles
                .iter()
                .enumerate()
                .filter(|(bit, _)| mask & (1 << bit) != 0)
                .fold(RawFlags::empty(), |acc, (_, flag)| acc | *flag)
        })
    }

    #[test]
    fn test_rescan_wins_over_everything() {
        let mut checked = 0usize;
        for flags in all_named_combinations().filter(|f| f.contains(RawFlags::MUST_SCAN_SUB_DIRS)) {
            assert_eq!(classify(flags), EventKind::Invalidate, "flags: {flags:?}");
            checked += 1;
        }
        assert_eq!(checked, 1 << (RawFlags::all().iter().count() - 1));
    }

    #[test]
    fn test_rename_sub_cases() {
        assert_eq!(
            classify(RawFlags::ITEM_RENAMED | RawFlags::ITEM_CREATED),
            EventKind::Removed
        );
        assert_eq!(classify(RawFlags::ITEM_RENAMED), EventKind::Created);
        assert_eq!(
            classify(RawFlags::ITEM_RENAMED | RawFlags::ITEM_MODIFIED | RawFlags::ITEM_IS_FILE),
            EventKind::Created
        );
    }

    #[test]
    fn test_modified_beats_removed_and_created() {
        assert_eq!(classify(RawFlags::ITEM_MODIFIED), EventKind::Modified);
        assert_eq!(
            classify(RawFlags::ITEM_MODIFIED | RawFlags::ITEM_REMOVED | RawFlags::ITEM_CREATED),
            EventKind::Modified
        );
    }

    #[test]
    fn test_removed_beats_created() {
        assert_eq!(
            classify(RawFlags::ITEM_REMOVED | RawFlags::ITEM_CREATED),
            EventKind::Removed
        );
        assert_eq!(classify(RawFlags::ITEM_CREATED), EventKind::Created);
    }

    #[test]
    fn test_metadata_only_is_modified() {
        assert_eq!(classify(RawFlags::ITEM_INODE_META_MOD), EventKind::Modified);
        assert_eq!(classify(RawFlags::ITEM_XATTR_MOD), EventKind::Modified);
        assert_eq!(
            classify(RawFlags::ITEM_CHANGE_OWNER | RawFlags::ITEM_IS_DIR),
            EventKind::Modified
        );
    }

    #[test]
    fn test_unrecognized_is_unknown() {
        assert_eq!(classify(RawFlags::empty()), EventKind::Unknown);
        assert_eq!(classify(RawFlags::ITEM_IS_FILE), EventKind::Unknown);
        assert_eq!(classify(RawFlags::ROOT_CHANGED), EventKind::Unknown);
        assert_eq!(classify(RawFlags::from_bits_retain(0x8000_0000)), EventKind::Unknown);
    }

    #[test]
    fn test_every_combination_classifies() {
        // Totality: nothing panics and dropped-event flags alone never rescan.
        for flags in all_named_combinations() {
            let kind = classify(flags);
            if !flags.contains(RawFlags::MUST_SCAN_SUB_DIRS) {
                assert_ne!(kind, EventKind::Invalidate, "flags: {flags:?}");
            }
        }
    }

    #[test]
    fn test_canonicalize_keeps_path() {
        let event = canonicalize(RawRecord::new("/w/a.txt", RawFlags::ITEM_CREATED));
        assert_eq!(event, ChangeEvent::new(EventKind::Created, "/w/a.txt"));

        let event = canonicalize(RawRecord::without_path(RawFlags::MUST_SCAN_SUB_DIRS));
        assert_eq!(event, ChangeEvent::without_path(EventKind::Invalidate));
    }

    #[cfg(unix)]
    #[test]
    fn test_canonicalize_non_utf8_path_is_lossy() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let raw = PathBuf::from(OsStr::from_bytes(b"/w/bad\xff.txt"));
        let event = canonicalize(RawRecord::new(raw, RawFlags::ITEM_REMOVED));
        assert_eq!(event.kind, EventKind::Removed);
        assert_eq!(event.path().map(|p| p.as_str()), Some("/w/bad\u{FFFD}.txt"));
    }
}
