//! The immutable set of root paths watched by one session.

use std::path::PathBuf;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::WatchError;

/// An ordered, non-empty list of root paths.
///
/// Built once when a session starts and never modified afterwards.
///
/// # Examples
///
/// ```
/// use fsn_watcher::{RootPathSet, WatchError};
///
/// let roots = RootPathSet::new(["/srv/a", "/srv/b"])?;
/// assert_eq!(roots.len(), 2);
///
/// let empty: [&str; 0] = [];
/// assert!(matches!(RootPathSet::new(empty), Err(WatchError::NoRoots)));
/// # Ok::<(), WatchError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootPathSet {
    roots: Vec<Utf8PathBuf>,
}

impl RootPathSet {
    /// Collects and validates the roots of a watch request.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::NoRoots`] if no root is given and
    /// [`WatchError::NonUtf8Path`] for a root that is not valid UTF-8.
    pub fn new<I, P>(roots: I) -> Result<Self, WatchError>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let roots = roots
            .into_iter()
            .map(|root| {
                Utf8PathBuf::from_path_buf(root.into()).map_err(WatchError::NonUtf8Path)
            })
            .collect::<Result<Vec<_>, _>>()?;
        if roots.is_empty() {
            return Err(WatchError::NoRoots);
        }
        Ok(Self { roots })
    }

    /// Returns the number of roots.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Always `false` for a constructed set.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Returns the roots in registration order.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Iterates over the roots in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Utf8Path> {
        self.roots.iter().map(Utf8PathBuf::as_path)
    }
}

impl<'a> IntoIterator for &'a RootPathSet {
    type Item = &'a Utf8PathBuf;
    type IntoIter = std::slice::Iter<'a, Utf8PathBuf>;

    fn into_iter(self) -> Self::IntoIter {
        self.roots.iter()
    }
}
