//! Remote directory cache with deferred invalidation.
//!
//! Mutating commands only *mark* directories; the marks are applied by
//! [`DirectoryCache::flush_pending`] once the current command is done, so a
//! listing fetched earlier in the same command stays usable until then.
//! All paths given to the cache are absolute.

use crate::ftp::path;
use crate::ftp::remote::{RemoteDirectory, RemoteFile};
use chrono::Utc;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct DirectoryCache {
    dirs: Vec<RemoteDirectory>,
    /// Paths awaiting removal, no duplicates.
    pending: Vec<String>,
    timeout: Option<Duration>,
}

impl DirectoryCache {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            dirs: Vec::new(),
            pending: Vec::new(),
            timeout,
        }
    }

    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    pub fn len(&self) -> usize {
        self.dirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.dirs.iter().map(|d| d.path.as_str())
    }

    pub fn pending(&self) -> &[String] {
        &self.pending
    }

    pub fn contains(&self, path: &str) -> bool {
        let key = path::strip_slash(path);
        self.dirs.iter().any(|d| d.path == key)
    }

    /// Store a listing, replacing any earlier one for the same path.
    pub fn insert(&mut self, dir: RemoteDirectory) {
        self.dirs.retain(|d| d.path != dir.path);
        self.dirs.push(dir);
    }

    /// Cached listing for `path`. An expired entry is still returned but
    /// gets marked for flush.
    pub fn get_directory(&mut self, path: &str) -> Option<&RemoteDirectory> {
        let key = path::strip_slash(path).to_string();
        let idx = self.dirs.iter().position(|d| d.path == key)?;
        if let Some(limit) = self.timeout {
            let age = Utc::now() - self.dirs[idx].timestamp;
            if age.to_std().map(|a| a >= limit).unwrap_or(false) {
                self.mark_for_flush(&key);
            }
        }
        self.dirs.get(idx)
    }

    /// Cached entry for the file at `path`, looked up in its directory.
    pub fn get_file(&mut self, path: &str) -> Option<&RemoteFile> {
        let dir = path::base_dir(path)?.to_string();
        let name = path::base_name(path).to_string();
        self.get_directory(&dir)?.get_file(&name)
    }

    pub fn mark_for_flush(&mut self, path: &str) {
        let key = path::strip_slash(path);
        if self.pending.iter().any(|p| p == key) {
            return;
        }
        log::trace!("marked directory '{}' for flush", key);
        self.pending.push(key.to_string());
    }

    pub fn mark_containing_for_flush(&mut self, child: &str) {
        if let Some(dir) = path::base_dir(child) {
            let dir = dir.to_string();
            self.mark_for_flush(&dir);
        }
    }

    /// Drop every marked listing and clear the marks.
    pub fn flush_pending(&mut self) {
        for key in std::mem::take(&mut self.pending) {
            let before = self.dirs.len();
            self.dirs.retain(|d| d.path != key);
            if self.dirs.len() < before {
                log::trace!("flushed directory '{}'", key);
            } else {
                log::trace!("error flushing directory '{}' (not cached)", key);
            }
        }
    }

    pub fn clear_all(&mut self) {
        self.dirs.clear();
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(path: &str, names: &[&str]) -> RemoteDirectory {
        let mut d = RemoteDirectory::new(path);
        for n in names {
            d.files.push(RemoteFile::fake(&path::join(path, n)));
        }
        d
    }

    #[test]
    fn marking_twice_flushes_once() {
        let mut c = DirectoryCache::default();
        c.insert(listing("/pub", &["a"]));
        c.mark_for_flush("/pub");
        c.mark_for_flush("/pub/");
        assert_eq!(c.pending().len(), 1);
        c.flush_pending();
        assert!(c.get_directory("/pub").is_none());
        assert!(c.pending().is_empty());
        // flushing an uncached path is harmless
        c.mark_for_flush("/nowhere");
        c.flush_pending();
        assert!(c.is_empty());
    }

    #[test]
    fn insert_replaces_same_path() {
        let mut c = DirectoryCache::default();
        c.insert(listing("/pub", &["a"]));
        c.insert(listing("/pub/", &["a", "b"]));
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_directory("/pub").unwrap().files.len(), 2);
    }

    #[test]
    fn file_lookup_goes_through_directory() {
        let mut c = DirectoryCache::default();
        c.insert(listing("/", &["etc"]));
        c.insert(listing("/pub", &["a.txt"]));
        assert_eq!(c.get_file("/pub/a.txt").unwrap().path, "/pub/a.txt");
        assert_eq!(c.get_file("/etc").unwrap().path, "/etc");
        assert!(c.get_file("/pub/missing").is_none());
        assert!(c.get_file("relative").is_none());
    }

    #[test]
    fn containing_directory_is_marked() {
        let mut c = DirectoryCache::default();
        c.mark_containing_for_flush("/pub/x");
        c.mark_containing_for_flush("/top");
        assert_eq!(c.pending(), &["/pub".to_string(), "/".to_string()]);
    }

    #[test]
    fn expired_entries_are_served_then_flushed() {
        let mut c = DirectoryCache::new(Some(Duration::from_secs(60)));
        let mut old = listing("/pub", &["a"]);
        old.timestamp = Utc::now() - chrono::Duration::seconds(120);
        c.insert(old);
        c.insert(listing("/fresh", &[]));
        assert!(c.get_directory("/pub").is_some());
        assert!(c.get_directory("/fresh").is_some());
        assert_eq!(c.pending(), &["/pub".to_string()]);
        c.flush_pending();
        assert!(!c.contains("/pub"));
        assert!(c.contains("/fresh"));
    }
}
