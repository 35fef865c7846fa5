//! The directory diff engine.
//!
//! `EVFILT_VNODE` has no "a file was created in this directory" note; the kernel only tells us
//! `NOTE_WRITE` fired on the directory's own fd. To turn that into the `Create`/`Delete` events a
//! directory watch promises, we keep a snapshot of `(inode -> name)` for each watched directory
//! and diff it against the current listing whenever a write is observed.
//!
//! The diff is keyed by inode number, not name: every cached entry starts the pass provisionally
//! deleted, and each live entry is looked up by its inode. A hit means the entry still exists
//! (whatever it's currently named) and clears the provisional mark; a miss means a new inode
//! appeared under that name. Anything still provisionally deleted once every live entry has been
//! checked is reported as `Delete`. This is why a same-inode rename (`mv foo bar`) is a no-op
//! here: the inode is found, just under a different name, so neither a delete nor a create fires.

use std::collections::HashMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Mutex;

use crate::watch::Descriptor;

pub(crate) struct DirectoryDiffer {
    snapshots: Mutex<HashMap<Descriptor, HashMap<u64, OsString>>>,
}

impl DirectoryDiffer {
    pub(crate) fn new() -> Self {
        DirectoryDiffer {
            snapshots: Mutex::new(HashMap::new()),
        }
    }

    /// Record the current contents of `path` as the baseline for `descriptor`. Called once, at
    /// registration time, so the first diff only reports genuinely new changes.
    pub(crate) fn snapshot(&self, descriptor: Descriptor, path: &Path) -> io::Result<()> {
        let entries = list(path)?;
        self.snapshots.lock().unwrap().insert(descriptor, entries);
        Ok(())
    }

    pub(crate) fn forget(&self, descriptor: Descriptor) {
        self.snapshots.lock().unwrap().remove(&descriptor);
    }

    /// Whether `descriptor` names a directory watch, i.e. one that has a snapshot on file.
    /// Used to tell a directory's own `NOTE_DELETE` (fatal for the watch) apart from a plain
    /// file's.
    pub(crate) fn is_directory(&self, descriptor: Descriptor) -> bool {
        self.snapshots.lock().unwrap().contains_key(&descriptor)
    }

    /// Rescan `path` and return the names that appeared and disappeared since the last
    /// snapshot, updating the baseline in the same pass.
    ///
    /// Created entries carry whether they are a regular file, so the caller can decide whether
    /// to auto-add a child `Vnode` watch per the directory watch's mask (see
    /// `backend::bsd::Backend::add_child_watch`).
    pub(crate) fn diff(
        &self,
        descriptor: Descriptor,
        path: &Path,
    ) -> io::Result<(Vec<(String, bool)>, Vec<String>)> {
        let current = list(path)?;
        let mut snapshots = self.snapshots.lock().unwrap();
        let previous = snapshots.entry(descriptor).or_default();

        let mut created = Vec::new();
        let mut deleted = Vec::new();

        for (inode, name) in &current {
            if !previous.contains_key(inode) {
                created.push((name.to_string_lossy().into_owned(), is_regular_file(path, name)));
            }
        }
        for (inode, name) in previous.iter() {
            if !current.contains_key(inode) {
                deleted.push(name.to_string_lossy().into_owned());
            }
        }

        *previous = current;
        Ok((created, deleted))
    }
}

fn is_regular_file(dir: &Path, name: &OsString) -> bool {
    fs::symlink_metadata(dir.join(name))
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

fn list(path: &Path) -> io::Result<HashMap<u64, OsString>> {
    let mut entries = HashMap::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let ino = entry.metadata()?.ino();
        entries.insert(ino, entry.file_name());
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::DirectoryDiffer;

    #[test]
    fn diff_reports_a_new_regular_file_as_created() {
        let dir = tempfile::tempdir().unwrap();
        let differ = DirectoryDiffer::new();
        differ.snapshot(1024, dir.path()).unwrap();

        std::fs::write(dir.path().join("child.log"), b"hi").unwrap();

        let (created, deleted) = differ.diff(1024, dir.path()).unwrap();
        assert_eq!(created, vec![("child.log".to_string(), true)]);
        assert!(deleted.is_empty());
    }

    #[test]
    fn diff_reports_a_new_subdirectory_as_created_but_not_a_regular_file() {
        let dir = tempfile::tempdir().unwrap();
        let differ = DirectoryDiffer::new();
        differ.snapshot(1024, dir.path()).unwrap();

        std::fs::create_dir(dir.path().join("nested")).unwrap();

        let (created, _) = differ.diff(1024, dir.path()).unwrap();
        assert_eq!(created, vec![("nested".to_string(), false)]);
    }

    #[test]
    fn diff_reports_a_removed_entry_as_deleted() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("child.log"), b"hi").unwrap();

        let differ = DirectoryDiffer::new();
        differ.snapshot(1024, dir.path()).unwrap();
        std::fs::remove_file(dir.path().join("child.log")).unwrap();

        let (created, deleted) = differ.diff(1024, dir.path()).unwrap();
        assert!(created.is_empty());
        assert_eq!(deleted, vec!["child.log".to_string()]);
    }

    #[test]
    fn diff_is_a_no_op_when_nothing_changed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("child.log"), b"hi").unwrap();

        let differ = DirectoryDiffer::new();
        differ.snapshot(1024, dir.path()).unwrap();

        let (created, deleted) = differ.diff(1024, dir.path()).unwrap();
        assert!(created.is_empty());
        assert!(deleted.is_empty());
    }

    #[test]
    fn diff_is_a_no_op_when_an_entry_is_renamed_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.log"), b"hi").unwrap();

        let differ = DirectoryDiffer::new();
        differ.snapshot(1024, dir.path()).unwrap();
        std::fs::rename(dir.path().join("old.log"), dir.path().join("new.log")).unwrap();

        // The inode didn't change, so looking it up by inode finds it still present; a rename
        // alone is neither a delete nor a create.
        let (created, deleted) = differ.diff(1024, dir.path()).unwrap();
        assert!(created.is_empty());
        assert!(deleted.is_empty());
    }
}
