//! In-memory replica endpoint for testing
//!
//! Stores a path -> node map and records every mutation, so tests can
//! script master/slave trees, inject failures, and assert on exactly what
//! the crawler and the sync pool did to the slave.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::Result;
use crate::replica::{EntryInfo, FileKind, Replica, SetAttrs};
use crate::volinfo::VolInfo;
use crate::xtime::{Xtime, XtimeErr, XtimeResult};

#[derive(Debug, Clone)]
struct Node {
    kind: FileKind,
    uid: u32,
    gid: u32,
    mode: u32,
    target: Option<PathBuf>,
    xtimes: HashMap<String, Xtime>,
}

impl Node {
    fn new(kind: FileKind) -> Self {
        Self {
            kind,
            uid: 0,
            gid: 0,
            mode: match kind {
                FileKind::Directory => 0o40755,
                FileKind::Symlink => 0o120777,
                _ => 0o100644,
            },
            target: None,
            xtimes: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct Inner {
    nodes: HashMap<PathBuf, Node>,
    foreign: Vec<VolInfo>,
    native: Option<VolInfo>,
    rsync_results: VecDeque<bool>,
    rsync_batches: Vec<Vec<PathBuf>>,
    keep_alives: Vec<Option<VolInfo>>,
    purges: Vec<(PathBuf, Option<Vec<OsString>>)>,
    mkdirs: Vec<PathBuf>,
    symlinks: Vec<(PathBuf, PathBuf)>,
    setattrs: Vec<(PathBuf, SetAttrs)>,
    fail_entries_once: HashSet<PathBuf>,
}

/// In-memory replica endpoint.
#[derive(Clone)]
pub struct MockReplica {
    inner: Arc<Mutex<Inner>>,
}

impl MockReplica {
    pub fn new() -> Self {
        let mock = Self {
            inner: Arc::new(Mutex::new(Inner::default())),
        };
        mock.add_dir(".");
        mock
    }

    pub fn add_dir(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(path.into(), Node::new(FileKind::Directory));
    }

    pub fn add_file(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .insert(path.into(), Node::new(FileKind::Regular));
    }

    pub fn add_symlink(&self, path: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        let mut node = Node::new(FileKind::Symlink);
        node.target = Some(target.into());
        self.inner.lock().unwrap().nodes.insert(path.into(), node);
    }

    pub fn stamp(&self, path: impl Into<PathBuf>, uuid: &str, xt: Xtime) {
        let mut inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .entry(path.into())
            .or_insert_with(|| Node::new(FileKind::Regular));
        node.xtimes.insert(uuid.to_string(), xt);
    }

    pub fn set_native(&self, vi: Option<VolInfo>) {
        self.inner.lock().unwrap().native = vi;
    }

    pub fn set_foreign(&self, vis: Vec<VolInfo>) {
        self.inner.lock().unwrap().foreign = vis;
    }

    /// Queue the outcome of the next rsync batches (defaults to success).
    pub fn script_rsync(&self, results: &[bool]) {
        self.inner
            .lock()
            .unwrap()
            .rsync_results
            .extend(results.iter().copied());
    }

    /// Make the next `entries` call on `path` fail.
    pub fn fail_entries_once(&self, path: impl Into<PathBuf>) {
        self.inner
            .lock()
            .unwrap()
            .fail_entries_once
            .insert(path.into());
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.inner.lock().unwrap().nodes.contains_key(path)
    }

    pub fn xtime_of(&self, path: &Path, uuid: &str) -> Option<Xtime> {
        self.inner
            .lock()
            .unwrap()
            .nodes
            .get(path)
            .and_then(|n| n.xtimes.get(uuid))
            .copied()
    }

    pub fn rsync_batches(&self) -> Vec<Vec<PathBuf>> {
        self.inner.lock().unwrap().rsync_batches.clone()
    }

    pub fn purges(&self) -> Vec<(PathBuf, Option<Vec<OsString>>)> {
        self.inner.lock().unwrap().purges.clone()
    }

    pub fn mkdirs(&self) -> Vec<PathBuf> {
        self.inner.lock().unwrap().mkdirs.clone()
    }

    pub fn symlinks(&self) -> Vec<(PathBuf, PathBuf)> {
        self.inner.lock().unwrap().symlinks.clone()
    }

    pub fn keep_alives(&self) -> Vec<Option<VolInfo>> {
        self.inner.lock().unwrap().keep_alives.clone()
    }

    fn remove_subtree(inner: &mut Inner, path: &Path) {
        inner
            .nodes
            .retain(|p, _| !(p == path || p.starts_with(path)));
    }
}

impl Default for MockReplica {
    fn default() -> Self {
        Self::new()
    }
}

impl Replica for MockReplica {
    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn xtime(&self, path: &Path, uuid: &str) -> XtimeResult {
        let inner = self.inner.lock().unwrap();
        let node = inner.nodes.get(path).ok_or(XtimeErr::NotFound)?;
        node.xtimes.get(uuid).copied().ok_or(XtimeErr::NoData)
    }

    fn set_xtime(&self, path: &Path, uuid: &str, xt: Xtime) -> io::Result<()> {
        self.stamp(path.to_path_buf(), uuid, xt);
        Ok(())
    }

    fn entries(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_entries_once.remove(path) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "scripted failure"));
        }
        match inner.nodes.get(path) {
            Some(n) if n.kind == FileKind::Directory => {}
            Some(_) => return Err(io::Error::from_raw_os_error(libc::ENOTDIR)),
            None => return Err(io::Error::new(io::ErrorKind::NotFound, "no such node")),
        }
        let mut names: Vec<OsString> = inner
            .nodes
            .keys()
            .filter(|p| p.parent() == Some(path))
            .filter_map(|p| p.file_name().map(OsString::from))
            .collect();
        names.sort();
        Ok(names)
    }

    fn lstat(&self, path: &Path) -> io::Result<EntryInfo> {
        let inner = self.inner.lock().unwrap();
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such node"))?;
        Ok(EntryInfo {
            kind: node.kind,
            uid: node.uid,
            gid: node.gid,
            mode: node.mode,
        })
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        let inner = self.inner.lock().unwrap();
        inner
            .nodes
            .get(path)
            .and_then(|n| n.target.clone())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "not a symlink"))
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mkdirs.push(path.to_path_buf());
        inner
            .nodes
            .entry(path.to_path_buf())
            .or_insert_with(|| Node::new(FileKind::Directory));
        Ok(())
    }

    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .symlinks
            .push((path.to_path_buf(), target.to_path_buf()));
        let mut node = Node::new(FileKind::Symlink);
        node.target = Some(target.to_path_buf());
        inner.nodes.insert(path.to_path_buf(), node);
        Ok(())
    }

    fn purge(&self, path: &Path, names: Option<&[OsString]>) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .purges
            .push((path.to_path_buf(), names.map(|n| n.to_vec())));
        match names {
            None => Self::remove_subtree(&mut inner, path),
            Some(names) => {
                for name in names {
                    let child = path.join(name);
                    Self::remove_subtree(&mut inner, &child);
                }
            }
        }
        Ok(())
    }

    fn setattr(&self, path: &Path, attrs: &SetAttrs) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.setattrs.push((path.to_path_buf(), *attrs));
        if let Some(node) = inner.nodes.get_mut(path) {
            if let Some((uid, gid)) = attrs.owner {
                node.uid = uid;
                node.gid = gid;
            }
            if let Some(mode) = attrs.mode {
                node.mode = mode;
            }
        }
        Ok(())
    }

    fn rsync(&self, batch: &[PathBuf]) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.rsync_batches.push(batch.to_vec());
        let ok = inner.rsync_results.pop_front().unwrap_or(true);
        if ok {
            for path in batch {
                inner
                    .nodes
                    .entry(path.clone())
                    .or_insert_with(|| Node::new(FileKind::Regular));
            }
        }
        ok
    }

    fn keep_alive(&self, vi: Option<&VolInfo>) {
        self.inner.lock().unwrap().keep_alives.push(vi.cloned());
    }

    fn foreign_volume_infos(&self) -> Result<Vec<VolInfo>> {
        Ok(self.inner.lock().unwrap().foreign.clone())
    }

    fn native_volume_info(&self) -> Result<Option<VolInfo>> {
        Ok(self.inner.lock().unwrap().native.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entries_and_tree_shape() {
        let mock = MockReplica::new();
        mock.add_file("./a");
        mock.add_dir("./d");
        mock.add_file("./d/inner");

        let names = mock.entries(Path::new(".")).unwrap();
        assert_eq!(names, vec![OsString::from("a"), OsString::from("d")]);
        let names = mock.entries(Path::new("./d")).unwrap();
        assert_eq!(names, vec![OsString::from("inner")]);
    }

    #[test]
    fn test_purge_names_removes_subtrees() {
        let mock = MockReplica::new();
        mock.add_dir("./d");
        mock.add_file("./d/x");
        mock.purge(Path::new("."), Some(&[OsString::from("d")]))
            .unwrap();
        assert!(!mock.contains(Path::new("./d")));
        assert!(!mock.contains(Path::new("./d/x")));
    }

    #[test]
    fn test_scripted_rsync_results() {
        let mock = MockReplica::new();
        mock.script_rsync(&[false, true]);
        assert!(!mock.rsync(&[PathBuf::from("./a")]));
        assert!(mock.rsync(&[PathBuf::from("./a")]));
        // default is success
        assert!(mock.rsync(&[PathBuf::from("./b")]));
        assert_eq!(mock.rsync_batches().len(), 3);
    }

    #[test]
    fn test_entries_failure_fires_once() {
        let mock = MockReplica::new();
        mock.fail_entries_once(".");
        assert!(mock.entries(Path::new(".")).is_err());
        assert!(mock.entries(Path::new(".")).is_ok());
    }
}
