//! Local filesystem endpoint
//!
//! The default deployment: master and slave are both directory trees
//! reachable through the local VFS (the slave typically via a network
//! mount). Batch transfer pulls file contents straight from the master
//! tree into the slave tree.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{debug, error};

use crate::error::{Result, TidemarkError};
use crate::replica::{EntryInfo, FileKind, Replica, SetAttrs};
use crate::volinfo::VolInfo;
use crate::xattr;
use crate::xtime::{xtime_attr_name, Xtime, XtimeErr, XtimeResult};

/// A replication endpoint rooted at a local directory.
pub struct LocalReplica {
    root: PathBuf,
    /// Master tree that rsync batches are pulled from (receiving side only)
    source: Option<PathBuf>,
    /// Our own volume record (sending side only)
    native: Option<VolInfo>,
    /// Receiving side: the root is created on connect
    receiver: bool,
    last_keep_alive: Mutex<Option<VolInfo>>,
}

impl LocalReplica {
    /// The sending (master) side of a session.
    pub fn master(root: impl Into<PathBuf>, native: Option<VolInfo>) -> Self {
        Self {
            root: root.into(),
            source: None,
            native,
            receiver: false,
            last_keep_alive: Mutex::new(None),
        }
    }

    /// The receiving (slave) side of a session; `source` is the master
    /// tree that file batches are pulled from.
    pub fn slave(root: impl Into<PathBuf>, source: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            source: Some(source.into()),
            native: None,
            receiver: true,
            last_keep_alive: Mutex::new(None),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Most recent volinfo announced through `keep_alive`.
    pub fn last_keep_alive(&self) -> Option<VolInfo> {
        self.last_keep_alive.lock().unwrap().clone()
    }

    /// Anchor a session-relative path under our root. `.` maps to the root
    /// itself; only normal components are honored, so a crafted path can
    /// never escape.
    fn resolve(&self, path: &Path) -> PathBuf {
        let mut full = self.root.clone();
        for comp in path.components() {
            if let std::path::Component::Normal(c) = comp {
                full.push(c);
            }
        }
        full
    }

    fn remove_any(full: &Path) -> io::Result<()> {
        let meta = match fs::symlink_metadata(full) {
            Ok(m) => m,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            fs::remove_dir_all(full)
        } else {
            fs::remove_file(full)
        }
    }

    /// Copy one regular file, carrying permissions and ownership along.
    fn copy_entry(src: &Path, dst: &Path) -> io::Result<()> {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dst)?;
        let meta = fs::symlink_metadata(src)?;
        // ownership transfer is best effort; unprivileged runs keep
        // the copying user
        let _ = std::os::unix::fs::lchown(dst, Some(meta.uid()), Some(meta.gid()));
        Ok(())
    }
}

impl Replica for LocalReplica {
    fn connect(&self) -> Result<()> {
        if self.receiver {
            fs::create_dir_all(&self.root)?;
            return Ok(());
        }
        let meta = fs::metadata(&self.root)?;
        if !meta.is_dir() {
            return Err(TidemarkError::Replica(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn xtime(&self, path: &Path, uuid: &str) -> XtimeResult {
        let raw = xattr::lgetxattr(&self.resolve(path), &xtime_attr_name(uuid))
            .map_err(|e| XtimeErr::from_io(&e))?;
        // a malformed payload is as good as no payload
        Xtime::from_bytes(&raw).ok_or(XtimeErr::NoData)
    }

    fn set_xtime(&self, path: &Path, uuid: &str, xt: Xtime) -> io::Result<()> {
        xattr::lsetxattr(&self.resolve(path), &xtime_attr_name(uuid), &xt.to_bytes())
    }

    fn entries(&self, path: &Path) -> io::Result<Vec<OsString>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(self.resolve(path))? {
            names.push(entry?.file_name());
        }
        Ok(names)
    }

    fn lstat(&self, path: &Path) -> io::Result<EntryInfo> {
        let meta = fs::symlink_metadata(self.resolve(path))?;
        let ft = meta.file_type();
        let kind = if ft.is_symlink() {
            FileKind::Symlink
        } else if ft.is_dir() {
            FileKind::Directory
        } else if ft.is_file() {
            FileKind::Regular
        } else {
            FileKind::Other
        };
        Ok(EntryInfo {
            kind,
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
        })
    }

    fn readlink(&self, path: &Path) -> io::Result<PathBuf> {
        fs::read_link(self.resolve(path))
    }

    fn mkdir(&self, path: &Path) -> io::Result<()> {
        let full = self.resolve(path);
        match fs::create_dir(&full) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && full.is_dir() => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()> {
        let full = self.resolve(path);
        Self::remove_any(&full)?;
        std::os::unix::fs::symlink(target, &full)
    }

    fn purge(&self, path: &Path, names: Option<&[OsString]>) -> io::Result<()> {
        let full = self.resolve(path);
        match names {
            None => Self::remove_any(&full),
            Some(names) => {
                for name in names {
                    Self::remove_any(&full.join(name))?;
                }
                Ok(())
            }
        }
    }

    fn setattr(&self, path: &Path, attrs: &SetAttrs) -> io::Result<()> {
        let full = self.resolve(path);
        if let Some((uid, gid)) = attrs.owner {
            // best effort: only a privileged receiver may chown
            let _ = std::os::unix::fs::lchown(&full, Some(uid), Some(gid));
        }
        if let Some(mode) = attrs.mode {
            fs::set_permissions(&full, fs::Permissions::from_mode(mode & 0o7777))?;
        }
        Ok(())
    }

    fn rsync(&self, batch: &[PathBuf]) -> bool {
        let source = match &self.source {
            Some(s) => s.clone(),
            None => {
                error!("no transfer source configured for {}", self.root.display());
                return false;
            }
        };
        for rel in batch {
            let src = source.join(rel);
            let dst = self.resolve(rel);
            if let Err(e) = Self::copy_entry(&src, &dst) {
                error!("failed to transfer {}: {}", rel.display(), e);
                return false;
            }
            debug!("transferred {}", rel.display());
        }
        true
    }

    fn keep_alive(&self, vi: Option<&VolInfo>) {
        debug!(
            "keep-alive from {}",
            vi.map(|v| v.uuid.as_str()).unwrap_or("(unestablished)")
        );
        *self.last_keep_alive.lock().unwrap() = vi.cloned();
    }

    fn foreign_volume_infos(&self) -> Result<Vec<VolInfo>> {
        // a plain directory tree has no upstream masters feeding it
        Ok(Vec::new())
    }

    fn native_volume_info(&self) -> Result<Option<VolInfo>> {
        Ok(self.native.clone())
    }
}
