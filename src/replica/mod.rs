//! Replica endpoints
//!
//! The crawler drives both sides of a session through the same trait:
//! - `LocalReplica`: a directory tree on the local filesystem
//! - `MockReplica`: in-memory endpoint for testing (in tests module)
//!
//! Master-side calls are the probes (`xtime`, `entries`, `lstat`,
//! volume-info queries); slave-side calls are the mutations (`mkdir`,
//! `symlink`, `purge`, `setattr`, `set_xtime`, `rsync`, `keep_alive`).
//! A transport-backed endpoint would implement the same trait.

mod local;

pub use local::LocalReplica;

#[cfg(test)]
pub mod mock;

#[cfg(test)]
pub use mock::MockReplica;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::volinfo::VolInfo;
use crate::xtime::{Xtime, XtimeResult};

/// What a directory entry is, as far as replication cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    /// Fifos, sockets and device nodes; never replicated
    Other,
}

/// The slice of `lstat` the crawler consumes.
#[derive(Debug, Clone, Copy)]
pub struct EntryInfo {
    pub kind: FileKind,
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// Attribute adjustments applied to a slave path alongside its mark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetAttrs {
    /// `(uid, gid)` to hand the path to
    pub owner: Option<(u32, u32)>,
    /// Permission bits
    pub mode: Option<u32>,
}

/// One endpoint of a replication session.
///
/// Paths are relative to the endpoint's root, `.` denoting the root itself.
pub trait Replica: Send + Sync {
    /// Verify the endpoint is usable, creating the root when this is the
    /// receiving side.
    fn connect(&self) -> Result<()>;

    /// Read the xtime of `path` for volume `uuid`.
    fn xtime(&self, path: &Path, uuid: &str) -> XtimeResult;

    /// Write the xtime of `path` for volume `uuid`.
    fn set_xtime(&self, path: &Path, uuid: &str, xt: Xtime) -> io::Result<()>;

    /// Directory listing, excluding `.` and `..`.
    fn entries(&self, path: &Path) -> io::Result<Vec<OsString>>;

    /// File type and ownership of `path`, symlinks not followed.
    fn lstat(&self, path: &Path) -> io::Result<EntryInfo>;

    /// Target of the symlink at `path`.
    fn readlink(&self, path: &Path) -> io::Result<PathBuf>;

    /// Create the directory `path`. Succeeds if it already exists.
    fn mkdir(&self, path: &Path) -> io::Result<()>;

    /// Plant a symlink to `target` at `path`, replacing whatever is there.
    fn symlink(&self, target: &Path, path: &Path) -> io::Result<()>;

    /// Remove the tree at `path`, or just the named children of it.
    fn purge(&self, path: &Path, names: Option<&[OsString]>) -> io::Result<()>;

    /// Apply ownership/mode adjustments to `path`.
    fn setattr(&self, path: &Path, attrs: &SetAttrs) -> io::Result<()>;

    /// Bulk-transfer a batch of regular files onto this endpoint. Returns
    /// whether the whole batch landed.
    fn rsync(&self, batch: &[PathBuf]) -> bool;

    /// Announce liveness (and our identity, once established) to this
    /// endpoint.
    fn keep_alive(&self, vi: Option<&VolInfo>);

    /// Volume records of upstream masters feeding this endpoint, if any.
    fn foreign_volume_infos(&self) -> Result<Vec<VolInfo>>;

    /// This endpoint's own volume record.
    fn native_volume_info(&self) -> Result<Option<VolInfo>>;
}
