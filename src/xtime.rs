/*!
 * Subtree modification timestamps ("xtimes")
 *
 * Every directory a master volume tracks carries a per-volume extended
 * attribute recording the last known modification of the subtree below it.
 * A subtree needs replication exactly when the master-side xtime is ahead of
 * the slave-side one, so comparing two of these values is the only decision
 * the crawler ever has to make.
 */

use std::time::{SystemTime, UNIX_EPOCH};

/// Attribute name prefix; the tracked volume's uuid is spliced in between
/// this and [`XTIME_ATTR_SUFFIX`].
pub const XTIME_ATTR_PREFIX: &str = "trusted.glusterfs.";

/// Attribute name suffix.
pub const XTIME_ATTR_SUFFIX: &str = ".xtime";

/// Build the extended-attribute name carrying the xtime of volume `uuid`.
pub fn xtime_attr_name(uuid: &str) -> String {
    format!("{}{}{}", XTIME_ATTR_PREFIX, uuid, XTIME_ATTR_SUFFIX)
}

/// A subtree timestamp: seconds and a sub-second component, ordered
/// lexicographically.
///
/// The sub-second slot holds microseconds when stamped by us; the on-disk
/// width is 32 bits either way, so readers never need to care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Xtime {
    pub sec: i64,
    pub nsec: u32,
}

impl Xtime {
    /// The unrepresentable/earliest timestamp. Compares strictly less than
    /// any timestamp that can exist on disk.
    pub const EARLIEST: Xtime = Xtime { sec: -1, nsec: 0 };

    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time, seconds plus microseconds in the sub-second
    /// slot.
    pub fn now() -> Self {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            sec: elapsed.as_secs() as i64,
            nsec: elapsed.subsec_micros(),
        }
    }

    /// Encode for xattr storage: two 32-bit big-endian integers.
    ///
    /// Only real timestamps are ever written; [`Xtime::EARLIEST`] is an
    /// in-memory sentinel and has no wire form.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&(self.sec as u32).to_be_bytes());
        buf[4..].copy_from_slice(&self.nsec.to_be_bytes());
        buf
    }

    /// Decode the xattr payload. Returns `None` for payloads of the wrong
    /// width (stale or foreign data).
    pub fn from_bytes(data: &[u8]) -> Option<Self> {
        if data.len() != 8 {
            return None;
        }
        let sec = u32::from_be_bytes(data[..4].try_into().ok()?);
        let nsec = u32::from_be_bytes(data[4..].try_into().ok()?);
        Some(Self {
            sec: sec as i64,
            nsec,
        })
    }
}

/// Errno-shaped outcome of an xtime read. Callers discriminate "attribute
/// not set" and "path missing" from everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XtimeErr {
    /// The attribute is not set on the path (ENODATA)
    NoData,
    /// The path itself does not exist (ENOENT)
    NotFound,
    /// Any other host errno
    Os(i32),
}

/// Result of reading a path's xtime.
pub type XtimeResult = std::result::Result<Xtime, XtimeErr>;

impl XtimeErr {
    /// Map a raw OS error to the discriminated form.
    pub fn from_errno(errno: i32) -> Self {
        match errno {
            libc::ENODATA => XtimeErr::NoData,
            libc::ENOENT => XtimeErr::NotFound,
            other => XtimeErr::Os(other),
        }
    }

    pub fn from_io(err: &std::io::Error) -> Self {
        Self::from_errno(err.raw_os_error().unwrap_or(0))
    }
}
