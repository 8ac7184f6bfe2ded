/*!
 * Tidemark - one-way filesystem replication daemon
 *
 * Continuously mirrors a master directory tree onto a slave tree. Change
 * detection rides on per-directory extended-attribute timestamps
 * ("xtimes"): a subtree is descended into only when its master-side xtime
 * is ahead of the slave-side one, and the slave-side mark is advanced only
 * after everything underneath has replicated.
 *
 * The moving parts:
 * - an incremental crawler walking the xtime gradient,
 * - a pool of sync workers batching file transfers,
 * - a volume-info state machine guarding against master identity flips,
 * - a supervisor keeping the worker process alive.
 */

pub mod config;
pub mod core;
pub mod error;
pub mod logging;
pub mod monitor;
pub mod replica;
pub mod volinfo;
pub mod worker;
pub mod xattr;
pub mod xtime;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigFile, LogLevel};
pub use crate::core::{Crawler, PostBox, Syncer};
pub use error::{Result, TidemarkError};
pub use monitor::{Monitor, MonitorState};
pub use replica::{LocalReplica, Replica, SetAttrs};
pub use volinfo::{Slot, VolInfo, VolinfoState};
pub use xtime::{Xtime, XtimeErr};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
