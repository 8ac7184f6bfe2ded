/*!
 * Core replication machinery
 */

pub mod crawler;
pub mod postbox;
pub mod syncer;

pub use crawler::Crawler;
pub use postbox::{BoxClosed, PostBox};
pub use syncer::Syncer;
