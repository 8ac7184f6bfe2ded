/*!
 * Worker bootstrap
 *
 * Builds the two replica endpoints, signals the supervisor through the
 * inherited feedback descriptor once the slave side is reachable, and
 * hands control to the crawler.
 */

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::core::Crawler;
use crate::error::Result;
use crate::replica::{LocalReplica, Replica};
use crate::volinfo::VolInfo;
use crate::xattr;
use crate::xtime::{Xtime, XtimeErr};

/// Attribute on the master root carrying the volume's own 128-bit
/// identity.
const VOLUME_ID_ATTR: &str = "trusted.glusterfs.volume-id";

/// Read the master root's identity, minting and stamping one on first use.
fn master_identity(root: &Path) -> Result<VolInfo> {
    match xattr::lgetxattr(root, VOLUME_ID_ATTR) {
        Ok(raw) if raw.len() == 16 => Ok(VolInfo::new(&hex::encode(raw), Xtime::EARLIEST)),
        Ok(raw) => Err(crate::error::TidemarkError::Replica(format!(
            "malformed volume id on {} ({} bytes)",
            root.display(),
            raw.len()
        ))),
        Err(e) if XtimeErr::from_io(&e) == XtimeErr::NoData => {
            let mut id = [0u8; 16];
            File::open("/dev/urandom")?.read_exact(&mut id)?;
            xattr::lsetxattr(root, VOLUME_ID_ATTR, &id)?;
            let uuid = hex::encode(id);
            info!("minted volume id {} for {}", uuid, root.display());
            Ok(VolInfo::new(&uuid, Xtime::EARLIEST))
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the replication worker until its turn limit stops it (or forever).
pub fn run(config: Config, feedback_fd: Option<RawFd>) -> Result<()> {
    let native = master_identity(&config.master_root)?;
    let master: Arc<dyn Replica> = Arc::new(LocalReplica::master(
        config.master_root.clone(),
        Some(native),
    ));
    let slave: Arc<dyn Replica> = Arc::new(LocalReplica::slave(
        config.slave_root.clone(),
        config.master_root.clone(),
    ));

    master.connect()?;
    slave.connect()?;

    if let Some(fd) = feedback_fd {
        // one byte tells the supervisor the slave connection stands; the
        // descriptor closes on drop
        let mut feedback = unsafe { File::from_raw_fd(fd) };
        feedback.write_all(b"\0")?;
    }

    info!(
        "mirroring {} -> {}",
        config.master_root.display(),
        config.slave_root.display()
    );
    let mut crawler = Crawler::new(master, slave, config);
    crawler.crawl_loop()
}
