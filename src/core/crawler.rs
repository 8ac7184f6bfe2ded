/*!
 * The incremental crawler
 *
 * One turn is a recursive walk from the master root, descending only into
 * subtrees whose master-side xtime is ahead of the slave-side one. Work
 * discovered for a directory is registered as deferred jobs against that
 * directory; once every job under it has succeeded, and not before, the
 * directory's slave-side xtime is advanced to the master's. A failed job
 * leaves the old mark in place, so the next turn re-diffs the directory -
 * that re-visit is the whole recovery story.
 */

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::postbox::PostBox;
use crate::core::syncer::Syncer;
use crate::error::{Result, TidemarkError};
use crate::replica::{FileKind, Replica, SetAttrs};
use crate::volinfo::{self, Slot, VolInfo, VolinfoState};
use crate::xtime::{Xtime, XtimeErr, XtimeResult};

/// Loose rate limit between turns.
const TURN_DELAY: Duration = Duration::from_secs(1);

/// Which side of the session an xtime probe goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Master,
    Slave,
}

/// Work deferred until a directory's subtree has been fully visited.
/// Jobs run at `wait` time, in registration order.
enum Job {
    /// Placeholder recording that something under the directory failed
    /// this turn; poisons the wait so the mark is withheld.
    Fail { label: &'static str },

    /// Await the batch a regular file was submitted in, then mark the file.
    FileSync {
        path: PathBuf,
        mark: Xtime,
        postbox: Arc<PostBox>,
    },

    /// Drain a child directory's own jobs, then mark it.
    DirWait {
        path: PathBuf,
        mark: Xtime,
        attrs: SetAttrs,
    },
}

/// The crawler: owns the turn loop and the per-directory job table.
pub struct Crawler {
    master: Arc<dyn Replica>,
    slave: Arc<dyn Replica>,
    config: Config,
    syncer: Syncer,
    jobtab: HashMap<PathBuf, Vec<Job>>,
    volinfo_state: VolinfoState,
    /// The active volume record; shared with the keep-alive thread, which
    /// snapshots it before use.
    volinfo: Arc<Mutex<Option<VolInfo>>>,
    turns: u64,
    start: Option<Instant>,
    change_seen: bool,
    terminate: bool,
}

impl Crawler {
    pub fn new(master: Arc<dyn Replica>, slave: Arc<dyn Replica>, config: Config) -> Self {
        let syncer = Syncer::new(slave.clone(), config.sync_jobs);
        let volinfo_state = (
            config.volume_id.as_deref().map(VolInfo::preset),
            None,
        );
        Self {
            master,
            slave,
            config,
            syncer,
            jobtab: HashMap::new(),
            volinfo_state,
            volinfo: Arc::new(Mutex::new(None)),
            turns: 0,
            start: None,
            change_seen: false,
            terminate: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn terminated(&self) -> bool {
        self.terminate
    }

    fn uuid(&self) -> Option<String> {
        self.volinfo.lock().unwrap().as_ref().map(|vi| vi.uuid.clone())
    }

    fn volmark(&self) -> Option<Xtime> {
        self.volinfo.lock().unwrap().as_ref().map(|vi| vi.volume_mark)
    }

    /// Foreign slot held means we mirror on behalf of an upstream master.
    fn inter_master(&self) -> bool {
        self.volinfo_state.0.is_some()
    }

    /// Read the per-volume xtime of `path` on the given side.
    ///
    /// An xtime is invalid when unset or older than the volume mark. On the
    /// master of a primary session an invalid xtime is replaced by stamping
    /// the current wall clock; everywhere else the caller sees the side's
    /// default: "unset" on an intermediate master (such entries are not
    /// ours to sync), the earliest time otherwise.
    fn xtime_of(&self, path: &Path, side: Side) -> XtimeResult {
        let rsc: &dyn Replica = match side {
            Side::Master => self.master.as_ref(),
            Side::Slave => self.slave.as_ref(),
        };
        let create = side == Side::Master && !self.inter_master();
        let default: XtimeResult = if side == Side::Master && self.inter_master() {
            Err(XtimeErr::NoData)
        } else {
            Ok(Xtime::EARLIEST)
        };
        let uuid = match self.uuid() {
            Some(u) => u,
            None => return Err(XtimeErr::NoData),
        };
        let volmark = self.volmark().unwrap_or(Xtime::EARLIEST);

        match rsc.xtime(path, &uuid) {
            Ok(xt) if xt >= volmark => return Ok(xt),
            // unset, or stale leftovers from a prior incarnation
            Ok(_) | Err(XtimeErr::NoData) => {}
            Err(other) => return Err(other),
        }
        if create {
            let now = Xtime::now();
            rsc.set_xtime(path, &uuid, now)
                .map_err(|e| XtimeErr::from_io(&e))?;
            return Ok(now);
        }
        default
    }

    fn add_job(&mut self, path: &Path, job: Job) {
        self.jobtab.entry(path.to_path_buf()).or_default().push(job);
    }

    fn add_failjob(&mut self, path: &Path, label: &'static str) {
        debug!("salvaged: {}", label);
        self.add_job(path, Job::Fail { label });
    }

    /// Run `fnc`'s outcome through the mid-walk ENOENT policy: a vanished
    /// path becomes a failure job against `blame` and the walk goes on;
    /// anything else propagates.
    fn indulgently<T>(&mut self, blame: &Path, path: &Path, res: io::Result<T>) -> Result<Option<T>> {
        match res {
            Ok(v) => Ok(Some(v)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("salvaged ENOENT for {}", path.display());
                self.add_failjob(blame, "salvaged");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Advance the slave-side xtime of `path`, applying attribute
    /// adjustments first. The only place slave xtimes move.
    fn sendmark(&self, path: &Path, mark: Xtime, attrs: Option<&SetAttrs>) -> Result<()> {
        if let Some(attrs) = attrs {
            self.slave.setattr(path, attrs)?;
        }
        let uuid = self
            .uuid()
            .ok_or_else(|| TidemarkError::Replica("no active volume".to_string()))?;
        self.slave.set_xtime(path, &uuid, mark)?;
        Ok(())
    }

    /// Drain the jobs registered under `path`; if all of them succeeded,
    /// send its mark. Absent jobs count as success.
    fn wait(&mut self, path: &Path, mark: Xtime, attrs: Option<&SetAttrs>) -> Result<bool> {
        let jobs = self.jobtab.remove(path).unwrap_or_default();
        let mut succeed = true;
        for job in jobs {
            if !self.run_job(job)? {
                succeed = false;
            }
        }
        if succeed {
            self.sendmark(path, mark, attrs)?;
        }
        Ok(succeed)
    }

    fn run_job(&mut self, job: Job) -> Result<bool> {
        match job {
            Job::Fail { label } => {
                debug!("failing wait: {}", label);
                Ok(false)
            }
            Job::FileSync { path, mark, postbox } => {
                if postbox.wait() {
                    debug!("synced {}", path.display());
                    self.sendmark(&path, mark, None)?;
                    Ok(true)
                } else {
                    error!("failed to sync {}", path.display());
                    Ok(false)
                }
            }
            Job::DirWait { path, mark, attrs } => self.wait(&path, mark, Some(&attrs)),
        }
    }

    /// Fetch the master's `(foreign, native)` volume records as one
    /// observation. The two probes may race an actual volume change; the
    /// state machine tolerates single-slot transitions.
    fn get_sys_volinfo(&self) -> Result<VolinfoState> {
        let foreign = self.master.foreign_volume_infos()?;
        if foreign.len() > 1 {
            return Err(TidemarkError::MultipleForeignMasters(foreign.len()));
        }
        let native = self.master.native_volume_info()?;
        Ok((foreign.into_iter().next(), native))
    }

    /// Top-of-turn bookkeeping: rate limiting, volume-info refresh, active
    /// record selection. Returns false when there is no usable volume yet
    /// and the turn should be skipped.
    fn begin_turn(&mut self) -> Result<bool> {
        if let Some(start) = self.start.take() {
            info!("... done, took {:.6} seconds", start.elapsed().as_secs_f64());
        }
        thread::sleep(TURN_DELAY);
        self.start = Some(Instant::now());

        let volinfo_sys = self.get_sys_volinfo()?;
        let (new_state, state_change) = volinfo::step(&self.volinfo_state, &volinfo_sys)?;
        self.volinfo_state = new_state;

        let active = if self.inter_master() {
            volinfo_sys.0
        } else {
            volinfo_sys.1
        };
        *self.volinfo.lock().unwrap() = active.clone();

        match state_change {
            Some(Slot::Foreign) => {
                if let Some(uuid) = self.uuid() {
                    info!("new master is {}", uuid);
                    self.config.set_volume_id(&uuid)?;
                }
            }
            Some(Slot::Native) if !self.inter_master() => {
                if let Some(uuid) = self.uuid() {
                    info!("new master is {}", uuid);
                }
            }
            _ => {}
        }

        match active {
            Some(vi) => {
                if vi.retval != 0 {
                    return Err(TidemarkError::MasterCorrupt(vi.uuid));
                }
                info!(
                    "{} master with volume id {} ...",
                    if self.inter_master() { "intermediate" } else { "primary" },
                    vi.uuid
                );
                Ok(true)
            }
            None => {
                if let Some(fgn) = &self.volinfo_state.0 {
                    info!("waiting for being synced from {} ...", fgn.uuid);
                } else {
                    info!("waiting for volume info ...");
                }
                Ok(false)
            }
        }
    }

    /// Run one turn from the root.
    pub fn crawl(&mut self) -> Result<()> {
        if !self.begin_turn()? {
            return Ok(());
        }
        self.crawl_path(Path::new("."), None)
    }

    fn crawl_path(&mut self, path: &Path, xtl: Option<Xtime>) -> Result<()> {
        let is_root = path == Path::new(".");
        debug!("entering {}", path.display());

        let xtl = match xtl {
            Some(xt) => xt,
            None => match self.xtime_of(path, Side::Master) {
                Ok(xt) => xt,
                Err(_) => {
                    self.add_failjob(path, "no-local-node");
                    return Ok(());
                }
            },
        };

        let xtr = match self.xtime_of(path, Side::Slave) {
            Err(e) => {
                if e != XtimeErr::NotFound {
                    // wrong-type or unstamped placeholder; clear it out
                    self.slave.purge(path, None)?;
                }
                if self.slave.mkdir(path).is_err() {
                    self.add_failjob(path, "no-remote-node");
                    return Ok(());
                }
                Xtime::EARLIEST
            }
            Ok(xtr0) => {
                if xtr0 > xtl {
                    return Err(TidemarkError::TimestampCorruption(path.to_path_buf()));
                }
                if xtr0 == xtl {
                    // subtree is clean
                    if is_root && self.config.turns > 0 && self.change_seen {
                        self.turns += 1;
                        self.change_seen = false;
                        info!("finished turn #{}/{}", self.turns, self.config.turns);
                        if self.turns == self.config.turns {
                            info!("reached turn limit");
                            self.terminate = true;
                        }
                    }
                    return Ok(());
                }
                xtr0
            }
        };

        if is_root {
            self.change_seen = true;
        }

        let dem = match self.master.entries(path) {
            Ok(v) => v,
            Err(_) => {
                self.add_failjob(path, "local-entries-fail");
                return Ok(());
            }
        };
        let des = match self.slave.entries(path) {
            Ok(v) => v,
            Err(_) => {
                // one recovery attempt: replace whatever is there
                self.slave.purge(path, None)?;
                match self.slave.mkdir(path).and_then(|_| self.slave.entries(path)) {
                    Ok(v) => v,
                    Err(_) => {
                        self.add_failjob(path, "remote-entries-fail");
                        return Ok(());
                    }
                }
            }
        };

        let dd: Vec<_> = des.iter().filter(|n| !dem.contains(n)).cloned().collect();
        if !dd.is_empty() {
            self.slave.purge(path, Some(&dd))?;
        }

        let mut chld: Vec<(PathBuf, Xtime)> = Vec::new();
        for name in &dem {
            let e_full = path.join(name);
            match self.xtime_of(&e_full, Side::Master) {
                Err(err) => warn!("irregular xtime for {}: {:?}", e_full.display(), err),
                Ok(xte) => {
                    if xte > xtr {
                        chld.push((e_full, xte));
                    }
                }
            }
        }

        for (e, xte) in chld {
            let res = self.master.lstat(&e);
            let st = match self.indulgently(path, &e, res)? {
                Some(st) => st,
                None => continue,
            };
            let owner = Some((st.uid, st.gid));
            match st.kind {
                FileKind::Symlink => {
                    let res = self.master.readlink(&e);
                    let target = match self.indulgently(path, &e, res)? {
                        Some(t) => t,
                        None => continue,
                    };
                    let res = self.slave.symlink(&target, &e);
                    if self.indulgently(path, &e, res)?.is_none() {
                        continue;
                    }
                    self.sendmark(&e, xte, Some(&SetAttrs { owner, mode: None }))?;
                }
                FileKind::Regular => {
                    debug!("syncing {} ...", e.display());
                    let postbox = self.syncer.add(e.clone());
                    self.add_job(
                        path,
                        Job::FileSync {
                            path: e,
                            mark: xte,
                            postbox,
                        },
                    );
                }
                FileKind::Directory => {
                    let attrs = SetAttrs {
                        owner,
                        mode: Some(st.mode),
                    };
                    self.add_job(
                        path,
                        Job::DirWait {
                            path: e.clone(),
                            mark: xte,
                            attrs,
                        },
                    );
                    self.crawl_path(&e, Some(xte))?;
                }
                FileKind::Other => {
                    // fifos, sockets and special files are not replicated
                }
            }
        }

        if is_root {
            self.wait(path, xtl, None)?;
        }
        Ok(())
    }

    /// Announce ourselves to the slave on a timer. The payload is a private
    /// snapshot of the active volume record with a fresh liveness deadline.
    fn start_keep_alive(&self) {
        let timeout = self.config.timeout;
        if timeout == 0 {
            return;
        }
        let slave = self.slave.clone();
        let volinfo = self.volinfo.clone();
        thread::Builder::new()
            .name("keep-alive".to_string())
            .spawn(move || loop {
                let mut gap = timeout as f64 * 0.5;
                let vi = volinfo.lock().unwrap().clone();
                let vi = match vi {
                    Some(mut vi) => {
                        let now = SystemTime::now()
                            .duration_since(UNIX_EPOCH)
                            .unwrap_or_default()
                            .as_secs() as i64;
                        vi.timeout = Some(now + timeout as i64);
                        Some(vi)
                    }
                    None => {
                        // announce promptly once a volume establishes
                        gap = gap.min(10.0);
                        None
                    }
                };
                slave.keep_alive(vi.as_ref());
                thread::sleep(Duration::from_secs_f64(gap));
            })
            .expect("failed to spawn keep-alive thread");
    }

    /// Crawl until the turn limit asks us to stop.
    pub fn crawl_loop(&mut self) -> Result<()> {
        self.start_keep_alive();
        while !self.terminate {
            self.crawl()?;
        }
        Ok(())
    }
}
