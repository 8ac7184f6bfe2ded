/*!
 * The supervisor
 *
 * Spawns the worker process with a feedback pipe, watches for the one-byte
 * "connected" signal within a timeout, and publishes its verdict to the
 * state file. Workers that exit 0 or 1 are restarted after a pause; any
 * other exit is beyond repair and ends supervision.
 */

use std::io;
use std::os::unix::io::RawFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::config::{write_atomic, Config};
use crate::error::{Result, TidemarkError};

/// Published supervisor verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Starting,
    Ok,
    Faulty,
    Inconsistent,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            MonitorState::Starting => "starting...",
            MonitorState::Ok => "OK",
            MonitorState::Faulty => "faulty",
            MonitorState::Inconsistent => "inconsistent",
        }
    }
}

/// Supervises one worker at a time, forever (or until the worker becomes
/// unrecoverable).
pub struct Monitor {
    state: Option<MonitorState>,
    state_file: Option<PathBuf>,
    conn_timeout: Duration,
    restart_delay: Duration,
}

impl Monitor {
    pub fn new(config: &Config) -> Self {
        Self {
            state: None,
            state_file: config.state_file.clone(),
            conn_timeout: Duration::from_secs(60),
            restart_delay: Duration::from_secs(10),
        }
    }

    /// Override the supervision timings (shortened in tests).
    pub fn with_timeouts(mut self, conn_timeout: Duration, restart_delay: Duration) -> Self {
        self.conn_timeout = conn_timeout;
        self.restart_delay = restart_delay;
        self
    }

    /// Publish a state change; repeats are swallowed.
    pub fn set_state(&mut self, state: MonitorState) -> Result<()> {
        if self.state == Some(state) {
            return Ok(());
        }
        self.state = Some(state);
        info!("new state: {}", state.as_str());
        if let Some(path) = &self.state_file {
            write_atomic(path, format!("{}\n", state.as_str()).as_bytes())?;
        }
        Ok(())
    }

    /// Supervise `worker` (program plus arguments; a `--feedback-fd` pair
    /// is appended per spawn). Returns the exit code that ended
    /// supervision.
    pub fn run(&mut self, worker: &[String]) -> Result<i32> {
        let program = worker
            .first()
            .ok_or_else(|| TidemarkError::Supervisor("empty worker command".to_string()))?;

        self.set_state(MonitorState::Starting)?;
        let mut ret = 0i32;
        while ret == 0 || ret == 1 {
            info!("starting worker");
            let (pr, pw) = pipe()?;

            let mut cmd = Command::new(program);
            cmd.args(&worker[1..])
                .arg("--feedback-fd")
                .arg(pw.to_string());
            unsafe {
                // the child has no use for the read end
                cmd.pre_exec(move || {
                    libc::close(pr);
                    Ok(())
                });
            }
            let mut child = match cmd.spawn() {
                Ok(child) => child,
                Err(e) => {
                    unsafe {
                        libc::close(pr);
                        libc::close(pw);
                    }
                    return Err(TidemarkError::Supervisor(format!(
                        "cannot spawn worker: {}",
                        e
                    )));
                }
            };
            unsafe { libc::close(pw) };

            let t0 = Instant::now();
            let readable = poll_readable(pr, self.conn_timeout)?;
            unsafe { libc::close(pr) };

            let early_exit = if readable {
                match child.try_wait()? {
                    Some(status) => {
                        debug!("worker died before establishing connection");
                        Some(exit_code(status))
                    }
                    None => {
                        debug!("worker seems to be connected");
                        self.probe_startup(&mut child, t0)?
                    }
                }
            } else {
                debug!(
                    "worker not confirmed in {} sec, aborting it",
                    self.conn_timeout.as_secs()
                );
                child.kill().ok();
                Some(exit_code(child.wait()?))
            };

            ret = match early_exit {
                None => {
                    self.set_state(MonitorState::Ok)?;
                    exit_code(child.wait()?)
                }
                Some(code) => code,
            };

            if ret == 0 || ret == 1 {
                self.set_state(MonitorState::Faulty)?;
                thread::sleep(self.restart_delay);
            }
        }
        self.set_state(MonitorState::Inconsistent)?;
        Ok(ret)
    }

    /// Keep probing for a startup-phase death until the connection window
    /// has fully elapsed.
    fn probe_startup(&self, child: &mut Child, t0: Instant) -> Result<Option<i32>> {
        while t0.elapsed() < self.conn_timeout {
            if let Some(status) = child.try_wait()? {
                debug!("worker died in startup phase");
                return Ok(Some(exit_code(status)));
            }
            thread::sleep(Duration::from_secs(1));
        }
        Ok(None)
    }
}

/// Exit code of a reaped worker; signal deaths count as restartable.
fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

fn pipe() -> io::Result<(RawFd, RawFd)> {
    let mut fds = [0 as libc::c_int; 2];
    if unsafe { libc::pipe(fds.as_mut_ptr()) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok((fds[0], fds[1]))
}

/// Wait for `fd` to become readable (data or hangup) within `timeout`.
fn poll_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    loop {
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout.as_millis() as libc::c_int) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        return Ok(ret > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()]
    }

    fn fast_monitor(state_file: Option<PathBuf>) -> Monitor {
        let config = Config {
            state_file,
            ..Default::default()
        };
        Monitor::new(&config)
            .with_timeouts(Duration::from_secs(2), Duration::from_millis(50))
    }

    #[test]
    fn test_state_published_to_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state");
        let mut monitor = fast_monitor(Some(path.clone()));

        monitor.set_state(MonitorState::Starting).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "starting...\n");

        // repeat is a no-op
        monitor.set_state(MonitorState::Starting).unwrap();

        monitor.set_state(MonitorState::Faulty).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "faulty\n");
    }

    #[test]
    fn test_startup_death_with_odd_status_is_inconsistent() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("state");
        let mut monitor = fast_monitor(Some(path.clone()));

        let ret = monitor.run(&sh("exit 7")).unwrap();
        assert_eq!(ret, 7);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "inconsistent\n");
    }

    #[test]
    fn test_unconfirmed_worker_is_killed_and_restarted() {
        let tmp = TempDir::new().unwrap();
        let flag = tmp.path().join("ran-once");
        // first spawn never confirms and gets killed; the restarted one
        // finds the flag and ends supervision
        let script = format!(
            "if [ -e {flag} ]; then exit 7; fi; touch {flag}; sleep 30",
            flag = flag.display()
        );
        let mut monitor =
            fast_monitor(None).with_timeouts(Duration::from_millis(300), Duration::from_millis(50));

        let ret = monitor.run(&sh(&script)).unwrap();
        assert_eq!(ret, 7);
        assert!(flag.exists());
    }

    #[test]
    fn test_confirmed_worker_reaches_ok_state() {
        // the worker script receives "--feedback-fd N" as $0/$1
        let script = r#"eval "printf x >&$1"; sleep 2; exit 7"#;
        let mut monitor =
            fast_monitor(None).with_timeouts(Duration::from_secs(1), Duration::from_millis(50));

        let ret = monitor.run(&sh(script)).unwrap();
        assert_eq!(ret, 7);
        assert_eq!(monitor.state, Some(MonitorState::Inconsistent));
    }

    #[test]
    fn test_empty_worker_command_rejected() {
        let mut monitor = fast_monitor(None);
        assert!(monitor.run(&[]).is_err());
    }
}
