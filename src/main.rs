/*!
 * Tidemark - one-way filesystem replication daemon
 *
 * Invoked in one of two roles:
 * - `--monitor`: supervise a worker child, publishing liveness to the
 *   state file and restarting the worker when it faults;
 * - otherwise: run the worker itself, crawling the master tree and
 *   mirroring changes onto the slave.
 */

use std::path::PathBuf;
use std::process;

use clap::{Arg, ArgAction, Command};
use tracing::error;

use tidemark::config::{Config, ConfigFile, LogLevel};
use tidemark::logging::init_logging;
use tidemark::monitor::Monitor;
use tidemark::{worker, VERSION};

fn cli() -> Command {
    Command::new("tidemark")
        .version(VERSION)
        .about("Mirror a master directory tree onto a slave tree, driven by xtime attributes")
        .arg(
            Arg::new("master")
                .value_name("MASTER")
                .help("Root of the tree to replicate")
                .required(true),
        )
        .arg(
            Arg::new("slave")
                .value_name("SLAVE")
                .help("Root of the mirror")
                .required(true),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("monitor")
                .long("monitor")
                .help("Run as the supervisor instead of the worker")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("no-daemon")
                .short('N')
                .long("no-daemon")
                .help("Stay in the foreground")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("pid-file")
                .short('p')
                .value_name("FILE")
                .help("Pid file path (accepted for compatibility)"),
        )
        .arg(
            Arg::new("feedback-fd")
                .long("feedback-fd")
                .value_name("FD")
                .value_parser(clap::value_parser!(i32))
                .help("Descriptor to signal once the slave connection stands"),
        )
        .arg(
            Arg::new("turns")
                .long("turns")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(u64))
                .help("Exit after this many clean turns (0 = run forever)"),
        )
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_name("SECONDS")
                .value_parser(clap::value_parser!(u64))
                .help("Keep-alive cadence in seconds (0 disables)"),
        )
        .arg(
            Arg::new("sync-jobs")
                .long("sync-jobs")
                .value_name("COUNT")
                .value_parser(clap::value_parser!(usize))
                .help("Number of sync pool workers"),
        )
        .arg(
            Arg::new("volume-id")
                .long("volume-id")
                .value_name("UUID")
                .help("Preset master volume uuid"),
        )
        .arg(
            Arg::new("state-file")
                .long("state-file")
                .value_name("FILE")
                .help("Where the supervisor publishes its state"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_name("FILE")
                .help("Log destination (default: stdout)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("error, warn, info, debug or trace"),
        )
}

fn parse_log_level(s: &str) -> Option<LogLevel> {
    match s.to_lowercase().as_str() {
        "error" => Some(LogLevel::Error),
        "warn" => Some(LogLevel::Warn),
        "info" => Some(LogLevel::Info),
        "debug" => Some(LogLevel::Debug),
        "trace" => Some(LogLevel::Trace),
        _ => None,
    }
}

/// Rebuild our own invocation as the worker command line: same arguments,
/// minus the supervision flags, forced into the foreground.
fn worker_argv() -> Vec<String> {
    let exe = std::env::current_exe()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "tidemark".to_string());
    let mut argv = vec![exe];
    argv.extend(
        std::env::args()
            .skip(1)
            .filter(|a| a != "-N" && a != "--no-daemon" && a != "--monitor"),
    );
    argv.push("-N".to_string());
    argv.push("-p".to_string());
    argv.push(String::new());
    argv
}

fn main() {
    let matches = cli().get_matches();

    let mut config = Config::default();
    if let Some(path) = matches.get_one::<String>("config") {
        let path = PathBuf::from(path);
        match ConfigFile::load(&path) {
            Ok(file) => file.apply_to(&mut config),
            Err(e) => {
                eprintln!("{}", e);
                process::exit(1);
            }
        }
        config.config_path = Some(path);
    }

    config.master_root = PathBuf::from(matches.get_one::<String>("master").unwrap());
    config.slave_root = PathBuf::from(matches.get_one::<String>("slave").unwrap());
    if let Some(turns) = matches.get_one::<u64>("turns") {
        config.turns = *turns;
    }
    if let Some(timeout) = matches.get_one::<u64>("timeout") {
        config.timeout = *timeout;
    }
    if let Some(sync_jobs) = matches.get_one::<usize>("sync-jobs") {
        config.sync_jobs = (*sync_jobs).max(1);
    }
    if let Some(volume_id) = matches.get_one::<String>("volume-id") {
        config.volume_id = Some(volume_id.clone());
    }
    if let Some(state_file) = matches.get_one::<String>("state-file") {
        config.state_file = Some(PathBuf::from(state_file));
    }
    if let Some(log_file) = matches.get_one::<String>("log-file") {
        config.log_file = Some(PathBuf::from(log_file));
    }
    if let Some(level) = matches.get_one::<String>("log-level") {
        match parse_log_level(level) {
            Some(level) => config.log_level = level,
            None => {
                eprintln!("Unknown log level: {}", level);
                process::exit(1);
            }
        }
    }

    if let Err(e) = init_logging(&config) {
        eprintln!("{}", e);
        process::exit(1);
    }

    if matches.get_flag("monitor") {
        match Monitor::new(&config).run(&worker_argv()) {
            Ok(ret) => process::exit(ret.clamp(0, 255)),
            Err(e) => {
                error!("{}", e);
                process::exit(1);
            }
        }
    }

    let feedback_fd = matches.get_one::<i32>("feedback-fd").copied();
    if let Err(e) = worker::run(config, feedback_fd) {
        error!("{}", e);
        // the supervisor reads exit 1 as restartable
        process::exit(1);
    }
}
