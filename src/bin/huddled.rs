//! Huddle daemon - presence and message routing hub
//!
//! This binary runs as a background daemon, accepting client connections on
//! a Unix socket and routing identity, broadcast, direct and group traffic
//! between them.
//!
//! # Usage
//!
//! ```bash
//! # Start the daemon (foreground)
//! huddled start
//!
//! # Start the daemon (background/daemonized) with a config file
//! huddled start -d --config /etc/huddle.toml
//!
//! # Stop the daemon
//! huddled stop
//!
//! # Check daemon status
//! huddled status
//! ```

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::process::{self, ExitCode};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use huddled::config::HubConfig;
use huddled::hub::spawn_hub;
use huddled::server::{HubServer, Outboxes};

/// How long `stop` waits for the daemon to exit after SIGTERM.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Huddle daemon - presence and routing hub
#[derive(Parser, Debug)]
#[command(name = "huddled", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the hub
    Start {
        /// Detach from the terminal and log to the state directory
        #[arg(short = 'd', long)]
        daemon: bool,
    },
    /// Stop the running hub
    Stop,
    /// Show whether the hub is running and where it listens
    Status,
}

/// PID and log files kept in the hub's state directory.
struct StateFiles {
    dir: PathBuf,
}

impl StateFiles {
    /// Uses the platform state directory, or the temp directory when there is none.
    fn locate() -> Self {
        let base = dirs::state_dir().unwrap_or_else(std::env::temp_dir);
        Self::in_dir(base.join("huddle"))
    }

    fn in_dir(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn pid_path(&self) -> PathBuf {
        self.dir.join("huddled.pid")
    }

    fn log_path(&self) -> PathBuf {
        self.dir.join("huddled.log")
    }

    /// Returns the PID of a live hub. A PID file naming a dead or
    /// unparsable process is removed.
    fn running_pid(&self) -> Option<i32> {
        let contents = fs::read_to_string(self.pid_path()).ok()?;
        match parse_pid(&contents) {
            Some(pid) if process_alive(pid) => Some(pid),
            _ => {
                self.clear_pid();
                None
            }
        }
    }

    fn record_pid(&self, pid: u32) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        fs::write(self.pid_path(), format!("{pid}\n")).context("Failed to write PID file")
    }

    fn clear_pid(&self) {
        let _ = fs::remove_file(self.pid_path());
    }
}

/// Parses PID file contents. Only positive PIDs are accepted, since
/// `kill` treats zero and negative values as process groups.
fn parse_pid(contents: &str) -> Option<i32> {
    contents.trim().parse().ok().filter(|pid: &i32| *pid > 0)
}

/// Checks for a process with signal 0. `EPERM` means it exists under
/// another user.
fn process_alive(pid: i32) -> bool {
    // SAFETY: signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn send_sigterm(pid: i32) -> Result<()> {
    // SAFETY: `pid` is positive, so exactly one process is signalled.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        let err = io::Error::last_os_error();
        bail!("Failed to send SIGTERM to PID {pid}: {err}");
    }
    Ok(())
}

/// Polls until `pid` is gone. Returns false if it outlives `timeout`.
fn wait_for_exit(pid: i32, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while process_alive(pid) {
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }
    true
}

fn load_config(path: Option<&Path>) -> Result<HubConfig> {
    HubConfig::resolve(path).context("Failed to load configuration")
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();
    let files = StateFiles::locate();

    match args.command.unwrap_or(Command::Start { daemon: false }) {
        Command::Start { daemon } => start(&files, args.config.as_deref(), daemon),
        Command::Stop => stop(&files),
        Command::Status => status(&files, args.config.as_deref()),
    }
}

fn start(files: &StateFiles, config_path: Option<&Path>, daemon: bool) -> Result<ExitCode> {
    if let Some(pid) = files.running_pid() {
        eprintln!("Hub is already running (PID {pid}); run 'huddled stop' first.");
        return Ok(ExitCode::FAILURE);
    }

    // Resolve before forking so config errors reach the terminal
    let config = load_config(config_path)?;

    if daemon {
        detach(&files.log_path())?;
    }

    files.record_pid(process::id())?;
    let result = run_daemon(config);
    files.clear_pid();

    result.map(|()| ExitCode::SUCCESS)
}

fn stop(files: &StateFiles) -> Result<ExitCode> {
    let Some(pid) = files.running_pid() else {
        println!("Hub is not running.");
        return Ok(ExitCode::SUCCESS);
    };

    println!("Stopping hub (PID {pid})...");
    send_sigterm(pid)?;

    if wait_for_exit(pid, STOP_TIMEOUT) {
        println!("Hub stopped.");
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!("Hub did not exit within {}s.", STOP_TIMEOUT.as_secs());
        Ok(ExitCode::FAILURE)
    }
}

fn status(files: &StateFiles, config_path: Option<&Path>) -> Result<ExitCode> {
    let Some(pid) = files.running_pid() else {
        println!("Hub is not running.");
        return Ok(ExitCode::FAILURE);
    };

    let config = load_config(config_path)?;
    let socket = &config.socket_path;
    println!("Hub is running (PID {pid})");
    println!(
        "Socket: {} ({})",
        socket.display(),
        if socket.exists() { "present" } else { "missing" }
    );
    println!("Log: {}", files.log_path().display());

    Ok(ExitCode::SUCCESS)
}

/// Forks into the background, sending stdout and stderr to `log_path`.
fn detach(log_path: &Path) -> Result<()> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let log = File::options()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {}", log_path.display()))?;
    let log_err = log.try_clone().context("Failed to duplicate log file handle")?;

    daemonize::Daemonize::new()
        .working_directory("/")
        .stdout(log)
        .stderr(log_err)
        .start()
        .context("Failed to detach from terminal")
}

#[tokio::main]
async fn run_daemon(config: HubConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_filter)
            .with_context(|| format!("Invalid log filter: {}", config.log_filter))?,
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Huddle daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let outboxes = Arc::new(Outboxes::new(config.outbox_capacity));
    let hub = spawn_hub(Arc::clone(&outboxes), config.max_connections);
    info!(max_connections = config.max_connections, "Hub started");

    let server = HubServer::new(&config.socket_path, hub, outboxes, cancel_token)
        .with_limits(config.connection_limits());

    info!(socket = %config.socket_path.display(), "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Huddle daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
