//! Sensor Hub - Daemon Entry Point
//!
//! Loads the hub configuration, installs logging, loads the autoload
//! plugins and serves a line-based debugging console on stdin. Frames of
//! started sessions are printed to stdout as JSON.
//!
//! Usage: `sensorhub [CONFIG_FILE]`

use anyhow::{anyhow, bail, Context};
use crossbeam_channel::RecvTimeoutError;
use sensorhub_rs::{
    config::{self, HubConfig},
    plugins, SensorManager, SessionId,
};
use std::io::BufRead;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_ENV: &str = "SENSORHUB_LOG";
const LOG_FILE: &str = "sensorhub.log";

const HELP: &str = "\
commands:
  status                    show live instances
  request <sensor>          open a session
  start <session>           start delivering frames
  stop <session>            stop delivering frames
  interval <session> <ms>   request a polling interval
  override <session> <0|1>  set the standby override
  release <sensor> <session>
  display <on|off>          change the display state
  quit";

/// One console line.
#[derive(Debug, PartialEq)]
enum Command {
    Status,
    Request(String),
    Start(SessionId),
    Stop(SessionId),
    Interval(SessionId, u32),
    Override(SessionId, bool),
    Release(String, SessionId),
    Display(bool),
    Help,
    Quit,
}

impl Command {
    fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&name, args)) = words.split_first() else {
            return Ok(None);
        };
        let command = match (name, args) {
            ("status", []) => Command::Status,
            ("request", [id]) => Command::Request(id.to_string()),
            ("start", [s]) => Command::Start(parse_session(s)?),
            ("stop", [s]) => Command::Stop(parse_session(s)?),
            ("interval", [s, ms]) => Command::Interval(
                parse_session(s)?,
                ms.parse().with_context(|| format!("Invalid interval '{}'", ms))?,
            ),
            ("override", [s, flag]) => Command::Override(parse_session(s)?, parse_flag(flag)?),
            ("release", [id, s]) => Command::Release(id.to_string(), parse_session(s)?),
            ("display", [state]) => Command::Display(parse_flag(state)?),
            ("help", []) => Command::Help,
            ("quit" | "exit", []) => Command::Quit,
            _ => bail!("Unrecognised command '{}', try 'help'", line.trim()),
        };
        Ok(Some(command))
    }
}

fn parse_session(s: &str) -> anyhow::Result<SessionId> {
    s.parse()
        .map(SessionId)
        .with_context(|| format!("Invalid session '{}'", s))
}

fn parse_flag(s: &str) -> anyhow::Result<bool> {
    match s {
        "1" | "on" | "true" => Ok(true),
        "0" | "off" | "false" => Ok(false),
        _ => Err(anyhow!("Expected on/off, got '{}'", s)),
    }
}

/// Run one command. Returns `false` when the console should exit.
fn execute(manager: &SensorManager, command: Command) -> anyhow::Result<bool> {
    match command {
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&manager.status())?);
        }
        Command::Request(id) => {
            let session = manager.request_sensor(&id)?;
            println!("session {}", session);
        }
        Command::Start(session) => {
            let changed = manager.start(session)?;
            println!("started={}", changed);
        }
        Command::Stop(session) => {
            let changed = manager.stop(session)?;
            println!("stopped={}", changed);
        }
        Command::Interval(session, ms) => {
            let decision = manager.set_interval(session, ms)?;
            println!("interval {} ms", decision.interval_ms);
        }
        Command::Override(session, enabled) => {
            let effective = manager.set_standby_override(session, enabled)?;
            println!("standby override {}", effective);
        }
        Command::Release(id, session) => {
            manager.release_sensor(&id, session)?;
            println!("released");
        }
        Command::Display(on) => manager.set_display_state(on),
        Command::Help => println!("{}", HELP),
        Command::Quit => return Ok(false),
    }
    Ok(true)
}

/// Install the global subscriber. The returned guard flushes the log file
/// and must live until exit.
fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info,sensorhub_rs=debug"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {:?}", dir))?;
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(guard)
}

fn load_config() -> anyhow::Result<HubConfig> {
    match std::env::args_os().nth(1) {
        Some(path) => {
            let path = Path::new(&path);
            let drop_in = path
                .parent()
                .map(|p| p.join(config::DROP_IN_DIR))
                .unwrap_or_else(|| config::DROP_IN_DIR.into());
            HubConfig::load_layered(path, drop_in)
                .with_context(|| format!("Failed to load config {:?}", path))
        }
        None => Ok(HubConfig::load_default()),
    }
}

fn main() -> anyhow::Result<()> {
    let config = load_config()?;
    let _log_guard = init_logging(config.log_dir.as_deref())?;

    tracing::info!("Starting sensor hub (device '{}')", config.device_id);

    let manager = SensorManager::new(config);
    plugins::install_builtin(&manager);
    if let Err(e) = manager.load_autoload_plugins() {
        tracing::warn!("Some autoload plugins failed: {}", e);
    }

    let running = Arc::new(AtomicBool::new(true));
    let frames = manager.frames();
    let running_clone = running.clone();
    let printer = std::thread::Builder::new()
        .name("frame-printer".into())
        .spawn(move || {
            while running_clone.load(Ordering::Relaxed) {
                match frames.recv_timeout(Duration::from_millis(100)) {
                    Ok(frame) => match serde_json::to_string(&frame) {
                        Ok(line) => println!("{}", line),
                        Err(e) => tracing::warn!("Failed to encode frame: {}", e),
                    },
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        })
        .context("Failed to spawn frame printer")?;

    println!("{}", HELP);
    for line in std::io::stdin().lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let command = match Command::parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{:#}", e);
                continue;
            }
        };
        match execute(&manager, command) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {:#}", e),
        }
    }

    tracing::info!("Shutting down...");
    manager.shutdown();
    running.store(false, Ordering::Relaxed);
    if printer.join().is_err() {
        tracing::error!("Frame printer panicked");
    }
    Ok(())
}
