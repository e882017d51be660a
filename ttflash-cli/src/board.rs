//! Opening the board and running a command against it.

use anyhow::{Context, Result};
use console::style;
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};
use ttflash::{LogEntry, NativePort, SerialConfig, ShellScripts, TtBoardDevice};

use crate::config::Config;
use crate::{Cli, CliError};

/// Default baud rate of the board's USB serial port.
pub(crate) const DEFAULT_BAUD: u32 = 115_200;

/// An open, handshaken board.
pub(crate) type Board = TtBoardDevice<NativePort>;

/// Serial port from the command line, environment or config.
fn resolve_port(cli: &Cli, config: &Config) -> Result<String> {
    cli.port
        .clone()
        .or_else(|| config.connection.serial.clone())
        .ok_or_else(|| {
            CliError::Usage(
                "No serial port given. Use --port, TTFLASH_PORT or [connection] serial in ttflash.toml"
                    .to_string(),
            )
            .into()
        })
}

fn read_script(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read script {}", path.display()))
}

fn script_path(flag: Option<&PathBuf>, configured: Option<&PathBuf>) -> Option<PathBuf> {
    flag.or(configured).cloned()
}

/// Load the init payloads.
///
/// The flashing script is mandatory when `for_flashing` is set; otherwise a
/// missing script is sent as an empty payload.
pub(crate) fn load_scripts(cli: &Cli, config: &Config, for_flashing: bool) -> Result<ShellScripts> {
    let init = script_path(cli.init_script.as_ref(), config.scripts.init.as_ref());
    let flash = script_path(cli.flash_script.as_ref(), config.scripts.flash.as_ref());

    if for_flashing && flash.is_none() {
        return Err(CliError::Usage(
            "No flash script given. Use --flash-script, TTFLASH_FLASH_SCRIPT or [scripts] flash in ttflash.toml"
                .to_string(),
        )
        .into());
    }

    let setup = match init {
        Some(path) => read_script(&path)?,
        None => {
            warn!("No init script configured; the board may not report its flash id");
            String::new()
        },
    };
    let flashing = match flash {
        Some(path) => read_script(&path)?,
        None => String::new(),
    };
    Ok(ShellScripts::new(setup, flashing))
}

/// Open the port, run the handshake, run `action`, then close.
///
/// The session log is dumped with `--dump-log` whether or not `action`
/// succeeded.
pub(crate) fn with_board<T>(
    cli: &Cli,
    config: &Config,
    scripts: &ShellScripts,
    action: impl FnOnce(&Board) -> Result<T>,
) -> Result<T> {
    let port_name = resolve_port(cli, config)?;
    let baud = cli
        .baud
        .or(config.connection.baud)
        .unwrap_or(DEFAULT_BAUD);

    if !cli.quiet {
        eprintln!(
            "{} Using {} at {} baud",
            style("🔌").cyan(),
            style(&port_name).yellow(),
            baud
        );
    }

    let port = NativePort::open(&SerialConfig::new(&port_name, baud))
        .with_context(|| format!("Failed to open serial port {port_name}"))?;
    let board = TtBoardDevice::open(port, config.device_config())
        .with_context(|| format!("Failed to start reading from {port_name}"))?;

    let result = board
        .start(scripts)
        .context("Failed to initialise the board shell")
        .and_then(|()| action(&board));

    if cli.dump_log {
        let log: Vec<LogEntry> = board.session().log.into();
        dump_log(&log);
    }
    if let Err(e) = board.close() {
        warn!("Failed to close {port_name}: {e}");
    }
    debug!("Closed {port_name}");
    result
}

fn format_log_entry(entry: &LogEntry) -> String {
    let marker = if entry.sent { ">" } else { "<" };
    format!("{marker} {}", entry.text.escape_debug())
}

fn dump_log(entries: &[LogEntry]) {
    eprintln!("{}", style("--- session log ---").dim());
    for entry in entries {
        eprintln!("{}", format_log_entry(entry));
    }
    eprintln!("{}", style("--- end of log ---").dim());
}
