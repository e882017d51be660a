//! ttflash CLI - Command-line tool for flashing Tiny Tapeout demo boards.
//!
//! ## Features
//!
//! - Bring the board shell into raw REPL mode and show its SDK version
//! - Flash a custom image at any offset
//! - Download and flash firmware presets
//! - Shell completion generation
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use clap_complete::Shell;
use env_logger::Env;
use log::debug;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

mod board;
mod commands;
mod config;
mod fetch;

use config::Config;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Set by the Ctrl-C handler.
static INTERRUPTED: AtomicBool = AtomicBool::new(false);

/// Check if emoji/animations should be used (TTY and colors enabled).
pub(crate) fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Whether the user pressed Ctrl-C.
pub(crate) fn was_interrupted() -> bool {
    INTERRUPTED.load(Ordering::Relaxed)
}

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Missing or inconsistent arguments (exit code 2).
    #[error("{0}")]
    Usage(String),
    /// Interrupted by the user (exit code 130).
    #[error("{0}")]
    Cancelled(String),
}

/// ttflash - Flash firmware onto Tiny Tapeout demo boards.
///
/// Environment variables:
///   TTFLASH_PORT          - Serial port of the board
///   TTFLASH_BAUD          - Baud rate (default: 115200)
///   TTFLASH_INIT_SCRIPT   - Board setup script sent after entering raw REPL
///   TTFLASH_FLASH_SCRIPT  - Script providing the flash programming helpers
#[derive(Parser)]
#[command(name = "ttflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub(crate) struct Cli {
    /// Serial port of the board.
    #[arg(short, long, global = true, env = "TTFLASH_PORT")]
    pub port: Option<String>,

    /// Baud rate.
    #[arg(short, long, global = true, env = "TTFLASH_BAUD")]
    pub baud: Option<u32>,

    /// Board setup script sent after entering raw REPL.
    #[arg(long, global = true, value_name = "PATH", env = "TTFLASH_INIT_SCRIPT")]
    pub init_script: Option<PathBuf>,

    /// Script providing the flash programming helpers.
    #[arg(long, global = true, value_name = "PATH", env = "TTFLASH_FLASH_SCRIPT")]
    pub flash_script: Option<PathBuf>,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    pub config_path: Option<PathBuf>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Print the shell session log to stderr when done.
    #[arg(long, global = true)]
    pub dump_log: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Connect to the board and show its SDK version and flash id.
    Info {
        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Flash a binary file.
    Flash {
        /// Binary file to flash.
        file: PathBuf,

        /// Flash address (hex with 0x prefix, or decimal).
        #[arg(short, long, default_value = "0", value_parser = parse_offset)]
        offset: u32,
    },

    /// Download and flash a firmware preset.
    Preset {
        /// Preset number (as listed by `presets`) or name.
        preset: String,
    },

    /// List available firmware presets.
    Presets {
        /// Output the preset list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse a flash address: `0x`-prefixed hex or decimal, `_` separators allowed.
fn parse_offset(s: &str) -> Result<u32, String> {
    let s: String = s
        .trim()
        .chars()
        .filter(|c| *c != '_')
        .collect();
    let parsed = if let Some(hex) = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
    {
        u32::from_str_radix(hex, 16)
    } else {
        s.parse()
    };
    parsed.map_err(|e| format!("Invalid flash address '{s}': {e}"))
}

/// Exit code for a failed run.
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    if err
        .chain()
        .filter_map(|cause| cause.downcast_ref::<ttflash::Error>())
        .any(|e| matches!(e.innermost(), ttflash::Error::Interrupted))
    {
        return 130;
    }
    1
}

fn init_logging(cli: &Cli) {
    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();
}

fn run(cli: &Cli, config: &Config) -> Result<()> {
    match &cli.command {
        Commands::Info { json } => commands::info::cmd_info(cli, config, *json),
        Commands::Flash { file, offset } => commands::flash::cmd_flash(cli, config, file, *offset),
        Commands::Preset { preset } => commands::preset::cmd_preset(cli, config, preset),
        Commands::Presets { json } => commands::preset::cmd_presets(config, *json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        },
    }
}

fn main() {
    // --- NO_COLOR and TTY detection ---
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);
    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();
    init_logging(&cli);

    debug!(
        "ttflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    if let Err(e) = ctrlc::set_handler(|| INTERRUPTED.store(true, Ordering::Relaxed)) {
        debug!("Could not install Ctrl-C handler: {e}");
    }
    ttflash::set_interrupt_checker(was_interrupted);

    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    if let Err(err) = run(&cli, &config) {
        eprintln!(
            "{} {err:#}",
            console::style("Error:")
                .red()
                .bold()
        );
        std::process::exit(exit_code(&err));
    }
}

#[cfg(test)]
mod cli_tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_flash() {
        let cli = Cli::try_parse_from([
            "ttflash",
            "--port",
            "/dev/ttyACM0",
            "flash",
            "user.bin",
            "--offset",
            "0x100000",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        match cli.command {
            Commands::Flash { file, offset } => {
                assert_eq!(file, PathBuf::from("user.bin"));
                assert_eq!(offset, 0x10_0000);
            },
            _ => panic!("expected flash"),
        }
    }

    #[test]
    fn test_cli_flash_offset_defaults_to_zero() {
        let cli = Cli::try_parse_from(["ttflash", "flash", "user.bin"]).unwrap();
        assert!(matches!(cli.command, Commands::Flash { offset: 0, .. }));
    }

    #[test]
    fn test_cli_parse_preset_and_presets() {
        let cli = Cli::try_parse_from(["ttflash", "preset", "2"]).unwrap();
        assert!(matches!(cli.command, Commands::Preset { ref preset } if preset == "2"));

        let cli = Cli::try_parse_from(["ttflash", "presets", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Presets { json: true }));
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "ttflash",
            "-p",
            "COM3",
            "-b",
            "9600",
            "--init-script",
            "ttinit.py",
            "--flash-script",
            "ttflash.py",
            "--config",
            "/tmp/config.toml",
            "-vv",
            "--quiet",
            "--dump-log",
            "info",
        ])
        .unwrap();
        assert_eq!(cli.port.as_deref(), Some("COM3"));
        assert_eq!(cli.baud, Some(9600));
        assert_eq!(cli.init_script, Some(PathBuf::from("ttinit.py")));
        assert_eq!(cli.flash_script, Some(PathBuf::from("ttflash.py")));
        assert_eq!(cli.config_path, Some(PathBuf::from("/tmp/config.toml")));
        assert_eq!(cli.verbose, 2);
        assert!(cli.quiet);
        assert!(cli.dump_log);
    }

    #[test]
    fn test_cli_missing_subcommand() {
        assert!(Cli::try_parse_from(["ttflash"]).is_err());
    }

    #[test]
    fn test_parse_offset() {
        assert_eq!(parse_offset("0x100000"), Ok(0x10_0000));
        assert_eq!(parse_offset("0X10_0000"), Ok(0x10_0000));
        assert_eq!(parse_offset("1048576"), Ok(0x10_0000));
        assert_eq!(parse_offset(" 0 "), Ok(0));
        assert!(parse_offset("0xZZ").is_err());
        assert!(parse_offset("0x1_0000_0000").is_err());
        assert!(parse_offset("-1").is_err());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CliError::Usage("x".into()).into()), 2);
        assert_eq!(exit_code(&CliError::Cancelled("x".into()).into()), 130);
        assert_eq!(exit_code(&anyhow::anyhow!("boom")), 1);

        let interrupted = anyhow::Error::new(ttflash::Error::Interrupted).context("Flashing failed");
        assert_eq!(exit_code(&interrupted), 130);
        let in_file = ttflash::Error::FileFailed {
            name: "Image".to_string(),
            source: Box::new(ttflash::Error::Interrupted),
        };
        assert_eq!(exit_code(&anyhow::Error::new(in_file)), 130);
        assert_eq!(exit_code(&anyhow::Error::new(ttflash::Error::Closed)), 1);
    }
}
