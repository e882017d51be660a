//! Info command implementation.

use anyhow::Result;
use console::style;
use std::thread;
use std::time::{Duration, Instant};
use ttflash::SessionState;

use crate::board::{load_scripts, with_board};
use crate::config::Config;
use crate::{Cli, was_interrupted};

/// How long to wait for the init script to report the flash id.
const FLASH_ID_WAIT: Duration = Duration::from_secs(2);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn render_json(port: &str, state: &SessionState) -> serde_json::Value {
    serde_json::json!({
        "port": port,
        "version": state.shell_version,
        "flash_id": state.flash_id,
        "booted": state.booted,
    })
}

fn render_text(state: &SessionState) -> String {
    let unknown = || "unknown".to_string();
    format!(
        "SDK version: {}\nFlash id:    {}",
        state.shell_version.clone().unwrap_or_else(unknown),
        state.flash_id.clone().unwrap_or_else(unknown)
    )
}

/// Info command implementation.
pub(crate) fn cmd_info(cli: &Cli, config: &Config, json: bool) -> Result<()> {
    let scripts = load_scripts(cli, config, false)?;

    let (port, state) = with_board(cli, config, &scripts, |board| {
        let deadline = Instant::now() + FLASH_ID_WAIT;
        while board.session_store().flash_id().is_none()
            && Instant::now() < deadline
            && !was_interrupted()
        {
            thread::sleep(POLL_INTERVAL);
        }
        Ok((board.name().to_string(), board.session()))
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&render_json(&port, &state))?);
    } else {
        if !cli.quiet {
            eprintln!("{} Connected to {}", style("✓").green(), style(&port).yellow());
        }
        println!("{}", render_text(&state));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState {
            booted: true,
            shell_version: Some("0.2.5".to_string()),
            flash_id: Some("ef4018".to_string()),
            ..SessionState::default()
        }
    }

    #[test]
    fn test_render_json() {
        let value = render_json("/dev/ttyACM0", &state());
        assert_eq!(value["port"], "/dev/ttyACM0");
        assert_eq!(value["version"], "0.2.5");
        assert_eq!(value["flash_id"], "ef4018");
        assert_eq!(value["booted"], true);

        let empty = render_json("COM3", &SessionState::default());
        assert!(empty["version"].is_null());
        assert!(empty["flash_id"].is_null());
    }

    #[test]
    fn test_render_text() {
        assert_eq!(render_text(&state()), "SDK version: 0.2.5\nFlash id:    ef4018");
        assert!(render_text(&SessionState::default()).contains("unknown"));
    }
}
