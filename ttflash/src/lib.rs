//! # ttflash
//!
//! A library for flashing Tiny Tapeout demo boards over their MicroPython
//! shell.
//!
//! This crate provides:
//!
//! - Line framing of the serial byte stream and raw REPL cleanup
//! - An observable session record (boot flag, SDK version, flash id, log)
//! - The [`TtBoardDevice`] protocol engine: handshake, commands, line waiters
//! - Acknowledged sector-by-sector flash programming
//! - Firmware presets
//!
//! ## Features
//!
//! - `native` (default): serial port transport via the `serialport` crate
//! - `serde`: Serialization support for presets and log entries
//!
//! ## Example
//!
//! ```rust,no_run
//! use ttflash::{DeviceConfig, ShellScripts, TtBoardDevice};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     #[cfg(feature = "native")]
//!     {
//!         let port = ttflash::NativePort::open_simple("/dev/ttyACM0", 115_200)?;
//!         let device = TtBoardDevice::open(port, DeviceConfig::default())?;
//!         device.start(&ShellScripts::new(
//!             std::fs::read_to_string("ttinit.py")?,
//!             std::fs::read_to_string("ttflash.py")?,
//!         ))?;
//!
//!         let image = std::fs::read("firmware.bin")?;
//!         device.program_flash(0x10_0000, &image, |written, total| {
//!             println!("{written}/{total}");
//!         })?;
//!         device.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

pub mod device;
pub mod dispatch;
pub mod error;
pub mod port;
pub mod preset;
pub mod protocol;
pub mod session;
pub mod sizes;
pub mod writer;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker used by long-running library loops.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

/// Lock a mutex, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Set the interruption flag for the calling thread only, so parallel
/// tests do not observe each other.
#[cfg(test)]
pub(crate) fn test_set_interrupted(value: bool) {
    use std::cell::Cell;

    thread_local! {
        static TEST_INTERRUPT_FLAG: Cell<bool> = const { Cell::new(false) };
    }

    static INSTALL: std::sync::Once = std::sync::Once::new();
    INSTALL.call_once(|| set_interrupt_checker(|| TEST_INTERRUPT_FLAG.with(Cell::get)));
    TEST_INTERRUPT_FLAG.with(|flag| flag.set(value));
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
pub use {
    device::{DeviceConfig, HandshakeConfig, SessionPhase, ShellScripts, TtBoardDevice},
    dispatch::{LineDispatcher, LineSubscription, LineWaiter},
    error::{Error, Result},
    port::{MemoryPort, MemoryTarget, Port, SerialConfig, memory_pair},
    preset::{FirmwarePreset, PresetFile, builtin_presets},
    protocol::{
        framer::{FramedLines, LineFramer},
        repl::clean_raw_repl,
        sector::{FirmwareImage, FlashOptions, SECTOR_SIZE},
    },
    session::{LogEntry, SessionChange, SessionState, SessionStore},
    sizes::format_kb,
    writer::{ModeWriter, WriteMode},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interrupt_checker_default_false() {
        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }

    #[test]
    fn test_interrupt_checker_toggle_true_false() {
        test_set_interrupted(true);
        assert!(is_interrupted_requested());

        test_set_interrupted(false);
        assert!(!is_interrupted_requested());
    }
}
