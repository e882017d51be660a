//! Port abstraction for the byte stream between host and board.
//!
//! The protocol engine only needs a bidirectional byte stream with a
//! detachable read half. Two implementations are provided:
//!
//! - **Native** (`native` feature): serial ports via the `serialport` crate
//! - **Memory**: an in-process pipe, used to drive the engine from a
//!   simulated board
//!
//! ```text
//! +-----------------------+
//! |    TtBoardDevice      |
//! | (read loop, writer)   |
//! +-----------+-----------+
//!             |
//!             v
//! +-----------+-----------+
//! |      Port trait       |
//! +-----+-----------+-----+
//!       |           |
//!       v           v
//! +-----+----+ +----+-----+
//! |NativePort| |MemoryPort|
//! +----------+ +----------+
//! ```
//!
//! Framing is never assumed: reads may return any number of bytes and the
//! engine imposes line structure itself.

pub mod memory;
#[cfg(feature = "native")]
pub mod native;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// How long a blocked read waits before the read loop checks for shutdown.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// Where and how fast to open a serial port.
///
/// Lines are always 8N1 without flow control, which is what the board's
/// USB CDC interface reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a configuration with the default read timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: DEFAULT_READ_TIMEOUT,
        }
    }

    /// Set the read timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Read half handed to the engine's read loop.
pub type PortReader = Box<dyn Read + Send>;

/// Bidirectional byte stream to the board.
///
/// Reads on readers obtained from [`Port::try_clone_reader`] must give up
/// periodically with [`std::io::ErrorKind::TimedOut`] (or `WouldBlock`) so
/// the read loop can notice a shutdown request. `Ok(0)` means the stream
/// has ended.
pub trait Port: Write + Send {
    /// Port name/path, used in log messages.
    fn name(&self) -> &str;

    /// Obtain an independent handle on the read side of the stream.
    fn try_clone_reader(&self) -> Result<PortReader>;

    /// Release the transport. Closing twice is not an error.
    fn close(&mut self) -> Result<()>;
}

pub use memory::{MemoryPort, MemoryTarget, memory_pair};
#[cfg(feature = "native")]
pub use native::NativePort;
