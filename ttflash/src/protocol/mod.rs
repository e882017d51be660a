//! Wire-level pieces of the board protocol.
//!
//! - [`framer`]: newline framing of the raw byte stream
//! - [`repl`]: control bytes, status lines and raw-REPL cleanup
//! - [`sector`]: acknowledged sector-by-sector flash programming

pub mod framer;
pub mod repl;
pub mod sector;

pub use framer::{FramedLines, LineFramer};
pub use repl::{Status, clean_raw_repl, parse_status};
pub use sector::{Ack, FirmwareImage, FlashJob, FlashOptions, SECTOR_SIZE, ShellLink};
