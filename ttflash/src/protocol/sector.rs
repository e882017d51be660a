//! Sector-by-sector flash programming over the raw REPL.
//!
//! ## Exchange
//!
//! ```text
//! host                                   board
//!  | flash.program_sectors(0x100000)\x04   |
//!  |-------------------------------------->|
//!  |                    flash_prog=100000  |
//!  |<--------------------------------------|
//!  | "4096\r\n" + 4096 raw bytes           |
//!  |-------------------------------------->|
//!  |                    flash_prog=101000  |
//!  |<--------------------------------------|
//!  |               ...                     |
//!  | "0\r\n"                               |
//!  |-------------------------------------->|
//!  |                    flash_prog=ok      |
//!  |<--------------------------------------|
//! ```
//!
//! Flow control is strict stop-and-wait: the next sector is only sent after
//! the previous one was acknowledged. There is no retry and no timeout; a
//! lost acknowledgment blocks until the session closes or the embedding
//! application interrupts (see [`crate::set_interrupt_checker`]).

use std::time::Duration;

use log::{debug, info};

use crate::dispatch::LineSubscription;
use crate::error::{Error, Result};

/// Bytes per sector.
pub const SECTOR_SIZE: usize = 4096;

/// Prefix of acknowledgment lines.
pub const ACK_PREFIX: &str = "flash_prog=";

/// How often a pending acknowledgment wait checks for interruption.
const ACK_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Parsed acknowledgment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Next flash address the board will write.
    Address(u32),
    /// The whole payload was written.
    Done,
}

impl Ack {
    /// Parse a `flash_prog=<hex>` / `flash_prog=ok` line.
    pub fn parse(line: &str) -> Result<Self> {
        let value = line
            .trim()
            .strip_prefix(ACK_PREFIX)
            .ok_or_else(|| Error::Protocol(format!("not an acknowledgment: {line:?}")))?;
        if value == "ok" {
            return Ok(Self::Done);
        }
        u32::from_str_radix(value, 16)
            .map(Self::Address)
            .map_err(|e| Error::Protocol(format!("bad acknowledgment address {value:?}: {e}")))
    }
}

fn is_ack(line: &str) -> bool {
    line.starts_with(ACK_PREFIX)
}

/// Per-file programming options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlashOptions {
    /// Switch the flash chip to QSPI mode once this file is written.
    pub enable_qspi_after: bool,
}

/// Text command that starts programming at `offset`.
pub fn program_command(offset: u32, options: FlashOptions) -> String {
    if options.enable_qspi_after {
        format!("flash.program_sectors(0x{offset:x}, enQSPIAfter=True)")
    } else {
        format!("flash.program_sectors(0x{offset:x})")
    }
}

/// Length header preceding each sector (and the zero-length terminator).
pub fn sector_header(len: usize) -> String {
    format!("{len}\r\n")
}

/// Shell primitives the programming protocol runs on.
pub trait ShellLink {
    /// Send a text command terminated by end-of-transmission.
    fn send_command(&self, command: &str, log: bool) -> Result<()>;

    /// Write raw bytes on the binary channel.
    fn write_binary(&self, data: &[u8]) -> Result<()>;

    /// Receive every line satisfying `predicate` from now on.
    fn subscribe_lines(&self, predicate: Box<dyn Fn(&str) -> bool + Send>) -> LineSubscription;
}

/// Progress of one file transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    /// Flash address of the first byte.
    pub offset: u32,
    /// Payload size.
    pub total_len: usize,
    /// Bytes acknowledged so far.
    pub written_len: usize,
}

impl FlashJob {
    /// Start tracking a payload of `total_len` bytes at `offset`.
    pub fn new(offset: u32, total_len: usize) -> Self {
        Self {
            offset,
            total_len,
            written_len: 0,
        }
    }

    /// Update progress from an acknowledgment and return the written count.
    pub fn acknowledge(&mut self, ack: Ack) -> usize {
        self.written_len = match ack {
            Ack::Done => self.total_len,
            Ack::Address(address) => {
                let written = u64::from(address).saturating_sub(u64::from(self.offset));
                usize::try_from(written)
                    .unwrap_or(usize::MAX)
                    .min(self.total_len)
            },
        };
        self.written_len
    }

    /// Number of sectors the payload occupies.
    pub fn sector_count(&self) -> usize {
        self.total_len.div_ceil(SECTOR_SIZE)
    }
}

fn next_ack(acks: &LineSubscription) -> Result<Ack> {
    loop {
        if let Some(line) = acks.recv_timeout(ACK_POLL_INTERVAL)? {
            return Ack::parse(&line);
        }
        if crate::is_interrupted_requested() {
            return Err(Error::Interrupted);
        }
    }
}

/// Program `payload` into flash at `offset`.
///
/// `on_progress` is called once per acknowledgment with
/// `(written_bytes, total_bytes)`.
pub fn program_flash<L>(
    link: &L,
    offset: u32,
    payload: &[u8],
    options: FlashOptions,
    mut on_progress: impl FnMut(usize, usize),
) -> Result<()>
where
    L: ShellLink + ?Sized,
{
    let mut job = FlashJob::new(offset, payload.len());
    // Registered before the command goes out so the first ack cannot be missed.
    // Dropping it on any exit path unregisters it.
    let acks = link.subscribe_lines(Box::new(is_ack));

    let mut on_ack = |job: &mut FlashJob, ack: Ack| {
        let written = job.acknowledge(ack);
        on_progress(written, job.total_len);
    };

    debug!(
        "Programming {} bytes ({} sectors) at 0x{offset:08X}",
        payload.len(),
        job.sector_count()
    );
    link.send_command(&program_command(offset, options), true)?;
    let ready = next_ack(&acks)?;
    on_ack(&mut job, ready);

    for (index, sector) in payload.chunks(SECTOR_SIZE).enumerate() {
        link.write_binary(sector_header(sector.len()).as_bytes())?;
        link.write_binary(sector)?;
        let ack = next_ack(&acks)?;
        if ack == Ack::Done {
            return Err(Error::Protocol(format!(
                "board finished early after sector {index} of {}",
                job.sector_count()
            )));
        }
        on_ack(&mut job, ack);
        debug!("Sector {index} acknowledged ({} / {} bytes)", job.written_len, job.total_len);
    }

    link.write_binary(sector_header(0).as_bytes())?;
    let last = next_ack(&acks)?;
    on_ack(&mut job, last);

    info!("Programmed {} bytes at 0x{offset:08X}", payload.len());
    Ok(())
}

/// One file of a multi-file job.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    /// Display name (usually the file name).
    pub name: String,
    /// Absolute flash address.
    pub offset: u32,
    /// File contents.
    pub data: Vec<u8>,
    /// Programming options.
    pub options: FlashOptions,
}

/// Program `images` in order, stopping at the first failure.
///
/// `progress` receives `(name, written_bytes, total_bytes)`. A failure is
/// returned as [`Error::FileFailed`] naming the file.
pub fn program_images<L>(
    link: &L,
    images: &[FirmwareImage],
    mut progress: impl FnMut(&str, usize, usize),
) -> Result<()>
where
    L: ShellLink + ?Sized,
{
    for image in images {
        info!(
            "Flashing {} ({} bytes) -> 0x{:08X}",
            image.name,
            image.data.len(),
            image.offset
        );
        program_flash(link, image.offset, &image.data, image.options, |written, total| {
            progress(&image.name, written, total);
        })
        .map_err(|source| Error::FileFailed {
            name: image.name.clone(),
            source: Box::new(source),
        })?;
    }
    Ok(())
}
