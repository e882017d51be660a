//! Text/binary write channels over one transport.
//!
//! Shell commands and scripts are text; sector payloads are raw bytes. Only
//! one channel may be open at a time, and switching drains the open one
//! first so the two kinds of writes never interleave on the wire.

use std::io::Write;

use log::{debug, trace};

use crate::error::Result;

/// Active write channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// UTF-8 text (commands, scripts, control bytes).
    Text,
    /// Raw bytes (length headers and sector data).
    Binary,
}

/// Writer that tracks which channel is open.
pub struct ModeWriter<W: Write> {
    inner: W,
    mode: Option<WriteMode>,
    switches: usize,
}

impl<W: Write> ModeWriter<W> {
    /// Wrap a transport; no channel is open yet.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            mode: None,
            switches: 0,
        }
    }

    /// Currently open channel.
    pub fn mode(&self) -> Option<WriteMode> {
        self.mode
    }

    /// Number of channel changes so far.
    pub fn switch_count(&self) -> usize {
        self.switches
    }

    /// Make `mode` the open channel, draining the previous one.
    pub fn switch_to(&mut self, mode: WriteMode) -> Result<()> {
        if self.mode == Some(mode) {
            return Ok(());
        }
        if let Some(previous) = self.mode {
            self.inner.flush()?;
            debug!("Write channel {previous:?} -> {mode:?}");
            self.switches += 1;
        }
        self.mode = Some(mode);
        Ok(())
    }

    /// Write text on the text channel.
    pub fn write_text(&mut self, text: &str) -> Result<()> {
        self.switch_to(WriteMode::Text)?;
        trace!("-> {text:?}");
        self.inner.write_all(text.as_bytes())?;
        self.inner.flush()?;
        Ok(())
    }

    /// Write bytes on the binary channel.
    pub fn write_binary(&mut self, data: &[u8]) -> Result<()> {
        self.switch_to(WriteMode::Binary)?;
        trace!("-> {} raw bytes", data.len());
        self.inner.write_all(data)?;
        self.inner.flush()?;
        Ok(())
    }

    /// Drain and close whichever channel is open.
    pub fn close_channel(&mut self) -> Result<()> {
        if self.mode.take().is_some() {
            self.inner.flush()?;
        }
        Ok(())
    }

    /// Access the transport.
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }

    /// Access the transport.
    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}
