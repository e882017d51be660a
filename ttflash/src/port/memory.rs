//! In-process pipe transport.
//!
//! [`memory_pair`] returns the host end ([`MemoryPort`], handed to the
//! engine) and the board end ([`MemoryTarget`], driven by a simulator or a
//! test). Bytes written on one end become readable on the other.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::lock;
use crate::port::{Port, PortReader};

#[derive(Debug, Default)]
struct PipeState {
    to_host: VecDeque<u8>,
    to_target: VecDeque<u8>,
    host_closed: bool,
    target_closed: bool,
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
    changed: Condvar,
}

impl Pipe {
    /// Block until `ready` holds or `timeout` elapses; returns the guard either way.
    fn wait_for<F>(&self, timeout: Duration, ready: F) -> MutexGuard<'_, PipeState>
    where
        F: Fn(&PipeState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        let mut state = lock(&self.state);
        while !ready(&*state) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        state
    }
}

/// Create a connected host/board pair.
pub fn memory_pair(name: impl Into<String>) -> (MemoryPort, MemoryTarget) {
    let pipe = Arc::new(Pipe::default());
    let port = MemoryPort {
        pipe: Arc::clone(&pipe),
        name: name.into(),
        timeout: Duration::from_millis(20),
    };
    (port, MemoryTarget { pipe })
}

/// Host end of an in-process pipe.
pub struct MemoryPort {
    pipe: Arc<Pipe>,
    name: String,
    timeout: Duration,
}

struct MemoryReader {
    pipe: Arc<Pipe>,
    timeout: Duration,
}

fn read_to_host(pipe: &Pipe, timeout: Duration, buf: &mut [u8]) -> io::Result<usize> {
    let mut state = pipe.wait_for(timeout, |s| {
        !s.to_host.is_empty() || s.target_closed || s.host_closed
    });
    if state.host_closed {
        return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
    }
    if state.to_host.is_empty() {
        if state.target_closed {
            return Ok(0);
        }
        return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
    }
    let n = buf.len().min(state.to_host.len());
    for (slot, byte) in buf.iter_mut().zip(state.to_host.drain(..n)) {
        *slot = byte;
    }
    Ok(n)
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_to_host(&self.pipe, self.timeout, buf)
    }
}

impl MemoryPort {
    /// Change how long reads wait for board output; readers cloned later
    /// inherit it.
    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }
}

impl Read for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_to_host(&self.pipe, self.timeout, buf)
    }
}

impl Write for MemoryPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = lock(&self.pipe.state);
        if state.host_closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        if state.target_closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "board hung up"));
        }
        state.to_target.extend(buf);
        drop(state);
        self.pipe.changed.notify_all();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for MemoryPort {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_reader(&self) -> Result<PortReader> {
        Ok(Box::new(MemoryReader {
            pipe: Arc::clone(&self.pipe),
            timeout: self.timeout,
        }))
    }

    fn close(&mut self) -> Result<()> {
        lock(&self.pipe.state).host_closed = true;
        self.pipe.changed.notify_all();
        Ok(())
    }
}

/// Board end of an in-process pipe.
#[derive(Clone)]
pub struct MemoryTarget {
    pipe: Arc<Pipe>,
}

impl MemoryTarget {
    /// Queue bytes for the host to read.
    pub fn send(&self, data: &[u8]) {
        lock(&self.pipe.state).to_host.extend(data);
        self.pipe.changed.notify_all();
    }

    /// Queue a CRLF-terminated line for the host to read.
    pub fn send_line(&self, line: &str) {
        let mut data = Vec::with_capacity(line.len() + 2);
        data.extend_from_slice(line.as_bytes());
        data.extend_from_slice(b"\r\n");
        self.send(&data);
    }

    /// Take everything the host has written so far.
    pub fn take_received(&self) -> Vec<u8> {
        lock(&self.pipe.state).to_target.drain(..).collect()
    }

    /// Wait up to `timeout` for host bytes, then take them.
    ///
    /// Returns `None` once the host has closed its end and nothing is left.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        let mut state = self
            .pipe
            .wait_for(timeout, |s| !s.to_target.is_empty() || s.host_closed);
        if state.to_target.is_empty() && state.host_closed {
            return None;
        }
        Some(state.to_target.drain(..).collect())
    }

    /// Simulate the board disconnecting.
    pub fn hang_up(&self) {
        lock(&self.pipe.state).target_closed = true;
        self.pipe.changed.notify_all();
    }

    /// Whether the host end has been closed.
    pub fn host_closed(&self) -> bool {
        lock(&self.pipe.state).host_closed
    }
}
