//! Protocol engine for a Tiny Tapeout board shell.
//!
//! [`TtBoardDevice`] owns the transport. A background read loop frames
//! incoming lines, keeps the [`SessionStore`] up to date and publishes each
//! line to the [`LineDispatcher`]; the calling thread drives the handshake,
//! commands and flash programming.
//!
//! ## Handshake
//!
//! ```text
//! Disconnected ──open──► AwaitingPrompt ──booted──► BootWait ──┐
//!                             │                                │
//!                             └───────────────► RawReplEntry ◄─┘
//!                                                    │
//!                                              RawReplActive ──close──► Closed
//! ```
//!
//! Version detection is best effort: if the board never answers the version
//! query it is soft-reset, and the shell ends up in raw REPL mode either way.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::dispatch::{LineDispatcher, LineSubscription, LineWaiter};
use crate::error::{Error, Result};
use crate::lock;
use crate::port::{Port, PortReader};
use crate::protocol::framer::{DEFAULT_CHUNK_SIZE, FramedLines};
use crate::protocol::repl::{
    self, BOOT_SENTINEL, DEFAULT_NAMESPACE, Status, clean_raw_repl, control, parse_status,
};
use crate::protocol::sector::{self, FirmwareImage, FlashOptions, ShellLink};
use crate::session::{LogEntry, SessionState, SessionStore};
use crate::writer::ModeWriter;

/// Handshake timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandshakeConfig {
    /// Time allowed for the first version answer.
    pub version_wait: Duration,
    /// Step between version checks while the board boots.
    pub poll_interval: Duration,
    /// Number of steps to wait for a booting board.
    pub boot_poll_attempts: u32,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            version_wait: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            boot_poll_attempts: 60,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Prefix of recognised status keys (`<ns>.sdk_version`).
    pub status_namespace: String,
    /// Handshake timing.
    pub handshake: HandshakeConfig,
    /// Largest read performed by the read loop.
    pub read_chunk_size: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            status_namespace: DEFAULT_NAMESPACE.to_string(),
            handshake: HandshakeConfig::default(),
            read_chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl DeviceConfig {
    /// Set the status key namespace.
    #[must_use]
    pub fn with_status_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.status_namespace = namespace.into();
        self
    }

    /// Set the handshake timing.
    #[must_use]
    pub fn with_handshake(mut self, handshake: HandshakeConfig) -> Self {
        self.handshake = handshake;
        self
    }

    /// Set the read chunk size.
    #[must_use]
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size;
        self
    }
}

/// Initialization payloads sent after entering raw REPL mode.
///
/// Both are sent verbatim, each followed by end-of-transmission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellScripts {
    /// Board setup script.
    pub setup: String,
    /// Script providing the `flash` programming helpers.
    pub flashing: String,
}

impl ShellScripts {
    /// Bundle the two payloads.
    pub fn new(setup: impl Into<String>, flashing: impl Into<String>) -> Self {
        Self {
            setup: setup.into(),
            flashing: flashing.into(),
        }
    }
}

/// Handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Port not opened yet, or the handshake has not started.
    Disconnected,
    /// Prompt and version requested.
    AwaitingPrompt,
    /// Board is booting; waiting for its version.
    BootWait,
    /// Entering raw REPL and sending the init scripts.
    RawReplEntry,
    /// Raw REPL with init scripts loaded.
    RawReplActive,
    /// Session closed (explicitly or by the transport).
    Closed,
}

type CloseListener = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CloseSignalState {
    fired: bool,
    listeners: Vec<CloseListener>,
}

/// One-shot closed/disconnected notification.
#[derive(Default)]
struct CloseSignal {
    state: Mutex<CloseSignalState>,
}

impl CloseSignal {
    fn subscribe(&self, listener: CloseListener) {
        let mut state = lock(&self.state);
        if state.fired {
            drop(state);
            listener();
        } else {
            state.listeners.push(listener);
        }
    }

    fn fire(&self) {
        let listeners = {
            let mut state = lock(&self.state);
            if state.fired {
                return;
            }
            state.fired = true;
            std::mem::take(&mut state.listeners)
        };
        for listener in listeners {
            listener();
        }
    }

    fn fired(&self) -> bool {
        lock(&self.state).fired
    }
}

/// State shared between the engine and its read loop.
struct LineProcessor {
    session: Arc<SessionStore>,
    dispatcher: LineDispatcher,
    namespace: String,
}

impl LineProcessor {
    fn process_line(&self, raw: &str) {
        let line = clean_raw_repl(raw);
        trace!("<< {line:?}");
        self.session.push_log(LogEntry::received(line.as_str()));

        if line.starts_with(BOOT_SENTINEL) {
            debug!("Boot banner: {line}");
            self.session.set_booted();
            return;
        }

        match parse_status(line.trim(), &self.namespace) {
            Some(Status::SdkVersion(version)) => {
                info!("Shell version: {version}");
                self.session.set_shell_version(version);
            },
            Some(Status::FlashId(flash_id)) => {
                info!("Flash id: {flash_id}");
                self.session.set_flash_id(flash_id);
            },
            None => {},
        }

        self.dispatcher.dispatch(&line);
    }
}

fn run_read_loop(
    reader: PortReader,
    chunk_size: usize,
    processor: &LineProcessor,
    stop: &AtomicBool,
) {
    for item in FramedLines::with_chunk_size(reader, chunk_size) {
        if stop.load(Ordering::Relaxed) {
            return;
        }
        match item {
            Ok(line) => processor.process_line(&line),
            Err(ref e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                ) => {},
            Err(e) => {
                error!("Serial read failed: {e}");
                return;
            },
        }
    }
    debug!("Serial stream ended");
}

/// Protocol engine bound to one open transport.
pub struct TtBoardDevice<P: Port> {
    name: String,
    config: DeviceConfig,
    writer: Mutex<ModeWriter<P>>,
    session: Arc<SessionStore>,
    dispatcher: LineDispatcher,
    phase: Arc<Mutex<SessionPhase>>,
    close_signal: Arc<CloseSignal>,
    stop: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl<P: Port> TtBoardDevice<P> {
    /// Take ownership of `port` and start the read loop.
    pub fn open(port: P, config: DeviceConfig) -> Result<Self> {
        let name = port.name().to_string();
        let reader = port.try_clone_reader()?;

        let session = Arc::new(SessionStore::new());
        let dispatcher = LineDispatcher::new();
        let phase = Arc::new(Mutex::new(SessionPhase::Disconnected));
        let close_signal = Arc::new(CloseSignal::default());
        let stop = Arc::new(AtomicBool::new(false));

        let processor = LineProcessor {
            session: Arc::clone(&session),
            dispatcher: dispatcher.clone(),
            namespace: config.status_namespace.clone(),
        };
        let chunk_size = config.read_chunk_size;
        let loop_stop = Arc::clone(&stop);
        let loop_phase = Arc::clone(&phase);
        let loop_close = Arc::clone(&close_signal);

        let handle = thread::Builder::new()
            .name(format!("ttflash-read-{name}"))
            .spawn(move || {
                run_read_loop(reader, chunk_size, &processor, &loop_stop);
                if !loop_stop.load(Ordering::Relaxed) {
                    *lock(&loop_phase) = SessionPhase::Closed;
                    loop_close.fire();
                }
                // Signal first: a waiter woken with Closed sees is_closed()
                processor.dispatcher.shutdown();
            })?;

        debug!("Opened {name}");
        Ok(Self {
            name,
            config,
            writer: Mutex::new(ModeWriter::new(port)),
            session,
            dispatcher,
            phase,
            close_signal,
            stop,
            reader: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
        })
    }

    /// Transport name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Engine settings.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Snapshot of the session state.
    pub fn session(&self) -> SessionState {
        self.session.snapshot()
    }

    /// Observable session store.
    pub fn session_store(&self) -> &SessionStore {
        &self.session
    }

    /// Current handshake phase.
    pub fn phase(&self) -> SessionPhase {
        *lock(&self.phase)
    }

    fn set_phase(&self, phase: SessionPhase) {
        let mut current = lock(&self.phase);
        if *current != phase {
            debug!("Session phase {:?} -> {phase:?}", *current);
            *current = phase;
        }
    }

    /// Register a listener for the closed/disconnected signal.
    ///
    /// Runs at most once; immediately if the session is already closed.
    pub fn on_close<F>(&self, listener: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.close_signal.subscribe(Box::new(listener));
    }

    /// Whether the closed signal has been emitted.
    pub fn is_closed(&self) -> bool {
        self.close_signal.fired()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) || self.close_signal.fired() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    /// Write text on the text channel.
    pub fn write_text(&self, text: &str) -> Result<()> {
        self.ensure_open()?;
        trace!(">> {text:?}");
        lock(&self.writer).write_text(text)
    }

    /// Write raw bytes on the binary channel.
    pub fn write_binary(&self, data: &[u8]) -> Result<()> {
        self.ensure_open()?;
        trace!(">> {} raw bytes", data.len());
        lock(&self.writer).write_binary(data)
    }

    /// Send `command` followed by end-of-transmission.
    ///
    /// With `log` set the command is recorded as a sent log entry first.
    pub fn send_command(&self, command: &str, log: bool) -> Result<()> {
        self.ensure_open()?;
        if log {
            self.session.push_log(LogEntry::sent(command));
        }
        self.write_text(&format!("{command}{}", char::from(control::EOT)))
    }

    /// Resolve with the first later line satisfying `predicate`.
    ///
    /// Dropping the returned waiter cancels it.
    pub fn wait_until<F>(&self, predicate: F) -> LineWaiter
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        self.dispatcher.wait_until(predicate)
    }

    /// Receive every later line satisfying `predicate`.
    pub fn subscribe_lines<F>(&self, predicate: F) -> LineSubscription
    where
        F: Fn(&str) -> bool + Send + 'static,
    {
        self.dispatcher.subscribe(predicate)
    }

    /// Bring the board shell into raw REPL mode and load `scripts`.
    ///
    /// Write failures are returned; a board that never reports its version
    /// is not an error.
    pub fn start(&self, scripts: &ShellScripts) -> Result<()> {
        self.ensure_open()?;
        let timing = self.config.handshake;
        self.set_phase(SessionPhase::AwaitingPrompt);

        if self.session.shell_version().is_none() {
            self.write_text("\n")?;
            self.write_text(&repl::version_query(&self.config.status_namespace))?;
            thread::sleep(timing.version_wait);
        }

        if self.session.booted() {
            self.set_phase(SessionPhase::BootWait);
            for _ in 0..timing.boot_poll_attempts {
                thread::sleep(timing.poll_interval);
                if self.session.shell_version().is_some() {
                    break;
                }
            }
        }

        if self.session.shell_version().is_none() {
            warn!("No version reply from {}, resetting the shell", self.name);
            self.write_text(control::EXIT_SEQUENCE)?;
            self.write_text(control::SOFT_RESET)?;
        }

        self.set_phase(SessionPhase::RawReplEntry);
        self.write_text(control::ENTER_SEQUENCE)?;
        let eot = char::from(control::EOT);
        self.write_text(&format!("{}{eot}", scripts.setup))?;
        self.write_text(&format!("{}{eot}", scripts.flashing))?;
        self.set_phase(SessionPhase::RawReplActive);

        match self.session.shell_version() {
            Some(version) => info!("Board shell ready on {} (SDK {version})", self.name),
            None => info!("Board shell ready on {} (SDK version unknown)", self.name),
        }
        Ok(())
    }

    /// Program `payload` at `offset`, reporting `(written, total)` per acknowledgment.
    pub fn program_flash(
        &self,
        offset: u32,
        payload: &[u8],
        on_progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.program_flash_with(offset, payload, FlashOptions::default(), on_progress)
    }

    /// [`Self::program_flash`] with explicit options.
    pub fn program_flash_with(
        &self,
        offset: u32,
        payload: &[u8],
        options: FlashOptions,
        on_progress: impl FnMut(usize, usize),
    ) -> Result<()> {
        self.ensure_open()?;
        sector::program_flash(self, offset, payload, options, on_progress)
    }

    /// Program several files in order; see [`sector::program_images`].
    pub fn program_images(
        &self,
        images: &[FirmwareImage],
        progress: impl FnMut(&str, usize, usize),
    ) -> Result<()> {
        self.ensure_open()?;
        sector::program_images(self, images, progress)
    }

    fn stop_reader(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = lock(&self.reader).take() {
            // Called from a close listener on the read loop itself
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("Read loop for {} panicked", self.name);
            }
        }
    }

    /// Leave raw REPL mode, close the transport and emit the closed signal.
    ///
    /// Calling it again is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        debug!("Closing {}", self.name);
        self.dispatcher.shutdown();
        self.stop_reader();

        if let Err(e) = lock(&self.writer).write_text(control::EXIT_SEQUENCE) {
            warn!("Failed to leave raw REPL mode on {}: {e}", self.name);
        }

        let result = {
            let mut writer = lock(&self.writer);
            let drained = writer.close_channel();
            let closed = writer.get_mut().close();
            drained.and(closed)
        };

        self.set_phase(SessionPhase::Closed);
        self.close_signal.fire();
        result
    }
}

impl<P: Port> ShellLink for TtBoardDevice<P> {
    fn send_command(&self, command: &str, log: bool) -> Result<()> {
        TtBoardDevice::send_command(self, command, log)
    }

    fn write_binary(&self, data: &[u8]) -> Result<()> {
        TtBoardDevice::write_binary(self, data)
    }

    fn subscribe_lines(&self, predicate: Box<dyn Fn(&str) -> bool + Send>) -> LineSubscription {
        self.dispatcher.subscribe(predicate)
    }
}

impl<P: Port> Drop for TtBoardDevice<P> {
    fn drop(&mut self) {
        self.stop_reader();
    }
}
