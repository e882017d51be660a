//! Native serial port implementation using the `serialport` crate.
//!
//! The Tiny Tapeout demo board's RP2040 enumerates as a USB CDC device, so
//! the baud rate is nominal; it is still configurable for boards wired
//! through a USB-UART bridge.

use {
    crate::{
        error::{Error, Result},
        port::{Port, PortReader, SerialConfig},
    },
    log::{debug, trace},
    serialport::SerialPort,
    std::io::{self, Write},
};

/// Serial port opened by name.
///
/// Only the write half is used directly; the read loop reads through a
/// handle from [`Port::try_clone_reader`].
pub struct NativePort {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        debug!("Opening {} at {} baud", config.port_name, config.baud_rate);
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .open()?;

        Ok(Self {
            port: Some(port),
            name: config.port_name.clone(),
        })
    }

    /// Open `port_name` at `baud_rate` with the default read timeout.
    pub fn open_simple(port_name: &str, baud_rate: u32) -> Result<Self> {
        Self::open(&SerialConfig::new(port_name, baud_rate))
    }

    fn handle(&mut self) -> io::Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "port closed"))
    }
}

impl Port for NativePort {
    fn name(&self) -> &str {
        &self.name
    }

    fn try_clone_reader(&self) -> Result<PortReader> {
        let port = self.port.as_ref().ok_or_else(|| {
            Error::Serial(serialport::Error::new(
                serialport::ErrorKind::NoDevice,
                "Port is closed",
            ))
        })?;
        trace!("Cloning read handle for {}", self.name);
        Ok(Box::new(port.try_clone()?))
    }

    fn close(&mut self) -> Result<()> {
        // The read handle keeps its own descriptor; it is dropped with the
        // read loop.
        if self.port.take().is_some() {
            debug!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.handle()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.handle()?.flush()
    }
}
