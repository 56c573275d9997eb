//! Port abstraction for serial communication.
//!
//! The bootloader session only talks to the [`Port`] trait, so protocol code
//! can be driven by a real serial device or by an in-memory mock in tests.
//!
//! ```text
//! +---------------------+
//! |  BootloaderSession  |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |      Port trait     |
//! +----------+----------+
//!            |
//!            v
//! +----------+----------+
//! |     NativePort      |
//! |    (serialport)     |
//! +---------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use mkflash::port::Port;
//!
//! fn example<P: Port>(port: &mut P) -> mkflash::Result<()> {
//!     port.write_all_bytes(b"t")?;
//!
//!     let mut buf = [0u8; 32];
//!     let n = port.read_available(&mut buf)?;
//!     println!("Received: {:?}", &buf[..n]);
//!
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Baud rate spoken by the MikroKopter bootloader.
pub const BOOTLOADER_BAUD: u32 = 57_600;

/// Read timeout used for the underlying device.
///
/// Kept short so a read behaves like a non-blocking poll inside the
/// session's own wait loops.
pub const POLL_READ_TIMEOUT: Duration = Duration::from_millis(5);

/// Serial link settings.
///
/// The bootloader always talks 8N1 without flow control, so only the
/// port name, the baud rate and the driver read timeout are configurable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Driver read timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: POLL_READ_TIMEOUT,
        }
    }
}

/// Byte transport used by the bootloader session.
pub trait Port: Read + Write + Send {
    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release resources.
    ///
    /// After calling this method, the port cannot be used for further I/O.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Read whatever is pending without waiting for more.
    ///
    /// A read timeout counts as "nothing available" and yields `Ok(0)`;
    /// any other I/O failure is returned.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(0),
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(feature = "native")]
pub use native::NativePort;


#[cfg(test)]
mod tests {
    use super::mock::MockPort;
    use super::*;

    #[test]
    fn test_serial_config_defaults_to_poll_timeout() {
        let config = SerialConfig::new("COM3", BOOTLOADER_BAUD);
        assert_eq!(config.baud_rate, 57_600);
        assert_eq!(config.timeout, POLL_READ_TIMEOUT);
    }

    #[test]
    fn test_read_available_maps_timeout_to_zero() {
        let mut port = MockPort::new(&[]);
        let mut buf = [0u8; 4];
        assert_eq!(port.read_available(&mut buf).unwrap(), 0);

        port.read_buf.extend([1, 2]);
        assert_eq!(port.read_available(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[1, 2]);
    }

    #[test]
    fn test_read_available_propagates_hard_errors() {
        let mut port = MockPort::new(&[]);
        port.read_error = Some(std::io::ErrorKind::BrokenPipe);
        let mut buf = [0u8; 4];
        assert!(matches!(
            port.read_available(&mut buf),
            Err(crate::Error::Io(_))
        ));
    }
}
