//! Device and session model for MikroKopter boards.
//!
//! The bootloader identifies the microcontroller by a one-byte signature.
//! Only the three controllers used on FlightCtrl and NaviCtrl boards are
//! supported; everything else is rejected before the flash is touched.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::image::ProgramImage;
#[cfg(feature = "native")]
use crate::port::SerialConfig;
use crate::port::{BOOTLOADER_BAUD, Port};
use crate::protocol::poll::PollPolicy;

/// Supported microcontrollers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum DeviceKind {
    /// ATmega644 on older FlightCtrl boards.
    Mega644,
    /// ATmega1284 on FlightCtrl boards.
    Mega1284,
    /// STR911 on NaviCtrl boards.
    Str911,
}

impl DeviceKind {
    /// Every supported device.
    pub const ALL: [Self; 3] = [Self::Mega644, Self::Mega1284, Self::Str911];

    /// Signature byte reported by the bootloader.
    #[must_use]
    pub const fn signature(self) -> u8 {
        match self {
            Self::Mega644 => 0x74,
            Self::Mega1284 => 0x7A,
            Self::Str911 => 0xE0,
        }
    }

    /// Look up a device by signature byte.
    pub fn from_signature(signature: u8) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.signature() == signature)
    }

    /// Get the device from a user-supplied name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "mega644" | "atmega644" | "m644" => Some(Self::Mega644),
            "mega1284" | "atmega1284" | "m1284" => Some(Self::Mega1284),
            "str911" | "str9" | "navictrl" => Some(Self::Str911),
            _ => None,
        }
    }

    /// Tag that firmware file names carry for this device.
    #[must_use]
    pub const fn image_tag(self) -> &'static str {
        match self {
            Self::Mega644 => "MEGA644",
            Self::Mega1284 => "MEGA1284",
            Self::Str911 => "STR9",
        }
    }

    /// Infer the target device from a firmware file name.
    ///
    /// MikroKopter releases are named like `Flight-Ctrl_MEGA1284p_V2_14b.hex`
    /// or `Navi-Ctrl_STR9_V2_14b.hex`.
    pub fn from_image_name(path: impl AsRef<Path>) -> Option<Self> {
        let name = path
            .as_ref()
            .file_name()?
            .to_string_lossy()
            .to_uppercase();
        Self::ALL
            .into_iter()
            .find(|kind| name.contains(kind.image_tag()))
    }

    /// Board the controller sits on.
    #[must_use]
    pub const fn board(self) -> &'static str {
        match self {
            Self::Mega644 | Self::Mega1284 => "FlightCtrl",
            Self::Str911 => "NaviCtrl",
        }
    }

    /// Whether the erase size has to be announced before erasing.
    #[must_use]
    pub const fn requires_erase_size(self) -> bool {
        matches!(self, Self::Str911)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mega644 => write!(f, "ATmega644"),
            Self::Mega1284 => write!(f, "ATmega1284"),
            Self::Str911 => write!(f, "STR911"),
        }
    }
}

/// What the bootloader told us about the connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeviceProfile {
    /// Raw signature byte.
    pub signature: u8,
    /// Decoded device.
    pub kind: DeviceKind,
    /// Bytes per program block; never zero.
    pub block_size: u16,
    /// Bootloader version, e.g. `"2.1"`.
    pub bootloader_version: String,
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} w/ {} (bootloader V{}, block size {})",
            self.kind.board(),
            self.kind,
            self.bootloader_version,
            self.block_size
        )
    }
}

/// Session timing and link parameters.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate of the link.
    pub baud: u32,
    /// How long to ping before giving up on the bootloader.
    pub discovery_timeout: Duration,
    /// Pause after the reset frame.
    pub reset_settle: Duration,
    /// Pause between the two ping bytes.
    pub ping_gap: Duration,
    /// Pause after the second ping byte before checking for a reply.
    pub ping_interval: Duration,
    /// Polling used when waiting for command replies.
    pub response: PollPolicy,
}

impl SessionConfig {
    /// Set the baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }

    /// Set the discovery timeout.
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the reply timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response.timeout = timeout;
        self
    }

    /// Use the same short delays everywhere; handy for mock transports.
    #[must_use]
    pub fn with_uniform_delay(mut self, delay: Duration) -> Self {
        self.reset_settle = delay;
        self.ping_gap = delay;
        self.ping_interval = delay;
        self.response.interval = delay;
        self
    }

    /// Reject settings the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.baud == 0 {
            return Err(Error::Config("baud rate must be non-zero".into()));
        }
        if self.discovery_timeout.is_zero() {
            return Err(Error::Config("discovery timeout must be non-zero".into()));
        }
        if self.response.timeout.is_zero() {
            return Err(Error::Config("response timeout must be non-zero".into()));
        }
        Ok(())
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud: BOOTLOADER_BAUD,
            discovery_timeout: Duration::from_secs(10),
            reset_settle: Duration::from_millis(50),
            ping_gap: Duration::from_millis(20),
            ping_interval: Duration::from_millis(80),
            response: PollPolicy::default(),
        }
    }
}

/// Flashing operations, independent of the transport.
pub trait Flasher {
    /// Find the bootloader and read the device profile.
    ///
    /// When `expected` is given, a different device is an error.
    fn connect(&mut self, expected: Option<DeviceKind>) -> Result<DeviceProfile>;

    /// Erase, program and leave the bootloader.
    ///
    /// `progress` receives `(blocks_done, blocks_total)`.
    fn flash_image(
        &mut self,
        image: &ProgramImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()>;

    /// Profile read by [`connect`](Self::connect).
    fn profile(&self) -> Option<&DeviceProfile>;

    /// Name of the underlying port.
    fn port_name(&self) -> &str;

    /// Release the port. Safe to call more than once.
    fn close(&mut self);
}

/// Open `port_name` and wrap it in a bootloader session.
#[cfg(feature = "native")]
pub fn create_flasher(port_name: &str, config: SessionConfig) -> Result<Box<dyn Flasher>> {
    config.validate()?;
    let serial = SerialConfig::new(port_name, config.baud);
    let port = crate::port::NativePort::open(&serial)?;
    create_flasher_with_port(port, config)
}

/// Wrap an already open port in a bootloader session.
pub fn create_flasher_with_port<P: Port + 'static>(
    port: P,
    config: SessionConfig,
) -> Result<Box<dyn Flasher>> {
    config.validate()?;
    Ok(Box::new(super::mikrokopter::BootloaderSession::new(
        port, config,
    )))
}
