//! Bootloader session state machine.
//!
//! A session walks through discovery, signature exchange, device setup,
//! erase and block transfer in that order:
//!
//! ```text
//! Idle -> Discovering -> SignatureExchange -> DeviceConfigured
//!      -> FlashCleared -> Transferring -> Complete
//! ```
//!
//! Any error moves the session to [`SessionState::Failed`], which is
//! terminal. The device identity is checked before anything is erased.
//!
//! ## Example
//!
//! ```rust,no_run
//! use mkflash::image::{HexOptions, ProgramImage};
//! use mkflash::port::{NativePort, SerialConfig};
//! use mkflash::target::SessionConfig;
//! use mkflash::target::mikrokopter::BootloaderSession;
//!
//! fn main() -> mkflash::Result<()> {
//!     let image = ProgramImage::from_file("Flight-Ctrl_MEGA1284p_V2_14b.hex", HexOptions::default())?;
//!     let port = NativePort::open(&SerialConfig::new("/dev/ttyUSB0", 57_600))?;
//!
//!     let mut session = BootloaderSession::new(port, SessionConfig::default());
//!     session.flash(&image, None, |done, total| println!("{done}/{total}"))?;
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::ProgramImage;
use crate::port::Port;
use crate::protocol::poll::{PollPolicy, poll_until, read_response};
use crate::target::mikrokopter::protocol::{
    self, BOOTLOADER_ID, Command, OK, PING_ESCAPE, PING_SYNC, RESET_FRAME, StreamMatcher,
};
use crate::target::mikrokopter::transfer::BlockTransfer;
use crate::target::{DeviceKind, DeviceProfile, Flasher, SessionConfig};

/// Largest erase size the 24-bit field can carry.
const MAX_ERASE_SIZE: u32 = 0x00FF_FFFF;

/// Where a session currently is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Nothing sent yet.
    Idle,
    /// Resetting the device and pinging for the bootloader.
    Discovering,
    /// Reading the device signature.
    SignatureExchange,
    /// Device selected; version and block size known.
    DeviceConfigured,
    /// Flash erased.
    FlashCleared,
    /// Blocks are being written.
    Transferring,
    /// Bootloader exited.
    Complete,
    /// Terminal failure with its reason.
    Failed(String),
}

impl SessionState {
    /// Whether no further steps are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed(_))
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Discovering => write!(f, "discovering"),
            Self::SignatureExchange => write!(f, "reading signature"),
            Self::DeviceConfigured => write!(f, "configured"),
            Self::FlashCleared => write!(f, "erased"),
            Self::Transferring => write!(f, "transferring"),
            Self::Complete => write!(f, "complete"),
            Self::Failed(reason) => write!(f, "failed ({reason})"),
        }
    }
}

/// One conversation with the bootloader.
///
/// Owns the port for its whole lifetime.
pub struct BootloaderSession<P: Port> {
    port: P,
    config: SessionConfig,
    state: SessionState,
    profile: Option<DeviceProfile>,
    matcher: StreamMatcher,
}

impl<P: Port> BootloaderSession<P> {
    /// Create a session over an open port.
    pub fn new(port: P, config: SessionConfig) -> Self {
        Self {
            port,
            config,
            state: SessionState::Idle,
            profile: None,
            matcher: StreamMatcher::new(BOOTLOADER_ID),
        }
    }

    /// Current state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Profile read during [`connect`](Self::connect).
    pub fn profile(&self) -> Option<&DeviceProfile> {
        self.profile.as_ref()
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Reset the device, wait for the bootloader and read its profile.
    ///
    /// With `expected` set, a different device fails the session before
    /// any command that changes the device is sent.
    pub fn connect(&mut self, expected: Option<DeviceKind>) -> Result<DeviceProfile> {
        self.require(&SessionState::Idle, "connect")?;
        self.guard(|session| {
            session.discover()?;
            let kind = session.read_signature(expected)?;
            session.configure(kind)
        })
    }

    /// Erase the flash.
    ///
    /// `erase_len` is announced to devices that need an explicit erase
    /// size; it should cover every block that will be written.
    pub fn erase(&mut self, erase_len: usize) -> Result<()> {
        self.require(&SessionState::DeviceConfigured, "erase")?;
        self.guard(|session| session.clear_flash(erase_len))
    }

    /// Write the image block by block, starting at address zero.
    ///
    /// `progress` receives `(blocks_done, blocks_total)` after each block.
    pub fn program<F>(&mut self, image: &ProgramImage, mut progress: F) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        self.require(&SessionState::FlashCleared, "program")?;
        self.guard(|session| session.transfer(image, &mut progress))
    }

    /// Leave the bootloader and start the new firmware.
    pub fn exit(&mut self) -> Result<()> {
        self.require(&SessionState::Transferring, "exit")?;
        self.guard(|session| {
            session.send(&Command::Exit.frame())?;
            session.transition(SessionState::Complete);
            info!("Flashing complete!");
            Ok(())
        })
    }

    /// Run every step: connect (unless already connected), erase, program
    /// and exit.
    pub fn flash<F>(
        &mut self,
        image: &ProgramImage,
        expected: Option<DeviceKind>,
        progress: F,
    ) -> Result<()>
    where
        F: FnMut(usize, usize),
    {
        if self.state == SessionState::Idle {
            self.connect(expected)?;
        } else if let Some(expected) = expected {
            self.require(&SessionState::DeviceConfigured, "flash")?;
            self.guard(|session| {
                let found = session.device_kind("flash")?;
                check_identity(Some(expected), found)
            })?;
        }
        let block_size = self.block_size("flash")?;
        let erase_len = image.padded_len(block_size)?;
        self.erase(erase_len)?;
        self.program(image, progress)?;
        self.exit()
    }

    fn require(&self, state: &SessionState, operation: &'static str) -> Result<()> {
        if &self.state != state {
            return Err(Error::InvalidState {
                operation,
                state: self.state.to_string(),
            });
        }
        Ok(())
    }

    fn guard<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let result = op(self);
        if let Err(ref e) = result {
            debug!("Session failed while {}: {e}", self.state);
            self.state = SessionState::Failed(e.to_string());
        }
        result
    }

    fn transition(&mut self, next: SessionState) {
        trace!("Session state: {} -> {next}", self.state);
        self.state = next;
    }

    fn block_size(&self, operation: &'static str) -> Result<u16> {
        self.profile
            .as_ref()
            .map(|profile| profile.block_size)
            .ok_or_else(|| Error::InvalidState {
                operation,
                state: self.state.to_string(),
            })
    }

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        trace!("TX {frame:02X?}");
        self.port.write_all_bytes(frame)
    }

    fn reply(&mut self, command: Command, min: usize, max: usize) -> Result<Vec<u8>> {
        read_response(&mut self.port, self.config.response, command.name(), min, max)
    }

    /// Send a frame and require the single-byte OK.
    fn expect_ok(&mut self, command: Command, frame: &[u8]) -> Result<()> {
        self.send(frame)?;
        let reply = self.reply(command, 1, 1)?;
        if reply[0] != OK {
            return Err(Error::UnexpectedResponse {
                request: command.name(),
                expected: OK,
                actual: reply[0],
            });
        }
        Ok(())
    }

    fn discover(&mut self) -> Result<()> {
        self.transition(SessionState::Discovering);

        info!("Sending device reset request");
        self.send(&RESET_FRAME)?;
        thread::sleep(self.config.reset_settle);

        info!("Waiting for MikroKopter bootloader on {}...", self.port.name());
        self.matcher.reset();

        let ping_gap = self.config.ping_gap;
        let ping_interval = self.config.ping_interval;
        let timeout = self.config.discovery_timeout;
        let port = &mut self.port;
        let matcher = &mut self.matcher;
        let start = Instant::now();
        let mut last_report = 0;
        let mut buf = [0u8; 255];

        let found = poll_until(PollPolicy::new(Duration::ZERO, timeout), || {
            port.write_all_bytes(&[PING_ESCAPE])?;
            thread::sleep(ping_gap);
            port.write_all_bytes(&[PING_SYNC])?;
            thread::sleep(ping_interval);

            let n = port.read_available(&mut buf)?;
            if n > 0 {
                trace!("RX {:02X?}", &buf[..n]);
            }

            let waited = start.elapsed().as_secs();
            if waited > last_report {
                last_report = waited;
                debug!("Still waiting for bootloader ({waited}s)");
            }
            // Bytes after the ID in the same read are dropped; the bootloader
            // sends nothing else until it gets a command.
            Ok(matcher.feed(&buf[..n]).then_some(()))
        })?;

        if found.is_none() {
            warn!("No response from the MikroKopter device");
            return Err(Error::NoResponse { timeout });
        }
        info!("Bootloader found after {:.1}s", start.elapsed().as_secs_f32());
        Ok(())
    }

    fn read_signature(&mut self, expected: Option<DeviceKind>) -> Result<DeviceKind> {
        self.transition(SessionState::SignatureExchange);

        self.send(&Command::ReadSignature.frame())?;
        let reply = self.reply(Command::ReadSignature, 2, 2)?;
        let signature = reply[0];
        let kind = DeviceKind::from_signature(signature)
            .ok_or(Error::UnsupportedDevice(signature))?;
        info!("{} w/ {kind}", kind.board());

        check_identity(expected, kind)?;
        Ok(kind)
    }

    fn configure(&mut self, kind: DeviceKind) -> Result<DeviceProfile> {
        self.expect_ok(
            Command::SetDevice,
            &protocol::set_device(kind.signature()),
        )?;

        self.send(&Command::ReadVersion.frame())?;
        let version = protocol::format_version(&self.reply(Command::ReadVersion, 2, 3)?);
        info!("MikroKopter bootloader V{version}");

        self.send(&Command::ReadBlockSize.frame())?;
        let reply = self.reply(Command::ReadBlockSize, 3, 3)?;
        let block_size =
            protocol::parse_block_size(&reply).ok_or(Error::UnexpectedResponse {
                request: Command::ReadBlockSize.name(),
                expected: protocol::BLOCK_SIZE_TAG,
                actual: reply[0],
            })?;
        if block_size == 0 {
            return Err(Error::InvalidBlockSize(block_size));
        }
        info!("Program block size: {block_size}");

        let profile = DeviceProfile {
            signature: kind.signature(),
            kind,
            block_size,
            bootloader_version: version,
        };
        self.profile = Some(profile.clone());
        self.transition(SessionState::DeviceConfigured);
        Ok(profile)
    }

    fn device_kind(&self, operation: &'static str) -> Result<DeviceKind> {
        self.profile
            .as_ref()
            .map(|profile| profile.kind)
            .ok_or_else(|| Error::InvalidState {
                operation,
                state: self.state.to_string(),
            })
    }

    fn clear_flash(&mut self, erase_len: usize) -> Result<()> {
        let kind = self.device_kind("erase")?;

        if kind.requires_erase_size() {
            let bytes = u32::try_from(erase_len)
                .ok()
                .filter(|bytes| *bytes <= MAX_ERASE_SIZE)
                .ok_or_else(|| {
                    Error::Unsupported(format!("erase size {erase_len} exceeds 24 bits"))
                })?;
            self.expect_ok(Command::SetEraseSize, &protocol::set_erase_size(bytes))?;
            info!("Requesting {bytes} bytes to be cleared");
        }

        info!("Erasing flash...");
        self.expect_ok(Command::Erase, &Command::Erase.frame())?;
        self.transition(SessionState::FlashCleared);
        Ok(())
    }

    fn transfer(
        &mut self,
        image: &ProgramImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        let block_size = self.block_size("program")?;
        let total = image.block_count(block_size)?;
        self.transition(SessionState::Transferring);

        self.expect_ok(Command::SetAddress, &protocol::set_address(0x0000))?;

        info!(
            "Programming {} bytes in {total} block(s) of {block_size}",
            image.total_bytes()
        );
        let policy = self.config.response;
        let mut transfer = BlockTransfer::new(&mut self.port, policy);
        for (index, block) in image.chunks(block_size)?.enumerate() {
            debug!("Programming block {} of {total}", index + 1);
            transfer.send(index, &block)?;
            progress(index + 1, total);
        }
        Ok(())
    }
}

/// Fail when the device that answered is not the one the image targets.
fn check_identity(expected: Option<DeviceKind>, found: DeviceKind) -> Result<()> {
    match expected {
        Some(expected) if expected != found => Err(Error::DeviceMismatch { expected, found }),
        _ => Ok(()),
    }
}

impl<P: Port> Flasher for BootloaderSession<P> {
    fn connect(&mut self, expected: Option<DeviceKind>) -> Result<DeviceProfile> {
        self.connect(expected)
    }

    fn flash_image(
        &mut self,
        image: &ProgramImage,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<()> {
        self.flash(image, None, |done, total| progress(done, total))
    }

    fn profile(&self) -> Option<&DeviceProfile> {
        self.profile()
    }

    fn port_name(&self) -> &str {
        self.port.name()
    }

    fn close(&mut self) {
        if let Err(e) = self.port.close() {
            debug!("Failed to close {}: {e}", self.port.name());
        }
    }
}
