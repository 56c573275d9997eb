//! # mkflash
//!
//! A library for flashing MikroKopter flight controllers through their
//! serial bootloader.
//!
//! This crate provides:
//!
//! - Intel HEX parsing into a contiguous program image
//! - CRC16-CCITT block checksums
//! - The bootloader session (discovery, device setup, erase, block transfer)
//! - USB-to-serial bridge detection
//!
//! ## Supported Devices
//!
//! - FlightCtrl with ATmega644 or ATmega1284
//! - NaviCtrl with STR911
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for data types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mkflash::{DeviceKind, HexOptions, ProgramImage, SessionConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = ProgramImage::from_file("Flight-Ctrl_MEGA1284p_V2_00a.hex", HexOptions::default())?;
//!     let expected = DeviceKind::from_image_name(image.source());
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = mkflash::create_flasher("/dev/ttyUSB0", SessionConfig::default())?;
//!         let profile = flasher.connect(expected)?;
//!         println!("Connected to {profile}");
//!
//!         flasher.flash_image(&image, &mut |current, total| {
//!             println!("Block {current}/{total}");
//!         })?;
//!         flasher.close();
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;
pub mod target;

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::NativePort;
#[cfg(feature = "native")]
pub use target::create_flasher;
pub use {
    device::{
        BridgeKind, DetectedPort, auto_detect_port, best_port, detect_ports,
    },
    error::{Error, Result},
    image::{HexOptions, HexRecord, ProgramImage, RecordType},
    port::{Port, SerialConfig},
    protocol::{Crc16, PollPolicy, crc16_ccitt},
    target::{
        DeviceKind, DeviceProfile, Flasher, SessionConfig, create_flasher_with_port,
        mikrokopter::{BootloaderSession, SessionState},
    },
};
