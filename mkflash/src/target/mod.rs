//! Target devices and the bootloader session that flashes them.

mod device;
pub mod mikrokopter;

#[cfg(feature = "native")]
pub use device::create_flasher;
pub use device::{DeviceKind, DeviceProfile, Flasher, SessionConfig, create_flasher_with_port};
