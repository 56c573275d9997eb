//! MikroKopter serial bootloader.
//!
//! Used by FlightCtrl (ATmega644/1284) and NaviCtrl (STR911) boards. See
//! [`protocol`] for the wire format and [`BootloaderSession`] for the
//! order in which commands are issued.

pub mod protocol;
mod session;
mod transfer;

pub use session::{BootloaderSession, SessionState};
pub use transfer::BlockTransfer;
