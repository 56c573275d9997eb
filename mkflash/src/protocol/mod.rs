//! Protocol building blocks shared by the bootloader session.

pub mod crc;
pub mod poll;

pub use crc::{Crc16, crc16_ccitt};
pub use poll::{PollPolicy, poll_until, read_response};
