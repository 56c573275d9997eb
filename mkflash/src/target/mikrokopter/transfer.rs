//! Transfer of a single program block.

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::crc16_ccitt;
use crate::protocol::poll::{PollPolicy, read_response};
use crate::target::mikrokopter::protocol::{self, Command, OK};

/// Sends one block and waits for the device to acknowledge it.
///
/// Blocks are never resent; a rejected block ends the session.
pub struct BlockTransfer<'a, P: Port> {
    port: &'a mut P,
    policy: PollPolicy,
}

impl<'a, P: Port> BlockTransfer<'a, P> {
    /// Create a transfer over `port`.
    pub fn new(port: &'a mut P, policy: PollPolicy) -> Self {
        Self { port, policy }
    }

    /// Send block number `index` (zero based).
    ///
    /// `block` must already be padded to the device's block size.
    pub fn send(&mut self, index: usize, block: &[u8]) -> Result<()> {
        let crc = crc16_ccitt(block);
        let frame = protocol::program_block(block, crc);
        trace!(
            "Block {index}: {} bytes, CRC 0x{crc:04X}",
            block.len()
        );
        self.port.write_all_bytes(&frame)?;

        let reply = read_response(
            &mut *self.port,
            self.policy,
            Command::ProgramBlock.name(),
            1,
            1,
        )?;
        if reply[0] != OK {
            return Err(Error::BlockRejected {
                block: index,
                response: reply[0],
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;
    use std::time::Duration;

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_millis(50))
    }

    #[test]
    fn test_block_frame_and_ack() {
        let mut port = MockPort::new(&[OK]);
        BlockTransfer::new(&mut port, policy())
            .send(0, b"123456789")
            .unwrap();

        let mut expected = vec![b'B', 0x00, 0x09, b'F'];
        expected.extend_from_slice(b"123456789");
        expected.extend_from_slice(&[0x29, 0xB1]);
        assert_eq!(port.write_buf, expected);
    }

    #[test]
    fn test_block_rejected() {
        let mut port = MockPort::new(&[0x3F]);
        let err = BlockTransfer::new(&mut port, policy())
            .send(4, &[0; 8])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::BlockRejected {
                block: 4,
                response: 0x3F
            }
        ));
    }

    #[test]
    fn test_block_without_reply() {
        let mut port = MockPort::new(&[]);
        let err = BlockTransfer::new(&mut port, policy())
            .send(0, &[0; 8])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ResponseLength {
                request: "block programming",
                actual: 0,
                ..
            }
        ));
    }
}
