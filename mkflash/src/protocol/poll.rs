//! Bounded polling.
//!
//! Every wait in the bootloader session goes through [`poll_until`]: sleep
//! for the interval, try a step, and give up once the deadline has passed.
//! [`read_response`] builds the "collect between `min` and `max` reply
//! bytes" contract on top of it.

use std::thread;
use std::time::{Duration, Instant};

use log::trace;

use crate::error::{Error, Result};
use crate::port::Port;

/// Interval and deadline of a polling loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Sleep between attempts.
    pub interval: Duration,
    /// Total time budget.
    pub timeout: Duration,
}

impl PollPolicy {
    /// Create a policy.
    pub const fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollPolicy {
    /// 100 Hz for up to five seconds.
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(5))
    }
}

/// Run `step` until it yields a value or the policy's deadline passes.
///
/// Each round sleeps for `policy.interval` first. `Ok(None)` means the
/// deadline passed without a value. Errors from `step` end the loop
/// immediately.
pub fn poll_until<T, F>(policy: PollPolicy, mut step: F) -> Result<Option<T>>
where
    F: FnMut() -> Result<Option<T>>,
{
    let start = Instant::now();
    loop {
        thread::sleep(policy.interval);
        if let Some(value) = step()? {
            return Ok(Some(value));
        }
        if start.elapsed() >= policy.timeout {
            return Ok(None);
        }
    }
}

/// Collect a reply of `min..=max` bytes.
///
/// Reads until at least `min` bytes arrived or the deadline passed. Fewer
/// than `min` or more than `max` bytes is a [`Error::ResponseLength`].
pub fn read_response<P: Port>(
    port: &mut P,
    policy: PollPolicy,
    request: &'static str,
    min: usize,
    max: usize,
) -> Result<Vec<u8>> {
    let mut reply = Vec::with_capacity(max);
    let mut buf = [0u8; 64];

    let done = poll_until(policy, || {
        let n = port.read_available(&mut buf)?;
        reply.extend_from_slice(&buf[..n]);
        Ok((reply.len() >= min).then_some(()))
    })?;

    // Pick up anything that arrived together with the last byte we needed.
    if done.is_some() && reply.len() <= max {
        let n = port.read_available(&mut buf)?;
        reply.extend_from_slice(&buf[..n]);
    }

    trace!("Reply to '{request}': {reply:02X?}");

    if reply.len() < min || reply.len() > max {
        return Err(Error::ResponseLength {
            request,
            min,
            max,
            actual: reply.len(),
        });
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::MockPort;

    fn fast() -> PollPolicy {
        PollPolicy::new(Duration::from_millis(1), Duration::from_millis(30))
    }

    #[test]
    fn test_poll_until_returns_first_value() {
        let mut calls = 0;
        let value = poll_until(fast(), || {
            calls += 1;
            Ok((calls == 3).then_some(calls))
        })
        .unwrap();
        assert_eq!(value, Some(3));
    }

    #[test]
    fn test_poll_until_honours_deadline() {
        let policy = PollPolicy::new(Duration::from_millis(2), Duration::from_millis(40));
        let start = Instant::now();
        let value: Option<()> = poll_until(policy, || Ok(None)).unwrap();
        let elapsed = start.elapsed();

        assert!(value.is_none());
        assert!(elapsed >= Duration::from_millis(40));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_poll_until_stops_on_error() {
        let mut calls = 0;
        let result: Result<Option<()>> = poll_until(fast(), || {
            calls += 1;
            Err(Error::Unsupported("broken".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_read_response_exact() {
        let mut port = MockPort::new(&[0x74, 0x01]);
        let reply = read_response(&mut port, fast(), "signature", 2, 2).unwrap();
        assert_eq!(reply, vec![0x74, 0x01]);
    }

    #[test]
    fn test_read_response_accepts_range() {
        let mut port = MockPort::new(b"21");
        let reply = read_response(&mut port, fast(), "version", 2, 3).unwrap();
        assert_eq!(reply, b"21");
    }

    #[test]
    fn test_read_response_too_short() {
        let mut port = MockPort::new(&[0x74]);
        let err = read_response(&mut port, fast(), "signature", 2, 2).unwrap_err();
        assert!(matches!(
            err,
            Error::ResponseLength {
                request: "signature",
                min: 2,
                max: 2,
                actual: 1
            }
        ));
    }

    #[test]
    fn test_read_response_too_long() {
        let mut port = MockPort::new(&[0x0D, 0x0D, 0x0D]);
        let err = read_response(&mut port, fast(), "erase", 1, 1).unwrap_err();
        assert!(matches!(err, Error::ResponseLength { actual: 3, .. }));
    }

    #[test]
    fn test_read_response_silence() {
        let mut port = MockPort::new(&[]);
        let err = read_response(&mut port, fast(), "erase", 1, 1).unwrap_err();
        assert!(matches!(err, Error::ResponseLength { actual: 0, .. }));
    }
}
