//! Byte-stream transport over a serial port.
//!
//! Writes are blocking and flushed before returning. Reads poll the port until
//! exactly the requested number of bytes has been collected or the timeout
//! expires, sleeping between empty polls since the port may refuse immediate
//! reads.

use core::marker::PhantomData;
use std::time::{Duration, Instant};

use embedded_hal::blocking::delay::DelayMs;

use crate::{Error, Options, SerialPort};

/// Most bytes discarded by a single [`Transport::drain`]
pub const MAX_DRAIN: usize = 4096;

pub struct Transport<P, D, E> {
    port: P,
    delay: D,
    options: Options,
    _err: PhantomData<E>,
}

impl<P, D, E> Transport<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Create a new transport over an opened port
    pub fn new(port: P, delay: D, options: Options) -> Self {
        Self {
            port,
            delay,
            options,
            _err: PhantomData,
        }
    }

    /// Write raw bytes and flush the port
    pub fn send(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        trace!("tx: {:02x?}", data);

        for b in data {
            block!(self.port.write(*b))?;
        }
        block!(self.port.flush())?;

        Ok(())
    }

    /// Receive exactly `count` bytes using the configured response timeout
    pub fn recv(&mut self, count: usize) -> Result<Vec<u8>, Error<E>> {
        let timeout_ms = self.options.response_timeout_ms;
        self.recv_timeout(count, timeout_ms)
    }

    /// Receive exactly `count` bytes within `timeout_ms`
    ///
    /// Short reads are never returned, a partial response is reported as
    /// [`Error::Timeout`] and leaves the port in an undefined position.
    pub fn recv_timeout(&mut self, count: usize, timeout_ms: u32) -> Result<Vec<u8>, Error<E>> {
        let timeout = Duration::from_millis(timeout_ms as u64);
        let start = Instant::now();
        let mut buff = Vec::with_capacity(count);

        while buff.len() < count {
            match self.port.read() {
                Ok(v) => {
                    buff.push(v);
                    continue;
                }
                Err(nb::Error::WouldBlock) => (),
                // Drivers report transient conditions as errors, keep polling
                Err(nb::Error::Other(e)) => trace!("Read error: {:?}", e),
            }

            if start.elapsed() > timeout {
                debug!(
                    "Receive timeout ({} of {} bytes after {} ms)",
                    buff.len(),
                    count,
                    timeout_ms
                );
                return Err(Error::Timeout {
                    timeout_ms,
                    expected: count,
                    received: buff.len(),
                });
            }

            self.delay.delay_ms(self.options.poll_delay_ms);
        }

        trace!("rx: {:02x?}", buff);

        Ok(buff)
    }

    /// Discard bytes already waiting on the port
    ///
    /// Stops after [`MAX_DRAIN`] bytes so a device that keeps streaming
    /// cannot hold the caller forever.
    pub fn drain(&mut self) -> usize {
        let mut n = 0;
        while n < MAX_DRAIN && self.port.read().is_ok() {
            n += 1;
        }
        if n > 0 {
            debug!("Discarded {} stale bytes", n);
        }
        n
    }

    /// Block for the provided period
    pub fn delay_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    /// Release the underlying port and delay
    pub fn into_inner(self) -> (P, D) {
        (self.port, self.delay)
    }
}
