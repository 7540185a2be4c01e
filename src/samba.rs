//! SAM-BA monitor client.
//!
//! The ROM monitor speaks a terse ASCII protocol: a command letter, hex
//! arguments separated by commas and a `#` terminator. Only word accesses are
//! used, block reads are assembled from consecutive word reads.

use embedded_hal::blocking::delay::DelayMs;

use crate::transport::Transport;
use crate::{Error, SerialPort};

/// Switch the monitor to binary (non-interactive) mode
pub const CMD_NORMAL_MODE: &str = "N#";

/// Response to [`CMD_NORMAL_MODE`]
pub const NORMAL_MODE_ACK: [u8; 2] = [0x0a, 0x0d];

/// Chip identification register
pub const R_CIDR: u32 = 0x400E_0740;
/// Chip extended identification register
pub const R_EXID: u32 = 0x400E_0744;

pub struct SamBa<P, D, E> {
    transport: Transport<P, D, E>,
}

impl<P, D, E> SamBa<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(transport: Transport<P, D, E>) -> Self {
        Self { transport }
    }

    /// Put the monitor into normal mode
    ///
    /// Failing to enter the bootloader is expected (wrong mode, board not
    /// reset), so this reports success rather than an error.
    pub fn enter_bootloader(&mut self) -> bool {
        debug!("Entering SAM-BA normal mode");

        let r = self
            .transport
            .send(CMD_NORMAL_MODE.as_bytes())
            .and_then(|_| self.transport.recv(NORMAL_MODE_ACK.len()));

        match r {
            Ok(v) if v == NORMAL_MODE_ACK => true,
            Ok(v) => {
                debug!("Unexpected bootloader response: {:02x?}", v);
                false
            }
            Err(e) => {
                debug!("Bootloader did not respond: {}", e);
                false
            }
        }
    }

    /// Read a 32-bit word
    pub fn read_word(&mut self, addr: u32) -> Result<u32, Error<E>> {
        self.transport.send(format!("w{:08x},#", addr).as_bytes())?;
        let v = self.transport.recv(4)?;

        let value = u32::from_le_bytes([v[0], v[1], v[2], v[3]]);
        trace!("read_word 0x{:08x}: 0x{:08x}", addr, value);

        Ok(value)
    }

    /// Write a 32-bit word, the monitor does not acknowledge writes
    pub fn write_word(&mut self, addr: u32, value: u32) -> Result<(), Error<E>> {
        trace!("write_word 0x{:08x}: 0x{:08x}", addr, value);
        self.transport
            .send(format!("W{:08x},{:08x}#", addr, value).as_bytes())
    }

    /// Read `size` bytes word by word
    pub fn read_block(&mut self, addr: u32, size: usize) -> Result<Vec<u8>, Error<E>> {
        let words = (size + 3) / 4;
        let mut data = Vec::with_capacity(words * 4);

        for n in 0..words {
            let value = self.read_word(addr + n as u32 * 4)?;
            data.extend_from_slice(&value.to_le_bytes());
        }
        data.truncate(size);

        Ok(data)
    }

    /// Jump to `addr`, no response is expected
    pub fn go(&mut self, addr: u32) -> Result<(), Error<E>> {
        debug!("Jumping to 0x{:08x}", addr);
        self.transport.send(format!("G{:08x}#", addr).as_bytes())
    }

    /// Read the (CIDR, EXID) identification pair
    pub fn read_chip_id(&mut self, cidr_addr: u32, exid_addr: u32) -> Result<(u32, u32), Error<E>> {
        let cidr = self.read_word(cidr_addr)?;
        let exid = self.read_word(exid_addr)?;
        Ok((cidr, exid))
    }

    pub fn into_transport(self) -> Transport<P, D, E> {
        self.transport
    }
}
