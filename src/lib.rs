//! KiCon badge loader.
//!
//! Two protocol stacks share one serial [`transport::Transport`]:
//!
//! - the SAM-BA monitor ([`samba`]) driving the embedded flash controller
//!   ([`eefc`]), orchestrated by the flash [`programmer`];
//! - the framed badge command protocol ([`protocol`], [`badge`]) used to drive
//!   the badge peripherals once the firmware is running.
//!
//! A transport is owned by exactly one client at a time, and is released when
//! that client is dropped.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod badge;
pub mod eefc;
pub mod programmer;
pub mod protocol;
pub mod samba;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use badge::{Badge, Buttons};
pub use eefc::{Eefc, FlashDescriptor};
pub use programmer::{Programmer, Stage, Target};
pub use samba::SamBa;
pub use transport::Transport;

/// Byte-wide serial port usable as a transport
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Debug, thiserror::Error)]
pub enum Error<SerialError: core::fmt::Debug> {
    #[error("serial port error: {0:?}")]
    Serial(SerialError),

    #[error("serial interface timeout exceeded ({timeout_ms} ms, received {received} of {expected} bytes)")]
    Timeout {
        timeout_ms: u32,
        expected: usize,
        received: usize,
    },

    #[error("can't enter SAM-BA bootloader mode, did you forget to reset the board?")]
    BootloaderEntry,

    #[error("unrecognized chip ID: 0x{cidr:08x} / 0x{exid:08x}")]
    UnsupportedChip { cidr: u32, exid: u32 },

    #[error("write/erase error: at least one page is locked (status 0x{status:08x})")]
    FlashLocked { status: u32 },

    #[error("write/erase error: flash error (status 0x{status:08x})")]
    FlashWrite { status: u32 },

    #[error("flash controller rejected command (status 0x{status:08x})")]
    FlashCommand { status: u32 },

    #[error("flash controller not ready after {attempts} status polls")]
    FlashBusy { attempts: u32 },

    #[error("image size ({size} bytes) is larger than the flash size ({capacity} bytes)")]
    ImageTooLarge { size: usize, capacity: usize },

    #[error("verification failed: offending page 0x{address:08x}")]
    Verification { address: u32 },

    #[error("checksum error (expected 0x{computed:02x}, got 0x{received:02x})")]
    Checksum { computed: u8, received: u8 },

    #[error("frame length mismatch (declared {declared}, actual {actual})")]
    FrameLength { declared: usize, actual: usize },

    #[error("response != OK: code = 0x{code:02x}, data = \"{data}\"")]
    Device { code: u8, data: String },

    #[error("no response after reset ({attempts} attempts)")]
    ResetTimeout { attempts: u32 },

    #[error("implausible flash descriptor: {field} = {value}")]
    InvalidDescriptor { field: &'static str, value: u32 },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

impl<SerialError: core::fmt::Debug> From<SerialError> for Error<SerialError> {
    fn from(e: SerialError) -> Self {
        Self::Serial(e)
    }
}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout to wait for a complete response
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10000"))]
    pub response_timeout_ms: u32,

    /// Period to sleep between polls when no data is available
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "10"))]
    pub poll_delay_ms: u32,

    /// Serial port level read timeout
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "100"))]
    pub read_timeout_ms: u32,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 10_000,
            poll_delay_ms: 10,
            read_timeout_ms: 100,
        }
    }
}
