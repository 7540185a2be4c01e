//! Badge command protocol client.
//!
//! Each peripheral operation validates its arguments, frames a single command
//! and waits for the matching response. Argument checks happen before
//! anything is written, so a rejected call leaves the wire untouched.

use bitflags::bitflags;
use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::*;
use crate::transport::Transport;
use crate::{Error, SerialPort};

pub const LED1: u8 = 0;
pub const LED2: u8 = 1;

pub const BLACK: u8 = 0;
pub const WHITE: u8 = 1;

pub const LCD_WIDTH: u8 = 128;
pub const LCD_HEIGHT: u8 = 64;

/// Reset requests sent before giving up
pub const RESET_ATTEMPTS: u32 = 256;
/// Delay between reset requests
pub const RESET_INTERVAL_MS: u32 = 100;

/// SPI clock range in kHz
pub const SPI_CLOCK_KHZ_MIN: u16 = 1;
pub const SPI_CLOCK_KHZ_MAX: u16 = 60_000;

bitflags! {
    /// Pressed buttons
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Buttons: u8 {
        const RIGHT = 1;
        const LEFT = 2;
        const DOWN = 4;
        const UP = 8;
    }
}

/// Minimal big-endian encoding of an I2C register address
pub fn i2c_reg_addr(addr: u32) -> Vec<u8> {
    let bytes = addr.to_be_bytes();
    let skip = (addr.leading_zeros() / 8).min(3) as usize;
    bytes[skip..].to_vec()
}

pub struct Badge<P, D, E> {
    transport: Transport<P, D, E>,
    reset_interval_ms: u32,
}

impl<P, D, E> Badge<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(transport: Transport<P, D, E>) -> Self {
        Self {
            transport,
            reset_interval_ms: RESET_INTERVAL_MS,
        }
    }

    /// Override the delay between reset requests
    pub fn set_reset_interval(&mut self, ms: u32) {
        self.reset_interval_ms = ms;
    }

    /// Bring the device command buffer to a known state
    ///
    /// The reset request is repeated until the device acknowledges it, any
    /// partial command left in the device buffer is flushed out by the
    /// repeated requests.
    pub fn reset(&mut self) -> Result<(), Error<E>> {
        let ack = [1, ResponseType::Reset as u8, ResponseType::Reset as u8];

        for attempt in 1..=RESET_ATTEMPTS {
            self.transport.send(&[RESET_REQUEST])?;
            self.transport.delay_ms(self.reset_interval_ms);

            match self.transport.recv_timeout(ack.len(), self.reset_interval_ms) {
                Ok(v) if v == ack => {
                    debug!("Reset acknowledged after {} attempt(s)", attempt);
                    return Ok(());
                }
                Ok(v) => trace!("Unexpected reset response: {:02x?}", v),
                Err(Error::Timeout { .. }) => (),
                Err(e) => return Err(e),
            }

            self.transport.drain();
        }

        error!("No response after {} reset attempts", RESET_ATTEMPTS);
        Err(Error::ResetTimeout {
            attempts: RESET_ATTEMPTS,
        })
    }

    /// Send a command and decode the OK response with `decode`
    pub fn command<T>(
        &mut self,
        kind: CommandType,
        args: &[u8],
        decode: impl FnOnce(Vec<u8>) -> Result<T, Error<E>>,
    ) -> Result<T, Error<E>> {
        let mut payload = Vec::with_capacity(args.len() + 1);
        payload.push(kind as u8);
        payload.extend_from_slice(args);

        let frame = encode_frame::<E>(&payload)?;
        debug!("Command {:?} ({} bytes)", kind, payload.len());
        self.transport.send(&frame)?;

        let data = self.response()?.ok::<E>().map_err(|e| {
            if let Error::Device { code, .. } = &e {
                warn!(
                    "Command {:?} failed: {:?}",
                    kind,
                    ResponseType::from_u8(*code)
                );
            }
            e
        })?;

        decode(data)
    }

    fn response(&mut self) -> Result<Response, Error<E>> {
        let len = self.transport.recv(1)?[0] as usize;
        let body = self.transport.recv(len + 1)?;
        Response::parse(&body)
    }

    fn ack(&mut self, kind: CommandType, args: &[u8]) -> Result<(), Error<E>> {
        self.command(kind, args, |_| Ok(()))
    }

    pub fn lcd_clear(&mut self) -> Result<(), Error<E>> {
        self.ack(CommandType::Lcd, &[LcdCommand::Clear as u8])
    }

    /// Push the frame buffer to the display
    pub fn lcd_refresh(&mut self) -> Result<(), Error<E>> {
        self.ack(CommandType::Lcd, &[LcdCommand::Refresh as u8])
    }

    pub fn lcd_pixel(&mut self, x: u8, y: u8, val: u8) -> Result<(), Error<E>> {
        if x >= LCD_WIDTH || y >= LCD_HEIGHT {
            return Err(Error::InvalidArgument("pixel must be within the 128x64 display"));
        }
        self.ack(CommandType::Lcd, &[LcdCommand::Pixel as u8, x, y, val])
    }

    pub fn lcd_text(&mut self, row: u8, col: u8, text: &str) -> Result<(), Error<E>> {
        if !text.is_ascii() {
            return Err(Error::InvalidArgument("LCD text must be ASCII"));
        }
        if text.len() > MAX_PAYLOAD - 5 {
            return Err(Error::InvalidArgument("LCD text must be at most 250 characters"));
        }

        let mut args = vec![LcdCommand::Text as u8, row, col, text.len() as u8];
        args.extend_from_slice(text.as_bytes());
        self.ack(CommandType::Lcd, &args)
    }

    pub fn led_set(&mut self, led: u8, val: u8) -> Result<(), Error<E>> {
        Self::check_led(led)?;
        self.ack(CommandType::Led, &[LedCommand::Set as u8, led, val])
    }

    /// Toggle `led` every `period` timer ticks, 0 stops blinking
    pub fn led_blink(&mut self, led: u8, period: u8) -> Result<(), Error<E>> {
        Self::check_led(led)?;
        self.ack(CommandType::Led, &[LedCommand::Blink as u8, led, period])
    }

    pub fn buttons_state(&mut self) -> Result<Buttons, Error<E>> {
        self.command(CommandType::Btn, &[], |data| match data.first() {
            Some(b) => Ok(Buttons::from_bits_truncate(*b)),
            None => Err(Error::FrameLength {
                declared: 1,
                actual: 0,
            }),
        })
    }

    /// Write `data` to the badge UART and return what was received
    pub fn uart_transfer(&mut self, data: &[u8]) -> Result<Vec<u8>, Error<E>> {
        self.command(CommandType::Uart, data, Ok)
    }

    pub fn i2c_read(&mut self, dev_addr: u8, reg_addr: &[u8], len: usize) -> Result<Vec<u8>, Error<E>> {
        Self::check_reg_addr(reg_addr)?;
        if len > 255 {
            return Err(Error::InvalidArgument("I2C read length must be in range [0-255]"));
        }

        let mut args = vec![I2cCommand::Read as u8, dev_addr, reg_addr.len() as u8];
        args.extend_from_slice(reg_addr);
        args.push(len as u8);

        self.command(CommandType::I2c, &args, Ok)
    }

    pub fn i2c_write(&mut self, dev_addr: u8, reg_addr: &[u8], data: &[u8]) -> Result<(), Error<E>> {
        Self::check_reg_addr(reg_addr)?;
        if data.len() > 255 {
            return Err(Error::InvalidArgument("I2C write length must be in range [0-255]"));
        }

        let mut args = vec![I2cCommand::Write as u8, dev_addr, reg_addr.len() as u8];
        args.extend_from_slice(reg_addr);
        args.push(data.len() as u8);
        args.extend_from_slice(data);

        self.ack(CommandType::I2c, &args)
    }

    pub fn spi_config(&mut self, clock_khz: u16, mode: u8) -> Result<(), Error<E>> {
        if clock_khz < SPI_CLOCK_KHZ_MIN || clock_khz > SPI_CLOCK_KHZ_MAX {
            return Err(Error::InvalidArgument("SPI clock must be in range [1-60000] kHz"));
        }
        if mode > 3 {
            return Err(Error::InvalidArgument("SPI mode must be in range [0-3]"));
        }

        let clock = clock_khz.to_be_bytes();
        self.ack(
            CommandType::Spi,
            &[SpiCommand::Config as u8, clock[0], clock[1], mode],
        )
    }

    /// Full-duplex transfer, returns the bytes clocked in
    pub fn spi_transfer(&mut self, data: &[u8]) -> Result<Vec<u8>, Error<E>> {
        if data.len() > 255 {
            return Err(Error::InvalidArgument("SPI data length must be in range [0-255]"));
        }

        let mut args = vec![SpiCommand::Transfer as u8, data.len() as u8];
        args.extend_from_slice(data);

        self.command(CommandType::Spi, &args, Ok)
    }

    fn check_led(led: u8) -> Result<(), Error<E>> {
        match led {
            LED1 | LED2 => Ok(()),
            _ => Err(Error::InvalidArgument("invalid LED number")),
        }
    }

    fn check_reg_addr(reg_addr: &[u8]) -> Result<(), Error<E>> {
        if reg_addr.len() > 4 {
            return Err(Error::InvalidArgument(
                "I2C register address cannot be longer than 4 bytes",
            ));
        }
        Ok(())
    }

    pub fn into_transport(self) -> Transport<P, D, E> {
        self.transport
    }
}
