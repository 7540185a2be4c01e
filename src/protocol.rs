//! Badge command protocol framing.
//!
//! ```text
//! offset | description
//! -------+------------
//!      0 | payload length (1..=255), a lone 0x00 requests a reset
//!      1 | command or response type        \__ payload
//!  2..=n | type specific data               /
//!    n+1 | checksum (payload bytes xored together)
//! ```
//!
//! Multi-byte fields inside the payload are big-endian.

use crate::Error;

/// Largest payload (type + data) a frame can carry
pub const MAX_PAYLOAD: usize = 255;

/// Out-of-band reset request, sent without framing
pub const RESET_REQUEST: u8 = CommandType::Reset as u8;

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum CommandType {
    /// Reset the command buffer
    Reset = 0x00,
    /// Pass data through the badge UART
    Uart = 0x01,
    I2c = 0x02,
    Spi = 0x03,
    /// Not handled by the firmware
    Pio = 0x04,
    Led = 0x05,
    Lcd = 0x06,
    /// Read the button state
    Btn = 0x07,
    /// Not handled by the firmware
    Adc = 0x08,
    /// Not handled by the firmware
    Dac = 0x09,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ResponseType {
    /// Command is incomplete
    Null = 0x00,
    /// Command buffer reset
    Reset = 0x01,
    /// Command executed successfully
    Ok = 0x02,
    InvalidCmd = 0x03,
    /// Command buffer overflow
    Overflow = 0x04,
    /// Incorrect checksum
    CrcErr = 0x05,
}

impl ResponseType {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Self::Null),
            0x01 => Some(Self::Reset),
            0x02 => Some(Self::Ok),
            0x03 => Some(Self::InvalidCmd),
            0x04 => Some(Self::Overflow),
            0x05 => Some(Self::CrcErr),
            _ => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum LcdCommand {
    Clear = 0x00,
    Refresh = 0x01,
    Pixel = 0x02,
    Text = 0x03,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum LedCommand {
    Set = 0x00,
    Blink = 0x01,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum I2cCommand {
    Read = 0x00,
    Write = 0x01,
}

#[derive(Debug, PartialEq, Clone, Copy)]
pub enum SpiCommand {
    Config = 0x00,
    Transfer = 0x01,
}

/// XOR of all bytes
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0, |crc, b| crc ^ b)
}

/// Frame a payload (type + data)
pub fn encode_frame<E: core::fmt::Debug>(payload: &[u8]) -> Result<Vec<u8>, Error<E>> {
    if payload.is_empty() {
        return Err(Error::InvalidArgument("frame payload must not be empty"));
    }
    if payload.len() > MAX_PAYLOAD {
        return Err(Error::InvalidArgument("frame payload must be at most 255 bytes"));
    }

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(payload));

    Ok(frame)
}

/// Decoded response frame
#[derive(Debug, PartialEq, Clone)]
pub struct Response {
    pub kind: u8,
    pub data: Vec<u8>,
}

impl Response {
    /// Parse a response body (payload + checksum) following its length byte
    pub fn parse<E: core::fmt::Debug>(body: &[u8]) -> Result<Self, Error<E>> {
        let (received, payload) = match body.split_last() {
            Some((c, p)) if !p.is_empty() => (*c, p),
            _ => {
                return Err(Error::FrameLength {
                    declared: body.len().saturating_sub(1),
                    actual: 0,
                })
            }
        };

        let computed = checksum(payload);
        if computed != received {
            return Err(Error::Checksum { computed, received });
        }

        Ok(Self {
            kind: payload[0],
            data: payload[1..].to_vec(),
        })
    }

    /// Fail unless the device reported success
    pub fn ok<E: core::fmt::Debug>(self) -> Result<Vec<u8>, Error<E>> {
        if self.kind != ResponseType::Ok as u8 {
            return Err(Error::Device {
                code: self.kind,
                data: hex::encode(&self.data),
            });
        }
        Ok(self.data)
    }
}

/// Decode a complete frame, including its length byte
pub fn decode_frame<E: core::fmt::Debug>(frame: &[u8]) -> Result<Response, Error<E>> {
    let (len, body) = match frame.split_first() {
        Some((l, b)) => (*l as usize, b),
        None => {
            return Err(Error::FrameLength {
                declared: 0,
                actual: 0,
            })
        }
    };

    if body.len() != len + 1 {
        return Err(Error::FrameLength {
            declared: len,
            actual: body.len().saturating_sub(1),
        });
    }

    Response::parse(body)
}
