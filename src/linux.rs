use std::io::ErrorKind as IoErrorKind;
use std::path::Path;
use std::time::Duration;

use linux_embedded_hal::serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};
use linux_embedded_hal::{Delay, Serial};

use crate::{Badge, Error, Options, Programmer, Target, Transport};

impl Transport<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port transport, 8N1 without flow control
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;
        port.0
            .set_timeout(Duration::from_millis(options.read_timeout_ms as u64))?;

        // Return instance
        Ok(Self::new(port, Delay {}, options))
    }
}

impl Programmer<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port and initialise the programmer
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
        target: Target,
    ) -> Result<Self, Error<IoErrorKind>> {
        let transport = Transport::linux(port, baud, options).map_err(|e| {
            error!("Error opening serial port: {}", e);
            Error::Serial(std::io::Error::from(e).kind())
        })?;

        Self::initialize(transport, target)
    }
}

impl Badge<Serial, Delay, IoErrorKind> {
    /// Open a linux serial port badge client
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        options: Options,
    ) -> Result<Self, SerialError> {
        Ok(Self::new(Transport::linux(port, baud, options)?))
    }
}
