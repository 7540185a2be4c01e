#[macro_use]
extern crate log;

extern crate structopt;
use structopt::StructOpt;

extern crate simplelog;
use simplelog::{Config, LevelFilter, SimpleLogger};

use indicatif::{ProgressBar, ProgressStyle};

use badge_loader::badge::i2c_reg_addr;
use badge_loader::{Badge, Options, Programmer, Stage, Target};

/// Hex encoded command line payload
#[derive(Clone, Debug)]
pub struct HexData(Vec<u8>);

impl std::str::FromStr for HexData {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        hex::decode(s).map(HexData)
    }
}

#[derive(Clone, Debug, StructOpt)]
pub struct Args {
    #[structopt(subcommand)]
    command: Command,

    /// Serial port to connect to
    #[structopt(long, default_value = "/dev/ttyACM0")]
    port: String,

    /// Serial port baud rate
    #[structopt(long, default_value = "115200")]
    baud: usize,

    #[structopt(flatten)]
    options: Options,

    /// Log level for console output
    #[structopt(long, default_value = "info")]
    log_level: LevelFilter,
}

#[derive(Clone, Debug, StructOpt)]
pub enum Command {
    /// Program a firmware image over SAM-BA and run it
    Program {
        /// Firmware binary
        firmware: String,

        /// Serial port, overrides --port
        device: Option<String>,

        /// Skip read-back verification
        #[structopt(long)]
        no_verify: bool,

        /// Do not jump to the new firmware
        #[structopt(long)]
        no_run: bool,
    },
    /// Print the chip and flash information
    Info,
    /// Drive the badge peripherals through the command interface
    Badge {
        #[structopt(subcommand)]
        cmd: BadgeCommand,
    },
}

#[derive(Clone, Debug, StructOpt)]
pub enum BadgeCommand {
    /// Reset the command interface
    Reset,
    /// Read the button state
    Buttons,
    LcdClear,
    LcdRefresh,
    LcdPixel { x: u8, y: u8, val: u8 },
    /// Draw text and refresh the display
    LcdText { row: u8, col: u8, text: String },
    Led { led: u8, val: u8 },
    Blink { led: u8, period: u8 },
    /// Transfer hex encoded data over the badge UART
    Uart { data: HexData },
    I2cRead {
        dev_addr: u8,
        reg_addr: u32,
        len: usize,
    },
    I2cWrite {
        dev_addr: u8,
        reg_addr: u32,
        data: HexData,
    },
    SpiConfig { clock_khz: u16, mode: u8 },
    SpiTransfer { data: HexData },
}

fn main() {
    // Parse out arguments
    let o = Args::from_args();

    // Configure logger
    let _ = SimpleLogger::init(o.log_level, Config::default());

    if let Err(e) = execute(o) {
        error!("{}", e);
        println!("Error occurred: {}", e);
        std::process::exit(-1);
    }
}

fn execute(o: Args) -> anyhow::Result<()> {
    match o.command.clone() {
        Command::Program {
            firmware,
            device,
            no_verify,
            no_run,
        } => {
            let port = device.unwrap_or_else(|| o.port.clone());
            program(&o, &port, &firmware, !no_verify, !no_run)
        }
        Command::Info => {
            info!("Connecting to bootloader");
            let p = Programmer::linux(&o.port, o.baud, o.options.clone(), Target::KICON_BADGE)?;

            println!("Chip: {}", p.target().name);
            println!("Flash {}", p.flash_info());
            println!("Lock regions: {}", p.flash_info().locks.len());
            Ok(())
        }
        Command::Badge { cmd } => badge(&o, cmd),
    }
}

fn program(o: &Args, port: &str, firmware: &str, verify: bool, run: bool) -> anyhow::Result<()> {
    info!("Connecting to bootloader");

    let mut p = Programmer::linux(port, o.baud, o.options.clone(), Target::KICON_BADGE)?;

    let capacity = p.flash_info().size as u64;
    let image = std::fs::read(firmware)
        .map_err(|e| anyhow::anyhow!("Can't load file: {} : {}", firmware, e))?;

    if image.len() as u64 > capacity {
        anyhow::bail!(
            "Image size in {} is larger than the Flash size of the microcontroller ({})",
            firmware,
            bytefmt::format(capacity)
        );
    }

    println!(
        "Programming: {} [{}]",
        firmware,
        bytefmt::format(image.len() as u64)
    );

    let bar = ProgressBar::new(0);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>10}: [{bar:50}] {pos}/{len}")
            .progress_chars("#> "),
    );

    p.program(&image, verify, |stage, n, total| {
        bar.set_length(total as u64);
        bar.set_message(&stage.to_string());
        bar.set_position(n as u64 + if stage == Stage::Erasing { 0 } else { 1 });
    })?;

    bar.finish_with_message("Done");

    if run {
        println!("Programming complete, running the program.");
        p.run()?;
    } else {
        println!("Programming complete.");
    }

    Ok(())
}

fn badge(o: &Args, cmd: BadgeCommand) -> anyhow::Result<()> {
    let mut b = Badge::linux(&o.port, o.baud, o.options.clone())?;

    b.reset()?;

    match cmd {
        BadgeCommand::Reset => info!("Command interface reset"),
        BadgeCommand::Buttons => println!("{:?}", b.buttons_state()?),
        BadgeCommand::LcdClear => {
            b.lcd_clear()?;
            b.lcd_refresh()?;
        }
        BadgeCommand::LcdRefresh => b.lcd_refresh()?,
        BadgeCommand::LcdPixel { x, y, val } => {
            b.lcd_pixel(x, y, val)?;
            b.lcd_refresh()?;
        }
        BadgeCommand::LcdText { row, col, text } => {
            b.lcd_text(row, col, &text)?;
            b.lcd_refresh()?;
        }
        BadgeCommand::Led { led, val } => b.led_set(led, val)?,
        BadgeCommand::Blink { led, period } => b.led_blink(led, period)?,
        BadgeCommand::Uart { data } => println!("{}", hex::encode(b.uart_transfer(&data.0)?)),
        BadgeCommand::I2cRead {
            dev_addr,
            reg_addr,
            len,
        } => {
            let data = b.i2c_read(dev_addr, &i2c_reg_addr(reg_addr), len)?;
            println!("{}", hex::encode(data));
        }
        BadgeCommand::I2cWrite {
            dev_addr,
            reg_addr,
            data,
        } => {
            b.i2c_write(dev_addr, &i2c_reg_addr(reg_addr), &data.0)?;
        }
        BadgeCommand::SpiConfig { clock_khz, mode } => b.spi_config(clock_khz, mode)?,
        BadgeCommand::SpiTransfer { data } => {
            println!("{}", hex::encode(b.spi_transfer(&data.0)?))
        }
    }

    Ok(())
}
