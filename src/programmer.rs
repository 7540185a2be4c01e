//! Flash programmer.
//!
//! Drives the SAM-BA monitor and flash controller to erase, write and verify
//! a firmware image, then selects flash as the boot source.

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;

use crate::eefc::{Eefc, FlashDescriptor};
use crate::samba::{SamBa, R_CIDR, R_EXID};
use crate::transport::Transport;
use crate::{Error, SerialPort};

/// Identity and memory map of a supported chip
#[derive(Clone, PartialEq, Debug)]
pub struct Target {
    pub name: &'static str,
    /// Chip identification register addresses
    pub cidr_addr: u32,
    pub exid_addr: u32,
    /// Expected identification values
    pub cidr: u32,
    pub exid: u32,
    /// Flash controller register base
    pub eefc_base: u32,
    /// Flash base address
    pub flash_base: u32,
    /// GPNVM bit selecting boot from flash
    pub boot_gpnvm: u32,
    /// Maximum status polls per flash command, `None` for no limit
    pub ready_poll_limit: Option<u32>,
}

impl Target {
    /// SAM4S microcontroller on the KiCon badge
    pub const KICON_BADGE: Target = Target {
        name: "KiCon badge",
        cidr_addr: R_CIDR,
        exid_addr: R_EXID,
        cidr: 0x2997_0CE0,
        exid: 0x0000_0000,
        eefc_base: 0x400E_0A00,
        flash_base: 0x0040_0000,
        boot_gpnvm: 1,
        ready_poll_limit: Some(100_000),
    };
}

impl Default for Target {
    fn default() -> Self {
        Self::KICON_BADGE
    }
}

/// Programming stage reported to the progress callback
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum Stage {
    Erasing,
    Writing,
    Verifying,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Erasing => "Erasing",
            Stage::Writing => "Writing",
            Stage::Verifying => "Verifying",
        };
        f.write_str(s)
    }
}

pub struct Programmer<P, D, E> {
    target: Target,
    eefc: Eefc<P, D, E>,
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: fmt::Debug,
{
    /// Connect to the monitor, check the chip identity and read the flash
    /// descriptor
    pub fn initialize(transport: Transport<P, D, E>, target: Target) -> Result<Self, Error<E>> {
        let mut samba = SamBa::new(transport);

        if !samba.enter_bootloader() {
            error!("Failed to enter bootloader mode");
            return Err(Error::BootloaderEntry);
        }

        let (cidr, exid) = samba.read_chip_id(target.cidr_addr, target.exid_addr)?;
        debug!("Chip ID: 0x{:08x} / 0x{:08x}", cidr, exid);

        if (cidr, exid) != (target.cidr, target.exid) {
            error!("Unrecognized chip, expected {}", target.name);
            return Err(Error::UnsupportedChip { cidr, exid });
        }

        let eefc = Eefc::open(
            samba,
            target.eefc_base,
            target.flash_base,
            target.ready_poll_limit,
        )?;

        Ok(Self { target, eefc })
    }

    /// Fetch the flash descriptor
    pub fn flash_info(&self) -> &FlashDescriptor {
        self.eefc.descriptor()
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    /// Write `image` to flash and make it the boot image
    ///
    /// `progress` is called with the stage, page index and page count before
    /// every sector erase, page write and page verify.
    pub fn program<F>(&mut self, image: &[u8], verify: bool, mut progress: F) -> Result<(), Error<E>>
    where
        F: FnMut(Stage, usize, usize),
    {
        let flash = self.eefc.descriptor().clone();

        if image.len() > flash.size as usize {
            error!("Image does not fit in flash");
            return Err(Error::ImageTooLarge {
                size: image.len(),
                capacity: flash.size as usize,
            });
        }

        let page_size = flash.page_size as usize;
        let page_count = flash.page_count(image.len());
        let pages_per_sector = flash.pages_per_sector as usize;

        info!(
            "Programming {} bytes ({} pages of {} bytes)",
            image.len(),
            page_count,
            page_size
        );

        self.eefc.unlock_all()?;

        for (page, chunk) in image.chunks(page_size).enumerate() {
            let addr = (page * page_size) as u32;

            if page % pages_per_sector == 0 {
                progress(Stage::Erasing, page, page_count);
                self.eefc.erase_sector(addr)?;
            }

            progress(Stage::Writing, page, page_count);
            self.eefc.write_page(addr, chunk)?;
        }

        if verify {
            for (page, chunk) in image.chunks(page_size).enumerate() {
                let addr = (page * page_size) as u32;

                progress(Stage::Verifying, page, page_count);
                let readback = self.eefc.read_page(addr)?;

                if &readback[..chunk.len()] != chunk {
                    let address = flash.base_addr + addr;
                    error!("Verification failed at 0x{:08x}", address);
                    return Err(Error::Verification { address });
                }
            }
        }

        // Boot from flash
        self.eefc.set_gpnvm(self.target.boot_gpnvm)?;

        info!("Programming complete");

        Ok(())
    }

    /// Jump to the start of flash
    pub fn run(&mut self) -> Result<(), Error<E>> {
        let base = self.eefc.descriptor().base_addr;
        self.eefc.samba_mut().go(base)
    }

    /// Release the transport
    pub fn into_transport(self) -> Transport<P, D, E> {
        self.eefc.into_samba().into_transport()
    }
}
