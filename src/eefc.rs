//! Enhanced Embedded Flash Controller (EEFC) driver.
//!
//! Every controller command is a write to the command register followed by
//! polling the status register until the ready bit is set. Results are then
//! read one word at a time from the result register.

use core::fmt;

use embedded_hal::blocking::delay::DelayMs;

use crate::samba::SamBa;
use crate::{Error, SerialPort};

/// Flash mode register offset
pub const EEFC_FMR: u32 = 0x00;
/// Flash command register offset
pub const EEFC_FCR: u32 = 0x04;
/// Flash status register offset
pub const EEFC_FSR: u32 = 0x08;
/// Flash result register offset
pub const EEFC_FRR: u32 = 0x0c;

/// Key required in the top byte of every command register write
pub const EEFC_FKEY: u32 = 0x5a << 24;

/// Get flash descriptor
pub const EEFC_FCMD_GETD: u8 = 0x00;
/// Write page
pub const EEFC_FCMD_WP: u8 = 0x01;
/// Write page and lock
pub const EEFC_FCMD_WPL: u8 = 0x02;
/// Erase page and write page
pub const EEFC_FCMD_EWP: u8 = 0x03;
/// Erase page and write page then lock
pub const EEFC_FCMD_EWPL: u8 = 0x04;
/// Erase all
pub const EEFC_FCMD_EA: u8 = 0x05;
/// Erase pages
pub const EEFC_FCMD_EPA: u8 = 0x07;
/// Set lock bit
pub const EEFC_FCMD_SLB: u8 = 0x08;
/// Clear lock bit
pub const EEFC_FCMD_CLB: u8 = 0x09;
/// Get lock bit
pub const EEFC_FCMD_GLB: u8 = 0x0A;
/// Set GPNVM bit
pub const EEFC_FCMD_SGPB: u8 = 0x0B;
/// Clear GPNVM bit
pub const EEFC_FCMD_CGPB: u8 = 0x0C;
/// Get GPNVM bit
pub const EEFC_FCMD_GGPB: u8 = 0x0D;

/// Ready for a new command
pub const EEFC_FSR_FRDY: u32 = 1 << 0;
/// Invalid command or bad key
pub const EEFC_FSR_CMDE: u32 = 1 << 1;
/// Programming or erase of a locked region
pub const EEFC_FSR_FLOCKE: u32 = 1 << 2;
/// Flash error
pub const EEFC_FSR_FLERR: u32 = 1 << 3;

/// Erase-pages argument selecting 16 pages
pub const EPA_16_PAGES: u32 = 0x2;

/// Pages per erase sector
pub const PAGES_PER_SECTOR: u32 = 16;

/// Upper bound on plane and lock region entries in a flash descriptor
pub const MAX_DESCRIPTOR_ENTRIES: u32 = 1024;

/// Flash geometry as reported by the controller
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlashDescriptor {
    pub id: u32,
    /// Total size in bytes
    pub size: u32,
    /// Page size in bytes
    pub page_size: u32,
    pub pages_per_sector: u32,
    pub planes: Vec<u32>,
    pub locks: Vec<u32>,
    /// Address of the flash in the processor memory map
    pub base_addr: u32,
}

impl FlashDescriptor {
    pub fn sector_size(&self) -> u32 {
        self.page_size * self.pages_per_sector
    }

    /// Number of pages needed to hold `len` bytes
    pub fn page_count(&self, len: usize) -> usize {
        match self.page_size as usize {
            0 => 0,
            page_size => (len + page_size - 1) / page_size,
        }
    }
}

impl fmt::Display for FlashDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID: 0x{:08x} [planes: {}, size: {} bytes, page size: {} bytes]",
            self.id,
            self.planes.len(),
            self.size,
            self.page_size
        )
    }
}

/// Map status register error bits to an error
pub fn check_status<E: fmt::Debug>(status: u32) -> Result<(), Error<E>> {
    if status & EEFC_FSR_FLOCKE != 0 {
        Err(Error::FlashLocked { status })
    } else if status & EEFC_FSR_FLERR != 0 {
        Err(Error::FlashWrite { status })
    } else if status & EEFC_FSR_CMDE != 0 {
        Err(Error::FlashCommand { status })
    } else {
        Ok(())
    }
}

pub struct Eefc<P, D, E> {
    samba: SamBa<P, D, E>,
    base: u32,
    ready_poll_limit: Option<u32>,
    flash: FlashDescriptor,
}

impl<P, D, E> Eefc<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: fmt::Debug,
{
    /// Attach to the controller at `base` and read the flash descriptor
    ///
    /// `ready_poll_limit` bounds the number of status polls per command,
    /// `None` polls until the controller reports ready.
    pub fn open(
        samba: SamBa<P, D, E>,
        base: u32,
        flash_base: u32,
        ready_poll_limit: Option<u32>,
    ) -> Result<Self, Error<E>> {
        let mut eefc = Self {
            samba,
            base,
            ready_poll_limit,
            flash: FlashDescriptor {
                base_addr: flash_base,
                ..Default::default()
            },
        };

        eefc.flash = eefc.read_flash_descriptor()?;
        info!("Flash {}", eefc.flash);

        Ok(eefc)
    }

    /// Descriptor read when the controller was opened
    pub fn descriptor(&self) -> &FlashDescriptor {
        &self.flash
    }

    fn wait_ready(&mut self) -> Result<u32, Error<E>> {
        let mut attempts = 0u32;

        loop {
            let status = self.samba.read_word(self.base + EEFC_FSR)?;
            if status & EEFC_FSR_FRDY != 0 {
                return Ok(status);
            }

            attempts += 1;
            if let Some(limit) = self.ready_poll_limit {
                if attempts >= limit {
                    error!("Flash controller busy after {} polls", attempts);
                    return Err(Error::FlashBusy { attempts });
                }
            }
        }
    }

    fn send_command(&mut self, cmd: u8, arg: u32) -> Result<u32, Error<E>> {
        debug!("EEFC command 0x{:02x} arg 0x{:04x}", cmd, arg);

        let fcr = EEFC_FKEY | ((arg & 0xffff) << 8) | cmd as u32;
        self.samba.write_word(self.base + EEFC_FCR, fcr)?;

        let status = self.wait_ready()?;
        check_status::<E>(status)?;

        Ok(status)
    }

    fn read_result(&mut self) -> Result<u32, Error<E>> {
        self.samba.read_word(self.base + EEFC_FRR)
    }

    /// Query the controller for the flash geometry
    pub fn read_flash_descriptor(&mut self) -> Result<FlashDescriptor, Error<E>> {
        self.send_command(EEFC_FCMD_GETD, 0)?;

        let id = self.read_result()?;
        let size = self.read_result()?;
        let page_size = self.read_result()?;

        if page_size == 0 || page_size % 4 != 0 {
            error!("Invalid flash page size: {}", page_size);
            return Err(Error::InvalidDescriptor {
                field: "page size",
                value: page_size,
            });
        }

        // Plane and lock counts come straight off the wire, bound them by the
        // page count before reading that many entries
        let max_entries = (size / page_size).min(MAX_DESCRIPTOR_ENTRIES);

        let plane_count = self.read_result()?;
        if plane_count == 0 || plane_count > max_entries {
            error!("Invalid flash plane count: {}", plane_count);
            return Err(Error::InvalidDescriptor {
                field: "plane count",
                value: plane_count,
            });
        }
        let planes = (0..plane_count)
            .map(|_| self.read_result())
            .collect::<Result<Vec<_>, _>>()?;

        let lock_count = self.read_result()?;
        if lock_count > max_entries {
            error!("Invalid flash lock region count: {}", lock_count);
            return Err(Error::InvalidDescriptor {
                field: "lock region count",
                value: lock_count,
            });
        }
        let locks = (0..lock_count)
            .map(|_| self.read_result())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FlashDescriptor {
            id,
            size,
            page_size,
            pages_per_sector: PAGES_PER_SECTOR,
            planes,
            locks,
            base_addr: self.flash.base_addr,
        })
    }

    /// Set or clear the lock bit of a lock region
    pub fn set_page_lock(&mut self, index: u32, enabled: bool) -> Result<(), Error<E>> {
        let cmd = if enabled { EEFC_FCMD_SLB } else { EEFC_FCMD_CLB };
        self.send_command(cmd, index)?;
        Ok(())
    }

    /// Clear the lock bit of every region in the descriptor
    pub fn unlock_all(&mut self) -> Result<(), Error<E>> {
        debug!("Unlocking {} lock regions", self.flash.locks.len());

        for i in 0..self.flash.locks.len() {
            self.set_page_lock(i as u32, false)?;
        }
        Ok(())
    }

    /// Erase the whole flash
    pub fn erase_all(&mut self) -> Result<(), Error<E>> {
        self.send_command(EEFC_FCMD_EA, 0)?;
        Ok(())
    }

    /// Erase the sector containing flash offset `addr`
    pub fn erase_sector(&mut self, addr: u32) -> Result<(), Error<E>> {
        let first_page = (addr / self.flash.sector_size()) * PAGES_PER_SECTOR;
        self.send_command(EEFC_FCMD_EPA, first_page | EPA_16_PAGES)?;
        Ok(())
    }

    /// Write one page at flash offset `addr`, zero-padding short data
    pub fn write_page(&mut self, addr: u32, data: &[u8]) -> Result<(), Error<E>> {
        let page_size = self.flash.page_size as usize;
        if data.len() > page_size {
            return Err(Error::InvalidArgument("page data exceeds flash page size"));
        }

        let mut page = data.to_vec();
        page.resize(page_size, 0);

        // Fill the latch buffer through the flash window, then commit
        let window = self.flash.base_addr + addr;
        for (i, word) in page.chunks_exact(4).enumerate() {
            let value = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
            self.samba.write_word(window + i as u32 * 4, value)?;
        }

        self.send_command(EEFC_FCMD_WP, addr / self.flash.page_size)?;
        Ok(())
    }

    /// Read one page at flash offset `addr`
    pub fn read_page(&mut self, addr: u32) -> Result<Vec<u8>, Error<E>> {
        let page_size = self.flash.page_size as usize;
        self.samba.read_block(self.flash.base_addr + addr, page_size)
    }

    /// Set a GPNVM bit
    pub fn set_gpnvm(&mut self, bit: u32) -> Result<(), Error<E>> {
        self.send_command(EEFC_FCMD_SGPB, bit)?;
        Ok(())
    }

    /// Clear a GPNVM bit
    pub fn clear_gpnvm(&mut self, bit: u32) -> Result<(), Error<E>> {
        self.send_command(EEFC_FCMD_CGPB, bit)?;
        Ok(())
    }

    /// Read the GPNVM bits
    pub fn gpnvm_bits(&mut self) -> Result<u32, Error<E>> {
        self.send_command(EEFC_FCMD_GGPB, 0)?;
        self.read_result()
    }

    pub fn samba_mut(&mut self) -> &mut SamBa<P, D, E> {
        &mut self.samba
    }

    pub fn into_samba(self) -> SamBa<P, D, E> {
        self.samba
    }
}
