//! The memory-mapped register window at `$FF8604..$FF860F`.
//!
//! `$FF8604` is a multiplexed port: depending on the mode word last
//! written to `$FF8606` it reaches the DMA sector counter, the hard-disk
//! controller, or one of the four WD1772 registers. The word registers
//! raise a bus error when accessed as bytes, exactly like the real
//! chipset glue.

use log::trace;

use crate::StMachine;

/// Register window addresses.
pub const DISK_CONTROLLER: u32 = 0xFF_8604;
pub const DMA_MODE_STATUS: u32 = 0xFF_8606;
pub const DMA_ADDRESS_HIGH: u32 = 0xFF_8609;
pub const DMA_ADDRESS_MID: u32 = 0xFF_860B;
pub const DMA_ADDRESS_LOW: u32 = 0xFF_860D;
pub const FLOPPY_MODE: u32 = 0xFF_860F;

/// A failed register access, to be turned into a 68000 bus error by the
/// embedding emulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusFault {
    /// Byte access to a word register or word access to a byte register.
    BadSize(u32),
    /// Nothing decodes this address (or the register is absent on this
    /// machine model).
    Unmapped(u32),
}

/// The hard-disk controller as seen from the register mux. Command
/// execution is outside this core; a stub satisfies the routing.
pub trait HdcPort {
    fn write_command_byte(&mut self, register: u8, value: u8);
    fn read_status_byte(&mut self, register: u8) -> u8;
}

/// Default HDC collaborator: swallows writes, reads zero.
pub struct NullHdc;

impl HdcPort for NullHdc {
    fn write_command_byte(&mut self, register: u8, value: u8) {
        trace!("hdc write reg={register} value={value:#04x} (no device)");
    }

    fn read_status_byte(&mut self, _register: u8) -> u8 {
        0
    }
}

impl StMachine {
    /// Word write into the register window.
    pub fn io_write_word(&mut self, address: u32, value: u16) -> Result<(), BusFault> {
        match address {
            DISK_CONTROLLER => {
                self.write_disk_controller(value);
                Ok(())
            }
            DMA_MODE_STATUS => {
                trace!("dma mode {:#06x}", value);
                self.fdc.dma_mut().write_mode(value);
                Ok(())
            }
            DMA_ADDRESS_HIGH | DMA_ADDRESS_MID | DMA_ADDRESS_LOW | FLOPPY_MODE => {
                Err(BusFault::BadSize(address))
            }
            _ => Err(BusFault::Unmapped(address)),
        }
    }

    /// Word read from the register window.
    pub fn io_read_word(&mut self, address: u32) -> Result<u16, BusFault> {
        match address {
            DISK_CONTROLLER => Ok(self.read_disk_controller()),
            DMA_MODE_STATUS => Ok(self.fdc.dma().read_status()),
            DMA_ADDRESS_HIGH | DMA_ADDRESS_MID | DMA_ADDRESS_LOW | FLOPPY_MODE => {
                Err(BusFault::BadSize(address))
            }
            _ => Err(BusFault::Unmapped(address)),
        }
    }

    /// Byte write into the register window.
    pub fn io_write_byte(&mut self, address: u32, value: u8) -> Result<(), BusFault> {
        match address {
            DISK_CONTROLLER | DISK_CONTROLLER_ODD | DMA_MODE_STATUS | DMA_MODE_STATUS_ODD => {
                // The word registers do not tolerate byte access.
                Err(BusFault::BadSize(address))
            }
            DMA_ADDRESS_HIGH => {
                self.fdc.dma_mut().write_address_byte(0, value);
                Ok(())
            }
            DMA_ADDRESS_MID => {
                self.fdc.dma_mut().write_address_byte(1, value);
                Ok(())
            }
            DMA_ADDRESS_LOW => {
                self.fdc.dma_mut().write_address_byte(2, value);
                Ok(())
            }
            FLOPPY_MODE if self.config.model.has_floppy_mode_register() => {
                trace!("floppy mode write {:#04x} (ignored)", value);
                Ok(())
            }
            _ => Err(BusFault::Unmapped(address)),
        }
    }

    /// Byte read from the register window.
    pub fn io_read_byte(&mut self, address: u32) -> Result<u8, BusFault> {
        match address {
            DISK_CONTROLLER | DISK_CONTROLLER_ODD | DMA_MODE_STATUS | DMA_MODE_STATUS_ODD => {
                Err(BusFault::BadSize(address))
            }
            DMA_ADDRESS_HIGH => Ok(self.fdc.dma().read_address_byte(0)),
            DMA_ADDRESS_MID => Ok(self.fdc.dma().read_address_byte(1)),
            DMA_ADDRESS_LOW => Ok(self.fdc.dma().read_address_byte(2)),
            FLOPPY_MODE if self.config.model.has_floppy_mode_register() => Ok(0x80),
            _ => Err(BusFault::Unmapped(address)),
        }
    }

    /// Route a word written to `$FF8604` by the mode word: the DMA
    /// sector counter, the HDC, or one of the controller registers.
    /// Only the low byte carries data.
    fn write_disk_controller(&mut self, value: u16) {
        let byte = value as u8;
        let mode = self.fdc.dma().mode();

        if mode & 0x0010 != 0 {
            trace!("dma sector count {byte}");
            self.fdc.dma_mut().write_sector_count(byte);
            return;
        }

        // Register accesses feed the unused-bit shadow.
        self.fdc.dma_mut().note_register_access(byte);

        if mode & 0x0008 != 0 {
            self.hdc.write_command_byte((mode & 0x7) as u8, byte);
            return;
        }

        let now = self.cycles;
        match (mode >> 1) & 0x3 {
            0 => self.fdc.write_command(now, byte),
            1 => self.fdc.write_track_reg(now, byte),
            2 => self.fdc.write_sector_reg(now, byte),
            _ => self.fdc.write_data_reg(now, byte),
        }
    }

    /// The read mirror of [`Self::write_disk_controller`]. The DMA
    /// sector counter cannot be read back; those reads return the
    /// shadow word.
    fn read_disk_controller(&mut self) -> u16 {
        let mode = self.fdc.dma().mode();

        if mode & 0x0010 != 0 {
            return self.fdc.dma().shadow();
        }

        let byte = if mode & 0x0008 != 0 {
            self.hdc.read_status_byte((mode & 0x7) as u8)
        } else {
            let now = self.cycles;
            match (mode >> 1) & 0x3 {
                0 => self.fdc.read_status(now),
                1 => self.fdc.read_track_reg(now),
                2 => self.fdc.read_sector_reg(now),
                _ => self.fdc.read_data_reg(now),
            }
        };

        self.fdc.dma_mut().note_register_access(byte);
        u16::from(byte)
    }
}

/// Odd-byte aliases of the word registers, for the byte-access fault
/// checks.
const DISK_CONTROLLER_ODD: u32 = DISK_CONTROLLER + 1;
const DMA_MODE_STATUS_ODD: u32 = DMA_MODE_STATUS + 1;
