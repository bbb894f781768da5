//! Machine glue for the Atari ST disk subsystem.
//!
//! Owns the WD1772/DMA chip, system RAM, the hard-disk stub and the
//! global cycle counter, and decodes the `$FF86xx` register window. The
//! embedding emulator drives it with [`StMachine::run_cycles`]; the chip's
//! one-shot timer deadlines are honoured exactly, so command timing does
//! not depend on how the caller slices its time.

pub mod bus;
pub mod config;
pub mod memory;
pub mod snapshot;

pub use bus::{BusFault, HdcPort, NullHdc};
pub use config::{MachineConfig, MachineModel};
pub use memory::Memory;
pub use snapshot::SnapshotError;

use format_st::DiskImage;
use wd_1772::Fdc;

/// The disk subsystem of one machine.
pub struct StMachine {
    config: MachineConfig,
    cycles: u64,
    ram: Memory,
    fdc: Fdc,
    hdc: Box<dyn HdcPort>,
    /// Last value of the PSG I/O port A latch (side/drive select bits).
    io_porta: u8,
}

impl StMachine {
    #[must_use]
    pub fn new(config: MachineConfig) -> Self {
        let fdc = Fdc::new(
            config.clock(),
            config.model.limits_dma_to_4mb(),
            config.rng_seed,
        );
        let ram = Memory::new(config.ram_size);
        Self {
            config,
            cycles: 0,
            ram,
            fdc,
            hdc: Box::new(NullHdc),
            // Drive 0 selected, side 0: the state TOS leaves behind.
            io_porta: 0x05,
        }
    }

    /// Replace the hard-disk collaborator reached through the register
    /// mux.
    pub fn set_hdc(&mut self, hdc: Box<dyn HdcPort>) {
        self.hdc = hdc;
    }

    #[must_use]
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Advance the machine by `count` CPU cycles, servicing the
    /// controller at each of its timer deadlines on the way.
    pub fn run_cycles(&mut self, count: u64) {
        let end = self.cycles + count;
        while let Some(due) = self.fdc.timer_due() {
            if due > end {
                break;
            }
            self.cycles = due.max(self.cycles);
            self.fdc.service(self.cycles, &mut self.ram);
        }
        self.cycles = end;
    }

    /// Hardware reset of the disk subsystem.
    pub fn reset(&mut self, cold: bool) {
        self.fdc.reset(cold);
    }

    /// Write the PSG I/O port A latch; bits 0..=2 carry the side and
    /// drive selection.
    pub fn write_io_porta(&mut self, value: u8) {
        let previous = self.io_porta;
        self.io_porta = value;
        self.fdc.set_drive_side(self.cycles, previous, value);
    }

    #[must_use]
    pub fn io_porta(&self) -> u8 {
        self.io_porta
    }

    pub fn insert_disk(&mut self, drive: usize, image: Box<dyn DiskImage>) {
        self.fdc.insert_media(self.cycles, drive, image);
    }

    pub fn eject_disk(&mut self, drive: usize) -> Option<Box<dyn DiskImage>> {
        self.fdc.eject_media(self.cycles, drive)
    }

    pub fn enable_drive(&mut self, drive: usize, enabled: bool) {
        self.fdc.enable_drive(drive, enabled);
    }

    /// Controller interrupt line (wired to MFP GPIP 5 on the real
    /// machine).
    #[must_use]
    pub fn irq(&self) -> bool {
        self.fdc.irq()
    }

    /// Drive whose busy light is on, for status displays.
    #[must_use]
    pub fn busy_drive(&self) -> Option<usize> {
        self.fdc.selected_drive_index().filter(|_| self.fdc.busy())
    }

    #[must_use]
    pub fn fdc(&self) -> &Fdc {
        &self.fdc
    }

    pub fn fdc_mut(&mut self) -> &mut Fdc {
        &mut self.fdc
    }

    #[must_use]
    pub fn ram(&self) -> &Memory {
        &self.ram
    }

    pub fn ram_mut(&mut self) -> &mut Memory {
        &mut self.ram
    }

    #[must_use]
    pub fn config(&self) -> &MachineConfig {
        &self.config
    }
}
