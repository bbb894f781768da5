//! Machine configuration for the disk subsystem.

use wd_1772::timing::FDC_CLOCK_ATARI_HZ;
use wd_1772::ClockConfig;

/// Machine model. Selects the DMA address width, the controller clock
/// and whether the Falcon-only floppy mode register exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineModel {
    St,
    Ste,
    MegaSte,
    Falcon,
}

impl MachineModel {
    /// ST/STE/MegaSTE address only 4 MB of RAM: the DMA address high
    /// byte is masked to six bits.
    #[must_use]
    pub const fn limits_dma_to_4mb(self) -> bool {
        !matches!(self, Self::Falcon)
    }

    /// The Falcon's Ajax controller runs a doubled crystal.
    #[must_use]
    pub const fn doubled_fdc_clock(self) -> bool {
        matches!(self, Self::Falcon)
    }

    #[must_use]
    pub const fn has_floppy_mode_register(self) -> bool {
        matches!(self, Self::Falcon)
    }
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub model: MachineModel,
    /// Installed RAM in bytes.
    pub ram_size: usize,
    /// log2 of the CPU speed multiplier over 8 MHz.
    pub cpu_freq_shift: u8,
    /// Divide long controller delays for accelerated emulation.
    pub fast_floppy: bool,
    /// Seed for the nondeterministic hardware bits (motor start angle,
    /// noise from missing sides).
    pub rng_seed: u64,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            model: MachineModel::St,
            ram_size: 1024 * 1024,
            cpu_freq_shift: 0,
            fast_floppy: false,
            rng_seed: 1,
        }
    }
}

impl MachineConfig {
    /// Clock-domain configuration for the controller crate.
    #[must_use]
    pub fn clock(&self) -> ClockConfig {
        let doubled = self.model.doubled_fdc_clock();
        ClockConfig {
            fdc_freq_hz: if doubled {
                FDC_CLOCK_ATARI_HZ * 2
            } else {
                FDC_CLOCK_ATARI_HZ
            },
            doubled_fdc_clock: doubled,
            cpu_freq_shift: self.cpu_freq_shift,
            fast_floppy: self.fast_floppy,
        }
    }
}
