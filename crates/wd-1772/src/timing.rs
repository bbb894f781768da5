//! Controller timing: cycle constants, clock-domain conversion and the
//! one-shot event timer.
//!
//! Every delay in the command state machine is expressed in controller
//! cycles against the 8 MHz reference clock of the WD1772 datasheet and
//! converted to CPU cycles only when the timer is armed. The Atari's
//! actual controller crystal is 8.021247 MHz; the Falcon's Ajax part runs
//! a doubled clock, corrected by halving at conversion time.

use serde::{Deserialize, Serialize};

/// Reference clock all datasheet delays are quoted against.
pub const FDC_CLOCK_STANDARD_HZ: u64 = 8_000_000;

/// Actual controller crystal on the ST family.
pub const FDC_CLOCK_ATARI_HZ: u32 = 8_021_247;

/// One MFM byte: 4 us per bit, 8 bits, at the 8 MHz reference.
pub const MFM_BYTE_CYCLES: u32 = 4 * 8 * 8;

/// Bytes in one revolution of a standard double-density track at the
/// Atari's 8.021247 MHz clock (6250 at exactly 8 MHz).
pub const TRACK_BYTES_STANDARD: usize = 6268;

/// Drive rotation speed, in RPM x 1000.
pub const RPM_STANDARD_MILLI: u32 = 300_000;

/// Index pulses to wait during motor spin-up.
pub const IP_SPIN_UP: u32 = 6;
/// Index pulses after the last command before the motor stops.
pub const IP_MOTOR_OFF: u32 = 9;
/// Revolutions to search for a matching ID field before RNF.
pub const IP_ADDRESS_ID: u32 = 5;

/// Head settle / head load delay in microseconds.
pub const HEAD_LOAD_US: u32 = 15_000;
/// The index signal stays high this long each revolution (~46 bytes).
pub const INDEX_PULSE_US: u32 = 3_710;

/// Prepare delays per command type, in controller cycles. The type I
/// value was measured on real hardware; type IV was not.
pub const PREPARE_TYPE_I: u32 = 90 * 8;
pub const PREPARE_TYPE_II: u32 = 8;
pub const PREPARE_TYPE_III: u32 = 8;
pub const PREPARE_TYPE_IV: u32 = 100 * 8;

/// Delay before entering a command's complete state.
pub const COMMAND_COMPLETE: u32 = 8;
/// Immediate transition to the next sub-state.
pub const IMMEDIATE: u32 = 0;

/// Poll interval while no usable drive/floppy can produce an index pulse.
/// Commands wait at this rate until media shows up.
pub const WAIT_NO_DRIVE: u32 = 50_000;

/// Poll interval for catching index-pulse crossings.
pub const REFRESH_INDEX_PULSE: u32 = 500;

/// Delays above the divisor are divided by this in fast-floppy mode.
pub const FAST_FLOPPY_DIVISOR: u32 = 10;

/// Step rates in milliseconds, indexed by the low two command bits.
pub const STEP_RATE_MS: [u32; 4] = [6, 12, 2, 3];

/// The head mechanism cannot move past this track.
pub const PHYSICAL_MAX_TRACK: u8 = 90;

/// Sector size codes used in ID fields.
pub const SECTOR_SIZE_CODE_512: u8 = 2;

/// Standard GAP lengths for a 9/10-sector track layout.
pub const GAP1: usize = 60; // Track pre-gap, 0x4E
pub const GAP2: usize = 12; // ID pre-gap, 0x00
pub const GAP3A: usize = 22; // ID post-gap, 0x4E
pub const GAP3B: usize = 12; // Data pre-gap, 0x00
pub const GAP4: usize = 40; // Data post-gap, 0x4E

/// One raw 512-byte sector including ID field and gaps: 614 bytes.
pub const RAW_SECTOR_512: usize = GAP2 + 3 + 1 + 6 + GAP3A + GAP3B + 3 + 1 + 512 + 2 + GAP4;

/// Clock-domain configuration, fixed per machine model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClockConfig {
    /// Controller crystal frequency in Hz.
    pub fdc_freq_hz: u32,
    /// Falcon Ajax: the crystal is doubled, so delays are corrected by
    /// two at conversion time.
    pub doubled_fdc_clock: bool,
    /// log2 of the CPU speed multiplier over 8 MHz (0 = 8 MHz).
    pub cpu_freq_shift: u8,
    /// Divide long delays for accelerated emulation.
    pub fast_floppy: bool,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fdc_freq_hz: FDC_CLOCK_ATARI_HZ,
            doubled_fdc_clock: false,
            cpu_freq_shift: 0,
            fast_floppy: false,
        }
    }
}

impl ClockConfig {
    /// Convert controller cycles to CPU cycles.
    #[must_use]
    pub fn fdc_to_cpu(&self, fdc_cycles: u32) -> u32 {
        let fdc_cycles = if self.doubled_fdc_clock {
            u64::from(fdc_cycles) * 2
        } else {
            u64::from(fdc_cycles)
        };
        let cpu = fdc_cycles * u64::from(FDC_CLOCK_ATARI_HZ) / u64::from(self.fdc_freq_hz);
        (cpu >> self.cpu_freq_shift) as u32
    }

    /// Convert CPU cycles to controller cycles.
    #[must_use]
    pub fn cpu_to_fdc(&self, cpu_cycles: u64) -> u64 {
        let cpu = cpu_cycles << self.cpu_freq_shift;
        let fdc = cpu * u64::from(self.fdc_freq_hz) / u64::from(FDC_CLOCK_ATARI_HZ);
        if self.doubled_fdc_clock {
            fdc / 2
        } else {
            fdc
        }
    }

    /// Convert a datasheet delay in microseconds to controller cycles
    /// (datasheet delays are quoted against the 8 MHz reference clock).
    #[must_use]
    pub fn us_to_fdc(&self, micros: u32) -> u32 {
        (FDC_CLOCK_STANDARD_HZ * u64::from(micros) / 1_000_000) as u32
    }

    /// Controller cycles for one full revolution at the given RPM x 1000.
    #[must_use]
    pub fn cycles_per_rev_fdc(&self, rpm_milli: u32) -> u32 {
        let rev = u64::from(self.fdc_freq_hz) * 1000 / u64::from(rpm_milli / 60);
        let rev = if self.doubled_fdc_clock { rev / 2 } else { rev };
        rev as u32
    }

    /// CPU cycles until a timer armed for `fdc_cycles` should fire,
    /// applying the fast-floppy divisor.
    #[must_use]
    pub fn timer_cpu_cycles(&self, fdc_cycles: u32) -> u32 {
        let fdc_cycles = if self.fast_floppy && fdc_cycles > FAST_FLOPPY_DIVISOR {
            fdc_cycles / FAST_FLOPPY_DIVISOR
        } else {
            fdc_cycles
        };
        self.fdc_to_cpu(fdc_cycles)
    }
}

/// The single one-shot event timer driving the command state machine.
/// Holds an absolute CPU-cycle deadline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OneShot {
    due: Option<u64>,
}

impl OneShot {
    /// Absolute deadline, if armed.
    #[must_use]
    pub fn due(&self) -> Option<u64> {
        self.due
    }

    pub fn arm(&mut self, at: u64) {
        self.due = Some(at);
    }

    pub fn disarm(&mut self) {
        self.due = None;
    }

    /// Consume the deadline if it has been reached.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.due {
            Some(at) if at <= now => {
                self.due = None;
                true
            }
            _ => false,
        }
    }
}
