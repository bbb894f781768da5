//! Floppy drive mechanism state and the rotational (angular) clock.
//!
//! Each drive remembers the absolute CPU-cycle stamp of its most recent
//! index pulse while the motor is on; 0 means the angular position is
//! unknown (motor stopped, media removed, or just reset). Everything
//! about the disk's angular position derives from that one stamp and the
//! rotation period.
//!
//! Disk changes are observable through the write-protect sensor only: the
//! floppy's body obstructs the sensor while sliding in or out, so both
//! insert and eject show a forced protected/unprotected sequence for a
//! while before the real tab state is visible again.

use serde::{Deserialize, Serialize};

use crate::timing::RPM_STANDARD_MILLI;

/// Drives addressable through the side-select latch.
pub const MAX_DRIVES: usize = 2;

/// Density factors: bytes per controller cycle scale with these.
pub const DENSITY_DD: u8 = 1;
pub const DENSITY_HD: u8 = 2;
pub const DENSITY_ED: u8 = 4;

/// Length of each forced write-protect phase during a media change, in
/// CPU cycles. TOS samples the sensor every 8 (one drive) or 16 (two
/// drives) VBLs, so each phase must outlast that: 250 ms at 8 MHz.
const TRANSITION_PHASE_CYCLES: u64 = 2_000_000;

/// One physical drive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drive {
    pub enabled: bool,
    pub disk_inserted: bool,
    /// Rotation speed in RPM x 1000 (real drives sit around 299-301 RPM).
    pub rpm_milli: u32,
    /// 1 for DD, 2 for HD, 4 for ED media.
    pub density: u8,
    /// Current physical head position.
    pub head_track: u8,
    /// CPU-cycle stamp of the last index pulse; 0 = not tracking.
    pub index_pulse_at: u64,
    transition: MediaTransition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum MediaTransition {
    Settled,
    /// Sensor sequence on insert: forced protected, forced writable,
    /// then the real tab state.
    Inserting { since: u64 },
    /// Sensor sequence on eject: forced writable, forced protected,
    /// then the steady empty-drive state.
    Ejecting { since: u64 },
}

impl Drive {
    #[must_use]
    pub fn new() -> Self {
        Self {
            enabled: true,
            disk_inserted: false,
            rpm_milli: RPM_STANDARD_MILLI,
            density: DENSITY_DD,
            head_track: 0,
            index_pulse_at: 0,
            transition: MediaTransition::Settled,
        }
    }

    pub(crate) fn begin_insert_transition(&mut self, now: u64) {
        self.transition = MediaTransition::Inserting { since: now };
    }

    pub(crate) fn begin_eject_transition(&mut self, now: u64) {
        self.transition = MediaTransition::Ejecting { since: now };
    }

    /// Forced write-protect state while a media change is in progress,
    /// or `None` once the sensor sees the disk (or the empty slot) again.
    pub(crate) fn wprt_override(&mut self, now: u64) -> Option<bool> {
        let (since, phases) = match self.transition {
            MediaTransition::Settled => return None,
            MediaTransition::Inserting { since } => (since, [true, false]),
            MediaTransition::Ejecting { since } => (since, [false, true]),
        };
        let elapsed = now.saturating_sub(since);
        if elapsed < TRANSITION_PHASE_CYCLES {
            Some(phases[0])
        } else if elapsed < 2 * TRANSITION_PHASE_CYCLES {
            Some(phases[1])
        } else {
            self.transition = MediaTransition::Settled;
            None
        }
    }
}

impl Default for Drive {
    fn default() -> Self {
        Self::new()
    }
}

/// Density factor for media with the given sector count per track.
/// HD and ED images are recognised by their oversized tracks.
#[must_use]
pub fn density_for_sector_count(sectors_per_track: u16) -> u8 {
    if sectors_per_track >= 36 {
        DENSITY_ED
    } else if sectors_per_track >= 18 {
        DENSITY_HD
    } else {
        DENSITY_DD
    }
}

/// Small deterministic generator for the nondeterministic bits of the
/// hardware: motor start-up angle and the noise read from a missing side.
/// Seeded once and carried in save states so restored runs replay the
/// same stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rng {
    state: u64,
}

impl Rng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed },
        }
    }

    pub fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Uniform-ish value in `[0, bound)`.
    pub fn below(&mut self, bound: u64) -> u64 {
        if bound == 0 {
            0
        } else {
            self.next() % bound
        }
    }

    pub fn next_byte(&mut self) -> u8 {
        (self.next() >> 32) as u8
    }
}
