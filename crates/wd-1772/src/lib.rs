//! Western Digital WD1772 floppy disk controller, paired with the Atari
//! ST's DMA engine.
//!
//! Standalone chip emulation following the project's chip-level library
//! pattern (like `nec-upd765` and `mos-cia-8520`): the chip owns its
//! registers, drives and state machine, and is driven through explicit
//! register-level calls plus a single timer-service entry point. System
//! RAM is reached through the [`dma::DmaMemory`] trait so the crate has
//! no machine dependency.
//!
//! # Register interface
//!
//! Four internal registers (Command/Status, Track, Sector, Data) selected
//! externally by the DMA mode word, plus the DMA engine's own mode/status
//! word, sector counter and 24-bit address register.
//!
//! # Timing model
//!
//! Commands progress through sub-states; every sub-state reports a delay
//! in controller cycles and the chip arms its one-shot timer with the
//! CPU-cycle equivalent. A zero delay chains straight into the next
//! sub-state within the same service call. All the quirks programs
//! depend on live here: the six-revolution spin-up, the five-revolution
//! search limit, the replace-possible window, and the DMA's 16-byte
//! block discipline.

#![allow(clippy::cast_possible_truncation)]

pub mod commands;
pub mod crc;
pub mod dma;
pub mod drive;
pub mod timing;

pub use crc::crc16;
pub use dma::{Dma, DmaMemory, FIFO_SIZE};
pub use drive::{Drive, MAX_DRIVES};
pub use timing::ClockConfig;

use log::trace;
use serde::{Deserialize, Serialize};

use commands::CommandState;
use drive::{density_for_sector_count, Rng};
use format_st::{DiskImage, SECTOR_SIZE};
use timing::{OneShot, INDEX_PULSE_US, MFM_BYTE_CYCLES, TRACK_BYTES_STANDARD};

/// Status register bits. Bits 1, 2 and 5 read differently after type I
/// commands than after type II/III.
pub mod status {
    pub const BUSY: u8 = 0x01;
    /// Type I: index pulse.
    pub const INDEX: u8 = 0x02;
    /// Type II/III: data request.
    pub const DRQ: u8 = 0x02;
    /// Type I: head is over track zero.
    pub const TRACK0: u8 = 0x04;
    /// Type II/III: never set here, the DMA always answers the DRQ.
    pub const LOST_DATA: u8 = 0x04;
    pub const CRC_ERROR: u8 = 0x08;
    pub const RNF: u8 = 0x10;
    /// Type I: spin-up complete.
    pub const SPIN_UP: u8 = 0x20;
    /// Type II/III: deleted data mark.
    pub const RECORD_TYPE: u8 = 0x20;
    pub const WPRT: u8 = 0x40;
    pub const MOTOR_ON: u8 = 0x80;
}

/// Command register bits shared across command types.
pub(crate) mod cmdbits {
    /// Type I: verify the destination track after positioning.
    pub const VERIFY: u8 = 1 << 2;
    /// Type II/III: add a head-settle delay.
    pub const HEAD_LOAD: u8 = 1 << 2;
    /// Set to skip the motor spin-up sequence.
    pub const SPIN_UP_DISABLE: u8 = 1 << 3;
    /// Type I step commands: update the track register.
    pub const UPDATE_TRACK: u8 = 1 << 4;
    /// Type II: transfer consecutive sectors.
    pub const MULTIPLE: u8 = 1 << 4;
}

/// Force-interrupt condition bits latched from the low command nibble.
pub(crate) mod intcond {
    pub const INDEX_PULSE: u8 = 1 << 2;
    pub const IMMEDIATE: u8 = 1 << 3;
}

/// Command classification from the top bits of the command byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandType {
    /// Restore, Seek, Step, Step-In, Step-Out.
    I,
    /// Read Sector(s), Write Sector(s).
    II,
    /// Read Address, Read Track, Write Track.
    III,
    /// Force Interrupt.
    IV,
}

/// Classify a command byte.
#[must_use]
pub fn command_type_of(command: u8) -> CommandType {
    if command & 0x80 == 0 {
        CommandType::I
    } else if command & 0x40 == 0 {
        CommandType::II
    } else if command & 0xF0 != 0xD0 {
        CommandType::III
    } else {
        CommandType::IV
    }
}

/// The WD1772 plus its DMA engine and drives: one value owns everything
/// a save state needs (media bytes are captured separately by the
/// snapshot layer).
#[derive(Serialize, Deserialize)]
pub struct Fdc {
    // WD1772 register file.
    dr: u8,
    tr: u8,
    sr: u8,
    cr: u8,
    status: u8,
    /// +1 stepping in (toward the hub), -1 stepping out.
    step_direction: i8,
    side: u8,
    /// Selected drive: 0, 1, or -1 for none.
    drive_sel: i8,

    state: CommandState,
    command_type: Option<CommandType>,
    /// A new same-type command may replace the current one until the
    /// prepare + spin-up phase ends.
    replace_possible: bool,
    /// The status register reads as a type I status (live TR00, INDEX
    /// and WPRT) until a type II/III command runs.
    status_type_i: bool,
    index_pulse_counter: u32,
    /// Sector number of the ID field the head will see next.
    next_sector_id: u8,
    /// Force-interrupt condition mask.
    interrupt_cond: u8,
    irq: bool,

    dma: Dma,
    drives: [Drive; MAX_DRIVES],
    #[serde(skip)]
    media: [Option<Box<dyn DiskImage>>; MAX_DRIVES],
    /// Holds one raw track at the highest supported density while a
    /// command streams it through the DMA.
    work_buffer: Vec<u8>,
    clock: ClockConfig,
    timer: OneShot,
    rng: Rng,
}

impl Fdc {
    /// Workspace large enough for a full raw ED track.
    const WORK_BUFFER_SIZE: usize = TRACK_BYTES_STANDARD * 4 + 1000;

    #[must_use]
    pub fn new(clock: ClockConfig, limit_to_4mb: bool, rng_seed: u64) -> Self {
        let mut fdc = Self {
            dr: 0,
            tr: 0,
            sr: 1,
            cr: 0,
            status: 0,
            step_direction: 1,
            side: 0,
            drive_sel: 0,
            state: CommandState::Idle,
            command_type: None,
            replace_possible: false,
            status_type_i: false,
            index_pulse_counter: 0,
            next_sector_id: 1,
            interrupt_cond: 0,
            irq: false,
            dma: Dma::new(limit_to_4mb),
            drives: [Drive::new(), Drive::new()],
            media: [None, None],
            work_buffer: vec![0; Self::WORK_BUFFER_SIZE],
            clock,
            timer: OneShot::default(),
            rng: Rng::new(rng_seed),
        };
        fdc.reset(true);
        fdc
    }

    /// Hardware reset. On a warm reset (the reset button or the 68000
    /// RESET instruction) the track and data registers and the register
    /// shadow survive; a cold reset clears them too.
    pub fn reset(&mut self, cold: bool) {
        trace!("fdc reset mode={}", if cold { "cold" } else { "warm" });
        self.cr = 0;
        self.status = 0;
        self.sr = 1;
        self.status_type_i = false;
        if cold {
            self.tr = 0;
            self.dr = 0;
        }
        self.step_direction = 1;
        self.state = CommandState::Idle;
        self.command_type = None;
        self.replace_possible = false;
        self.interrupt_cond = 0;
        self.irq = false;
        self.index_pulse_counter = 0;
        for drive in &mut self.drives {
            drive.index_pulse_at = 0; // Motor is off, angular position lost
        }
        self.dma.hard_reset(cold);
        self.timer.disarm();
    }

    // -----------------------------------------------------------------
    // Register access (routed here by the bus decode)
    // -----------------------------------------------------------------

    /// Write the command register.
    ///
    /// While BUSY is set, only Force Interrupt is accepted, plus a
    /// same-type I or II command while the current one is still in its
    /// prepare + spin-up window.
    pub fn write_command(&mut self, now: u64, value: u8) {
        self.index_pulse_update(now);

        if self.status & status::BUSY != 0 {
            let new_type = command_type_of(value);
            let same_family = matches!(
                (new_type, self.command_type),
                (CommandType::I, Some(CommandType::I)) | (CommandType::II, Some(CommandType::II))
            );
            if new_type == CommandType::IV {
                trace!("fdc busy, command {:#04x} interrupts {:#04x}", value, self.cr);
            } else if self.replace_possible && same_family {
                trace!("fdc busy, command {:#04x} replaces {:#04x}", value, self.cr);
            } else {
                trace!("fdc busy, command {:#04x} ignored", value);
                return;
            }
        }

        self.cr = value;
        self.execute_command(now);
    }

    /// Write the track register. Possible even while busy; whether the
    /// state machine honours it depends on the current sub-state.
    pub fn write_track_reg(&mut self, now: u64, value: u8) {
        self.index_pulse_update(now);
        self.tr = value;
    }

    /// Write the sector register. Possible even while busy, but it has
    /// no effect once a matching header was found.
    pub fn write_sector_reg(&mut self, now: u64, value: u8) {
        self.index_pulse_update(now);
        self.sr = value;
    }

    pub fn write_data_reg(&mut self, now: u64, value: u8) {
        self.index_pulse_update(now);
        self.dr = value;
    }

    /// Read the status register.
    ///
    /// In the type I view, TR00, INDEX and WPRT are sampled live from the
    /// drive signals, including the forced write-protect sequence around
    /// a media change. Reading status drops the IRQ line unless the
    /// immediate force-interrupt condition is latched.
    pub fn read_status(&mut self, now: u64) -> u8 {
        self.index_pulse_update(now);

        if self.status_type_i {
            match self.selected_enabled_drive() {
                None => {
                    // No drive: the TR00, INDEX and WPRT inputs all float low.
                    self.update_str(status::TRACK0 | status::INDEX | status::WPRT, 0);
                }
                Some(d) => {
                    if self.drives[d].head_track == 0 {
                        self.update_str(0, status::TRACK0);
                    } else {
                        self.update_str(status::TRACK0, 0);
                    }
                    if self.index_state(now) {
                        self.update_str(0, status::INDEX);
                    } else {
                        self.update_str(status::INDEX, 0);
                    }
                    // An empty drive reads as write-protected: the sensor
                    // cannot tell it apart from a protected disk.
                    let protected = !self.drives[d].disk_inserted
                        || self.media[d].as_deref().is_some_and(DiskImage::is_write_protected);
                    if protected {
                        self.update_str(0, status::WPRT);
                    } else {
                        self.update_str(status::WPRT, 0);
                    }
                    if let Some(forced) = self.drives[d].wprt_override(now) {
                        if forced {
                            self.update_str(0, status::WPRT);
                        } else {
                            self.update_str(status::WPRT, 0);
                        }
                    }
                }
            }
        }

        let value = self.status;
        self.clear_irq();
        value
    }

    pub fn read_track_reg(&mut self, now: u64) -> u8 {
        self.index_pulse_update(now);
        self.tr
    }

    pub fn read_sector_reg(&mut self, now: u64) -> u8 {
        self.index_pulse_update(now);
        self.sr
    }

    pub fn read_data_reg(&mut self, now: u64) -> u8 {
        self.index_pulse_update(now);
        self.dr
    }

    /// Status register without side effects (testing/debugging).
    #[must_use]
    pub fn peek_status(&self) -> u8 {
        self.status
    }

    #[must_use]
    pub fn irq(&self) -> bool {
        self.irq
    }

    #[must_use]
    pub fn busy(&self) -> bool {
        self.status & status::BUSY != 0
    }

    #[must_use]
    pub fn dma(&self) -> &Dma {
        &self.dma
    }

    pub fn dma_mut(&mut self) -> &mut Dma {
        &mut self.dma
    }

    #[must_use]
    pub fn drive(&self, index: usize) -> &Drive {
        &self.drives[index]
    }

    pub fn drive_mut(&mut self, index: usize) -> &mut Drive {
        &mut self.drives[index]
    }

    /// Selected drive index, if any (drives the busy LED).
    #[must_use]
    pub fn selected_drive_index(&self) -> Option<usize> {
        (self.drive_sel >= 0).then(|| self.drive_sel as usize)
    }

    #[must_use]
    pub fn side(&self) -> u8 {
        self.side
    }

    // -----------------------------------------------------------------
    // Drive and media events
    // -----------------------------------------------------------------

    pub fn enable_drive(&mut self, index: usize, enabled: bool) {
        trace!("fdc enable drive={index} {enabled}");
        self.drives[index].enabled = enabled;
    }

    /// Insert media. If the motor is already running the new disk's
    /// angular reference is seeded immediately, which lets a command
    /// stuck polling for headers complete transparently.
    pub fn insert_media(&mut self, now: u64, index: usize, image: Box<dyn DiskImage>) {
        trace!("fdc insert drive={index}");
        self.drives[index].disk_inserted = true;
        self.drives[index].density = density_for_sector_count(image.sectors_per_track());
        if self.status & status::MOTOR_ON != 0 {
            self.index_pulse_init(now, index);
        } else {
            self.drives[index].index_pulse_at = 0;
        }
        self.drives[index].begin_insert_transition(now);
        self.media[index] = Some(image);
    }

    pub fn eject_media(&mut self, now: u64, index: usize) -> Option<Box<dyn DiskImage>> {
        trace!("fdc eject drive={index}");
        self.drives[index].disk_inserted = false;
        self.drives[index].index_pulse_at = 0;
        self.drives[index].begin_eject_transition(now);
        self.media[index].take()
    }

    /// Re-attach media after a snapshot restore, without the insert side
    /// effects (the drive state already came from the snapshot).
    pub fn restore_media(&mut self, index: usize, image: Box<dyn DiskImage>) {
        self.media[index] = Some(image);
    }

    #[must_use]
    pub fn media(&self, index: usize) -> Option<&dyn DiskImage> {
        self.media[index].as_deref()
    }

    pub fn media_mut(&mut self, index: usize) -> Option<&mut (dyn DiskImage + '_)> {
        match self.media[index].as_mut() {
            Some(b) => Some(b.as_mut()),
            None => None,
        }
    }

    /// Apply a change of the side/drive-select latch (I/O port A bits
    /// 0..=2). Bit 0 selects the side (inverted); bits 1 and 2 select
    /// drive 0 and 1, active low, with drive 0 winning a tie. Changing
    /// drives drops the old drive's angular reference and seeds the new
    /// one when the motor is on.
    pub fn set_drive_side(&mut self, now: u64, porta_old: u8, porta_new: u8) {
        if porta_old == porta_new {
            return;
        }

        let side = (!porta_new) & 0x01;
        let mut drive: i8 = -1;
        if porta_new & 0x04 == 0 {
            drive = 1;
        }
        if porta_new & 0x02 == 0 {
            drive = 0;
        }

        trace!(
            "fdc drive/side select side {}->{} drive {}->{}",
            self.side,
            side,
            self.drive_sel,
            drive
        );

        if self.drive_sel != drive {
            if self.drive_sel >= 0 {
                self.drives[self.drive_sel as usize].index_pulse_at = 0;
            }
            if drive >= 0 {
                let d = drive as usize;
                if self.drives[d].disk_inserted && self.status & status::MOTOR_ON != 0 {
                    self.index_pulse_init(now, d);
                } else {
                    self.drives[d].index_pulse_at = 0;
                }
            }
        }

        self.side = side;
        self.drive_sel = drive;
    }

    // -----------------------------------------------------------------
    // Timer service
    // -----------------------------------------------------------------

    /// Absolute CPU-cycle deadline of the next scheduled state change.
    #[must_use]
    pub fn timer_due(&self) -> Option<u64> {
        self.timer.due()
    }

    /// Advance the command state machine. Called when the one-shot timer
    /// deadline is reached; chains through zero-delay sub-states and
    /// re-arms the timer with the next delay.
    pub fn service(&mut self, now: u64, memory: &mut dyn DmaMemory) {
        if !self.timer.fire(now) {
            return;
        }
        loop {
            self.index_pulse_update(now);
            if matches!(self.state, CommandState::Idle) {
                break;
            }
            let delay = self.dispatch_update(now, memory);
            if matches!(self.state, CommandState::Idle) {
                break;
            }
            if delay > 0 {
                self.arm_timer(now, delay);
                break;
            }
        }
    }

    pub(crate) fn arm_timer(&mut self, now: u64, fdc_cycles: u32) {
        let cpu = self.clock.timer_cpu_cycles(fdc_cycles).max(1);
        self.timer.arm(now + u64::from(cpu));
    }

    pub(crate) fn update_str(&mut self, clear: u8, set: u8) {
        self.status = (self.status & !clear) | set;
    }

    pub(crate) fn set_irq(&mut self) {
        if !self.irq {
            trace!("fdc set irq");
        }
        self.irq = true;
    }

    /// Drop the IRQ line, unless the immediate force-interrupt condition
    /// is latched (only a 0xD0 command clears that).
    pub(crate) fn clear_irq(&mut self) {
        if self.interrupt_cond & intcond::IMMEDIATE == 0 {
            self.irq = false;
        }
    }

    // -----------------------------------------------------------------
    // Angular clock
    // -----------------------------------------------------------------

    fn selected_enabled_drive(&self) -> Option<usize> {
        let d = self.selected_drive_index()?;
        self.drives[d].enabled.then_some(d)
    }

    pub(crate) fn selected_usable_drive(&self) -> Option<usize> {
        let d = self.selected_enabled_drive()?;
        self.drives[d].disk_inserted.then_some(d)
    }

    /// Catch index-pulse crossings. Called at every timer service and
    /// register access; the state machine polls often enough (every ~500
    /// controller cycles while waiting) that at most one crossing happens
    /// between calls.
    pub(crate) fn index_pulse_update(&mut self, now: u64) {
        if self.status & status::MOTOR_ON == 0 {
            return;
        }
        let Some(d) = self.selected_usable_drive() else {
            return;
        };
        if self.drives[d].index_pulse_at == 0 {
            // No reference yet (e.g. right after a reset).
            self.index_pulse_init(now, d);
        }
        let rev_cpu =
            u64::from(self.clock.fdc_to_cpu(self.clock.cycles_per_rev_fdc(self.drives[d].rpm_milli)));
        if rev_cpu == 0 {
            return;
        }
        while now - self.drives[d].index_pulse_at >= rev_cpu {
            self.drives[d].index_pulse_at += rev_cpu;
            self.index_pulse_counter += 1;
            if self.interrupt_cond & intcond::INDEX_PULSE != 0 {
                trace!("fdc force int on index pulse");
                self.set_irq();
            }
        }
    }

    /// Seed the angular reference for a drive whose motor just started:
    /// the position is unknowable, so pick a point less than one
    /// revolution in the past.
    pub(crate) fn index_pulse_init(&mut self, now: u64, index: usize) {
        let rev_cpu = u64::from(
            self.clock
                .fdc_to_cpu(self.clock.cycles_per_rev_fdc(self.drives[index].rpm_milli)),
        );
        let offset = self.rng.below(rev_cpu);
        self.drives[index].index_pulse_at = now.saturating_sub(offset).max(1);
    }

    /// Controller cycles since the last index pulse and the revolution
    /// length, or `None` without a tracked drive.
    fn index_position_fdc(&self, now: u64) -> Option<(u64, u32)> {
        let d = self.selected_drive_index()?;
        let at = self.drives[d].index_pulse_at;
        if at == 0 {
            return None;
        }
        let per_rev = self.clock.cycles_per_rev_fdc(self.drives[d].rpm_milli);
        Some((self.clock.cpu_to_fdc(now - at), per_rev))
    }

    /// Current byte position within the track, relative to the index.
    pub(crate) fn index_position_bytes(&self, now: u64) -> Option<u32> {
        let d = self.selected_drive_index()?;
        let (since, _) = self.index_position_fdc(now)?;
        Some((since * u64::from(self.drives[d].density) / u64::from(MFM_BYTE_CYCLES)) as u32)
    }

    /// Whether the index signal is currently high (it stays high for
    /// ~3.71 ms each revolution).
    pub(crate) fn index_state(&self, now: u64) -> bool {
        match self.index_position_fdc(now) {
            Some((since, _)) => since < u64::from(self.clock.us_to_fdc(INDEX_PULSE_US)),
            None => false,
        }
    }

    /// Controller cycles until the next index pulse. A remainder of one
    /// cycle or less is treated as a rounding artifact and waits a full
    /// extra revolution.
    pub(crate) fn next_index_pulse_fdc(&self, now: u64) -> Option<u32> {
        let (since, per_rev) = self.index_position_fdc(now)?;
        let remaining = i64::from(per_rev) - since as i64;
        if remaining <= 1 {
            Some(per_rev)
        } else {
            Some(remaining as u32)
        }
    }

    /// Bytes to read before the next sector ID field passes under the
    /// head, assuming the standard ascending 512-byte sector layout. The
    /// ID's sector number is latched into `next_sector_id`. `None` while
    /// no drive can produce an index pulse.
    pub(crate) fn next_sector_id_bytes(&mut self, now: u64) -> Option<u32> {
        let current = self.index_position_bytes(now)?;
        let d = self.selected_drive_index()?;
        let sectors = u32::from(self.media_sectors_per_track(d));

        let mut track_pos = (timing::GAP1 + timing::GAP2) as u32;
        let mut index = 0;
        while index < sectors {
            if current < track_pos {
                break;
            }
            track_pos += timing::RAW_SECTOR_512 as u32;
            index += 1;
        }

        let (bytes, next_sector) = if index == sectors {
            // Past the last ID field: wrap through the index to sector 1.
            let to_index =
                (self.bytes_per_track(d) as i64 - i64::from(current)).max(0) as u32;
            (to_index + (timing::GAP1 + timing::GAP2) as u32, 1)
        } else {
            (track_pos - current, index as u8 + 1)
        };

        self.next_sector_id = next_sector;
        Some(bytes)
    }

    /// Raw track length for a drive's current media density.
    pub(crate) fn bytes_per_track(&self, index: usize) -> u32 {
        TRACK_BYTES_STANDARD as u32 * u32::from(self.drives[index].density)
    }

    /// Controller cycles to shift `bytes` MFM bytes at the selected
    /// drive's density.
    pub(crate) fn transfer_cycles(&self, bytes: u32) -> u32 {
        let density = self
            .selected_drive_index()
            .map_or(1, |d| u32::from(self.drives[d].density));
        bytes * MFM_BYTE_CYCLES / density
    }

    pub(crate) fn media_sectors_per_track(&self, index: usize) -> u16 {
        self.media[index].as_deref().map_or(0, DiskImage::sectors_per_track)
    }

    pub(crate) fn media_sides(&self, index: usize) -> u8 {
        self.media[index].as_deref().map_or(0, DiskImage::sides)
    }

    // -----------------------------------------------------------------
    // Media transfer helpers for the command engine
    // -----------------------------------------------------------------

    /// Copy one sector into the head of the work buffer. `None` if the
    /// requested sector does not exist on the media.
    pub(crate) fn read_sector_to_buffer(&mut self, sector: u8) -> Option<usize> {
        let d = self.selected_usable_drive()?;
        let track = self.drives[d].head_track;
        let side = self.side;
        let image = self.media[d].as_deref()?;
        image
            .read_sector(track, side, sector, &mut self.work_buffer)
            .then_some(SECTOR_SIZE)
    }

    /// Write one sector to the media, sourced from RAM at the DMA address
    /// when the sector counter allows a transfer and from zero bytes
    /// otherwise. `None` if the sector does not exist.
    pub(crate) fn write_sector_from_ram(
        &mut self,
        sector: u8,
        memory: &mut dyn DmaMemory,
    ) -> Option<usize> {
        let d = self.selected_usable_drive()?;
        let track = self.drives[d].head_track;
        let side = self.side;

        let mut data = [0u8; SECTOR_SIZE];
        if self.dma.sector_count() > 0 {
            memory.read_block(self.dma.address(), &mut data);
        }

        let image = self.media[d].as_mut()?;
        image
            .write_sector(track, side, sector, &data)
            .then_some(SECTOR_SIZE)
    }

    /// Whether the selected media refuses writes.
    pub(crate) fn selected_media_write_protected(&self) -> bool {
        match self.selected_usable_drive() {
            Some(d) => self.media[d]
                .as_deref()
                .is_some_and(DiskImage::is_write_protected),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_classification() {
        assert_eq!(command_type_of(0x00), CommandType::I); // Restore
        assert_eq!(command_type_of(0x10), CommandType::I); // Seek
        assert_eq!(command_type_of(0x30), CommandType::I); // Step
        assert_eq!(command_type_of(0x48), CommandType::I); // Step-In
        assert_eq!(command_type_of(0x78), CommandType::I); // Step-Out
        assert_eq!(command_type_of(0x80), CommandType::II); // Read Sector
        assert_eq!(command_type_of(0x90), CommandType::II);
        assert_eq!(command_type_of(0xA0), CommandType::II); // Write Sector
        assert_eq!(command_type_of(0xC0), CommandType::III); // Read Address
        assert_eq!(command_type_of(0xE0), CommandType::III); // Read Track
        assert_eq!(command_type_of(0xF0), CommandType::III); // Write Track
        assert_eq!(command_type_of(0xD0), CommandType::IV);
        assert_eq!(command_type_of(0xD8), CommandType::IV);
    }

    #[test]
    fn reset_register_values() {
        let mut fdc = Fdc::new(ClockConfig::default(), true, 1);
        fdc.write_track_reg(0, 0x20);
        fdc.write_data_reg(0, 0x30);

        fdc.reset(false);
        assert_eq!(fdc.read_track_reg(0), 0x20, "warm reset keeps TR");
        assert_eq!(fdc.read_data_reg(0), 0x30, "warm reset keeps DR");
        assert_eq!(fdc.read_sector_reg(0), 1);
        assert_eq!(fdc.peek_status(), 0);

        fdc.reset(true);
        assert_eq!(fdc.read_track_reg(0), 0, "cold reset clears TR");
        assert_eq!(fdc.read_data_reg(0), 0, "cold reset clears DR");
    }

    #[test]
    fn drive_select_tie_goes_to_drive_zero() {
        let mut fdc = Fdc::new(ClockConfig::default(), true, 1);
        // Both drive bits low: drive 0 wins. Side bit low: side 1.
        fdc.set_drive_side(0, 0x07, 0x00);
        assert_eq!(fdc.selected_drive_index(), Some(0));
        assert_eq!(fdc.side(), 1);

        // Only drive 1 selected, side 0.
        fdc.set_drive_side(0, 0x00, 0x03);
        assert_eq!(fdc.selected_drive_index(), Some(1));
        assert_eq!(fdc.side(), 0);

        // Nothing selected.
        fdc.set_drive_side(0, 0x03, 0x07);
        assert_eq!(fdc.selected_drive_index(), None);
    }

    #[test]
    fn drive_change_drops_old_angular_reference() {
        let mut fdc = Fdc::new(ClockConfig::default(), true, 1);
        fdc.drive_mut(0).index_pulse_at = 12345;
        fdc.set_drive_side(50_000, 0x05, 0x03); // Drive 0 -> drive 1
        assert_eq!(fdc.drive(0).index_pulse_at, 0);
    }

    #[test]
    fn index_seeding_is_within_one_revolution() {
        let mut fdc = Fdc::new(ClockConfig::default(), true, 7);
        let rev = u64::from(ClockConfig::default().cycles_per_rev_fdc(300_000));
        let now = 10 * rev;
        for _ in 0..20 {
            fdc.index_pulse_init(now, 0);
            let at = fdc.drive(0).index_pulse_at;
            assert!(at > now - rev && at <= now);
        }
    }
}
