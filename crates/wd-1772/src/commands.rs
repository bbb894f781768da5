//! The command state machine.
//!
//! Each running command is a sub-state enum; every sub-state reports how
//! many controller cycles to wait before the next step. Zero means the
//! next step runs within the same timer service. The state machines are
//! deliberately explicit about the phases real software measures: the
//! prepare delay, the six-index-pulse spin-up, the head settle, the
//! per-byte MFM pacing of transfers, and the nine-index-pulse motor-stop
//! countdown after completion.

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::crc::crc16;
use crate::dma::DmaMemory;
use crate::timing::{
    COMMAND_COMPLETE, GAP1, GAP2, GAP3A, GAP3B, GAP4, HEAD_LOAD_US, IMMEDIATE, IP_ADDRESS_ID,
    IP_MOTOR_OFF, IP_SPIN_UP, PHYSICAL_MAX_TRACK, PREPARE_TYPE_I, PREPARE_TYPE_II,
    PREPARE_TYPE_III, PREPARE_TYPE_IV, RAW_SECTOR_512, REFRESH_INDEX_PULSE, SECTOR_SIZE_CODE_512,
    STEP_RATE_MS, WAIT_NO_DRIVE,
};
use crate::{cmdbits, command_type_of, intcond, status, CommandType, Fdc};

/// The running command and its sub-state. `Idle` is the only state in
/// which BUSY is clear and no timer needs to be armed (`MotorStop` keeps
/// the timer alive but is not a host-visible command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum CommandState {
    Idle,
    Restore(TypeIState),
    Seek(TypeIState),
    Step(TypeIState),
    ReadSectors(SectorState),
    WriteSectors(SectorState),
    ReadAddress(ReadAddressState),
    ReadTrack(ReadTrackState),
    MotorStop(MotorStopState),
}

/// Shared phases of the positioning commands. `Main` is the per-command
/// part: the step-out loop for Restore, the step loop for Seek, one step
/// for Step/Step-In/Step-Out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum TypeIState {
    Begin,
    SpinUpWait,
    SpinUpDone,
    Main,
    Verify(VerifyState),
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum VerifyState {
    Start,
    HeadSettled,
    NextHeader,
    CheckHeader,
}

/// Phases of Read Sector(s) and Write Sector(s); the two differ only in
/// the transfer direction and the write-protect gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum SectorState {
    Begin,
    SpinUpWait,
    HeadLoad,
    SearchStart,
    NextHeader,
    CheckHeader,
    TransferStart,
    TransferLoop,
    Crc,
    Rnf,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ReadAddressState {
    Begin,
    SpinUpWait,
    HeadLoad,
    WaitHeader,
    TransferStart,
    TransferLoop,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ReadTrackState {
    Begin,
    SpinUpWait,
    HeadLoad,
    WaitIndex,
    BuildTrack,
    TransferLoop,
    Complete,
}

/// Pseudo command counting nine index pulses after completion before the
/// motor bit drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum MotorStopState {
    Start,
    Wait,
    Complete,
}

impl Fdc {
    // -----------------------------------------------------------------
    // Command dispatch
    // -----------------------------------------------------------------

    /// Classify and start the command in the command register, then arm
    /// the prepare delay.
    pub(crate) fn execute_command(&mut self, now: u64) {
        let delay = match command_type_of(self.cr) {
            CommandType::I => self.execute_type_i(),
            CommandType::II => self.execute_type_ii(),
            CommandType::III => self.execute_type_iii(),
            CommandType::IV => self.execute_type_iv(),
        };
        // The fresh command can itself be replaced until its prepare +
        // spin-up phase is over.
        self.replace_possible = true;
        self.arm_timer(now, delay);
    }

    fn execute_type_i(&mut self) -> u32 {
        self.command_type = Some(CommandType::I);
        self.status_type_i = true;
        self.clear_irq();

        self.state = match self.cr & 0xF0 {
            0x00 => {
                trace!("fdc restore steprate={}ms", STEP_RATE_MS[(self.cr & 3) as usize]);
                CommandState::Restore(TypeIState::Begin)
            }
            0x10 => {
                trace!("fdc seek to {:#04x} tr={:#04x}", self.dr, self.tr);
                CommandState::Seek(TypeIState::Begin)
            }
            0x20 | 0x30 => {
                trace!("fdc step {}", self.step_direction);
                CommandState::Step(TypeIState::Begin)
            }
            0x40 | 0x50 => {
                trace!("fdc step in");
                self.step_direction = 1;
                CommandState::Step(TypeIState::Begin)
            }
            _ => {
                trace!("fdc step out");
                self.step_direction = -1;
                CommandState::Step(TypeIState::Begin)
            }
        };

        self.update_str(status::INDEX | status::CRC_ERROR | status::RNF, status::BUSY);
        PREPARE_TYPE_I
    }

    fn execute_type_ii(&mut self) -> u32 {
        self.command_type = Some(CommandType::II);
        self.status_type_i = false;
        self.clear_irq();

        if self.cr & 0x20 == 0 {
            trace!(
                "fdc read sector sr={:#04x} multi={}",
                self.sr,
                self.cr & cmdbits::MULTIPLE != 0
            );
            self.state = CommandState::ReadSectors(SectorState::Begin);
            self.update_str(
                status::DRQ
                    | status::LOST_DATA
                    | status::CRC_ERROR
                    | status::RNF
                    | status::RECORD_TYPE
                    | status::WPRT,
                status::BUSY,
            );
        } else {
            trace!(
                "fdc write sector sr={:#04x} multi={}",
                self.sr,
                self.cr & cmdbits::MULTIPLE != 0
            );
            self.state = CommandState::WriteSectors(SectorState::Begin);
            self.update_str(
                status::DRQ
                    | status::LOST_DATA
                    | status::CRC_ERROR
                    | status::RNF
                    | status::RECORD_TYPE,
                status::BUSY,
            );
        }
        PREPARE_TYPE_II
    }

    fn execute_type_iii(&mut self) -> u32 {
        self.command_type = Some(CommandType::III);
        self.status_type_i = false;
        self.clear_irq();

        match self.cr & 0xF0 {
            0xC0 => {
                trace!("fdc read address");
                self.state = CommandState::ReadAddress(ReadAddressState::Begin);
                self.update_str(
                    status::DRQ
                        | status::LOST_DATA
                        | status::CRC_ERROR
                        | status::RNF
                        | status::RECORD_TYPE
                        | status::WPRT,
                    status::BUSY,
                );
            }
            0xE0 => {
                trace!("fdc read track");
                self.state = CommandState::ReadTrack(ReadTrackState::Begin);
                self.update_str(
                    status::DRQ
                        | status::LOST_DATA
                        | status::CRC_ERROR
                        | status::RNF
                        | status::RECORD_TYPE
                        | status::WPRT,
                    status::BUSY,
                );
            }
            _ => {
                // TODO: extract and write back the sectors embedded in
                // the track data the host streams through the DMA.
                debug!("fdc write track not implemented, flagging RNF");
                self.update_str(0, status::RNF);
                self.state = CommandState::Idle;
            }
        }
        PREPARE_TYPE_III
    }

    fn execute_type_iv(&mut self) -> u32 {
        self.command_type = Some(CommandType::IV);
        trace!(
            "fdc force interrupt {:#04x} immediate={} index={}",
            self.cr,
            self.cr & intcond::IMMEDIATE != 0,
            self.cr & intcond::INDEX_PULSE != 0
        );

        // A running command keeps its status bits; an idle controller is
        // forced back to the type I status view.
        if self.status & status::BUSY == 0 {
            self.status_type_i = true;
        }

        self.interrupt_cond = self.cr & 0x0F;
        if self.interrupt_cond & intcond::IMMEDIATE != 0 {
            self.set_irq();
        } else {
            self.clear_irq();
        }

        // Ends the current command: BUSY drops, IRQ is left as set above,
        // and the motor-stop countdown begins.
        let tail = self.complete_command(false);
        PREPARE_TYPE_IV + tail
    }

    /// Advance the running command by one sub-state.
    pub(crate) fn dispatch_update(&mut self, now: u64, memory: &mut dyn DmaMemory) -> u32 {
        match self.state {
            CommandState::Idle => IMMEDIATE,
            CommandState::Restore(_) | CommandState::Seek(_) | CommandState::Step(_) => {
                self.update_type_i(now)
            }
            CommandState::ReadSectors(_) => self.update_read_sectors(now, memory),
            CommandState::WriteSectors(_) => self.update_write_sectors(now, memory),
            CommandState::ReadAddress(_) => self.update_read_address(now, memory),
            CommandState::ReadTrack(_) => self.update_read_track(now, memory),
            CommandState::MotorStop(_) => self.update_motor_stop(),
        }
    }

    /// Common completion path: drop BUSY, raise IRQ if asked, start the
    /// motor-stop countdown.
    pub(crate) fn complete_command(&mut self, raise_irq: bool) -> u32 {
        trace!("fdc command complete");
        self.update_str(status::BUSY, 0);
        if raise_irq {
            self.set_irq();
        }
        self.state = CommandState::MotorStop(MotorStopState::Start);
        IMMEDIATE
    }

    /// Start the motor for a type I/II/III command. Returns whether the
    /// six-index-pulse spin-up sequence has to run first.
    fn start_motor(&mut self, now: u64) -> bool {
        let spin_up = self.cr & cmdbits::SPIN_UP_DISABLE == 0
            && self.status & status::MOTOR_ON == 0;
        if spin_up {
            trace!("fdc start motor with spin-up");
            self.update_str(status::SPIN_UP, 0);
            self.index_pulse_counter = 0;
        } else {
            trace!("fdc start motor without spin-up");
        }
        self.update_str(0, status::MOTOR_ON);

        // The start-up angle of the platter is unknowable.
        if let Some(d) = self.selected_usable_drive() {
            if self.drives[d].index_pulse_at == 0 {
                self.index_pulse_init(now, d);
            }
        }
        spin_up
    }

    fn step_delay(&self) -> u32 {
        self.clock
            .us_to_fdc(STEP_RATE_MS[(self.cr & 0x03) as usize] * 1000)
    }

    // -----------------------------------------------------------------
    // Type I: Restore, Seek, Step
    // -----------------------------------------------------------------

    fn update_type_i(&mut self, now: u64) -> u32 {
        let st = match self.state {
            CommandState::Restore(s) | CommandState::Seek(s) | CommandState::Step(s) => s,
            _ => return IMMEDIATE,
        };

        let (next, delay) = match st {
            TypeIState::Begin => {
                if self.start_motor(now) {
                    (TypeIState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (TypeIState::SpinUpDone, IMMEDIATE)
                }
            }
            TypeIState::SpinUpWait => {
                if self.index_pulse_counter < IP_SPIN_UP {
                    (TypeIState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (TypeIState::SpinUpDone, IMMEDIATE)
                }
            }
            TypeIState::SpinUpDone => {
                self.update_str(0, status::SPIN_UP);
                // From here the command can no longer be replaced.
                self.replace_possible = false;
                if matches!(self.state, CommandState::Restore(_)) {
                    // Up to 255 step-out attempts, counted down in the
                    // track register. Preset only once spin-up is over so
                    // a replacing command sees the old value.
                    self.tr = 0xFF;
                }
                (TypeIState::Main, IMMEDIATE)
            }
            TypeIState::Main => self.type_i_main(),
            TypeIState::Verify(vs) => self.type_i_verify(now, vs),
            TypeIState::Complete => return self.complete_command(true),
        };

        self.set_type_i_state(next);
        delay
    }

    fn set_type_i_state(&mut self, st: TypeIState) {
        self.state = match self.state {
            CommandState::Restore(_) => CommandState::Restore(st),
            CommandState::Seek(_) => CommandState::Seek(st),
            CommandState::Step(_) => CommandState::Step(st),
            other => other,
        };
    }

    fn type_i_main(&mut self) -> (TypeIState, u32) {
        match self.state {
            CommandState::Restore(_) => self.restore_main(),
            CommandState::Seek(_) => self.seek_main(),
            _ => self.step_main(),
        }
    }

    /// One step-out attempt toward track zero.
    fn restore_main(&mut self) -> (TypeIState, u32) {
        if self.tr == 0 {
            // 255 attempts without seeing the track zero signal (e.g. no
            // drive selected or the drive is disabled).
            trace!("fdc restore failed to reach track 0");
            self.update_str(status::TRACK0, status::RNF);
            return (TypeIState::Complete, IMMEDIATE);
        }

        let at_track_zero = self
            .selected_enabled_drive()
            .is_some_and(|d| self.drives[d].head_track == 0);

        if at_track_zero {
            self.update_str(0, status::TRACK0);
            self.tr = 0;
            (TypeIState::Verify(VerifyState::Start), IMMEDIATE)
        } else {
            self.update_str(status::TRACK0, 0);
            self.tr = self.tr.wrapping_sub(1);
            if let Some(d) = self.selected_enabled_drive() {
                // head_track > 0 here, or we'd be in the branch above.
                self.drives[d].head_track -= 1;
            }
            (TypeIState::Main, self.step_delay())
        }
    }

    /// One step toward the track in the data register.
    fn seek_main(&mut self) -> (TypeIState, u32) {
        if self.tr == self.dr {
            return (TypeIState::Verify(VerifyState::Start), IMMEDIATE);
        }

        self.step_direction = if self.dr < self.tr { -1 } else { 1 };
        self.tr = self.tr.wrapping_add(self.step_direction as u8);

        let mut next = TypeIState::Main;
        let mut delay = self.step_delay();
        self.update_str(status::TRACK0, 0);

        // The physical head only moves when an enabled drive is selected;
        // the track register steps regardless.
        if let Some(d) = self.selected_enabled_drive() {
            let head = self.drives[d].head_track;
            if head == PHYSICAL_MAX_TRACK && self.step_direction == 1 {
                next = TypeIState::Verify(VerifyState::Start);
                delay = IMMEDIATE;
            } else if head == 0 && self.step_direction == -1 {
                self.tr = 0;
                next = TypeIState::Verify(VerifyState::Start);
                delay = IMMEDIATE;
            } else {
                self.drives[d].head_track =
                    (i16::from(head) + i16::from(self.step_direction)) as u8;
            }
            if self.drives[d].head_track == 0 {
                self.update_str(0, status::TRACK0);
            }
        }
        (next, delay)
    }

    /// A single step in the current direction.
    fn step_main(&mut self) -> (TypeIState, u32) {
        if self.cr & cmdbits::UPDATE_TRACK != 0 {
            self.tr = self.tr.wrapping_add(self.step_direction as u8);
        }

        let mut delay = self.step_delay();
        self.update_str(status::TRACK0, 0);

        if let Some(d) = self.selected_enabled_drive() {
            let head = self.drives[d].head_track;
            if head == PHYSICAL_MAX_TRACK && self.step_direction == 1 {
                delay = IMMEDIATE; // Clamped: the head does not move
            } else if head == 0 && self.step_direction == -1 {
                delay = IMMEDIATE;
            } else {
                self.drives[d].head_track =
                    (i16::from(head) + i16::from(self.step_direction)) as u8;
            }
            if self.drives[d].head_track == 0 {
                self.update_str(0, status::TRACK0);
            }
        }
        (TypeIState::Verify(VerifyState::Start), delay)
    }

    /// Optional verify phase shared by all type I commands: settle the
    /// head, then match ID fields against the track register for up to
    /// five revolutions.
    fn type_i_verify(&mut self, now: u64, vs: VerifyState) -> (TypeIState, u32) {
        match vs {
            VerifyState::Start => {
                if self.cr & cmdbits::VERIFY != 0 {
                    (
                        TypeIState::Verify(VerifyState::HeadSettled),
                        self.clock.us_to_fdc(HEAD_LOAD_US),
                    )
                } else {
                    (TypeIState::Complete, COMMAND_COMPLETE)
                }
            }
            VerifyState::HeadSettled => {
                self.index_pulse_counter = 0;
                (TypeIState::Verify(VerifyState::NextHeader), IMMEDIATE)
            }
            VerifyState::NextHeader => {
                if self.index_pulse_counter >= IP_ADDRESS_ID {
                    trace!("fdc type I verify RNF");
                    self.update_str(0, status::RNF);
                    return (TypeIState::Complete, COMMAND_COMPLETE);
                }
                match self.next_sector_id_bytes(now) {
                    None => (TypeIState::Verify(VerifyState::NextHeader), WAIT_NO_DRIVE),
                    Some(bytes) => (
                        // The ID field itself is ten more bytes:
                        // 3xA1, FE, track/side/sector/length, CRC.
                        TypeIState::Verify(VerifyState::CheckHeader),
                        self.transfer_cycles(bytes + 10),
                    ),
                }
            }
            VerifyState::CheckHeader => {
                if self.verify_track() {
                    self.update_str(status::RNF, 0);
                    (TypeIState::Complete, COMMAND_COMPLETE)
                } else {
                    (TypeIState::Verify(VerifyState::NextHeader), IMMEDIATE)
                }
            }
        }
    }

    /// Whether the ID field under the head matches the track register.
    /// With these image formats the header track always equals the
    /// physical track, so this reduces to checking the head position and
    /// that the requested side exists.
    fn verify_track(&self) -> bool {
        let Some(d) = self.selected_usable_drive() else {
            return false;
        };
        if self.drives[d].head_track != self.tr {
            return false;
        }
        if self.side == 1 && self.media_sides(d) == 1 {
            return false;
        }
        true
    }

    // -----------------------------------------------------------------
    // Type II: Read Sector(s) / Write Sector(s)
    // -----------------------------------------------------------------

    fn update_read_sectors(&mut self, now: u64, memory: &mut dyn DmaMemory) -> u32 {
        let st = match self.state {
            CommandState::ReadSectors(s) => s,
            _ => return IMMEDIATE,
        };

        let (next, delay) = match st {
            SectorState::Begin => {
                if self.start_motor(now) {
                    (SectorState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (SectorState::HeadLoad, IMMEDIATE)
                }
            }
            SectorState::SpinUpWait => {
                if self.index_pulse_counter < IP_SPIN_UP {
                    (SectorState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (SectorState::HeadLoad, IMMEDIATE)
                }
            }
            SectorState::HeadLoad => {
                if self.cr & cmdbits::HEAD_LOAD != 0 {
                    (SectorState::SearchStart, self.clock.us_to_fdc(HEAD_LOAD_US))
                } else {
                    (SectorState::SearchStart, IMMEDIATE)
                }
            }
            SectorState::SearchStart => {
                self.replace_possible = false;
                self.index_pulse_counter = 0;
                (SectorState::NextHeader, IMMEDIATE)
            }
            SectorState::NextHeader => {
                if self.index_pulse_counter >= IP_ADDRESS_ID {
                    (SectorState::Rnf, IMMEDIATE)
                } else {
                    match self.next_sector_id_bytes(now) {
                        None => (SectorState::NextHeader, WAIT_NO_DRIVE),
                        // Seven more bytes to read up to the sector
                        // number of the ID field: 3xA1, FE, track, side.
                        Some(bytes) => {
                            (SectorState::CheckHeader, self.transfer_cycles(bytes + 7))
                        }
                    }
                }
            }
            SectorState::CheckHeader => {
                if self.next_sector_id == self.sr {
                    // Length + CRC of the ID field, the two gaps, then
                    // the sync bytes and data address mark.
                    let to_data = (1 + 2 + GAP3A + GAP3B + 3 + 1) as u32;
                    (SectorState::TransferStart, self.transfer_cycles(to_data))
                } else {
                    (SectorState::NextHeader, IMMEDIATE)
                }
            }
            SectorState::TransferStart => match self.read_sector_to_buffer(self.sr) {
                Some(size) => {
                    self.dma.bytes_to_transfer = size;
                    self.dma.pos_in_buffer = 0;
                    (SectorState::TransferLoop, IMMEDIATE)
                }
                None => (SectorState::Rnf, IMMEDIATE),
            },
            SectorState::TransferLoop => {
                if self.dma.bytes_to_transfer > 0 {
                    self.dma.bytes_to_transfer -= 1;
                    let byte = self.work_buffer[self.dma.pos_in_buffer];
                    self.dma.pos_in_buffer += 1;
                    self.dma.push(byte, memory);
                    (SectorState::TransferLoop, self.transfer_cycles(1))
                } else {
                    (SectorState::Crc, self.transfer_cycles(2))
                }
            }
            SectorState::Crc => {
                // CRC always matches for these image formats. With the
                // multiple bit the next sector is tried, failing with RNF
                // past the end of the track.
                if self.cr & cmdbits::MULTIPLE != 0 {
                    self.sr = self.sr.wrapping_add(1);
                    (SectorState::Begin, IMMEDIATE)
                } else {
                    (SectorState::Complete, COMMAND_COMPLETE)
                }
            }
            SectorState::Rnf => {
                trace!("fdc read sector sr={:#04x} RNF", self.sr);
                self.update_str(0, status::RNF);
                return self.complete_command(true);
            }
            SectorState::Complete => return self.complete_command(true),
        };

        self.state = CommandState::ReadSectors(next);
        delay
    }

    fn update_write_sectors(&mut self, now: u64, memory: &mut dyn DmaMemory) -> u32 {
        // The write-protect input is honoured at any point of the
        // command, not just on entry.
        if self.selected_media_write_protected() {
            trace!("fdc write sector sr={:#04x} WPRT", self.sr);
            self.update_str(0, status::WPRT);
            return self.complete_command(true);
        }
        self.update_str(status::WPRT, 0);

        let st = match self.state {
            CommandState::WriteSectors(s) => s,
            _ => return IMMEDIATE,
        };

        let (next, delay) = match st {
            SectorState::Begin => {
                if self.start_motor(now) {
                    (SectorState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (SectorState::HeadLoad, IMMEDIATE)
                }
            }
            SectorState::SpinUpWait => {
                if self.index_pulse_counter < IP_SPIN_UP {
                    (SectorState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (SectorState::HeadLoad, IMMEDIATE)
                }
            }
            SectorState::HeadLoad => {
                if self.cr & cmdbits::HEAD_LOAD != 0 {
                    (SectorState::SearchStart, self.clock.us_to_fdc(HEAD_LOAD_US))
                } else {
                    (SectorState::SearchStart, IMMEDIATE)
                }
            }
            SectorState::SearchStart => {
                self.replace_possible = false;
                self.index_pulse_counter = 0;
                (SectorState::NextHeader, IMMEDIATE)
            }
            SectorState::NextHeader => {
                if self.index_pulse_counter >= IP_ADDRESS_ID {
                    (SectorState::Rnf, IMMEDIATE)
                } else {
                    match self.next_sector_id_bytes(now) {
                        None => (SectorState::NextHeader, WAIT_NO_DRIVE),
                        Some(bytes) => {
                            (SectorState::CheckHeader, self.transfer_cycles(bytes + 7))
                        }
                    }
                }
            }
            SectorState::CheckHeader => {
                if self.next_sector_id == self.sr {
                    let to_data = (1 + 2 + GAP3A + GAP3B + 3 + 1) as u32;
                    (SectorState::TransferStart, self.transfer_cycles(to_data))
                } else {
                    (SectorState::NextHeader, IMMEDIATE)
                }
            }
            SectorState::TransferStart => {
                // The sector lands on the media now; the pull loop below
                // only paces the DMA accounting at the real byte rate.
                match self.write_sector_from_ram(self.sr, memory) {
                    Some(size) => {
                        self.dma.bytes_to_transfer = size;
                        self.dma.pos_in_buffer = 0;
                        (SectorState::TransferLoop, IMMEDIATE)
                    }
                    None => (SectorState::Rnf, IMMEDIATE),
                }
            }
            SectorState::TransferLoop => {
                if self.dma.bytes_to_transfer > 0 {
                    self.dma.bytes_to_transfer -= 1;
                    let _ = self.dma.pull(memory);
                    (SectorState::TransferLoop, self.transfer_cycles(1))
                } else {
                    (SectorState::Crc, self.transfer_cycles(2))
                }
            }
            SectorState::Crc => {
                if self.cr & cmdbits::MULTIPLE != 0 {
                    self.sr = self.sr.wrapping_add(1);
                    (SectorState::Begin, IMMEDIATE)
                } else {
                    (SectorState::Complete, COMMAND_COMPLETE)
                }
            }
            SectorState::Rnf => {
                trace!("fdc write sector sr={:#04x} RNF", self.sr);
                self.update_str(0, status::RNF);
                return self.complete_command(true);
            }
            SectorState::Complete => return self.complete_command(true),
        };

        self.state = CommandState::WriteSectors(next);
        delay
    }

    // -----------------------------------------------------------------
    // Type III: Read Address / Read Track
    // -----------------------------------------------------------------

    fn update_read_address(&mut self, now: u64, memory: &mut dyn DmaMemory) -> u32 {
        let st = match self.state {
            CommandState::ReadAddress(s) => s,
            _ => return IMMEDIATE,
        };

        let (next, delay) = match st {
            ReadAddressState::Begin => {
                if self.start_motor(now) {
                    (ReadAddressState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (ReadAddressState::HeadLoad, IMMEDIATE)
                }
            }
            ReadAddressState::SpinUpWait => {
                if self.index_pulse_counter < IP_SPIN_UP {
                    (ReadAddressState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (ReadAddressState::HeadLoad, IMMEDIATE)
                }
            }
            ReadAddressState::HeadLoad => {
                self.replace_possible = false;
                if self.cr & cmdbits::HEAD_LOAD != 0 {
                    (
                        ReadAddressState::WaitHeader,
                        self.clock.us_to_fdc(HEAD_LOAD_US),
                    )
                } else {
                    (ReadAddressState::WaitHeader, IMMEDIATE)
                }
            }
            ReadAddressState::WaitHeader => match self.next_sector_id_bytes(now) {
                None => (ReadAddressState::WaitHeader, WAIT_NO_DRIVE),
                // Plus the three sync bytes and the address mark.
                Some(bytes) => (
                    ReadAddressState::TransferStart,
                    self.transfer_cycles(bytes + 4),
                ),
            },
            ReadAddressState::TransferStart => {
                let Some(d) = self.selected_drive_index() else {
                    return WAIT_NO_DRIVE;
                };
                let track = self.drives[d].head_track;

                if self.side == 1 && self.media_sides(d) == 1 {
                    // The requested side does not exist: the head sees
                    // noise instead of an ID field.
                    for slot in &mut self.work_buffer[..10] {
                        *slot = self.rng.next_byte();
                    }
                } else {
                    let field = [
                        0xA1,
                        0xA1,
                        0xA1,
                        0xFE,
                        track,
                        self.side,
                        self.next_sector_id,
                        SECTOR_SIZE_CODE_512,
                    ];
                    self.work_buffer[..8].copy_from_slice(&field);
                    let crc = crc16(&field);
                    self.work_buffer[8] = (crc >> 8) as u8;
                    self.work_buffer[9] = (crc & 0xFF) as u8;
                }

                // The first ID byte is mirrored into the sector register.
                self.sr = track;
                // Six bytes reach the DMA; the sync bytes and address
                // mark do not.
                self.dma.bytes_to_transfer = 6;
                self.dma.pos_in_buffer = 4;
                (ReadAddressState::TransferLoop, IMMEDIATE)
            }
            ReadAddressState::TransferLoop => {
                if self.dma.bytes_to_transfer > 0 {
                    self.dma.bytes_to_transfer -= 1;
                    let byte = self.work_buffer[self.dma.pos_in_buffer];
                    self.dma.pos_in_buffer += 1;
                    self.dma.push(byte, memory);
                    (ReadAddressState::TransferLoop, self.transfer_cycles(1))
                } else {
                    (ReadAddressState::Complete, COMMAND_COMPLETE)
                }
            }
            ReadAddressState::Complete => return self.complete_command(true),
        };

        self.state = CommandState::ReadAddress(next);
        delay
    }

    fn update_read_track(&mut self, now: u64, memory: &mut dyn DmaMemory) -> u32 {
        let st = match self.state {
            CommandState::ReadTrack(s) => s,
            _ => return IMMEDIATE,
        };

        let (next, delay) = match st {
            ReadTrackState::Begin => {
                if self.start_motor(now) {
                    (ReadTrackState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (ReadTrackState::HeadLoad, IMMEDIATE)
                }
            }
            ReadTrackState::SpinUpWait => {
                if self.index_pulse_counter < IP_SPIN_UP {
                    (ReadTrackState::SpinUpWait, REFRESH_INDEX_PULSE)
                } else {
                    (ReadTrackState::HeadLoad, IMMEDIATE)
                }
            }
            ReadTrackState::HeadLoad => {
                self.replace_possible = false;
                if self.cr & cmdbits::HEAD_LOAD != 0 {
                    (
                        ReadTrackState::WaitIndex,
                        self.clock.us_to_fdc(HEAD_LOAD_US),
                    )
                } else {
                    (ReadTrackState::WaitIndex, IMMEDIATE)
                }
            }
            // The transfer starts at the index pulse and covers one full
            // revolution.
            ReadTrackState::WaitIndex => match self.next_index_pulse_fdc(now) {
                None => (ReadTrackState::WaitIndex, WAIT_NO_DRIVE),
                Some(cycles) => (ReadTrackState::BuildTrack, cycles),
            },
            ReadTrackState::BuildTrack => {
                let Some(d) = self.selected_drive_index() else {
                    return WAIT_NO_DRIVE;
                };
                let track_len = self.bytes_per_track(d) as usize;

                if self.side == 1 && self.media_sides(d) != 2 {
                    // Missing side: one revolution of noise.
                    for slot in &mut self.work_buffer[..track_len] {
                        *slot = self.rng.next_byte();
                    }
                } else {
                    self.build_raw_track(d, track_len);
                }

                self.dma.bytes_to_transfer = track_len;
                self.dma.pos_in_buffer = 0;
                (ReadTrackState::TransferLoop, IMMEDIATE)
            }
            ReadTrackState::TransferLoop => {
                if self.dma.bytes_to_transfer > 0 {
                    self.dma.bytes_to_transfer -= 1;
                    let byte = self.work_buffer[self.dma.pos_in_buffer];
                    self.dma.pos_in_buffer += 1;
                    self.dma.push(byte, memory);
                    (ReadTrackState::TransferLoop, self.transfer_cycles(1))
                } else {
                    (ReadTrackState::Complete, COMMAND_COMPLETE)
                }
            }
            ReadTrackState::Complete => return self.complete_command(true),
        };

        self.state = CommandState::ReadTrack(next);
        delay
    }

    /// Synthesize one raw track with the standard layout: GAP1, then per
    /// sector the ID field and data field with their gaps and CRCs, then
    /// GAP5 filler out to the track boundary.
    fn build_raw_track(&mut self, d: usize, track_len: usize) {
        let sectors = self.media_sectors_per_track(d);
        let track = self.drives[d].head_track;
        let side = self.side;
        let mut pos = 0;

        for _ in 0..GAP1 {
            self.work_buffer[pos] = 0x4E;
            pos += 1;
        }

        for sector in 1..=sectors as u8 {
            if pos + RAW_SECTOR_512 > self.work_buffer.len() {
                break;
            }

            for _ in 0..GAP2 {
                self.work_buffer[pos] = 0x00;
                pos += 1;
            }

            let id_start = pos;
            for _ in 0..3 {
                self.work_buffer[pos] = 0xA1;
                pos += 1;
            }
            self.work_buffer[pos] = 0xFE; // ID address mark
            self.work_buffer[pos + 1] = track;
            self.work_buffer[pos + 2] = side;
            self.work_buffer[pos + 3] = sector;
            self.work_buffer[pos + 4] = SECTOR_SIZE_CODE_512;
            pos += 5;
            let crc = crc16(&self.work_buffer[id_start..pos]);
            self.work_buffer[pos] = (crc >> 8) as u8;
            self.work_buffer[pos + 1] = (crc & 0xFF) as u8;
            pos += 2;

            for _ in 0..GAP3A {
                self.work_buffer[pos] = 0x4E;
                pos += 1;
            }
            for _ in 0..GAP3B {
                self.work_buffer[pos] = 0x00;
                pos += 1;
            }

            let data_start = pos;
            for _ in 0..3 {
                self.work_buffer[pos] = 0xA1;
                pos += 1;
            }
            self.work_buffer[pos] = 0xFB; // Data address mark
            pos += 1;
            {
                let slot = &mut self.work_buffer[pos..pos + 512];
                if let Some(image) = self.media[d].as_deref() {
                    // Every sector exists on these images; a miss leaves
                    // the previous buffer content in place.
                    image.read_sector(track, side, sector, slot);
                }
            }
            pos += 512;
            let crc = crc16(&self.work_buffer[data_start..pos]);
            self.work_buffer[pos] = (crc >> 8) as u8;
            self.work_buffer[pos + 1] = (crc & 0xFF) as u8;
            pos += 2;

            for _ in 0..GAP4 {
                self.work_buffer[pos] = 0x4E;
                pos += 1;
            }
        }

        // GAP5: fill the rest of the revolution. An 11-sector track runs
        // past the nominal track length; the transfer is clipped there.
        while pos < track_len {
            self.work_buffer[pos] = 0x4E;
            pos += 1;
        }
    }

    // -----------------------------------------------------------------
    // Motor stop
    // -----------------------------------------------------------------

    /// Nine index pulses after the last command the motor switches off.
    /// The spin-up bit stays set.
    fn update_motor_stop(&mut self) -> u32 {
        let st = match self.state {
            CommandState::MotorStop(s) => s,
            _ => return IMMEDIATE,
        };
        match st {
            MotorStopState::Start => {
                self.index_pulse_counter = 0;
                self.state = CommandState::MotorStop(MotorStopState::Wait);
                IMMEDIATE
            }
            MotorStopState::Wait => {
                if self.index_pulse_counter < IP_MOTOR_OFF {
                    REFRESH_INDEX_PULSE
                } else {
                    self.state = CommandState::MotorStop(MotorStopState::Complete);
                    IMMEDIATE
                }
            }
            MotorStopState::Complete => {
                trace!("fdc motor stopped");
                self.update_str(status::MOTOR_ON, 0);
                self.state = CommandState::Idle;
                IMMEDIATE
            }
        }
    }
}
