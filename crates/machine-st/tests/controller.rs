//! End-to-end controller scenarios, driven exactly the way host software
//! drives the hardware: select a register through the DMA mode word,
//! write `$FF8604`, let cycles pass, read status back.

use format_st::{DiskImage, StImage, SECTOR_SIZE};
use machine_st::{bus, BusFault, MachineConfig, MachineModel, StMachine};
use wd_1772::{crc16, status};

const DISK_CTRL: u32 = bus::DISK_CONTROLLER;
const DMA_MODE: u32 = bus::DMA_MODE_STATUS;

/// One revolution at 300 RPM in CPU cycles on a plain ST.
const REV: u64 = 1_604_249;

fn machine() -> StMachine {
    StMachine::new(MachineConfig::default())
}

fn machine_with_disk() -> StMachine {
    let mut m = machine();
    m.insert_disk(0, Box::new(StImage::blank(9, 2, 80)));
    m
}

/// Select one of the four controller registers (0 = command/status).
fn select_reg(m: &mut StMachine, reg: u16) {
    m.io_write_word(DMA_MODE, 0x80 | (reg << 1)).expect("mode");
}

fn write_reg(m: &mut StMachine, reg: u16, value: u16) {
    select_reg(m, reg);
    m.io_write_word(DISK_CTRL, value).expect("reg write");
}

fn read_reg(m: &mut StMachine, reg: u16) -> u8 {
    select_reg(m, reg);
    m.io_read_word(DISK_CTRL).expect("reg read") as u8
}

fn command(m: &mut StMachine, value: u16) {
    write_reg(m, 0, value);
}

fn set_sector_count(m: &mut StMachine, count: u16) {
    m.io_write_word(DMA_MODE, 0x90).expect("mode");
    m.io_write_word(DISK_CTRL, count).expect("sector count");
    m.io_write_word(DMA_MODE, 0x80).expect("mode");
}

fn set_dma_address(m: &mut StMachine, address: u32) {
    m.io_write_byte(bus::DMA_ADDRESS_HIGH, (address >> 16) as u8)
        .expect("high");
    m.io_write_byte(bus::DMA_ADDRESS_MID, (address >> 8) as u8)
        .expect("mid");
    m.io_write_byte(bus::DMA_ADDRESS_LOW, address as u8)
        .expect("low");
}

/// Run until `done` holds, in 1000-cycle slices, up to `max` cycles.
fn run_until(m: &mut StMachine, max: u64, done: impl Fn(&StMachine) -> bool) -> bool {
    let mut spent = 0;
    while spent < max {
        if done(m) {
            return true;
        }
        m.run_cycles(1000);
        spent += 1000;
    }
    done(m)
}

fn run_to_idle(m: &mut StMachine, max: u64) {
    assert!(
        run_until(m, max, |m| !m.fdc().busy()),
        "command did not complete within {max} cycles"
    );
}

// ---------------------------------------------------------------------
// Boundary scenarios
// ---------------------------------------------------------------------

#[test]
fn restore_from_track_5_with_spin_up() {
    let mut m = machine_with_disk();
    m.fdc_mut().drive_mut(0).head_track = 5;

    command(&mut m, 0x00); // Restore, spin-up enabled, 6 ms steps
    assert!(m.fdc().busy(), "BUSY rises with the command write");

    // Early on, the spin-up bit is down and the command is still running.
    m.run_cycles(2_000);
    assert!(m.fdc().busy());
    assert_eq!(m.fdc().peek_status() & status::SPIN_UP, 0);

    // Spin-up needs six index pulses (under six revolutions), then five
    // steps at 6 ms apiece.
    run_to_idle(&mut m, 12_000_000);

    assert!(m.irq(), "completion raises the interrupt");
    let st = m.fdc().peek_status();
    assert_ne!(st & status::TRACK0, 0);
    assert_ne!(st & status::SPIN_UP, 0);
    assert_ne!(st & status::MOTOR_ON, 0);
    assert_eq!(st & status::RNF, 0);
    assert_eq!(m.fdc().drive(0).head_track, 0);
    assert_eq!(read_reg(&mut m, 1), 0, "track register lands on zero");
}

#[test]
fn spin_up_lasts_at_least_five_revolutions() {
    let mut m = machine_with_disk();
    command(&mut m, 0x00); // Restore at track 0, spin-up enabled
    m.run_cycles(5 * REV - 100_000);
    assert!(m.fdc().busy(), "six index pulses cannot fit in under five revs");
    run_to_idle(&mut m, 12_000_000);
}

#[test]
fn read_sector_with_zero_sector_count() {
    let mut m = machine_with_disk();
    m.fdc_mut()
        .media_mut(0)
        .expect("media")
        .write_sector(0, 0, 1, &[0x5A; SECTOR_SIZE]);

    // Sector register resets to 1; DMA sector count is 0 after reset.
    command(&mut m, 0x88); // Read Sector, spin-up disabled
    run_to_idle(&mut m, 4_000_000);

    assert_eq!(m.fdc().peek_status() & status::RNF, 0, "no RNF");
    assert!(m.irq());

    let dma_status = m.io_read_word(DMA_MODE).expect("dma status");
    assert_eq!(dma_status & 0x0001, 0, "DMA error bit dropped");
    assert_eq!(dma_status & 0x0002, 0, "sector count still zero");

    assert!(
        m.ram().slice(0, 0x10000).iter().all(|&b| b == 0),
        "no byte reached memory"
    );
    assert_eq!(m.fdc().dma().address(), 0);
}

#[test]
fn force_interrupt_during_seek() {
    let mut m = machine_with_disk();
    write_reg(&mut m, 3, 20); // Destination track in the data register
    command(&mut m, 0x10); // Seek, spin-up enabled

    // Mid-command: still inside spin-up or stepping.
    m.run_cycles(8_500_000);
    assert!(m.fdc().busy());

    command(&mut m, 0xD8); // Force Interrupt, immediate condition
    assert!(!m.fdc().busy(), "BUSY clears at once");
    assert!(m.irq());

    let st = read_reg(&mut m, 0);
    assert_eq!(st & status::BUSY, 0);
    assert_ne!(st & status::MOTOR_ON, 0, "motor keeps running");
    assert!(
        m.irq(),
        "the immediate condition stays latched across status reads"
    );
    assert!(m.fdc().drive(0).head_track <= 20);

    command(&mut m, 0xD0); // Clear the condition
    assert!(!m.irq(), "0xD0 releases the latch");
}

#[test]
fn media_inserted_mid_command_completes_it() {
    let mut m = machine(); // Empty drive
    set_dma_address(&mut m, 0x1000);
    set_sector_count(&mut m, 1);
    command(&mut m, 0x88); // Read Sector on the empty drive

    // The header search polls and waits; it never fails on its own.
    m.run_cycles(1_000_000);
    assert!(m.fdc().busy(), "still waiting for media");
    assert_eq!(m.fdc().peek_status() & status::RNF, 0);

    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i % 7) as u8 + 1).collect();
    let mut image = StImage::blank(9, 2, 80);
    image.write_sector(0, 0, 1, &payload);
    m.insert_disk(0, Box::new(image));

    run_to_idle(&mut m, 4_000_000);
    assert_eq!(m.fdc().peek_status() & status::RNF, 0);
    assert_eq!(m.ram().slice(0x1000, SECTOR_SIZE), &payload[..]);
    assert_eq!(m.fdc().dma().address(), 0x1000 + SECTOR_SIZE as u32);
    assert_eq!(m.fdc().dma().sector_count(), 0);
}

#[test]
fn read_address_on_missing_side_returns_noise() {
    let mut m = machine();
    m.insert_disk(0, Box::new(StImage::blank(9, 1, 80))); // Single-sided
    m.write_io_porta(0x04); // Drive 0, side 1
    set_dma_address(&mut m, 0x2000);
    set_sector_count(&mut m, 1);

    command(&mut m, 0xC8); // Read Address, spin-up disabled
    run_to_idle(&mut m, 4_000_000);

    let st = m.fdc().peek_status();
    assert_eq!(st & (status::RNF | status::CRC_ERROR), 0, "no error flags");
    // Six bytes entered the FIFO; a block is 16, so none reached RAM.
    assert_eq!(m.fdc().dma().fifo_len(), 6);
    assert_eq!(m.fdc().dma().address(), 0x2000);
    assert!(m.ram().slice(0x2000, 32).iter().all(|&b| b == 0));
}

#[test]
fn command_replacement_inside_window() {
    let mut m = machine_with_disk();
    m.fdc_mut().drive_mut(0).head_track = 5;
    write_reg(&mut m, 1, 5); // Track register matches the head
    write_reg(&mut m, 3, 10); // Seek destination

    command(&mut m, 0x08); // Restore, spin-up disabled
    command(&mut m, 0x18); // Seek, written inside the prepare window

    run_to_idle(&mut m, 4_000_000);
    assert_eq!(m.fdc().drive(0).head_track, 10, "the seek replaced the restore");
    assert_eq!(read_reg(&mut m, 1), 10);
}

#[test]
fn command_replacement_after_window_is_ignored() {
    let mut m = machine_with_disk();
    m.fdc_mut().drive_mut(0).head_track = 5;
    write_reg(&mut m, 1, 5);
    write_reg(&mut m, 3, 10);

    command(&mut m, 0x08); // Restore, spin-up disabled
    m.run_cycles(2_000); // Prepare (720 controller cycles) has elapsed
    command(&mut m, 0x18); // Too late: silently dropped

    run_to_idle(&mut m, 4_000_000);
    assert_eq!(m.fdc().drive(0).head_track, 0, "the restore ran to completion");
    assert_eq!(read_reg(&mut m, 1), 0);
    assert_eq!(read_reg(&mut m, 3), 10, "data register untouched");
}

// ---------------------------------------------------------------------
// Round-trip laws
// ---------------------------------------------------------------------

#[test]
fn write_then_read_sector_round_trip() {
    let mut m = machine_with_disk();
    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 13 % 251) as u8).collect();
    m.ram_mut().fill(0x8000, &payload);

    set_dma_address(&mut m, 0x8000);
    set_sector_count(&mut m, 1);
    write_reg(&mut m, 2, 3); // Sector 3
    command(&mut m, 0xA8); // Write Sector, spin-up disabled
    run_to_idle(&mut m, 4_000_000);
    let st = m.fdc().peek_status();
    assert_eq!(st & (status::RNF | status::WPRT), 0);

    set_dma_address(&mut m, 0xC000);
    set_sector_count(&mut m, 1);
    command(&mut m, 0x88); // Read it back elsewhere
    run_to_idle(&mut m, 4_000_000);

    assert_eq!(m.ram().slice(0xC000, SECTOR_SIZE), &payload[..]);
    assert_eq!(m.fdc().dma().address(), 0xC000 + SECTOR_SIZE as u32);
}

#[test]
fn read_address_returns_id_field_with_valid_crc() {
    let mut m = machine_with_disk();
    m.fdc_mut().drive_mut(0).head_track = 3;
    set_dma_address(&mut m, 0x4000);
    set_sector_count(&mut m, 1);

    // Three Read Address commands: 18 bytes, so one full DMA block
    // lands in RAM.
    for _ in 0..3 {
        command(&mut m, 0xC8);
        run_to_idle(&mut m, 4_000_000);
    }

    let ram = m.ram().slice(0x4000, 16).to_vec();
    for id in [&ram[0..6], &ram[6..12]] {
        assert_eq!(id[0], 3, "track byte");
        assert_eq!(id[1], 0, "side byte");
        assert!((1..=9).contains(&id[2]), "sector number on the track");
        assert_eq!(id[3], 2, "512-byte length code");
        let crc = crc16(&[0xA1, 0xA1, 0xA1, 0xFE, id[0], id[1], id[2], id[3]]);
        assert_eq!(id[4], (crc >> 8) as u8);
        assert_eq!(id[5], (crc & 0xFF) as u8);
    }

    assert_eq!(read_reg(&mut m, 2), 3, "sector register mirrors the track byte");
}

// ---------------------------------------------------------------------
// Invariants and error paths
// ---------------------------------------------------------------------

#[test]
fn write_protected_disk_fails_with_wprt() {
    let mut m = machine_with_disk();
    m.fdc_mut().media_mut(0).expect("media").set_write_protected(true);
    set_sector_count(&mut m, 1);

    command(&mut m, 0xA8); // Write Sector
    run_to_idle(&mut m, 100_000);

    assert_ne!(m.fdc().peek_status() & status::WPRT, 0);
    assert!(m.irq());
}

#[test]
fn step_in_at_track_90_does_not_move() {
    let mut m = machine_with_disk();
    m.fdc_mut().drive_mut(0).head_track = 90;
    command(&mut m, 0x58); // Step-In, update track, spin-up disabled
    run_to_idle(&mut m, 1_000_000);
    assert_eq!(m.fdc().drive(0).head_track, 90);
}

#[test]
fn step_out_at_track_0_does_not_move() {
    let mut m = machine_with_disk();
    command(&mut m, 0x78); // Step-Out, update track, spin-up disabled
    run_to_idle(&mut m, 1_000_000);
    assert_eq!(m.fdc().drive(0).head_track, 0);
    assert_ne!(m.fdc().peek_status() & status::TRACK0, 0);
}

#[test]
fn motor_stops_nine_index_pulses_after_completion() {
    let mut m = machine_with_disk();
    command(&mut m, 0x00); // Restore at track 0, spin-up enabled
    run_to_idle(&mut m, 12_000_000);
    assert_ne!(m.fdc().peek_status() & status::MOTOR_ON, 0);

    m.run_cycles(11 * REV);
    let st = m.fdc().peek_status();
    assert_eq!(st & status::MOTOR_ON, 0, "motor off after nine index pulses");
    assert_ne!(st & status::SPIN_UP, 0, "spin-up bit survives the motor stop");
}

#[test]
fn multiple_sector_read_runs_off_the_track_end() {
    let mut m = machine_with_disk();
    let payload8: Vec<u8> = vec![0x88; SECTOR_SIZE];
    let payload9: Vec<u8> = vec![0x99; SECTOR_SIZE];
    {
        let media = m.fdc_mut().media_mut(0).expect("media");
        media.write_sector(0, 0, 8, &payload8);
        media.write_sector(0, 0, 9, &payload9);
    }
    set_dma_address(&mut m, 0x3000);
    set_sector_count(&mut m, 4);
    write_reg(&mut m, 2, 8);

    command(&mut m, 0x98); // Read Sectors, multiple, spin-up disabled
    run_to_idle(&mut m, 15_000_000);

    // Sectors 8 and 9 transferred, then sector 10 fails after five revs.
    assert_ne!(m.fdc().peek_status() & status::RNF, 0);
    assert_eq!(m.ram().slice(0x3000, SECTOR_SIZE), &payload8[..]);
    assert_eq!(m.ram().slice(0x3200, SECTOR_SIZE), &payload9[..]);
    assert_eq!(m.fdc().dma().address(), 0x3400);
}

#[test]
fn seek_with_verify_confirms_track() {
    let mut m = machine_with_disk();
    write_reg(&mut m, 3, 7);
    command(&mut m, 0x1C); // Seek + verify, spin-up disabled
    run_to_idle(&mut m, 4_000_000);
    assert_eq!(m.fdc().peek_status() & status::RNF, 0);
    assert_eq!(m.fdc().drive(0).head_track, 7);
    assert_eq!(read_reg(&mut m, 1), 7);
}

#[test]
fn verify_on_missing_side_sets_rnf() {
    let mut m = machine();
    m.insert_disk(0, Box::new(StImage::blank(9, 1, 80)));
    m.write_io_porta(0x04); // Side 1 of a single-sided disk
    write_reg(&mut m, 3, 2);
    command(&mut m, 0x1C); // Seek + verify
    run_to_idle(&mut m, 12_000_000);
    assert_ne!(m.fdc().peek_status() & status::RNF, 0);
}

#[test]
fn restore_on_disabled_drive_gives_up_after_255_steps() {
    let mut m = machine_with_disk();
    m.enable_drive(0, false);
    command(&mut m, 0x08); // Restore, spin-up disabled
    run_to_idle(&mut m, 15_000_000);
    let st = m.fdc().peek_status();
    assert_ne!(st & status::RNF, 0);
    assert_eq!(st & status::TRACK0, 0);
    assert!(m.irq());
}

#[test]
fn completion_irq_clears_on_status_read() {
    let mut m = machine_with_disk();
    command(&mut m, 0x08); // Quick restore at track 0
    run_to_idle(&mut m, 1_000_000);
    assert!(m.irq());
    let _ = read_reg(&mut m, 0);
    assert!(!m.irq(), "status read acknowledges the interrupt");
}

#[test]
fn dma_address_is_masked_and_word_aligned() {
    let mut m = machine();
    m.io_write_byte(bus::DMA_ADDRESS_LOW, 0xFF).expect("low");
    assert_eq!(m.io_read_byte(bus::DMA_ADDRESS_LOW).expect("low"), 0xFE);
    m.io_write_byte(bus::DMA_ADDRESS_HIGH, 0xFF).expect("high");
    assert_eq!(m.io_read_byte(bus::DMA_ADDRESS_HIGH).expect("high"), 0x3F);
}

#[test]
fn dma_reset_on_direction_toggle() {
    let mut m = machine();
    set_sector_count(&mut m, 5);
    assert_eq!(m.fdc().dma().sector_count(), 5);

    m.io_write_word(DMA_MODE, 0x0180).expect("mode"); // Bit 8 toggles
    assert_eq!(m.fdc().dma().sector_count(), 0);
    let st = m.io_read_word(DMA_MODE).expect("status");
    assert_eq!(st & 1, 1, "fresh reset reads no-error");
}

#[test]
fn word_registers_fault_on_byte_access() {
    let mut m = machine();
    assert!(matches!(
        m.io_read_byte(bus::DISK_CONTROLLER),
        Err(BusFault::BadSize(_))
    ));
    assert!(matches!(
        m.io_write_byte(bus::DMA_MODE_STATUS, 0),
        Err(BusFault::BadSize(_))
    ));
    assert!(matches!(
        m.io_write_byte(bus::DISK_CONTROLLER + 1, 0),
        Err(BusFault::BadSize(_))
    ));
}

#[test]
fn floppy_mode_register_is_falcon_only() {
    let mut st = machine();
    assert!(matches!(
        st.io_read_byte(bus::FLOPPY_MODE),
        Err(BusFault::Unmapped(_))
    ));

    let mut falcon = StMachine::new(MachineConfig {
        model: MachineModel::Falcon,
        ..MachineConfig::default()
    });
    assert_eq!(falcon.io_read_byte(bus::FLOPPY_MODE).expect("read"), 0x80);
    falcon.io_write_byte(bus::FLOPPY_MODE, 0x03).expect("write");
}

#[test]
fn busy_drive_follows_command_lifecycle() {
    let mut m = machine_with_disk();
    assert_eq!(m.busy_drive(), None);
    command(&mut m, 0x08);
    assert_eq!(m.busy_drive(), Some(0));
    run_to_idle(&mut m, 1_000_000);
    assert_eq!(m.busy_drive(), None);
}

// ---------------------------------------------------------------------
// Save states
// ---------------------------------------------------------------------

#[test]
fn snapshot_mid_command_resumes_identically() {
    let mut m = machine_with_disk();
    let payload: Vec<u8> = (0..SECTOR_SIZE).map(|i| (i * 31 % 253) as u8).collect();
    m.fdc_mut()
        .media_mut(0)
        .expect("media")
        .write_sector(0, 0, 2, &payload);
    set_dma_address(&mut m, 0x6000);
    set_sector_count(&mut m, 1);
    write_reg(&mut m, 2, 2);
    command(&mut m, 0x88);

    // Snapshot inside the header search, before any byte moved to RAM.
    m.run_cycles(10_000);
    assert!(m.fdc().busy());
    let blob = m.save_state().expect("save");

    run_to_idle(&mut m, 4_000_000);

    let mut restored = StMachine::new(MachineConfig::default());
    restored.restore_state(&blob).expect("restore");
    assert!(restored.fdc().busy(), "restored mid-command");
    run_to_idle(&mut restored, 4_000_000);

    assert_eq!(restored.fdc().peek_status(), m.fdc().peek_status());
    assert_eq!(restored.fdc().dma().address(), m.fdc().dma().address());
    assert_eq!(
        restored.fdc().dma().sector_count(),
        m.fdc().dma().sector_count()
    );
    assert_eq!(
        restored.ram().slice(0x6000, SECTOR_SIZE),
        m.ram().slice(0x6000, SECTOR_SIZE)
    );
    assert_eq!(restored.ram().slice(0x6000, SECTOR_SIZE), &payload[..]);
}

#[test]
fn snapshot_preserves_media_contents() {
    let mut m = machine_with_disk();
    let payload = [0xC3u8; SECTOR_SIZE];
    m.fdc_mut()
        .media_mut(0)
        .expect("media")
        .write_sector(10, 1, 4, &payload);

    let blob = m.save_state().expect("save");
    let mut restored = StMachine::new(MachineConfig::default());
    restored.restore_state(&blob).expect("restore");

    let mut back = [0u8; SECTOR_SIZE];
    assert!(restored
        .fdc()
        .media(0)
        .expect("media")
        .read_sector(10, 1, 4, &mut back));
    assert_eq!(back, payload);
}
