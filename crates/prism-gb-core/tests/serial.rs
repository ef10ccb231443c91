use prism_gb_core::hardware::GameMode;
use prism_gb_core::mmu::Interrupts;
use prism_gb_core::serial::Serial;

fn ints() -> Interrupts {
    let mut ints = Interrupts::new();
    ints.write_flags(0x00);
    ints.end_cycle();
    ints
}

#[test]
fn disconnected_transfer_shifts_in_ones() {
    let mut serial = Serial::new(GameMode::Dmg, 0);
    let mut ints = ints();
    serial.write(0xFF01, 0x5A);
    serial.write(0xFF02, 0x81);

    let mut cycles = 0;
    while serial.read(0xFF02) & 0x80 != 0 {
        serial.step(&mut ints);
        cycles += 1;
        assert!(cycles < 4096, "transfer never completed");
    }

    assert_eq!(serial.read(0xFF01), 0xFF);
    assert_eq!(ints.read_flags() & 0x08, 0x08);
    assert_eq!(serial.take_output(), vec![0x5A]);
    assert!(serial.take_output().is_empty());
}

#[test]
fn transfer_waits_for_start_bit() {
    let mut serial = Serial::new(GameMode::Dmg, 0);
    let mut ints = ints();
    serial.write(0xFF01, 0x42);
    for _ in 0..4096 {
        serial.step(&mut ints);
    }
    assert_eq!(serial.read(0xFF01), 0x42);
    assert_eq!(ints.read_flags() & 0x08, 0x00);
}

#[test]
fn sc_reads_with_mode_specific_mask() {
    let dmg = Serial::new(GameMode::Dmg, 0);
    assert_eq!(dmg.read(0xFF02), 0x7E);
    let cgb = Serial::new(GameMode::Cgb, 0);
    assert_eq!(cgb.read(0xFF02), 0x7C);
}

#[test]
fn cgb_fast_clock_completes_sooner() {
    let mut fast = Serial::new(GameMode::Cgb, 0);
    let mut slow = Serial::new(GameMode::Cgb, 0);
    let mut ints_a = ints();
    let mut ints_b = ints();

    fast.write(0xFF01, 0x00);
    fast.write(0xFF02, 0x83);
    slow.write(0xFF01, 0x00);
    slow.write(0xFF02, 0x81);

    let mut fast_cycles = 0;
    while fast.read(0xFF02) & 0x80 != 0 {
        fast.step(&mut ints_a);
        fast_cycles += 1;
    }
    let mut slow_cycles = 0;
    while slow.read(0xFF02) & 0x80 != 0 {
        slow.step(&mut ints_b);
        slow_cycles += 1;
    }
    assert!(fast_cycles * 8 <= slow_cycles);
}
