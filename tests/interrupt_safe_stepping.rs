//! Interrupt-safe single-stepping: instructions that touch the interrupt
//! bit directly, and the two-word/CALL simulation paths that avoid a
//! second wire step through a software breakpoint trap.

mod support;

use avrocd_breakexec::{Core, Signal};
use support::{avr8_config, FakePolicy, FakeTransport};

fn word(byte_addr: u32) -> u32 {
    byte_addr >> 1
}

#[test]
fn swbp_over_lds_is_simulated_without_a_wire_step() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let opcode = 0x9000 | (16 << 4); // LDS R16, 0x0123
    let mut t = FakeTransport::with_program(&[(0x0200, opcode), (0x0202, 0x0123)]);
    t.sram.insert(0x0123, 0x77);
    let p = FakePolicy {
        safe: true,
        onlyswbps: true,
        ..Default::default()
    };

    core.insert_breakpoint(&mut t, &p, 0x0200);
    core.resume_execution(&mut t, &p, None); // materializes the SWBP

    let sig = core.single_step(&mut t, &p, Some(0x0200));
    assert_eq!(sig, Signal::Trap);
    assert_eq!(t.steps, 0, "two-word simulation must not issue a wire step");
    assert_eq!(t.sram[&16], 0x77);
    assert_eq!(t.pc, word(0x0204));
}

#[test]
fn cli_is_simulated_never_hardware_stepped() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let mut t = FakeTransport::with_program(&[(0x0300, 0x94F8)]); // CLI
    t.sreg = 0x80;
    let p = FakePolicy {
        safe: true,
        ..Default::default()
    };

    let sig = core.single_step(&mut t, &p, Some(0x0300));
    assert_eq!(sig, Signal::Trap);
    assert_eq!(t.steps, 0);
    assert_eq!(t.sreg & 0x80, 0);
    assert_eq!(t.pc, word(0x0302));
}

#[test]
fn sei_is_simulated_and_sets_the_interrupt_bit() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let mut t = FakeTransport::with_program(&[(0x0300, 0x9478)]); // SEI
    t.sreg = 0x00;
    let p = FakePolicy {
        safe: true,
        ..Default::default()
    };

    let sig = core.single_step(&mut t, &p, Some(0x0300));
    assert_eq!(sig, Signal::Trap);
    assert_eq!(t.sreg & 0x80, 0x80);
}

#[test]
fn brie_branches_on_the_interrupt_bit() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    // BRIE +4 words
    let opcode: u16 = 0xF000 | (4 << 3) | 0x7;
    let mut t = FakeTransport::with_program(&[(0x0400, opcode)]);
    t.sreg = 0x80; // I set: branch is taken
    let p = FakePolicy {
        safe: true,
        ..Default::default()
    };

    let sig = core.single_step(&mut t, &p, Some(0x0400));
    assert_eq!(sig, Signal::Trap);
    assert_eq!(t.pc, word(0x0400 + 2 + 2 * 4));
}

#[test]
fn brie_falls_through_when_interrupt_bit_clear() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let opcode: u16 = 0xF000 | (4 << 3) | 0x7;
    let mut t = FakeTransport::with_program(&[(0x0400, opcode)]);
    t.sreg = 0x00;
    let p = FakePolicy {
        safe: true,
        ..Default::default()
    };

    core.single_step(&mut t, &p, Some(0x0400));
    assert_eq!(t.pc, word(0x0402));
}

#[test]
fn safe_step_restores_interrupt_bit_after_masked_hardware_step() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let mut t = FakeTransport::with_program(&[(0x0500, 0x0000)]); // an ordinary NOP-like word
    t.sreg = 0x80;
    let p = FakePolicy {
        safe: true,
        ..Default::default()
    };

    let sig = core.single_step(&mut t, &p, Some(0x0500));
    assert_eq!(sig, Signal::Trap);
    assert_eq!(t.steps, 1, "ordinary instructions still take a masked hardware step");
    assert_eq!(t.sreg & 0x80, 0x80, "I-bit must be restored after the masked step");
}

#[test]
fn call_simulation_pushes_a_well_formed_return_address() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let opcode = 0x940E; // CALL
    let mut t = FakeTransport::with_program(&[(0x0600, opcode), (0x0602, 0x0080)]);
    t.sp = 0x08FF;
    let p = FakePolicy {
        safe: true,
        onlyswbps: true,
        ..Default::default()
    };

    core.insert_breakpoint(&mut t, &p, 0x0600);
    core.resume_execution(&mut t, &p, None);

    let old_sp = t.sp;
    let sig = core.single_step(&mut t, &p, Some(0x0600));
    assert_eq!(sig, Signal::Trap);

    let width = 2u16; // flash_size in avr8_config is well under 128 KiB
    assert_eq!(old_sp - t.sp, width);
    let expected_target = 0x0080u32 << 1;
    assert_eq!(t.pc, word(expected_target));

    let ret_word = (0x0600u32 + 4) >> 1;
    let be = ret_word.to_be_bytes();
    assert_eq!(t.sram[&(t.sp + 1)], be[2]);
    assert_eq!(t.sram[&(t.sp + 2)], be[3]);
}

#[test]
fn stack_pointer_plausibility_gate_reports_sigbus() {
    let mut core = Core::new(avr8_config(1)).unwrap();
    let mut t = FakeTransport::with_program(&[(0x0700, 0x900F)]); // POP R0
    t.sp = 0x00FE; // one below sram_base(0x0100) - 1
    let p = FakePolicy::default();

    let sig = core.single_step(&mut t, &p, Some(0x0700));
    assert_eq!(sig, Signal::Bus);
}
