//! A fake [`Transport`] for unit and integration tests.
//!
//! Not compiled into the published crate; gated behind `#[cfg(test)]` at
//! the crate root and reused from every module's test module plus the
//! `tests/` integration suite.

use std::collections::HashMap;

use crate::transport::{Policy, Transport};

/// An in-memory target: a flash image, SRAM, and the handful of registers
/// the core touches, with every wire call recorded for assertions.
#[derive(Default)]
pub struct FakeTransport {
    pub flash: HashMap<u32, u16>,
    pub sram: HashMap<u16, u8>,
    pub pc: u32,
    pub sreg: u8,
    pub sp: u16,

    pub swbp_set: Vec<u32>,
    pub swbp_clear: Vec<u32>,
    pub swbp_clear_all: usize,
    pub hwbp_set: Vec<(usize, u32)>,
    pub hwbp_clears: Vec<usize>,
    pub steps: usize,
    pub ran: usize,
    pub run_to: Vec<u32>,
    pub stopped: usize,

    /// Opcodes installed by `software_breakpoint_set`, so
    /// [`FakeTransport::flash_read_word`] can transparently return the
    /// `BREAK` trap the way real hardware would, while
    /// [`FakeTransport::original_word`] still exposes the real opcode for
    /// assertions.
    pub installed_traps: HashMap<u32, u16>,
    pub flash_write_fails: bool,
}

impl FakeTransport {
    #[must_use]
    pub fn with_program(words: &[(u32, u16)]) -> Self {
        let mut t = Self::default();
        t.flash.extend(words.iter().copied());
        t
    }

    #[must_use]
    pub fn original_word(&self, byte_addr: u32) -> u16 {
        self.flash.get(&byte_addr).copied().unwrap_or(0)
    }
}

impl Transport for FakeTransport {
    fn flash_read_word(&mut self, byte_addr: u32) -> u16 {
        self.installed_traps
            .get(&byte_addr)
            .copied()
            .or_else(|| self.flash.get(&byte_addr).copied())
            .unwrap_or(0)
    }

    fn software_breakpoint_set(&mut self, byte_addr: u32) -> bool {
        if self.flash_write_fails {
            return false;
        }
        self.swbp_set.push(byte_addr);
        let original = self.original_word(byte_addr);
        self.installed_traps.insert(byte_addr, crate::decode::BREAK);
        self.flash.entry(byte_addr).or_insert(original);
        true
    }

    fn software_breakpoint_clear(&mut self, byte_addr: u32) {
        self.swbp_clear.push(byte_addr);
        self.installed_traps.remove(&byte_addr);
    }

    fn software_breakpoint_clear_all(&mut self) {
        self.swbp_clear_all += 1;
        self.installed_traps.clear();
    }

    fn hardware_breakpoint_set(&mut self, slot: usize, byte_addr: u32) {
        self.hwbp_set.push((slot, byte_addr));
    }

    fn hardware_breakpoint_clear(&mut self, slot: usize) {
        self.hwbp_clears.push(slot);
    }

    fn program_counter_read(&mut self) -> u32 {
        self.pc
    }

    fn program_counter_write(&mut self, word_addr: u32) {
        self.pc = word_addr;
    }

    fn status_register_read(&mut self) -> u8 {
        self.sreg
    }

    fn status_register_write(&mut self, value: u8) {
        self.sreg = value;
    }

    fn stack_pointer_read(&mut self) -> u16 {
        self.sp
    }

    fn stack_pointer_write(&mut self, value: u16) {
        self.sp = value;
    }

    fn sram_read(&mut self, addr: u16, len: usize) -> Vec<u8> {
        (0..len as u16)
            .map(|off| self.sram.get(&(addr + off)).copied().unwrap_or(0))
            .collect()
    }

    fn sram_write(&mut self, addr: u16, data: &[u8]) {
        for (off, byte) in data.iter().enumerate() {
            self.sram.insert(addr + off as u16, *byte);
        }
    }

    fn step(&mut self) {
        self.steps += 1;
        self.pc += 1;
    }

    fn run(&mut self) {
        self.ran += 1;
    }

    fn run_to(&mut self, byte_addr: u32) {
        self.run_to.push(byte_addr);
    }

    fn stop(&mut self) {
        self.stopped += 1;
    }
}

/// A fixed-answer [`Policy`], defaulting to every flag off.
#[derive(Clone, Copy, Debug, Default)]
pub struct FakePolicy {
    pub onlyhwbps: bool,
    pub onlyswbps: bool,
    pub safe: bool,
    pub range: bool,
    pub old_exec: bool,
}

impl Policy for FakePolicy {
    fn is_onlyhwbps(&self) -> bool {
        self.onlyhwbps
    }

    fn is_onlyswbps(&self) -> bool {
        self.onlyswbps
    }

    fn is_safe(&self) -> bool {
        self.safe
    }

    fn is_range(&self) -> bool {
        self.range
    }

    fn is_old_exec(&self) -> bool {
        self.old_exec
    }
}
