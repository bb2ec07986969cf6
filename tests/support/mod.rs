//! Shared fixtures for the integration tests in this directory.
//!
//! Integration tests link against the published crate, not its
//! `#[cfg(test)]` internals, so the fake transport lives here rather than
//! being shared with `src/test_support.rs`.

use std::collections::HashMap;
use std::sync::Once;

use avrocd_breakexec::{Architecture, DeviceInfo, MemoryInfo, Policy, TargetConfig, Transport};

static LOGGER: Once = Once::new();

/// Initializes `env_logger` once per test binary, so `RUST_LOG=debug` shows
/// commit/allocation tracing the way it would on a real target.
pub fn init_logger() {
    LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

#[derive(Default)]
pub struct FakeTransport {
    pub flash: HashMap<u32, u16>,
    pub sram: HashMap<u16, u8>,
    pub pc: u32,
    pub sreg: u8,
    pub sp: u16,
    pub installed_traps: HashMap<u32, u16>,
    pub hwbp_set: Vec<(usize, u32)>,
    pub hwbp_clears: Vec<usize>,
    pub swbp_set: Vec<u32>,
    pub steps: usize,
    pub ran: usize,
    pub run_to: Vec<u32>,
}

impl FakeTransport {
    pub fn with_program(words: &[(u32, u16)]) -> Self {
        let mut t = Self::default();
        t.flash.extend(words.iter().copied());
        t
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
        self.swbp_set.push(byte_addr);
        let original = self.flash.get(&byte_addr).copied().unwrap_or(0);
        self.flash.entry(byte_addr).or_insert(original);
        self.installed_traps.insert(byte_addr, 0x9598);
        true
    }

    fn software_breakpoint_clear(&mut self, byte_addr: u32) {
        self.installed_traps.remove(&byte_addr);
    }

    fn software_breakpoint_clear_all(&mut self) {
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
        (0..len as u16).map(|off| self.sram.get(&(addr + off)).copied().unwrap_or(0)).collect()
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

    fn stop(&mut self) {}
}

#[derive(Clone, Copy, Default)]
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

pub fn avr8_config(hwbp_count: usize) -> TargetConfig {
    init_logger();
    TargetConfig {
        device: DeviceInfo {
            architecture: Architecture::Avr8,
        },
        memory: MemoryInfo {
            flash_size: 16 * 1024,
            page_size: 128,
            sram_base: 0x0100,
            sram_size: 0x0800,
        },
        hwbp_count,
    }
}
