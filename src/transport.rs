//! The collaborators this core drives but does not own.
//!
//! None of this module talks to real hardware. It defines the seam between
//! the breakpoint-and-execution core and the rest of the server: the
//! physical debug probe (USB HID / debugWIRE / JTAG transport), and the
//! `monitor` subsystem's read-only policy flags. Both are owned and
//! implemented elsewhere; the core only ever sees them through these traits.

use thiserror::Error;

/// Target architectures this core is able to drive.
///
/// Only [`Architecture::Avr8`] type-checks against the stepping engine
/// today; the enum exists so unsupported targets are rejected once, at
/// construction, rather than re-checked on every call into the
/// interrupt-safe stepping path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Architecture {
    /// Classic 8-bit AVR (`avr8`).
    Avr8,
    /// Anything else: `RAMPx`-extended AVR cores, XMEGA, or another family
    /// entirely. Always rejected at construction.
    Other,
}

/// Flash, SRAM and paging geometry, as read from the probe's device
/// database before the session starts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemoryInfo {
    /// Flash size in bytes.
    pub flash_size: usize,
    /// Flash page size in bytes.
    pub page_size: usize,
    /// Lowest byte address of internal SRAM.
    pub sram_base: u16,
    /// SRAM size in bytes.
    pub sram_size: usize,
}

impl MemoryInfo {
    /// Whether `CALL`/`RCALL`/`ICALL`/`EICALL` push a 3-byte return address.
    ///
    /// Flash larger than 128 KiB needs a 17-bit word address, which no
    /// longer fits the usual 2-byte (word-address) return slot on the
    /// stack.
    #[must_use]
    pub fn wide_return_address(&self) -> bool {
        self.flash_size > 128 * 1024
    }

    /// Upper (exclusive) bound of SRAM, for stack-pointer plausibility
    /// checks.
    #[must_use]
    pub fn sram_end(&self) -> u32 {
        u32::from(self.sram_base) + self.sram_size as u32
    }
}

/// Identifying information about the attached part.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DeviceInfo {
    /// Instruction-set architecture of the attached part.
    pub architecture: Architecture,
}

/// Configuration supplied once, at construction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TargetConfig {
    /// Attached device identity.
    pub device: DeviceInfo,
    /// Flash/SRAM geometry.
    pub memory: MemoryInfo,
    /// Number of hardware breakpoint comparators, including the implicit
    /// slot 0 used by `run_to`. Must be at least 1.
    pub hwbp_count: usize,
}

/// Fatal, out-of-band errors raised while constructing or operating the
/// core.
///
/// These are distinct from the in-band [`Signal`](crate::signal::Signal)
/// values returned by `resume_execution`/`single_step`/`range_step`: a
/// `CoreError` means the debug session itself cannot continue safely, not
/// that the target program hit a breakpoint or a stack fault.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Error)]
pub enum CoreError {
    /// Raised at construction for an architecture other than `avr8`, or for
    /// SRAM larger than 64 KiB. Both require `RAMPx`/`LAC`/`LAS`/`LAT`
    /// handling the interrupt-safe stepping path does not implement.
    #[error("unsupported target: architecture or memory layout requires extensions this core does not implement")]
    UnsupportedTarget,
    /// Raised at construction for a nonsensical `hwbp_count` (must be ≥ 1,
    /// since slot 0 is load-bearing for `run_to`).
    #[error("invalid configuration: hwbp_count must be at least 1")]
    InvalidConfig,
}

/// The physical debug probe, as seen by this core.
///
/// Addresses are byte addresses unless documented otherwise; the probe's own
/// wire protocol may use word addresses; converting between the two is this
/// trait impl's responsibility, not the core's.
pub trait Transport {
    /// Reads one flash word (raw: does not filter out installed software
    /// breakpoint traps).
    fn flash_read_word(&mut self, byte_addr: u32) -> u16;

    /// Programs a software breakpoint (the `BREAK` trap opcode) at
    /// `byte_addr`. Returns `false` on a wire-level failure to write flash.
    fn software_breakpoint_set(&mut self, byte_addr: u32) -> bool;

    /// Restores the original opcode at `byte_addr`.
    fn software_breakpoint_clear(&mut self, byte_addr: u32);

    /// Restores every software breakpoint trap the probe is tracking.
    fn software_breakpoint_clear_all(&mut self);

    /// Programs hardware breakpoint comparator `slot` (1-indexed; slot 0 is
    /// the implicit `run_to` comparator and is never programmed through
    /// this method).
    fn hardware_breakpoint_set(&mut self, slot: usize, byte_addr: u32);

    /// Clears hardware breakpoint comparator `slot` (1-indexed).
    fn hardware_breakpoint_clear(&mut self, slot: usize);

    /// Reads the program counter, in word-address units.
    fn program_counter_read(&mut self) -> u32;

    /// Writes the program counter, in word-address units.
    fn program_counter_write(&mut self, word_addr: u32);

    /// Reads the 8-bit status register (`SREG`).
    fn status_register_read(&mut self) -> u8;

    /// Writes the 8-bit status register (`SREG`).
    fn status_register_write(&mut self, value: u8);

    /// Reads the stack pointer.
    fn stack_pointer_read(&mut self) -> u16;

    /// Writes the stack pointer.
    fn stack_pointer_write(&mut self, value: u16);

    /// Reads `len` bytes of SRAM starting at `addr`.
    fn sram_read(&mut self, addr: u16, len: usize) -> Vec<u8>;

    /// Writes `data` to SRAM starting at `addr`.
    fn sram_write(&mut self, addr: u16, data: &[u8]);

    /// Single-steps the target one instruction, executed offline by the
    /// on-chip debug hardware.
    fn step(&mut self);

    /// Starts free-running execution.
    fn run(&mut self);

    /// Starts free-running execution, stopping when the PC reaches
    /// `byte_addr` (programs HWBP slot 0 as the comparator).
    fn run_to(&mut self, byte_addr: u32);

    /// Requests the target stop; the caller observes the effect on the next
    /// run-state poll, not synchronously.
    fn stop(&mut self);
}

/// Read-only policy flags, owned and mutated by the `monitor` subsystem.
///
/// This core has no say over any of them; it only reads.
pub trait Policy {
    /// Only hardware breakpoints may be used; software breakpoints are
    /// forbidden.
    fn is_onlyhwbps(&self) -> bool;
    /// Only software breakpoints may be used; hardware breakpoints are
    /// reserved entirely for stepping.
    fn is_onlyswbps(&self) -> bool;
    /// Interrupt-safe single-stepping is enabled.
    fn is_safe(&self) -> bool;
    /// Range stepping (`vCont;r`) is enabled.
    fn is_range(&self) -> bool;
    /// Legacy execution mode: breakpoints and stepping bypass this core's
    /// allocator entirely and go straight to the transport's primitives.
    fn is_old_exec(&self) -> bool;
}
