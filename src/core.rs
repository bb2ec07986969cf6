//! Assembles the breakpoint registry, hardware-breakpoint pool and range
//! analyzer into the public API consumed by the RSP layer.

use crate::hwbp::HwbpPool;
use crate::range::RangeAnalyzer;
use crate::registry::{Allocated, Registry};
use crate::signal::Signal;
use crate::step::{simulate, unsafe_step};
use crate::transport::{CoreError, Policy, TargetConfig, Transport};
use crate::{decode, step};

fn byte_to_word(addr: u32) -> u32 {
    addr >> 1
}

fn word_to_byte(word: u32) -> u32 {
    word << 1
}

/// The breakpoint-and-execution core.
///
/// One instance drives exactly one attached target for the lifetime of a
/// debug session. Architecture and memory-layout validity are checked once,
/// here, rather than on every stepping call.
pub struct Core {
    config: TargetConfig,
    registry: Registry,
    pool: HwbpPool,
    range: RangeAnalyzer,
    /// Exit-point scaffolding installed directly as `BREAK` traps during a
    /// range step, with no corresponding registry descriptor. Drained
    /// whenever the temporary HWBP reservation they stand in for is
    /// released.
    scaffold_swbps: Vec<u32>,
}

impl Core {
    /// Validates `config` and constructs a core for it.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::UnsupportedTarget`] for anything other than
    /// classic `avr8` with at most 64 KiB of SRAM, and
    /// [`CoreError::InvalidConfig`] for a zero-slot HWBP pool.
    pub fn new(config: TargetConfig) -> Result<Self, CoreError> {
        if config.device.architecture != crate::transport::Architecture::Avr8
            || config.memory.sram_size > 64 * 1024
        {
            return Err(CoreError::UnsupportedTarget);
        }
        if config.hwbp_count == 0 {
            return Err(CoreError::InvalidConfig);
        }
        Ok(Self {
            pool: HwbpPool::new(config.hwbp_count),
            registry: Registry::new(),
            range: RangeAnalyzer::new(),
            scaffold_swbps: Vec::new(),
            config,
        })
    }

    pub fn insert_breakpoint(&mut self, transport: &mut dyn Transport, policy: &dyn Policy, addr: u32) {
        self.registry.insert_breakpoint(transport, policy, addr);
    }

    pub fn remove_breakpoint(&mut self, transport: &mut dyn Transport, policy: &dyn Policy, addr: u32) {
        self.registry.remove_breakpoint(transport, policy, addr);
    }

    pub fn cleanup_breakpoints(&mut self, transport: &mut dyn Transport) {
        self.registry.cleanup_breakpoints(transport, &mut self.pool);
        self.scaffold_swbps.clear();
    }

    /// `hwbp_count - 1` (for the safe-stepping slot-0 reservation) when only
    /// hardware breakpoints are allowed, or `None` ("effectively
    /// unbounded") otherwise.
    #[must_use]
    pub fn max_bp_count(&self, policy: &dyn Policy) -> Option<usize> {
        if policy.is_onlyhwbps() {
            Some(self.pool.len().saturating_sub(usize::from(policy.is_safe())))
        } else {
            None
        }
    }

    fn commit(
        &mut self,
        transport: &mut dyn Transport,
        policy: &dyn Policy,
        protected_bp: Option<u32>,
        release_temp: bool,
    ) -> bool {
        let releasing = release_temp && self.pool.temp_allocated() > 0;
        let ok = self
            .registry
            .commit(transport, &mut self.pool, policy, protected_bp, release_temp);
        if releasing {
            for addr in self.scaffold_swbps.drain(..) {
                transport.software_breakpoint_clear(addr);
            }
        }
        ok
    }

    fn current_pc(&self, transport: &mut dyn Transport) -> u32 {
        word_to_byte(transport.program_counter_read())
    }

    fn position_pc(&self, transport: &mut dyn Transport, addr: Option<u32>) -> u32 {
        match addr {
            Some(addr) => {
                transport.program_counter_write(byte_to_word(addr));
                addr
            }
            None => self.current_pc(transport),
        }
    }

    pub fn resume_execution(
        &mut self,
        transport: &mut dyn Transport,
        policy: &dyn Policy,
        addr: Option<u32>,
    ) -> Option<Signal> {
        self.range.reset();
        if !self.commit(transport, policy, None, true) {
            return Some(Signal::Abort);
        }
        let mut pc = self.position_pc(transport, addr);
        let op = self.registry.read_filtered_flash_word(transport, pc);
        if op == decode::BREAK {
            return Some(Signal::Ill);
        }
        if op == decode::SLEEP {
            pc += 2;
            transport.program_counter_write(byte_to_word(pc));
        }
        if policy.is_old_exec() {
            transport.run();
        } else {
            self.pool.execute(transport);
        }
        None
    }

    pub fn single_step(&mut self, transport: &mut dyn Transport, policy: &dyn Policy, addr: Option<u32>) -> Signal {
        self.single_step_inner(transport, policy, addr, true)
    }

    fn single_step_inner(
        &mut self,
        transport: &mut dyn Transport,
        policy: &dyn Policy,
        addr: Option<u32>,
        fresh: bool,
    ) -> Signal {
        if fresh {
            self.range.reset();
        }
        let mut pc = self.position_pc(transport, addr);
        let op = self.registry.read_filtered_flash_word(transport, pc);

        if op == decode::SLEEP {
            pc += 2;
            transport.program_counter_write(byte_to_word(pc));
            return Signal::Trap;
        }
        if policy.is_old_exec() {
            transport.step();
            return Signal::Trap;
        }
        if op == decode::BREAK {
            return Signal::Ill;
        }
        if !self.commit(transport, policy, Some(pc), fresh) {
            return Signal::Abort;
        }

        if decode::is_push(op)
            || decode::is_pop(op)
            || decode::is_ret(op)
            || decode::is_reti(op)
            || decode::is_call_family(op)
        {
            let sp = transport.stack_pointer_read();
            if step::stack_pointer_margin_violated(op, sp, self.config.memory.sram_base) {
                return Signal::Bus;
            }
        }

        if let Some(bp) = self.registry.get(pc) {
            if bp.allocated == Allocated::Sw && decode::is_two_word(op) {
                let new_pc = simulate::simulate_two_word(transport, &self.config.memory, op, bp.secondword, pc);
                transport.program_counter_write(byte_to_word(new_pc));
                return Signal::Trap;
            }
        }

        if !policy.is_safe() {
            transport.step();
            return Signal::Trap;
        }

        let second = self.registry.read_filtered_flash_word(transport, pc + 2);
        if let Some(new_pc) = unsafe_step::try_simulate(transport, op, second, pc) {
            transport.program_counter_write(byte_to_word(new_pc));
            return Signal::Trap;
        }

        let sreg = transport.status_register_read();
        let i_was_set = sreg & 0x80 != 0;
        if i_was_set {
            transport.status_register_write(sreg & !0x80);
        }
        transport.step();
        if i_was_set {
            let current = transport.status_register_read();
            transport.status_register_write(current | 0x80);
        }
        Signal::Trap
    }

    pub fn range_step(
        &mut self,
        transport: &mut dyn Transport,
        policy: &dyn Policy,
        start: u32,
        end: u32,
    ) -> Option<Signal> {
        if !policy.is_range() || policy.is_old_exec() || start % 2 != 0 || end % 2 != 0 || start == end {
            return Some(self.single_step_inner(transport, policy, None, true));
        }

        let new_range = self.range.analyze(transport, &self.registry, start, end);
        let pc = self.current_pc(transport);
        if !self.commit(transport, policy, Some(pc), new_range) {
            return Some(Signal::Abort);
        }

        if pc < start || pc >= end {
            log::warn!("range_step: pc {pc:#06x} outside [{start:#06x}, {end:#06x})");
            return Some(self.single_step_inner(transport, policy, None, true));
        }

        let op = self.registry.read_filtered_flash_word(transport, pc);
        let on_swbp = self.registry.get(pc).is_some_and(|bp| bp.allocated == Allocated::Sw);
        if self.range.is_exit(pc) || on_swbp || op == decode::BREAK || op == decode::SLEEP || new_range {
            return Some(self.single_step_inner(transport, policy, None, false));
        }

        if self.pool.temp_allocated() == 0 {
            let exits = self.range.exit_points();
            if policy.is_onlyhwbps() && self.pool.available() == 0 {
                return Some(Signal::Abort);
            }
            let demoted = if exits.len() <= self.pool.available() {
                self.pool.set_temp(transport, &exits)
            } else {
                // Cannot cover every exit: fall back to branch-to-branch
                // hopping below, with no scaffold installed at all.
                Vec::new()
            };
            for addr in demoted {
                transport.software_breakpoint_set(addr);
                if self.registry.get(addr).is_some() {
                    self.registry.mark_sw(addr);
                } else {
                    self.scaffold_swbps.push(addr);
                }
            }
        }

        if self.pool.temp_allocated() >= self.range.exit_points().len() && !self.range.exit_points().is_empty() {
            self.pool.execute(transport);
            return None;
        }

        if self.range.is_branch_point(pc) {
            Some(self.single_step_inner(transport, policy, None, false))
        } else if let Some(next) = self.range.next_branch_after(pc) {
            transport.run_to(next);
            None
        } else {
            Some(self.single_step_inner(transport, policy, None, false))
        }
    }
}
