//! Hardware-breakpoint pool.
//!
//! A fixed-size set of comparator slots on the probe. Slot 0 is special: it
//! is never wire-programmed through [`HwbpPool::set`]/[`HwbpPool::clear`],
//! since it is consumed implicitly by [`HwbpPool::execute`] via `run_to`.
//! That is why [`HwbpPool::unallocate_hwbp0`] goes out of its way to keep it
//! free whenever possible.

use crate::transport::Transport;

/// The hardware-breakpoint comparator pool.
#[derive(Debug)]
pub struct HwbpPool {
    /// `slots[0]` is the implicit `run_to` comparator; `slots[1..]` are
    /// wire-programmed HWBPs.
    slots: Vec<Option<u32>>,
    /// Addresses that occupy a temporary reservation made by
    /// [`HwbpPool::set_temp`], so [`HwbpPool::clear_temp`] can free exactly
    /// those slots and nothing else.
    temp: Vec<usize>,
}

impl HwbpPool {
    /// Constructs a pool with `count` total slots (including slot 0).
    ///
    /// # Panics
    ///
    /// Panics if `count == 0`. Callers must validate `hwbp_count >= 1` at
    /// construction (see [`crate::transport::TargetConfig`]).
    #[must_use]
    pub fn new(count: usize) -> Self {
        assert!(count >= 1, "hwbp pool must have at least one slot");
        Self {
            slots: vec![None; count],
            temp: Vec::new(),
        }
    }

    /// Total number of slots, including slot 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        false // constructed with at least one slot
    }

    /// Finds the slot currently holding `addr`, if any.
    #[must_use]
    pub fn find(&self, addr: u32) -> Option<usize> {
        self.slots.iter().position(|s| *s == Some(addr))
    }

    /// Number of free slots.
    #[must_use]
    pub fn available(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Allocates the lowest-indexed free slot for `addr`. The wire program
    /// call is issued only for slots `>= 1`; slot 0 is programmed lazily at
    /// run start.
    pub fn set(&mut self, transport: &mut dyn Transport, addr: u32) -> Option<usize> {
        let slot = self.slots.iter().position(Option::is_none)?;
        self.slots[slot] = Some(addr);
        if slot >= 1 {
            transport.hardware_breakpoint_set(slot, addr);
        }
        Some(slot)
    }

    /// Frees the slot holding `addr`, if any, issuing a wire clear for
    /// slots `>= 1`.
    pub fn clear(&mut self, transport: &mut dyn Transport, addr: u32) -> bool {
        let Some(slot) = self.find(addr) else {
            return false;
        };
        self.slots[slot] = None;
        if slot >= 1 {
            transport.hardware_breakpoint_clear(slot);
        }
        self.temp.retain(|&s| s != slot);
        true
    }

    /// Forgets every slot and issues a wire clear for every slot `>= 1`.
    pub fn clear_all(&mut self, transport: &mut dyn Transport) {
        for slot in 1..self.slots.len() {
            if self.slots[slot].is_some() {
                transport.hardware_breakpoint_clear(slot);
            }
        }
        self.slots.iter_mut().for_each(|s| *s = None);
        self.temp.clear();
    }

    /// Frees slot 0, migrating or evicting as needed so the caller can
    /// demote the displaced address (if any) to a software breakpoint.
    ///
    /// Returns the address that must now be realized as a SWBP, or `None`
    /// if slot 0 was already free or its occupant was simply migrated.
    pub fn unallocate_hwbp0(&mut self, transport: &mut dyn Transport) -> Option<u32> {
        let Some(addr0) = self.slots[0] else {
            return None;
        };
        // A free slot >= 1: migrate slot 0's occupant there, no demotion.
        if let Some(free) = (1..self.slots.len()).find(|&i| self.slots[i].is_none()) {
            self.slots[0] = None;
            self.slots[free] = Some(addr0);
            transport.hardware_breakpoint_set(free, addr0);
            return None;
        }
        // Only one HWBP total: nowhere to put it, return for SWBP demotion.
        if self.slots.len() == 1 {
            self.slots[0] = None;
            return Some(addr0);
        }
        // Evict slot 1, move slot 0's occupant there.
        let evicted = self.slots[1];
        self.slots[0] = None;
        self.slots[1] = Some(addr0);
        transport.hardware_breakpoint_set(1, addr0);
        evicted
    }

    /// Attempts to reserve HWBPs (via slot 0 first, then by eviction) for
    /// every address in `addrs`. Returns the full list of addresses that
    /// could not be seated and must now be realized as software
    /// breakpoints by the caller.
    pub fn set_temp(&mut self, transport: &mut dyn Transport, addrs: &[u32]) -> Vec<u32> {
        let mut demoted = Vec::new();
        if let Some(evicted) = self.unallocate_hwbp0(transport) {
            demoted.push(evicted);
        }
        for &addr in addrs {
            if self.find(addr).is_some() {
                // Already resident (e.g. slot 0 now free and reused below);
                // nothing further to do for this address.
                continue;
            }
            if let Some(slot) = self.slots.iter().position(Option::is_none) {
                self.slots[slot] = Some(addr);
                if slot >= 1 {
                    transport.hardware_breakpoint_set(slot, addr);
                }
                self.temp.push(slot);
            } else {
                // Evict the oldest (lowest-index, excluding slot 0 which is
                // already free at this point) HWBP allocation.
                if let Some(victim) = (1..self.slots.len()).find(|&i| self.slots[i].is_some()) {
                    let victim_addr = self.slots[victim].take().unwrap();
                    demoted.push(victim_addr);
                    self.slots[victim] = Some(addr);
                    transport.hardware_breakpoint_set(victim, addr);
                    self.temp.push(victim);
                } else {
                    demoted.push(addr);
                }
            }
        }
        demoted
    }

    /// Frees every slot reserved by the last [`HwbpPool::set_temp`], leaving
    /// non-temporary HWBPs untouched.
    pub fn clear_temp(&mut self, transport: &mut dyn Transport) {
        for slot in self.temp.drain(..).collect::<Vec<_>>() {
            if self.slots[slot].is_some() {
                self.slots[slot] = None;
                if slot >= 1 {
                    transport.hardware_breakpoint_clear(slot);
                }
            }
        }
    }

    /// Number of slots currently held by the outstanding temp reservation;
    /// `0` when none is outstanding.
    #[must_use]
    pub fn temp_allocated(&self) -> usize {
        self.temp.len()
    }

    /// Starts execution: `run_to` if slot 0 holds an address, otherwise a
    /// plain `run`.
    pub fn execute(&self, transport: &mut dyn Transport) {
        if let Some(addr) = self.slots[0] {
            transport.run_to(addr);
        } else {
            transport.run();
        }
    }
}
