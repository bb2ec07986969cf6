//! Breakpoint registry and commit.
//!
//! Owns the mapping from even byte-address to breakpoint descriptor and the
//! reconciliation step (`commit`) that materializes the registry onto
//! hardware just before every run. The registry never programs anything on
//! its own initiative: every physical effect happens inside
//! [`Registry::commit`] or, in legacy-exec mode, immediately inline.

use indexmap::IndexMap;
use itertools::Itertools;

use crate::decode::BREAK;
use crate::hwbp::HwbpPool;
use crate::transport::{Policy, Transport};

/// How a breakpoint is currently realized on the target.
///
/// The `Hw` variant carries its slot index directly rather than leaving the
/// registry to re-derive it from the pool by address on every access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Allocated {
    Unallocated,
    Sw,
    Hw(usize),
}

/// A single breakpoint's state, keyed by byte-address in [`Registry`].
#[derive(Clone, Copy, Debug)]
pub struct Breakpoint {
    pub active: bool,
    pub allocated: Allocated,
    /// The flash word originally at this address, captured at insertion.
    pub opcode: u16,
    /// The word immediately following, needed to simulate two-word
    /// instructions without a second flash read through the live trap.
    pub secondword: u16,
    pub timestamp: u64,
}

/// The breakpoint registry.
#[derive(Debug, Default)]
pub struct Registry {
    descriptors: IndexMap<u32, Breakpoint>,
    next_timestamp: u64,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    #[must_use]
    pub fn get(&self, addr: u32) -> Option<&Breakpoint> {
        self.descriptors.get(&addr)
    }

    fn next_ts(&mut self) -> u64 {
        let ts = self.next_timestamp;
        self.next_timestamp += 1;
        ts
    }

    /// Inserts or reactivates a breakpoint at `addr`.
    pub fn insert_breakpoint(&mut self, transport: &mut dyn Transport, policy: &dyn Policy, addr: u32) {
        if addr % 2 != 0 {
            log::warn!("ignoring insert_breakpoint at odd address {addr:#06x}");
            return;
        }
        if policy.is_old_exec() {
            transport.software_breakpoint_set(addr);
            return;
        }
        if let Some(bp) = self.descriptors.get_mut(&addr) {
            if !bp.active {
                bp.active = true;
            }
            return;
        }
        let opcode = transport.flash_read_word(addr);
        let secondword = transport.flash_read_word(addr + 2);
        let timestamp = self.next_ts();
        self.descriptors.insert(
            addr,
            Breakpoint {
                active: true,
                allocated: Allocated::Unallocated,
                opcode,
                secondword,
                timestamp,
            },
        );
    }

    /// Marks a breakpoint inactive; physical removal happens at the next
    /// [`Registry::commit`].
    pub fn remove_breakpoint(&mut self, transport: &mut dyn Transport, policy: &dyn Policy, addr: u32) {
        if addr % 2 != 0 {
            log::warn!("ignoring remove_breakpoint at odd address {addr:#06x}");
            return;
        }
        if policy.is_old_exec() {
            transport.software_breakpoint_clear(addr);
            return;
        }
        if let Some(bp) = self.descriptors.get_mut(&addr) {
            bp.active = false;
        }
    }

    /// Forgets every descriptor and releases all hardware resources.
    pub fn cleanup_breakpoints(&mut self, transport: &mut dyn Transport, pool: &mut HwbpPool) {
        self.descriptors.clear();
        pool.clear_all(transport);
        transport.software_breakpoint_clear_all();
    }

    /// Returns the original opcode at `addr` if a descriptor exists there
    /// (so decoders and the range analyzer never see a `BREAK` trap this
    /// registry installed itself), otherwise the raw transport read.
    pub fn read_filtered_flash_word(&self, transport: &mut dyn Transport, addr: u32) -> u16 {
        self.descriptors
            .get(&addr)
            .map_or_else(|| transport.flash_read_word(addr), |bp| bp.opcode)
    }

    /// Records that `addr`'s hardware slot was reclaimed out-of-band (by a
    /// range-step scaffold) and it is now realized as a software
    /// breakpoint instead. A no-op if no descriptor exists at `addr`.
    pub fn mark_sw(&mut self, addr: u32) {
        if let Some(bp) = self.descriptors.get_mut(&addr) {
            bp.allocated = Allocated::Sw;
        }
    }

    fn deallocate(&mut self, transport: &mut dyn Transport, pool: &mut HwbpPool, addr: u32) {
        if let Some(bp) = self.descriptors.get_mut(&addr) {
            match bp.allocated {
                Allocated::Hw(_) => {
                    pool.clear(transport, addr);
                }
                Allocated::Sw => {
                    transport.software_breakpoint_clear(addr);
                }
                Allocated::Unallocated => {}
            }
            bp.allocated = Allocated::Unallocated;
        }
    }

    /// Reconciles the registry against hardware just before a run. Returns
    /// `false` ("policy impossible" or a wire failure) when the caller must
    /// surface `SIGABRT`.
    pub fn commit(
        &mut self,
        transport: &mut dyn Transport,
        pool: &mut HwbpPool,
        policy: &dyn Policy,
        protected_bp: Option<u32>,
        release_temp: bool,
    ) -> bool {
        if release_temp && pool.temp_allocated() > 0 {
            pool.clear_temp(transport);
        }

        // Deallocate anything the current policy forbids.
        let forbidden: Vec<u32> = self
            .descriptors
            .iter()
            .filter(|(_, bp)| {
                (bp.allocated == Allocated::Sw && policy.is_onlyhwbps())
                    || (matches!(bp.allocated, Allocated::Hw(_)) && policy.is_onlyswbps())
            })
            .map(|(&addr, _)| addr)
            .collect_vec();
        for addr in forbidden {
            self.deallocate(transport, pool, addr);
        }

        // Release and delete inactive descriptors. A descriptor at
        // `protected_bp` is only exempt while it is a software breakpoint:
        // the PC sitting on it still needs the original opcode filtered out
        // of flash reads. An `Hw`-allocated descriptor at `protected_bp`
        // has no such need and must still be freed, or its slot leaks.
        let to_delete: Vec<u32> = self
            .descriptors
            .iter()
            .filter(|(&addr, bp)| {
                !bp.active && !(Some(addr) == protected_bp && bp.allocated == Allocated::Sw)
            })
            .map(|(&addr, _)| addr)
            .collect_vec();
        for addr in to_delete {
            self.deallocate(transport, pool, addr);
            self.descriptors.shift_remove(&addr);
        }

        let max_count = if policy.is_onlyhwbps() {
            pool.len()
        } else {
            usize::MAX
        };
        if self.descriptors.len() > max_count {
            return false;
        }
        if self.descriptors.is_empty() {
            return true;
        }

        let hwbps_allowed = !policy.is_onlyswbps();
        if hwbps_allowed && pool.temp_allocated() == 0 {
            if let Some((&addr, bp)) = self
                .descriptors
                .iter()
                .max_by_key(|(_, bp)| bp.timestamp)
                .map(|(addr, bp)| (addr, *bp))
            {
                if bp.allocated == Allocated::Unallocated {
                    let evicted = pool.unallocate_hwbp0(transport);
                    if let Some(slot) = pool.set(transport, addr) {
                        self.descriptors.get_mut(&addr).unwrap().allocated = Allocated::Hw(slot);
                    }
                    if let Some(evicted_addr) = evicted {
                        if let Some(evicted_bp) = self.descriptors.get_mut(&evicted_addr) {
                            evicted_bp.allocated = Allocated::Unallocated;
                        }
                    }
                }
            }
        }

        let remaining: Vec<u32> = self
            .descriptors
            .iter()
            .filter(|(_, bp)| bp.allocated == Allocated::Unallocated)
            .map(|(&addr, _)| addr)
            .collect_vec();
        for addr in remaining {
            let hwbps_allowed = !policy.is_onlyswbps();
            let slot = if hwbps_allowed { pool.set(transport, addr) } else { None };
            if let Some(slot) = slot {
                self.descriptors.get_mut(&addr).unwrap().allocated = Allocated::Hw(slot);
            } else {
                if !transport.software_breakpoint_set(addr) {
                    log::error!("flash write failed installing software breakpoint at {addr:#06x}");
                    return false;
                }
                self.descriptors.get_mut(&addr).unwrap().allocated = Allocated::Sw;
            }
        }

        true
    }
}
