//! Range analyzer.
//!
//! Disassembles a half-open `[start, end)` flash interval exactly once per
//! distinct interval, recording every branch point inside it and which of
//! those points can hand control outside the interval.

use std::collections::BTreeSet;

use crate::decode;
use crate::registry::Registry;
use crate::transport::Transport;

/// The successor addresses of a single decoded instruction. `None` stands
/// for a dynamic (indirect) destination that cannot be computed statically.
type Successors = Vec<Option<u32>>;

#[derive(Debug)]
struct Cached {
    start: u32,
    end: u32,
    words: Vec<(u32, u16)>,
    branch: Vec<u32>,
    exit: BTreeSet<u32>,
}

/// Lazily-memoized analysis of a flash interval.
#[derive(Debug, Default)]
pub struct RangeAnalyzer {
    cache: Option<Cached>,
}

impl RangeAnalyzer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops any memoized analysis, forcing the next [`RangeAnalyzer::analyze`]
    /// to re-walk the interval.
    pub fn reset(&mut self) {
        self.cache = None;
    }

    /// Re-analyzes `[start, end)` if it differs from the last analyzed
    /// interval. Returns `true` if a re-analysis happened.
    pub fn analyze(
        &mut self,
        transport: &mut dyn Transport,
        registry: &Registry,
        start: u32,
        end: u32,
    ) -> bool {
        if let Some(c) = &self.cache {
            if c.start == start && c.end == end {
                return false;
            }
        }

        let mut words = Vec::new();
        let mut branch = Vec::new();
        let mut exit = BTreeSet::new();

        let mut addr = start;
        while addr < end {
            let op = registry.read_filtered_flash_word(transport, addr);
            words.push((addr, op));

            let (successors, is_branch_point, len) = if decode::is_lds(op) || decode::is_sts(op) {
                (vec![Some(addr + 4)], false, 4)
            } else if decode::is_jmp(op) {
                let second = registry.read_filtered_flash_word(transport, addr + 2);
                words.push((addr + 2, second));
                let target = (u32::from(second) << 1) | (u32::from(op & 1) << 17);
                (vec![Some(target)], true, 4)
            } else if decode::is_call(op) {
                let second = registry.read_filtered_flash_word(transport, addr + 2);
                words.push((addr + 2, second));
                let target = (u32::from(second) << 1) | (u32::from(op & 1) << 17);
                (vec![Some(target)], true, 4)
            } else if decode::is_skip(op) {
                let next_word = registry.read_filtered_flash_word(transport, addr + 2);
                let next_len = if decode::is_two_word(next_word) { 4 } else { 2 };
                (vec![Some(addr + 2), Some(addr + 2 + next_len)], true, 2)
            } else if decode::is_brbs_brbc(op) {
                let target = decode::brbs_brbc_target(op, addr);
                (vec![Some(addr + 2), Some(target)], true, 2)
            } else if decode::is_rjmp_rcall(op) {
                let target = decode::rjmp_rcall_target(op, addr);
                (vec![Some(target)], true, 2)
            } else if decode::is_ijmp(op) || decode::is_ret_or_icall(op) {
                (vec![None], true, 2)
            } else {
                (vec![Some(addr + 2)], false, 2)
            };

            if is_branch_point {
                branch.push(addr);
            }
            if successor_leaves_interval(&successors, start, end) {
                exit.insert(addr);
            }

            addr += len;
        }

        branch.push(end);

        self.cache = Some(Cached {
            start,
            end,
            words,
            branch,
            exit,
        });
        true
    }

    /// Byte-addresses of every branch/skip/call/jmp/ret/rcall/rjmp point
    /// inside the interval, with `end` appended as a sentinel.
    #[must_use]
    pub fn branch_points(&self) -> &[u32] {
        self.cache.as_ref().map_or(&[], |c| c.branch.as_slice())
    }

    /// The lowest branch point strictly greater than `addr`, if any.
    #[must_use]
    pub fn next_branch_after(&self, addr: u32) -> Option<u32> {
        self.branch_points().iter().copied().find(|&b| b > addr)
    }

    #[must_use]
    pub fn is_branch_point(&self, addr: u32) -> bool {
        self.branch_points().contains(&addr)
    }

    #[must_use]
    pub fn is_exit(&self, addr: u32) -> bool {
        self.cache.as_ref().is_some_and(|c| c.exit.contains(&addr))
    }

    #[must_use]
    pub fn exit_points(&self) -> Vec<u32> {
        self.cache
            .as_ref()
            .map_or_else(Vec::new, |c| c.exit.iter().copied().collect())
    }
}

fn successor_leaves_interval(successors: &Successors, start: u32, end: u32) -> bool {
    successors
        .iter()
        .any(|s| s.map_or(true, |addr| addr < start || addr >= end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeTransport;

    #[test]
    fn straight_line_region_has_no_internal_branch_points() {
        let reg = Registry::new();
        let mut t = FakeTransport::with_program(&[(0x100, 0x0000), (0x102, 0x0000)]);
        let mut ra = RangeAnalyzer::new();
        assert!(ra.analyze(&mut t, &reg, 0x100, 0x104));
        assert_eq!(ra.branch_points(), &[0x104]);
        // The final instruction always falls through past `end`, so it is
        // necessarily an exit point.
        assert_eq!(ra.exit_points(), vec![0x102]);
    }

    #[test]
    fn ret_is_a_branch_point_and_an_exit() {
        let reg = Registry::new();
        // RET = 0x9508
        let mut t = FakeTransport::with_program(&[(0x118, 0x9508)]);
        let mut ra = RangeAnalyzer::new();
        ra.analyze(&mut t, &reg, 0x100, 0x120);
        assert!(ra.is_branch_point(0x118));
        assert!(ra.is_exit(0x118));
        assert_eq!(ra.branch_points(), &[0x118, 0x120]);
    }

    #[test]
    fn memoization_skips_reanalysis_of_same_interval() {
        let reg = Registry::new();
        let mut t = FakeTransport::with_program(&[(0x100, 0x0000)]);
        let mut ra = RangeAnalyzer::new();
        assert!(ra.analyze(&mut t, &reg, 0x100, 0x102));
        assert!(!ra.analyze(&mut t, &reg, 0x100, 0x102));
        assert!(ra.analyze(&mut t, &reg, 0x100, 0x104));
    }

    #[test]
    fn branch_target_inside_interval_is_not_an_exit() {
        let reg = Registry::new();
        // RJMP -2 (back to itself): 0xCFFF -> sign_extend12(0xFFF) = -1, target = addr+2-2 = addr.
        let mut t = FakeTransport::with_program(&[(0x100, 0xCFFF)]);
        let mut ra = RangeAnalyzer::new();
        ra.analyze(&mut t, &reg, 0x100, 0x110);
        assert!(!ra.is_exit(0x100));
    }

    #[test]
    fn jmp_target_outside_interval_is_an_exit() {
        let reg = Registry::new();
        // JMP (0x940C base) with second word encoding an out-of-range target.
        let mut t = FakeTransport::with_program(&[(0x100, 0x940C), (0x102, 0x1000)]);
        let mut ra = RangeAnalyzer::new();
        ra.analyze(&mut t, &reg, 0x100, 0x110);
        assert!(ra.is_exit(0x100));
    }
}
