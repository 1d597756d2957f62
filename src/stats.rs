/*!
Monotone counters exposed by the memory system.

Grounded in the source's `register_stat` call sites in `init()`: one
counter per `(RequestKind, MemAccessRegion)` pair, one per `AimOpcode`,
plus the cycle count and the two named event counters. `[AMBIENT]` this
crate has no statistics-registration framework to plug into (that's the
out-of-scope "statistics/logging plumbing" collaborator), so the counters
are plain fields on a struct returned by `MemorySystem::stats()` rather
than registered with an external reporter.
*/

use std::collections::HashMap;

use crate::request::{AimOpcode, MemAccessRegion, RequestKind};

/// Snapshot of every counter the memory system tracks.
#[derive(Debug, Clone)]
pub struct Stats {
    /// Memory-system clock, advanced once per `tick`.
    pub cycles: u64,
    /// Number of `send` calls rejected because the host queue was full.
    pub isr_queue_full: u64,
    /// Number of ticks spent stalled waiting for a blocking command.
    pub wait_read_stall: u64,
    rw_requests: HashMap<(RequestKind, MemAccessRegion), u64>,
    aim_requests: HashMap<AimOpcode, u64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    #[must_use]
    pub fn new() -> Self {
        Self {
            cycles: 0,
            isr_queue_full: 0,
            wait_read_stall: 0,
            rw_requests: HashMap::new(),
            aim_requests: HashMap::new(),
        }
    }

    pub(crate) fn record_rw(&mut self, kind: RequestKind, region: MemAccessRegion) {
        *self.rw_requests.entry((kind, region)).or_insert(0) += 1;
    }

    pub(crate) fn record_aim(&mut self, opcode: AimOpcode) {
        *self.aim_requests.entry(opcode).or_insert(0) += 1;
    }

    #[must_use]
    pub fn rw_count(&self, kind: RequestKind, region: MemAccessRegion) -> u64 {
        self.rw_requests.get(&(kind, region)).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn aim_count(&self, opcode: AimOpcode) -> u64 {
        self.aim_requests.get(&opcode).copied().unwrap_or(0)
    }
}
