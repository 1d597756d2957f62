/*!
Request: the unit of work flowing through the AiM memory system.

Purpose
- Carry a host request (Read/Write/AiM) from `send` through decode, and
  carry the per-channel commands the decoder spawns from it, all the way
  to controller dispatch and completion.
- The same type is reused for both the original host request and every
  per-channel command cloned from it during decode (mirroring the
  source, which clones `Request` rather than introducing a separate
  "command" type).

`channel_mask` overloading
- For AiM opcodes, `channel_mask` is a one-hot-per-bit bitmask: each set
  bit names a channel that participates in the ISR.
- For Read/Write requests with `mem_access_region == Mem`, `channel_mask`
  is instead a raw channel *index* (0..MAX_CHANNEL_COUNT), not a bitmask.
  This mirrors the host ABI of the system this crate models; see
  `MemorySystem`'s Read/Write decode paths for the two interpretations.
*/

use std::fmt;
use std::rc::Rc;

use crate::error::MemSystemError;

/// Maximum number of DRAM channels a memory system can address.
pub const MAX_CHANNEL_COUNT: u8 = 8;

/// Completion notifier invoked exactly once per accepted host request.
///
/// The decoder rewrites this field on every per-channel command it emits
/// so that controllers notify the memory system (`MemorySystem::receive`)
/// rather than the host directly; the host only ever observes the
/// callback stored on its original `Request`. Fallible so a fatal
/// ordering violation surfaced while a controller retires a command
/// (`MemorySystem::receive`'s error path) reaches the caller instead of
/// being silently dropped.
pub type Callback = Rc<dyn Fn(&Request) -> Result<(), MemSystemError>>;

/// Top-level request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Read,
    Write,
    AiM,
}

/// Which memory region a Read/Write request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemAccessRegion {
    /// General-purpose register file: no controller traffic.
    Gpr,
    /// Configuration-function register store (see `crate::cfr`).
    Cfr,
    /// DRAM proper: routed to a per-channel controller.
    Mem,
}

/// Every AiM opcode this core recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AimOpcode {
    WrSbk,
    WrGb,
    WrBias,
    WrAbk,
    RdMac,
    RdAf,
    RdSbk,
    CopyBkgb,
    CopyGbbk,
    MacSbk,
    MacAbk,
    Af,
    Ewmul,
    Ewadd,
    Eoc,
    /// Recognized but unsupported: decoding this opcode is a fatal
    /// configuration error.
    WrAflut,
}

/// A host request or a per-channel command cloned from one.
#[derive(Clone)]
pub struct Request {
    pub kind: RequestKind,
    /// Meaningful only when `kind == RequestKind::AiM`.
    pub opcode: Option<AimOpcode>,
    /// Meaningful for `Read`/`Write`.
    pub mem_access_region: Option<MemAccessRegion>,
    /// Linear host address; used for CFR addressing and bookkeeping.
    pub addr: i64,
    /// Payload for CFR writes.
    pub data: i64,
    /// One-hot channel mask (AiM paths) or raw channel index (MEM
    /// Read/Write paths) — see module docs.
    pub channel_mask: u32,
    /// `None` when absent (source used -1); 0..=15 when present.
    pub bank_index: Option<u8>,
    pub row_addr: i64,
    /// Indexed by op iteration for multi-column ISRs.
    pub col_addr: i64,
    /// Iteration count for column-sweep ISRs; `None` (source: -1) means 1.
    pub opsize: Option<i64>,
    /// Populated from the CFR store during decode of `Af`.
    pub afm: i64,
    /// Populated from the CFR store during decode of `MacAbk`/`MacSbk`.
    pub broadcast: i64,
    /// Populated from the CFR store during decode of `MacAbk`.
    pub ewmul_bg: i64,
    /// Identifier assigned by the host; shared by every command emitted
    /// from the same host request.
    pub host_req_id: i64,
    /// Identifier assigned by the decoder, one per emitted command,
    /// strictly monotonically increasing across the simulation.
    pub aim_req_id: i64,
    /// Resolved `[channel, bank_group, bank, row, column]`, `-1` where
    /// inapplicable. Populated by `apply_addr_map`.
    pub addr_vec: [i64; 5],
    /// Completion notifier. `None` on requests that complete with no
    /// controller traffic (CFR/GPR accesses, `Ewadd`).
    pub callback: Option<Callback>,
}

impl Request {
    /// Build a bare host request; addressing/decoder-derived fields
    /// default to their "absent" values.
    #[must_use]
    pub fn new(kind: RequestKind, host_req_id: i64) -> Self {
        Self {
            kind,
            opcode: None,
            mem_access_region: None,
            addr: 0,
            data: 0,
            channel_mask: 0,
            bank_index: None,
            row_addr: 0,
            col_addr: 0,
            opsize: None,
            afm: 0,
            broadcast: 0,
            ewmul_bg: 0,
            host_req_id,
            aim_req_id: -1,
            addr_vec: [-1; 5],
            callback: None,
        }
    }

    /// Convenience constructor for an AiM ISR request.
    #[must_use]
    pub fn aim(opcode: AimOpcode, host_req_id: i64) -> Self {
        Self {
            opcode: Some(opcode),
            ..Self::new(RequestKind::AiM, host_req_id)
        }
    }

    /// Convenience constructor for a Read/Write request.
    #[must_use]
    pub fn access(kind: RequestKind, region: MemAccessRegion, host_req_id: i64) -> Self {
        debug_assert!(matches!(kind, RequestKind::Read | RequestKind::Write));
        Self {
            mem_access_region: Some(region),
            ..Self::new(kind, host_req_id)
        }
    }

    /// Number of column-sweep iterations: `opsize == None` (source: -1)
    /// is treated as 1.
    #[must_use]
    pub fn iterations(&self) -> i64 {
        match self.opsize {
            None | Some(-1) => 1,
            Some(n) => n,
        }
    }

    /// Invoke the stored callback, if any, propagating whatever error it
    /// reports instead of swallowing it.
    pub(crate) fn invoke_callback(&self) -> Result<(), MemSystemError> {
        match &self.callback {
            Some(cb) => cb(self),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("kind", &self.kind)
            .field("opcode", &self.opcode)
            .field("mem_access_region", &self.mem_access_region)
            .field("host_req_id", &self.host_req_id)
            .field("aim_req_id", &self.aim_req_id)
            .field("channel_mask", &format_args!("{:#x}", self.channel_mask))
            .field("bank_index", &self.bank_index)
            .field("row_addr", &self.row_addr)
            .field("col_addr", &self.col_addr)
            .field("addr_vec", &self.addr_vec)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iterations_defaults_to_one() {
        let mut req = Request::aim(AimOpcode::WrSbk, 0);
        assert_eq!(req.iterations(), 1);
        req.opsize = Some(-1);
        assert_eq!(req.iterations(), 1);
        req.opsize = Some(3);
        assert_eq!(req.iterations(), 3);
    }

    #[test]
    fn callback_invoked_with_request_snapshot() {
        use std::cell::Cell;
        use std::rc::Rc as StdRc;

        let seen = StdRc::new(Cell::new(-1));
        let seen_clone = StdRc::clone(&seen);
        let mut req = Request::access(RequestKind::Read, MemAccessRegion::Mem, 42);
        req.callback = Some(Rc::new(move |r: &Request| {
            seen_clone.set(r.host_req_id);
            Ok(())
        }));

        req.invoke_callback().unwrap();
        assert_eq!(seen.get(), 42);
    }

    #[test]
    fn callback_absent_is_a_noop() {
        let req = Request::access(RequestKind::Write, MemAccessRegion::Gpr, 1);
        req.invoke_callback().unwrap();
    }
}
