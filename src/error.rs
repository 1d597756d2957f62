/*!
Fatal/configuration error type for the AiM memory system.

Purpose
- Separate *fatal* conditions (a misconfigured opcode, an out-of-range
  channel mask, a completion that doesn't match the queue head) from the
  two recoverable, in-band backpressure signals the system already
  expresses through return values: `send` returning `Ok(false)` for a
  full host queue, and `ChannelController::send` returning `false` for a
  full per-channel controller. Neither of those is an `Err` here; they
  are expected, steady-state behavior, not misconfiguration.

Every variant below is non-recoverable from inside the memory system: the
caller is expected to log it and abort the simulation, the same way the
source implementation throws a `ConfigurationError` and lets it propagate
to the top of the run loop.
*/

use thiserror::Error;

/// Fatal error raised by the memory system. All variants indicate a
/// configuration or ordering bug upstream; none of them is recoverable
/// by retrying.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum MemSystemError {
    /// A channel mask set a bit above bit 7 (`MAX_CHANNEL_COUNT`).
    #[error("channel mask {mask:#x} has bits set above bit 7 (max {max} channels)")]
    ChannelMaskOutOfRange { mask: u32, max: u8 },

    /// An opcode flagged `channel_count_eq_one` was dispatched with a mask
    /// that does not select exactly one channel.
    #[error("opcode {opcode:?} requires exactly one channel, mask {mask:#x} selects {count}")]
    ChannelMaskNotSingleChannel {
        opcode: crate::request::AimOpcode,
        mask: u32,
        count: u32,
    },

    /// A CFR write targeted an address with no mapped register.
    #[error("unmapped CFR address {0}")]
    UnmappedCfrAddress(i64),

    /// An opcode is recognized but not supported by this implementation
    /// (`ISR_WR_AFLUT`).
    #[error("opcode {0:?} is not supported")]
    UnsupportedOpcode(crate::request::AimOpcode),

    /// A `MemAccessRegion` value with no defined decode behavior.
    #[error("unknown memory access region for request kind {0:?}")]
    UnknownMemAccessRegion(crate::request::RequestKind),

    /// A completion callback's `host_req_id` did not match the head of
    /// the host queue — an ordering violation in the downstream
    /// controller/device model.
    #[error("completion for host_req_id {received} does not match queue head {expected}")]
    CompletionOrderViolation { expected: i64, received: i64 },

    /// `receive` was called while the host queue is empty.
    #[error("completion received but the host queue is empty")]
    CompletionOnEmptyQueue,

    /// `MemorySystemConfig::channel_count`, the supplied controller
    /// vector, and `DramDevice::channel_count` disagree. Caught at
    /// construction rather than left to surface as an out-of-bounds
    /// channel index the first time a request addresses the missing
    /// channel.
    #[error(
        "channel count mismatch: config={config}, controllers={controllers}, dram={dram}"
    )]
    ChannelCountMismatch {
        config: usize,
        controllers: usize,
        dram: usize,
    },
}
