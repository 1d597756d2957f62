/*!
Static ISR descriptor table.

Purpose
- Replace the source's per-opcode `switch` arms sharing one code path with
  a table lookup: `opcode -> IsrDescriptor`. The decoder consults this
  table to gate which fields copy from the host request into an emitted
  command, whether the channel mask must select exactly one channel, and
  whether the opcode counts toward the stall counter.
- Grounded in the teacher's `cpu/table.rs` dispatch-table idiom (a static
  array keyed by opcode), generalized from a dense `[OpInfo; 256]` to a
  small `match` over a sparse enum since this opcode set has sixteen
  members rather than two hundred fifty six.

Field-legality and blocking assignments for opcodes not exercised by the
queue-fan-out and backpressure scenarios (`WrSbk`, `WrAbk` fan out across
multiple channels without per-channel constraint) are a documented design
decision, not a transcription of upstream metadata that never shipped
with the retrieved source: see `DESIGN.md`.
*/

use crate::request::AimOpcode;

/// Which addressing fields a host request may legally contribute to an
/// emitted command for a given opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LegalFields {
    pub bank_index: bool,
    pub row_addr: bool,
    pub col_addr: bool,
}

/// Static per-opcode decode metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsrDescriptor {
    pub legal_fields: LegalFields,
    /// The channel mask must select exactly one channel.
    pub channel_count_eq_one: bool,
    /// Counts toward `stalled_aim_requests`; the host request cannot
    /// complete until every emitted command of this opcode retires.
    pub blocking: bool,
}

const fn fields(bank_index: bool, row_addr: bool, col_addr: bool) -> LegalFields {
    LegalFields {
        bank_index,
        row_addr,
        col_addr,
    }
}

/// Looks up the decode descriptor for an opcode that goes through the
/// generic compute/data-movement fan-out path.
///
/// `Eoc`, `Ewadd`, and `WrAflut` have bespoke decode behavior and are not
/// looked up here; calling this with one of them is a logic error.
#[must_use]
pub fn descriptor(opcode: AimOpcode) -> IsrDescriptor {
    match opcode {
        AimOpcode::WrSbk => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: false,
            blocking: false,
        },
        AimOpcode::WrGb => IsrDescriptor {
            legal_fields: fields(false, false, true),
            channel_count_eq_one: false,
            blocking: false,
        },
        AimOpcode::WrBias => IsrDescriptor {
            legal_fields: fields(false, false, true),
            channel_count_eq_one: false,
            blocking: false,
        },
        AimOpcode::WrAbk => IsrDescriptor {
            legal_fields: fields(false, true, true),
            channel_count_eq_one: false,
            blocking: false,
        },
        AimOpcode::RdMac => IsrDescriptor {
            legal_fields: fields(false, false, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::RdAf => IsrDescriptor {
            legal_fields: fields(false, false, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::RdSbk => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::CopyBkgb => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::CopyGbbk => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: false,
            blocking: false,
        },
        AimOpcode::MacSbk => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::MacAbk => IsrDescriptor {
            legal_fields: fields(false, true, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::Af => IsrDescriptor {
            legal_fields: fields(false, false, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::Ewmul => IsrDescriptor {
            legal_fields: fields(true, true, true),
            channel_count_eq_one: true,
            blocking: true,
        },
        AimOpcode::Eoc | AimOpcode::Ewadd | AimOpcode::WrAflut => {
            unreachable!("{opcode:?} has bespoke decode behavior, not a table descriptor")
        }
    }
}
