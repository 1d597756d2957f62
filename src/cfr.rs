/*!
Configuration-Function Register store.

Three host-writable mode registers that influence later ISR decoding.
Grounded in the source's `CFR_values`/`address_to_CFR` pair, collapsed
here into one map from address to a typed slot, per the redesign note:
a single lookup replaces the two parallel maps the source kept in sync
by hand.
*/

use crate::error::MemSystemError;

/// Initial value of the `Broadcast` register.
const BROADCAST_INIT: i64 = 0;
/// Initial value of the `EwmulBg` register.
const EWMUL_BG_INIT: i64 = 1;
/// Initial value of the `Afm` register.
const AFM_INIT: i64 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CfrSlot {
    Broadcast,
    EwmulBg,
    Afm,
}

fn slot_for_addr(addr: i64) -> Option<CfrSlot> {
    match addr {
        0 => Some(CfrSlot::Broadcast),
        1 => Some(CfrSlot::EwmulBg),
        2 => Some(CfrSlot::Afm),
        _ => None,
    }
}

/// Holds the current value of every CFR.
#[derive(Debug, Clone, Copy)]
pub struct CfrStore {
    broadcast: i64,
    ewmul_bg: i64,
    afm: i64,
}

impl Default for CfrStore {
    fn default() -> Self {
        Self {
            broadcast: BROADCAST_INIT,
            ewmul_bg: EWMUL_BG_INIT,
            afm: AFM_INIT,
        }
    }
}

impl CfrStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `data` to the CFR addressed by `addr`.
    ///
    /// # Errors
    /// Returns `MemSystemError::UnmappedCfrAddress` if `addr` does not
    /// name one of the three registers.
    pub fn write(&mut self, addr: i64, data: i64) -> Result<(), MemSystemError> {
        match slot_for_addr(addr).ok_or(MemSystemError::UnmappedCfrAddress(addr))? {
            CfrSlot::Broadcast => self.broadcast = data,
            CfrSlot::EwmulBg => self.ewmul_bg = data,
            CfrSlot::Afm => self.afm = data,
        }
        Ok(())
    }

    #[must_use]
    pub fn broadcast(&self) -> i64 {
        self.broadcast
    }

    #[must_use]
    pub fn ewmul_bg(&self) -> i64 {
        self.ewmul_bg
    }

    #[must_use]
    pub fn afm(&self) -> i64 {
        self.afm
    }
}
