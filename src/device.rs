/*!
Out-of-scope collaborator contracts: the per-channel controller and the
DRAM device.

Purpose
- The decoder/dispatcher needs something to offer commands to and
  something to advance once per tick, but neither the controller's
  timing model nor the device's channel/bank-group/bank/row/column
  hierarchy is this crate's concern.
- `ChannelController` and `DramDevice` are the minimal interfaces the
  decoder compiles and is tested against; a real simulation supplies
  production implementations of both.

Grounded in the teacher's `bus::dma` module, which defines `CpuMemory`
and `OamWriter` as the minimal interfaces its `DmaController` needs from
collaborators it doesn't own, together with `MockMem`/`SinkOam` test
doubles in a `#[cfg(test)]` module.
*/

use crate::request::Request;

/// A per-channel DRAM controller.
pub trait ChannelController {
    /// Offer a command. Returns `false` if the controller's queue is
    /// full; the caller parks the command in an overflow queue and
    /// retries on a later tick.
    fn send(&mut self, req: Request) -> bool;

    /// Advance the controller by one memory-system tick.
    fn tick(&mut self);
}

/// The DRAM device underlying every channel.
pub trait DramDevice {
    /// Advance the device by one memory-system tick.
    fn tick(&mut self);

    /// Number of channels the device exposes.
    fn channel_count(&self) -> usize;

    /// Clock period in picoseconds, used to report `tCK`.
    fn tck_ps(&self) -> f32;
}
