/*!
`MemorySystem`: the decoder/dispatcher core.

Purpose
- Accept host requests (`send`), decode the head of the host queue one
  opcode at a time (`tick`), and retire blocking commands as controllers
  report completion (`receive`).
- Own every piece of mutable state the decoder touches: the host queue,
  the per-channel overflow queues, the stall counter, the CFR store, the
  monotonic command-id counter, and the statistics counters.

Grounded in the teacher's orchestration layer: `bus::clock::tick` (fixed
per-cycle phase ordering delegating to collaborators), `cpu::dispatch::step`
(priority-ordered early-exit state machine: stall check first, then
dispatch), and `bus::dma::DmaController` (the controller/device traits
this module depends on and cannot implement itself).

`[AMBIENT]` Not `Sync`/`Send` across threads without external
synchronization: every mutation happens from `send`, `tick`, or `receive`,
invoked from one scheduler thread, matching the teacher's single-writer
`Bus`/`DmaController` design.
*/

#[cfg(test)]
mod tests;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use log::{error, trace};

use crate::cfr::CfrStore;
use crate::config::MemorySystemConfig;
use crate::device::{ChannelController, DramDevice};
use crate::error::MemSystemError;
use crate::isr;
use crate::request::{AimOpcode, Callback, MemAccessRegion, Request, RequestKind, MAX_CHANNEL_COUNT};
use crate::stats::Stats;

pub const ISR_SIZE: usize = 1 << 21;

/// Decoder state as described by the distilled specification's state
/// machine. `[AMBIENT]` derived at query time from `stalled_aim_requests`,
/// the overflow queues, and the host queue, rather than tracked
/// separately, so it cannot drift from the state it describes — the same
/// idea as the teacher's plain accessor methods (`DmaController::is_active`,
/// `DmaController::stall_remaining`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    Idle,
    Stalled,
    Draining,
    Dispatching,
}

/// State shared between `MemorySystem` and the completion callbacks
/// installed on outgoing per-channel commands, so a production
/// `ChannelController` can invoke `receive` asynchronously without
/// borrowing the whole `MemorySystem`.
struct QueueState {
    queue: VecDeque<Request>,
    stalled_aim_requests: i64,
    /// Latched by `make_receiver_callback` when a controller reports a
    /// completion `MemorySystem::tick` cannot hand an `Err` back for
    /// directly (the callback runs underneath `ChannelController::send`/
    /// `tick`, whose signatures return no `Result`). `tick` checks and
    /// clears this on every call so the fatal condition still aborts the
    /// simulation instead of being dropped on the floor.
    fatal: Option<MemSystemError>,
}

impl QueueState {
    fn receive(shared: &Rc<RefCell<QueueState>>, req: &Request) -> Result<(), MemSystemError> {
        let mut state = shared.borrow_mut();
        let expected = match state.queue.front() {
            Some(head) => head.host_req_id,
            None => return Err(MemSystemError::CompletionOnEmptyQueue),
        };
        if req.host_req_id != expected {
            return Err(MemSystemError::CompletionOrderViolation {
                expected,
                received: req.host_req_id,
            });
        }
        state.stalled_aim_requests -= 1;
        if state.stalled_aim_requests == 0 {
            let host_req = state.queue.pop_front().expect("checked non-empty above");
            drop(state);
            host_req.invoke_callback()?;
        }
        Ok(())
    }
}

/// Builds the completion notifier installed on every per-channel command
/// the decoder emits. A production `ChannelController` invokes this
/// directly (not `MemorySystem::receive`) when a command it holds
/// retires; a fatal ordering violation is both returned to that caller
/// and latched on `QueueState` so `tick` reports it even when the
/// controller that invoked the callback ignores its return value.
fn make_receiver_callback(shared: Rc<RefCell<QueueState>>) -> Callback {
    Rc::new(move |req: &Request| {
        let result = QueueState::receive(&shared, req);
        if let Err(err) = &result {
            error!("fatal completion error: {err}");
            shared.borrow_mut().fatal.get_or_insert_with(|| err.clone());
        }
        result
    })
}

/// The AiM memory-system decoder/dispatcher core.
pub struct MemorySystem<C: ChannelController, D: DramDevice> {
    clk: u64,
    shared: Rc<RefCell<QueueState>>,
    overflow: Vec<VecDeque<Request>>,
    aim_req_id: i64,
    wait_read_stall: u64,
    cfr: CfrStore,
    stats: Stats,
    controllers: Vec<C>,
    dram: D,
    config: MemorySystemConfig,
}

impl<C: ChannelController, D: DramDevice> MemorySystem<C, D> {
    /// Stand up a `MemorySystem` over `controllers` and `dram`.
    ///
    /// # Errors
    /// Returns `MemSystemError::ChannelCountMismatch` if `config`,
    /// `controllers`, and `dram` disagree on the channel count — per
    /// spec §6, `dram.get_level_size("channel")` is queried during init
    /// precisely so this can be caught before the first `tick` rather
    /// than silently addressing channels the device or config doesn't
    /// know about.
    pub fn new(
        config: MemorySystemConfig,
        controllers: Vec<C>,
        dram: D,
    ) -> Result<Self, MemSystemError> {
        let channel_count = controllers.len();
        if config.channel_count != channel_count || dram.channel_count() != channel_count {
            return Err(MemSystemError::ChannelCountMismatch {
                config: config.channel_count,
                controllers: channel_count,
                dram: dram.channel_count(),
            });
        }

        Ok(Self {
            clk: 0,
            shared: Rc::new(RefCell::new(QueueState {
                queue: VecDeque::new(),
                stalled_aim_requests: 0,
                fatal: None,
            })),
            overflow: (0..channel_count).map(|_| VecDeque::new()).collect(),
            aim_req_id: 0,
            wait_read_stall: 0,
            cfr: CfrStore::new(),
            stats: Stats::new(),
            controllers,
            dram,
            config,
        })
    }

    #[must_use]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[must_use]
    pub fn clk(&self) -> u64 {
        self.clk
    }

    #[must_use]
    pub fn tck(&self) -> f32 {
        self.dram.tck_ps() / 1000.0
    }

    #[must_use]
    pub fn stalled_aim_requests(&self) -> i64 {
        self.shared.borrow().stalled_aim_requests
    }

    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.borrow().queue.len()
    }

    #[must_use]
    pub fn overflow_len(&self, channel: usize) -> usize {
        self.overflow.get(channel).map_or(0, VecDeque::len)
    }

    /// Current decoder state, derived from live queue/stall/overflow
    /// state at query time.
    #[must_use]
    pub fn state(&self) -> DecoderState {
        if self.stalled_aim_requests() > 0 {
            DecoderState::Stalled
        } else if self.overflow.iter().any(|q| !q.is_empty()) {
            DecoderState::Draining
        } else if self.queue_len() > 0 {
            DecoderState::Dispatching
        } else {
            DecoderState::Idle
        }
    }

    /// Accept `req` for later decode.
    ///
    /// # Errors
    /// Returns `Err` if `req` carries a channel mask with bits set above
    /// bit 7 — a configuration error, not backpressure, since no mask in
    /// that range can ever be satisfied by `MAX_CHANNEL_COUNT` channels.
    pub fn send(&mut self, req: Request) -> Result<bool, MemSystemError> {
        if req.channel_mask > 0xFF {
            return Err(MemSystemError::ChannelMaskOutOfRange {
                mask: req.channel_mask,
                max: MAX_CHANNEL_COUNT,
            });
        }

        let mut state = self.shared.borrow_mut();
        if state.queue.len() == ISR_SIZE {
            self.stats.isr_queue_full += 1;
            return Ok(false);
        }

        trace!(
            "[clk {}] host_req_id {} ({:?}) pushed to the queue",
            self.clk, req.host_req_id, req.kind
        );

        match req.kind {
            RequestKind::AiM => {
                let opcode = req.opcode.expect("AiM request carries an opcode");
                self.stats.record_aim(opcode);
            }
            RequestKind::Read | RequestKind::Write => {
                let region = req
                    .mem_access_region
                    .ok_or(MemSystemError::UnknownMemAccessRegion(req.kind))?;
                self.stats.record_rw(req.kind, region);
            }
        }

        state.queue.push_back(req);
        Ok(true)
    }

    /// Completion entry point for controllers reporting that a
    /// previously emitted blocking command has retired.
    ///
    /// # Errors
    /// Returns `Err` if `req.host_req_id` does not match the head of the
    /// host queue, or if the queue is empty.
    pub fn receive(&mut self, req: &Request) -> Result<(), MemSystemError> {
        QueueState::receive(&self.shared, req)
    }

    /// Advance the decoder by one memory-system clock.
    ///
    /// # Errors
    /// Returns `Err` on any fatal/configuration condition (see
    /// `MemSystemError`); the caller is expected to abort the simulation.
    pub fn tick(&mut self) -> Result<(), MemSystemError> {
        if let Some(err) = self.take_fatal() {
            return Err(err);
        }

        let (was_remaining, is_remaining) = self.drain_overflow();

        let stalled = self.shared.borrow().stalled_aim_requests;
        if stalled == 0 {
            if was_remaining && !is_remaining {
                self.pop_and_complete_head()?;
            } else if !was_remaining {
                let head = { self.shared.borrow().queue.front().cloned() };
                if let Some(host_req) = head {
                    self.decode_head(host_req)?;
                }
            }
        } else {
            self.wait_read_stall += 1;
        }

        self.clk += 1;
        self.stats.cycles = self.clk;
        self.stats.wait_read_stall = self.wait_read_stall;
        self.dram.tick();
        for controller in &mut self.controllers {
            controller.tick();
        }

        if let Some(err) = self.take_fatal() {
            return Err(err);
        }

        Ok(())
    }

    /// Takes and clears a fatal error latched by a completion callback,
    /// if one occurred since the last check.
    fn take_fatal(&self) -> Option<MemSystemError> {
        self.shared.borrow_mut().fatal.take()
    }

    /// Phase 1: offer the front of every channel's overflow queue to its
    /// controller. Returns `(was_remaining, is_remaining)`.
    fn drain_overflow(&mut self) -> (bool, bool) {
        let mut was_remaining = false;
        let mut is_remaining = false;

        for channel_id in 0..self.controllers.len() {
            while let Some(front) = self.overflow[channel_id].front().cloned() {
                was_remaining = true;
                if self.controllers[channel_id].send(front) {
                    self.overflow[channel_id].pop_front();
                } else {
                    is_remaining = true;
                    break;
                }
            }
        }

        (was_remaining, is_remaining)
    }

    fn pop_and_complete_head(&mut self) -> Result<(), MemSystemError> {
        let mut state = self.shared.borrow_mut();
        let host_req = state.queue.pop_front();
        drop(state);
        if let Some(host_req) = host_req {
            host_req.invoke_callback()?;
        }
        Ok(())
    }

    /// Phase 3/4: decode the head host request and, if every emitted
    /// command was accepted and no stall is pending, complete it on the
    /// same tick.
    fn decode_head(&mut self, host_req: Request) -> Result<(), MemSystemError> {
        trace!(
            "[clk {}] decoding host_req_id {} ({:?})",
            self.clk, host_req.host_req_id, host_req.kind
        );

        let all_sent = match host_req.kind {
            RequestKind::AiM => self.decode_aim(&host_req)?,
            RequestKind::Read => self.decode_read(&host_req)?,
            RequestKind::Write => self.decode_write(&host_req)?,
        };

        let stalled = self.shared.borrow().stalled_aim_requests;
        if stalled == 0 && all_sent {
            self.pop_and_complete_head()?;
        }

        Ok(())
    }

    fn decode_aim(&mut self, host_req: &Request) -> Result<bool, MemSystemError> {
        let opcode = host_req.opcode.expect("AiM request carries an opcode");

        match opcode {
            AimOpcode::WrAflut => Err(MemSystemError::UnsupportedOpcode(opcode)),
            AimOpcode::Ewadd => Ok(true),
            AimOpcode::Eoc => Ok(self.decode_eoc(host_req)),
            _ => self.decode_compute(host_req, opcode),
        }
    }

    fn decode_compute(
        &mut self,
        host_req: &Request,
        opcode: AimOpcode,
    ) -> Result<bool, MemSystemError> {
        let descriptor = isr::descriptor(opcode);
        let channel_mask = host_req.channel_mask;
        let channel_count = channel_mask.count_ones();

        if descriptor.channel_count_eq_one && channel_count != 1 {
            return Err(MemSystemError::ChannelMaskNotSingleChannel {
                opcode,
                mask: channel_mask,
                count: channel_count,
            });
        }

        let mut template = host_req.clone();
        template.callback = Some(make_receiver_callback(Rc::clone(&self.shared)));

        if matches!(opcode, AimOpcode::MacSbk | AimOpcode::MacAbk) {
            template.broadcast = self.cfr.broadcast();
        }
        if opcode == AimOpcode::MacAbk {
            template.ewmul_bg = self.cfr.ewmul_bg();
        }
        if opcode == AimOpcode::Af {
            template.afm = self.cfr.afm();
            template.row_addr = (1i64 << 29) + template.afm;
        }

        if !descriptor.legal_fields.bank_index {
            template.bank_index = None;
        }
        if !descriptor.legal_fields.row_addr && opcode != AimOpcode::Af {
            template.row_addr = 0;
        }

        let mut all_sent = true;
        for i in 0..host_req.iterations() {
            let mut remaining_mask = channel_mask;
            let col_addr = if descriptor.legal_fields.col_addr {
                host_req.col_addr + i
            } else {
                template.col_addr
            };

            while remaining_mask != 0 {
                let channel_id = remaining_mask.trailing_zeros();
                remaining_mask &= !(1 << channel_id);

                let mut cmd = template.clone();
                cmd.col_addr = col_addr;
                cmd.aim_req_id = self.next_aim_req_id();
                cmd.host_req_id = host_req.host_req_id;
                apply_addr_map(&mut cmd, channel_id as usize);

                trace!(
                    "[clk {}] sending aim_req_id {} to channel {}",
                    self.clk, cmd.aim_req_id, channel_id
                );

                if !self.offer(channel_id as usize, cmd) {
                    all_sent = false;
                }

                if descriptor.blocking {
                    self.shared.borrow_mut().stalled_aim_requests += 1;
                }
            }
        }

        Ok(all_sent)
    }

    fn decode_eoc(&mut self, host_req: &Request) -> bool {
        let mut all_sent = true;
        for channel_id in 0..self.controllers.len() {
            let mut cmd = host_req.clone();
            cmd.callback = Some(make_receiver_callback(Rc::clone(&self.shared)));
            cmd.aim_req_id = self.next_aim_req_id();
            cmd.host_req_id = host_req.host_req_id;

            trace!(
                "[clk {}] sending EOC aim_req_id {} to channel {}",
                self.clk, cmd.aim_req_id, channel_id
            );

            if !self.offer(channel_id, cmd) {
                all_sent = false;
            }
            self.shared.borrow_mut().stalled_aim_requests += 1;
        }
        all_sent
    }

    fn decode_read(&mut self, host_req: &Request) -> Result<bool, MemSystemError> {
        let region = host_req
            .mem_access_region
            .ok_or(MemSystemError::UnknownMemAccessRegion(host_req.kind))?;

        match region {
            MemAccessRegion::Cfr | MemAccessRegion::Gpr => Ok(true),
            MemAccessRegion::Mem => {
                let mut cmd = host_req.clone();
                cmd.callback = Some(make_receiver_callback(Rc::clone(&self.shared)));
                cmd.aim_req_id = self.next_aim_req_id();
                // `channel_mask` is a raw channel index on this path, not
                // a one-hot bitmask; see `crate::request` module docs.
                let channel_id = host_req.channel_mask as usize;
                apply_addr_map(&mut cmd, channel_id);

                trace!(
                    "[clk {}] sending MEM read aim_req_id {} to channel {}",
                    self.clk, cmd.aim_req_id, channel_id
                );

                let sent = self.offer(channel_id, cmd);
                self.shared.borrow_mut().stalled_aim_requests += 1;
                Ok(sent)
            }
        }
    }

    fn decode_write(&mut self, host_req: &Request) -> Result<bool, MemSystemError> {
        let region = host_req
            .mem_access_region
            .ok_or(MemSystemError::UnknownMemAccessRegion(host_req.kind))?;

        match region {
            MemAccessRegion::Cfr => {
                self.cfr.write(host_req.addr, host_req.data)?;
                Ok(true)
            }
            MemAccessRegion::Gpr => Ok(true),
            MemAccessRegion::Mem => {
                let mut cmd = host_req.clone();
                cmd.callback = Some(make_receiver_callback(Rc::clone(&self.shared)));
                cmd.aim_req_id = self.next_aim_req_id();
                let channel_id = host_req.channel_mask as usize;
                apply_addr_map(&mut cmd, channel_id);

                trace!(
                    "[clk {}] sending MEM write aim_req_id {} to channel {}",
                    self.clk, cmd.aim_req_id, channel_id
                );

                Ok(self.offer(channel_id, cmd))
            }
        }
    }

    /// Offer `cmd` to `channel_id`'s controller; on rejection, park it in
    /// that channel's overflow queue for retry on a later tick.
    fn offer(&mut self, channel_id: usize, cmd: Request) -> bool {
        if self.controllers[channel_id].send(cmd.clone()) {
            true
        } else {
            self.overflow[channel_id].push_back(cmd);
            false
        }
    }

    fn next_aim_req_id(&mut self) -> i64 {
        let id = self.aim_req_id;
        self.aim_req_id += 1;
        id
    }

    #[must_use]
    pub fn config(&self) -> &MemorySystemConfig {
        &self.config
    }
}

/// Resolve `addr_vec` for a command dispatched to channel `channel_id`.
fn apply_addr_map(cmd: &mut Request, channel_id: usize) {
    cmd.addr_vec[0] = channel_id as i64;
    match cmd.bank_index {
        None => {
            cmd.addr_vec[1] = -1;
            cmd.addr_vec[2] = -1;
        }
        Some(bank_index) => {
            cmd.addr_vec[1] = (bank_index / 4) as i64;
            cmd.addr_vec[2] = (bank_index % 4) as i64;
        }
    }
    cmd.addr_vec[3] = cmd.row_addr;
    cmd.addr_vec[4] = cmd.col_addr;
}
