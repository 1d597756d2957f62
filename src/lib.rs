#![doc = r#"
AiM memory-system library crate.

This crate exposes the decoder/dispatcher core of an Accelerator-in-Memory
(AiM) DRAM subsystem: a DMA-like front-end that accepts host ISR and
memory-access requests, decodes them into per-channel DRAM commands,
dispatches them to per-channel controllers, and signals host-request
completion in program order.

Modules:
- request: the Request record, request/opcode/region enums
- isr: static ISR descriptor table driving per-opcode decode
- cfr: the three host-writable configuration-function registers
- stats: monotone counters exposed by the memory system
- config: bring-up configuration for a MemorySystem
- device: out-of-scope collaborator contracts (ChannelController, DramDevice)
- error: the fatal/configuration error type
- system: MemorySystem, the decoder/dispatcher itself
"#]

pub mod cfr;
pub mod config;
pub mod device;
pub mod error;
pub mod isr;
pub mod request;
pub mod stats;
pub mod system;

pub use device::{ChannelController, DramDevice};
pub use error::MemSystemError;
pub use request::{AimOpcode, MemAccessRegion, Request, RequestKind};
pub use system::{DecoderState, MemorySystem, ISR_SIZE};
