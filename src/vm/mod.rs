//! Register-based bytecode virtual machine.
//!
//! The VM steps a program body opcode by opcode against a fixed register
//! file. Arithmetic and control opcodes touch only VM state; object
//! opcodes delegate to the GC bound to the VM.
//!
//! # Architecture
//!
//! - **Registers**: three general-purpose signed word registers `r1..r3`,
//!   plus `ip`/`fp`/`sp` bookkeeping
//! - **Instruction format**: 1-byte opcode followed by fixed-width
//!   little-endian operands (see [`isa`])
//! - **Handles**: a VM holds `u8` indices into the embedding [`Runtime`]'s
//!   program and heap arenas; it never stores pointers to either, so
//!   arena entries can be replaced without dangling references
//! - **Execution model**: `tick` is one fetch-decode-execute step; `run`
//!   loops it to `Halted` or `Faulted`
//!
//! # Modules
//!
//! - [`isa`]: instruction set definition and opcode mappings
//! - [`arena`]: program/heap arenas owned by the embedding host
//! - [`machine`]: the VM itself
//! - [`errors`]: bind-time and execution error types

pub mod arena;
pub mod errors;
pub mod isa;
pub mod machine;

pub use arena::{HeapId, ProgramId, Runtime};
pub use errors::VmError;
pub use isa::Opcode;
pub use machine::{RunResult, Vm, VmState};
