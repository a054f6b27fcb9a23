//! An embeddable register-based virtual machine for the turtl bytecode
//! language.
//!
//! The crate is three pieces: a binary program codec ([`bytecode`]), a
//! garbage-collected object heap addressed by stable identifiers
//! ([`memory`]), and the register VM itself ([`vm`]). The embedding host
//! owns a [`vm::Runtime`] holding arenas of programs and heaps; VMs refer
//! to both by small handles, never by pointer.
//!
//! The VM targets platforms with a word size of at least 64 bits and
//! refuses to compile elsewhere.
//!
//! ```
//! use turtl::bytecode::{ProgramBuilder, ProgramType};
//! use turtl::memory::HeapConfig;
//! use turtl::vm::{RunResult, Runtime, Vm};
//!
//! # fn main() -> Result<(), turtl::vm::VmError> {
//! // Build some code: r1 = 3 + 4.
//! let mut builder = ProgramBuilder::new(ProgramType::Execute);
//! builder.loadi(2, 3).loadi(3, 4).add(1, 2, 3).halt();
//! let program = builder.finish();
//!
//! // Construct a VM bound to a fresh heap, load the code, run it.
//! let mut rt = Runtime::new();
//! let heap = rt.add_heap(HeapConfig::default())?;
//! let mut vm = Vm::new(heap);
//! vm.load_program(&mut rt, program.into_bytes())?;
//! assert_eq!(vm.run(&rt)?, RunResult::Int(7));
//! # Ok(())
//! # }
//! ```

pub mod bytecode;
pub mod memory;
pub mod vm;

pub use bytecode::{Program, ProgramBuilder, ProgramHeader, ProgramType};
pub use memory::{Gc, HeapConfig, SharedGc};
pub use vm::{RunResult, Runtime, Vm, VmError};

// The register file and address space are word-sized; 32-bit targets are
// rejected at compile time rather than miscomputing at run time.
const _: () = assert!(
    usize::BITS >= 64,
    "turtl targets platforms with a word size of at least 64 bits"
);
