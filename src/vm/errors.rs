//! VM bind-time and execution error types.

use crate::bytecode::header::HeaderError;
use crate::memory::errors::MemoryError;
use crate::vm::machine::VmState;
use thiserror::Error;

/// Errors surfaced while binding or executing a program.
///
/// Bind-time variants (`Header`, `Io`, `SignatureMismatch`,
/// `ProgramIdMismatch`, `LibraryNotRunnable`) fail before the first tick
/// and never partially load. Execution faults carry the faulting `ip` and
/// leave the VM in [`VmState::Faulted`](crate::vm::VmState::Faulted);
/// nothing is retried automatically.
#[derive(Debug, Error)]
pub enum VmError {
    /// Malformed program header.
    #[error(transparent)]
    Header(#[from] HeaderError),
    /// I/O failure reading a program file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The header signature is not the turtl magic.
    #[error("not a turtl binary: signature {0:02x?}")]
    SignatureMismatch([u8; 4]),
    /// The stored program ID does not match the body digest.
    #[error("program id does not match body digest")]
    ProgramIdMismatch,
    /// Library programs carry definitions only and are never run directly.
    #[error("library programs cannot be run directly")]
    LibraryNotRunnable,

    /// Program handle not present in the runtime arena.
    #[error("unknown program handle: {0}")]
    UnknownProgram(u8),
    /// Heap handle not present in the runtime arena.
    #[error("unknown heap handle: {0}")]
    UnknownHeap(u8),
    /// The handle space (u8) of an arena is exhausted.
    #[error("{0} arena is full")]
    ArenaFull(&'static str),
    /// Operation requires a bound program.
    #[error("no program bound to this VM")]
    NoProgram,
    /// The VM is not in a state the operation accepts.
    #[error("vm cannot proceed from state {state:?}")]
    NotRunnable { state: VmState },
    /// The register file marshals at most three method arguments.
    #[error("too many method arguments: {given}, register file holds 3")]
    TooManyArguments { given: usize },

    /// Unknown opcode byte in the instruction stream.
    #[error("illegal opcode {opcode:#04x} at ip {ip}")]
    IllegalOpcode { opcode: u8, ip: usize },
    /// Register operand outside `r1..r3`.
    #[error("invalid register index {index} at ip {ip}")]
    InvalidRegister { index: u8, ip: usize },
    /// The body ended inside an instruction, or `ip` ran off the end
    /// without reaching `HALT`.
    #[error("unexpected end of program at ip {ip}")]
    UnexpectedEnd { ip: usize },
    /// `DIV` with a zero divisor.
    #[error("division by zero at ip {ip}")]
    DivisionByZero { ip: usize },
    /// Jump target outside the program body.
    #[error("jump target {target} out of range at ip {ip}")]
    JumpOutOfRange { target: u64, ip: usize },
    /// Conditional jump executed with no preceding `CMP`.
    #[error("conditional jump with no preceding CMP at ip {ip}")]
    ConditionUnset { ip: usize },
    /// A GC operation failed mid-execution.
    #[error("memory error at ip {ip}: {source}")]
    Memory {
        #[source]
        source: MemoryError,
        ip: usize,
    },
}
