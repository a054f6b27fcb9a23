//! Program and heap arenas owned by the embedding host.

use crate::bytecode::program::Program;
use crate::memory::gc::{Gc, SharedGc};
use crate::memory::heap::HeapConfig;
use crate::vm::errors::VmError;

/// Handle into a [`Runtime`]'s program arena.
pub type ProgramId = u8;
/// Handle into a [`Runtime`]'s heap arena.
pub type HeapId = u8;

/// The embedding host's resource arenas.
///
/// Owns every loaded [`Program`] and every GC/heap instance; VMs hold
/// `u8` indices into these arenas instead of references, so an arena
/// entry can be replaced without any VM holding a dangling pointer.
/// Handles are never reused within a runtime's lifetime: the arenas are
/// append-only and capped at the handle space (256 entries each).
#[derive(Debug, Default)]
pub struct Runtime {
    programs: Vec<Program>,
    heaps: Vec<SharedGc>,
}

impl Runtime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a program to the arena, returning its handle.
    pub fn add_program(&mut self, program: Program) -> Result<ProgramId, VmError> {
        if self.programs.len() > ProgramId::MAX as usize {
            return Err(VmError::ArenaFull("program"));
        }
        self.programs.push(program);
        Ok((self.programs.len() - 1) as ProgramId)
    }

    /// Creates a fresh GC with the given heap sizing and adds it to the
    /// arena, returning its handle.
    pub fn add_heap(&mut self, config: HeapConfig) -> Result<HeapId, VmError> {
        self.add_shared_heap(SharedGc::new(Gc::with_config(config)))
    }

    /// Adds an existing shared GC, e.g. one already serving other VMs.
    pub fn add_shared_heap(&mut self, gc: SharedGc) -> Result<HeapId, VmError> {
        if self.heaps.len() > HeapId::MAX as usize {
            return Err(VmError::ArenaFull("heap"));
        }
        self.heaps.push(gc);
        Ok((self.heaps.len() - 1) as HeapId)
    }

    pub fn program(&self, id: ProgramId) -> Result<&Program, VmError> {
        self.programs
            .get(id as usize)
            .ok_or(VmError::UnknownProgram(id))
    }

    pub fn gc(&self, id: HeapId) -> Result<&SharedGc, VmError> {
        self.heaps.get(id as usize).ok_or(VmError::UnknownHeap(id))
    }
}
