//! The unit of managed data.

use crate::memory::errors::MemoryError;
use std::collections::HashMap;

/// Identifier into an object's method table.
pub type MethodId = u8;

/// A heap-resident unit of managed data.
///
/// An object is a slot identity (`address`), a descriptor of its data
/// segment in the heap's data buffer (`data_ptr`/`data_size`; the bytes
/// live in the buffer, not inline in the record), a method table for
/// dynamic dispatch, and the heap addresses of any sub-objects it
/// references. The reference list is the edge set the collector's mark
/// phase walks; an object unreferenced by the root set and by any live
/// object's references is reclaimed.
///
/// Objects are created through [`Gc::allocate`](crate::memory::Gc::allocate)
/// and mutated only through GC-mediated operations; `address` and
/// `data_ptr` are rewritten by the GC when collection compacts the heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Object {
    pub(crate) address: usize,
    pub(crate) data_ptr: usize,
    pub(crate) data_size: usize,
    pub(crate) func_table: HashMap<MethodId, u64>,
    pub(crate) refs: Vec<usize>,
}

impl Object {
    pub(crate) fn new(address: usize, data_ptr: usize, data_size: usize) -> Self {
        Self {
            address,
            data_ptr,
            data_size,
            func_table: HashMap::new(),
            refs: Vec::new(),
        }
    }

    /// Heap slot this object currently occupies.
    pub fn address(&self) -> usize {
        self.address
    }

    /// Size of the object's data segment in bytes.
    pub fn data_size(&self) -> usize {
        self.data_size
    }

    /// Resolves a method ID to its code address in the program body.
    pub fn method_addr(&self, method: MethodId) -> Result<u64, MemoryError> {
        self.func_table
            .get(&method)
            .copied()
            .ok_or(MemoryError::UnknownMethod(method))
    }

    /// Installs (or replaces) a method table entry.
    pub fn define_method(&mut self, method: MethodId, code_addr: u64) {
        self.func_table.insert(method, code_addr);
    }

    /// Records a reference to another heap object, keeping it reachable
    /// while this object is.
    pub fn add_ref(&mut self, address: usize) {
        self.refs.push(address);
    }

    /// Heap addresses of referenced sub-objects.
    pub fn refs(&self) -> &[usize] {
        &self.refs
    }
}
