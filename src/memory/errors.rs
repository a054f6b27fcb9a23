//! Heap and GC error types.

use crate::memory::object::MethodId;
use thiserror::Error;

/// Errors surfaced by heap and GC operations.
///
/// Addressing failures (`UnknownIdentifier`, `UnknownMethod`,
/// `UnknownAddress`, `IdentifierInUse`) are returned to the caller of the
/// specific lookup; `GrowExceeded` is a resource error the caller may
/// recover from, e.g. by collecting and retrying once.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    /// The identifier is not present in the GC's pmap.
    #[error("unknown identifier: {0}")]
    UnknownIdentifier(u64),
    /// The method ID is not present in the object's function table.
    #[error("unknown method: {0}")]
    UnknownMethod(MethodId),
    /// The heap address does not name an occupied slot.
    #[error("no object at heap address {0}")]
    UnknownAddress(usize),
    /// The identifier is already bound; identifiers are never rebound
    /// while the binding is live.
    #[error("identifier {id:#018x} is already bound to heap address {address}")]
    IdentifierInUse { id: u64, address: usize },
    /// Growing would push the slot table past the configured maximum.
    #[error("heap grow exceeds maximum: {current} slots, requested {requested} more (maximum {maximum})")]
    GrowExceeded {
        current: usize,
        requested: usize,
        maximum: usize,
    },
    /// A data-segment access past the end of the object's segment.
    #[error("data access out of range: offset {offset} + {len} bytes exceeds segment of {size} bytes")]
    DataOutOfRange {
        offset: usize,
        len: usize,
        size: usize,
    },
}
