//! Garbage-collected object memory.
//!
//! A [`Gc`] owns exactly one [`Heap`] (a bounded, grow-only slot table of
//! [`Object`] records plus a separate data buffer for their segments) and
//! one identifier index (`pmap`) mapping stable 64-bit identifiers to heap
//! addresses. Identifiers come from [`intern`] and are independent of an
//! object's physical location, so collection is free to compact the heap.
//!
//! Allocation and naming are separate steps: [`Gc::allocate`] reserves a
//! slot and data segment, [`Gc::register`] publishes the object under an
//! identifier. Objects never registered (or whose names are dropped) are
//! unreachable from the root set and reclaimed by [`Gc::collect`].
//!
//! [`SharedGc`] wraps a `Gc` for use by multiple VM instances under the
//! reader/writer discipline described in the crate docs.

pub mod errors;
pub mod gc;
pub mod heap;
pub mod object;

pub use errors::MemoryError;
pub use gc::{intern, Gc, SharedGc};
pub use heap::{Heap, HeapConfig};
pub use object::{MethodId, Object};
