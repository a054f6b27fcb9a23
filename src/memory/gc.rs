//! Garbage collector: identifier index, allocation, and collection.

use crate::memory::errors::MemoryError;
use crate::memory::heap::{Heap, HeapConfig};
use crate::memory::object::{MethodId, Object};
use sha3::{Digest, Sha3_256};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Derives the stable 64-bit identifier for a name.
///
/// Identifiers are the first 8 bytes (little-endian) of the SHA3-256
/// digest of the name. They are independent of an object's heap address,
/// so a binding survives compaction.
pub fn intern(name: &str) -> u64 {
    let digest = Sha3_256::digest(name.as_bytes());
    u64::from_le_bytes(digest[..8].try_into().unwrap_or_default())
}

/// Owns one [`Heap`] and the identifier index (`pmap`) rooting it.
///
/// `pmap` maps identifiers to heap addresses. Every key refers to a live
/// object, and an identifier is never rebound to a different object while
/// it remains in the map. Registered objects form the root set for
/// [`collect`](Gc::collect); allocation alone does not publish an object.
#[derive(Debug)]
pub struct Gc {
    heap: Heap,
    pmap: HashMap<u64, usize>,
}

impl Gc {
    pub fn new() -> Self {
        Self::with_config(HeapConfig::default())
    }

    pub fn with_config(config: HeapConfig) -> Self {
        Self {
            heap: Heap::new(config),
            pmap: HashMap::new(),
        }
    }

    /// Reserves a zero-filled data segment of `size` bytes and an object
    /// record pointing at it, growing the slot table by one increment if
    /// it is full. Returns the new object's heap address.
    ///
    /// The object is anonymous until [`register`](Gc::register)ed: it is
    /// heap-resident but unreachable by name, and a later collection will
    /// reclaim it unless a live object references it.
    pub fn allocate(&mut self, size: usize) -> Result<usize, MemoryError> {
        if self.heap.is_full() {
            let step = self.heap.config().growth_slots;
            self.heap.grow(step)?;
        }
        let data_ptr = self.heap.alloc_data(size);
        let address = self.heap.push(Object::new(0, data_ptr, size));
        Ok(address)
    }

    /// Publishes the object at `address` under `id`.
    ///
    /// Fails with [`MemoryError::IdentifierInUse`] if `id` is already
    /// bound, or [`MemoryError::UnknownAddress`] if `address` does not
    /// name an occupied slot.
    pub fn register(&mut self, id: u64, address: usize) -> Result<(), MemoryError> {
        if self.heap.get(address).is_none() {
            return Err(MemoryError::UnknownAddress(address));
        }
        if let Some(&bound) = self.pmap.get(&id) {
            return Err(MemoryError::IdentifierInUse { id, address: bound });
        }
        self.pmap.insert(id, address);
        Ok(())
    }

    /// Drops the name binding for `id`, leaving the object to the next
    /// collection unless it is otherwise reachable.
    pub fn unregister(&mut self, id: u64) -> Result<(), MemoryError> {
        self.pmap
            .remove(&id)
            .map(|_| ())
            .ok_or(MemoryError::UnknownIdentifier(id))
    }

    /// Resolves an identifier to its object.
    pub fn lookup_id(&self, id: u64) -> Result<&Object, MemoryError> {
        let address = *self
            .pmap
            .get(&id)
            .ok_or(MemoryError::UnknownIdentifier(id))?;
        self.heap
            .get(address)
            .ok_or(MemoryError::UnknownAddress(address))
    }

    /// Mutable variant of [`lookup_id`](Gc::lookup_id), for GC-mediated
    /// object mutation such as installing methods or references.
    pub fn lookup_id_mut(&mut self, id: u64) -> Result<&mut Object, MemoryError> {
        let address = *self
            .pmap
            .get(&id)
            .ok_or(MemoryError::UnknownIdentifier(id))?;
        self.heap
            .get_mut(address)
            .ok_or(MemoryError::UnknownAddress(address))
    }

    /// The object at a raw heap address, registered or not.
    pub fn object_at(&self, address: usize) -> Result<&Object, MemoryError> {
        self.heap
            .get(address)
            .ok_or(MemoryError::UnknownAddress(address))
    }

    /// Mutable access to an object by raw heap address.
    pub fn object_at_mut(&mut self, address: usize) -> Result<&mut Object, MemoryError> {
        self.heap
            .get_mut(address)
            .ok_or(MemoryError::UnknownAddress(address))
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: u64) -> bool {
        self.pmap.contains_key(&id)
    }

    /// Number of named objects, i.e. the pmap size. Distinct from
    /// [`heap_len`](Gc::heap_len), which also counts anonymous slots.
    pub fn num_objects(&self) -> usize {
        self.pmap.len()
    }

    /// Total occupied heap slots, anonymous objects included.
    pub fn heap_len(&self) -> usize {
        self.heap.len()
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Grows the heap's slot table by `extra_slots`. See [`Heap::grow`].
    pub fn grow(&mut self, extra_slots: usize) -> Result<(), MemoryError> {
        self.heap.grow(extra_slots)
    }

    /// Reads the whole data segment of the object bound to `id`.
    pub fn data(&self, id: u64) -> Result<&[u8], MemoryError> {
        let obj = self.lookup_id(id)?;
        Ok(self.heap.segment(obj.data_ptr, obj.data_size))
    }

    /// Reads the 8-byte word at `offset` in the data segment of the
    /// object bound to `id`.
    pub fn read_word(&self, id: u64, offset: u64) -> Result<i64, MemoryError> {
        let obj = self.lookup_id(id)?;
        let offset = offset as usize;
        let end = offset
            .checked_add(8)
            .filter(|&end| end <= obj.data_size)
            .ok_or(MemoryError::DataOutOfRange {
                offset,
                len: 8,
                size: obj.data_size,
            })?;
        let segment = self.heap.segment(obj.data_ptr, obj.data_size);
        let word: [u8; 8] = segment[offset..end].try_into().unwrap_or_default();
        Ok(i64::from_le_bytes(word))
    }

    /// Writes the 8-byte word at `offset` in the data segment of the
    /// object bound to `id`.
    pub fn write_word(&mut self, id: u64, offset: u64, value: i64) -> Result<(), MemoryError> {
        let obj = self.lookup_id(id)?;
        let (data_ptr, data_size) = (obj.data_ptr, obj.data_size);
        let offset = offset as usize;
        let end = offset
            .checked_add(8)
            .filter(|&end| end <= data_size)
            .ok_or(MemoryError::DataOutOfRange {
                offset,
                len: 8,
                size: data_size,
            })?;
        self.heap.segment_mut(data_ptr, data_size)[offset..end]
            .copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    /// Collects the garbage: tagged-root mark-sweep with compaction.
    ///
    /// Mark walks `pmap` as the root set and transitively follows each
    /// object's references. Sweep rebuilds the slot table and data buffer
    /// with only the marked objects, rewriting addresses, data pointers,
    /// reference lists, and shifted pmap entries. Slot capacity keeps its
    /// high-water mark.
    ///
    /// Must run with the heap quiesced: no VM tick in flight against it.
    /// [`SharedGc`] enforces this with its writer lock.
    pub fn collect(&mut self) {
        let mut marked = vec![false; self.heap.len()];
        let mut pending: Vec<usize> = self.pmap.values().copied().collect();
        while let Some(address) = pending.pop() {
            if address >= marked.len() || marked[address] {
                continue;
            }
            marked[address] = true;
            if let Some(obj) = self.heap.get(address) {
                pending.extend_from_slice(obj.refs());
            }
        }

        let (old_slots, old_data) = self.heap.take_slots();
        let mut remap = vec![usize::MAX; old_slots.len()];
        let mut slots = Vec::with_capacity(old_slots.len());
        let mut data = Vec::new();

        for (old_address, mut obj) in old_slots.into_iter().enumerate() {
            if !marked[old_address] {
                continue;
            }
            let address = slots.len();
            remap[old_address] = address;
            let data_ptr = data.len();
            data.extend_from_slice(&old_data[obj.data_ptr..obj.data_ptr + obj.data_size]);
            obj.address = address;
            obj.data_ptr = data_ptr;
            slots.push(obj);
        }

        for obj in &mut slots {
            for r in &mut obj.refs {
                *r = remap[*r];
            }
        }
        for address in self.pmap.values_mut() {
            *address = remap[*address];
        }

        let reclaimed = marked.len() - slots.len();
        self.heap.replace(slots, data);
        log::debug!(
            "collect: {} live objects, {} reclaimed",
            self.heap.len(),
            reclaimed
        );
    }
}

impl Default for Gc {
    fn default() -> Self {
        Self::new()
    }
}

/// A GC shared between VM instances.
///
/// All mutating operations (`allocate`, `register`, `grow`, `collect`,
/// `write_word`, `with_mut`) run under the writer lock; lookups and data
/// reads run under the shared reader lock. `collect` therefore cannot
/// start while any reader is mid-tick, and readers resume only once
/// addresses are stabilized. That is the stop-the-world contract.
#[derive(Debug, Clone)]
pub struct SharedGc {
    inner: Arc<RwLock<Gc>>,
}

impl SharedGc {
    pub fn new(gc: Gc) -> Self {
        Self {
            inner: Arc::new(RwLock::new(gc)),
        }
    }

    /// Runs `f` with shared read access.
    pub fn with<R>(&self, f: impl FnOnce(&Gc) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Runs `f` with exclusive write access.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Gc) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    pub fn allocate(&self, size: usize) -> Result<usize, MemoryError> {
        self.with_mut(|gc| gc.allocate(size))
    }

    pub fn register(&self, id: u64, address: usize) -> Result<(), MemoryError> {
        self.with_mut(|gc| gc.register(id, address))
    }

    pub fn grow(&self, extra_slots: usize) -> Result<(), MemoryError> {
        self.with_mut(|gc| gc.grow(extra_slots))
    }

    pub fn collect(&self) {
        self.with_mut(Gc::collect)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.with(|gc| gc.contains(id))
    }

    pub fn num_objects(&self) -> usize {
        self.with(Gc::num_objects)
    }

    pub fn read_word(&self, id: u64, offset: u64) -> Result<i64, MemoryError> {
        self.with(|gc| gc.read_word(id, offset))
    }

    pub fn write_word(&self, id: u64, offset: u64, value: i64) -> Result<(), MemoryError> {
        self.with_mut(|gc| gc.write_word(id, offset, value))
    }

    /// Resolves a method on the object bound to `id`.
    pub fn method_addr(&self, id: u64, method: MethodId) -> Result<u64, MemoryError> {
        self.with(|gc| gc.lookup_id(id)?.method_addr(method))
    }
}
