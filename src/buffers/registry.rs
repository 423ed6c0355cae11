//! Index-stable registry of every buffer registered on a port

use std::slice;

use crate::error::{PortError, Result};

use super::buffer::{Buffer, BufferRef, HeaderId};

/// Ordered collection of buffer records, in registration order
///
/// Entries are owned `Arc` pointers, so growing the table never moves a
/// record and handles taken before a `reserve` or `push_back` stay valid.
/// Removal shifts later entries down by one without reordering them.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    entries: Vec<BufferRef>,
}

impl BufferRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-sized for `capacity_hint` entries
    pub fn with_capacity(capacity_hint: usize) -> Result<Self> {
        let mut entries = Vec::new();
        entries.try_reserve_exact(capacity_hint)?;
        Ok(Self { entries })
    }

    /// Grow to hold at least `new_capacity` entries; no-op if already large enough
    pub fn reserve(&mut self, new_capacity: usize) -> Result<()> {
        if new_capacity <= self.entries.capacity() {
            return Ok(());
        }
        self.entries.try_reserve_exact(new_capacity - self.entries.len())?;
        Ok(())
    }

    /// Append a record, doubling the capacity when full
    ///
    /// Rejects a record whose header or storage is already registered.
    pub fn push_back(&mut self, buffer: BufferRef) -> Result<()> {
        if let Some(existing) = self
            .entries
            .iter()
            .find(|e| e.header_id() == buffer.header_id() || e.address() == buffer.address())
        {
            return Err(PortError::invalid_argument(
                "buffer",
                format!(
                    "{} shares its header or storage with registered {}",
                    buffer.header_id(),
                    existing.header_id()
                ),
            ));
        }

        if self.entries.len() == self.entries.capacity() {
            let grow_by = self.entries.capacity().max(1);
            self.entries.try_reserve_exact(grow_by)?;
        }
        self.entries.push(buffer);
        Ok(())
    }

    /// Entry at `index`
    pub fn at(&self, index: usize) -> Result<&BufferRef> {
        self.entries
            .get(index)
            .ok_or_else(|| PortError::index_out_of_range("index", index, self.entries.len()))
    }

    /// Remove and return the entry at `index`
    pub fn remove_at(&mut self, index: usize) -> Result<BufferRef> {
        if index >= self.entries.len() {
            return Err(PortError::index_out_of_range("index", index, self.entries.len()));
        }
        Ok(self.entries.remove(index))
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries the registry can hold without growing
    pub fn capacity(&self) -> usize {
        self.entries.capacity()
    }

    /// Drop every entry, keeping the capacity
    ///
    /// Storage is only released if this registry held the last reference to
    /// a record that owns an allocation.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Index of the entry with the given header
    pub fn position_of(&self, header: HeaderId) -> Option<usize> {
        self.entries.iter().position(|e| e.header_id() == header)
    }

    /// Entry with the given header
    pub fn find(&self, header: HeaderId) -> Option<&BufferRef> {
        self.entries.iter().find(|e| e.header_id() == header)
    }

    /// True if this exact record is registered here
    pub fn contains(&self, buffer: &Buffer) -> bool {
        self.entries.iter().any(|e| std::ptr::eq(e.as_ref(), buffer))
    }

    pub fn iter(&self) -> slice::Iter<'_, BufferRef> {
        self.entries.iter()
    }
}

impl<'a> IntoIterator for &'a BufferRegistry {
    type Item = &'a BufferRef;
    type IntoIter = slice::Iter<'a, BufferRef>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{ptr::NonNull, sync::Arc};

    fn client_buffers(storage: &mut [u8], count: usize, size: usize) -> Vec<BufferRef> {
        (0..count)
            .map(|i| {
                let ptr = NonNull::new(storage[i * size..].as_mut_ptr()).unwrap();
                Arc::new(Buffer::client(ptr, size))
            })
            .collect()
    }

    #[test]
    fn test_push_and_access() {
        let mut storage = vec![0u8; 4 * 64];
        let buffers = client_buffers(&mut storage, 4, 64);
        let mut registry = BufferRegistry::with_capacity(4).unwrap();
        assert!(registry.capacity() >= 4);

        for b in &buffers {
            registry.push_back(Arc::clone(b)).unwrap();
        }
        assert_eq!(registry.len(), 4);
        assert!(Arc::ptr_eq(registry.at(2).unwrap(), &buffers[2]));
        assert!(registry.at(4).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_growth_keeps_handles_valid() {
        let mut storage = vec![0u8; 9 * 32];
        let buffers = client_buffers(&mut storage, 9, 32);
        let mut registry = BufferRegistry::with_capacity(1).unwrap();

        registry.push_back(Arc::clone(&buffers[0])).unwrap();
        let first = Arc::clone(registry.at(0).unwrap());
        for b in &buffers[1..] {
            registry.push_back(Arc::clone(b)).unwrap();
        }

        assert!(registry.capacity() >= 9);
        assert!(Arc::ptr_eq(registry.at(0).unwrap(), &first));
        assert_eq!(registry.position_of(buffers[8].header_id()), Some(8));
    }

    #[test]
    fn test_reserve_is_monotonic() {
        let mut registry = BufferRegistry::with_capacity(8).unwrap();
        let before = registry.capacity();
        registry.reserve(2).unwrap();
        assert_eq!(registry.capacity(), before);
        registry.reserve(32).unwrap();
        assert!(registry.capacity() >= 32);
    }

    #[test]
    fn test_duplicate_storage_rejected() {
        let mut storage = vec![0u8; 64];
        let ptr = NonNull::new(storage.as_mut_ptr()).unwrap();
        let mut registry = BufferRegistry::new();

        registry.push_back(Arc::new(Buffer::client(ptr, 64))).unwrap();
        let err = registry.push_back(Arc::new(Buffer::client(ptr, 64))).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut storage = vec![0u8; 4 * 16];
        let buffers = client_buffers(&mut storage, 4, 16);
        let mut registry = BufferRegistry::new();
        for b in &buffers {
            registry.push_back(Arc::clone(b)).unwrap();
        }

        let removed = registry.remove_at(1).unwrap();
        assert!(Arc::ptr_eq(&removed, &buffers[1]));
        let order: Vec<_> = registry.iter().map(|b| b.header_id()).collect();
        assert_eq!(
            order,
            vec![buffers[0].header_id(), buffers[2].header_id(), buffers[3].header_id()]
        );
        assert!(registry.remove_at(3).is_err());
        assert!(!registry.contains(&buffers[1]));
        assert!(registry.find(buffers[1].header_id()).is_none());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut storage = vec![0u8; 2 * 16];
        let buffers = client_buffers(&mut storage, 2, 16);
        let mut registry = BufferRegistry::with_capacity(2).unwrap();
        for b in &buffers {
            registry.push_back(Arc::clone(b)).unwrap();
        }
        let capacity = registry.capacity();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.capacity(), capacity);
        // Records outlive the index structure.
        assert_eq!(buffers[0].capacity(), 16);
    }

    #[test]
    fn test_oversized_reservation_is_resource_error() {
        let mut registry = BufferRegistry::new();
        assert!(registry.reserve(usize::MAX).unwrap_err().is_resource());
    }
}
