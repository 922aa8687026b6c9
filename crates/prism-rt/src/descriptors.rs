//! The per-view descriptor heap.

use prism_core::constants::{BASELINE_DESCRIPTORS, MAX_TEXTURES};
use prism_gpu::{Backend, DescriptorWrite, Result};

/// Fixed heap slots, in the order views write them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u32)]
pub enum HeapSlot {
    Output = 0,
    HitDistance = 1,
    HitColor = 2,
    HitNormal = 3,
    HitInstanceId = 4,
    RasterBackground = 5,
    RasterForeground = 6,
    TopLevel = 7,
    Camera = 8,
    Lights = 9,
    InstanceProperties = 10,
}

impl HeapSlot {
    pub const fn index(self) -> u32 {
        self as u32
    }

    /// Slot of the `i`-th used texture.
    pub const fn texture(i: u32) -> u32 {
        BASELINE_DESCRIPTORS + i
    }
}

/// Entries a heap needs for `texture_count` textures.
pub const fn required_capacity(texture_count: usize) -> u32 {
    BASELINE_DESCRIPTORS + texture_count as u32
}

/// A descriptor table that is recreated only when it must grow.
pub struct DescriptorHeap<B: Backend + ?Sized> {
    table: Option<B::DescriptorTable>,
    capacity: u32,
}

impl<B: Backend + ?Sized> Default for DescriptorHeap<B> {
    fn default() -> Self {
        Self {
            table: None,
            capacity: 0,
        }
    }
}

impl<B: Backend + ?Sized> DescriptorHeap<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make room for `texture_count` textures. Returns `true` when the
    /// table was recreated.
    pub fn ensure_capacity(&mut self, backend: &mut B, texture_count: usize) -> Result<bool> {
        debug_assert!(texture_count <= MAX_TEXTURES);
        let required = required_capacity(texture_count);
        if self.table.is_some() && required <= self.capacity {
            return Ok(false);
        }

        tracing::debug!("Growing descriptor heap {} -> {required} entries", self.capacity);
        self.release(backend);
        self.table = Some(backend.create_descriptor_table(required)?);
        self.capacity = required;
        Ok(true)
    }

    pub fn write(&self, backend: &mut B, writes: &[DescriptorWrite<B>]) {
        if let Some(table) = self.table {
            backend.write_descriptors(table, writes);
        }
    }

    pub const fn table(&self) -> Option<B::DescriptorTable> {
        self.table
    }

    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn release(&mut self, backend: &mut B) {
        if let Some(table) = self.table.take() {
            backend.destroy_descriptor_table(table);
        }
        self.capacity = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Extent;
    use prism_gpu::headless::HeadlessBackend;

    #[test]
    fn slots_are_contiguous_before_textures() {
        assert_eq!(HeapSlot::Output.index(), 0);
        assert_eq!(HeapSlot::InstanceProperties.index() + 1, BASELINE_DESCRIPTORS);
        assert_eq!(HeapSlot::texture(0), 11);
        assert_eq!(HeapSlot::texture(3), 14);
    }

    #[test]
    fn capacity_only_grows() {
        let mut backend = HeadlessBackend::new(Extent::new(4, 4));
        let mut heap = DescriptorHeap::new();

        assert!(heap.ensure_capacity(&mut backend, 0).unwrap());
        assert_eq!(heap.capacity(), 11);

        assert!(heap.ensure_capacity(&mut backend, 3).unwrap());
        assert_eq!(heap.capacity(), 14);

        assert!(!heap.ensure_capacity(&mut backend, 1).unwrap());
        assert_eq!(heap.capacity(), 14);
        assert_eq!(backend.stats().tables_created, 2);
        assert_eq!(backend.live_tables(), 1);

        heap.release(&mut backend);
        assert_eq!(backend.live_tables(), 0);
        assert!(backend.misuse().is_empty());
    }
}
