//! Shader Binding Table (SBT) construction.
//!
//! The table is a GPU buffer holding shader-group identifiers followed by
//! their 8-byte arguments, organized by section:
//! - Ray generation
//! - Miss
//! - Hit groups
//!
//! Every record in a section has the same stride: the identifier plus the
//! largest argument list in that section, aligned to the handle alignment.
//! Sections start on the base alignment.

use prism_core::math::align_up;
use prism_gpu::{
    Backend, BufferDesc, BufferUsage, GpuBuffer, Result, SbtLayout, SbtRegion, ShaderIdentifier,
};

/// Size of one record argument in bytes.
pub const ARGUMENT_SIZE: u64 = 8;

/// One record: a shader-group identifier and its arguments.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SbtRecord {
    pub identifier: ShaderIdentifier,
    pub arguments: Vec<u64>,
}

/// Byte layout of a complete table.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbtSections {
    pub ray_generation: SbtRegion,
    pub miss: SbtRegion,
    pub hit_groups: SbtRegion,
    pub total_size: u64,
}

/// Collects the records of one frame's table.
#[derive(Clone, Debug)]
pub struct ShaderBindingTableBuilder {
    layout: SbtLayout,
    ray_generation: Vec<SbtRecord>,
    miss: Vec<SbtRecord>,
    hit_groups: Vec<SbtRecord>,
}

impl ShaderBindingTableBuilder {
    pub const fn new(layout: SbtLayout) -> Self {
        Self {
            layout,
            ray_generation: Vec::new(),
            miss: Vec::new(),
            hit_groups: Vec::new(),
        }
    }

    pub fn add_ray_generation(&mut self, identifier: ShaderIdentifier, arguments: &[u64]) {
        self.ray_generation.push(SbtRecord {
            identifier,
            arguments: arguments.to_vec(),
        });
    }

    pub fn add_miss(&mut self, identifier: ShaderIdentifier, arguments: &[u64]) {
        self.miss.push(SbtRecord {
            identifier,
            arguments: arguments.to_vec(),
        });
    }

    pub fn add_hit_group(&mut self, identifier: ShaderIdentifier, arguments: &[u64]) {
        self.hit_groups.push(SbtRecord {
            identifier,
            arguments: arguments.to_vec(),
        });
    }

    pub fn hit_group_records(&self) -> &[SbtRecord] {
        &self.hit_groups
    }

    /// Stride of a section's records.
    pub fn entry_size(&self, records: &[SbtRecord]) -> u64 {
        let max_arguments = records.iter().map(|r| r.arguments.len()).max().unwrap_or(0) as u64;
        align_up(
            self.layout.handle_size + ARGUMENT_SIZE * max_arguments,
            self.layout.handle_alignment,
        )
    }

    fn section_size(&self, records: &[SbtRecord]) -> u64 {
        align_up(
            self.entry_size(records) * records.len() as u64,
            self.layout.base_alignment,
        )
    }

    /// Offsets, strides and sizes of the three sections.
    pub fn sections(&self) -> SbtSections {
        let ray_generation_size = self.section_size(&self.ray_generation);
        let miss_size = self.section_size(&self.miss);
        let hit_size = self.section_size(&self.hit_groups);

        let ray_generation_stride = self.entry_size(&self.ray_generation);
        SbtSections {
            // A ray-generation region covers exactly one record.
            ray_generation: SbtRegion {
                offset: 0,
                size: ray_generation_stride,
                stride: ray_generation_stride,
            },
            miss: SbtRegion {
                offset: ray_generation_size,
                size: miss_size,
                stride: self.entry_size(&self.miss),
            },
            hit_groups: SbtRegion {
                offset: ray_generation_size + miss_size,
                size: hit_size,
                stride: self.entry_size(&self.hit_groups),
            },
            total_size: ray_generation_size + miss_size + hit_size,
        }
    }

    /// Serialize the table into `sections().total_size` bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let sections = self.sections();
        let mut bytes = vec![0u8; sections.total_size as usize];

        let mut write_section = |records: &[SbtRecord], region: SbtRegion| {
            for (i, record) in records.iter().enumerate() {
                let start = (region.offset + region.stride * i as u64) as usize;
                let identifier = record.identifier.as_bytes();
                let handle_size = (self.layout.handle_size as usize).min(identifier.len());
                bytes[start..start + handle_size].copy_from_slice(&identifier[..handle_size]);

                let mut cursor = start + self.layout.handle_size as usize;
                for argument in &record.arguments {
                    bytes[cursor..cursor + ARGUMENT_SIZE as usize]
                        .copy_from_slice(&argument.to_le_bytes());
                    cursor += ARGUMENT_SIZE as usize;
                }
            }
        };

        write_section(&self.ray_generation, sections.ray_generation);
        write_section(&self.miss, sections.miss);
        write_section(&self.hit_groups, sections.hit_groups);
        bytes
    }
}

/// A binding table in an upload-heap buffer whose storage only grows.
pub struct ShaderBindingTable<B: Backend + ?Sized> {
    storage: GpuBuffer<B>,
    sections: SbtSections,
}

impl<B: Backend + ?Sized> Default for ShaderBindingTable<B> {
    fn default() -> Self {
        Self {
            storage: GpuBuffer::null(),
            sections: SbtSections::default(),
        }
    }
}

impl<B: Backend + ?Sized> ShaderBindingTable<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the builder's records, reallocating the storage at exactly the
    /// required size when it does not fit.
    pub fn update(&mut self, backend: &mut B, builder: &ShaderBindingTableBuilder) -> Result<()> {
        let sections = builder.sections();
        if sections.total_size > self.storage.size() {
            tracing::debug!(
                "Growing shader binding table {} -> {} bytes",
                self.storage.size(),
                sections.total_size
            );
            self.storage.release(backend);
            self.storage = GpuBuffer::allocate(
                backend,
                &BufferDesc::upload(
                    "shader-binding-table",
                    sections.total_size,
                    BufferUsage::SHADER_BINDING_TABLE | BufferUsage::DEVICE_ADDRESS,
                ),
            )?;
        }

        if let Some(buffer) = self.storage.get() {
            backend.write_buffer(buffer, 0, &builder.to_bytes())?;
        }
        self.sections = sections;
        Ok(())
    }

    pub const fn buffer(&self) -> Option<B::Buffer> {
        self.storage.get()
    }

    pub const fn sections(&self) -> SbtSections {
        self.sections
    }

    pub const fn capacity(&self) -> u64 {
        self.storage.size()
    }

    pub fn release(&mut self, backend: &mut B) {
        self.storage.release(backend);
        self.sections = SbtSections::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::Extent;
    use prism_gpu::headless::{HeadlessBackend, BASE_ALIGNMENT, HANDLE_ALIGNMENT, HANDLE_SIZE};

    fn layout() -> SbtLayout {
        SbtLayout {
            handle_size: HANDLE_SIZE,
            handle_alignment: HANDLE_ALIGNMENT,
            base_alignment: BASE_ALIGNMENT,
        }
    }

    fn id(tag: u8) -> ShaderIdentifier {
        ShaderIdentifier(vec![tag; HANDLE_SIZE as usize])
    }

    fn builder(rt_instances: u64) -> ShaderBindingTableBuilder {
        let mut builder = ShaderBindingTableBuilder::new(layout());
        builder.add_ray_generation(id(1), &[]);
        builder.add_miss(id(2), &[]);
        for i in 0..rt_instances {
            builder.add_hit_group(id(3), &[0x1000 * i, 0x2000 * i]);
            builder.add_hit_group(id(4), &[0x1000 * i, 0x2000 * i]);
        }
        builder
    }

    #[test]
    fn section_layout_for_one_instance() {
        let sections = builder(1).sections();
        // 32-byte handles, hit records carry two arguments.
        assert_eq!(sections.ray_generation, SbtRegion { offset: 0, size: 32, stride: 32 });
        assert_eq!(sections.miss, SbtRegion { offset: 64, size: 64, stride: 32 });
        assert_eq!(sections.hit_groups, SbtRegion { offset: 128, size: 128, stride: 64 });
        assert_eq!(sections.total_size, 256);
    }

    #[test]
    fn size_is_a_function_of_instance_count() {
        for n in [0u64, 1, 2, 7, 31] {
            let entry = align_up(HANDLE_SIZE + 16, HANDLE_ALIGNMENT);
            let expected = align_up(HANDLE_SIZE, BASE_ALIGNMENT) * 2
                + align_up(entry * 2 * n, BASE_ALIGNMENT);
            assert_eq!(builder(n).sections().total_size, expected, "n = {n}");
        }
    }

    #[test]
    fn records_carry_identifier_then_arguments() {
        let builder = builder(2);
        let bytes = builder.to_bytes();
        let hit = builder.sections().hit_groups;

        let second_surface = (hit.offset + 2 * hit.stride) as usize;
        assert_eq!(&bytes[second_surface..second_surface + 32], id(3).as_bytes());
        let arguments = &bytes[second_surface + 32..second_surface + 48];
        assert_eq!(&arguments[..8], &0x1000u64.to_le_bytes());
        assert_eq!(&arguments[8..], &0x2000u64.to_le_bytes());
    }

    #[test]
    fn storage_only_grows() {
        let mut backend = HeadlessBackend::new(Extent::new(4, 4));
        let mut table = ShaderBindingTable::new();

        table.update(&mut backend, &builder(8)).unwrap();
        let capacity = table.capacity();
        assert_eq!(capacity, builder(8).sections().total_size);

        table.update(&mut backend, &builder(1)).unwrap();
        assert_eq!(table.capacity(), capacity);
        assert_eq!(backend.stats().buffers_created, 1);
        assert_eq!(table.sections(), builder(1).sections());

        table.update(&mut backend, &builder(9)).unwrap();
        assert!(table.capacity() > capacity);
        assert_eq!(backend.stats().buffers_created, 2);
        assert_eq!(backend.live_buffers(), 1);

        table.release(&mut backend);
        table.release(&mut backend);
        assert_eq!(backend.live_buffers(), 0);
    }
}
