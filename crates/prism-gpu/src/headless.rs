//! A backend without a GPU.
//!
//! [`HeadlessBackend`] keeps every resource as a CPU-side record, returns
//! deterministic sizes, addresses and shader identifiers, and records each
//! command into the open list so tests can inspect exactly what a frame
//! submitted.

use std::fmt;

use hashbrown::HashMap;
use prism_core::constants::FRAME_COUNT;
use prism_core::math::align_up;
use prism_core::Extent;

use crate::backend::{
    AccelerationStructureLevel, AccelerationStructureSizes, Backend, BottomLevelBuild,
    BufferDesc, BufferUsage, DescriptorBinding, DescriptorWrite, DispatchRays, ElementFormat,
    HeapKind, IndexedDraw, RayTracingPipelineDesc, RayTracingPipelineInfo, SbtLayout,
    ShaderIdentifier, TextureDesc, TextureUsage, TopLevelBuild, TriangleGeometry,
};
use crate::barrier::{Barrier, BarrierTarget, ResourceState};
use crate::error::{GpuError, Result};

/// Shader-group handle size reported by the headless device.
pub const HANDLE_SIZE: u64 = 32;
/// Shader-group handle alignment reported by the headless device.
pub const HANDLE_ALIGNMENT: u64 = 32;
/// Binding-table section alignment reported by the headless device.
pub const BASE_ALIGNMENT: u64 = 64;

macro_rules! headless_id {
    ($name:ident) => {
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);
    };
}

headless_id!(BufferId);
headless_id!(TextureId);
headless_id!(StructureId);
headless_id!(TableId);
headless_id!(PipelineId);

/// A live buffer.
#[derive(Clone, Debug)]
pub struct BufferRecord {
    pub name: String,
    pub size: u64,
    pub usage: BufferUsage,
    pub heap: HeapKind,
    pub address: u64,
    /// Contents, kept for upload-heap buffers only.
    pub data: Vec<u8>,
}

/// A live texture.
#[derive(Clone, Debug)]
pub struct TextureRecord {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub usage: TextureUsage,
    pub initial_state: ResourceState,
    pub clear_value: Option<[f32; 4]>,
}

/// A live acceleration structure.
#[derive(Clone, Debug)]
pub struct StructureRecord {
    pub name: String,
    pub level: AccelerationStructureLevel,
    pub storage: BufferId,
    pub size: u64,
    pub address: u64,
}

/// What a descriptor slot holds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Descriptor {
    StorageTexture(TextureId),
    StorageBuffer {
        buffer: BufferId,
        elements: u64,
        format: ElementFormat,
    },
    SampledTexture(TextureId),
    AccelerationStructure(StructureId),
    UniformBuffer {
        buffer: BufferId,
        size: u64,
    },
    StructuredBuffer {
        buffer: BufferId,
        elements: u64,
        stride: u64,
    },
}

impl From<&DescriptorBinding<HeadlessBackend>> for Descriptor {
    fn from(binding: &DescriptorBinding<HeadlessBackend>) -> Self {
        match *binding {
            DescriptorBinding::StorageTexture(t) => Self::StorageTexture(t),
            DescriptorBinding::StorageBuffer {
                buffer,
                elements,
                format,
            } => Self::StorageBuffer {
                buffer,
                elements,
                format,
            },
            DescriptorBinding::SampledTexture(t) => Self::SampledTexture(t),
            DescriptorBinding::AccelerationStructure(a) => Self::AccelerationStructure(a),
            DescriptorBinding::UniformBuffer { buffer, size } => {
                Self::UniformBuffer { buffer, size }
            }
            DescriptorBinding::StructuredBuffer {
                buffer,
                elements,
                stride,
            } => Self::StructuredBuffer {
                buffer,
                elements,
                stride,
            },
        }
    }
}

/// A live descriptor table.
#[derive(Clone, Debug, Default)]
pub struct TableRecord {
    pub capacity: u32,
    pub slots: HashMap<u32, Descriptor>,
}

/// A live ray-tracing pipeline.
#[derive(Clone, Debug)]
pub struct PipelineRecord {
    /// Hit-group pairs including the default pair.
    pub hit_group_pairs: usize,
    pub max_payload_size: u32,
    pub max_attribute_size: u32,
    pub max_recursion_depth: u32,
}

/// A barrier as recorded, with its target resolved to a name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedBarrier {
    Transition {
        target: String,
        before: ResourceState,
        after: ResourceState,
    },
    Uav {
        target: String,
    },
}

/// A recorded command. Resource references are resolved to debug names.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Barriers(Vec<RecordedBarrier>),
    BeginRenderPass {
        target: String,
        clear: Option<[f32; 4]>,
        extent: Extent,
    },
    EndRenderPass,
    BindRaster {
        table_capacity: u32,
    },
    DrawIndexed {
        vertex_buffer: String,
        index_count: u32,
        instance_index: u32,
    },
    BuildBottomLevel {
        destination: String,
        triangle_count: u32,
    },
    BuildTopLevel {
        destination: String,
        instance_count: u32,
    },
    DispatchRays {
        width: u32,
        height: u32,
        hit_records: u64,
    },
    CopyTexture {
        dst: String,
        src: String,
    },
    CopyBufferToTexture {
        dst: String,
        src: String,
    },
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Barriers(barriers) => {
                for (i, barrier) in barriers.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    match barrier {
                        RecordedBarrier::Transition {
                            target,
                            before,
                            after,
                        } => write!(f, "barrier {target} {before:?} -> {after:?}")?,
                        RecordedBarrier::Uav { target } => write!(f, "uav {target}")?,
                    }
                }
                Ok(())
            }
            Self::BeginRenderPass {
                target,
                clear,
                extent,
            } => match clear {
                Some(c) => write!(
                    f,
                    "begin-pass {target} {}x{} clear {:?}",
                    extent.width, extent.height, c
                ),
                None => write!(f, "begin-pass {target} {}x{} load", extent.width, extent.height),
            },
            Self::EndRenderPass => write!(f, "end-pass"),
            Self::BindRaster { table_capacity } => write!(f, "bind-raster table[{table_capacity}]"),
            Self::DrawIndexed {
                vertex_buffer,
                index_count,
                instance_index,
            } => write!(
                f,
                "draw {vertex_buffer} indices={index_count} instance={instance_index}"
            ),
            Self::BuildBottomLevel {
                destination,
                triangle_count,
            } => write!(f, "build-bottom {destination} triangles={triangle_count}"),
            Self::BuildTopLevel {
                destination,
                instance_count,
            } => write!(f, "build-top {destination} instances={instance_count}"),
            Self::DispatchRays {
                width,
                height,
                hit_records,
            } => write!(f, "dispatch-rays {width}x{height} hit-records={hit_records}"),
            Self::CopyTexture { dst, src } => write!(f, "copy {src} -> {dst}"),
            Self::CopyBufferToTexture { dst, src } => write!(f, "upload {src} -> {dst}"),
        }
    }
}

/// Creation counters, never decremented.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: usize,
    pub textures_created: usize,
    pub structures_created: usize,
    pub tables_created: usize,
    pub pipelines_created: usize,
    /// Swap target sets, the initial one included
    pub swap_chains_created: usize,
}

/// GPU-less [`Backend`] for tests and tooling.
pub struct HeadlessBackend {
    surface_extent: Extent,
    swap_extent: Extent,
    swap_targets: Vec<TextureId>,
    swap_index: usize,
    next_id: u32,
    buffers: HashMap<BufferId, BufferRecord>,
    textures: HashMap<TextureId, TextureRecord>,
    structures: HashMap<StructureId, StructureRecord>,
    tables: HashMap<TableId, TableRecord>,
    pipelines: HashMap<PipelineId, PipelineRecord>,
    recording: Option<Vec<Command>>,
    submissions: Vec<Vec<Command>>,
    signaled_value: u64,
    completed_value: u64,
    presents: Vec<u32>,
    stats: HeadlessStats,
    misuse: Vec<String>,
    failing_names: Vec<String>,
}

impl HeadlessBackend {
    /// Create a backend whose surface and swap targets are `extent` wide.
    pub fn new(extent: Extent) -> Self {
        let mut backend = Self {
            surface_extent: extent,
            swap_extent: Extent::default(),
            swap_targets: Vec::new(),
            swap_index: 0,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            structures: HashMap::new(),
            tables: HashMap::new(),
            pipelines: HashMap::new(),
            recording: None,
            submissions: Vec::new(),
            signaled_value: 0,
            completed_value: 0,
            presents: Vec::new(),
            stats: HeadlessStats::default(),
            misuse: Vec::new(),
            failing_names: Vec::new(),
        };
        backend.create_swap_targets(extent);
        backend
    }

    /// Change what [`Backend::surface_extent`] reports, as a window resize
    /// would.
    pub fn set_surface_extent(&mut self, extent: Extent) {
        self.surface_extent = extent;
    }

    /// Make buffer and texture allocations named `name` fail, as an
    /// exhausted device would, until [`clear_allocation_failures`](Self::clear_allocation_failures).
    pub fn fail_allocations_named(&mut self, name: &str) {
        self.failing_names.push(name.to_string());
    }

    pub fn clear_allocation_failures(&mut self) {
        self.failing_names.clear();
    }

    fn check_allocation(&self, name: &str, empty: bool) -> Result<()> {
        if empty {
            return Err(GpuError::AllocationFailed(format!("{name}: zero-sized resource")));
        }
        if self.failing_names.iter().any(|failing| failing == name) {
            return Err(GpuError::AllocationFailed(format!("{name}: out of device memory")));
        }
        Ok(())
    }

    pub fn buffer(&self, id: BufferId) -> Option<&BufferRecord> {
        self.buffers.get(&id)
    }

    /// First live buffer with `name`, lowest id first.
    pub fn find_buffer(&self, name: &str) -> Option<(BufferId, &BufferRecord)> {
        self.buffers
            .iter()
            .filter(|(_, b)| b.name == name)
            .min_by_key(|(id, _)| **id)
            .map(|(id, b)| (*id, b))
    }

    /// Every live buffer with `name`.
    pub fn buffers_named(&self, name: &str) -> Vec<&BufferRecord> {
        let mut found: Vec<_> = self.buffers.iter().filter(|(_, b)| b.name == name).collect();
        found.sort_by_key(|(id, _)| **id);
        found.into_iter().map(|(_, b)| b).collect()
    }

    pub fn texture(&self, id: TextureId) -> Option<&TextureRecord> {
        self.textures.get(&id)
    }

    pub fn find_texture(&self, name: &str) -> Option<(TextureId, &TextureRecord)> {
        self.textures
            .iter()
            .filter(|(_, t)| t.name == name)
            .min_by_key(|(id, _)| **id)
            .map(|(id, t)| (*id, t))
    }

    pub fn structure(&self, id: StructureId) -> Option<&StructureRecord> {
        self.structures.get(&id)
    }

    pub fn table(&self, id: TableId) -> Option<&TableRecord> {
        self.tables.get(&id)
    }

    pub fn pipeline(&self, id: PipelineId) -> Option<&PipelineRecord> {
        self.pipelines.get(&id)
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Live textures, swap targets excluded.
    pub fn live_textures(&self) -> usize {
        self.textures.len() - self.swap_targets.len()
    }

    pub fn live_structures(&self) -> usize {
        self.structures.len()
    }

    pub fn live_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn live_pipelines(&self) -> usize {
        self.pipelines.len()
    }

    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Command lists executed so far, oldest first.
    pub fn submissions(&self) -> &[Vec<Command>] {
        &self.submissions
    }

    /// Commands recorded into the open list.
    pub fn recorded(&self) -> &[Command] {
        self.recording.as_deref().unwrap_or_default()
    }

    pub const fn is_recording(&self) -> bool {
        self.recording.is_some()
    }

    /// Vsync interval of each present, oldest first.
    pub fn presents(&self) -> &[u32] {
        &self.presents
    }

    pub const fn completed_fence_value(&self) -> u64 {
        self.completed_value
    }

    pub const fn swap_index(&self) -> usize {
        self.swap_index
    }

    /// Calls that a real device would reject: recording into a closed list,
    /// destroying unknown handles, writing past a table's capacity.
    pub fn misuse(&self) -> &[String] {
        &self.misuse
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn report(&mut self, message: String) {
        tracing::error!("headless backend misuse: {message}");
        self.misuse.push(message);
    }

    fn create_swap_targets(&mut self, extent: Extent) {
        for texture in std::mem::take(&mut self.swap_targets) {
            self.textures.remove(&texture);
        }
        for i in 0..FRAME_COUNT {
            let id = TextureId(self.allocate_id());
            self.textures.insert(
                id,
                TextureRecord {
                    name: format!("swap-target-{i}"),
                    width: extent.width,
                    height: extent.height,
                    usage: TextureUsage::RENDER_TARGET | TextureUsage::TRANSFER_DST,
                    initial_state: ResourceState::Present,
                    clear_value: None,
                },
            );
            self.swap_targets.push(id);
        }
        self.swap_extent = extent;
        self.swap_index = 0;
        self.stats.swap_chains_created += 1;
    }

    fn record(&mut self, command: Command) {
        match &mut self.recording {
            Some(list) => list.push(command),
            None => self.report(format!("recorded `{command}` into a closed command list")),
        }
    }

    fn buffer_name(&self, id: BufferId) -> String {
        self.buffers
            .get(&id)
            .map_or_else(|| format!("<buffer {}>", id.0), |b| b.name.clone())
    }

    fn texture_name(&self, id: TextureId) -> String {
        self.textures
            .get(&id)
            .map_or_else(|| format!("<texture {}>", id.0), |t| t.name.clone())
    }

    fn structure_name(&self, id: StructureId) -> String {
        self.structures
            .get(&id)
            .map_or_else(|| format!("<structure {}>", id.0), |s| s.name.clone())
    }

    fn target_name(&self, target: BarrierTarget<Self>) -> String {
        match target {
            BarrierTarget::Texture(t) => self.texture_name(t),
            BarrierTarget::Buffer(b) => self.buffer_name(b),
            BarrierTarget::AccelerationStructure(s) => self.structure_name(s),
        }
    }

    fn identifier(pipeline: PipelineId, group: u32) -> ShaderIdentifier {
        let mut bytes = vec![0u8; HANDLE_SIZE as usize];
        bytes[..4].copy_from_slice(&pipeline.0.to_le_bytes());
        bytes[4..8].copy_from_slice(&group.to_le_bytes());
        ShaderIdentifier(bytes)
    }
}

impl Backend for HeadlessBackend {
    type Buffer = BufferId;
    type Texture = TextureId;
    type AccelerationStructure = StructureId;
    type DescriptorTable = TableId;
    type RayTracingPipeline = PipelineId;

    fn surface_extent(&self) -> Extent {
        self.surface_extent
    }

    fn swap_extent(&self) -> Extent {
        self.swap_extent
    }

    fn resize_swap_targets(&mut self, extent: Extent) -> Result<()> {
        if extent != self.swap_extent {
            self.create_swap_targets(extent);
        }
        Ok(())
    }

    fn swap_target(&self) -> TextureId {
        self.swap_targets[self.swap_index]
    }

    fn sbt_layout(&self) -> SbtLayout {
        SbtLayout {
            handle_size: HANDLE_SIZE,
            handle_alignment: HANDLE_ALIGNMENT,
            base_alignment: BASE_ALIGNMENT,
        }
    }

    fn create_buffer(&mut self, desc: &BufferDesc<'_>) -> Result<BufferId> {
        self.check_allocation(desc.name, desc.size == 0)?;
        let id = BufferId(self.allocate_id());
        let data = if desc.heap == HeapKind::Upload {
            vec![0; desc.size as usize]
        } else {
            Vec::new()
        };
        self.buffers.insert(
            id,
            BufferRecord {
                name: desc.name.to_string(),
                size: desc.size,
                usage: desc.usage,
                heap: desc.heap,
                address: u64::from(id.0) << 32,
                data,
            },
        );
        self.stats.buffers_created += 1;
        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(&buffer).is_none() {
            self.report(format!("destroyed unknown buffer {}", buffer.0));
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let record = self
            .buffers
            .get_mut(&buffer)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("buffer {}", buffer.0)))?;
        if record.heap != HeapKind::Upload {
            return Err(GpuError::InvalidState(format!(
                "{}: buffer is not CPU writable",
                record.name
            )));
        }
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|&end| end <= record.size)
            .ok_or_else(|| {
                GpuError::InvalidState(format!("{}: write past end of buffer", record.name))
            })?;
        record.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn buffer_address(&self, buffer: BufferId) -> u64 {
        self.buffers.get(&buffer).map_or(0, |b| b.address)
    }

    fn create_texture(&mut self, desc: &TextureDesc<'_>) -> Result<TextureId> {
        self.check_allocation(desc.name, desc.width == 0 || desc.height == 0)?;
        let id = TextureId(self.allocate_id());
        self.textures.insert(
            id,
            TextureRecord {
                name: desc.name.to_string(),
                width: desc.width,
                height: desc.height,
                usage: desc.usage,
                initial_state: desc.initial_state,
                clear_value: desc.clear_value,
            },
        );
        self.stats.textures_created += 1;
        Ok(id)
    }

    fn destroy_texture(&mut self, texture: TextureId) {
        if self.swap_targets.contains(&texture) || self.textures.remove(&texture).is_none() {
            self.report(format!("destroyed unknown texture {}", texture.0));
        }
    }

    fn bottom_level_sizes(&self, geometry: &TriangleGeometry<Self>) -> AccelerationStructureSizes {
        let triangles = u64::from(geometry.triangle_count());
        AccelerationStructureSizes {
            scratch: align_up(256 + 64 * triangles, 256),
            result: align_up(512 + 64 * triangles, 256),
        }
    }

    fn top_level_sizes(&self, instance_count: u32) -> AccelerationStructureSizes {
        let instances = u64::from(instance_count);
        AccelerationStructureSizes {
            scratch: align_up(128 + 64 * instances, 256),
            result: align_up(256 + 128 * instances, 256),
        }
    }

    fn create_acceleration_structure(
        &mut self,
        level: AccelerationStructureLevel,
        storage: BufferId,
        size: u64,
        name: &str,
    ) -> Result<StructureId> {
        let storage_size = self
            .buffers
            .get(&storage)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("{name}: storage buffer")))?
            .size;
        if size > storage_size {
            return Err(GpuError::InvalidState(format!(
                "{name}: {size} bytes do not fit in a {storage_size} byte buffer"
            )));
        }
        let id = StructureId(self.allocate_id());
        self.structures.insert(
            id,
            StructureRecord {
                name: name.to_string(),
                level,
                storage,
                size,
                address: (u64::from(id.0) << 32) | 0x8000_0000,
            },
        );
        self.stats.structures_created += 1;
        Ok(id)
    }

    fn destroy_acceleration_structure(&mut self, structure: StructureId) {
        if self.structures.remove(&structure).is_none() {
            self.report(format!("destroyed unknown structure {}", structure.0));
        }
    }

    fn acceleration_structure_address(&self, structure: StructureId) -> u64 {
        self.structures.get(&structure).map_or(0, |s| s.address)
    }

    fn create_descriptor_table(&mut self, capacity: u32) -> Result<TableId> {
        let id = TableId(self.allocate_id());
        self.tables.insert(
            id,
            TableRecord {
                capacity,
                slots: HashMap::new(),
            },
        );
        self.stats.tables_created += 1;
        Ok(id)
    }

    fn destroy_descriptor_table(&mut self, table: TableId) {
        if self.tables.remove(&table).is_none() {
            self.report(format!("destroyed unknown table {}", table.0));
        }
    }

    fn write_descriptors(&mut self, table: TableId, writes: &[DescriptorWrite<Self>]) {
        let mut errors = Vec::new();
        match self.tables.get_mut(&table) {
            Some(record) => {
                for write in writes {
                    if write.slot >= record.capacity {
                        errors.push(format!(
                            "slot {} written past table capacity {}",
                            write.slot, record.capacity
                        ));
                        continue;
                    }
                    record.slots.insert(write.slot, Descriptor::from(&write.binding));
                }
            }
            None => errors.push(format!("wrote descriptors into unknown table {}", table.0)),
        }
        for error in errors {
            self.report(error);
        }
    }

    fn create_ray_tracing_pipeline(
        &mut self,
        desc: &RayTracingPipelineDesc<'_>,
    ) -> Result<RayTracingPipelineInfo<PipelineId>> {
        let id = PipelineId(self.allocate_id());
        let pairs = desc.hit_groups.len() + 1;
        self.pipelines.insert(
            id,
            PipelineRecord {
                hit_group_pairs: pairs,
                max_payload_size: desc.max_payload_size,
                max_attribute_size: desc.max_attribute_size,
                max_recursion_depth: desc.max_recursion_depth,
            },
        );
        self.stats.pipelines_created += 1;

        let hit_groups = (0..pairs as u32)
            .map(|pair| {
                (
                    Self::identifier(id, 3 + 2 * pair),
                    Self::identifier(id, 4 + 2 * pair),
                )
            })
            .collect();
        Ok(RayTracingPipelineInfo {
            pipeline: id,
            ray_generation: Self::identifier(id, 0),
            surface_miss: Self::identifier(id, 1),
            shadow_miss: Self::identifier(id, 2),
            hit_groups,
        })
    }

    fn destroy_ray_tracing_pipeline(&mut self, pipeline: PipelineId) {
        if self.pipelines.remove(&pipeline).is_none() {
            self.report(format!("destroyed unknown pipeline {}", pipeline.0));
        }
    }

    fn reset_command_list(&mut self) -> Result<()> {
        self.recording = Some(Vec::new());
        Ok(())
    }

    fn execute_command_list(&mut self) -> Result<()> {
        let list = self
            .recording
            .take()
            .ok_or_else(|| GpuError::InvalidState("no open command list".to_string()))?;
        self.submissions.push(list);
        Ok(())
    }

    fn signal(&mut self, value: u64) -> Result<()> {
        self.signaled_value = self.signaled_value.max(value);
        Ok(())
    }

    fn wait(&mut self, value: u64) -> Result<()> {
        if value > self.signaled_value {
            return Err(GpuError::InvalidState(format!(
                "waiting for fence value {value} that was never signaled"
            )));
        }
        self.completed_value = value;
        Ok(())
    }

    fn present(&mut self, vsync_interval: u32) -> Result<()> {
        self.presents.push(vsync_interval);
        Ok(())
    }

    fn advance_swap_target(&mut self) -> Result<()> {
        self.swap_index = (self.swap_index + 1) % self.swap_targets.len();
        Ok(())
    }

    fn cmd_barriers(&mut self, barriers: &[Barrier<Self>]) {
        let recorded = barriers
            .iter()
            .map(|barrier| match *barrier {
                Barrier::Transition {
                    target,
                    before,
                    after,
                } => RecordedBarrier::Transition {
                    target: self.target_name(target),
                    before,
                    after,
                },
                Barrier::Uav { target } => RecordedBarrier::Uav {
                    target: self.target_name(target),
                },
            })
            .collect();
        self.record(Command::Barriers(recorded));
    }

    fn cmd_begin_render_pass(&mut self, target: TextureId, clear: Option<[f32; 4]>, extent: Extent) {
        let target = self.texture_name(target);
        self.record(Command::BeginRenderPass {
            target,
            clear,
            extent,
        });
    }

    fn cmd_end_render_pass(&mut self) {
        self.record(Command::EndRenderPass);
    }

    fn cmd_bind_raster(&mut self, table: TableId) {
        let table_capacity = self.tables.get(&table).map_or(0, |t| t.capacity);
        self.record(Command::BindRaster { table_capacity });
    }

    fn cmd_draw_indexed(&mut self, draw: &IndexedDraw<Self>) {
        let vertex_buffer = self.buffer_name(draw.vertex_buffer);
        self.record(Command::DrawIndexed {
            vertex_buffer,
            index_count: draw.index_count,
            instance_index: draw.instance_index,
        });
    }

    fn cmd_build_bottom_level(&mut self, build: &BottomLevelBuild<'_, Self>) {
        let destination = self.structure_name(build.destination);
        self.record(Command::BuildBottomLevel {
            destination,
            triangle_count: build.geometry.triangle_count(),
        });
    }

    fn cmd_build_top_level(&mut self, build: &TopLevelBuild<Self>) {
        let destination = self.structure_name(build.destination);
        self.record(Command::BuildTopLevel {
            destination,
            instance_count: build.instance_count,
        });
    }

    fn cmd_dispatch_rays(&mut self, dispatch: &DispatchRays<Self>) {
        let hit_records = dispatch
            .hit_groups
            .size
            .checked_div(dispatch.hit_groups.stride)
            .unwrap_or(0);
        self.record(Command::DispatchRays {
            width: dispatch.width,
            height: dispatch.height,
            hit_records,
        });
    }

    fn cmd_copy_texture(&mut self, dst: TextureId, src: TextureId) {
        let dst = self.texture_name(dst);
        let src = self.texture_name(src);
        self.record(Command::CopyTexture { dst, src });
    }

    fn cmd_copy_buffer_to_texture(&mut self, dst: TextureId, src: BufferId) {
        let dst = self.texture_name(dst);
        let src = self.buffer_name(src);
        self.record(Command::CopyBufferToTexture { dst, src });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::GpuBuffer;

    #[test]
    fn upload_buffers_keep_their_contents() {
        let mut backend = HeadlessBackend::new(Extent::new(2, 2));
        let mut buffer = GpuBuffer::allocate(
            &mut backend,
            &BufferDesc::upload("constants", 16, BufferUsage::UNIFORM),
        )
        .unwrap();
        let id = buffer.get().unwrap();

        backend.write_buffer(id, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(&backend.buffer(id).unwrap().data[..8], &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(backend.write_buffer(id, 14, &[0; 4]).is_err());

        buffer.release(&mut backend);
        buffer.release(&mut backend);
        assert!(buffer.is_null());
        assert_eq!(backend.live_buffers(), 0);
        assert!(backend.misuse().is_empty());
    }

    #[test]
    fn commands_outside_an_open_list_are_reported() {
        let mut backend = HeadlessBackend::new(Extent::new(2, 2));
        backend.cmd_end_render_pass();
        assert_eq!(backend.misuse().len(), 1);

        backend.reset_command_list().unwrap();
        backend.cmd_end_render_pass();
        backend.execute_command_list().unwrap();
        assert_eq!(backend.submissions(), &[vec![Command::EndRenderPass]]);
    }

    #[test]
    fn named_allocations_can_be_made_to_fail() {
        let mut backend = HeadlessBackend::new(Extent::new(2, 2));
        backend.fail_allocations_named("hit-color");
        let desc = BufferDesc::upload("hit-color", 16, BufferUsage::STORAGE);
        assert!(matches!(
            backend.create_buffer(&desc),
            Err(GpuError::AllocationFailed(_))
        ));
        assert!(backend
            .create_buffer(&BufferDesc::upload("camera", 16, BufferUsage::UNIFORM))
            .is_ok());

        backend.clear_allocation_failures();
        assert!(backend.create_buffer(&desc).is_ok());
        assert_eq!(backend.stats().buffers_created, 2);
    }

    #[test]
    fn swap_targets_rotate() {
        let mut backend = HeadlessBackend::new(Extent::new(2, 2));
        let first = backend.swap_target();
        backend.advance_swap_target().unwrap();
        assert_ne!(backend.swap_target(), first);
        backend.advance_swap_target().unwrap();
        assert_eq!(backend.swap_target(), first);
    }

    #[test]
    fn pipeline_reports_default_pair_first() {
        let mut backend = HeadlessBackend::new(Extent::new(2, 2));
        let info = backend
            .create_ray_tracing_pipeline(&RayTracingPipelineDesc {
                hit_groups: &[crate::backend::HitGroupPair::default()],
                max_payload_size: 8,
                max_attribute_size: 8,
                max_recursion_depth: 1,
            })
            .unwrap();
        assert_eq!(info.hit_groups.len(), 2);
        assert_eq!(info.ray_generation.as_bytes().len(), HANDLE_SIZE as usize);
        assert_ne!(info.hit_groups[0].0, info.hit_groups[1].0);
    }
}
