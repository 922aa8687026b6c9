//! Descriptor tables on top of Vulkan descriptor sets.
//!
//! Every table shares one set layout. Slots below
//! [`BASELINE_DESCRIPTORS`] map to their own binding; slots from there on
//! are elements of a variable-length sampled-image array.

use ash::vk;
use prism_core::constants::{BASELINE_DESCRIPTORS, MAX_TEXTURES};

use crate::error::Result;

/// Binding holding the immutable samplers (point, linear).
pub const SAMPLER_BINDING: u32 = BASELINE_DESCRIPTORS;
/// Binding of the texture array.
pub const TEXTURE_BINDING: u32 = BASELINE_DESCRIPTORS + 1;

/// Descriptor type of a fixed slot.
pub const fn slot_descriptor_type(slot: u32) -> vk::DescriptorType {
    match slot {
        0 => vk::DescriptorType::STORAGE_IMAGE,
        5 | 6 => vk::DescriptorType::SAMPLED_IMAGE,
        7 => vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
        8 => vk::DescriptorType::UNIFORM_BUFFER,
        _ => vk::DescriptorType::STORAGE_BUFFER,
    }
}

/// `(binding, array element)` a table slot is written to.
pub const fn slot_binding(slot: u32) -> (u32, u32) {
    if slot < BASELINE_DESCRIPTORS {
        (slot, 0)
    } else {
        (TEXTURE_BINDING, slot - BASELINE_DESCRIPTORS)
    }
}

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    flags: Vec<vk::DescriptorBindingFlags>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Add a binding.
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self.flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a binding shaders may read while it holds no valid descriptor,
    /// such as the slots a view only fills when it has something to put
    /// there.
    pub fn optional_binding(
        self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        let mut builder = self.binding(binding, descriptor_type, count, stage_flags);
        if let Some(flags) = builder.flags.last_mut() {
            *flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND;
        }
        builder
    }

    /// Add immutable samplers.
    pub fn samplers(
        mut self,
        binding: u32,
        samplers: &'a [vk::Sampler],
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::SAMPLER)
                .stage_flags(stage_flags)
                .immutable_samplers(samplers),
        );
        self.flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a partially bound, variable-length array. Must be the last
    /// binding.
    pub fn variable_array(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        max_count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(max_count)
                .stage_flags(stage_flags),
        );
        self.flags.push(
            vk::DescriptorBindingFlags::PARTIALLY_BOUND
                | vk::DescriptorBindingFlags::VARIABLE_DESCRIPTOR_COUNT,
        );
        self
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<vk::DescriptorSetLayout> {
        let mut binding_flags =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&self.flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .push_next(&mut binding_flags);

        let layout = device.create_descriptor_set_layout(&layout_info, None)?;
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// The set layout shared by every descriptor table, with its samplers.
pub struct TableLayout {
    pub set_layout: vk::DescriptorSetLayout,
    samplers: [vk::Sampler; 2],
}

impl TableLayout {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let samplers = [
            create_sampler(device, vk::Filter::NEAREST)?,
            create_sampler(device, vk::Filter::LINEAR)?,
        ];

        let stages = vk::ShaderStageFlags::ALL;
        let mut builder = DescriptorSetLayoutBuilder::new();
        for slot in 0..BASELINE_DESCRIPTORS {
            builder = builder.optional_binding(slot, slot_descriptor_type(slot), 1, stages);
        }
        let set_layout = builder
            .samplers(SAMPLER_BINDING, &samplers, stages)
            .variable_array(
                TEXTURE_BINDING,
                vk::DescriptorType::SAMPLED_IMAGE,
                MAX_TEXTURES as u32,
                stages,
            )
            .build(device)?;

        Ok(Self {
            set_layout,
            samplers,
        })
    }

    /// # Safety
    /// The device must be valid and no table may still use the layout.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_set_layout(self.set_layout, None);
        for sampler in self.samplers {
            device.destroy_sampler(sampler, None);
        }
    }
}

unsafe fn create_sampler(device: &ash::Device, filter: vk::Filter) -> Result<vk::Sampler> {
    let mipmap_mode = if filter == vk::Filter::LINEAR {
        vk::SamplerMipmapMode::LINEAR
    } else {
        vk::SamplerMipmapMode::NEAREST
    };
    let info = vk::SamplerCreateInfo::default()
        .mag_filter(filter)
        .min_filter(filter)
        .mipmap_mode(mipmap_mode)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .max_lod(vk::LOD_CLAMP_NONE);
    Ok(device.create_sampler(&info, None)?)
}

/// A descriptor pool holding exactly one table.
pub struct TablePool {
    pub pool: vk::DescriptorPool,
    pub set: vk::DescriptorSet,
}

impl TablePool {
    /// Allocate a table with `capacity` slots.
    ///
    /// # Safety
    /// The device and layout must be valid.
    pub unsafe fn new(device: &ash::Device, layout: &TableLayout, capacity: u32) -> Result<Self> {
        let textures = capacity.saturating_sub(BASELINE_DESCRIPTORS).min(MAX_TEXTURES as u32);

        let pool_sizes = [
            pool_size(vk::DescriptorType::STORAGE_IMAGE, 1),
            pool_size(vk::DescriptorType::STORAGE_BUFFER, 6),
            pool_size(vk::DescriptorType::SAMPLED_IMAGE, 2 + textures.max(1)),
            pool_size(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, 1),
            pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1),
            pool_size(vk::DescriptorType::SAMPLER, 2),
        ];
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(1)
            .pool_sizes(&pool_sizes);
        let pool = device.create_descriptor_pool(&create_info, None)?;

        let counts = [textures];
        let mut variable_counts =
            vk::DescriptorSetVariableDescriptorCountAllocateInfo::default().descriptor_counts(&counts);
        let layouts = [layout.set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool)
            .set_layouts(&layouts)
            .push_next(&mut variable_counts);

        let set = match device.allocate_descriptor_sets(&alloc_info) {
            Ok(sets) => sets[0],
            Err(e) => {
                device.destroy_descriptor_pool(pool, None);
                return Err(e.into());
            }
        };

        Ok(Self { pool, set })
    }

    /// # Safety
    /// The device must be valid and the table must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_descriptor_pool(self.pool, None);
    }
}

const fn pool_size(ty: vk::DescriptorType, descriptor_count: u32) -> vk::DescriptorPoolSize {
    vk::DescriptorPoolSize {
        ty,
        descriptor_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_slots_have_their_own_binding() {
        assert_eq!(slot_binding(0), (0, 0));
        assert_eq!(slot_binding(10), (10, 0));
        assert_eq!(slot_descriptor_type(7), vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        assert_eq!(slot_descriptor_type(8), vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(slot_descriptor_type(4), vk::DescriptorType::STORAGE_BUFFER);
    }

    #[test]
    fn baseline_bindings_may_be_unwritten() {
        let builder = DescriptorSetLayoutBuilder::new()
            .binding(0, vk::DescriptorType::UNIFORM_BUFFER, 1, vk::ShaderStageFlags::ALL)
            .optional_binding(1, vk::DescriptorType::STORAGE_IMAGE, 1, vk::ShaderStageFlags::ALL);
        assert_eq!(
            builder.flags,
            [
                vk::DescriptorBindingFlags::empty(),
                vk::DescriptorBindingFlags::PARTIALLY_BOUND
            ]
        );
        assert_eq!(builder.bindings[1].descriptor_type, vk::DescriptorType::STORAGE_IMAGE);
    }

    #[test]
    fn texture_slots_index_the_array() {
        assert_eq!(slot_binding(11), (TEXTURE_BINDING, 0));
        assert_eq!(slot_binding(14), (TEXTURE_BINDING, 3));
    }
}
