//! Material shaders.

use prism_gpu::HitGroupPair;

/// What a shader contributes to the ray-tracing pipeline.
#[derive(Clone, Debug, Default)]
pub struct ShaderDesc {
    pub name: String,
    /// Surface and shadow hit groups. Shaders without them only affect
    /// rasterization and never force a pipeline rebuild.
    pub hit_groups: Option<HitGroupPair>,
}

impl ShaderDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hit_groups: None,
        }
    }

    #[must_use]
    pub fn with_hit_groups(mut self, hit_groups: HitGroupPair) -> Self {
        self.hit_groups = Some(hit_groups);
        self
    }
}

/// A registered shader.
#[derive(Debug)]
pub struct Shader {
    desc: ShaderDesc,
    /// Pair index in the current pipeline; 0 is the built-in default pair.
    hit_group_index: u32,
}

impl Shader {
    pub const fn new(desc: ShaderDesc) -> Self {
        Self {
            desc,
            hit_group_index: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.desc.name
    }

    pub const fn hit_groups(&self) -> Option<&HitGroupPair> {
        self.desc.hit_groups.as_ref()
    }

    pub const fn has_hit_groups(&self) -> bool {
        self.desc.hit_groups.is_some()
    }

    pub const fn hit_group_index(&self) -> u32 {
        self.hit_group_index
    }

    pub(crate) fn set_hit_group_index(&mut self, index: u32) {
        self.hit_group_index = index;
    }
}
