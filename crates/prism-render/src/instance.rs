//! Scene instances.

use glam::Mat4;
use prism_core::Material;

use crate::registry::{MeshHandle, SceneHandle, ShaderHandle, TextureHandle};

/// Everything an instance draws with.
#[derive(Clone, Copy, Debug)]
pub struct InstanceDesc {
    pub mesh: MeshHandle,
    pub diffuse_texture: TextureHandle,
    pub normal_texture: Option<TextureHandle>,
    /// `None` selects the built-in hit groups.
    pub shader: Option<ShaderHandle>,
    pub transform: Mat4,
    pub material: Material,
}

impl InstanceDesc {
    pub fn new(mesh: MeshHandle, diffuse_texture: TextureHandle) -> Self {
        Self {
            mesh,
            diffuse_texture,
            normal_texture: None,
            shader: None,
            transform: Mat4::IDENTITY,
            material: Material::default(),
        }
    }

    #[must_use]
    pub fn with_transform(mut self, transform: Mat4) -> Self {
        self.transform = transform;
        self
    }

    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    #[must_use]
    pub fn with_normal_texture(mut self, texture: TextureHandle) -> Self {
        self.normal_texture = Some(texture);
        self
    }

    #[must_use]
    pub fn with_shader(mut self, shader: ShaderHandle) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn uses_mesh(&self, mesh: MeshHandle) -> bool {
        self.mesh == mesh
    }

    pub fn uses_texture(&self, texture: TextureHandle) -> bool {
        self.diffuse_texture == texture || self.normal_texture == Some(texture)
    }

    pub fn uses_shader(&self, shader: ShaderHandle) -> bool {
        self.shader == Some(shader)
    }
}

/// An instance and the scene it belongs to.
#[derive(Clone, Copy, Debug)]
pub struct Instance {
    pub scene: SceneHandle,
    pub desc: InstanceDesc,
}
