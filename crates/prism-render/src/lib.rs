//! Scene, view pipeline and frame driver for the Prism hybrid renderer.
//!
//! This crate provides:
//! - Generational handles and the [`Renderer`] boundary
//! - Scenes, instances, meshes, textures and material shaders
//! - The per-view snapshot, geometry, heap and binding-table pipeline
//! - The [`Device`] frame driver with its single in-flight frame

pub mod api;
pub mod camera;
pub mod device;
pub mod error;
pub mod instance;
pub mod mesh;
pub mod properties;
pub mod registry;
pub mod scene;
pub mod shader;
pub mod texture;
pub mod view;

pub use api::Renderer;
pub use camera::{Camera, CameraState, CameraUniforms, CAMERA_BUFFER_SIZE};
pub use device::{Device, PipelineState};
pub use error::{RenderError, Result};
pub use instance::{Instance, InstanceDesc};
pub use mesh::Mesh;
pub use properties::{properties_buffer_size, InstanceProperties};
pub use registry::{
    InstanceHandle, Key, MeshHandle, Registry, SceneHandle, ShaderHandle, TextureHandle, ViewHandle,
};
pub use scene::{LightsBinding, Scene};
pub use shader::{Shader, ShaderDesc};
pub use texture::Texture;
pub use view::{
    FrameInputs, InstanceSource, OutputBuffers, RenderInstance, Snapshot, View, ViewStage,
};
