//! View cameras.

use glam::{Mat4, Vec3};

/// Size of a view's camera buffer.
pub const CAMERA_BUFFER_SIZE: u64 = 512;

/// Perspective look-at parameters of a view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub eye: Vec3,
    pub focus: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            eye: Vec3::ONE,
            focus: Vec3::ZERO,
            up: Vec3::Y,
            fov: 45.0_f32.to_radians(),
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl CameraState {
    pub fn new(eye: Vec3, focus: Vec3, up: Vec3, fov: f32, near: f32, far: f32) -> Self {
        debug_assert!(fov > 0.0, "field of view must be positive");
        Self {
            eye,
            focus,
            up,
            fov,
            near,
            far,
        }
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.focus, self.up)
    }

    pub fn projection_matrix(&self, aspect: f32) -> Mat4 {
        Mat4::perspective_rh(self.fov, aspect, self.near, self.far)
    }
}

/// Camera uniform buffer data for GPU.
#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub inverse_view: [[f32; 4]; 4],
    pub inverse_projection: [[f32; 4]; 4],
    pub previous_view_projection: [[f32; 4]; 4],
    pub view_projection: [[f32; 4]; 4],
}

/// A camera plus the view-projection it had on the previous update.
#[derive(Debug, Clone)]
pub struct Camera {
    pub state: CameraState,
    previous_view_projection: Mat4,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            state: CameraState::default(),
            previous_view_projection: Mat4::IDENTITY,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn previous_view_projection(&self) -> Mat4 {
        self.previous_view_projection
    }

    /// Derive this frame's uniforms and remember the view-projection for the
    /// next call.
    pub fn update(&mut self, aspect: f32) -> CameraUniforms {
        let view = self.state.view_matrix();
        let projection = self.state.projection_matrix(aspect);
        let view_projection = projection * view;

        let uniforms = CameraUniforms {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            inverse_view: view.inverse().to_cols_array_2d(),
            inverse_projection: projection.inverse().to_cols_array_2d(),
            previous_view_projection: self.previous_view_projection.to_cols_array_2d(),
            view_projection: view_projection.to_cols_array_2d(),
        };
        self.previous_view_projection = view_projection;
        uniforms
    }
}
