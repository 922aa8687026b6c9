//! Headless device harness.
//!
//! Wraps a [`Device`] on the [`HeadlessBackend`] and exposes the recorded
//! command lists as text, one command or barrier per line.

use image::RgbaImage;
use prism_core::{Extent, MeshFlags};
use prism_gpu::headless::{BufferId, Command, HeadlessBackend};
use prism_render::{Device, MeshHandle, SceneHandle, TextureHandle, ViewHandle};

use crate::fixtures;
use crate::{Result, TestError};

/// Render commands as text, splitting multi-barrier commands into one line
/// per barrier.
pub fn command_lines(commands: &[Command]) -> Vec<String> {
    commands
        .iter()
        .flat_map(|command| {
            command
                .to_string()
                .lines()
                .map(str::to_owned)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A scene with one view.
#[derive(Clone, Copy, Debug)]
pub struct TestScene {
    pub scene: SceneHandle,
    pub view: ViewHandle,
}

/// A device on the headless backend.
pub struct HeadlessHarness {
    device: Device<HeadlessBackend>,
}

impl HeadlessHarness {
    /// Create a device whose surface is `width`x`height`.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let device = Device::new(HeadlessBackend::new(Extent::new(width, height)))?;
        Ok(Self { device })
    }

    pub const fn device(&self) -> &Device<HeadlessBackend> {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut Device<HeadlessBackend> {
        &mut self.device
    }

    pub const fn backend(&self) -> &HeadlessBackend {
        self.device.backend()
    }

    /// Draw one frame presented on every vertical blank.
    pub fn draw(&mut self) -> Result<()> {
        self.draw_with_vsync(1)
    }

    pub fn draw_with_vsync(&mut self, vsync_interval: u32) -> Result<()> {
        self.device.draw(vsync_interval)?;
        Ok(())
    }

    /// Change the surface size the next frame picks up.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.device
            .backend_mut()
            .set_surface_extent(Extent::new(width, height));
    }

    /// A scene with a single view.
    pub fn scene(&mut self) -> Result<TestScene> {
        let scene = self.device.create_scene();
        let view = self.device.create_view(scene)?;
        Ok(TestScene { scene, view })
    }

    pub fn texture(&mut self, image: &RgbaImage) -> Result<TextureHandle> {
        let (width, height) = image.dimensions();
        Ok(self.device.create_texture(width, height, image.as_raw())?)
    }

    pub fn triangle_mesh(&mut self, flags: MeshFlags) -> Result<MeshHandle> {
        let (vertices, indices) = fixtures::triangle();
        Ok(self.device.create_mesh(&vertices, &indices, flags)?)
    }

    pub fn quad_mesh(&mut self, flags: MeshFlags) -> Result<MeshHandle> {
        let (vertices, indices) = fixtures::quad();
        Ok(self.device.create_mesh(&vertices, &indices, flags)?)
    }

    /// Lines of the `n`-th most recent submission, `0` being the last.
    pub fn submission_lines(&self, n: usize) -> Vec<String> {
        let submissions = self.backend().submissions();
        submissions
            .len()
            .checked_sub(n + 1)
            .map(|i| command_lines(&submissions[i]))
            .unwrap_or_default()
    }

    /// The last frame's commands.
    pub fn last_frame(&self) -> Vec<String> {
        self.submission_lines(0)
    }

    /// Contents of an upload-heap buffer.
    pub fn buffer_data(&self, buffer: BufferId) -> &[u8] {
        self.backend()
            .buffer(buffer)
            .map_or(&[][..], |record| record.data.as_slice())
    }

    /// Fail when the backend saw a call a real device would reject.
    pub fn check_misuse(&self) -> Result<()> {
        let misuse = self.backend().misuse();
        if misuse.is_empty() {
            Ok(())
        } else {
            for entry in misuse {
                tracing::warn!("Backend misuse: {entry}");
            }
            Err(TestError::Misuse(misuse.to_vec()))
        }
    }
}
