//! Sampled RGBA8 textures.

use prism_gpu::{
    Backend, Barrier, BufferDesc, BufferUsage, FrameSynchronizer, GpuBuffer, GpuTexture, HeapKind,
    QueueKind, ResourceState, TextureDesc, TextureUsage,
};

use crate::error::Result;

/// A texture plus the staging buffer its contents were copied from.
///
/// The copy is recorded into the open command list; the transition to
/// `ShaderResource` is left pending on the graphics slot and issued by the
/// next flush.
pub struct Texture<B: Backend + ?Sized> {
    texture: GpuTexture<B>,
    upload: GpuBuffer<B>,
    width: u32,
    height: u32,
}

impl<B: Backend + ?Sized> Texture<B> {
    pub fn new(
        backend: &mut B,
        frame: &mut FrameSynchronizer<B>,
        width: u32,
        height: u32,
        rgba8: &[u8],
        name: &str,
    ) -> Result<Self> {
        let expected = u64::from(width) * u64::from(height) * 4;
        if width == 0 || height == 0 || rgba8.len() as u64 != expected {
            return Err(prism_core::Error::InvalidData(format!(
                "{name}: {} bytes for a {width}x{height} RGBA8 texture",
                rgba8.len()
            ))
            .into());
        }

        // An earlier texture may still be waiting for its transition.
        frame.flush_pending(backend, QueueKind::Graphics);

        let mut texture = GpuTexture::allocate(
            backend,
            &TextureDesc {
                name,
                width,
                height,
                usage: TextureUsage::SAMPLED | TextureUsage::TRANSFER_DST,
                heap: HeapKind::Default,
                initial_state: ResourceState::CopyDest,
                clear_value: None,
                committed: false,
                shared: false,
            },
        )?;
        let mut upload = match GpuBuffer::allocate(
            backend,
            &BufferDesc::upload(&format!("{name}-upload"), expected, BufferUsage::TRANSFER_SRC),
        ) {
            Ok(upload) => upload,
            Err(e) => {
                texture.release(backend);
                return Err(e.into());
            }
        };

        if let (Some(image), Some(staging)) = (texture.get(), upload.get()) {
            if let Err(e) = backend.write_buffer(staging, 0, rgba8) {
                upload.release(backend);
                texture.release(backend);
                return Err(e.into());
            }
            backend.cmd_copy_buffer_to_texture(image, staging);
            frame.set_pending_barrier(
                QueueKind::Graphics,
                Barrier::texture(image, ResourceState::CopyDest, ResourceState::ShaderResource),
            );
        }

        Ok(Self {
            texture,
            upload,
            width,
            height,
        })
    }

    pub const fn handle(&self) -> Option<B::Texture> {
        self.texture.get()
    }

    pub const fn width(&self) -> u32 {
        self.width
    }

    pub const fn height(&self) -> u32 {
        self.height
    }

    pub fn release(&mut self, backend: &mut B) {
        self.upload.release(backend);
        self.texture.release(backend);
    }
}
