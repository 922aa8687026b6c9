//! Single-owner GPU resource handles.
//!
//! A [`GpuResource`] owns exactly one backend object. It is released
//! explicitly through [`GpuResource::release`], which is idempotent; moving
//! the handle out with [`GpuResource::take`] leaves a null handle behind.
//! Dropping a live handle does not free anything because the backend is not
//! reachable from `Drop`, so it is reported as a leak instead.

use std::fmt;
use std::marker::PhantomData;

use crate::backend::{AccelerationStructureLevel, Backend, BufferDesc, TextureDesc};
use crate::error::Result;

/// A kind of backend object a [`GpuResource`] can own.
pub trait ResourceKind<B: Backend + ?Sized> {
    type Handle: Copy + fmt::Debug;

    /// Name used in leak reports.
    const LABEL: &'static str;

    fn destroy(backend: &mut B, handle: Self::Handle);
}

/// Buffer resources.
pub struct BufferKind;
/// Texture resources.
pub struct TextureKind;
/// Acceleration-structure objects.
pub struct AccelerationStructureKind;

impl<B: Backend + ?Sized> ResourceKind<B> for BufferKind {
    type Handle = B::Buffer;
    const LABEL: &'static str = "buffer";

    fn destroy(backend: &mut B, handle: Self::Handle) {
        backend.destroy_buffer(handle);
    }
}

impl<B: Backend + ?Sized> ResourceKind<B> for TextureKind {
    type Handle = B::Texture;
    const LABEL: &'static str = "texture";

    fn destroy(backend: &mut B, handle: Self::Handle) {
        backend.destroy_texture(handle);
    }
}

impl<B: Backend + ?Sized> ResourceKind<B> for AccelerationStructureKind {
    type Handle = B::AccelerationStructure;
    const LABEL: &'static str = "acceleration structure";

    fn destroy(backend: &mut B, handle: Self::Handle) {
        backend.destroy_acceleration_structure(handle);
    }
}

/// Owning handle to a backend object.
pub struct GpuResource<B: Backend + ?Sized, K: ResourceKind<B>> {
    handle: Option<K::Handle>,
    size: u64,
    _marker: PhantomData<fn() -> (Box<B>, K)>,
}

pub type GpuBuffer<B> = GpuResource<B, BufferKind>;
pub type GpuTexture<B> = GpuResource<B, TextureKind>;
pub type GpuAccelerationStructure<B> = GpuResource<B, AccelerationStructureKind>;

impl<B: Backend + ?Sized, K: ResourceKind<B>> GpuResource<B, K> {
    /// A handle that owns nothing.
    pub const fn null() -> Self {
        Self {
            handle: None,
            size: 0,
            _marker: PhantomData,
        }
    }

    /// Take ownership of an object the backend just created.
    pub const fn from_raw(handle: K::Handle, size: u64) -> Self {
        Self {
            handle: Some(handle),
            size,
            _marker: PhantomData,
        }
    }

    pub const fn is_null(&self) -> bool {
        self.handle.is_none()
    }

    /// The backend handle, or `None` when null.
    pub const fn get(&self) -> Option<K::Handle> {
        self.handle
    }

    /// Size in bytes requested at allocation, zero when null.
    pub const fn size(&self) -> u64 {
        self.size
    }

    /// Destroy the owned object. Calling this on a null handle does nothing.
    pub fn release(&mut self, backend: &mut B) {
        if let Some(handle) = self.handle.take() {
            K::destroy(backend, handle);
        }
        self.size = 0;
    }

    /// Move ownership out, leaving this handle null.
    #[must_use]
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}

impl<B: Backend + ?Sized> GpuBuffer<B> {
    pub fn allocate(backend: &mut B, desc: &BufferDesc<'_>) -> Result<Self> {
        let buffer = backend.create_buffer(desc)?;
        Ok(Self::from_raw(buffer, desc.size))
    }
}

impl<B: Backend + ?Sized> GpuTexture<B> {
    pub fn allocate(backend: &mut B, desc: &TextureDesc<'_>) -> Result<Self> {
        let texture = backend.create_texture(desc)?;
        Ok(Self::from_raw(
            texture,
            u64::from(desc.width) * u64::from(desc.height) * 4,
        ))
    }
}

impl<B: Backend + ?Sized> GpuAccelerationStructure<B> {
    /// Create an acceleration structure over the start of `storage`.
    pub fn allocate(
        backend: &mut B,
        level: AccelerationStructureLevel,
        storage: &GpuBuffer<B>,
        name: &str,
    ) -> Result<Self> {
        let buffer = storage.get().ok_or_else(|| {
            crate::GpuError::InvalidState(format!("{name}: storage buffer is null"))
        })?;
        let structure =
            backend.create_acceleration_structure(level, buffer, storage.size(), name)?;
        Ok(Self::from_raw(structure, storage.size()))
    }
}

impl<B: Backend + ?Sized, K: ResourceKind<B>> Default for GpuResource<B, K> {
    fn default() -> Self {
        Self::null()
    }
}

impl<B: Backend + ?Sized, K: ResourceKind<B>> fmt::Debug for GpuResource<B, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuResource")
            .field("kind", &K::LABEL)
            .field("handle", &self.handle)
            .field("size", &self.size)
            .finish()
    }
}

impl<B: Backend + ?Sized, K: ResourceKind<B>> Drop for GpuResource<B, K> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle {
            tracing::warn!("{} {:?} dropped without release", K::LABEL, handle);
        }
    }
}
