//! Resource handles.
//!
//! Handles are plain ids plus the creation descriptor. They are not `Clone`:
//! every buffer has exactly one owner.

use crate::desc::{BufferDesc, TextureDesc};

/// Opaque id of a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub(crate) u32);

impl ResourceId {
    /// Raw index inside the owning device.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// A GPU buffer owned by exactly one renderer.
#[derive(Debug)]
pub struct GpuBuffer {
    id: ResourceId,
    label: &'static str,
    desc: BufferDesc,
}

impl GpuBuffer {
    pub(crate) const fn new(id: ResourceId, label: &'static str, desc: BufferDesc) -> Self {
        Self { id, label, desc }
    }

    /// Device id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Debug label.
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Creation descriptor.
    #[inline]
    #[must_use]
    pub const fn desc(&self) -> &BufferDesc {
        &self.desc
    }
}

/// A read-only 2D texture.
#[derive(Debug)]
pub struct GpuTexture {
    id: ResourceId,
    label: &'static str,
    desc: TextureDesc,
}

impl GpuTexture {
    pub(crate) const fn new(id: ResourceId, label: &'static str, desc: TextureDesc) -> Self {
        Self { id, label, desc }
    }

    /// Device id.
    #[inline]
    #[must_use]
    pub const fn id(&self) -> ResourceId {
        self.id
    }

    /// Debug label.
    #[inline]
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Creation descriptor.
    #[inline]
    #[must_use]
    pub const fn desc(&self) -> &TextureDesc {
        &self.desc
    }
}
