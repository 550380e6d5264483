//! Resource descriptors.
//!
//! Buffers are described the way the renderer thinks about them (structured,
//! append, constant, indirect-args, index) and validated once at creation.

use bitflags::bitflags;

use crate::error::{GfxError, GfxResult};

bitflags! {
    /// How a buffer may be bound to the pipeline.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        /// Vertex input.
        const VERTEX_BUFFER = 1 << 0;
        /// Index input.
        const INDEX_BUFFER = 1 << 1;
        /// Uniform block.
        const CONSTANT_BUFFER = 1 << 2;
        /// Read-only shader resource.
        const SHADER_RESOURCE = 1 << 3;
        /// Read-write (unordered access) shader resource.
        const UNORDERED_ACCESS = 1 << 4;
    }
}

bitflags! {
    /// Extra buffer capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MiscFlags: u32 {
        /// Array of fixed-stride records.
        const STRUCTURED = 1 << 0;
        /// Holds indirect draw/dispatch arguments.
        const INDIRECT_ARGS = 1 << 1;
        /// Carries a hidden append/consume counter.
        const APPEND_COUNTER = 1 << 2;
    }
}

/// Description of a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    /// Size in bytes.
    pub size: u64,
    /// Record stride in bytes (0 for raw buffers).
    pub stride: u32,
    /// Bind capabilities.
    pub bind_flags: BindFlags,
    /// Extra capabilities.
    pub misc_flags: MiscFlags,
}

impl BufferDesc {
    /// Read-write structured buffer of `count` records.
    #[must_use]
    pub fn structured<T: bytemuck::Pod>(count: u64) -> Self {
        let stride = std::mem::size_of::<T>() as u32;
        Self {
            size: u64::from(stride) * count,
            stride,
            bind_flags: BindFlags::SHADER_RESOURCE | BindFlags::UNORDERED_ACCESS,
            misc_flags: MiscFlags::STRUCTURED,
        }
    }

    /// Structured buffer with a hidden append/consume counter.
    #[must_use]
    pub fn append<T: bytemuck::Pod>(count: u64) -> Self {
        let mut desc = Self::structured::<T>(count);
        desc.misc_flags |= MiscFlags::APPEND_COUNTER;
        desc
    }

    /// Uniform block holding one `T`.
    #[must_use]
    pub fn constant<T: bytemuck::Pod>() -> Self {
        let stride = std::mem::size_of::<T>() as u32;
        Self {
            size: u64::from(stride),
            stride,
            bind_flags: BindFlags::CONSTANT_BUFFER,
            misc_flags: MiscFlags::empty(),
        }
    }

    /// Indirect-argument buffer written by compute passes.
    #[must_use]
    pub fn indirect_args(size: u64) -> Self {
        Self {
            size,
            stride: 0,
            bind_flags: BindFlags::UNORDERED_ACCESS,
            misc_flags: MiscFlags::INDIRECT_ARGS,
        }
    }

    /// Immutable index buffer of `count` indices.
    #[must_use]
    pub fn index<T: bytemuck::Pod>(count: u64) -> Self {
        let stride = std::mem::size_of::<T>() as u32;
        Self {
            size: u64::from(stride) * count,
            stride,
            bind_flags: BindFlags::INDEX_BUFFER,
            misc_flags: MiscFlags::empty(),
        }
    }

    /// Number of records, or 0 for raw buffers.
    #[must_use]
    pub fn element_count(&self) -> u64 {
        if self.stride == 0 {
            0
        } else {
            self.size / u64::from(self.stride)
        }
    }

    /// Whether the buffer carries a hidden counter.
    #[must_use]
    pub fn has_counter(&self) -> bool {
        self.misc_flags.contains(MiscFlags::APPEND_COUNTER)
    }

    /// Checks the descriptor can be realized by every backend.
    ///
    /// # Errors
    ///
    /// Returns [`GfxError::InvalidDescriptor`] for empty buffers, sizes or
    /// strides that are not multiples of 4, strides that do not divide the
    /// size, and counters on non-structured buffers.
    pub fn validate(&self, label: &'static str) -> GfxResult<()> {
        let fail = |reason: &str| {
            Err(GfxError::InvalidDescriptor {
                label,
                reason: reason.to_owned(),
            })
        };

        if self.size == 0 {
            return fail("size is zero");
        }
        if self.size % 4 != 0 {
            return fail("size is not a multiple of 4 bytes");
        }
        if self.stride % 4 != 0 {
            return fail("stride is not a multiple of 4 bytes");
        }
        if self.stride != 0 && self.size % u64::from(self.stride) != 0 {
            return fail("stride does not divide size");
        }
        if self.has_counter() && !self.misc_flags.contains(MiscFlags::STRUCTURED) {
            return fail("append counter requires a structured buffer");
        }
        if self.bind_flags.is_empty() {
            return fail("no bind flags");
        }
        Ok(())
    }
}

/// Texel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Single 32-bit float channel (scene depth copies).
    R32Float,
    /// Four 32-bit float channels (lookup tables, sprites).
    Rgba32Float,
}

impl TextureFormat {
    /// Bytes per texel.
    #[must_use]
    pub const fn texel_size(self) -> u32 {
        match self {
            Self::R32Float => 4,
            Self::Rgba32Float => 16,
        }
    }

    /// 32-bit words per texel.
    #[must_use]
    pub const fn channels(self) -> u32 {
        self.texel_size() / 4
    }
}

/// Description of a read-only 2D texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Texel format.
    pub format: TextureFormat,
}

impl TextureDesc {
    /// Size of the full mip 0 image in bytes.
    #[must_use]
    pub fn byte_size(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height) * u64::from(self.format.texel_size())
    }

    /// Checks the descriptor is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`GfxError::InvalidDescriptor`] for zero extents.
    pub fn validate(&self, label: &'static str) -> GfxResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(GfxError::InvalidDescriptor {
                label,
                reason: format!("extent {}x{} is empty", self.width, self.height),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structured_desc() {
        let desc = BufferDesc::structured::<[f32; 4]>(100);
        assert_eq!(desc.size, 1600);
        assert_eq!(desc.stride, 16);
        assert_eq!(desc.element_count(), 100);
        assert!(!desc.has_counter());
        assert!(desc.validate("test").is_ok());
    }

    #[test]
    fn test_append_desc_has_counter() {
        let desc = BufferDesc::append::<u32>(8);
        assert!(desc.has_counter());
        assert!(desc.bind_flags.contains(BindFlags::UNORDERED_ACCESS));
        assert!(desc.validate("dead list").is_ok());
    }

    #[test]
    fn test_rejects_bad_descriptors() {
        let empty = BufferDesc::structured::<u32>(0);
        assert!(matches!(
            empty.validate("empty"),
            Err(GfxError::InvalidDescriptor { .. })
        ));

        let mut raw_counter = BufferDesc::indirect_args(20);
        raw_counter.misc_flags |= MiscFlags::APPEND_COUNTER;
        assert!(raw_counter.validate("raw").is_err());

        let mut uneven = BufferDesc::structured::<[u32; 2]>(3);
        uneven.size += 4;
        assert!(uneven.validate("uneven").is_err());
    }

    #[test]
    fn test_texture_desc() {
        let desc = TextureDesc {
            width: 4,
            height: 2,
            format: TextureFormat::Rgba32Float,
        };
        assert_eq!(desc.byte_size(), 128);
        assert!(desc.validate("lut").is_ok());

        let empty = TextureDesc { width: 0, ..desc };
        assert!(empty.validate("lut").is_err());
    }
}
