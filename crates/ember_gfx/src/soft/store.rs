//! Host storage for software resources.
//!
//! Storage is kept as 32-bit words so every 4-byte aligned Pod record can be
//! viewed in place. Out-of-range reads return zeroed records and out-of-range
//! writes are dropped, matching robust buffer access on the GPU.

use bytemuck::Pod;

use crate::desc::{BufferDesc, TextureDesc};
use crate::error::{GfxError, GfxResult};

/// What a software resource was created as.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ResourceKind {
    Buffer(BufferDesc),
    Texture(TextureDesc),
}

/// One buffer or texture living in host memory.
#[derive(Debug)]
pub(crate) struct SoftResource {
    pub(crate) label: &'static str,
    pub(crate) kind: ResourceKind,
    words: Vec<u32>,
    /// Hidden append/consume counter, present only on counter buffers.
    pub(crate) counter: Option<u32>,
}

impl SoftResource {
    pub(crate) fn new(
        label: &'static str,
        kind: ResourceKind,
        byte_size: u64,
        initial: Option<&[u8]>,
    ) -> GfxResult<Self> {
        let counter = match kind {
            ResourceKind::Buffer(desc) if desc.has_counter() => Some(0),
            _ => None,
        };
        let mut resource = Self {
            label,
            kind,
            words: vec![0; (byte_size / 4) as usize],
            counter,
        };
        if let Some(data) = initial {
            resource.write_bytes(0, data)?;
        }
        Ok(resource)
    }

    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    #[inline]
    pub(crate) fn byte_len(&self) -> u64 {
        self.words.len() as u64 * 4
    }

    pub(crate) fn buffer_desc(&self) -> Option<&BufferDesc> {
        match &self.kind {
            ResourceKind::Buffer(desc) => Some(desc),
            ResourceKind::Texture(_) => None,
        }
    }

    pub(crate) fn texture_desc(&self) -> Option<&TextureDesc> {
        match &self.kind {
            ResourceKind::Texture(desc) => Some(desc),
            ResourceKind::Buffer(_) => None,
        }
    }

    pub(crate) fn write_bytes(&mut self, offset: u64, data: &[u8]) -> GfxResult<()> {
        let end = offset + data.len() as u64;
        if end > self.byte_len() {
            return Err(GfxError::OutOfRange {
                label: self.label,
                offset,
                len: data.len() as u64,
                size: self.byte_len(),
            });
        }
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        bytes[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    /// Reads the record at byte `offset`, zeroed when out of range.
    pub(crate) fn read_at<T: Pod>(&self, offset: usize) -> T {
        let size = std::mem::size_of::<T>();
        self.bytes()
            .get(offset..offset + size)
            .map_or_else(T::zeroed, bytemuck::pod_read_unaligned)
    }

    /// Reads record `index` of type `T`.
    #[inline]
    pub(crate) fn record<T: Pod>(&self, index: u32) -> T {
        self.read_at(index as usize * std::mem::size_of::<T>())
    }

    /// Writes record `index`; returns false when it does not fit.
    pub(crate) fn set_record<T: Pod>(&mut self, index: u32, value: &T) -> bool {
        let size = std::mem::size_of::<T>();
        let offset = index as usize * size;
        let bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut self.words);
        match bytes.get_mut(offset..offset + size) {
            Some(target) => {
                target.copy_from_slice(bytemuck::bytes_of(value));
                true
            }
            None => false,
        }
    }

    /// Record capacity for records of type `T`.
    #[inline]
    pub(crate) fn capacity_of<T: Pod>(&self) -> u32 {
        (self.byte_len() / std::mem::size_of::<T>() as u64) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_records_round_through_words() {
        let desc = BufferDesc::structured::<[f32; 3]>(4);
        let mut res = SoftResource::new("vec3", ResourceKind::Buffer(desc), desc.size, None).unwrap();

        assert!(res.set_record(2, &[1.0f32, 2.0, 3.0]));
        assert_eq!(res.record::<[f32; 3]>(2), [1.0, 2.0, 3.0]);
        assert_eq!(res.record::<[f32; 3]>(1), [0.0; 3]);
        assert_eq!(res.capacity_of::<[f32; 3]>(), 4);
    }

    #[test]
    fn test_out_of_range_is_robust() {
        let desc = BufferDesc::structured::<u32>(2);
        let mut res = SoftResource::new("pair", ResourceKind::Buffer(desc), desc.size, None).unwrap();

        assert!(!res.set_record(2, &7u32));
        assert_eq!(res.record::<u32>(5), 0);
        assert!(res.write_bytes(4, &[0; 8]).is_err());
    }

    #[test]
    fn test_counter_only_on_append_buffers() {
        let append = BufferDesc::append::<u32>(2);
        let res = SoftResource::new("dead", ResourceKind::Buffer(append), append.size, None).unwrap();
        assert_eq!(res.counter, Some(0));

        let plain = BufferDesc::structured::<u32>(2);
        let res = SoftResource::new("plain", ResourceKind::Buffer(plain), plain.size, None).unwrap();
        assert_eq!(res.counter, None);
    }
}
