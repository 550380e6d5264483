//! Resource access for host reference programs.
//!
//! Mirrors shader-side semantics: unbound or out-of-range reads yield zero,
//! writes past the end are dropped, appends past capacity fail, and a
//! consume from an empty counter yields nothing.

use bytemuck::Pod;

use crate::program::{MAX_CONSTANT_SLOTS, MAX_READ_ONLY_SLOTS, MAX_READ_WRITE_SLOTS};
use crate::resource::ResourceId;

use super::store::SoftResource;

/// The resources visible to one dispatch or draw.
pub struct Bindings<'a> {
    resources: &'a mut [SoftResource],
    constants: &'a [Option<ResourceId>; MAX_CONSTANT_SLOTS],
    read_only: &'a [Option<ResourceId>; MAX_READ_ONLY_SLOTS],
    read_write: &'a [Option<ResourceId>; MAX_READ_WRITE_SLOTS],
}

impl<'a> Bindings<'a> {
    pub(crate) fn new(
        resources: &'a mut [SoftResource],
        constants: &'a [Option<ResourceId>; MAX_CONSTANT_SLOTS],
        read_only: &'a [Option<ResourceId>; MAX_READ_ONLY_SLOTS],
        read_write: &'a [Option<ResourceId>; MAX_READ_WRITE_SLOTS],
    ) -> Self {
        Self {
            resources,
            constants,
            read_only,
            read_write,
        }
    }

    fn lookup(&self, id: Option<&Option<ResourceId>>) -> Option<&SoftResource> {
        let id = (*id?)?;
        self.resources.get(id.index())
    }

    fn lookup_rw(&mut self, slot: u32) -> Option<&mut SoftResource> {
        let id = (*self.read_write.get(slot as usize)?)?;
        self.resources.get_mut(id.index())
    }

    /// Uniform block bound at `b{slot}`.
    #[must_use]
    pub fn constant<T: Pod>(&self, slot: u32) -> T {
        self.lookup(self.constants.get(slot as usize))
            .map_or_else(T::zeroed, |res| res.read_at(0))
    }

    /// Record `index` of the read-only buffer at `t{slot}`.
    #[must_use]
    pub fn read<T: Pod>(&self, slot: u32, index: u32) -> T {
        self.lookup(self.read_only.get(slot as usize))
            .map_or_else(T::zeroed, |res| res.record(index))
    }

    /// Extent of the texture at `t{slot}`, `[0, 0]` when none is bound.
    #[must_use]
    pub fn texture_size(&self, slot: u32) -> [u32; 2] {
        self.lookup(self.read_only.get(slot as usize))
            .and_then(SoftResource::texture_desc)
            .map_or([0, 0], |desc| [desc.width, desc.height])
    }

    /// Texel load from the texture at `t{slot}` with clamp-to-edge addressing.
    ///
    /// Single-channel textures return `[r, 0, 0, 1]`.
    #[must_use]
    pub fn texel(&self, slot: u32, x: i32, y: i32) -> [f32; 4] {
        let Some(res) = self.lookup(self.read_only.get(slot as usize)) else {
            return [0.0; 4];
        };
        let Some(desc) = res.texture_desc() else {
            return [0.0; 4];
        };
        let cx = x.clamp(0, desc.width as i32 - 1) as u32;
        let cy = y.clamp(0, desc.height as i32 - 1) as u32;
        let texel = cy * desc.width + cx;
        match desc.format.channels() {
            1 => [res.record::<f32>(texel), 0.0, 0.0, 1.0],
            _ => res.record::<[f32; 4]>(texel),
        }
    }

    /// Record `index` of the read-write buffer at `u{slot}`.
    #[must_use]
    pub fn load<T: Pod>(&self, slot: u32, index: u32) -> T {
        self.lookup(self.read_write.get(slot as usize))
            .map_or_else(T::zeroed, |res| res.record(index))
    }

    /// Writes record `index` of the read-write buffer at `u{slot}`.
    pub fn store<T: Pod>(&mut self, slot: u32, index: u32, value: T) {
        if let Some(res) = self.lookup_rw(slot) {
            res.set_record(index, &value);
        }
    }

    /// Appends to the counter buffer at `u{slot}`.
    ///
    /// Returns the record index written, or `None` when the buffer is full or
    /// has no counter.
    pub fn append<T: Pod>(&mut self, slot: u32, value: T) -> Option<u32> {
        let res = self.lookup_rw(slot)?;
        let count = res.counter?;
        if count >= res.capacity_of::<T>() {
            return None;
        }
        res.set_record(count, &value);
        res.counter = Some(count + 1);
        Some(count)
    }

    /// Consumes the most recently appended record of `u{slot}`.
    ///
    /// Returns `None` when the counter is exhausted.
    pub fn consume<T: Pod>(&mut self, slot: u32) -> Option<T> {
        let res = self.lookup_rw(slot)?;
        let count = res.counter?.checked_sub(1)?;
        res.counter = Some(count);
        Some(res.record(count))
    }

    /// Current hidden counter of `u{slot}`, 0 when absent.
    #[must_use]
    pub fn counter(&self, slot: u32) -> u32 {
        self.lookup(self.read_write.get(slot as usize))
            .and_then(|res| res.counter)
            .unwrap_or(0)
    }

    /// Overwrites the hidden counter of `u{slot}` if it has one.
    pub fn set_counter(&mut self, slot: u32, value: u32) {
        if let Some(res) = self.lookup_rw(slot) {
            if res.counter.is_some() {
                res.counter = Some(value);
            }
        }
    }
}
