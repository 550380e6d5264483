//! Device and command context traits.
//!
//! The context follows the immediate-context model: resources are bound to
//! numbered slots, then dispatches and draws consume whatever is bound.
//! Everything recorded on one context executes in submission order, which is
//! the only ordering guarantee the particle passes rely on.

use bytemuck::{Pod, Zeroable};

use crate::desc::{BufferDesc, TextureDesc};
use crate::error::GfxResult;
use crate::program::{ComputeKernel, DrawProgram};
use crate::resource::{GpuBuffer, GpuTexture, ResourceId};

/// DrawIndexedInstancedIndirect arguments, filled by a compute pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawIndexedIndirectArgs {
    /// Indices per instance (6 for a quad).
    pub index_count_per_instance: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// First index.
    pub start_index: u32,
    /// Added to every index.
    pub base_vertex: i32,
    /// First instance.
    pub start_instance: u32,
}

impl DrawIndexedIndirectArgs {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// DispatchIndirect arguments, filled by a compute pass.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DispatchIndirectArgs {
    /// Workgroups in x.
    pub x: u32,
    /// Workgroups in y.
    pub y: u32,
    /// Workgroups in z.
    pub z: u32,
}

impl DispatchIndirectArgs {
    /// Size in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

/// Fixed-function state for a draw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawState {
    /// Color blend for the single render target.
    pub blend: wgpu::BlendState,
    /// Test (never write) against the scene depth buffer.
    pub depth_test: bool,
}

/// Creates resources.
pub trait GfxDevice {
    /// Context commands are recorded on.
    type Context: CommandContext;

    /// Creates a buffer, optionally initialized with `initial` bytes.
    ///
    /// # Errors
    ///
    /// Fails on invalid descriptors or when the backend cannot allocate.
    fn create_buffer(
        &mut self,
        label: &'static str,
        desc: &BufferDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuBuffer>;

    /// Creates a read-only texture, optionally initialized.
    ///
    /// # Errors
    ///
    /// Fails on invalid descriptors or when the backend cannot allocate.
    fn create_texture(
        &mut self,
        label: &'static str,
        desc: &TextureDesc,
        initial: Option<&[u8]>,
    ) -> GfxResult<GpuTexture>;

    /// The single context all work for this device is recorded on.
    fn immediate_context(&mut self) -> &mut Self::Context;
}

/// Records and executes GPU commands.
pub trait CommandContext {
    /// Binds a uniform block to `b{slot}`.
    ///
    /// # Errors
    ///
    /// Fails when the buffer is not a constant buffer or the slot is out of range.
    fn set_constant_buffer(&mut self, slot: u32, buffer: &GpuBuffer) -> GfxResult<()>;

    /// Binds a buffer or texture to `t{slot}`.
    ///
    /// # Errors
    ///
    /// Fails for unknown resources or out-of-range slots.
    fn set_shader_resource(&mut self, slot: u32, resource: ResourceId) -> GfxResult<()>;

    /// Binds a buffer to `u{slot}`, optionally resetting its hidden counter.
    ///
    /// # Errors
    ///
    /// Fails when the buffer lacks unordered access, or when `initial_count`
    /// is given for a buffer without a counter.
    fn set_unordered_access(
        &mut self,
        slot: u32,
        buffer: &GpuBuffer,
        initial_count: Option<u32>,
    ) -> GfxResult<()>;

    /// Unbinds every slot.
    fn clear_bindings(&mut self);

    /// Overwrites the start of `buffer` with `data`.
    ///
    /// # Errors
    ///
    /// Fails when `data` does not fit.
    fn update_buffer(&mut self, buffer: &GpuBuffer, data: &[u8]) -> GfxResult<()>;

    /// Copies the hidden counter of `src` into `dst` at `dst_offset` bytes.
    ///
    /// # Errors
    ///
    /// Fails when `src` has no counter or the write is out of range.
    fn copy_structure_count(&mut self, dst: &GpuBuffer, dst_offset: u64, src: &GpuBuffer)
        -> GfxResult<()>;

    /// Runs `kernel` over `groups` workgroups.
    ///
    /// # Errors
    ///
    /// Fails when a slot the kernel needs is unbound.
    fn dispatch(&mut self, kernel: &dyn ComputeKernel, groups: [u32; 3]) -> GfxResult<()>;

    /// Runs `kernel` with workgroup counts read from `args` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when a slot is unbound or `args` is not an indirect-args buffer.
    fn dispatch_indirect(
        &mut self,
        kernel: &dyn ComputeKernel,
        args: &GpuBuffer,
        offset: u64,
    ) -> GfxResult<()>;

    /// Draws indexed instances with counts read from `args` at `offset`.
    ///
    /// # Errors
    ///
    /// Fails when a slot is unbound or a buffer has the wrong role.
    fn draw_indexed_instanced_indirect(
        &mut self,
        program: &dyn DrawProgram,
        state: &DrawState,
        index_buffer: &GpuBuffer,
        args: &GpuBuffer,
        offset: u64,
    ) -> GfxResult<()>;

    /// Latest resolved counter value of `buffer`, without waiting on the GPU.
    ///
    /// May lag the GPU by a few frames. `None` until a value has landed.
    fn resolved_structure_count(&mut self, buffer: &GpuBuffer) -> Option<u32>;

    /// Blocking readback of the full buffer contents.
    ///
    /// Only for explicit synchronization points and test harnesses.
    ///
    /// # Errors
    ///
    /// Fails for unknown buffers or backend readback failures.
    fn read_buffer(&mut self, buffer: &GpuBuffer) -> GfxResult<Vec<u8>>;

    /// Blocking readback of the hidden counter of `buffer`.
    ///
    /// # Errors
    ///
    /// Fails when the buffer has no counter.
    fn structure_count(&mut self, buffer: &GpuBuffer) -> GfxResult<u32>;

    /// Uploads a single Pod value to the start of `buffer`.
    ///
    /// # Errors
    ///
    /// Same as [`CommandContext::update_buffer`].
    fn upload<T: Pod>(&mut self, buffer: &GpuBuffer, value: &T) -> GfxResult<()>
    where
        Self: Sized,
    {
        self.update_buffer(buffer, bytemuck::bytes_of(value))
    }

    /// Blocking readback decoded as records of `T`.
    ///
    /// # Errors
    ///
    /// Same as [`CommandContext::read_buffer`].
    fn read_records<T: Pod>(&mut self, buffer: &GpuBuffer) -> GfxResult<Vec<T>>
    where
        Self: Sized,
    {
        let bytes = self.read_buffer(buffer)?;
        Ok(bytes
            .chunks_exact(std::mem::size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indirect_args_layout() {
        // Matches the native argument layouts consumed by the GPU.
        assert_eq!(DrawIndexedIndirectArgs::SIZE, 20);
        assert_eq!(DispatchIndirectArgs::SIZE, 12);
    }
}
