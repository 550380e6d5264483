//! # Particle Renderer
//!
//! Owns every GPU resource of one particle system and records its passes:
//!
//! ```text
//! update:  [reset] -> emit -> simulate -> indirect args -> sort steps
//! render:  one DrawIndexedInstancedIndirect of camera-facing billboards
//! ```
//!
//! Emit and simulate are skipped while the emitter is paused; sorting and
//! drawing keep running on the frozen alive list.
//!
//! The host never waits on the GPU here. Counts move between passes through
//! `copy_structure_count` into constant buffers, and the only host knowledge
//! of the alive count is the non-blocking resolved counter used to size the
//! sort network.

use ember_gfx::{
    group_count, BufferDesc, CommandContext, DispatchIndirectArgs, DrawIndexedIndirectArgs,
    DrawState, GfxDevice, GpuBuffer, GpuTexture, TextureDesc, TextureFormat,
    DEFAULT_WORKGROUP_SIZE,
};
use tracing::{debug, debug_span, info, trace};

use crate::camera::SceneView;
use crate::config::ParticleRendererConfig;
use crate::emitter::Emitter;
use crate::error::ParticleResult;
use crate::gpu_types::{
    AliveEntry, CounterConstants, EmitterConstants, FrameConstants, GpuParticleA, GpuParticleB,
    RenderConstants, SimulationConstants, SortDispatchInfo, ViewSpacePositionRadius,
};
use crate::kernels::{
    BillboardProgram, BitonicInnerKernel, BitonicPresortKernel, BitonicStepKernel, EmitKernel,
    IndirectArgsKernel, InitDeadListKernel, ResetParticlesKernel, SimulateKernel, QUAD_INDICES,
    SORT_BLOCK_SIZE,
};
use crate::random::{random_texture_data, random_texture_desc};
use crate::sort::{stage_steps, SortState, SortStep};

/// Host-side bookkeeping. Never read from GPU memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParticleStats {
    /// Slots in the pool.
    pub pool_size: u32,
    /// Updates run, paused ones included.
    pub frames: u64,
    /// Spawns asked of the emit pass this frame, before the dead-list cap.
    pub requested_this_frame: u32,
    /// Spawns asked since construction.
    pub requested_total: u64,
    /// Resets applied.
    pub resets: u64,
    /// Sort network restarts.
    pub sort_restarts: u64,
    /// Sort dispatches this frame.
    pub sort_steps_this_frame: u32,
    /// Sort dispatches since construction.
    pub sort_steps_total: u64,
    /// Whether the alive list is held sorted.
    pub sorted: bool,
    /// Latest resolved alive count; may lag the GPU by a few frames.
    pub resolved_alive_count: Option<u32>,
}

/// GPU particle pool, simulation and sort for one emitter.
pub struct ParticleRenderer {
    config: ParticleRendererConfig,

    particle_a: GpuBuffer,
    particle_b: GpuBuffer,
    view_space_positions: GpuBuffer,
    dead_list: GpuBuffer,
    alive_list: GpuBuffer,

    simulation_cbuffer: GpuBuffer,
    frame_cbuffer: GpuBuffer,
    emitter_cbuffer: GpuBuffer,
    dead_list_count_cbuffer: GpuBuffer,
    alive_list_count_cbuffer: GpuBuffer,
    sort_dispatch_info_cbuffer: GpuBuffer,
    render_cbuffer: GpuBuffer,

    indirect_render_args: GpuBuffer,
    indirect_sort_args: GpuBuffer,
    index_buffer: GpuBuffer,

    random_texture: GpuTexture,
    null_depth: GpuTexture,
    white_sprite: GpuTexture,

    sort: SortState,
    stats: ParticleStats,
}

impl ParticleRenderer {
    /// Allocates every buffer at full capacity and resets the pool.
    ///
    /// # Errors
    ///
    /// Fails on an invalid configuration or when the device cannot create a
    /// resource. Either leaves the renderer unusable, so callers treat it as
    /// fatal for this instance.
    pub fn new<D: GfxDevice>(device: &mut D, config: ParticleRendererConfig) -> ParticleResult<Self> {
        config.validate()?;
        let capacity = u64::from(config.capacity);

        let random = random_texture_data(config.random_texture_size);
        let single = |format| TextureDesc {
            width: 1,
            height: 1,
            format,
        };

        let mut renderer = Self {
            particle_a: device.create_buffer(
                "particle_a",
                &BufferDesc::structured::<GpuParticleA>(capacity),
                None,
            )?,
            particle_b: device.create_buffer(
                "particle_b",
                &BufferDesc::structured::<GpuParticleB>(capacity),
                None,
            )?,
            view_space_positions: device.create_buffer(
                "view_space_positions",
                &BufferDesc::structured::<ViewSpacePositionRadius>(capacity),
                None,
            )?,
            dead_list: device.create_buffer(
                "dead_list",
                &BufferDesc::append::<u32>(capacity),
                None,
            )?,
            alive_list: device.create_buffer(
                "alive_index_list",
                &BufferDesc::append::<AliveEntry>(capacity),
                None,
            )?,

            simulation_cbuffer: device.create_buffer(
                "simulation_constants",
                &BufferDesc::constant::<SimulationConstants>(),
                None,
            )?,
            frame_cbuffer: device.create_buffer(
                "frame_constants",
                &BufferDesc::constant::<FrameConstants>(),
                None,
            )?,
            emitter_cbuffer: device.create_buffer(
                "emitter_constants",
                &BufferDesc::constant::<EmitterConstants>(),
                None,
            )?,
            dead_list_count_cbuffer: device.create_buffer(
                "dead_list_count",
                &BufferDesc::constant::<CounterConstants>(),
                None,
            )?,
            alive_list_count_cbuffer: device.create_buffer(
                "alive_list_count",
                &BufferDesc::constant::<CounterConstants>(),
                None,
            )?,
            sort_dispatch_info_cbuffer: device.create_buffer(
                "sort_dispatch_info",
                &BufferDesc::constant::<SortDispatchInfo>(),
                None,
            )?,
            render_cbuffer: device.create_buffer(
                "render_constants",
                &BufferDesc::constant::<RenderConstants>(),
                None,
            )?,

            indirect_render_args: device.create_buffer(
                "indirect_render_args",
                &BufferDesc::indirect_args(DrawIndexedIndirectArgs::SIZE),
                None,
            )?,
            indirect_sort_args: device.create_buffer(
                "indirect_sort_args",
                &BufferDesc::indirect_args(DispatchIndirectArgs::SIZE),
                None,
            )?,
            index_buffer: device.create_buffer(
                "particle_quad_indices",
                &BufferDesc::index::<u32>(QUAD_INDICES.len() as u64),
                Some(bytemuck::cast_slice(&QUAD_INDICES)),
            )?,

            random_texture: device.create_texture(
                "particle_random",
                &random_texture_desc(config.random_texture_size),
                Some(bytemuck::cast_slice(&random)),
            )?,
            null_depth: device.create_texture(
                "particle_null_depth",
                &single(TextureFormat::R32Float),
                Some(bytemuck::bytes_of(&1.0f32)),
            )?,
            white_sprite: device.create_texture(
                "particle_white_sprite",
                &single(TextureFormat::Rgba32Float),
                Some(bytemuck::cast_slice(&[1.0f32; 4])),
            )?,

            sort: SortState::new(),
            stats: ParticleStats {
                pool_size: config.capacity,
                ..ParticleStats::default()
            },
            config,
        };

        info!(
            capacity = renderer.config.capacity,
            pool_bytes = capacity
                * (std::mem::size_of::<GpuParticleA>()
                    + std::mem::size_of::<GpuParticleB>()
                    + std::mem::size_of::<ViewSpacePositionRadius>()
                    + std::mem::size_of::<u32>()
                    + std::mem::size_of::<AliveEntry>()) as u64,
            "particle renderer created"
        );

        let ctx = device.immediate_context();
        ctx.upload(&renderer.simulation_cbuffer, &renderer.simulation_constants(0.0))?;
        renderer.reset_particles(ctx)?;
        Ok(renderer)
    }

    /// Pushes every slot index onto the dead list, leaving its count at
    /// capacity.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn initialize_dead_list<C: CommandContext>(&self, ctx: &mut C) -> ParticleResult<()> {
        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.simulation_cbuffer)?;
        ctx.set_unordered_access(0, &self.dead_list, Some(0))?;
        ctx.dispatch(&InitDeadListKernel, [self.pool_groups(), 1, 1])?;
        Ok(())
    }

    /// Frees every slot: clears the pool, refills the dead list and empties
    /// the alive list. Running it twice is the same as running it once.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn reset_particles<C: CommandContext>(&mut self, ctx: &mut C) -> ParticleResult<()> {
        let _span = debug_span!("reset_particles").entered();

        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.simulation_cbuffer)?;
        ctx.set_unordered_access(0, &self.particle_a, None)?;
        ctx.set_unordered_access(1, &self.particle_b, None)?;
        ctx.dispatch(&ResetParticlesKernel, [self.pool_groups(), 1, 1])?;

        self.initialize_dead_list(ctx)?;

        ctx.clear_bindings();
        ctx.set_unordered_access(0, &self.alive_list, Some(0))?;
        self.update_indirect_args(ctx)?;

        self.sort.invalidate();
        self.stats.sorted = false;
        self.stats.resets += 1;
        debug!(capacity = self.config.capacity, "particle pool reset");
        Ok(())
    }

    /// Runs one frame of the particle system.
    ///
    /// Applies (and clears) a pending reset request, then unless paused
    /// emits, simulates over `dt` and rebuilds the indirect arguments.
    /// Sorting runs whenever the emitter asks for it, paused or not.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn update<C: CommandContext>(
        &mut self,
        ctx: &mut C,
        dt: f32,
        emitter: &mut Emitter,
        view: &SceneView<'_>,
    ) -> ParticleResult<()> {
        let _span = debug_span!("particles_update", emitter = %emitter.params.name, dt).entered();
        self.stats.frames += 1;
        self.stats.requested_this_frame = 0;
        self.stats.sort_steps_this_frame = 0;

        if emitter.take_reset_request() {
            self.reset_particles(ctx)?;
        }

        if !emitter.pause {
            ctx.upload(&self.simulation_cbuffer, &self.simulation_constants(dt))?;
            ctx.upload(&self.frame_cbuffer, &view.camera.frame_constants())?;

            let count = emitter.spawn_count(dt);
            let mut constants = emitter.next_constants(dt, count);
            if view.depth.is_none() {
                constants.collisions = 0;
            }
            ctx.upload(&self.emitter_cbuffer, &constants)?;

            self.emit(ctx, count)?;
            self.simulate(ctx, view.depth.unwrap_or(&self.null_depth))?;
            self.update_indirect_args(ctx)?;
        }

        if emitter.params.sort {
            self.advance_sort(ctx, !emitter.pause)?;
        }
        self.stats.resolved_alive_count = ctx.resolved_structure_count(&self.alive_list);
        Ok(())
    }

    /// Draws the alive list as billboards into the current render target.
    ///
    /// `sprite` defaults to a white texel. Without scene depth no soft fade
    /// is applied.
    ///
    /// # Errors
    ///
    /// Propagates binding or draw failures of the context.
    pub fn render<C: CommandContext>(
        &self,
        ctx: &mut C,
        emitter: &Emitter,
        view: &SceneView<'_>,
        sprite: Option<&GpuTexture>,
    ) -> ParticleResult<()> {
        let _span = debug_span!("particles_render", emitter = %emitter.params.name).entered();
        let blend = emitter.params.blend;

        ctx.upload(&self.frame_cbuffer, &view.camera.frame_constants())?;
        ctx.upload(
            &self.render_cbuffer,
            &RenderConstants {
                soft_fade: self.config.soft_particle_fade,
                alpha_blended: u32::from(blend.is_alpha_blended()),
                _pad: [0; 2],
            },
        )?;

        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.frame_cbuffer)?;
        ctx.set_constant_buffer(1, &self.render_cbuffer)?;
        ctx.set_shader_resource(0, self.particle_a.id())?;
        ctx.set_shader_resource(1, self.view_space_positions.id())?;
        ctx.set_shader_resource(2, self.alive_list.id())?;
        ctx.set_shader_resource(3, view.depth.unwrap_or(&self.null_depth).id())?;
        ctx.set_shader_resource(4, sprite.unwrap_or(&self.white_sprite).id())?;
        ctx.draw_indexed_instanced_indirect(
            &BillboardProgram,
            &DrawState {
                blend: blend.blend_state(),
                depth_test: false,
            },
            &self.index_buffer,
            &self.indirect_render_args,
            0,
        )?;
        Ok(())
    }

    /// Starts a fresh sort network for the latest resolved alive count and
    /// runs its presort. Returns whether the list is already fully sorted.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn sort_initial<C: CommandContext>(&mut self, ctx: &mut C) -> ParticleResult<bool> {
        let count = self.resolved_alive_count(ctx);
        self.sort.restart(count);
        self.stats.sort_restarts = self.sort.restarts();
        if let Some(step) = self.sort.next_step() {
            self.dispatch_sort_step(ctx, step)?;
        }
        Ok(self.sort.is_sorted())
    }

    /// Merges sorted runs of `presorted` entries into runs of twice that.
    /// Returns whether the list is now fully sorted.
    ///
    /// Stages run in order: `presorted` must be the power of two the
    /// previous call (or [`sort_initial`](Self::sort_initial)) left sorted.
    /// Any other width dispatches nothing.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn sort_incremental<C: CommandContext>(
        &mut self,
        ctx: &mut C,
        presorted: u32,
    ) -> ParticleResult<bool> {
        let block = presorted.saturating_mul(2);
        if !presorted.is_power_of_two()
            || presorted < SORT_BLOCK_SIZE
            || !self.sort.awaits_stage(block)
        {
            trace!(presorted, "sort stage out of order, skipped");
            return Ok(self.sort.is_sorted());
        }
        for step in stage_steps(block, self.sort.padded()) {
            self.dispatch_sort_step(ctx, step)?;
        }
        self.sort.finish_stage(block);
        Ok(self.sort.is_sorted())
    }

    /// Sorts the whole alive list within this frame.
    ///
    /// # Errors
    ///
    /// Propagates binding or dispatch failures of the context.
    pub fn sort_full<C: CommandContext>(&mut self, ctx: &mut C) -> ParticleResult<()> {
        let mut done = self.sort_initial(ctx)?;
        let mut presorted = SORT_BLOCK_SIZE;
        while !done {
            done = self.sort_incremental(ctx, presorted)?;
            presorted *= 2;
        }
        Ok(())
    }

    /// Host-side statistics.
    #[must_use]
    pub fn stats(&self) -> ParticleStats {
        self.stats
    }

    /// Configuration the renderer was built with.
    #[must_use]
    pub fn config(&self) -> &ParticleRendererConfig {
        &self.config
    }

    /// Cursor of the incremental sort.
    #[must_use]
    pub fn sort_state(&self) -> &SortState {
        &self.sort
    }

    /// Free slot list; its hidden counter is the free count.
    #[must_use]
    pub fn dead_list(&self) -> &GpuBuffer {
        &self.dead_list
    }

    /// Alive list of [`AliveEntry`]; its hidden counter is the alive count.
    #[must_use]
    pub fn alive_list(&self) -> &GpuBuffer {
        &self.alive_list
    }

    /// Render attributes per slot.
    #[must_use]
    pub fn particle_a(&self) -> &GpuBuffer {
        &self.particle_a
    }

    /// Simulation attributes per slot.
    #[must_use]
    pub fn particle_b(&self) -> &GpuBuffer {
        &self.particle_b
    }

    /// View-space position and radius per slot.
    #[must_use]
    pub fn view_space_positions(&self) -> &GpuBuffer {
        &self.view_space_positions
    }

    /// [`DrawIndexedIndirectArgs`] for the billboard draw.
    #[must_use]
    pub fn indirect_render_args(&self) -> &GpuBuffer {
        &self.indirect_render_args
    }

    /// [`DispatchIndirectArgs`] for block-local sort passes.
    #[must_use]
    pub fn indirect_sort_args(&self) -> &GpuBuffer {
        &self.indirect_sort_args
    }

    fn emit<C: CommandContext>(&mut self, ctx: &mut C, count: u32) -> ParticleResult<()> {
        self.stats.requested_this_frame = count;
        self.stats.requested_total += u64::from(count);
        if count == 0 {
            return Ok(());
        }
        if let Some(free) = ctx.resolved_structure_count(&self.dead_list) {
            if free < count {
                debug!(requested = count, free, "emission capped by the dead list");
            }
        }

        // Threads past the copied count never consume.
        ctx.copy_structure_count(&self.dead_list_count_cbuffer, 0, &self.dead_list)?;

        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.emitter_cbuffer)?;
        ctx.set_constant_buffer(1, &self.dead_list_count_cbuffer)?;
        ctx.set_shader_resource(0, self.random_texture.id())?;
        ctx.set_unordered_access(0, &self.particle_a, None)?;
        ctx.set_unordered_access(1, &self.particle_b, None)?;
        ctx.set_unordered_access(2, &self.dead_list, None)?;
        // No frame can spawn more than the pool holds, however long it was.
        let threads = count.min(self.config.capacity);
        ctx.dispatch(
            &EmitKernel,
            [group_count(threads, DEFAULT_WORKGROUP_SIZE), 1, 1],
        )?;
        Ok(())
    }

    fn simulate<C: CommandContext>(&self, ctx: &mut C, depth: &GpuTexture) -> ParticleResult<()> {
        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.simulation_cbuffer)?;
        ctx.set_constant_buffer(1, &self.frame_cbuffer)?;
        ctx.set_constant_buffer(2, &self.emitter_cbuffer)?;
        ctx.set_shader_resource(0, depth.id())?;
        ctx.set_unordered_access(0, &self.particle_a, None)?;
        ctx.set_unordered_access(1, &self.particle_b, None)?;
        ctx.set_unordered_access(2, &self.dead_list, None)?;
        // Rebuilt from scratch every pass.
        ctx.set_unordered_access(3, &self.alive_list, Some(0))?;
        ctx.set_unordered_access(4, &self.view_space_positions, None)?;
        ctx.dispatch(&SimulateKernel, [self.pool_groups(), 1, 1])?;
        Ok(())
    }

    fn update_indirect_args<C: CommandContext>(&self, ctx: &mut C) -> ParticleResult<()> {
        ctx.copy_structure_count(&self.alive_list_count_cbuffer, 0, &self.alive_list)?;

        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.alive_list_count_cbuffer)?;
        ctx.set_unordered_access(0, &self.indirect_render_args, None)?;
        ctx.set_unordered_access(1, &self.indirect_sort_args, None)?;
        ctx.dispatch(&IndirectArgsKernel, [1, 1, 1])?;
        Ok(())
    }

    /// Advances the sort network by at most the per-frame step budget.
    fn advance_sort<C: CommandContext>(&mut self, ctx: &mut C, rebuilt: bool) -> ParticleResult<()> {
        let count = self.resolved_alive_count(ctx);
        if self.sort.begin_frame(count, rebuilt) {
            debug!(count, padded = self.sort.padded(), "sort restarted");
        }

        let mut steps = 0;
        while steps < self.config.sort_steps_per_frame {
            let Some(step) = self.sort.next_step() else {
                break;
            };
            self.dispatch_sort_step(ctx, step)?;
            steps += 1;
        }

        if steps > 0 && self.sort.is_sorted() {
            trace!(count, steps, "alive list sorted");
        }
        self.stats.sort_steps_this_frame = steps;
        self.stats.sort_restarts = self.sort.restarts();
        self.stats.sorted = self.sort.is_sorted();
        Ok(())
    }

    fn dispatch_sort_step<C: CommandContext>(
        &mut self,
        ctx: &mut C,
        step: SortStep,
    ) -> ParticleResult<()> {
        let padded = self.sort.padded();
        ctx.clear_bindings();
        ctx.set_constant_buffer(0, &self.alive_list_count_cbuffer)?;
        ctx.set_unordered_access(0, &self.alive_list, None)?;

        match (step, step.dispatch_info(padded)) {
            (_, Some(info)) => {
                ctx.upload(&self.sort_dispatch_info_cbuffer, &info)?;
                ctx.set_constant_buffer(1, &self.sort_dispatch_info_cbuffer)?;
                ctx.dispatch(
                    &BitonicStepKernel,
                    [group_count(padded / 2, DEFAULT_WORKGROUP_SIZE), 1, 1],
                )?;
            }
            (SortStep::Presort, None) => {
                ctx.dispatch_indirect(&BitonicPresortKernel, &self.indirect_sort_args, 0)?;
            }
            (_, None) => {
                ctx.dispatch_indirect(&BitonicInnerKernel, &self.indirect_sort_args, 0)?;
            }
        }

        self.stats.sort_steps_total += 1;
        self.stats.sorted = self.sort.is_sorted();
        Ok(())
    }

    /// Latest resolved alive count, or capacity before one has landed.
    fn resolved_alive_count<C: CommandContext>(&self, ctx: &mut C) -> u32 {
        ctx.resolved_structure_count(&self.alive_list)
            .unwrap_or(self.config.capacity)
    }

    fn simulation_constants(&self, dt: f32) -> SimulationConstants {
        let [x, y, z] = self.config.gravity;
        SimulationConstants {
            gravity: [x, y, z, 0.0],
            frame_time: dt,
            collision_restitution: self.config.collision_restitution,
            sleep_speed: self.config.sleep_speed,
            capacity: self.config.capacity,
        }
    }

    fn pool_groups(&self) -> u32 {
        group_count(self.config.capacity, DEFAULT_WORKGROUP_SIZE)
    }
}
