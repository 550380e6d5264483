//! # Particle Pool Tests
//!
//! Full frame loop on the software device: slot conservation, emission caps,
//! lifespans, resets, pausing and depth collisions. Counts are checked with
//! blocking counter readback, which only test harnesses use.

use ember_gfx::{CommandContext, GfxDevice, SoftDevice, TextureDesc, TextureFormat};
use ember_particles::{
    Camera, Emitter, EmitterParameters, GpuParticleA, GpuParticleB, ParticleRenderer,
    ParticleRendererConfig, SceneView,
};
use glam::Vec3;

fn renderer_with(config: ParticleRendererConfig) -> (SoftDevice, ParticleRenderer) {
    let mut device = SoftDevice::new();
    let renderer = ParticleRenderer::new(&mut device, config).expect("renderer");
    (device, renderer)
}

fn setup(capacity: u32) -> (SoftDevice, ParticleRenderer) {
    renderer_with(ParticleRendererConfig {
        random_texture_size: 64,
        ..ParticleRendererConfig::with_capacity(capacity)
    })
}

fn emitter(particles_per_second: f32, lifespan: f32) -> Emitter {
    Emitter::new(EmitterParameters {
        particles_per_second,
        lifespan,
        ..EmitterParameters::default()
    })
}

/// (dead, alive) counters.
fn counts(device: &mut SoftDevice, renderer: &ParticleRenderer) -> (u32, u32) {
    (
        device.structure_count(renderer.dead_list()).unwrap(),
        device.structure_count(renderer.alive_list()).unwrap(),
    )
}

fn assert_conserved(device: &mut SoftDevice, renderer: &ParticleRenderer) {
    let (dead, alive) = counts(device, renderer);
    assert_eq!(
        dead + alive,
        renderer.config().capacity,
        "dead {dead} + alive {alive} != capacity"
    );
}

fn live_slots(device: &mut SoftDevice, renderer: &ParticleRenderer) -> Vec<(u32, GpuParticleB)> {
    let records: Vec<GpuParticleB> = device.read_records(renderer.particle_b()).unwrap();
    records
        .into_iter()
        .enumerate()
        .filter(|(_, p)| p.is_alive())
        .map(|(i, p)| (i as u32, p))
        .collect()
}

#[test]
fn test_new_renderer_has_every_slot_free() {
    let (mut device, renderer) = setup(1000);
    assert_eq!(counts(&mut device, &renderer), (1000, 0));

    let mut dead: Vec<u32> = device.read_records(renderer.dead_list()).unwrap();
    dead.sort_unstable();
    assert_eq!(dead, (0..1000).collect::<Vec<_>>());
    assert!(live_slots(&mut device, &renderer).is_empty());
}

#[test]
fn test_reset_is_idempotent() {
    let (mut device, mut renderer) = setup(512);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(1000.0, 10.0);
    for _ in 0..3 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    assert_eq!(counts(&mut device, &renderer), (212, 300));

    renderer.reset_particles(&mut device).unwrap();
    let once_counts = counts(&mut device, &renderer);
    let once_b: Vec<GpuParticleB> = device.read_records(renderer.particle_b()).unwrap();
    let once_a: Vec<GpuParticleA> = device.read_records(renderer.particle_a()).unwrap();

    renderer.reset_particles(&mut device).unwrap();
    assert_eq!(counts(&mut device, &renderer), once_counts);
    assert_eq!(once_counts, (512, 0));
    let twice_b: Vec<GpuParticleB> = device.read_records(renderer.particle_b()).unwrap();
    let twice_a: Vec<GpuParticleA> = device.read_records(renderer.particle_a()).unwrap();
    assert_eq!(once_b, twice_b);
    assert_eq!(once_a, twice_a);
    assert!(twice_b.iter().all(|p| !p.is_alive()));
}

#[test]
fn test_slots_are_conserved_every_frame() {
    let (mut device, mut renderer) = setup(300);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(450.0, 0.5);
    for _ in 0..40 {
        renderer.update(&mut device, 1.0 / 30.0, &mut emitter, &view).unwrap();
        assert_conserved(&mut device, &renderer);
    }
}

#[test]
fn test_steady_state_matches_rate_times_lifespan() {
    let (mut device, mut renderer) = setup(1024);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(100.0, 1.0);

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let (_, alive) = counts(&mut device, &renderer);
    assert!((9..=11).contains(&alive), "alive after one tick: {alive}");

    for _ in 0..20 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
        let (_, alive) = counts(&mut device, &renderer);
        assert!(alive <= 100, "alive {alive} exceeds rate x lifespan");
    }
    let (_, alive) = counts(&mut device, &renderer);
    assert!((85..=100).contains(&alive), "steady state alive: {alive}");
    assert_conserved(&mut device, &renderer);
}

#[test]
fn test_fractional_spawns_are_carried() {
    let (mut device, mut renderer) = setup(256);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(25.0, 100.0);

    let mut previous = 0;
    let mut added = Vec::new();
    for _ in 0..4 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
        let (_, alive) = counts(&mut device, &renderer);
        added.push(alive - previous);
        previous = alive;
    }
    assert_eq!(added, vec![2, 3, 2, 3]);
}

#[test]
fn test_particle_retires_on_first_frame_reaching_lifespan() {
    let (mut device, mut renderer) = setup(64);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(4.0, 1.0);

    renderer.update(&mut device, 0.25, &mut emitter, &view).unwrap();
    emitter.params.particles_per_second = 0.0;
    let live = live_slots(&mut device, &renderer);
    assert_eq!(live.len(), 1);
    let slot = live[0].0;

    for expected_age in [0.5, 0.75] {
        renderer.update(&mut device, 0.25, &mut emitter, &view).unwrap();
        let live = live_slots(&mut device, &renderer);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].0, slot);
        assert!((live[0].1.age - expected_age).abs() < 1e-6);
        assert_eq!(counts(&mut device, &renderer), (63, 1));
    }

    // Accumulated age reaches the lifespan exactly.
    renderer.update(&mut device, 0.25, &mut emitter, &view).unwrap();
    assert!(live_slots(&mut device, &renderer).is_empty());
    assert_eq!(counts(&mut device, &renderer), (64, 0));
}

#[test]
fn test_exhausted_pool_spawns_nothing() {
    let (mut device, mut renderer) = setup(256);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(10_000.0, 100.0);

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    assert_eq!(renderer.stats().requested_this_frame, 1000);
    assert_eq!(counts(&mut device, &renderer), (0, 256));

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    assert_eq!(counts(&mut device, &renderer), (0, 256));

    // Every slot is live exactly once.
    let mut slots: Vec<u32> = live_slots(&mut device, &renderer)
        .into_iter()
        .map(|(slot, _)| slot)
        .collect();
    slots.dedup();
    assert_eq!(slots.len(), 256);
}

#[test]
fn test_frame_hitch_dispatches_no_more_than_the_pool() {
    let view = SceneView::new(Camera::default());
    let frame_workgroups = |rate: f32| {
        let (mut device, mut renderer) = setup(256);
        let mut emitter = emitter(rate, 100.0);
        let before = device.stats().workgroups;
        renderer.update(&mut device, 1.0, &mut emitter, &view).unwrap();
        assert_eq!(counts(&mut device, &renderer), (0, 256));
        device.stats().workgroups - before
    };

    // A hundred million owed spawns cost the same as exactly filling the pool.
    assert_eq!(frame_workgroups(1.0e8), frame_workgroups(256.0));
}

#[test]
fn test_pause_freezes_the_pool() {
    let (mut device, mut renderer) = setup(512);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(200.0, 5.0);
    for _ in 0..3 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    let before_counts = counts(&mut device, &renderer);
    let before = live_slots(&mut device, &renderer);

    emitter.pause = true;
    for _ in 0..5 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    assert_eq!(counts(&mut device, &renderer), before_counts);
    assert_eq!(live_slots(&mut device, &renderer), before);
    assert_eq!(renderer.stats().frames, 8);
}

#[test]
fn test_reset_request_is_applied_once() {
    let (mut device, mut renderer) = setup(512);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(100.0, 10.0);
    for _ in 0..5 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    assert_eq!(counts(&mut device, &renderer).1, 50);

    emitter.request_reset();
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    assert!(!emitter.reset_requested());
    // Pool emptied, then this frame's spawns.
    assert_eq!(counts(&mut device, &renderer), (502, 10));
    assert_eq!(renderer.stats().resets, 2);

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    assert_eq!(counts(&mut device, &renderer).1, 20);
    assert_eq!(renderer.stats().resets, 2);
}

#[test]
fn test_indirect_args_follow_alive_count() {
    use ember_gfx::{DispatchIndirectArgs, DrawIndexedIndirectArgs};

    let (mut device, mut renderer) = setup(2048);
    let view = SceneView::new(Camera::default());
    let mut emitter = emitter(6000.0, 10.0);
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();

    let draw: Vec<DrawIndexedIndirectArgs> =
        device.read_records(renderer.indirect_render_args()).unwrap();
    let sort: Vec<DispatchIndirectArgs> =
        device.read_records(renderer.indirect_sort_args()).unwrap();
    assert_eq!(
        draw[0],
        DrawIndexedIndirectArgs {
            index_count_per_instance: 6,
            instance_count: 600,
            start_index: 0,
            base_vertex: 0,
            start_instance: 0,
        }
    );
    assert_eq!(sort[0], DispatchIndirectArgs { x: 2, y: 1, z: 1 });
}

/// Camera at the origin looking down -z at a wall of scene depth at z = -10.
fn wall_scene(device: &mut SoftDevice) -> (Camera, ember_gfx::GpuTexture) {
    let camera = Camera {
        eye: Vec3::ZERO,
        target: Vec3::NEG_Z,
        near: 0.1,
        far: 100.0,
        width: 64,
        height: 64,
        ..Camera::default()
    };
    let depth = camera.ndc_depth(Vec3::new(0.0, 0.0, -10.0));
    let texels = vec![depth; 64 * 64];
    let texture = device
        .create_texture(
            "scene_depth",
            &TextureDesc {
                width: 64,
                height: 64,
                format: TextureFormat::R32Float,
            },
            Some(bytemuck::cast_slice(&texels)),
        )
        .unwrap();
    (camera, texture)
}

fn projectile() -> Emitter {
    Emitter::new(EmitterParameters {
        position: [0.0, 0.0, -5.0],
        velocity: [0.0, 0.0, -20.0],
        position_variance: [0.0; 3],
        velocity_variance: 0.0,
        mass: 0.0,
        lifespan: 10.0,
        particles_per_second: 10.0,
        collisions: true,
        collision_thickness: 2.0,
        ..EmitterParameters::default()
    })
}

#[test]
fn test_particle_bounces_off_scene_depth() {
    let (mut device, mut renderer) = renderer_with(ParticleRendererConfig {
        capacity: 16,
        random_texture_size: 8,
        collision_restitution: 0.5,
        ..ParticleRendererConfig::default()
    });
    let (camera, depth) = wall_scene(&mut device);
    let view = SceneView::new(camera).with_depth(&depth);
    let mut emitter = projectile();

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    emitter.params.particles_per_second = 0.0;
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let (_, before) = live_slots(&mut device, &renderer)[0];
    assert!((before.position[2] + 9.0).abs() < 1e-4);
    assert!(before.velocity[2] < 0.0);

    // Next step would land 1 unit behind the wall.
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let (slot, after) = live_slots(&mut device, &renderer)[0];
    assert!((after.velocity[2] - 10.0).abs() < 1e-2, "velocity {:?}", after.velocity);
    assert!(after.position[2] > -10.0);

    let a: Vec<GpuParticleA> = device.read_records(renderer.particle_a()).unwrap();
    assert_eq!(a[slot as usize].is_sleeping, 0);
}

#[test]
fn test_slow_bounce_puts_particle_to_sleep() {
    let (mut device, mut renderer) = renderer_with(ParticleRendererConfig {
        capacity: 16,
        random_texture_size: 8,
        collision_restitution: 0.5,
        sleep_speed: 50.0,
        ..ParticleRendererConfig::default()
    });
    let (camera, depth) = wall_scene(&mut device);
    let view = SceneView::new(camera).with_depth(&depth);
    let mut emitter = projectile();

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    emitter.params.particles_per_second = 0.0;
    for _ in 0..2 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    let (slot, rested) = live_slots(&mut device, &renderer)[0];
    assert_eq!(rested.velocity, [0.0; 3]);
    let a: Vec<GpuParticleA> = device.read_records(renderer.particle_a()).unwrap();
    assert_eq!(a[slot as usize].is_sleeping, 1);

    // Asleep particles keep aging but stay put.
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let (_, later) = live_slots(&mut device, &renderer)[0];
    assert_eq!(later.position, rested.position);
    assert!(later.age > rested.age);
}

#[test]
fn test_collisions_need_scene_depth() {
    let (mut device, mut renderer) = setup(16);
    let (camera, _) = wall_scene(&mut device);
    let view = SceneView::new(camera);
    let mut emitter = projectile();

    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    emitter.params.particles_per_second = 0.0;
    for _ in 0..3 {
        renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    }
    let (_, p) = live_slots(&mut device, &renderer)[0];
    assert!(p.position[2] < -10.0);
}

/// (min, max) of each axis of `values`.
fn axis_ranges(values: &[[f32; 3]]) -> [(f32, f32); 3] {
    [0, 1, 2].map(|axis| {
        values.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
            (lo.min(v[axis]), hi.max(v[axis]))
        })
    })
}

#[test]
fn test_spawn_variance_covers_both_signs_per_axis() {
    let (mut device, mut renderer) = setup(512);
    let view = SceneView::new(Camera::default());
    let mut emitter = Emitter::new(EmitterParameters {
        particles_per_second: 3000.0,
        lifespan: 10.0,
        position: [0.0; 3],
        velocity: [0.0; 3],
        position_variance: [1.0; 3],
        velocity_variance: 1.0,
        mass: 0.0,
        collisions: false,
        ..EmitterParameters::default()
    });

    // Zero velocity keeps every particle at its spawn point.
    emitter.params.velocity_variance = 0.0;
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let spawned = live_slots(&mut device, &renderer);
    assert!(spawned.len() >= 299, "spawned {}", spawned.len());
    let positions: Vec<[f32; 3]> = spawned.iter().map(|(_, p)| p.position).collect();
    for (axis, (lo, hi)) in axis_ranges(&positions).into_iter().enumerate() {
        assert!(lo < -0.5 && hi > 0.5, "position axis {axis} in [{lo}, {hi}]");
    }

    renderer.reset_particles(&mut device).unwrap();
    emitter.params.position_variance = [0.0; 3];
    emitter.params.velocity_variance = 1.0;
    renderer.update(&mut device, 0.1, &mut emitter, &view).unwrap();
    let velocities: Vec<[f32; 3]> = live_slots(&mut device, &renderer)
        .iter()
        .map(|(_, p)| p.velocity)
        .collect();
    assert!(velocities.len() >= 299);
    for (axis, (lo, hi)) in axis_ranges(&velocities).into_iter().enumerate() {
        assert!(lo < -0.5 && hi > 0.5, "velocity axis {axis} in [{lo}, {hi}]");
    }
}
