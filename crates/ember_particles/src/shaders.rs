//! # Particle Shaders
//!
//! WGSL source for every particle program. Binding numbers follow the slot
//! scheme of [`ember_gfx::program`]: constants at `n`, read-only at `8 + n`,
//! read-write at `16 + n`, hidden counters at `24 + n`.
//!
//! Record declarations are shared through [`particle_records!`] so every
//! program agrees with [`gpu_types`](crate::gpu_types).

/// Shared record declarations.
macro_rules! particle_records {
    () => {
        r#"
const PI: f32 = 3.14159265358979;
const DEAD_AGE: f32 = -1.0;
const SORT_BLOCK: u32 = 512u;

struct ParticleA {
    tint_and_alpha: vec4<f32>,
    rotation: f32,
    is_sleeping: u32,
    _pad0: u32,
    _pad1: u32,
}

struct ParticleB {
    position: vec3<f32>,
    mass: f32,
    velocity: vec3<f32>,
    lifespan: f32,
    distance_to_eye: f32,
    age: f32,
    start_size: f32,
    end_size: f32,
}

struct AliveEntry {
    distance: f32,
    index: u32,
}

struct ViewSpacePositionRadius {
    position: vec3<f32>,
    radius: f32,
}

struct Counter {
    count: u32,
    _pad0: u32,
    _pad1: u32,
    _pad2: u32,
}

struct SortDispatchInfo {
    x: i32,
    y: i32,
    z: i32,
    w: i32,
}

struct SimulationConstants {
    gravity: vec4<f32>,
    frame_time: f32,
    collision_restitution: f32,
    sleep_speed: f32,
    capacity: u32,
}

struct EmitterConstants {
    emitter_position: vec4<f32>,
    emitter_velocity: vec4<f32>,
    position_variance: vec4<f32>,
    max_particles_this_frame: i32,
    particle_lifespan: f32,
    start_size: f32,
    end_size: f32,
    velocity_variance: f32,
    mass: f32,
    elapsed_time: f32,
    collisions: i32,
    collision_thickness: f32,
    random_offset: u32,
    _pad0: u32,
    _pad1: u32,
}

struct FrameConstants {
    view: mat4x4<f32>,
    projection: mat4x4<f32>,
    inverse_projection: mat4x4<f32>,
    inverse_view: mat4x4<f32>,
    view_projection: mat4x4<f32>,
    eye_position: vec4<f32>,
    screen_size: vec4<f32>,
}

struct RenderConstants {
    soft_fade: f32,
    alpha_blended: u32,
    _pad0: u32,
    _pad1: u32,
}

fn dead_particle() -> ParticleB {
    return ParticleB(vec3<f32>(0.0), 0.0, vec3<f32>(0.0), 0.0, 0.0, DEAD_AGE, 0.0, 0.0);
}

// Back-to-front: farther first, ties by slot.
fn should_swap(a: AliveEntry, b: AliveEntry) -> bool {
    return a.distance < b.distance || (a.distance == b.distance && a.index > b.index);
}
"#
    };
}

/// Shared-memory block compare for the presort and inner sort programs.
macro_rules! sort_block {
    () => {
        r#"
@group(0) @binding(0) var<uniform> alive: Counter;
@group(0) @binding(16) var<storage, read_write> alive_list: array<AliveEntry>;

var<workgroup> block: array<AliveEntry, 512>;

fn compare(t: u32, x: u32, y: i32, z: i32, len: u32) {
    let low = t & (x - 1u);
    let high = 2u * (t - low);
    let index = high + low;
    let swap = u32(i32(high) + y + z * i32(low));
    if (swap < len) {
        let a = block[index];
        let b = block[swap];
        if (should_swap(a, b)) {
            block[index] = b;
            block[swap] = a;
        }
    }
}

fn block_len(group: u32) -> u32 {
    let base = group * SORT_BLOCK;
    if (base >= alive.count) {
        return 0u;
    }
    return min(alive.count - base, SORT_BLOCK);
}

fn load_block(base: u32, t: u32, len: u32) {
    if (t < len) {
        block[t] = alive_list[base + t];
    }
    if (t + 256u < len) {
        block[t + 256u] = alive_list[base + t + 256u];
    }
    workgroupBarrier();
}

fn store_block(base: u32, t: u32, len: u32) {
    if (t < len) {
        alive_list[base + t] = block[t];
    }
    if (t + 256u < len) {
        alive_list[base + t + 256u] = block[t + 256u];
    }
}
"#
    };
}

/// Pushes every slot index onto the dead list.
pub const INIT_DEAD_LIST: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> sim: SimulationConstants;
@group(0) @binding(16) var<storage, read_write> dead_list: array<u32>;
@group(0) @binding(24) var<storage, read_write> dead_count: atomic<u32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= sim.capacity) {
        return;
    }
    dead_list[atomicAdd(&dead_count, 1u)] = id.x;
}
"#
);

/// Marks every slot free.
pub const RESET_PARTICLES: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> sim: SimulationConstants;
@group(0) @binding(16) var<storage, read_write> particles_a: array<ParticleA>;
@group(0) @binding(17) var<storage, read_write> particles_b: array<ParticleB>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (id.x >= sim.capacity) {
        return;
    }
    particles_a[id.x] = ParticleA(vec4<f32>(0.0), 0.0, 0u, 0u, 0u);
    particles_b[id.x] = dead_particle();
}
"#
);

/// Spawns particles into slots taken from the dead list.
pub const EMIT: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> emitter: EmitterConstants;
@group(0) @binding(1) var<uniform> dead: Counter;
@group(0) @binding(8) var random_texture: texture_2d<f32>;
@group(0) @binding(16) var<storage, read_write> particles_a: array<ParticleA>;
@group(0) @binding(17) var<storage, read_write> particles_b: array<ParticleB>;
@group(0) @binding(18) var<storage, read_write> dead_list: array<u32>;
@group(0) @binding(26) var<storage, read_write> dead_count: atomic<u32>;

fn scramble_index(index: u32) -> u32 {
    let state = index * 747796405u + 2891336453u;
    let word = ((state >> ((state >> 28u) + 4u)) ^ state) * 277803737u;
    return (word >> 22u) ^ word;
}

fn random_texel(sequence: u32, size: u32) -> vec4<f32> {
    let wrapped = sequence % (size * size);
    return textureLoad(random_texture, vec2<i32>(i32(wrapped % size), i32(wrapped / size)), 0);
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let limit = min(u32(max(emitter.max_particles_this_frame, 0)), dead.count);
    if (id.x >= limit) {
        return;
    }
    let slot = dead_list[atomicSub(&dead_count, 1u) - 1u];

    let size = max(textureDimensions(random_texture).x, 1u);
    let sequence = emitter.random_offset + id.x;
    let r0 = random_texel(sequence, size);
    let r1 = random_texel(scramble_index(sequence), size);

    let position = emitter.emitter_position.xyz + r0.xyz * emitter.position_variance.xyz;
    let velocity = emitter.emitter_velocity.xyz + r1.xyz * emitter.velocity_variance;

    particles_a[slot] = ParticleA(vec4<f32>(1.0), r0.w * PI, 0u, 0u, 0u);
    particles_b[slot] = ParticleB(
        position,
        emitter.mass,
        velocity,
        emitter.particle_lifespan,
        0.0,
        0.0,
        emitter.start_size,
        emitter.end_size,
    );
}
"#
);

/// Integrates, ages, collides and rebuilds the alive list.
pub const SIMULATE: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> sim: SimulationConstants;
@group(0) @binding(1) var<uniform> frame: FrameConstants;
@group(0) @binding(2) var<uniform> emitter: EmitterConstants;
@group(0) @binding(8) var depth_texture: texture_2d<f32>;
@group(0) @binding(16) var<storage, read_write> particles_a: array<ParticleA>;
@group(0) @binding(17) var<storage, read_write> particles_b: array<ParticleB>;
@group(0) @binding(18) var<storage, read_write> dead_list: array<u32>;
@group(0) @binding(26) var<storage, read_write> dead_count: atomic<u32>;
@group(0) @binding(19) var<storage, read_write> alive_list: array<AliveEntry>;
@group(0) @binding(27) var<storage, read_write> alive_count: atomic<u32>;
@group(0) @binding(20) var<storage, read_write> view_space: array<ViewSpacePositionRadius>;

fn safe_normalize(v: vec3<f32>) -> vec3<f32> {
    let len = length(v);
    if (len > 0.0) {
        return v / len;
    }
    return vec3<f32>(0.0);
}

fn depth_view_position(pixel: vec2<i32>, size: vec2<i32>) -> vec3<f32> {
    let clamped = clamp(pixel, vec2<i32>(0), size - vec2<i32>(1));
    let depth = textureLoad(depth_texture, clamped, 0).x;
    let ndc = vec2<f32>(
        (f32(pixel.x) + 0.5) / f32(size.x) * 2.0 - 1.0,
        1.0 - (f32(pixel.y) + 0.5) / f32(size.y) * 2.0,
    );
    let view = frame.inverse_projection * vec4<f32>(ndc, depth, 1.0);
    return view.xyz / view.w;
}

// World-space normal in xyz and 1 in w on a hit, zero otherwise.
fn depth_hit(world: vec3<f32>, thickness: f32) -> vec4<f32> {
    let size = vec2<i32>(textureDimensions(depth_texture));
    let clip = frame.view_projection * vec4<f32>(world, 1.0);
    if (clip.w <= 0.0) {
        return vec4<f32>(0.0);
    }
    let ndc = clip.xyz / clip.w;
    if (abs(ndc.x) > 1.0 || abs(ndc.y) > 1.0) {
        return vec4<f32>(0.0);
    }
    let pixel = vec2<i32>(
        i32((ndc.x * 0.5 + 0.5) * f32(size.x)),
        i32((0.5 - ndc.y * 0.5) * f32(size.y)),
    );
    let surface = depth_view_position(pixel, size);
    let particle = (frame.view * vec4<f32>(world, 1.0)).xyz;
    let penetration = surface.z - particle.z;
    if (!(penetration > 0.0 && penetration < thickness)) {
        return vec4<f32>(0.0);
    }

    let tangent_x = depth_view_position(pixel + vec2<i32>(1, 0), size)
        - depth_view_position(pixel - vec2<i32>(1, 0), size);
    let tangent_y = depth_view_position(pixel + vec2<i32>(0, 1), size)
        - depth_view_position(pixel - vec2<i32>(0, 1), size);
    let to_eye = safe_normalize(-surface);
    var normal = safe_normalize(cross(tangent_x, tangent_y));
    if (all(normal == vec3<f32>(0.0))) {
        normal = to_eye;
    }
    if (dot(normal, to_eye) < 0.0) {
        normal = -normal;
    }
    let world_normal = safe_normalize((frame.inverse_view * vec4<f32>(normal, 0.0)).xyz);
    return vec4<f32>(world_normal, 1.0);
}

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    if (i >= sim.capacity) {
        return;
    }
    var b = particles_b[i];
    if (b.age < 0.0) {
        return;
    }
    var a = particles_a[i];
    let dt = sim.frame_time;
    var position = b.position;
    var velocity = b.velocity;

    if (a.is_sleeping == 0u) {
        velocity += sim.gravity.xyz * b.mass * dt;
        if (emitter.collisions != 0) {
            let hit = depth_hit(position + velocity * dt, emitter.collision_thickness);
            if (hit.w > 0.0) {
                velocity = reflect(velocity, hit.xyz) * sim.collision_restitution;
                if (length(velocity) < sim.sleep_speed) {
                    velocity = vec3<f32>(0.0);
                    a.is_sleeping = 1u;
                }
            }
        }
        position += velocity * dt;
    }

    b.age += dt;
    if (b.age >= b.lifespan) {
        particles_b[i] = dead_particle();
        dead_list[atomicAdd(&dead_count, 1u)] = i;
        return;
    }

    let view_position = (frame.view * vec4<f32>(position, 1.0)).xyz;
    let distance = length(view_position);
    let t = clamp(b.age / b.lifespan, 0.0, 1.0);
    b.position = position;
    b.velocity = velocity;
    b.distance_to_eye = distance;
    a.tint_and_alpha.w = 1.0 - b.age / b.lifespan;

    view_space[i] = ViewSpacePositionRadius(view_position, mix(b.start_size, b.end_size, t));
    particles_a[i] = a;
    particles_b[i] = b;
    alive_list[atomicAdd(&alive_count, 1u)] = AliveEntry(distance, i);
}
"#
);

/// Derives draw and sort dispatch arguments from the alive count.
pub const INDIRECT_ARGS: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> alive: Counter;
@group(0) @binding(16) var<storage, read_write> draw_args: array<u32>;
@group(0) @binding(17) var<storage, read_write> sort_args: array<u32>;

fn next_power_of_two(v: u32) -> u32 {
    if (v <= 1u) {
        return 1u;
    }
    return 1u << (32u - countLeadingZeros(v - 1u));
}

@compute @workgroup_size(1)
fn main() {
    draw_args[0] = 6u;
    draw_args[1] = alive.count;
    draw_args[2] = 0u;
    draw_args[3] = 0u;
    draw_args[4] = 0u;

    var groups = 0u;
    if (alive.count > 0u) {
        groups = (next_power_of_two(alive.count) + SORT_BLOCK - 1u) / SORT_BLOCK;
    }
    sort_args[0] = groups;
    sort_args[1] = 1u;
    sort_args[2] = 1u;
}
"#
);

/// Sorts each 512-entry block in shared memory.
pub const SORT_PRESORT: &str = concat!(
    particle_records!(),
    sort_block!(),
    r#"
@compute @workgroup_size(256)
fn main(
    @builtin(workgroup_id) group: vec3<u32>,
    @builtin(local_invocation_index) t: u32,
) {
    let base = group.x * SORT_BLOCK;
    let len = block_len(group.x);
    load_block(base, t, len);

    for (var size = 2u; size <= SORT_BLOCK; size = size * 2u) {
        let half = size / 2u;
        compare(t, half, i32(2u * half - 1u), -1, len);
        workgroupBarrier();
        for (var stride = size / 4u; stride > 0u; stride = stride / 2u) {
            compare(t, stride, i32(stride), 1, len);
            workgroupBarrier();
        }
    }
    store_block(base, t, len);
}
"#
);

/// One global flip or disperse step.
pub const SORT_STEP: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> alive: Counter;
@group(0) @binding(1) var<uniform> info: SortDispatchInfo;
@group(0) @binding(16) var<storage, read_write> alive_list: array<AliveEntry>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    if (info.x <= 0) {
        return;
    }
    let t = id.x;
    let low = t & (u32(info.x) - 1u);
    let high = 2u * (t - low);
    let index = high + low;
    let swap = u32(i32(high) + info.y + info.z * i32(low));
    if (swap >= alive.count) {
        return;
    }
    let a = alive_list[index];
    let b = alive_list[swap];
    if (should_swap(a, b)) {
        alive_list[index] = b;
        alive_list[swap] = a;
    }
}
"#
);

/// Every disperse stride below the block size for one merge stage.
pub const SORT_INNER: &str = concat!(
    particle_records!(),
    sort_block!(),
    r#"
@compute @workgroup_size(256)
fn main(
    @builtin(workgroup_id) group: vec3<u32>,
    @builtin(local_invocation_index) t: u32,
) {
    let base = group.x * SORT_BLOCK;
    let len = block_len(group.x);
    load_block(base, t, len);

    for (var stride = SORT_BLOCK / 2u; stride > 0u; stride = stride / 2u) {
        compare(t, stride, i32(stride), 1, len);
        workgroupBarrier();
    }
    store_block(base, t, len);
}
"#
);

/// Camera-facing billboards with soft depth fade.
pub const BILLBOARD: &str = concat!(
    particle_records!(),
    r#"
@group(0) @binding(0) var<uniform> frame: FrameConstants;
@group(0) @binding(1) var<uniform> render: RenderConstants;
@group(0) @binding(8) var<storage, read> particles_a: array<ParticleA>;
@group(0) @binding(9) var<storage, read> view_space: array<ViewSpacePositionRadius>;
@group(0) @binding(10) var<storage, read> alive_list: array<AliveEntry>;
@group(0) @binding(11) var depth_texture: texture_2d<f32>;
@group(0) @binding(12) var sprite_texture: texture_2d<f32>;

struct VertexOutput {
    @builtin(position) clip: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv: vec2<f32>,
    @location(2) view_depth: f32,
}

@vertex
fn vs_main(
    @builtin(vertex_index) vertex_index: u32,
    @builtin(instance_index) instance_index: u32,
) -> VertexOutput {
    let entry = alive_list[instance_index];
    let particle = particles_a[entry.index];
    let center = view_space[entry.index];

    var corners = array<vec2<f32>, 4>(
        vec2<f32>(-1.0, 1.0),
        vec2<f32>(1.0, 1.0),
        vec2<f32>(-1.0, -1.0),
        vec2<f32>(1.0, -1.0),
    );
    let offset = corners[vertex_index & 3u];
    let s = sin(particle.rotation);
    let c = cos(particle.rotation);
    let rotated = vec2<f32>(offset.x * c - offset.y * s, offset.x * s + offset.y * c) * center.radius;
    let view_position = center.position + vec3<f32>(rotated, 0.0);

    var out: VertexOutput;
    out.clip = frame.projection * vec4<f32>(view_position, 1.0);
    out.color = particle.tint_and_alpha;
    out.uv = offset * vec2<f32>(0.5, -0.5) + vec2<f32>(0.5);
    out.view_depth = view_position.z;
    return out;
}

@fragment
fn fs_main(input: VertexOutput) -> @location(0) vec4<f32> {
    let screen = frame.screen_size.xy;
    let depth_size = vec2<i32>(textureDimensions(depth_texture));
    let depth_pixel = clamp(
        vec2<i32>(input.clip.xy / screen * vec2<f32>(depth_size)),
        vec2<i32>(0),
        depth_size - vec2<i32>(1),
    );
    let scene_depth = textureLoad(depth_texture, depth_pixel, 0).x;
    let ndc = input.clip.xy / screen * vec2<f32>(2.0, -2.0) + vec2<f32>(-1.0, 1.0);
    let scene_view = frame.inverse_projection * vec4<f32>(ndc, scene_depth, 1.0);
    let fade = saturate((input.view_depth - scene_view.z / scene_view.w) / render.soft_fade);

    let sprite_size = vec2<i32>(textureDimensions(sprite_texture));
    let texel = clamp(
        vec2<i32>(input.uv * vec2<f32>(sprite_size)),
        vec2<i32>(0),
        sprite_size - vec2<i32>(1),
    );
    var color = input.color * textureLoad(sprite_texture, texel, 0);
    color.a *= fade;
    if (color.a <= 0.0) {
        discard;
    }
    if (render.alpha_blended == 0u) {
        return vec4<f32>(color.rgb * color.a, color.a);
    }
    return color;
}
"#
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sources_declare_entry_points() {
        for source in [
            INIT_DEAD_LIST,
            RESET_PARTICLES,
            EMIT,
            SIMULATE,
            INDIRECT_ARGS,
            SORT_PRESORT,
            SORT_STEP,
            SORT_INNER,
        ] {
            assert!(source.contains("@compute"));
            assert!(source.contains("fn main("));
        }
        assert!(BILLBOARD.contains("fn vs_main("));
        assert!(BILLBOARD.contains("fn fs_main("));
    }

    #[test]
    fn test_every_program_validates() {
        let programs = [
            ("init_dead_list", INIT_DEAD_LIST),
            ("reset_particles", RESET_PARTICLES),
            ("emit", EMIT),
            ("simulate", SIMULATE),
            ("indirect_args", INDIRECT_ARGS),
            ("sort_presort", SORT_PRESORT),
            ("sort_step", SORT_STEP),
            ("sort_inner", SORT_INNER),
            ("billboard", BILLBOARD),
        ];
        for (label, source) in programs {
            let module = naga::front::wgsl::parse_str(source)
                .unwrap_or_else(|err| panic!("{label}: {}", err.emit_to_string(source)));
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::default(),
            )
            .validate(&module)
            .unwrap_or_else(|err| panic!("{label}: {err:?}"));
        }
    }

    #[test]
    fn test_counter_bindings_follow_slot_scheme() {
        // Counter(n) lives at 24 + n next to ReadWrite(n) at 16 + n.
        assert!(INIT_DEAD_LIST.contains("@binding(16) var<storage, read_write> dead_list"));
        assert!(INIT_DEAD_LIST.contains("@binding(24) var<storage, read_write> dead_count"));
        assert!(SIMULATE.contains("@binding(19) var<storage, read_write> alive_list"));
        assert!(SIMULATE.contains("@binding(27) var<storage, read_write> alive_count"));
    }
}
