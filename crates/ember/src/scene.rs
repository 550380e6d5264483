//! # Particle Scenes
//!
//! A scene file is a `[renderer]` table shared by every emitter, a
//! `[camera]`, an optional ground plane and any number of `[[emitter]]`
//! entries:
//!
//! ```toml
//! frames = 120
//! dt = 0.016
//! ground_height = 0.0
//!
//! [renderer]
//! capacity = 65536
//!
//! [[emitter]]
//! name = "sparks"
//! particles_per_second = 2000.0
//! collisions = true
//! ```

use std::path::Path;

use ember_gfx::{GfxDevice, GpuTexture, SoftDevice, TextureDesc, TextureFormat};
use ember_particles::{
    Camera, Emitter, EmitterParameters, ParticleError, ParticleRenderer, ParticleRendererConfig,
    SceneView,
};
use glam::{Vec3, Vec4, Vec4Swizzles};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Errors raised while loading or running a scene.
#[derive(Error, Debug)]
pub enum SceneError {
    /// The scene file could not be read.
    #[error("failed to read scene: {0}")]
    Io(#[from] std::io::Error),

    /// The scene file is not valid TOML for a scene.
    #[error("failed to parse scene: {0}")]
    Parse(#[from] toml::de::Error),

    /// A scene value is unusable.
    #[error("invalid scene: {0}")]
    Invalid(String),

    /// A renderer could not be built or driven.
    #[error(transparent)]
    Particles(#[from] ParticleError),

    /// The device rejected the scene depth texture.
    #[error(transparent)]
    Gfx(#[from] ember_gfx::GfxError),
}

/// Result type for scene operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Camera block of a scene file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Eye position.
    pub eye: [f32; 3],
    /// Point looked at.
    pub target: [f32; 3],
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f32,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
    /// Viewport width (also the depth texture width).
    pub width: u32,
    /// Viewport height.
    pub height: u32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            eye: [0.0, 4.0, 16.0],
            target: [0.0, 2.0, 0.0],
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 500.0,
            width: 320,
            height: 180,
        }
    }
}

impl CameraConfig {
    /// Builds the camera.
    #[must_use]
    pub fn camera(&self) -> Camera {
        Camera {
            eye: Vec3::from(self.eye),
            target: Vec3::from(self.target),
            up: Vec3::Y,
            fov_y: self.fov_y_degrees.to_radians(),
            near: self.near,
            far: self.far,
            width: self.width,
            height: self.height,
        }
    }
}

/// A particle scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Frames to run.
    pub frames: u32,
    /// Fixed time step in seconds.
    pub dt: f32,
    /// Height of an infinite ground plane rendered into scene depth. Without
    /// one, no depth is bound and collisions are off.
    pub ground_height: Option<f32>,
    /// Settings shared by every emitter's renderer.
    pub renderer: ParticleRendererConfig,
    /// Viewing camera.
    pub camera: CameraConfig,
    /// Emitters, one renderer each.
    pub emitter: Vec<EmitterParameters>,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            frames: 120,
            dt: 1.0 / 60.0,
            ground_height: None,
            renderer: ParticleRendererConfig::default(),
            camera: CameraConfig::default(),
            emitter: Vec::new(),
        }
    }
}

impl SceneConfig {
    /// Parses and validates a scene document.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Parse`] for malformed TOML and
    /// [`SceneError::Invalid`] or [`SceneError::Particles`] for unusable
    /// values.
    pub fn from_toml_str(source: &str) -> SceneResult<Self> {
        let scene: Self = toml::from_str(source)?;
        scene.validate()?;
        Ok(scene)
    }

    /// Reads and parses a scene file.
    ///
    /// # Errors
    ///
    /// Returns [`SceneError::Io`] if the file cannot be read, otherwise as
    /// [`from_toml_str`](Self::from_toml_str).
    pub fn load(path: impl AsRef<Path>) -> SceneResult<Self> {
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Checks every value can drive a simulation.
    ///
    /// # Errors
    ///
    /// Returns the first unusable value found.
    pub fn validate(&self) -> SceneResult<()> {
        if self.emitter.is_empty() {
            return Err(SceneError::Invalid("scene has no emitters".to_owned()));
        }
        if !self.dt.is_finite() || self.dt <= 0.0 {
            return Err(SceneError::Invalid(format!("dt {} must be positive", self.dt)));
        }
        let camera = &self.camera;
        if camera.width == 0 || camera.height == 0 {
            return Err(SceneError::Invalid("camera viewport is empty".to_owned()));
        }
        if !(camera.near > 0.0 && camera.far > camera.near) {
            return Err(SceneError::Invalid(format!(
                "camera planes near {} far {} are not ordered",
                camera.near, camera.far
            )));
        }
        self.renderer.validate()?;
        for params in &self.emitter {
            params.validate()?;
        }
        Ok(())
    }
}

/// One emitter's bookkeeping after a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct EmitterReport {
    /// Emitter name.
    pub name: String,
    /// Latest resolved alive count, if one has landed.
    pub alive: Option<u32>,
    /// Spawns requested this frame.
    pub requested: u32,
    /// Sort dispatches issued this frame.
    pub sort_steps: u32,
    /// Whether the alive list is fully ordered.
    pub sorted: bool,
    /// Billboards drawn this frame.
    pub drawn: u32,
}

/// Every emitter's bookkeeping after a frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameReport {
    /// 1-based frame number.
    pub frame: u64,
    /// Per-emitter reports, in scene order.
    pub emitters: Vec<EmitterReport>,
}

impl FrameReport {
    /// Alive particles across all emitters.
    #[must_use]
    pub fn total_alive(&self) -> u32 {
        self.emitters.iter().filter_map(|e| e.alive).sum()
    }
}

/// A scene running on the software device.
pub struct Simulation {
    device: SoftDevice,
    camera: Camera,
    depth: Option<GpuTexture>,
    dt: f32,
    frame: u64,
    systems: Vec<(Emitter, ParticleRenderer)>,
}

impl Simulation {
    /// Builds one renderer per emitter and the optional ground depth.
    ///
    /// # Errors
    ///
    /// Fails if the scene is invalid or a renderer cannot be created.
    pub fn new(scene: &SceneConfig) -> SceneResult<Self> {
        scene.validate()?;
        let mut device = SoftDevice::new();
        let camera = scene.camera.camera();

        let depth = match scene.ground_height {
            Some(height) => {
                let texels = ground_depth(&camera, height);
                Some(device.create_texture(
                    "scene_depth",
                    &TextureDesc {
                        width: camera.width,
                        height: camera.height,
                        format: TextureFormat::R32Float,
                    },
                    Some(bytemuck::cast_slice(&texels)),
                )?)
            }
            None => None,
        };

        let mut systems = Vec::with_capacity(scene.emitter.len());
        for params in &scene.emitter {
            let renderer = ParticleRenderer::new(&mut device, scene.renderer.clone())?;
            systems.push((Emitter::new(params.clone()), renderer));
        }
        info!(
            emitters = systems.len(),
            capacity = scene.renderer.capacity,
            ground = scene.ground_height.is_some(),
            "scene loaded"
        );

        Ok(Self {
            device,
            camera,
            depth,
            dt: scene.dt,
            frame: 0,
            systems,
        })
    }

    /// Updates and draws every emitter once.
    ///
    /// # Errors
    ///
    /// Propagates renderer failures.
    pub fn step(&mut self) -> SceneResult<FrameReport> {
        self.frame += 1;
        let mut view = SceneView::new(self.camera);
        if let Some(depth) = &self.depth {
            view = view.with_depth(depth);
        }

        let mut emitters = Vec::with_capacity(self.systems.len());
        for (emitter, renderer) in &mut self.systems {
            renderer.update(&mut self.device, self.dt, emitter, &view)?;
            renderer.render(&mut self.device, emitter, &view, None)?;
            let drawn = self
                .device
                .take_captures()
                .iter()
                .map(|draw| draw.instance_count)
                .sum();

            let stats = renderer.stats();
            emitters.push(EmitterReport {
                name: emitter.params.name.clone(),
                alive: stats.resolved_alive_count,
                requested: stats.requested_this_frame,
                sort_steps: stats.sort_steps_this_frame,
                sorted: stats.sorted,
                drawn,
            });
        }
        debug!(frame = self.frame, "scene frame");
        Ok(FrameReport {
            frame: self.frame,
            emitters,
        })
    }

    /// Frames stepped so far.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }
}

/// `[0, 1]` depth of a ground plane at `height` as seen by `camera`, one
/// texel per pixel, with 1.0 where the plane is not visible.
#[must_use]
pub fn ground_depth(camera: &Camera, height: f32) -> Vec<f32> {
    let inverse_projection = camera.projection().inverse();
    let inverse_view = camera.view().inverse();
    let (width, rows) = (camera.width, camera.height);

    let mut texels = Vec::with_capacity((width * rows) as usize);
    for y in 0..rows {
        for x in 0..width {
            let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
            let ndc_y = 1.0 - (y as f32 + 0.5) / rows as f32 * 2.0;
            let far = inverse_projection * Vec4::new(ndc_x, ndc_y, 1.0, 1.0);
            let direction = inverse_view.transform_vector3(far.xyz() / far.w).normalize();

            let depth = if direction.y.abs() < f32::EPSILON {
                1.0
            } else {
                let t = (height - camera.eye.y) / direction.y;
                if t > 0.0 {
                    let hit = camera.eye + direction * t;
                    let view_position = camera.view().transform_point3(hit);
                    camera.ndc_depth(view_position).min(1.0)
                } else {
                    1.0
                }
            };
            texels.push(depth);
        }
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"
        frames = 30
        dt = 0.05
        ground_height = 0.0

        [renderer]
        capacity = 2048
        random_texture_size = 32

        [camera]
        width = 64
        height = 36

        [[emitter]]
        name = "fountain"
        particles_per_second = 400.0
        lifespan = 2.0
        collisions = true
        sort = true
        blend = "alpha_blend"

        [[emitter]]
        name = "embers"
        position = [3.0, 1.0, 0.0]
        particles_per_second = 100.0
    "#;

    #[test]
    fn test_parse_scene() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        assert_eq!(scene.frames, 30);
        assert_eq!(scene.renderer.capacity, 2048);
        assert_eq!(scene.renderer.sort_steps_per_frame, 64);
        assert_eq!(scene.emitter.len(), 2);
        assert!(scene.emitter[0].sort);
        assert_eq!(scene.emitter[1].position, [3.0, 1.0, 0.0]);
    }

    #[test]
    fn test_bundled_scenes_parse() {
        for source in [
            include_str!("../scenes/fountain.toml"),
            include_str!("../scenes/sparks.toml"),
        ] {
            let scene = SceneConfig::from_toml_str(source).unwrap();
            assert!(!scene.emitter.is_empty());
        }
    }

    #[test]
    fn test_rejects_empty_scene() {
        assert!(matches!(
            SceneConfig::from_toml_str("frames = 10"),
            Err(SceneError::Invalid(_))
        ));
        let bad_capacity = "[renderer]\ncapacity = 0\n[[emitter]]\nname = \"a\"";
        assert!(matches!(
            SceneConfig::from_toml_str(bad_capacity),
            Err(SceneError::Particles(_))
        ));
    }

    #[test]
    fn test_simulation_reports_each_emitter() {
        let scene = SceneConfig::from_toml_str(SCENE).unwrap();
        let mut simulation = Simulation::new(&scene).unwrap();

        let mut last = None;
        for _ in 0..scene.frames {
            last = Some(simulation.step().unwrap());
        }
        let report = last.unwrap();
        assert_eq!(report.frame, 30);
        assert_eq!(report.emitters[0].name, "fountain");
        assert!(report.emitters[0].sorted);
        for emitter in &report.emitters {
            assert_eq!(emitter.alive, Some(emitter.drawn));
        }
        // fountain: 20 per frame for 1.5 s of a 2 s lifespan.
        assert_eq!(report.emitters[0].alive, Some(600));
        assert_eq!(report.total_alive(), 600 + 150);
    }

    #[test]
    fn test_ground_depth_covers_lower_half() {
        let camera = CameraConfig {
            eye: [0.0, 2.0, 0.0],
            target: [0.0, 2.0, -1.0],
            width: 16,
            height: 16,
            ..CameraConfig::default()
        }
        .camera();
        let depth = ground_depth(&camera, 0.0);
        // Looking level: the top rows see sky, the bottom rows see ground.
        assert!(depth[..16 * 8].iter().all(|&d| d == 1.0));
        assert!(depth[16 * 8..].iter().all(|&d| d > 0.0 && d < 1.0));
    }
}
