//! # Camera & Scene View
//!
//! Plain per-frame inputs: a right-handed perspective camera with `[0, 1]`
//! depth, and the optional scene depth copy passes sample.

use ember_gfx::GpuTexture;
use glam::{Mat4, Vec3};

use crate::gpu_types::FrameConstants;

/// Perspective camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Eye position.
    pub eye: Vec3,
    /// Point looked at.
    pub target: Vec3,
    /// Up direction.
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov_y: f32,
    /// Near plane distance.
    pub near: f32,
    /// Far plane distance.
    pub far: f32,
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            eye: Vec3::new(0.0, 2.0, 10.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov_y: std::f32::consts::FRAC_PI_3,
            near: 0.1,
            far: 1000.0,
            width: 1280,
            height: 720,
        }
    }
}

impl Camera {
    /// World to view.
    #[must_use]
    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, self.up)
    }

    /// View to clip.
    #[must_use]
    pub fn projection(&self) -> Mat4 {
        let aspect = self.width.max(1) as f32 / self.height.max(1) as f32;
        Mat4::perspective_rh(self.fov_y, aspect, self.near, self.far)
    }

    /// Depth-buffer value of a view-space point.
    #[must_use]
    pub fn ndc_depth(&self, view_position: Vec3) -> f32 {
        let clip = self.projection() * view_position.extend(1.0);
        clip.z / clip.w
    }

    /// Matrices and viewport as consumed by the programs.
    #[must_use]
    pub fn frame_constants(&self) -> FrameConstants {
        let view = self.view();
        let projection = self.projection();
        FrameConstants {
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            inverse_projection: projection.inverse().to_cols_array_2d(),
            inverse_view: view.inverse().to_cols_array_2d(),
            view_projection: (projection * view).to_cols_array_2d(),
            eye_position: self.eye.extend(1.0).to_array(),
            screen_size: [self.width as f32, self.height as f32, 0.0, 0.0],
        }
    }
}

/// What the renderer sees of the scene this frame.
#[derive(Debug, Clone, Copy)]
pub struct SceneView<'a> {
    /// Viewing camera.
    pub camera: Camera,
    /// Opaque scene depth (`R32Float`, `[0, 1]`), sampled for collisions and
    /// soft fade. `None` disables both.
    pub depth: Option<&'a GpuTexture>,
}

impl<'a> SceneView<'a> {
    /// A view without scene depth.
    #[must_use]
    pub fn new(camera: Camera) -> Self {
        Self {
            camera,
            depth: None,
        }
    }

    /// Adds scene depth.
    #[must_use]
    pub fn with_depth(mut self, depth: &'a GpuTexture) -> Self {
        self.depth = Some(depth);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_is_zero_to_one() {
        let camera = Camera::default();
        let near = camera.ndc_depth(Vec3::new(0.0, 0.0, -camera.near));
        let far = camera.ndc_depth(Vec3::new(0.0, 0.0, -camera.far));
        assert!(near.abs() < 1e-4);
        assert!((far - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_inverse_projection_roundtrip() {
        let camera = Camera::default();
        let frame = camera.frame_constants();
        let inverse = Mat4::from_cols_array_2d(&frame.inverse_projection);
        let point = Vec3::new(1.0, -0.5, -10.0);
        let clip = camera.projection() * point.extend(1.0);
        let back = inverse * (clip / clip.w);
        let back = back.truncate() / back.w;
        assert!((back - point).length() < 1e-3);
    }
}
