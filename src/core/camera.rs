//! Viewer camera in double-precision world space

use crate::core::types::{DVec3, Quat, Vec3};
use crate::render::{ViewpointPose, ViewpointSource};

/// Camera with a world position and orientation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    /// World position
    pub position: DVec3,
    /// Rotation as quaternion
    pub rotation: Quat,
}

impl Camera {
    /// Camera at `position` looking down -Z
    pub fn new(position: DVec3) -> Self {
        Self { position, rotation: Quat::IDENTITY }
    }

    /// Create camera looking at a target
    pub fn look_at(position: DVec3, target: DVec3) -> Self {
        let dir = (target - position).as_vec3();
        let forward = if dir.length_squared() > 0.0 { dir.normalize() } else { -Vec3::Z };
        let up = if forward.y.abs() > 0.999 { Vec3::Z } else { Vec3::Y };
        let right = forward.cross(up).normalize();
        let up = right.cross(forward);
        let rotation = Quat::from_mat3(&glam::Mat3::from_cols(right, up, -forward));
        Self { position, rotation }
    }

    /// Get forward direction (negative Z in camera space)
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Get right direction (positive X in camera space)
    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Set rotation from yaw and pitch in radians
    pub fn set_rotation_euler(&mut self, yaw: f32, pitch: f32) {
        self.rotation = Quat::from_euler(glam::EulerRot::YXZ, yaw, pitch, 0.0);
    }

    /// Move `distance` world units along the view direction
    pub fn advance(&mut self, distance: f64) {
        self.position += self.forward().as_dvec3() * distance;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(DVec3::ZERO)
    }
}

impl ViewpointSource for Camera {
    fn viewpoint_pose(&self) -> ViewpointPose {
        ViewpointPose { position: self.position, orientation: self.rotation }
    }
}
