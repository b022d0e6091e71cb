//! Pixel → camera → robot base coordinate chain.

use crate::error::{UrError, UrResult};
use crate::types::Pose;
use nalgebra as na;
use serde::{Deserialize, Serialize};

/// R = Rz(yaw) · Ry(pitch) · Rx(roll), all angles in radians.
pub fn rpy_to_rotation(roll: f64, pitch: f64, yaw: f64) -> na::Matrix3<f64> {
    let (sr, cr) = roll.sin_cos();
    let (sp, cp) = pitch.sin_cos();
    let (sy, cy) = yaw.sin_cos();

    let rz = na::Matrix3::new(cy, -sy, 0.0, sy, cy, 0.0, 0.0, 0.0, 1.0);
    let ry = na::Matrix3::new(cp, 0.0, sp, 0.0, 1.0, 0.0, -sp, 0.0, cp);
    let rx = na::Matrix3::new(1.0, 0.0, 0.0, 0.0, cr, -sr, 0.0, sr, cr);

    rz * ry * rx
}

/// Rotation about y by `angle_deg` degrees.
pub fn rotation_y(angle_deg: f64) -> na::Matrix3<f64> {
    rpy_to_rotation(0.0, angle_deg.to_radians(), 0.0)
}

pub fn homogeneous(translation: na::Vector3<f64>, rotation: na::Matrix3<f64>) -> na::Matrix4<f64> {
    let mut t = na::Matrix4::identity();
    t.fixed_view_mut::<3, 3>(0, 0).copy_from(&rotation);
    t.fixed_view_mut::<3, 1>(0, 3).copy_from(&translation);
    t
}

/// Pinhole intrinsics in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraIntrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Default for CameraIntrinsics {
    // 1280x720 color stream
    fn default() -> Self {
        Self { fx: 900.0, fy: 900.0, cx: 640.0, cy: 360.0 }
    }
}

/// Pose of the camera in the robot base frame. Angles are stored in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraExtrinsics {
    pub translation: [f64; 3],
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
}

impl Default for CameraExtrinsics {
    fn default() -> Self {
        Self { translation: [0.5, 0.0, 0.4], roll_deg: 180.0, pitch_deg: 0.0, yaw_deg: 0.0 }
    }
}

impl CameraExtrinsics {
    /// T_base_cam.
    pub fn base_from_camera(&self) -> na::Matrix4<f64> {
        let r = rpy_to_rotation(
            self.roll_deg.to_radians(),
            self.pitch_deg.to_radians(),
            self.yaw_deg.to_radians(),
        );
        homogeneous(na::Vector3::from(self.translation), r)
    }
}

/// Back-projects pixel `(u, v)` at metric `depth` into the camera frame.
pub fn pixel_to_camera(
    u: f64,
    v: f64,
    depth: f64,
    intrinsics: &CameraIntrinsics,
) -> UrResult<na::Point3<f64>> {
    if !depth.is_finite() || depth <= 0.0 {
        return Err(UrError::InvalidArgument(format!("Depth must be > 0, got {}", depth)));
    }
    if intrinsics.fx == 0.0 || intrinsics.fy == 0.0 {
        return Err(UrError::InvalidArgument("Focal length must not be zero".to_string()));
    }

    let x = (u - intrinsics.cx) * depth / intrinsics.fx;
    let y = (v - intrinsics.cy) * depth / intrinsics.fy;
    Ok(na::Point3::new(x, y, depth))
}

pub fn camera_to_base(
    base_from_camera: &na::Matrix4<f64>,
    p_cam: &na::Point3<f64>,
) -> na::Point3<f64> {
    let p = base_from_camera * p_cam.to_homogeneous();
    na::Point3::new(p.x, p.y, p.z)
}

pub fn pixel_to_base(
    u: f64,
    v: f64,
    depth: f64,
    intrinsics: &CameraIntrinsics,
    extrinsics: &CameraExtrinsics,
) -> UrResult<na::Point3<f64>> {
    let p_cam = pixel_to_camera(u, v, depth, intrinsics)?;
    Ok(camera_to_base(&extrinsics.base_from_camera(), &p_cam))
}

/// Target above `p_base`, keeping the orientation the tool currently has.
pub fn approach_pose(current: Pose, p_base: &na::Point3<f64>, z_offset: f64) -> Pose {
    current.with_position(p_base.x, p_base.y, p_base.z + z_offset)
}

pub fn format_matrix(t: &na::Matrix4<f64>) -> String {
    (0..4)
        .map(|row| {
            (0..4).map(|col| format!("{:7.4}", t[(row, col)])).collect::<Vec<_>>().join(" ")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
