//! Plain 6-vector data shapes exchanged with the controller.
//!
//! All of them are `Copy` values: a pose is read from the state stream, modified and handed to
//! a motion command, nothing keeps a reference to it.

use crate::error::{UrError, UrResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cartesian axis of the tool center point, in the order the controller uses for 6-vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Z,
    Rx,
    Ry,
    Rz,
}

impl Axis {
    pub const ALL: [Axis; 6] = [Axis::X, Axis::Y, Axis::Z, Axis::Rx, Axis::Ry, Axis::Rz];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
            Axis::Rx => 3,
            Axis::Ry => 4,
            Axis::Rz => 5,
        }
    }

    pub fn is_rotational(self) -> bool {
        self.index() >= 3
    }
}

impl std::str::FromStr for Axis {
    type Err = UrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x" => Ok(Axis::X),
            "y" => Ok(Axis::Y),
            "z" => Ok(Axis::Z),
            "rx" => Ok(Axis::Rx),
            "ry" => Ok(Axis::Ry),
            "rz" => Ok(Axis::Rz),
            other => Err(UrError::InvalidArgument(format!("Unknown axis: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Direction::Positive => 1.0,
            Direction::Negative => -1.0,
        }
    }
}

fn six_from_slice(values: &[f64], what: &str) -> UrResult<[f64; 6]> {
    <[f64; 6]>::try_from(values).map_err(|_| {
        UrError::InvalidArgument(format!("{} needs 6 values, got {}", what, values.len()))
    })
}

/// Tool pose: position in meters and orientation as a rotation vector in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
}

impl Pose {
    pub fn new(x: f64, y: f64, z: f64, rx: f64, ry: f64, rz: f64) -> Self {
        Self { x, y, z, rx, ry, rz }
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self::new(v[0], v[1], v[2], v[3], v[4], v[5])
    }

    pub fn from_slice(values: &[f64]) -> UrResult<Self> {
        Ok(Self::from_array(six_from_slice(values, "Pose")?))
    }

    pub fn to_array(self) -> [f64; 6] {
        [self.x, self.y, self.z, self.rx, self.ry, self.rz]
    }

    pub fn translated(self, dx: f64, dy: f64, dz: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy, z: self.z + dz, ..self }
    }

    /// Same orientation at a new position.
    pub fn with_position(self, x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z, ..self }
    }

    /// Position in millimeters and orientation in degrees.
    pub fn to_display(self) -> [f64; 6] {
        [
            self.x * 1000.0,
            self.y * 1000.0,
            self.z * 1000.0,
            self.rx.to_degrees(),
            self.ry.to_degrees(),
            self.rz.to_degrees(),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
    }
}

impl fmt::Display for Pose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.to_display();
        write!(
            f,
            "X={:.2}mm Y={:.2}mm Z={:.2}mm Rx={:.2}° Ry={:.2}° Rz={:.2}°",
            d[0], d[1], d[2], d[3], d[4], d[5]
        )
    }
}

/// Cartesian velocity: linear part in m/s, angular part in rad/s.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Twist {
    pub linear: [f64; 3],
    pub angular: [f64; 3],
}

impl Twist {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_array(v: [f64; 6]) -> Self {
        Self { linear: [v[0], v[1], v[2]], angular: [v[3], v[4], v[5]] }
    }

    pub fn from_slice(values: &[f64]) -> UrResult<Self> {
        Ok(Self::from_array(six_from_slice(values, "Twist")?))
    }

    /// Single-axis jog velocity. Translational axes take `linear_speed`, rotational axes
    /// take `angular_speed`.
    pub fn along(axis: Axis, direction: Direction, linear_speed: f64, angular_speed: f64) -> Self {
        let mut v = [0.0; 6];
        let speed = if axis.is_rotational() { angular_speed } else { linear_speed };
        v[axis.index()] = direction.sign() * speed;
        Self::from_array(v)
    }

    pub fn to_array(self) -> [f64; 6] {
        [
            self.linear[0],
            self.linear[1],
            self.linear[2],
            self.angular[0],
            self.angular[1],
            self.angular[2],
        ]
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|v| *v == 0.0)
    }
}

/// Force (N) and torque (Nm).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Wrench {
    pub force: [f64; 3],
    pub torque: [f64; 3],
}

impl Wrench {
    pub fn from_array(v: [f64; 6]) -> Self {
        Self { force: [v[0], v[1], v[2]], torque: [v[3], v[4], v[5]] }
    }

    pub fn from_slice(values: &[f64]) -> UrResult<Self> {
        Ok(Self::from_array(six_from_slice(values, "Wrench")?))
    }

    /// Pure force along z, the only shape the insertion routines use.
    pub fn force_z(fz: f64) -> Self {
        Self::from_array([0.0, 0.0, fz, 0.0, 0.0, 0.0])
    }

    pub fn to_array(self) -> [f64; 6] {
        let (f, t) = (self.force, self.torque);
        [f[0], f[1], f[2], t[0], t[1], t[2]]
    }
}
