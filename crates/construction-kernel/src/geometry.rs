//! Coordinate types shared by the structure model, lanes and builders.
//!
//! Grid addressing uses integer vectors tagged with the frame they were
//! computed in. World positions (what locomotion and perception deal in)
//! are plain `f64` vectors.

use std::f64::consts::{FRAC_PI_2, PI, TAU};
use std::fmt;
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// Signed integer grid offset. Real-frame offsets may be negative inside the
/// virtual shell.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct Vec3i {
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Vec3i {
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self { x, y, z }
    }
}

impl Add for Vec3i {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3i {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl fmt::Display for Vec3i {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Unsigned grid extent or in-grid location.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Vec3z {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Vec3z {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    /// Number of cells in a box with these dimensions.
    pub fn volume(self) -> usize {
        self.x * self.y * self.z
    }

    pub fn to_signed(self) -> Vec3i {
        Vec3i::new(self.x as i64, self.y as i64, self.z as i64)
    }
}

impl fmt::Display for Vec3z {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}", self.x, self.y, self.z)
    }
}

/// A point in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f64 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn length(self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn distance(self, rhs: Self) -> f64 {
        (self - rhs).length()
    }

    /// Unit vector in the same direction; zero if the length is effectively zero.
    pub fn normalized(self) -> Self {
        let len = self.length();
        if len <= f64::EPSILON {
            Self::default()
        } else {
            self * (1.0 / len)
        }
    }
}

impl Add for Vec3d {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3d {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3d {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl fmt::Display for Vec3d {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2}, {:.2})", self.x, self.y, self.z)
    }
}

/// Which origin a grid coordinate is expressed relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// Relative to the corner of the padded grid. All invariant checks use this.
    Virtual,
    /// Relative to the first buildable cell. Only used at the perception boundary.
    Real,
}

/// A grid coordinate tagged with its frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coord {
    pub offset: Vec3i,
    pub frame: Frame,
}

impl Coord {
    pub const fn virtual_at(x: i64, y: i64, z: i64) -> Self {
        Self {
            offset: Vec3i::new(x, y, z),
            frame: Frame::Virtual,
        }
    }

    pub const fn real_at(x: i64, y: i64, z: i64) -> Self {
        Self {
            offset: Vec3i::new(x, y, z),
            frame: Frame::Real,
        }
    }

    pub fn is_virtual(&self) -> bool {
        self.frame == Frame::Virtual
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.frame {
            Frame::Virtual => 'v',
            Frame::Real => 'r',
        };
        write!(f, "{}{}", tag, self.offset)
    }
}

/// One of the four axis-aligned rotations about Z a block may be placed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rotation {
    Zero,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    const TOLERANCE: f64 = 1e-6;

    pub const ALL: [Rotation; 4] = [
        Rotation::Zero,
        Rotation::Quarter,
        Rotation::Half,
        Rotation::ThreeQuarter,
    ];

    /// Interpret an angle in radians. Returns `None` unless it is a right angle
    /// (modulo a full turn).
    pub fn from_radians(radians: f64) -> Option<Self> {
        if !radians.is_finite() {
            return None;
        }
        let wrapped = radians.rem_euclid(TAU);
        if wrapped < Self::TOLERANCE || TAU - wrapped < Self::TOLERANCE {
            return Some(Rotation::Zero);
        }
        Self::ALL
            .into_iter()
            .find(|rot| (rot.radians() - wrapped).abs() < Self::TOLERANCE)
    }

    pub fn radians(self) -> f64 {
        match self {
            Rotation::Zero => 0.0,
            Rotation::Quarter => FRAC_PI_2,
            Rotation::Half => PI,
            Rotation::ThreeQuarter => 3.0 * FRAC_PI_2,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Rotation::Zero => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }

    /// True for 0° and 180°, where multi-cell blocks extend along X.
    pub fn is_x_aligned(self) -> bool {
        matches!(self, Rotation::Zero | Rotation::Half)
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}
