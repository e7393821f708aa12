//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics: every operation is
//! plain scalar f32 arithmetic in a fixed order, so the same inputs always
//! produce the same bits on replay.

use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const UP: Self = Self {
        x: 0.0,
        y: 1.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Unit vector in the same direction. Zero-length input yields non-finite
    /// components; use [`Vec3::normalize_or_zero`] when that can happen.
    pub fn normalize(self) -> Self {
        self.scale(1.0 / self.len())
    }

    pub fn normalize_or_zero(self) -> Self {
        let n = self.normalize();
        if n.is_finite() {
            n
        } else {
            Self::ZERO
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Horizontal (xz) part of the vector.
    pub fn horizontal(self) -> Self {
        Self::new(self.x, 0.0, self.z)
    }

    /// Mirrors `self` about the plane with the given unit normal.
    pub fn reflect(self, normal: Self) -> Self {
        self - normal.scale(2.0 * self.dot(normal))
    }

    /// Angle in radians between two vectors.
    pub fn angle(self, rhs: Self) -> f32 {
        let denom = (self.len_sq() * rhs.len_sq()).sqrt();
        if denom == 0.0 {
            return 0.0;
        }
        (self.dot(rhs) / denom).clamp(-1.0, 1.0).acos()
    }

    /// Linear interpolation, clamped to the segment.
    ///
    /// Written as a weighted sum so that `t == 0` returns `self` and `t == 1`
    /// returns `to` bit-exactly.
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let s = 1.0 - t;
        Self::new(
            self.x * s + to.x * t,
            self.y * s + to.y * t,
            self.z * s + to.z * t,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl SubAssign for Vec3 {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        self.scale(rhs)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Integer 3D vector, used for block coordinates and block-facing directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Vec3i {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Vec3i {
    pub const ZERO: Self = Self { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Block containing a world position. Blocks are centred on integer
    /// coordinates, so this rounds half-up on every axis.
    pub fn containing(p: Vec3) -> Self {
        Self::new(
            (p.x + 0.5).floor() as i32,
            (p.y + 0.5).floor() as i32,
            (p.z + 0.5).floor() as i32,
        )
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(self.x as f32, self.y as f32, self.z as f32)
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }
}

/// Unit quaternion (conceptually).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Rotation of `angle` radians about a unit `axis`.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(axis.x * s, axis.y * s, axis.z * s, c)
    }

    /// Rotation about Y, then X, then Z (yaw, pitch, roll), angles in radians.
    pub fn from_yxz(yaw: f32, pitch: f32, roll: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, yaw)
            * Self::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), pitch)
            * Self::from_axis_angle(Vec3::new(0.0, 0.0, 1.0), roll)
    }

    /// Yaw-only rotation from an angle in degrees.
    pub fn from_yaw_degrees(yaw: f32) -> Self {
        Self::from_axis_angle(Vec3::UP, yaw.to_radians())
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z + self.w * rhs.w
    }

    pub fn normalize(self) -> Self {
        let len = self.dot(self).sqrt();
        if len == 0.0 {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.x * inv, self.y * inv, self.z * inv, self.w * inv)
    }

    /// Rotates a vector by this quaternion.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scale(2.0);
        v + t.scale(self.w) + u.cross(t)
    }

    /// Spherical interpolation along the shortest arc, renormalized.
    ///
    /// Endpoints are returned unchanged so that sampling exactly at a
    /// buffered timestamp reproduces that sample.
    pub fn slerp(self, to: Self, t: f32) -> Self {
        if t <= 0.0 {
            return self;
        }
        if t >= 1.0 {
            return to;
        }

        let mut cos = self.dot(to);
        let mut end = to;
        if cos < 0.0 {
            cos = -cos;
            end = Self::new(-to.x, -to.y, -to.z, -to.w);
        }

        let (a, b) = if cos > 0.9995 {
            // Nearly parallel: fall back to normalized lerp.
            (1.0 - t, t)
        } else {
            let theta = cos.acos();
            let sin = theta.sin();
            (((1.0 - t) * theta).sin() / sin, (t * theta).sin() / sin)
        };

        Self::new(
            self.x * a + end.x * b,
            self.y * a + end.y * b,
            self.z * a + end.z * b,
            self.w * a + end.w * b,
        )
        .normalize()
    }
}

impl Mul for Quat {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        (a - b).len() < 1e-5
    }

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn vec3_lerp_endpoints_are_exact() {
        let a = Vec3::new(0.1, 0.7, -3.3);
        let b = Vec3::new(1.9, -0.2, 8.05);
        assert_eq!(a.lerp(b, 0.0), a);
        assert_eq!(a.lerp(b, 1.0), b);
    }

    #[test]
    fn block_rounding_is_half_up() {
        assert_eq!(Vec3i::containing(Vec3::new(0.49, 0.5, -0.5)), Vec3i::new(0, 1, 0));
        assert_eq!(Vec3i::containing(Vec3::new(-0.51, 2.2, 1.7)), Vec3i::new(-1, 2, 2));
    }

    #[test]
    fn quat_yaw_turns_forward_vector() {
        let q = Quat::from_yaw_degrees(90.0);
        let v = q.rotate(Vec3::new(0.0, 0.0, 1.0));
        assert!(approx(v, Vec3::new(1.0, 0.0, 0.0)), "{v:?}");
    }

    #[test]
    fn quat_slerp_halfway_and_endpoints() {
        let a = Quat::IDENTITY;
        let b = Quat::from_yaw_degrees(90.0);
        assert_eq!(a.slerp(b, 0.0), a);
        assert_eq!(a.slerp(b, 1.0), b);

        let mid = a.slerp(b, 0.5);
        let expected = Quat::from_yaw_degrees(45.0);
        assert!((mid.dot(expected).abs() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn reflect_off_wall() {
        let v = Vec3::new(1.0, 0.0, 1.0);
        let r = v.reflect(Vec3::new(-1.0, 0.0, 0.0));
        assert!(approx(r, Vec3::new(-1.0, 0.0, 1.0)));
    }
}
