use std::ops::{Add, Mul, Sub};

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn from_array([x, y, z]: [f32; 3]) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    pub fn normalize_or(self, fallback: Self) -> Self {
        let length = self.length();
        if length <= f32::EPSILON || !length.is_finite() {
            fallback
        } else {
            self * (1.0 / length)
        }
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Column-major 4x4 matrix, laid out the way WGSL `mat4x4<f32>` expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mat4 {
    pub cols: [[f32; 4]; 4],
}

impl Mat4 {
    pub const IDENTITY: Self = Self {
        cols: [
            [1.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 0.0, 0.0],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 0.0, 0.0, 1.0],
        ],
    };

    /// Right-handed perspective projection with a 0..1 depth range.
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        let f = 1.0 / (fov_y_degrees.to_radians() * 0.5).tan();
        let range = far / (near - far);
        Self {
            cols: [
                [f / aspect, 0.0, 0.0, 0.0],
                [0.0, f, 0.0, 0.0],
                [0.0, 0.0, range, -1.0],
                [0.0, 0.0, range * near, 0.0],
            ],
        }
    }

    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let forward = (target - eye).normalize_or(Vec3::new(0.0, 0.0, -1.0));
        let mut side = forward.cross(up);
        if side.length() <= f32::EPSILON {
            side = forward.cross(Vec3::new(0.0, 0.0, 1.0));
        }
        let side = side.normalize_or(Vec3::new(1.0, 0.0, 0.0));
        let up = side.cross(forward);
        Self {
            cols: [
                [side.x, up.x, -forward.x, 0.0],
                [side.y, up.y, -forward.y, 0.0],
                [side.z, up.z, -forward.z, 0.0],
                [-side.dot(eye), -up.dot(eye), forward.dot(eye), 1.0],
            ],
        }
    }

    /// Rotation applied in X, then Y, then Z order.
    pub fn rotation_xyz(x: f32, y: f32, z: f32) -> Self {
        let (sx, cx) = x.sin_cos();
        let (sy, cy) = y.sin_cos();
        let (sz, cz) = z.sin_cos();
        let rx = Self {
            cols: [
                [1.0, 0.0, 0.0, 0.0],
                [0.0, cx, sx, 0.0],
                [0.0, -sx, cx, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        };
        let ry = Self {
            cols: [
                [cy, 0.0, -sy, 0.0],
                [0.0, 1.0, 0.0, 0.0],
                [sy, 0.0, cy, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        };
        let rz = Self {
            cols: [
                [cz, sz, 0.0, 0.0],
                [-sz, cz, 0.0, 0.0],
                [0.0, 0.0, 1.0, 0.0],
                [0.0, 0.0, 0.0, 1.0],
            ],
        };
        rz * ry * rx
    }

    pub fn transform_point(&self, point: Vec3) -> [f32; 4] {
        let c = &self.cols;
        let mut out = [0.0; 4];
        for (row, value) in out.iter_mut().enumerate() {
            *value = c[0][row] * point.x + c[1][row] * point.y + c[2][row] * point.z + c[3][row];
        }
        out
    }

    pub fn transform_vector(&self, vector: Vec3) -> Vec3 {
        let c = &self.cols;
        Vec3::new(
            c[0][0] * vector.x + c[1][0] * vector.y + c[2][0] * vector.z,
            c[0][1] * vector.x + c[1][1] * vector.y + c[2][1] * vector.z,
            c[0][2] * vector.x + c[1][2] * vector.y + c[2][2] * vector.z,
        )
    }
}

impl Mul for Mat4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut cols = [[0.0; 4]; 4];
        for (col, out) in cols.iter_mut().enumerate() {
            for (row, value) in out.iter_mut().enumerate() {
                *value = (0..4)
                    .map(|k| self.cols[k][row] * rhs.cols[col][k])
                    .sum();
            }
        }
        Self { cols }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_moves_target_onto_negative_z() {
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 8.0), Vec3::ZERO, Vec3::Y);
        let [x, y, z, w] = view.transform_point(Vec3::ZERO);
        assert!(x.abs() < 1e-5 && y.abs() < 1e-5);
        assert!((z + 8.0).abs() < 1e-5);
        assert_eq!(w, 1.0);
    }

    #[test]
    fn perspective_maps_near_plane_to_zero_depth() {
        let projection = Mat4::perspective(45.0, 1.0, 0.1, 100.0);
        let [_, _, z, w] = projection.transform_point(Vec3::new(0.0, 0.0, -0.1));
        assert!((z / w).abs() < 1e-4);
    }

    #[test]
    fn identity_is_neutral() {
        let rotation = Mat4::rotation_xyz(0.3, 0.2, 0.1);
        assert_eq!(rotation * Mat4::IDENTITY, rotation);
    }
}
