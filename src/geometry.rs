use std::f32::consts::PI;

use bytemuck::{Pod, Zeroable};
use serde::Serialize;

use crate::adaptive::scale_segments;
use crate::params::{GeometryType, ParamKey, ParameterSet};

pub const PLANE_SEGMENT_CAP: u32 = 512;
pub const SPHERE_SEGMENT_CAP: u32 = 256;
pub const CUBE_SEGMENT_CAP: u32 = 128;

/// Resolution a geometry rebuild should use.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeometryDetail {
    pub high_quality: bool,
    /// Adaptive reduction factor; 1.0 means full resolution.
    pub segment_scale: f64,
    pub min_segments: u32,
}

impl GeometryDetail {
    pub const NORMAL: Self = Self {
        high_quality: false,
        segment_scale: 1.0,
        min_segments: 32,
    };

    pub const HIGH_QUALITY: Self = Self {
        high_quality: true,
        segment_scale: 1.0,
        min_segments: 32,
    };

    pub fn reduced(segment_scale: f64, min_segments: u32) -> Self {
        Self {
            high_quality: false,
            segment_scale,
            min_segments,
        }
    }

    /// Effective segment count for a requested value: doubled for high
    /// quality, scaled down under adaptive reduction, always within `1..=cap`.
    pub fn segments(&self, requested: u32, cap: u32) -> u32 {
        let base = if self.high_quality {
            requested.saturating_mul(2)
        } else {
            requested
        };
        scale_segments(base, self.segment_scale, self.min_segments).clamp(1, cap)
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct MeshVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GeometryStats {
    pub vertex_count: usize,
    pub triangle_count: usize,
    pub segments_u: u32,
    pub segments_v: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub vertices: Vec<MeshVertex>,
    pub indices: Vec<u32>,
    pub segments_u: u32,
    pub segments_v: u32,
}

impl MeshData {
    pub fn build(params: &ParameterSet, detail: GeometryDetail) -> Self {
        match params.geometry_type() {
            GeometryType::Plane => {
                let segments =
                    detail.segments(params.integer(ParamKey::PlaneSegments), PLANE_SEGMENT_CAP);
                plane(
                    params.number_f32(ParamKey::PlaneWidth),
                    params.number_f32(ParamKey::PlaneHeight),
                    segments,
                )
            }
            GeometryType::Sphere => {
                let width_segments = detail
                    .segments(
                        params.integer(ParamKey::SphereWidthSegments),
                        SPHERE_SEGMENT_CAP,
                    )
                    .max(3);
                let height_segments = detail
                    .segments(
                        params.integer(ParamKey::SphereHeightSegments),
                        SPHERE_SEGMENT_CAP,
                    )
                    .max(2);
                sphere(
                    params.number_f32(ParamKey::SphereRadius),
                    width_segments,
                    height_segments,
                )
            }
            GeometryType::Cube => {
                let segments =
                    detail.segments(params.integer(ParamKey::CubeSegments), CUBE_SEGMENT_CAP);
                cube(params.number_f32(ParamKey::CubeSize), segments)
            }
        }
    }

    pub fn stats(&self) -> GeometryStats {
        GeometryStats {
            vertex_count: self.vertices.len(),
            triangle_count: self.indices.len() / 3,
            segments_u: self.segments_u,
            segments_v: self.segments_v,
        }
    }

    pub fn triangles(&self) -> impl Iterator<Item = [&MeshVertex; 3]> {
        self.indices.chunks_exact(3).map(|tri| {
            [
                &self.vertices[tri[0] as usize],
                &self.vertices[tri[1] as usize],
                &self.vertices[tri[2] as usize],
            ]
        })
    }
}

fn grid_indices(indices: &mut Vec<u32>, base: u32, columns: u32, rows: u32) {
    let stride = columns + 1;
    for row in 0..rows {
        for column in 0..columns {
            let a = base + row * stride + column;
            let b = a + stride;
            let c = b + 1;
            let d = a + 1;
            indices.extend_from_slice(&[a, b, d, b, c, d]);
        }
    }
}

/// Plane in the XY plane facing +Z.
fn plane(width: f32, height: f32, segments: u32) -> MeshData {
    let mut vertices = Vec::with_capacity(((segments + 1) * (segments + 1)) as usize);
    for row in 0..=segments {
        let v = row as f32 / segments as f32;
        for column in 0..=segments {
            let u = column as f32 / segments as f32;
            vertices.push(MeshVertex {
                position: [(u - 0.5) * width, (0.5 - v) * height, 0.0],
                normal: [0.0, 0.0, 1.0],
                uv: [u, 1.0 - v],
            });
        }
    }
    let mut indices = Vec::with_capacity((segments * segments * 6) as usize);
    grid_indices(&mut indices, 0, segments, segments);
    MeshData {
        vertices,
        indices,
        segments_u: segments,
        segments_v: segments,
    }
}

fn sphere(radius: f32, width_segments: u32, height_segments: u32) -> MeshData {
    let mut vertices =
        Vec::with_capacity(((width_segments + 1) * (height_segments + 1)) as usize);
    for row in 0..=height_segments {
        let v = row as f32 / height_segments as f32;
        let theta = v * PI;
        for column in 0..=width_segments {
            let u = column as f32 / width_segments as f32;
            let phi = u * 2.0 * PI;
            let normal = [
                -phi.cos() * theta.sin(),
                theta.cos(),
                phi.sin() * theta.sin(),
            ];
            vertices.push(MeshVertex {
                position: [normal[0] * radius, normal[1] * radius, normal[2] * radius],
                normal,
                uv: [u, 1.0 - v],
            });
        }
    }

    let stride = width_segments + 1;
    let mut indices = Vec::new();
    for row in 0..height_segments {
        for column in 0..width_segments {
            let a = row * stride + column + 1;
            let b = row * stride + column;
            let c = (row + 1) * stride + column;
            let d = (row + 1) * stride + column + 1;
            if row != 0 {
                indices.extend_from_slice(&[a, b, d]);
            }
            if row != height_segments - 1 {
                indices.extend_from_slice(&[b, c, d]);
            }
        }
    }

    MeshData {
        vertices,
        indices,
        segments_u: width_segments,
        segments_v: height_segments,
    }
}

fn cube(size: f32, segments: u32) -> MeshData {
    let half = size * 0.5;
    // (normal, u axis, v axis) per face
    let faces: [([f32; 3], [f32; 3], [f32; 3]); 6] = [
        ([1.0, 0.0, 0.0], [0.0, 0.0, -1.0], [0.0, -1.0, 0.0]),
        ([-1.0, 0.0, 0.0], [0.0, 0.0, 1.0], [0.0, -1.0, 0.0]),
        ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        ([0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, -1.0]),
        ([0.0, 0.0, 1.0], [1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
        ([0.0, 0.0, -1.0], [-1.0, 0.0, 0.0], [0.0, -1.0, 0.0]),
    ];

    let per_face = (segments + 1) * (segments + 1);
    let mut vertices = Vec::with_capacity((per_face * 6) as usize);
    let mut indices = Vec::with_capacity((segments * segments * 36) as usize);
    for (face_index, (normal, u_axis, v_axis)) in faces.iter().enumerate() {
        let base = face_index as u32 * per_face;
        for row in 0..=segments {
            let v = row as f32 / segments as f32;
            for column in 0..=segments {
                let u = column as f32 / segments as f32;
                let (su, sv) = ((u - 0.5) * size, (v - 0.5) * size);
                let position = [
                    normal[0] * half + u_axis[0] * su + v_axis[0] * sv,
                    normal[1] * half + u_axis[1] * su + v_axis[1] * sv,
                    normal[2] * half + u_axis[2] * su + v_axis[2] * sv,
                ];
                vertices.push(MeshVertex {
                    position,
                    normal: *normal,
                    uv: [u, 1.0 - v],
                });
            }
        }
        grid_indices(&mut indices, base, segments, segments);
    }

    MeshData {
        vertices,
        indices,
        segments_u: segments,
        segments_v: segments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamValue;

    fn params_with(entries: &[(ParamKey, ParamValue)]) -> ParameterSet {
        let mut params = ParameterSet::defaults();
        for (key, value) in entries {
            params.set(*key, value.clone());
        }
        params
    }

    #[test]
    fn plane_counts_follow_segments() {
        let params = params_with(&[(ParamKey::PlaneSegments, ParamValue::Number(4.0))]);
        let stats = MeshData::build(&params, GeometryDetail::NORMAL).stats();
        assert_eq!(stats.vertex_count, 25);
        assert_eq!(stats.triangle_count, 32);
    }

    #[test]
    fn sphere_skips_degenerate_pole_triangles() {
        let params = params_with(&[
            (ParamKey::GeometryType, ParamValue::text("sphere")),
            (ParamKey::SphereWidthSegments, ParamValue::Number(8.0)),
            (ParamKey::SphereHeightSegments, ParamValue::Number(4.0)),
        ]);
        let mesh = MeshData::build(&params, GeometryDetail::NORMAL);
        assert_eq!(mesh.stats().vertex_count, 45);
        assert_eq!(mesh.stats().triangle_count, 8 * 3 * 2);
        for vertex in &mesh.vertices {
            let [x, y, z] = vertex.position;
            assert!(((x * x + y * y + z * z).sqrt() - 2.0).abs() < 1e-4);
        }
    }

    #[test]
    fn cube_has_six_faces() {
        let params = params_with(&[
            (ParamKey::GeometryType, ParamValue::text("cube")),
            (ParamKey::CubeSegments, ParamValue::Number(2.0)),
        ]);
        let stats = MeshData::build(&params, GeometryDetail::NORMAL).stats();
        assert_eq!(stats.vertex_count, 6 * 9);
        assert_eq!(stats.triangle_count, 6 * 8);
    }

    #[test]
    fn high_quality_doubles_within_cap() {
        assert_eq!(GeometryDetail::HIGH_QUALITY.segments(96, SPHERE_SEGMENT_CAP), 192);
        assert_eq!(GeometryDetail::HIGH_QUALITY.segments(200, SPHERE_SEGMENT_CAP), 256);
        assert_eq!(GeometryDetail::reduced(0.5, 32).segments(128, PLANE_SEGMENT_CAP), 64);
    }
}
