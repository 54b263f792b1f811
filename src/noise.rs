//! Hash-based 3D gradient noise. `shaders/noise.wgsl` implements the same
//! function so software and GPU renders agree on the displacement field.

use crate::math::Vec3;

const GRADIENTS: [[f32; 3]; 12] = [
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
    [1.0, -1.0, 0.0],
    [-1.0, -1.0, 0.0],
    [1.0, 0.0, 1.0],
    [-1.0, 0.0, 1.0],
    [1.0, 0.0, -1.0],
    [-1.0, 0.0, -1.0],
    [0.0, 1.0, 1.0],
    [0.0, -1.0, 1.0],
    [0.0, 1.0, -1.0],
    [0.0, -1.0, -1.0],
];

fn hash(x: i32, y: i32, z: i32) -> u32 {
    let mut h = (x as u32).wrapping_mul(0x8da6_b343)
        ^ (y as u32).wrapping_mul(0xd816_3841)
        ^ (z as u32).wrapping_mul(0xcb1a_b31f);
    h = (h ^ (h >> 13)).wrapping_mul(0x5bd1_e995);
    h ^ (h >> 15)
}

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

fn corner(ix: i32, iy: i32, iz: i32, fx: f32, fy: f32, fz: f32) -> f32 {
    let g = GRADIENTS[(hash(ix, iy, iz) % 12) as usize];
    g[0] * fx + g[1] * fy + g[2] * fz
}

/// Gradient noise in roughly [-1, 1].
pub fn noise3(p: Vec3) -> f32 {
    let (x0, y0, z0) = (p.x.floor(), p.y.floor(), p.z.floor());
    let (fx, fy, fz) = (p.x - x0, p.y - y0, p.z - z0);
    let (ix, iy, iz) = (x0 as i32, y0 as i32, z0 as i32);
    let (u, v, w) = (fade(fx), fade(fy), fade(fz));

    let n000 = corner(ix, iy, iz, fx, fy, fz);
    let n100 = corner(ix + 1, iy, iz, fx - 1.0, fy, fz);
    let n010 = corner(ix, iy + 1, iz, fx, fy - 1.0, fz);
    let n110 = corner(ix + 1, iy + 1, iz, fx - 1.0, fy - 1.0, fz);
    let n001 = corner(ix, iy, iz + 1, fx, fy, fz - 1.0);
    let n101 = corner(ix + 1, iy, iz + 1, fx - 1.0, fy, fz - 1.0);
    let n011 = corner(ix, iy + 1, iz + 1, fx, fy - 1.0, fz - 1.0);
    let n111 = corner(ix + 1, iy + 1, iz + 1, fx - 1.0, fy - 1.0, fz - 1.0);

    let x00 = lerp(n000, n100, u);
    let x10 = lerp(n010, n110, u);
    let x01 = lerp(n001, n101, u);
    let x11 = lerp(n011, n111, u);
    lerp(lerp(x00, x10, v), lerp(x01, x11, v), w)
}
