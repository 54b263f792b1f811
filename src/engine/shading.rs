//! CPU evaluation of vertex.wgsl and fragment.wgsl, used by the software
//! engine. Keep the two in step when either side changes.

use anyhow::Result;

use crate::engine::ShaderUniforms;
use crate::geometry::MeshVertex;
use crate::gradient::{parse_stops, sample_stops, ColorStop, Rgb};
use crate::math::{Mat4, Vec3};
use crate::noise::noise3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadedVertex {
    pub clip: [f32; 4],
    pub world: Vec3,
    pub normal: Vec3,
    pub uv: [f32; 2],
    pub local: Vec3,
}

impl ShadedVertex {
    /// Screen-space position for a `width`x`height` target, or `None` when the
    /// vertex sits behind the near plane.
    pub fn screen(&self, width: u32, height: u32) -> Option<(f32, f32, f32)> {
        let [x, y, z, w] = self.clip;
        if w <= 1e-4 {
            return None;
        }
        let (nx, ny) = (x / w, y / w);
        Some((
            (nx * 0.5 + 0.5) * width as f32,
            (0.5 - ny * 0.5) * height as f32,
            z / w,
        ))
    }
}

pub struct ShadingModel {
    uniforms: ShaderUniforms,
    model: Mat4,
    view_proj: Mat4,
    stops: Option<Vec<(f32, Rgb)>>,
}

impl ShadingModel {
    pub fn new(uniforms: ShaderUniforms, stops: Option<&[ColorStop]>) -> Result<Self> {
        let stops = match stops {
            Some(stops) if uniforms.color_noise[2] > 0.5 => Some(parse_stops(stops)?),
            _ => None,
        };
        Ok(Self {
            model: Mat4 {
                cols: uniforms.model,
            },
            view_proj: Mat4 {
                cols: uniforms.view_proj,
            },
            uniforms,
            stops,
        })
    }

    fn time(&self) -> f32 {
        self.uniforms.camera_time[3]
    }

    pub fn transform(&self, vertex: &MeshVertex) -> ShadedVertex {
        let [sx, sy, speed, strength] = self.uniforms.normal_noise;
        let position = Vec3::from_array(vertex.position);
        let normal = Vec3::from_array(vertex.normal);
        let drift = self.time() * speed;
        let noise_point = Vec3::new(
            position.x * sx + drift,
            position.y * sy + drift,
            position.z * sx + drift,
        );
        let displaced = position + normal * (noise3(noise_point) * strength);

        let [wx, wy, wz, _] = self.model.transform_point(displaced);
        let world = Vec3::new(wx, wy, wz);
        ShadedVertex {
            clip: self.view_proj.transform_point(world),
            world,
            normal: self.model.transform_vector(normal).normalize_or(normal),
            uv: vertex.uv,
            local: displaced,
        }
    }

    fn gradient_t(&self, uv: [f32; 2], local: Vec3) -> f32 {
        let mode = self.uniforms.lighting[3];
        if mode < 0.5 {
            return uv[1];
        }
        if mode < 1.5 {
            let (dx, dy) = (uv[0] - 0.5, uv[1] - 0.5);
            return (dx * dx + dy * dy).sqrt() * 2.0;
        }
        let [scale, speed, _, _] = self.uniforms.color_noise;
        let drift = self.time() * speed;
        let p = local * scale + Vec3::new(drift, drift, drift);
        0.5 + 0.5 * noise3(p)
    }

    fn palette(&self, t: f32) -> Rgb {
        let colors = [
            self.uniforms.color1,
            self.uniforms.color2,
            self.uniforms.color3,
            self.uniforms.color4,
        ]
        .map(|[r, g, b, _]| Rgb { r, g, b });
        let s = t.clamp(0.0, 1.0) * 3.0;
        if s < 1.0 {
            colors[0].lerp(colors[1], s)
        } else if s < 2.0 {
            colors[1].lerp(colors[2], s - 1.0)
        } else {
            colors[2].lerp(colors[3], s - 2.0)
        }
    }

    pub fn shade(&self, world: Vec3, normal: Vec3, uv: [f32; 2], local: Vec3) -> [f32; 3] {
        let t = (self.gradient_t(uv, local) + self.uniforms.lighting[2]).clamp(0.0, 1.0);
        let base = match &self.stops {
            Some(stops) => sample_stops(stops, t),
            None => self.palette(t),
        };

        let [lx, ly, lz, diffuse_intensity] = self.uniforms.light_dir;
        let [ambient, rim_intensity, _, _] = self.uniforms.lighting;
        let n = normal.normalize_or(Vec3::new(0.0, 0.0, 1.0));
        let l = Vec3::new(lx, ly, lz).normalize_or(Vec3::Y);
        let diffuse = n.dot(l).max(0.0) * diffuse_intensity;
        let [cx, cy, cz, _] = self.uniforms.camera_time;
        let view_dir = (Vec3::new(cx, cy, cz) - world).normalize_or(n);
        let rim = (1.0 - n.dot(view_dir).max(0.0)).powi(2) * rim_intensity;

        let light = ambient + diffuse;
        [
            base.r * light + rim,
            base.g * light + rim,
            base.b * light + rim,
        ]
    }

    /// Flat color for a triangle, shaded at its centroid.
    pub fn shade_triangle(&self, [a, b, c]: [&ShadedVertex; 3]) -> [f32; 3] {
        let third = 1.0 / 3.0;
        self.shade(
            (a.world + b.world + c.world) * third,
            a.normal + b.normal + c.normal,
            [
                (a.uv[0] + b.uv[0] + c.uv[0]) * third,
                (a.uv[1] + b.uv[1] + c.uv[1]) * third,
            ],
            (a.local + b.local + c.local) * third,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Camera;
    use crate::params::{ParamKey, ParamValue, ParameterSet};

    fn model_for(params: &ParameterSet) -> ShadingModel {
        let uniforms = ShaderUniforms::from_params(params, &Camera::default(), 0.0);
        ShadingModel::new(uniforms, params.color_stops()).expect("shading model")
    }

    fn flat_lighting(params: &mut ParameterSet) {
        params.set(ParamKey::AmbientIntensity, ParamValue::Number(1.0));
        params.set(ParamKey::DiffuseIntensity, ParamValue::Number(0.0));
        params.set(ParamKey::RimLightIntensity, ParamValue::Number(0.0));
        params.set(ParamKey::GradientMode, ParamValue::text("linear"));
    }

    #[test]
    fn linear_gradient_runs_through_the_palette() {
        let mut params = ParameterSet::defaults();
        flat_lighting(&mut params);
        params.set(ParamKey::Color1, ParamValue::text("#ff0000"));
        params.set(ParamKey::Color4, ParamValue::text("#0000ff"));
        let shading = model_for(&params);

        let normal = Vec3::new(0.0, 0.0, 1.0);
        let bottom = shading.shade(Vec3::ZERO, normal, [0.5, 0.0], Vec3::ZERO);
        let top = shading.shade(Vec3::ZERO, normal, [0.5, 1.0], Vec3::ZERO);
        let close = |a: [f32; 3], b: [f32; 3]| a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-5);
        assert!(close(bottom, [1.0, 0.0, 0.0]), "{bottom:?}");
        assert!(close(top, [0.0, 0.0, 1.0]), "{top:?}");
    }

    #[test]
    fn color_stops_replace_the_palette() {
        let mut params = ParameterSet::defaults();
        flat_lighting(&mut params);
        params.set_color_stops(Some(vec![
            ColorStop::new(0.0, "#00ff00"),
            ColorStop::new(1.0, "#00ff00"),
        ]));
        let shading = model_for(&params);
        let color = shading.shade(Vec3::ZERO, Vec3::Y, [0.2, 0.7], Vec3::ZERO);
        assert_eq!(color, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn vertices_in_front_of_the_camera_project_on_screen() {
        let mut params = ParameterSet::defaults();
        params.set(ParamKey::NormalNoiseStrength, ParamValue::Number(0.0));
        let shading = model_for(&params);
        let vertex = MeshVertex {
            position: [0.0, 0.0, 0.0],
            normal: [0.0, 0.0, 1.0],
            uv: [0.5, 0.5],
        };
        let (x, y, _) = shading
            .transform(&vertex)
            .screen(100, 100)
            .expect("visible");
        assert!((x - 50.0).abs() < 1e-3 && (y - 50.0).abs() < 1e-3);
    }
}
