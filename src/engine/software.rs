use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Stroke, Transform};

use crate::engine::shaders::{ShaderSourceLoader, ShaderStage};
use crate::engine::shading::{ShadedVertex, ShadingModel};
use crate::engine::{
    Camera, ClearColor, EngineCapabilities, ShaderEngine, ShaderUniforms, Surface,
};
use crate::geometry::{GeometryDetail, GeometryStats, MeshData};
use crate::gradient::ColorStop;
use crate::params::ParameterSet;

const WIREFRAME_COLOR: [u8; 4] = [255, 255, 255, 96];

/// Deterministic CPU renderer. Triangles are shaded flat and drawn back to
/// front, which is enough for the convex shapes the editor produces.
pub struct SoftwareEngine {
    params: ParameterSet,
    camera: Camera,
    clear_color: ClearColor,
    shader_time: f32,
    uniforms: ShaderUniforms,
    gradient_stops: Option<Vec<ColorStop>>,
    shaders: ShaderSourceLoader,
    surface: Option<Surface>,
    pixmap: Option<Pixmap>,
    mesh: Option<MeshData>,
    frames_rendered: u64,
}

impl SoftwareEngine {
    pub fn new(params: ParameterSet) -> Self {
        Self::with_shaders(params, ShaderSourceLoader::embedded())
    }

    pub fn with_shaders(params: ParameterSet, shaders: ShaderSourceLoader) -> Self {
        let camera = Camera::default();
        let uniforms = ShaderUniforms::from_params(&params, &camera, 0.0);
        Self {
            clear_color: ClearColor::from_params(&params),
            params,
            camera,
            shader_time: 0.0,
            uniforms,
            gradient_stops: None,
            shaders,
            surface: None,
            pixmap: None,
            mesh: None,
            frames_rendered: 0,
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.surface.is_some()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<()> {
        let pixmap = Pixmap::new(width, height)
            .ok_or_else(|| anyhow!("failed to allocate software target {width}x{height}"))?;
        self.pixmap = Some(pixmap);
        self.camera.aspect = width as f32 / height.max(1) as f32;
        self.uniforms.view_proj = self.camera.view_projection().cols;
        Ok(())
    }
}

impl ShaderEngine for SoftwareEngine {
    fn mount(&mut self, surface: &Surface) -> Result<()> {
        surface.validate()?;
        self.allocate(surface.width, surface.height)?;
        self.surface = Some(surface.clone());
        self.update_uniforms()?;
        tracing::debug!(
            surface = %surface.label,
            width = surface.width,
            height = surface.height,
            "software engine mounted"
        );
        Ok(())
    }

    fn dispose(&mut self) {
        if self.surface.take().is_some() {
            tracing::debug!(frames = self.frames_rendered, "software engine disposed");
        }
        self.pixmap = None;
        self.mesh = None;
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn update_uniforms(&mut self) -> Result<()> {
        self.camera.sync_from(&self.params);
        self.clear_color = ClearColor::from_params(&self.params);
        self.uniforms = ShaderUniforms::from_params(&self.params, &self.camera, self.shader_time);
        self.gradient_stops = self.params.color_stops().map(<[ColorStop]>::to_vec);
        Ok(())
    }

    fn recreate_geometry(&mut self, detail: GeometryDetail) -> Result<GeometryStats> {
        if !self.is_mounted() {
            bail!("cannot build geometry before the engine is mounted");
        }
        let mesh = MeshData::build(&self.params, detail);
        let stats = mesh.stats();
        self.mesh = Some(mesh);
        Ok(stats)
    }

    fn geometry_stats(&self) -> Option<GeometryStats> {
        self.mesh.as_ref().map(MeshData::stats)
    }

    fn camera(&self) -> &Camera {
        &self.camera
    }

    fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    fn clear_color(&self) -> ClearColor {
        self.clear_color
    }

    fn set_clear_color(&mut self, color: ClearColor) {
        self.clear_color = color;
    }

    fn shader_time(&self) -> f32 {
        self.shader_time
    }

    fn set_shader_time(&mut self, time: f32) {
        self.shader_time = time;
        self.uniforms.camera_time[3] = time;
    }

    fn render(&mut self) -> Result<()> {
        let pixmap = self
            .pixmap
            .as_mut()
            .ok_or_else(|| anyhow!("cannot render before the engine is mounted"))?;
        let (width, height) = (pixmap.width(), pixmap.height());

        let [r, g, b] = self.clear_color.rgb;
        let background = Color::from_rgba(
            r.clamp(0.0, 1.0),
            g.clamp(0.0, 1.0),
            b.clamp(0.0, 1.0),
            self.clear_color.alpha.clamp(0.0, 1.0),
        )
        .unwrap_or(Color::BLACK);
        pixmap.fill(background);

        let Some(mesh) = &self.mesh else {
            self.frames_rendered += 1;
            return Ok(());
        };

        let shading = ShadingModel::new(self.uniforms, self.gradient_stops.as_deref())
            .context("failed to prepare software shading")?;
        let shaded: Vec<ShadedVertex> =
            mesh.vertices.iter().map(|v| shading.transform(v)).collect();

        let mut triangles = Vec::with_capacity(mesh.indices.len() / 3);
        for tri in mesh.indices.chunks_exact(3) {
            let corners = [
                &shaded[tri[0] as usize],
                &shaded[tri[1] as usize],
                &shaded[tri[2] as usize],
            ];
            let screen = corners.map(|vertex| vertex.screen(width, height));
            let [Some(a), Some(b), Some(c)] = screen else {
                continue;
            };
            let depth = (a.2 + b.2 + c.2) / 3.0;
            triangles.push((depth, corners, [(a.0, a.1), (b.0, b.1), (c.0, c.1)]));
        }
        triangles.sort_by(|left, right| right.0.total_cmp(&left.0));

        let wireframe = self.uniforms.color_noise[3] > 0.5;
        let mut fill = Paint {
            anti_alias: false,
            ..Paint::default()
        };
        let mut edge = Paint::default();
        let [wr, wg, wb, wa] = WIREFRAME_COLOR;
        edge.set_color_rgba8(wr, wg, wb, wa);
        let stroke = Stroke {
            width: 1.0,
            ..Stroke::default()
        };

        for (_, corners, points) in &triangles {
            let mut builder = PathBuilder::new();
            builder.move_to(points[0].0, points[0].1);
            builder.line_to(points[1].0, points[1].1);
            builder.line_to(points[2].0, points[2].1);
            builder.close();
            let Some(path) = builder.finish() else {
                continue;
            };

            let [cr, cg, cb] = shading.shade_triangle(*corners);
            let to_byte = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
            fill.set_color_rgba8(to_byte(cr), to_byte(cg), to_byte(cb), 255);
            pixmap.fill_path(&path, &fill, FillRule::Winding, Transform::identity(), None);
            if wireframe {
                pixmap.stroke_path(&path, &edge, &stroke, Transform::identity(), None);
            }
        }

        self.frames_rendered += 1;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbaImage> {
        let pixmap = self
            .pixmap
            .as_ref()
            .ok_or_else(|| anyhow!("cannot capture before the engine is mounted"))?;
        let mut data = Vec::with_capacity(pixmap.data().len());
        for pixel in pixmap.pixels() {
            let color = pixel.demultiply();
            data.extend_from_slice(&[color.red(), color.green(), color.blue(), color.alpha()]);
        }
        RgbaImage::from_raw(pixmap.width(), pixmap.height(), data)
            .ok_or_else(|| anyhow!("captured frame has an unexpected size"))
    }

    fn shader_source(&self, stage: ShaderStage) -> Result<String> {
        self.shaders.load(stage)
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            backend: "software",
            transparent_capture: true,
            resizable: true,
            wireframe: true,
        }
    }

    fn size(&self) -> (u32, u32) {
        self.pixmap
            .as_ref()
            .map(|pixmap| (pixmap.width(), pixmap.height()))
            .unwrap_or((0, 0))
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if !self.is_mounted() {
            bail!("cannot resize before the engine is mounted");
        }
        if width == 0 || height == 0 {
            bail!("render target must have positive size, got {width}x{height}");
        }
        if self.size() != (width, height) {
            self.allocate(width, height)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamKey, ParamValue};

    fn mounted(params: ParameterSet) -> SoftwareEngine {
        let mut engine = SoftwareEngine::new(params);
        engine
            .mount(&Surface::new("test", 48, 32))
            .expect("mount");
        engine
    }

    fn small_plane() -> ParameterSet {
        let mut params = ParameterSet::defaults();
        params.set(ParamKey::PlaneSegments, ParamValue::Number(8.0));
        params
    }

    #[test]
    fn renders_background_without_geometry() {
        let mut params = small_plane();
        params.set(ParamKey::BackgroundColor, ParamValue::text("#336699"));
        let mut engine = mounted(params);
        engine.render().expect("render");
        let frame = engine.capture_frame().expect("capture");
        assert_eq!(frame.dimensions(), (48, 32));
        assert_eq!(frame.get_pixel(0, 0).0, [0x33, 0x66, 0x99, 255]);
    }

    #[test]
    fn plane_covers_the_center_of_the_frame() {
        let mut engine = mounted(small_plane());
        engine
            .recreate_geometry(GeometryDetail::NORMAL)
            .expect("geometry");
        engine.render().expect("render");
        let frame = engine.capture_frame().expect("capture");
        assert_ne!(frame.get_pixel(24, 16).0, [0, 0, 0, 255]);
    }

    #[test]
    fn transparent_clear_survives_capture() {
        let mut engine = mounted(small_plane());
        engine.set_clear_color(ClearColor::BLACK.with_alpha(0.0));
        engine.render().expect("render");
        let frame = engine.capture_frame().expect("capture");
        assert_eq!(frame.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn rendering_is_deterministic() {
        let render = || {
            let mut engine = mounted(small_plane());
            engine.set_shader_time(1.25);
            engine
                .recreate_geometry(GeometryDetail::NORMAL)
                .expect("geometry");
            engine.render().expect("render");
            engine.capture_frame().expect("capture")
        };
        assert_eq!(render().as_raw(), render().as_raw());
    }

    #[test]
    fn dispose_is_idempotent_and_blocks_rendering() {
        let mut engine = mounted(small_plane());
        engine.dispose();
        engine.dispose();
        assert!(engine.render().is_err());
        assert!(engine.recreate_geometry(GeometryDetail::NORMAL).is_err());
    }

    #[test]
    fn resize_reallocates_the_target() {
        let mut engine = mounted(small_plane());
        engine.resize(20, 10).expect("resize");
        assert_eq!(engine.size(), (20, 10));
        assert!((engine.camera().aspect - 2.0).abs() < 1e-6);
    }
}
