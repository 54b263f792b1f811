pub mod gpu;
pub mod shaders;
pub mod shading;
pub mod software;

use anyhow::{bail, Result};
use bytemuck::{Pod, Zeroable};
use image::RgbaImage;
use serde::Serialize;

use crate::geometry::{GeometryDetail, GeometryStats};
use crate::gradient::Rgb;
use crate::math::{Mat4, Vec3};
use crate::params::{ParamKey, ParameterSet};

pub use gpu::GpuEngine;
pub use shaders::{ShaderSourceLoader, ShaderStage};
pub use software::SoftwareEngine;

/// Mount point for an engine: the render target it draws into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Surface {
    pub label: String,
    pub width: u32,
    pub height: u32,
}

impl Surface {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width,
            height,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "surface '{}' must have positive size, got {}x{}",
                self.label,
                self.width,
                self.height
            );
        }
        Ok(())
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height.max(1) as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClearColor {
    pub rgb: [f32; 3],
    pub alpha: f32,
}

impl ClearColor {
    pub const BLACK: Self = Self {
        rgb: [0.0, 0.0, 0.0],
        alpha: 1.0,
    };

    pub fn from_params(params: &ParameterSet) -> Self {
        let rgb = Rgb::from_hex(&params.text(ParamKey::BackgroundColor))
            .map(Rgb::as_array)
            .unwrap_or([0.0, 0.0, 0.0]);
        Self {
            rgb,
            alpha: params.number_f32(ParamKey::BackgroundAlpha).clamp(0.0, 1.0),
        }
    }

    pub fn with_alpha(self, alpha: f32) -> Self {
        Self { alpha, ..self }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub fov_degrees: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 8.0),
            target: Vec3::ZERO,
            fov_degrees: 45.0,
            aspect: 1.0,
            near: 0.1,
            far: 200.0,
        }
    }
}

impl Camera {
    pub fn sync_from(&mut self, params: &ParameterSet) {
        self.position = Vec3::from_array(params.vec3(
            ParamKey::CameraPosX,
            ParamKey::CameraPosY,
            ParamKey::CameraPosZ,
        ));
        self.target = Vec3::from_array(params.vec3(
            ParamKey::CameraTargetX,
            ParamKey::CameraTargetY,
            ParamKey::CameraTargetZ,
        ));
        self.fov_degrees = params.number_f32(ParamKey::CameraFov);
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, Vec3::Y)
    }

    pub fn projection(&self) -> Mat4 {
        Mat4::perspective(self.fov_degrees, self.aspect, self.near, self.far)
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection() * self.view()
    }
}

/// Optional engine features, queried once when the facade is constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EngineCapabilities {
    pub backend: &'static str,
    /// Clear alpha below 1.0 survives into captured frames.
    pub transparent_capture: bool,
    /// `resize` can change the render target for a capture.
    pub resizable: bool,
    pub wireframe: bool,
}

impl Default for EngineCapabilities {
    fn default() -> Self {
        Self {
            backend: "unknown",
            transparent_capture: false,
            resizable: false,
            wireframe: false,
        }
    }
}

/// The rendering engine the facade wraps. Implementations own the live
/// parameter bag; only the facade is expected to mutate it.
pub trait ShaderEngine {
    fn mount(&mut self, surface: &Surface) -> Result<()>;

    /// Releases every engine resource. Must be safe to call twice.
    fn dispose(&mut self);

    fn params(&self) -> &ParameterSet;

    fn params_mut(&mut self) -> &mut ParameterSet;

    /// Pushes the parameter bag into uniforms, material, clear color and camera.
    fn update_uniforms(&mut self) -> Result<()>;

    fn recreate_geometry(&mut self, detail: GeometryDetail) -> Result<GeometryStats>;

    fn geometry_stats(&self) -> Option<GeometryStats>;

    fn camera(&self) -> &Camera;

    fn camera_mut(&mut self) -> &mut Camera;

    fn clear_color(&self) -> ClearColor;

    fn set_clear_color(&mut self, color: ClearColor);

    fn shader_time(&self) -> f32;

    fn set_shader_time(&mut self, time: f32);

    /// Renders one frame synchronously.
    fn render(&mut self) -> Result<()>;

    /// Reads back the most recently rendered frame.
    fn capture_frame(&mut self) -> Result<RgbaImage>;

    fn shader_source(&self, stage: ShaderStage) -> Result<String>;

    /// Every stage composed into one WGSL module, noise library first.
    fn shader_module(&self) -> Result<String> {
        shaders::compose_stages(|stage| self.shader_source(stage))
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities::default()
    }

    fn size(&self) -> (u32, u32);

    fn resize(&mut self, _width: u32, _height: u32) -> Result<()> {
        bail!("engine does not support resizing its render target")
    }
}

/// Uniform block shared by both engines; mirrors `Uniforms` in vertex.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ShaderUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub model: [[f32; 4]; 4],
    pub camera_time: [f32; 4],
    pub light_dir: [f32; 4],
    pub lighting: [f32; 4],
    pub normal_noise: [f32; 4],
    pub color_noise: [f32; 4],
    pub color1: [f32; 4],
    pub color2: [f32; 4],
    pub color3: [f32; 4],
    pub color4: [f32; 4],
}

impl ShaderUniforms {
    pub fn from_params(params: &ParameterSet, camera: &Camera, time: f32) -> Self {
        let model = model_matrix(params);
        let palette = params.palette().map(|hex| {
            let [r, g, b] = Rgb::from_hex(&hex).map(Rgb::as_array).unwrap_or([0.0; 3]);
            [r, g, b, 1.0]
        });
        let [lx, ly, lz] = params.vec3(
            ParamKey::LightDirX,
            ParamKey::LightDirY,
            ParamKey::LightDirZ,
        );
        let position = camera.position;

        Self {
            view_proj: camera.view_projection().cols,
            model: model.cols,
            camera_time: [position.x, position.y, position.z, time],
            light_dir: [lx, ly, lz, params.number_f32(ParamKey::DiffuseIntensity)],
            lighting: [
                params.number_f32(ParamKey::AmbientIntensity),
                params.number_f32(ParamKey::RimLightIntensity),
                params.number_f32(ParamKey::GradientShift),
                params.gradient_mode().index() as f32,
            ],
            normal_noise: [
                params.number_f32(ParamKey::NormalNoiseScaleX),
                params.number_f32(ParamKey::NormalNoiseScaleY),
                params.number_f32(ParamKey::NormalNoiseSpeed),
                params.number_f32(ParamKey::NormalNoiseStrength),
            ],
            color_noise: [
                params.number_f32(ParamKey::ColorNoiseScale),
                params.number_f32(ParamKey::ColorNoiseSpeed),
                if params.color_stops().is_some() { 1.0 } else { 0.0 },
                if params.flag(ParamKey::ShowWireframe) { 1.0 } else { 0.0 },
            ],
            color1: palette[0],
            color2: palette[1],
            color3: palette[2],
            color4: palette[3],
        }
    }
}

pub fn model_matrix(params: &ParameterSet) -> Mat4 {
    let [x, y, z] = params.vec3(ParamKey::RotationX, ParamKey::RotationY, ParamKey::RotationZ);
    Mat4::rotation_xyz(x, y, z)
}
