use std::num::NonZeroU32;
use std::sync::mpsc;

use anyhow::{anyhow, bail, Context, Result};
use image::RgbaImage;
use wgpu::util::DeviceExt;

use crate::engine::shaders::{ShaderSourceLoader, ShaderStage};
use crate::engine::{
    Camera, ClearColor, EngineCapabilities, ShaderEngine, ShaderUniforms, Surface,
};
use crate::geometry::{GeometryDetail, GeometryStats, MeshData, MeshVertex};
use crate::gradient::{stops_to_texture_data, GRADIENT_TEXTURE_WIDTH};
use crate::params::ParameterSet;

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

struct RenderTargets {
    width: u32,
    height: u32,
    color_texture: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    readback_buffer: wgpu::Buffer,
    unpadded_bytes_per_row: u32,
    padded_bytes_per_row: u32,
}

impl RenderTargets {
    fn new(device: &wgpu::Device, width: u32, height: u32) -> Result<Self> {
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let color_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gradient-studio-color-target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let depth_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gradient-studio-depth-target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        let depth_view = depth_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let unpadded_bytes_per_row = width
            .checked_mul(4)
            .ok_or_else(|| anyhow!("frame width overflow when computing row bytes"))?;
        let padded_bytes_per_row =
            align_to(unpadded_bytes_per_row, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gradient-studio-readback"),
            size: u64::from(padded_bytes_per_row) * u64::from(height),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            width,
            height,
            color_texture,
            color_view,
            depth_view,
            readback_buffer,
            unpadded_bytes_per_row,
            padded_bytes_per_row,
        })
    }
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
    stats: GeometryStats,
}

struct MountedState {
    targets: RenderTargets,
    pipeline: wgpu::RenderPipeline,
    uniform_buffer: wgpu::Buffer,
    gradient_texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
    mesh: Option<GpuMesh>,
    has_frame: bool,
}

/// Offscreen wgpu renderer for the WGSL shader trio.
pub struct GpuEngine {
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    params: ParameterSet,
    camera: Camera,
    clear_color: ClearColor,
    shader_time: f32,
    uniforms: ShaderUniforms,
    shaders: ShaderSourceLoader,
    mounted: Option<MountedState>,
}

impl GpuEngine {
    /// Acquires an adapter and device. Fails with "no suitable GPU adapter
    /// found" on machines without one.
    pub async fn new(params: ParameterSet, shaders: ShaderSourceLoader) -> Result<Self> {
        let instance = wgpu::Instance::default();
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: None,
            })
            .await
            .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;
        let adapter_name = adapter.get_info().name;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("gradient-studio-device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .context("failed to request wgpu device")?;
        tracing::info!(adapter = %adapter_name, "gpu engine ready");

        let camera = Camera::default();
        let uniforms = ShaderUniforms::from_params(&params, &camera, 0.0);
        Ok(Self {
            device,
            queue,
            adapter_name,
            clear_color: ClearColor::from_params(&params),
            params,
            camera,
            shader_time: 0.0,
            uniforms,
            shaders,
            mounted: None,
        })
    }

    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn mounted_state(&self) -> Result<&MountedState> {
        self.mounted
            .as_ref()
            .ok_or_else(|| anyhow!("gpu engine is not mounted"))
    }

    fn build_pipeline(
        &self,
        bind_group_layout: &wgpu::BindGroupLayout,
    ) -> Result<wgpu::RenderPipeline> {
        let source = self.shaders.compose_module()?;
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some("gradient-studio-shader"),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });
        let layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some("gradient-studio-pipeline-layout"),
                bind_group_layouts: &[bind_group_layout],
                push_constant_ranges: &[],
            });

        Ok(self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("gradient-studio-pipeline"),
                layout: Some(&layout),
                vertex: wgpu::VertexState {
                    module: &module,
                    entry_point: "vs_main",
                    buffers: &[wgpu::VertexBufferLayout {
                        array_stride: std::mem::size_of::<MeshVertex>() as wgpu::BufferAddress,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &wgpu::vertex_attr_array![
                            0 => Float32x3,
                            1 => Float32x3,
                            2 => Float32x2
                        ],
                    }],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    cull_mode: None,
                    ..wgpu::PrimitiveState::default()
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &module,
                    entry_point: "fs_main",
                    targets: &[Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
            }))
    }

    fn upload_gradient(&self) -> Result<()> {
        let (Some(state), Some(stops)) = (&self.mounted, self.params.color_stops()) else {
            return Ok(());
        };
        let data = stops_to_texture_data(stops, GRADIENT_TEXTURE_WIDTH)?;
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &state.gradient_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(GRADIENT_TEXTURE_WIDTH * 4),
                rows_per_image: Some(1),
            },
            wgpu::Extent3d {
                width: GRADIENT_TEXTURE_WIDTH,
                height: 1,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_frame(&self, targets: &RenderTargets) -> Result<Vec<u8>> {
        let buffer_slice = targets.readback_buffer.slice(..);
        let (sender, receiver) = mpsc::channel();

        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(wgpu::Maintain::Wait);

        receiver
            .recv()
            .map_err(|_| anyhow!("failed receiving GPU map callback"))?
            .context("GPU buffer mapping failed")?;

        let row_bytes = targets.unpadded_bytes_per_row as usize;
        let mapped = buffer_slice.get_mapped_range();
        let mut frame = vec![0_u8; row_bytes * targets.height as usize];
        for (row_index, chunk) in mapped
            .chunks(targets.padded_bytes_per_row as usize)
            .take(targets.height as usize)
            .enumerate()
        {
            let start = row_index * row_bytes;
            frame[start..start + row_bytes].copy_from_slice(&chunk[..row_bytes]);
        }

        drop(mapped);
        targets.readback_buffer.unmap();
        Ok(frame)
    }
}

impl ShaderEngine for GpuEngine {
    fn mount(&mut self, surface: &Surface) -> Result<()> {
        surface.validate()?;
        let targets = RenderTargets::new(&self.device, surface.width, surface.height)?;

        let bind_group_layout =
            self.device
                .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                    label: Some("gradient-studio-bind-group-layout"),
                    entries: &[
                        wgpu::BindGroupLayoutEntry {
                            binding: 0,
                            visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                            ty: wgpu::BindingType::Buffer {
                                ty: wgpu::BufferBindingType::Uniform,
                                has_dynamic_offset: false,
                                min_binding_size: wgpu::BufferSize::new(
                                    std::mem::size_of::<ShaderUniforms>() as u64,
                                ),
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 1,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: wgpu::TextureViewDimension::D2,
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: 2,
                            visibility: wgpu::ShaderStages::FRAGMENT,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ],
                });
        let pipeline = self.build_pipeline(&bind_group_layout)?;

        let uniform_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gradient-studio-uniforms"),
                contents: bytemuck::bytes_of(&self.uniforms),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let gradient_texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("gradient-studio-gradient"),
            size: wgpu::Extent3d {
                width: GRADIENT_TEXTURE_WIDTH,
                height: 1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let gradient_view = gradient_texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("gradient-studio-gradient-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("gradient-studio-bind-group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&gradient_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&sampler),
                },
            ],
        });

        self.mounted = Some(MountedState {
            targets,
            pipeline,
            uniform_buffer,
            gradient_texture,
            bind_group,
            mesh: None,
            has_frame: false,
        });
        self.update_uniforms()?;
        tracing::debug!(
            surface = %surface.label,
            width = surface.width,
            height = surface.height,
            "gpu engine mounted"
        );
        Ok(())
    }

    fn dispose(&mut self) {
        if self.mounted.take().is_some() {
            tracing::debug!("gpu engine disposed");
        }
    }

    fn params(&self) -> &ParameterSet {
        &self.params
    }

    fn params_mut(&mut self) -> &mut ParameterSet {
        &mut self.params
    }

    fn update_uniforms(&mut self) -> Result<()> {
        let (width, height) = self.size();
        self.camera.sync_from(&self.params);
        if width > 0 && height > 0 {
            self.camera.aspect = width as f32 / height as f32;
        }
        self.clear_color = ClearColor::from_params(&self.params);
        self.uniforms = ShaderUniforms::from_params(&self.params, &self.camera, self.shader_time);
        self.upload_gradient()
    }

    fn recreate_geometry(&mut self, detail: GeometryDetail) -> Result<GeometryStats> {
        let mesh = MeshData::build(&self.params, detail);
        let stats = mesh.stats();
        let index_count = u32::try_from(mesh.indices.len())
            .context("mesh index count exceeds u32 range")?;
        let vertex_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gradient-studio-vertices"),
                contents: bytemuck::cast_slice(&mesh.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index_buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("gradient-studio-indices"),
                contents: bytemuck::cast_slice(&mesh.indices),
                usage: wgpu::BufferUsages::INDEX,
            });

        let state = self
            .mounted
            .as_mut()
            .ok_or_else(|| anyhow!("cannot build geometry before the engine is mounted"))?;
        state.mesh = Some(GpuMesh {
            vertex_buffer,
            index_buffer,
            index_count,
            stats,
        });
        Ok(stats)
    }

    fn geometry_stats(&self) -> Option<GeometryStats> {
        self.mounted
            .as_ref()
            .and_then(|state| state.mesh.as_ref())
            .map(|mesh| mesh.stats)
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
        let state = self
            .mounted
            .as_mut()
            .ok_or_else(|| anyhow!("cannot render before the engine is mounted"))?;
        self.queue
            .write_buffer(&state.uniform_buffer, 0, bytemuck::bytes_of(&self.uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("gradient-studio-encoder"),
            });
        let [r, g, b] = self.clear_color.rgb;
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("gradient-studio-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &state.targets.color_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: f64::from(r),
                            g: f64::from(g),
                            b: f64::from(b),
                            a: f64::from(self.clear_color.alpha),
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &state.targets.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });

            if let Some(mesh) = &state.mesh {
                pass.set_pipeline(&state.pipeline);
                pass.set_bind_group(0, &state.bind_group, &[]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
        }

        let targets = &state.targets;
        let padded_bytes_per_row = NonZeroU32::new(targets.padded_bytes_per_row)
            .ok_or_else(|| anyhow!("invalid padded row size {}", targets.padded_bytes_per_row))?;
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &targets.color_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &targets.readback_buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row.get()),
                    rows_per_image: Some(targets.height),
                },
            },
            wgpu::Extent3d {
                width: targets.width,
                height: targets.height,
                depth_or_array_layers: 1,
            },
        );

        self.queue.submit(Some(encoder.finish()));
        state.has_frame = true;
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<RgbaImage> {
        let state = self.mounted_state()?;
        if !state.has_frame {
            bail!("no frame has been rendered yet");
        }
        let frame = self.read_frame(&state.targets)?;
        RgbaImage::from_raw(state.targets.width, state.targets.height, frame)
            .ok_or_else(|| anyhow!("captured frame has an unexpected size"))
    }

    fn shader_source(&self, stage: ShaderStage) -> Result<String> {
        self.shaders.load(stage)
    }

    fn capabilities(&self) -> EngineCapabilities {
        EngineCapabilities {
            backend: "gpu",
            transparent_capture: true,
            resizable: true,
            wireframe: false,
        }
    }

    fn size(&self) -> (u32, u32) {
        self.mounted
            .as_ref()
            .map(|state| (state.targets.width, state.targets.height))
            .unwrap_or((0, 0))
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            bail!("render target must have positive size, got {width}x{height}");
        }
        if self.size() == (width, height) {
            return Ok(());
        }
        let targets = RenderTargets::new(&self.device, width, height)?;
        let state = self
            .mounted
            .as_mut()
            .ok_or_else(|| anyhow!("cannot resize before the engine is mounted"))?;
        state.targets = targets;
        state.has_frame = false;
        self.camera.aspect = width as f32 / height as f32;
        self.uniforms.view_proj = self.camera.view_projection().cols;
        Ok(())
    }
}

fn align_to(value: u32, alignment: u32) -> u32 {
    let mask = alignment - 1;
    (value + mask) & !mask
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_alignment_rounds_up_to_copy_alignment() {
        assert_eq!(align_to(4, 256), 256);
        assert_eq!(align_to(256, 256), 256);
        assert_eq!(align_to(1028, 256), 1280);
    }
}
