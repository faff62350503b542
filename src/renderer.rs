// renderer.rs — wgpu scene backend: one projector-textured mesh per surface, plus door hotspots

use anyhow::{anyhow, Context};
use image::RgbaImage;
use std::collections::BTreeMap;
use wgpu::util::DeviceExt;
use winit::window::Window;

use crate::backend::SceneBackend;
use crate::camera::ViewCamera;
use crate::mesh::build_sphere;
use crate::navigation::Hotspot;
use crate::surface::{ProjectionSurface, ProjectorUniforms, SurfaceId};
use crate::tiles::TextureRegion;

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8UnormSrgb;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

/// GPU side of one projection surface.
struct GpuSurface {
    mesh: GpuMesh,
    uniform_buffer: wgpu::Buffer,
    preview: GpuTexture,
    atlas: GpuTexture,
    bind_group: wgpu::BindGroup,
}

pub struct Renderer {
    surface: wgpu::Surface,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    pub size: winit::dpi::PhysicalSize<u32>,
    depth: GpuTexture,

    projector_pipeline: wgpu::RenderPipeline,
    hotspot_pipeline: wgpu::RenderPipeline,
    surface_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,

    camera_buffer: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,

    // creation order is draw order: the incoming surface blends over the outgoing one
    surfaces: BTreeMap<SurfaceId, GpuSurface>,
    hotspots: Option<GpuMesh>,
}

fn vertex_layout() -> wgpu::VertexBufferLayout<'static> {
    wgpu::VertexBufferLayout {
        array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
        step_mode: wgpu::VertexStepMode::Vertex,
        attributes: &[wgpu::VertexAttribute {
            offset: 0,
            shader_location: 0,
            format: wgpu::VertexFormat::Float32x3,
        }],
    }
}

fn create_depth(device: &wgpu::Device, config: &wgpu::SurfaceConfiguration) -> GpuTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("depth_texture"),
        size: wgpu::Extent3d {
            width: config.width.max(1),
            height: config.height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    GpuTexture { texture, view }
}

fn create_mesh(device: &wgpu::Device, label: &str, positions: &[[f32; 3]], indices: &[u32]) -> GpuMesh {
    let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(positions),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(indices),
        usage: wgpu::BufferUsages::INDEX,
    });
    GpuMesh {
        vertex_buffer,
        index_buffer,
        index_count: indices.len() as u32,
    }
}

impl Renderer {
    pub async fn new(window: &Window) -> anyhow::Result<Self> {
        let size = window.inner_size();
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // SAFETY: the window outlives the renderer; both live for the whole event loop.
        let surface = unsafe { instance.create_surface(window) }.context("creating window surface")?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| anyhow!("no compatible GPU adapter"))?;

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    features: wgpu::Features::empty(),
                    limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    label: None,
                },
                None,
            )
            .await
            .context("requesting GPU device")?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("surface reports no formats"))?;

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
        };
        surface.configure(&device, &config);
        let depth = create_depth(&device, &config);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            address_mode_u: wgpu::AddressMode::Repeat, // panoramas wrap horizontally
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Buffer"),
            contents: bytemuck::cast_slice(&[CameraUniform {
                view_proj: glam::Mat4::IDENTITY.to_cols_array_2d(),
            }]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let camera_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some("camera_bind_group_layout"),
        });

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &camera_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
            label: Some("camera_bind_group"),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        };
        let surface_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    // Projector uniforms
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1), // preview
                texture_entry(2), // tile atlas
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
            label: Some("surface_bind_group_layout"),
        });

        let shader = device.create_shader_module(wgpu::include_wgsl!("shader_projector.wgsl"));

        let projector_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Projector Pipeline Layout"),
            bind_group_layouts: &[&camera_layout, &surface_layout],
            push_constant_ranges: &[],
        });
        let hotspot_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Hotspot Pipeline Layout"),
            bind_group_layouts: &[&camera_layout],
            push_constant_ranges: &[],
        });

        let pipeline = |label: &str, layout: &wgpu::PipelineLayout, vs: &str, fs: &str| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: vs,
                    buffers: &[vertex_layout()],
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: fs,
                    targets: &[Some(wgpu::ColorTargetState {
                        format: config.format,
                        blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None, // surfaces are seen from inside and outside
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: Some(wgpu::DepthStencilState {
                    format: DEPTH_FORMAT,
                    depth_write_enabled: true,
                    depth_compare: wgpu::CompareFunction::Less,
                    stencil: wgpu::StencilState::default(),
                    bias: wgpu::DepthBiasState::default(),
                }),
                multisample: wgpu::MultisampleState {
                    count: 1,
                    mask: !0,
                    alpha_to_coverage_enabled: false,
                },
                multiview: None,
            })
        };
        let projector_pipeline = pipeline("Projector Pipeline", &projector_layout, "vs_main", "fs_main");
        let hotspot_pipeline = pipeline("Hotspot Pipeline", &hotspot_layout, "vs_solid", "fs_solid");

        Ok(Self {
            surface,
            device,
            queue,
            config,
            size,
            depth,
            projector_pipeline,
            hotspot_pipeline,
            surface_layout,
            sampler,
            camera_buffer,
            camera_bind_group,
            surfaces: BTreeMap::new(),
            hotspots: None,
        })
    }

    pub fn resize(&mut self, new_size: winit::dpi::PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);
            self.depth = create_depth(&self.device, &self.config);
        }
    }

    pub fn aspect(&self) -> f32 {
        self.config.width as f32 / self.config.height.max(1) as f32
    }

    fn create_texture(&self, label: &str, width: u32, height: u32) -> GpuTexture {
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            label: Some(label),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        GpuTexture { texture, view }
    }

    fn write_region(&self, texture: &wgpu::Texture, region: TextureRegion, rgba: &[u8]) {
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            rgba,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(4 * region.width),
                rows_per_image: Some(region.height),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn bind_group(&self, uniforms: &wgpu::Buffer, preview: &GpuTexture, atlas: &GpuTexture) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.surface_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: uniforms.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&preview.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&atlas.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            label: Some("surface_bind_group"),
        })
    }

    /// Scale an image down to fit the GPU's texture limit.
    fn fit_to_limits(&self, image: &RgbaImage) -> Option<RgbaImage> {
        let max = self.device.limits().max_texture_dimension_2d;
        let (w, h) = image.dimensions();
        if w <= max && h <= max {
            return None;
        }
        let scale = max as f32 / w.max(h) as f32;
        let (nw, nh) = (((w as f32 * scale) as u32).max(1), ((h as f32 * scale) as u32).max(1));
        log::warn!("image {w}x{h} exceeds GPU limit {max}, scaled to {nw}x{nh}");
        Some(image::imageops::resize(image, nw, nh, image::imageops::FilterType::Lanczos3))
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        let output = self.surface.get_current_texture()?;
        let view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Render Encoder"),
        });

        let mut first = true;
        let color_load = |first: bool| {
            if first {
                wgpu::LoadOp::Clear(wgpu::Color {
                    r: 0.1,
                    g: 0.1,
                    b: 0.1,
                    a: 1.0,
                })
            } else {
                wgpu::LoadOp::Load
            }
        };

        // One pass per surface with a fresh depth buffer, so each surface only occludes itself.
        let passes = self
            .surfaces
            .values()
            .map(|s| (Some(s), None))
            .chain(self.hotspots.iter().map(|h| (None, Some(h))));
        for (surface, hotspots) in passes {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(first),
                        store: true,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: false,
                    }),
                    stencil_ops: None,
                }),
            });
            first = false;

            pass.set_bind_group(0, &self.camera_bind_group, &[]);
            let mesh = match (surface, hotspots) {
                (Some(s), _) => {
                    pass.set_pipeline(&self.projector_pipeline);
                    pass.set_bind_group(1, &s.bind_group, &[]);
                    &s.mesh
                }
                (None, Some(h)) => {
                    pass.set_pipeline(&self.hotspot_pipeline);
                    h
                }
                (None, None) => continue,
            };
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }

        if first {
            // nothing to draw yet, still clear the frame
            let _ = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Clear Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: color_load(true),
                        store: true,
                    },
                })],
                depth_stencil_attachment: None,
            });
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}

impl SceneBackend for Renderer {
    fn create_surface(&mut self, surface: &ProjectionSurface) {
        let mesh = create_mesh(
            &self.device,
            "surface_mesh",
            &surface.geometry.positions,
            &surface.geometry.indices,
        );
        let uniform_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Projector Buffer"),
            contents: bytemuck::cast_slice(&[surface.material.uniforms()]),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        // Both textures start transparent: wgpu zero-initializes, and the blend shows nothing
        // until the preview or a tile lands.
        let preview = self.create_texture("preview_texture", 1, 1);
        let (aw, ah) = surface.atlas.dimensions();
        let atlas = self.create_texture("atlas_texture", aw, ah);
        let bind_group = self.bind_group(&uniform_buffer, &preview, &atlas);

        log::debug!(
            "surface {:?} ({}): {} triangles, atlas {aw}x{ah}",
            surface.id,
            surface.target,
            surface.geometry.triangle_count()
        );
        self.surfaces.insert(
            surface.id,
            GpuSurface {
                mesh,
                uniform_buffer,
                preview,
                atlas,
                bind_group,
            },
        );
    }

    fn update_uniforms(&mut self, id: SurfaceId, uniforms: &ProjectorUniforms) {
        if let Some(s) = self.surfaces.get(&id) {
            self.queue
                .write_buffer(&s.uniform_buffer, 0, bytemuck::cast_slice(&[*uniforms]));
        }
    }

    fn bind_preview(&mut self, id: SurfaceId, image: &RgbaImage) {
        if !self.surfaces.contains_key(&id) {
            return;
        }
        let scaled = self.fit_to_limits(image);
        let image = scaled.as_ref().unwrap_or(image);
        let (width, height) = image.dimensions();

        let preview = self.create_texture("preview_texture", width, height);
        self.write_region(&preview.texture, TextureRegion { x: 0, y: 0, width, height }, image.as_raw());

        let Some(s) = self.surfaces.get(&id) else {
            return;
        };
        let bind_group = self.bind_group(&s.uniform_buffer, &preview, &s.atlas);
        if let Some(s) = self.surfaces.get_mut(&id) {
            s.preview.texture.destroy();
            s.preview = preview;
            s.bind_group = bind_group;
        }
    }

    fn write_atlas(&mut self, id: SurfaceId, region: TextureRegion, rgba: &[u8]) {
        if let Some(s) = self.surfaces.get(&id) {
            self.write_region(&s.atlas.texture, region, rgba);
        }
    }

    fn set_hotspots(&mut self, hotspots: &[Hotspot]) {
        if let Some(old) = self.hotspots.take() {
            old.vertex_buffer.destroy();
            old.index_buffer.destroy();
        }
        if hotspots.is_empty() {
            return;
        }

        let mut positions = Vec::new();
        let mut indices = Vec::new();
        for h in hotspots {
            let sphere = build_sphere(h.position, h.radius, 8, 12);
            let base = positions.len() as u32;
            positions.extend_from_slice(&sphere.positions);
            indices.extend(sphere.indices.iter().map(|i| i + base));
        }
        self.hotspots = Some(create_mesh(&self.device, "hotspot_mesh", &positions, &indices));
    }

    fn dispose_surface(&mut self, id: SurfaceId) {
        if let Some(s) = self.surfaces.remove(&id) {
            s.mesh.vertex_buffer.destroy();
            s.mesh.index_buffer.destroy();
            s.uniform_buffer.destroy();
            s.preview.texture.destroy();
            s.atlas.texture.destroy();
            log::debug!("surface {:?} released", id);
        }
    }

    fn set_camera(&mut self, camera: &ViewCamera) {
        let uniform = CameraUniform {
            view_proj: camera.view_proj().to_cols_array_2d(),
        };
        self.queue
            .write_buffer(&self.camera_buffer, 0, bytemuck::cast_slice(&[uniform]));
    }
}
