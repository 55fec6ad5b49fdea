//! wgpu implementation of [`RenderBackend`].
//!
//! Render-target descriptors are realised on first use and cached by their [`GpuHandle`] key;
//! allocations whose descriptors were disposed or dropped are released at the next
//! `begin_frame`. Effect programs compile to one pipeline per program key and target shape,
//! materials to one pipeline per material version and target shape.
//!
//! All draws of a frame are recorded into one command encoder, submitted by `end_frame`.
//!
//! [`GpuHandle`]: crate::render_target::GpuHandle

mod context;
mod pipelines;
mod resources;

pub use context::GpuContext;

use std::collections::HashMap;

use pipelines::{
    CameraUniforms, FullscreenKey, FullscreenPipeline, MeshKey, ModelUniforms, SceneLayouts,
};
use resources::{Fallbacks, ResourceCache, UniformArena};

use super::{FullscreenDraw, RenderBackend, SceneDraw};
use crate::effects::TextureSource;
use crate::gbuffer::channel;
use crate::pass::RendererInfo;
use crate::render_target::{RenderTarget, TextureFilter};

struct Frame {
    encoder: wgpu::CommandEncoder,
    /// `None` when the surface could not be acquired; screen draws are dropped.
    surface: Option<(wgpu::SurfaceTexture, wgpu::TextureView)>,
}

struct ScreenDepth {
    size: (u32, u32),
    view: wgpu::TextureView,
    _texture: wgpu::Texture,
}

/// Views one draw renders into: (render, resolve) per color attachment, then depth.
struct Attachments<'a> {
    colors: Vec<(&'a wgpu::TextureView, Option<&'a wgpu::TextureView>)>,
    depth: Option<(wgpu::TextureFormat, &'a wgpu::TextureView)>,
}

pub struct WgpuBackend {
    gpu: GpuContext,
    info: RendererInfo,
    resources: ResourceCache,
    arena: UniformArena,
    fallbacks: Fallbacks,
    linear_sampler: wgpu::Sampler,
    nearest_sampler: wgpu::Sampler,
    scene_layouts: SceneLayouts,
    fullscreen: HashMap<FullscreenKey, Option<FullscreenPipeline>>,
    meshes: HashMap<MeshKey, Option<wgpu::RenderPipeline>>,
    screen_depth: Option<ScreenDepth>,
    frame: Option<Frame>,
}

fn sampler(device: &wgpu::Device, filter: wgpu::FilterMode) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("input sampler"),
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

impl WgpuBackend {
    pub fn new(gpu: GpuContext) -> Self {
        let info = RendererInfo {
            capabilities: gpu.capabilities(),
            output_color_space: gpu.output_color_space(),
        };
        log::debug!("renderer: {info:?}");
        let device = &gpu.device;
        Self {
            resources: ResourceCache::default(),
            arena: UniformArena::new(device),
            fallbacks: Fallbacks::new(device),
            linear_sampler: sampler(device, wgpu::FilterMode::Linear),
            nearest_sampler: sampler(device, wgpu::FilterMode::Nearest),
            scene_layouts: SceneLayouts::new(device),
            fullscreen: HashMap::new(),
            meshes: HashMap::new(),
            screen_depth: None,
            frame: None,
            info,
            gpu,
        }
    }

    pub fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    /// Resizes the window surface. The pipeline is resized separately.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.gpu.resize(width, height);
    }

    fn screen_size(&self) -> (u32, u32) {
        (self.gpu.width(), self.gpu.height())
    }

    fn ensure_screen_depth(&mut self) {
        let size = self.screen_size();
        if self.screen_depth.as_ref().is_some_and(|d| d.size == size) {
            return;
        }
        let texture = self.gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("screen depth"),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        self.screen_depth = Some(ScreenDepth {
            size,
            view: texture.create_view(&Default::default()),
            _texture: texture,
        });
    }

    /// Formats and sample count a draw into `target` renders with.
    fn target_shape(&self, target: Option<&RenderTarget>) -> Option<(Vec<wgpu::TextureFormat>, u32)> {
        match target {
            None => Some((vec![self.gpu.config.format], 1)),
            Some(target) => self
                .resources
                .target(target)
                .map(|r| (r.formats().to_vec(), r.samples())),
        }
    }

    /// Resolves the views a draw into `target` writes to. `None` when the screen is unavailable.
    fn attachments<'a>(
        resources: &'a ResourceCache,
        surface: Option<&'a (wgpu::SurfaceTexture, wgpu::TextureView)>,
        screen_depth: Option<&'a ScreenDepth>,
        target: Option<&RenderTarget>,
    ) -> Option<Attachments<'a>> {
        match target {
            None => {
                let (_, view) = surface?;
                Some(Attachments {
                    colors: vec![(view, None)],
                    depth: screen_depth.map(|d| (wgpu::TextureFormat::Depth32Float, &d.view)),
                })
            }
            Some(target) => {
                let realized = resources.target(target)?;
                let depth = match target.depth_texture() {
                    Some(depth) => resources.depth(&depth).map(|d| (d.format, &d.view)),
                    None => realized.depth.as_ref().map(|(format, view)| (*format, view)),
                };
                Some(Attachments {
                    colors: realized.colors.iter().map(|c| c.render_views()).collect(),
                    depth,
                })
            }
        }
    }
}

impl RenderBackend for WgpuBackend {
    fn renderer_info(&self) -> RendererInfo {
        self.info
    }

    fn begin_frame(&mut self) {
        debug_assert!(self.frame.is_none(), "begin_frame called twice");
        self.resources.prune();
        self.arena.reset();

        let surface = match self.gpu.surface.get_current_texture() {
            Ok(texture) => {
                let view = texture.texture.create_view(&Default::default());
                Some((texture, view))
            }
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                log::debug!("surface lost, reconfiguring");
                let (width, height) = self.screen_size();
                self.gpu.resize(width, height);
                None
            }
            Err(e) => {
                log::warn!("skipping frame: {e}");
                None
            }
        };
        let encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("frame"),
            });
        self.frame = Some(Frame { encoder, surface });
    }

    fn draw_fullscreen(&mut self, draw: FullscreenDraw<'_>) {
        let device = &self.gpu.device;
        for target in [draw.input, draw.g_buffer, draw.target].into_iter().flatten() {
            self.resources.realize_target(device, target);
        }
        if let Some(depth) = draw.depth {
            self.resources.realize_depth(device, depth);
        }

        let input = draw
            .input
            .and_then(|t| self.resources.target(t))
            .and_then(|r| r.colors.first());
        let input_filterable = input.is_none_or(|c| resources::is_filterable(c.format));
        let Some((formats, samples)) = self.target_shape(draw.target) else {
            return;
        };
        let key = FullscreenKey {
            program: draw.program.key,
            formats,
            samples,
            input_filterable,
        };
        let pipeline = self
            .fullscreen
            .entry(key)
            .or_insert_with_key(|key| pipelines::fullscreen_pipeline(device, draw.program, key));
        let Some(pipeline) = pipeline.as_ref() else {
            return;
        };

        let uniforms = draw.program.uniform_bytes();
        let offset = self.arena.push(device, &self.gpu.queue, &uniforms);

        let sampler = match input {
            Some(c) if input_filterable && c.filter == TextureFilter::Linear => &self.linear_sampler,
            None => &self.linear_sampler,
            _ => &self.nearest_sampler,
        };
        let views: Vec<(u32, &wgpu::TextureView)> = draw
            .program
            .textures
            .iter()
            .map(|binding| {
                let view = match &binding.source {
                    TextureSource::InputColor => input.map(|c| &c.view),
                    TextureSource::GBuffer(name) => draw.g_buffer.and_then(|g| {
                        let (index, _) = g.attachment(name)?;
                        Some(&self.resources.target(g)?.colors.get(index)?.view)
                    }),
                    TextureSource::Depth => draw
                        .depth
                        .and_then(|d| self.resources.depth(d))
                        .map(|d| &d.sample_view),
                };
                let fallback = match binding.source {
                    TextureSource::Depth => &self.fallbacks.depth,
                    _ => &self.fallbacks.color,
                };
                (binding.binding, view.unwrap_or(fallback))
            })
            .collect();
        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: crate::effects::UNIFORM_BINDING,
                resource: self.arena.binding(uniforms.len() as u64),
            },
            wgpu::BindGroupEntry {
                binding: crate::effects::SAMPLER_BINDING,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ];
        entries.extend(views.iter().map(|(binding, view)| wgpu::BindGroupEntry {
            binding: *binding,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(draw.label),
            layout: &pipeline.layout,
            entries: &entries,
        });

        let Some(frame) = self.frame.as_mut() else {
            log::warn!("{}: drawn outside a frame", draw.label);
            return;
        };
        let Some(attachments) = Self::attachments(&self.resources, frame.surface.as_ref(), None, draw.target)
        else {
            return;
        };
        let colors: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
            .colors
            .iter()
            .map(|(view, resolve_target)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: *resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(draw.label),
            color_attachments: &colors,
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipeline.pipeline);
        pass.set_bind_group(0, &bind_group, &[offset]);
        pass.draw(0..3, 0..1);
    }

    fn draw_scene(&mut self, draw: SceneDraw<'_>) {
        let device = &self.gpu.device;
        match draw.target {
            Some(target) => self.resources.realize_target(device, target),
            None => self.ensure_screen_depth(),
        }
        let device = &self.gpu.device;
        let Some((formats, samples)) = self.target_shape(draw.target) else {
            return;
        };
        let outputs: Vec<String> = match draw.target {
            Some(target) => target.attachments.iter().map(|a| a.name.clone()).collect(),
            None => vec![channel::COLOR.to_string()],
        };
        let depth_format = match draw.target {
            Some(target) => match target.depth_texture() {
                Some(depth) => self.resources.depth(&depth).map(|d| d.format),
                None => self
                    .resources
                    .target(target)
                    .and_then(|r| r.depth.as_ref().map(|(format, _)| *format)),
            },
            None => Some(wgpu::TextureFormat::Depth32Float),
        };

        let visible = draw.scene.visible_meshes(draw.layers);
        self.arena.reserve(
            device,
            self.arena.aligned(size_of::<CameraUniforms>() as u64)
                + visible.len() as u64 * self.arena.aligned(size_of::<ModelUniforms>() as u64),
        );

        let camera = draw.camera;
        let view = camera.view();
        let camera_uniforms = CameraUniforms {
            view_proj: camera.view_projection().to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            camera_pos: camera.position.to_array(),
            time: draw.time,
        };
        let camera_offset =
            self.arena
                .push(device, &self.gpu.queue, bytemuck::bytes_of(&camera_uniforms));

        struct MeshDraw {
            pipeline: MeshKey,
            mesh: std::rc::Rc<crate::scene::MeshData>,
            offset: u32,
        }
        let mut draws = Vec::new();
        for (world, renderer) in visible {
            let key = MeshKey {
                material: renderer.material.key(),
                version: renderer.material.version(),
                outputs: outputs.clone(),
                formats: formats.clone(),
                depth: depth_format,
                samples,
            };
            if !self.meshes.contains_key(&key) {
                self.meshes.retain(|k, _| {
                    k.material != key.material || k.version == key.version
                });
                let pipeline = pipelines::mesh_pipeline(
                    device,
                    &self.scene_layouts,
                    &renderer.material,
                    &key,
                );
                self.meshes.insert(key.clone(), pipeline);
            }
            self.resources.realize_mesh(device, &renderer.mesh);

            let params = renderer.material.params();
            let model = ModelUniforms {
                model: world.to_cols_array_2d(),
                normal_matrix: world.inverse().transpose().to_cols_array_2d(),
                base_color: params.base_color.to_array(),
                emissive: params.emissive.to_array(),
                roughness: params.roughness,
                metalness: params.metalness,
                occlusion: params.occlusion,
                _pad: [0.0; 2],
            };
            let offset = self
                .arena
                .push(device, &self.gpu.queue, bytemuck::bytes_of(&model));
            draws.push(MeshDraw {
                pipeline: key,
                mesh: renderer.mesh,
                offset,
            });
        }

        let camera_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("camera"),
            layout: &self.scene_layouts.camera,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.arena.binding(size_of::<CameraUniforms>() as u64),
            }],
        });
        let model_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("model"),
            layout: &self.scene_layouts.model,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: self.arena.binding(size_of::<ModelUniforms>() as u64),
            }],
        });

        let Some(frame) = self.frame.as_mut() else {
            log::warn!("{}: drawn outside a frame", draw.label);
            return;
        };
        let Some(attachments) = Self::attachments(
            &self.resources,
            frame.surface.as_ref(),
            self.screen_depth.as_ref(),
            draw.target,
        ) else {
            return;
        };
        let background = draw.scene.background.as_dvec4();
        let background = wgpu::Color {
            r: background.x,
            g: background.y,
            b: background.z,
            a: background.w,
        };
        let colors: Vec<Option<wgpu::RenderPassColorAttachment>> = attachments
            .colors
            .iter()
            .zip(&outputs)
            .map(|((view, resolve_target), name)| {
                let load = match (draw.clear_color, name.as_str()) {
                    (false, _) => wgpu::LoadOp::Load,
                    (true, channel::COLOR) => wgpu::LoadOp::Clear(background),
                    (true, _) => wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                };
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: *resolve_target,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth_stencil_attachment =
            attachments
                .depth
                .map(|(format, view)| wgpu::RenderPassDepthStencilAttachment {
                    view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(0),
                        store: wgpu::StoreOp::Store,
                    }),
                });
        let mut pass = frame.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(draw.label),
            color_attachments: &colors,
            depth_stencil_attachment,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_bind_group(0, &camera_group, &[camera_offset]);
        for mesh_draw in &draws {
            let Some(Some(pipeline)) = self.meshes.get(&mesh_draw.pipeline) else {
                continue;
            };
            let Some((vertices, indices, count)) = self.resources.mesh(&mesh_draw.mesh) else {
                continue;
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(1, &model_group, &[mesh_draw.offset]);
            pass.set_vertex_buffer(0, vertices.slice(..));
            pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..count, 0, 0..1);
        }
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        self.gpu.queue.submit(std::iter::once(frame.encoder.finish()));
        if let Some((texture, _)) = frame.surface {
            texture.present();
        }
    }
}
