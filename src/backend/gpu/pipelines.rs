//! Pipeline compilation for effect programs and scene materials.

use std::borrow::Cow;
use std::num::NonZeroU64;

use crate::effects::{ShaderProgram, TextureSource};
use crate::scene::{Material, MaterialCompileContext, Vertex3d};

/// Per-frame camera block of the scene shader.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub time: f32,
}

/// Per-mesh block of the scene shader.
#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ModelUniforms {
    pub model: [[f32; 4]; 4],
    pub normal_matrix: [[f32; 4]; 4],
    pub base_color: [f32; 4],
    pub emissive: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub occlusion: f32,
    pub _pad: [f32; 2],
}

const VERTEX_LAYOUT: wgpu::VertexBufferLayout<'static> = wgpu::VertexBufferLayout {
    array_stride: std::mem::size_of::<Vertex3d>() as wgpu::BufferAddress,
    step_mode: wgpu::VertexStepMode::Vertex,
    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3, 2 => Float32x2],
};

/// Everything a cached fullscreen pipeline depends on besides the program source.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FullscreenKey {
    pub program: u64,
    pub formats: Vec<wgpu::TextureFormat>,
    pub samples: u32,
    pub input_filterable: bool,
}

pub struct FullscreenPipeline {
    pub pipeline: wgpu::RenderPipeline,
    pub layout: wgpu::BindGroupLayout,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct MeshKey {
    pub material: usize,
    pub version: u64,
    pub outputs: Vec<String>,
    pub formats: Vec<wgpu::TextureFormat>,
    pub depth: Option<wgpu::TextureFormat>,
    pub samples: u32,
}

fn uniform_entry(binding: u32, size: u64) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: true,
            min_binding_size: NonZeroU64::new(size),
        },
        count: None,
    }
}

/// Only attachment 0 receives the program output; the rest are masked.
fn color_targets(formats: &[wgpu::TextureFormat]) -> Vec<Option<wgpu::ColorTargetState>> {
    formats
        .iter()
        .enumerate()
        .map(|(i, &format)| {
            Some(wgpu::ColorTargetState {
                format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: if i == 0 {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                },
            })
        })
        .collect()
}

/// Runs `build` inside a validation error scope. Invalid WGSL is logged and yields `None`
/// instead of reaching the uncaptured-error handler.
fn validated<T>(device: &wgpu::Device, label: &str, build: impl FnOnce() -> T) -> Option<T> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = build();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => {
            log::error!("{label}: pipeline creation failed: {error}");
            None
        }
        None => Some(value),
    }
}

pub fn fullscreen_pipeline(
    device: &wgpu::Device,
    program: &ShaderProgram,
    key: &FullscreenKey,
) -> Option<FullscreenPipeline> {
    validated(device, &program.label, || {
        let mut entries = vec![
            uniform_entry(crate::effects::UNIFORM_BINDING, u64::from(program.layout.size())),
            wgpu::BindGroupLayoutEntry {
                binding: crate::effects::SAMPLER_BINDING,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(if key.input_filterable {
                    wgpu::SamplerBindingType::Filtering
                } else {
                    wgpu::SamplerBindingType::NonFiltering
                }),
                count: None,
            },
        ];
        for texture in &program.textures {
            let sample_type = match texture.source {
                TextureSource::Depth => wgpu::TextureSampleType::Depth,
                TextureSource::InputColor => wgpu::TextureSampleType::Float {
                    filterable: key.input_filterable,
                },
                TextureSource::GBuffer(_) => wgpu::TextureSampleType::Float { filterable: false },
            };
            entries.push(wgpu::BindGroupLayoutEntry {
                binding: texture.binding,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    sample_type,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
                count: None,
            });
        }
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(&program.label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(&program.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&program.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&program.vertex)),
        });
        let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&program.label),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(&program.fragment)),
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&program.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vertex,
                entry_point: Some("vs"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &fragment,
                entry_point: Some("fs"),
                targets: &color_targets(&key.formats),
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState {
                count: key.samples,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        });
        FullscreenPipeline { pipeline, layout }
    })
}

/// Bind group layouts shared by every material pipeline.
pub struct SceneLayouts {
    pub camera: wgpu::BindGroupLayout,
    pub model: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

impl SceneLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let camera = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("camera uniforms"),
            entries: &[uniform_entry(0, size_of::<CameraUniforms>() as u64)],
        });
        let model = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("model uniforms"),
            entries: &[uniform_entry(0, size_of::<ModelUniforms>() as u64)],
        });
        let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("scene"),
            bind_group_layouts: &[&camera, &model],
            push_constant_ranges: &[],
        });
        Self {
            camera,
            model,
            pipeline,
        }
    }
}

pub fn mesh_pipeline(
    device: &wgpu::Device,
    layouts: &SceneLayouts,
    material: &Material,
    key: &MeshKey,
) -> Option<wgpu::RenderPipeline> {
    let source = material.compile(&MaterialCompileContext {
        outputs: &key.outputs,
    });
    validated(device, material.name(), || {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(material.name()),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(material.name()),
            layout: Some(&layouts.pipeline),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs"),
                buffers: &[VERTEX_LAYOUT],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs"),
                targets: &targets,
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: key.depth.map(|format| wgpu::DepthStencilState {
                format,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: key.samples,
                ..Default::default()
            },
            multiview: None,
            cache: None,
        })
    })
}
