//! GPU allocations behind render-target descriptors, plus the per-frame uniform arena.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::rc::{Rc, Weak};

use wgpu::util::DeviceExt;

use crate::render_target::{
    ColorSpace, DepthFormat, DepthTexture, GpuHandle, RenderTarget, TextureFilter, TextureFormat,
    TextureInfo,
};
use crate::scene::MeshData;

/// wgpu format for a color attachment. 8-bit sRGB attachments use the `Srgb` variant so that
/// shaders always read and write linear values.
pub fn color_format(info: &TextureInfo) -> wgpu::TextureFormat {
    match (info.format, info.color_space) {
        (TextureFormat::Rgba8Unorm, ColorSpace::Srgb) => wgpu::TextureFormat::Rgba8UnormSrgb,
        (TextureFormat::Rgba8Unorm, _) => wgpu::TextureFormat::Rgba8Unorm,
        (TextureFormat::Rgba16Float, _) => wgpu::TextureFormat::Rgba16Float,
        (TextureFormat::Rgba32Float, _) => wgpu::TextureFormat::Rgba32Float,
    }
}

pub fn depth_format(format: DepthFormat) -> wgpu::TextureFormat {
    match format {
        DepthFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        DepthFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
    }
}

/// 32-bit float textures cannot be sampled with filtering without an optional feature.
pub fn is_filterable(format: wgpu::TextureFormat) -> bool {
    format != wgpu::TextureFormat::Rgba32Float
}

fn texture(
    device: &wgpu::Device,
    label: &str,
    (width, height): (u32, u32),
    samples: u32,
    format: wgpu::TextureFormat,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: samples,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage,
        view_formats: &[],
    })
}

const SAMPLED_ATTACHMENT: wgpu::TextureUsages =
    wgpu::TextureUsages::RENDER_ATTACHMENT.union(wgpu::TextureUsages::TEXTURE_BINDING);

/// What a realised target was allocated for; a mismatch means reallocation.
#[derive(Clone, Debug, PartialEq, Eq)]
struct TargetShape {
    size: (u32, u32),
    samples: u32,
    formats: Vec<wgpu::TextureFormat>,
    depth: Option<wgpu::TextureFormat>,
}

impl TargetShape {
    fn of(target: &RenderTarget, multisample: bool) -> Self {
        let depth = if target.depth_texture.is_some() {
            None
        } else if target.stencil_buffer {
            Some(wgpu::TextureFormat::Depth24PlusStencil8)
        } else if target.depth_buffer {
            Some(wgpu::TextureFormat::Depth32Float)
        } else {
            None
        };
        Self {
            size: (target.width, target.height),
            samples: if multisample { target.samples.max(1) } else { 1 },
            formats: target.attachments.iter().map(color_format).collect(),
            depth,
        }
    }
}

pub struct ColorAttachment {
    pub format: wgpu::TextureFormat,
    pub filter: TextureFilter,
    /// Single-sampled view; the resolve target when multisampled.
    pub view: wgpu::TextureView,
    pub msaa_view: Option<wgpu::TextureView>,
    _texture: wgpu::Texture,
    _msaa: Option<wgpu::Texture>,
}

impl ColorAttachment {
    /// View to render into and the view to resolve into, if any.
    pub fn render_views(&self) -> (&wgpu::TextureView, Option<&wgpu::TextureView>) {
        match &self.msaa_view {
            Some(msaa) => (msaa, Some(&self.view)),
            None => (&self.view, None),
        }
    }
}

pub struct RealizedTarget {
    handle: GpuHandle,
    shape: TargetShape,
    pub colors: Vec<ColorAttachment>,
    /// Internal depth buffer, used when no sampleable depth texture is attached.
    pub depth: Option<(wgpu::TextureFormat, wgpu::TextureView)>,
    _depth_texture: Option<wgpu::Texture>,
}

impl RealizedTarget {
    fn new(device: &wgpu::Device, target: &RenderTarget, shape: TargetShape) -> Self {
        let colors = target
            .attachments
            .iter()
            .zip(&shape.formats)
            .map(|(info, &format)| {
                let label = format!("{}:{}", target.label, info.name);
                let resolved = texture(device, &label, shape.size, 1, format, SAMPLED_ATTACHMENT);
                let msaa = (shape.samples > 1).then(|| {
                    texture(
                        device,
                        &label,
                        shape.size,
                        shape.samples,
                        format,
                        wgpu::TextureUsages::RENDER_ATTACHMENT,
                    )
                });
                ColorAttachment {
                    format,
                    filter: info.filter,
                    view: resolved.create_view(&Default::default()),
                    msaa_view: msaa.as_ref().map(|t| t.create_view(&Default::default())),
                    _texture: resolved,
                    _msaa: msaa,
                }
            })
            .collect();
        let depth_texture = shape.depth.map(|format| {
            texture(
                device,
                &format!("{}:depth", target.label),
                shape.size,
                shape.samples,
                format,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            )
        });
        Self {
            handle: target.handle().clone(),
            colors,
            depth: depth_texture
                .as_ref()
                .zip(shape.depth)
                .map(|(t, format)| (format, t.create_view(&Default::default()))),
            _depth_texture: depth_texture,
            shape,
        }
    }

    pub fn samples(&self) -> u32 {
        self.shape.samples
    }

    pub fn formats(&self) -> &[wgpu::TextureFormat] {
        &self.shape.formats
    }
}

pub struct RealizedDepth {
    handle: GpuHandle,
    size: (u32, u32),
    pub format: wgpu::TextureFormat,
    /// All aspects, for use as an attachment.
    pub view: wgpu::TextureView,
    /// Depth aspect only, for sampling.
    pub sample_view: wgpu::TextureView,
    _texture: wgpu::Texture,
}

impl RealizedDepth {
    fn new(device: &wgpu::Device, depth: &DepthTexture) -> Self {
        let format = depth_format(depth.format);
        let size = (depth.width, depth.height);
        let texture = texture(device, "depth", size, 1, format, SAMPLED_ATTACHMENT);
        Self {
            handle: depth.handle().clone(),
            size,
            format,
            view: texture.create_view(&Default::default()),
            sample_view: texture.create_view(&wgpu::TextureViewDescriptor {
                aspect: wgpu::TextureAspect::DepthOnly,
                ..Default::default()
            }),
            _texture: texture,
        }
    }
}

struct MeshBuffers {
    mesh: Weak<MeshData>,
    vertices: wgpu::Buffer,
    indices: wgpu::Buffer,
    index_count: u32,
}

impl MeshBuffers {
    fn uploaded_from(&self, mesh: &Rc<MeshData>) -> bool {
        uploaded_from(&self.mesh, mesh)
    }
}

fn uploaded_from(weak: &Weak<MeshData>, mesh: &Rc<MeshData>) -> bool {
    weak.upgrade().is_some_and(|m| Rc::ptr_eq(&m, mesh))
}

/// Lazily realised GPU resources, keyed by descriptor identity.
#[derive(Default)]
pub struct ResourceCache {
    targets: HashMap<usize, RealizedTarget>,
    depths: HashMap<usize, RealizedDepth>,
    meshes: HashMap<usize, MeshBuffers>,
    warned_msaa: bool,
}

impl ResourceCache {
    /// Allocates (or reallocates after a change) the textures behind `target`.
    pub fn realize_target(&mut self, device: &wgpu::Device, target: &RenderTarget) {
        if let Some(depth) = target.depth_texture() {
            self.realize_depth(device, &depth);
        }
        let multisample = target.samples > 1 && target.depth_texture.is_none();
        if target.samples > 1 && !multisample && !self.warned_msaa {
            log::warn!(
                "{}: multisampling is not applied to targets with a sampleable depth texture",
                target.label
            );
            self.warned_msaa = true;
        }
        let shape = TargetShape::of(target, multisample);
        let key = target.handle().key();
        if self.targets.get(&key).is_some_and(|r| r.shape == shape) {
            return;
        }
        log::debug!("realising {} at {:?}", target.label, shape.size);
        self.targets
            .insert(key, RealizedTarget::new(device, target, shape));
    }

    pub fn realize_depth(&mut self, device: &wgpu::Device, depth: &DepthTexture) {
        let key = depth.handle().key();
        let fresh = self.depths.get(&key).is_some_and(|r| {
            r.size == (depth.width, depth.height) && r.format == depth_format(depth.format)
        });
        if !fresh {
            self.depths.insert(key, RealizedDepth::new(device, depth));
        }
    }

    pub fn target(&self, target: &RenderTarget) -> Option<&RealizedTarget> {
        self.targets.get(&target.handle().key())
    }

    pub fn depth(&self, depth: &DepthTexture) -> Option<&RealizedDepth> {
        self.depths.get(&depth.handle().key())
    }

    /// Uploads `mesh` once; later calls reuse the buffers while the mesh is alive.
    pub fn realize_mesh(&mut self, device: &wgpu::Device, mesh: &Rc<MeshData>) {
        let key = Rc::as_ptr(mesh) as usize;
        if self.meshes.get(&key).is_some_and(|m| m.uploaded_from(mesh)) {
            return;
        }
        let vertices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh vertices"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("mesh indices"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        self.meshes.insert(
            key,
            MeshBuffers {
                mesh: Rc::downgrade(mesh),
                vertices,
                indices,
                index_count: mesh.index_count(),
            },
        );
    }

    pub fn mesh(&self, mesh: &Rc<MeshData>) -> Option<(&wgpu::Buffer, &wgpu::Buffer, u32)> {
        self.meshes
            .get(&(Rc::as_ptr(mesh) as usize))
            .filter(|m| m.uploaded_from(mesh))
            .map(|m| (&m.vertices, &m.indices, m.index_count))
    }

    /// Drops allocations whose descriptors were disposed or dropped.
    pub fn prune(&mut self) {
        let live = |handle: &GpuHandle| !handle.is_disposed() && !handle.is_orphaned();
        self.targets.retain(|_, r| live(&r.handle));
        self.depths.retain(|_, r| live(&r.handle));
        self.meshes.retain(|_, m| m.mesh.strong_count() > 0);
    }
}

/// One uniform buffer shared by every draw of a frame, handed out in aligned slices.
///
/// Writes go through the queue and land before the frame's commands execute, so each draw needs
/// its own slice rather than a rewrite of a shared buffer.
pub struct UniformArena {
    buffer: wgpu::Buffer,
    capacity: u64,
    cursor: u64,
    alignment: u64,
}

impl UniformArena {
    const INITIAL_CAPACITY: u64 = 64 * 1024;

    pub fn new(device: &wgpu::Device) -> Self {
        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        Self {
            buffer: Self::allocate(device, Self::INITIAL_CAPACITY),
            capacity: Self::INITIAL_CAPACITY,
            cursor: 0,
            alignment,
        }
    }

    fn allocate(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("frame uniforms"),
            size,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn aligned(&self, size: u64) -> u64 {
        size.next_multiple_of(self.alignment)
    }

    /// Makes room for `size` contiguous bytes in the current buffer.
    ///
    /// A full arena is replaced by a larger one; bind groups created earlier keep the old buffer
    /// alive until the frame is submitted. Slices pushed before the replacement must be bound
    /// before it, so a draw reserves everything it pushes up front.
    pub fn reserve(&mut self, device: &wgpu::Device, size: u64) {
        if self.cursor + size <= self.capacity {
            return;
        }
        self.capacity = (self.capacity * 2).max(self.aligned(size));
        self.buffer = Self::allocate(device, self.capacity);
        self.cursor = 0;
        log::debug!("uniform arena grown to {} bytes", self.capacity);
    }

    /// Copies `bytes` into the arena and returns the dynamic offset of the copy.
    pub fn push(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, bytes: &[u8]) -> u32 {
        self.reserve(device, bytes.len() as u64);
        let offset = self.cursor;
        queue.write_buffer(&self.buffer, offset, bytes);
        self.cursor = self.aligned(offset + bytes.len() as u64);
        offset as u32
    }

    /// Binding of `size` bytes for use with a dynamic offset.
    pub fn binding(&self, size: u64) -> wgpu::BindingResource<'_> {
        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
            buffer: &self.buffer,
            offset: 0,
            size: NonZeroU64::new(size),
        })
    }
}

/// 1x1 stand-ins bound when a program reads a texture the draw did not supply.
pub struct Fallbacks {
    pub color: wgpu::TextureView,
    pub depth: wgpu::TextureView,
    _textures: [wgpu::Texture; 2],
}

impl Fallbacks {
    pub fn new(device: &wgpu::Device) -> Self {
        let color = texture(
            device,
            "fallback color",
            (1, 1),
            1,
            wgpu::TextureFormat::Rgba8Unorm,
            wgpu::TextureUsages::TEXTURE_BINDING,
        );
        let depth = texture(
            device,
            "fallback depth",
            (1, 1),
            1,
            wgpu::TextureFormat::Depth32Float,
            SAMPLED_ATTACHMENT,
        );
        Self {
            color: color.create_view(&Default::default()),
            depth: depth.create_view(&Default::default()),
            _textures: [color, depth],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srgb_attachments_use_srgb_formats() {
        let info = TextureInfo::new("color", TextureFormat::Rgba8Unorm)
            .with_color_space(ColorSpace::Srgb);
        assert_eq!(color_format(&info), wgpu::TextureFormat::Rgba8UnormSrgb);
        let linear = TextureInfo::new("color", TextureFormat::Rgba8Unorm)
            .with_color_space(ColorSpace::LinearSrgb);
        assert_eq!(color_format(&linear), wgpu::TextureFormat::Rgba8Unorm);
        let half = TextureInfo::new("color", TextureFormat::Rgba16Float)
            .with_color_space(ColorSpace::Srgb);
        assert_eq!(color_format(&half), wgpu::TextureFormat::Rgba16Float);
    }

    #[test]
    fn shapes_follow_the_descriptor() {
        let target = RenderTarget::color("t", 8, 4, TextureFormat::Rgba16Float)
            .with_depth_buffer(true, true)
            .with_samples(4);
        let shape = TargetShape::of(&target, true);
        assert_eq!(shape.size, (8, 4));
        assert_eq!(shape.samples, 4);
        assert_eq!(shape.depth, Some(wgpu::TextureFormat::Depth24PlusStencil8));
        assert_eq!(TargetShape::of(&target, false).samples, 1);

        let mut resized = target.clone();
        resized.width = 16;
        assert_ne!(TargetShape::of(&resized, true), shape);
    }

    #[test]
    fn mesh_entries_match_only_their_live_source() {
        let mesh = Rc::new(MeshData::cube());
        let weak = Rc::downgrade(&mesh);
        assert!(uploaded_from(&weak, &mesh));
        assert!(!uploaded_from(&weak, &Rc::new(MeshData::cube())));
        drop(mesh);
        let later = Rc::new(MeshData::plane(1.0));
        assert!(!uploaded_from(&weak, &later));
    }

    #[test]
    fn float32_is_not_filterable() {
        assert!(!is_filterable(wgpu::TextureFormat::Rgba32Float));
        assert!(is_filterable(wgpu::TextureFormat::Rgba16Float));
    }
}
