//! Backend-agnostic render target descriptors.
//!
//! A [`RenderTarget`] describes what a pass renders into: its size, its color attachments and
//! their formats, and the depth storage that comes with it. The descriptor itself owns no GPU
//! memory. Backends realise it lazily the first time it is drawn to or sampled from, keyed by its
//! [`GpuHandle`], and re-realise it whenever the descriptor no longer matches what they allocated
//! (e.g. after a resize).
//!
//! Cloning a descriptor is cheap and keeps the same handle, so a clone taken for a single draw
//! refers to the same GPU texture as the original.

use std::cell::Cell;
use std::rc::Rc;

use crate::resource::{Disposable, Resizable, Resource};

/// Storage precision for color buffers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum FrameBufferType {
    /// 8 bits per channel, normalized.
    #[default]
    UnsignedByte,
    HalfFloat,
    Float,
}

impl FrameBufferType {
    pub fn color_format(self) -> TextureFormat {
        match self {
            FrameBufferType::UnsignedByte => TextureFormat::Rgba8Unorm,
            FrameBufferType::HalfFloat => TextureFormat::Rgba16Float,
            FrameBufferType::Float => TextureFormat::Rgba32Float,
        }
    }
}

/// Color attachment formats understood by every backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Rgba32Float,
}

impl TextureFormat {
    pub fn frame_buffer_type(self) -> FrameBufferType {
        match self {
            TextureFormat::Rgba8Unorm => FrameBufferType::UnsignedByte,
            TextureFormat::Rgba16Float => FrameBufferType::HalfFloat,
            TextureFormat::Rgba32Float => FrameBufferType::Float,
        }
    }

    /// Anything wider than 8-bit normalized storage.
    pub fn is_high_precision(self) -> bool {
        self != TextureFormat::Rgba8Unorm
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DepthFormat {
    Depth32Float,
    Depth24PlusStencil8,
}

/// Color space tag carried by textures and effects.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ColorSpace {
    /// No particular color space; never triggers a conversion.
    #[default]
    None,
    LinearSrgb,
    Srgb,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureFilter {
    #[default]
    Linear,
    Nearest,
}

/// One color attachment of a render target.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureInfo {
    pub name: String,
    pub format: TextureFormat,
    pub color_space: ColorSpace,
    pub filter: TextureFilter,
}

impl TextureInfo {
    pub fn new(name: impl Into<String>, format: TextureFormat) -> Self {
        Self {
            name: name.into(),
            format,
            color_space: ColorSpace::None,
            filter: TextureFilter::Linear,
        }
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }
}

#[derive(Debug, Default)]
struct HandleState {
    disposed: Cell<bool>,
}

/// Identity of the GPU allocation behind a descriptor, shared by all of its clones.
#[derive(Clone, Debug, Default)]
pub struct GpuHandle(Rc<HandleState>);

impl GpuHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stable key for backend caches.
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    pub fn is_disposed(&self) -> bool {
        self.0.disposed.get()
    }

    fn mark_disposed(&self) {
        self.0.disposed.set(true);
    }

    /// `true` once no descriptor other than `self` refers to the allocation.
    pub fn is_orphaned(&self) -> bool {
        Rc::strong_count(&self.0) == 1
    }

    pub fn ptr_eq(&self, other: &GpuHandle) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A sampleable depth (or depth-stencil) texture.
#[derive(Clone, Debug)]
pub struct DepthTexture {
    pub width: u32,
    pub height: u32,
    pub format: DepthFormat,
    handle: GpuHandle,
}

impl DepthTexture {
    pub fn new(width: u32, height: u32, format: DepthFormat) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
            format,
            handle: GpuHandle::new(),
        }
    }

    pub fn handle(&self) -> &GpuHandle {
        &self.handle
    }

    pub fn has_stencil(&self) -> bool {
        self.format == DepthFormat::Depth24PlusStencil8
    }
}

impl Disposable for DepthTexture {
    fn dispose(&self) {
        self.handle.mark_disposed();
    }
}

impl Resizable for DepthTexture {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }
}

/// An off-screen target with one or more color attachments.
///
/// `depth_buffer`/`stencil_buffer` request an internal, non-sampleable depth buffer used for
/// depth testing. A sampleable depth texture is attached separately through `depth_texture`;
/// when present it replaces the internal buffer.
#[derive(Clone, Debug)]
pub struct RenderTarget {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub samples: u32,
    pub attachments: Vec<TextureInfo>,
    pub depth_buffer: bool,
    pub stencil_buffer: bool,
    pub depth_texture: Option<Resource<DepthTexture>>,
    handle: GpuHandle,
}

impl RenderTarget {
    pub fn new(label: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            label: label.into(),
            width: width.max(1),
            height: height.max(1),
            samples: 0,
            attachments: Vec::new(),
            depth_buffer: false,
            stencil_buffer: false,
            depth_texture: None,
            handle: GpuHandle::new(),
        }
    }

    /// Single-attachment target, the shape of the pipeline's intermediate buffers.
    pub fn color(label: impl Into<String>, width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new(label, width, height).with_attachment(TextureInfo::new("color", format))
    }

    pub fn with_attachment(mut self, texture: TextureInfo) -> Self {
        self.attachments.push(texture);
        self
    }

    pub fn with_depth_buffer(mut self, depth: bool, stencil: bool) -> Self {
        self.depth_buffer = depth;
        self.stencil_buffer = stencil;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }

    pub fn handle(&self) -> &GpuHandle {
        &self.handle
    }

    pub fn attachment(&self, name: &str) -> Option<(usize, &TextureInfo)> {
        self.attachments
            .iter()
            .enumerate()
            .find(|(_, texture)| texture.name == name)
    }

    /// More than one color attachment.
    pub fn is_multi_target(&self) -> bool {
        self.attachments.len() > 1
    }

    pub fn primary_format(&self) -> Option<TextureFormat> {
        self.attachments.first().map(|texture| texture.format)
    }

    pub fn depth_texture(&self) -> Option<DepthTexture> {
        self.depth_texture
            .as_ref()
            .and_then(|depth| depth.borrow().clone())
    }
}

impl Disposable for RenderTarget {
    fn dispose(&self) {
        self.handle.mark_disposed();
    }
}

impl Resizable for RenderTarget {
    fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_a_handle() {
        let target = RenderTarget::color("a", 4, 4, TextureFormat::Rgba8Unorm);
        let copy = target.clone();
        assert!(target.handle().ptr_eq(copy.handle()));
        target.dispose();
        assert!(copy.handle().is_disposed());
    }

    #[test]
    fn handle_is_orphaned_once_descriptors_drop() {
        let target = RenderTarget::color("a", 4, 4, TextureFormat::Rgba8Unorm);
        let cached = target.handle().clone();
        assert!(!cached.is_orphaned());
        drop(target);
        assert!(cached.is_orphaned());
    }

    #[test]
    fn zero_sizes_clamp_to_one() {
        let mut target = RenderTarget::new("a", 0, 0);
        assert_eq!(target.size(), (1, 1));
        target.set_size(0, 7);
        assert_eq!(target.size(), (1, 7));
    }

    #[test]
    fn attachments_are_looked_up_by_name() {
        let target = RenderTarget::new("g", 2, 2)
            .with_attachment(TextureInfo::new("color", TextureFormat::Rgba8Unorm))
            .with_attachment(TextureInfo::new("normal", TextureFormat::Rgba16Float));
        assert!(target.is_multi_target());
        assert_eq!(target.attachment("normal").map(|(i, _)| i), Some(1));
        assert!(target.attachment("orm").is_none());
    }
}
