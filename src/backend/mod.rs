//! The GPU boundary.
//!
//! Passes never touch a GPU API directly. They describe draws as [`FullscreenDraw`] and
//! [`SceneDraw`] values and hand them to a [`RenderBackend`], which realises the render-target
//! descriptors, compiles programs and materials, and submits the work.
//!
//! Two backends ship with the crate:
//!
//! - [`WgpuBackend`]: renders through wgpu into a window surface.
//! - [`RecordingBackend`]: headless; records every draw for inspection in tests.
//!
//! A draw whose `target` is `None` goes to the display surface.

mod gpu;
mod recording;

pub use gpu::{GpuContext, WgpuBackend};
pub use recording::{DrawKind, DrawRecord, RecordingBackend, TargetRecord};

use crate::camera::Camera;
use crate::effects::ShaderProgram;
use crate::pass::{DeviceCapabilities, RendererInfo};
use crate::render_target::{ColorSpace, DepthTexture, RenderTarget};
use crate::scene::{Layers, Scene};

/// One full-screen triangle drawn with a merged effect program.
#[derive(Clone, Copy, Debug)]
pub struct FullscreenDraw<'a> {
    pub label: &'a str,
    pub program: &'a ShaderProgram,
    /// Bound as `input_buffer` (attachment 0).
    pub input: Option<&'a RenderTarget>,
    /// Source of the `gbuffer_*` bindings the program declares.
    pub g_buffer: Option<&'a RenderTarget>,
    pub depth: Option<&'a DepthTexture>,
    pub target: Option<&'a RenderTarget>,
}

/// Every visible mesh of a scene, drawn with its material.
#[derive(Clone, Copy, Debug)]
pub struct SceneDraw<'a> {
    pub label: &'a str,
    pub scene: &'a Scene,
    pub camera: &'a Camera,
    /// Only nodes on one of these layers are drawn.
    pub layers: Layers,
    pub target: Option<&'a RenderTarget>,
    /// Clear the color attachments first: `color` to the scene background, data attachments to
    /// zero. Off when a copy stage already seeded the target.
    pub clear_color: bool,
    /// Seconds since the pipeline started, for animated materials.
    pub time: f32,
}

pub trait RenderBackend {
    fn renderer_info(&self) -> RendererInfo;

    fn capabilities(&self) -> DeviceCapabilities {
        self.renderer_info().capabilities
    }

    fn output_color_space(&self) -> ColorSpace {
        self.renderer_info().output_color_space
    }

    fn begin_frame(&mut self);

    fn draw_fullscreen(&mut self, draw: FullscreenDraw<'_>);

    fn draw_scene(&mut self, draw: SceneDraw<'_>);

    /// Submits the frame. Nothing waits for the GPU.
    fn end_frame(&mut self);
}
