//! # Phalanx
//!
//! **A render pipeline for wgpu that chains passes and merges screen-space effects.**
//!
//! A [`RenderPipeline`] runs an ordered list of passes. A [`GeometryPass`] draws the scene into a
//! G-Buffer; each [`EffectPass`] merges any number of effects into one full-screen shader and
//! reads only the G-Buffer textures those effects use. The pipeline wires passes together,
//! ping-ponging between two intermediate buffers, and the last enabled pass draws to the screen.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use phalanx::*;
//!
//! # fn run(window: Arc<winit::window::Window>) -> anyhow::Result<()> {
//! let mut backend = WgpuBackend::new(GpuContext::new(window)?);
//! let mut pipeline = RenderPipeline::for_backend(&backend);
//! pipeline.set_scene(Some(Scene::new().shared()));
//! pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
//! pipeline.add(EffectPass::new(vec![
//!     Box::new(DepthFogEffect::new(Vec3::splat(0.6), 0.08)),
//!     Box::new(VignetteEffect::new()),
//! ])?);
//! pipeline.set_size(1280, 720);
//!
//! // every frame
//! pipeline.render(&mut backend, 1.0 / 60.0);
//! # Ok(())
//! # }
//! ```
//!
//! Rendering goes through the [`RenderBackend`] trait. [`WgpuBackend`] draws into a window;
//! [`RecordingBackend`] runs headless and records every draw, which is how the tests observe the
//! pipeline.
//!
//! Logging goes through the [`log`] facade; binaries call [`init_log`] to print it.

pub mod backend;
pub mod camera;
pub mod effects;
pub mod error;
pub mod gbuffer;
mod logging;
pub mod pass;
pub mod pipeline;
pub mod port;
pub mod render_target;
pub mod resolution;
pub mod resource;
pub mod scene;
pub mod timer;
pub mod uniform;

pub use backend::{
    FullscreenDraw, GpuContext, RecordingBackend, RenderBackend, SceneDraw, WgpuBackend,
};
pub use camera::{Camera, SharedCamera};
pub use effects::{
    BlendFunction, BlendMode, BoxBlurEffect, ColorDepthEffect, DepthFogEffect, Effect,
    EffectAttributes, EffectShader, EffectShaderData, NoiseEffect, PixelationEffect,
    ShaderEffect, VignetteEffect,
};
pub use error::{Error, Result};
pub use gbuffer::{GBufferConfig, GBufferTexture, GDataChannel};
pub use logging::init_log;
pub use pass::{
    CopyPass, DeviceCapabilities, EffectPass, GeometryPass, GeometryPassOptions, Pass, PassId,
    RendererInfo,
};
pub use pipeline::RenderPipeline;
pub use port::{Buffer, DefineValue, Input, Output};
pub use render_target::{
    ColorSpace, DepthFormat, DepthTexture, FrameBufferType, RenderTarget, TextureFilter,
    TextureFormat, TextureInfo,
};
pub use resolution::Resolution;
pub use resource::Resource;
pub use scene::{Material, MeshData, MeshRenderer, Scene, SceneNode, Transform};
pub use timer::Timer;
pub use uniform::{Uniform, UniformValue};

// Re-export glam math types for convenience
pub use glam::{Mat4, Quat, Vec2, Vec3, Vec4};
