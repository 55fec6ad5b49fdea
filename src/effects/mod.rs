//! Effects and the merger that turns a list of them into one full-screen program.
//!
//! - [`Effect`] / [`EffectShader`]: what an effect contributes and how it is validated.
//! - [`EffectShaderData`]: the merged description (sections, defines, uniforms, G-Buffer channels).
//! - [`ShaderProgram`]: the assembled WGSL handed to a backend.
//! - [`BlendFunction`]: how each effect's result is combined with the running color.

mod blend;
mod builtin;
mod effect;
mod program;
mod shader_data;
pub mod wgsl;

pub use blend::{BlendFunction, BlendMode};
pub use builtin::{
    BoxBlurEffect, ColorDepthEffect, DepthFogEffect, NoiseEffect, PixelationEffect, VignetteEffect,
};
pub use effect::{
    Effect, EffectAttributes, EffectCore, EffectShader, EffectSymbols, FrameInfo, INPUT_BUFFER,
    MAIN_IMAGE, MAIN_SUPPORT, MAIN_UV, ShaderEffect,
};
pub use program::{
    INPUT_BINDING, SAMPLER_BINDING, ShaderProgram, TextureBinding, TextureSource, UNIFORM_BINDING,
};
pub use shader_data::{EffectShaderData, Section};
