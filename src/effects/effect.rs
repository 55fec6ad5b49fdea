//! The effect contract consumed by [`EffectShaderData`](super::EffectShaderData).
//!
//! An effect contributes WGSL to a merged full-screen program. Its fragment source defines at
//! least one entry point:
//!
//! ```wgsl
//! fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f { ... }
//! fn main_uv(uv: ptr<function, vec2f>) { ... }
//! ```
//!
//! and an optional vertex source may define `fn main_support(uv: vec2f)`. Every other function,
//! struct, constant and varying the effect introduces has to be listed in its [`EffectSymbols`];
//! those names, plus the keys of the effect's own defines and uniforms, are prefixed when the
//! effect is merged so that several effects can share one shader module.

use std::any::Any;
use std::collections::BTreeSet;

use bitflags::bitflags;
use indexmap::IndexMap;

use super::blend::{BlendFunction, BlendMode};
use super::wgsl;
use crate::error::{Error, Result};
use crate::gbuffer::channel;
use crate::port::Input;
use crate::render_target::ColorSpace;

pub const MAIN_IMAGE: &str = "main_image";
pub const MAIN_UV: &str = "main_uv";
pub const MAIN_SUPPORT: &str = "main_support";

/// Name of the texture holding the pass input; sampling it makes an effect a convolution.
pub const INPUT_BUFFER: &str = "input_buffer";

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct EffectAttributes: u8 {
        /// Reads the depth channel.
        const DEPTH = 1;
        /// Samples neighbouring texels of the input color.
        const CONVOLUTION = 2;
    }
}

/// Identifiers an effect introduces into the shared module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EffectSymbols {
    pub functions: Vec<String>,
    pub structs: Vec<String>,
    pub constants: Vec<String>,
    /// Values written by `main_support` and read by the fragment stage, with their WGSL type.
    /// Only floating point types interpolate.
    pub varyings: IndexMap<String, String>,
}

impl EffectSymbols {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions
            .iter()
            .chain(&self.structs)
            .chain(&self.constants)
            .map(String::as_str)
            .chain(self.varyings.keys().map(String::as_str))
    }
}

/// WGSL sources and static attributes of an effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectShader {
    pub fragment: String,
    pub vertex: Option<String>,
    pub symbols: EffectSymbols,
    pub attributes: EffectAttributes,
    pub input_color_space: ColorSpace,
    pub output_color_space: ColorSpace,
}

impl EffectShader {
    pub fn new(fragment: impl Into<String>) -> Self {
        Self {
            fragment: fragment.into(),
            vertex: None,
            symbols: EffectSymbols::default(),
            attributes: EffectAttributes::empty(),
            input_color_space: ColorSpace::None,
            output_color_space: ColorSpace::None,
        }
    }

    pub fn with_vertex(mut self, vertex: impl Into<String>) -> Self {
        self.vertex = Some(vertex.into());
        self
    }

    pub fn with_functions<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.functions.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_structs<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.structs.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_constants<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.symbols.constants.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_varying(mut self, name: impl Into<String>, wgsl_type: impl Into<String>) -> Self {
        self.symbols.varyings.insert(name.into(), wgsl_type.into());
        self
    }

    pub fn with_attributes(mut self, attributes: EffectAttributes) -> Self {
        self.attributes |= attributes;
        self
    }

    pub fn with_color_spaces(mut self, input: ColorSpace, output: ColorSpace) -> Self {
        self.input_color_space = input;
        self.output_color_space = output;
        self
    }

    pub fn has_main_image(&self) -> bool {
        wgsl::declares(&self.fragment, "fn", MAIN_IMAGE)
    }

    pub fn transforms_uv(&self) -> bool {
        wgsl::declares(&self.fragment, "fn", MAIN_UV)
    }

    pub fn is_convolution(&self) -> bool {
        self.attributes.contains(EffectAttributes::CONVOLUTION)
            || wgsl::references(&self.fragment, INPUT_BUFFER)
    }

    pub fn reads_depth(&self) -> bool {
        self.attributes.contains(EffectAttributes::DEPTH)
            || self.g_data_channels().contains(channel::DEPTH)
    }

    /// Merge precedence: convolution first, then depth readers. Higher runs earlier.
    pub fn precedence(&self) -> u8 {
        (u8::from(self.is_convolution()) << 1) | u8::from(self.reads_depth())
    }

    /// Name of the `GData` parameter of `main_image`.
    pub fn g_data_parameter(&self) -> Option<String> {
        wgsl::function_parameters(&self.fragment, MAIN_IMAGE)?
            .into_iter()
            .find(|p| p.ty == "GData")
            .map(|p| p.name)
    }

    /// Channels `main_image` reads from its `GData` parameter, before dependency closure.
    pub fn g_data_channels(&self) -> BTreeSet<String> {
        let mut channels = self
            .g_data_parameter()
            .map(|param| wgsl::member_accesses(&self.fragment, &param))
            .unwrap_or_default();
        if self.attributes.contains(EffectAttributes::DEPTH) {
            channels.insert(channel::DEPTH.to_string());
        }
        channels
    }

    /// Entry points and declared symbols, i.e. every identifier that gets a per-effect prefix.
    pub fn local_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        if self.has_main_image() {
            names.push(MAIN_IMAGE.to_string());
        }
        if self.transforms_uv() {
            names.push(MAIN_UV.to_string());
        }
        if self.vertex.is_some() {
            names.push(MAIN_SUPPORT.to_string());
        }
        names.extend(self.symbols.names().map(str::to_string));
        names
    }

    fn defines_symbol(&self, keyword: &str, name: &str) -> bool {
        wgsl::declares(&self.fragment, keyword, name)
            || self
                .vertex
                .as_deref()
                .is_some_and(|vertex| wgsl::declares(vertex, keyword, name))
    }

    /// Checks entry points and declared symbols.
    pub fn validate(&self, effect: &str) -> Result<()> {
        let malformed = |reason: &str| Error::MalformedEntryPoint {
            effect: effect.to_string(),
            reason: reason.to_string(),
        };

        let has_image = self.has_main_image();
        let has_uv = self.transforms_uv();
        if !has_image && !has_uv {
            return Err(Error::MissingEntryPoint {
                effect: effect.to_string(),
            });
        }

        if has_image {
            let params = wgsl::function_parameters(&self.fragment, MAIN_IMAGE).unwrap_or_default();
            if params.len() != 3 {
                return Err(malformed(
                    "main_image must take (input_color: vec4f, uv: vec2f, data: GData)",
                ));
            }
            if params[2].ty != "GData" {
                return Err(malformed("the last parameter of main_image must be GData"));
            }
        }

        if has_uv {
            let params = wgsl::function_parameters(&self.fragment, MAIN_UV).unwrap_or_default();
            if params.len() != 1 || !params[0].ty.starts_with("ptr<function") {
                return Err(malformed("main_uv must take (uv: ptr<function, vec2f>)"));
            }
        }

        match &self.vertex {
            Some(vertex) if !wgsl::declares(vertex, "fn", MAIN_SUPPORT) => {
                return Err(malformed("vertex source without main_support"));
            }
            None if !self.symbols.varyings.is_empty() => {
                return Err(malformed("varyings need a vertex source"));
            }
            _ => {}
        }

        let declared = [
            ("fn", &self.symbols.functions),
            ("struct", &self.symbols.structs),
            ("const", &self.symbols.constants),
        ];
        for (keyword, names) in declared {
            if let Some(missing) = names.iter().find(|name| !self.defines_symbol(keyword, name)) {
                return Err(Error::UndeclaredSymbol {
                    effect: effect.to_string(),
                    symbol: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Per-frame values handed to [`Effect::update`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInfo {
    pub delta: f32,
    pub elapsed: f32,
    pub frame: u64,
    pub width: u32,
    pub height: u32,
}

/// State every effect carries.
///
/// The revision counts structural changes: a new shader, a different blend function, or any
/// define/uniform entry added to or removed from the effect's input. Writing a uniform's value is
/// not structural.
#[derive(Debug)]
pub struct EffectCore {
    name: String,
    shader: EffectShader,
    blend_mode: BlendMode,
    input: Input,
    revision: u64,
}

impl EffectCore {
    pub fn new(name: impl Into<String>, shader: EffectShader) -> Self {
        Self {
            name: name.into(),
            shader,
            blend_mode: BlendMode::default(),
            input: Input::new(),
            revision: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shader(&self) -> &EffectShader {
        &self.shader
    }

    pub fn set_shader(&mut self, shader: EffectShader) {
        if self.shader != shader {
            self.shader = shader;
            self.revision += 1;
        }
    }

    pub fn blend_mode(&self) -> &BlendMode {
        &self.blend_mode
    }

    pub fn set_blend_function(&mut self, function: BlendFunction) {
        if self.blend_mode.function() != function {
            self.blend_mode.set_function(function);
            self.revision += 1;
        }
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    pub fn revision(&self) -> u64 {
        self.revision + self.input.revision().entries()
    }
}

/// A shading contribution merged into an [`EffectPass`](crate::pass::EffectPass).
pub trait Effect: Any {
    fn core(&self) -> &EffectCore;
    fn core_mut(&mut self) -> &mut EffectCore;

    fn name(&self) -> &str {
        self.core().name()
    }

    fn shader(&self) -> &EffectShader {
        self.core().shader()
    }

    fn blend_mode(&self) -> &BlendMode {
        self.core().blend_mode()
    }

    fn input(&self) -> &Input {
        self.core().input()
    }

    fn revision(&self) -> u64 {
        self.core().revision()
    }

    /// Pushes per-frame uniform values. Must not change anything structural.
    fn update(&mut self, _frame: &FrameInfo) {}

    fn validate(&self) -> Result<()> {
        self.shader().validate(self.name())
    }

    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// An effect authored entirely by the caller.
///
/// The shader is validated on construction and whenever it is replaced.
///
/// ```
/// use phalanx::effects::{Effect, EffectShader, ShaderEffect};
///
/// let tint = ShaderEffect::new(
///     "tint",
///     EffectShader::new(
///         "fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
///             return input_color * tint;
///         }",
///     ),
/// )
/// .unwrap()
/// .with_uniform("tint", glam::Vec4::new(1.0, 0.8, 0.8, 1.0));
/// assert_eq!(tint.core().input().uniforms().len(), 1);
/// ```
#[derive(Debug)]
pub struct ShaderEffect {
    core: EffectCore,
}

impl ShaderEffect {
    pub fn new(name: impl Into<String>, shader: EffectShader) -> Result<Self> {
        let core = EffectCore::new(name, shader);
        core.shader().validate(core.name())?;
        Ok(Self { core })
    }

    pub fn with_uniform(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::uniform::UniformValue>,
    ) -> Self {
        self.core
            .input_mut()
            .set_uniform(key, crate::uniform::Uniform::new(value));
        self
    }

    pub fn with_define(
        mut self,
        key: impl Into<String>,
        value: impl Into<crate::port::DefineValue>,
    ) -> Self {
        self.core.input_mut().set_define(key, value);
        self
    }

    pub fn with_blend_function(mut self, function: BlendFunction) -> Self {
        self.core.set_blend_function(function);
        self
    }

    pub fn set_shader(&mut self, shader: EffectShader) -> Result<()> {
        shader.validate(self.core.name())?;
        self.core.set_shader(shader);
        Ok(())
    }
}

impl Effect for ShaderEffect {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EffectCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
