//! Full-screen effect passes.
//!
//! An [`EffectPass`] owns an ordered list of [`Effect`]s and merges them into a single
//! [`ShaderProgram`], so any number of effects costs one full-screen draw per frame.
//!
//! # Built-in uniforms
//!
//! Every program gets these pass-level uniforms, usable by name from effect code:
//!
//! | Name | Type | Value |
//! |---|---|---|
//! | `resolution` | `vec2f` | pass size in pixels |
//! | `texel_size` | `vec2f` | `1.0 / resolution` |
//! | `camera_near` | `f32` | near clip plane of the pipeline camera |
//! | `camera_far` | `f32` | far clip plane of the pipeline camera |
//! | `time` | `f32` | seconds since the first frame |
//!
//! Uniforms set on the pass [`Input`](crate::port::Input) are added the same way, and input
//! defines become unprefixed WGSL constants. `FRAME_BUFFER_PRECISION_HIGH` is maintained from
//! the output buffer format.
//!
//! # Recompilation
//!
//! Adding or removing effects recompiles immediately and reports merge errors to the caller.
//! Structural changes made through [`EffectPass::effect_mut`] (a new blend function, a changed
//! define) are picked up on the next sync; if that merge fails the previous program stays in use
//! and a warning is logged.
//!
//! # Example
//!
//! ```
//! use phalanx::effects::{NoiseEffect, VignetteEffect};
//! use phalanx::pass::{EffectPass, Pass};
//!
//! let mut pass = EffectPass::new(vec![Box::new(VignetteEffect::new())]).unwrap();
//! pass.add_effect(NoiseEffect::new(0.1)).unwrap();
//! assert_eq!(pass.effects().count(), 2);
//! assert!(pass.program().is_some());
//! ```

use std::any::Any;
use std::collections::BTreeSet;
use std::rc::Rc;

use glam::Vec2;
use indexmap::IndexMap;

use super::{FrameContext, Pass, PassCore};
use crate::backend::FullscreenDraw;
use crate::effects::{Effect, EffectShaderData, FrameInfo, ShaderProgram};
use crate::error::Result;
use crate::gbuffer::GBufferConfig;
use crate::uniform::Uniform;

/// Prefix namespace of merged effect symbols (`e0_`, `e1_`, ...).
const NAMESPACE: &str = "e";

pub const FRAME_BUFFER_PRECISION_HIGH: &str = "FRAME_BUFFER_PRECISION_HIGH";

struct BuiltinUniforms {
    resolution: Uniform,
    texel_size: Uniform,
    camera_near: Uniform,
    camera_far: Uniform,
    time: Uniform,
}

impl BuiltinUniforms {
    fn new() -> Self {
        Self {
            resolution: Uniform::new(Vec2::ONE),
            texel_size: Uniform::new(Vec2::ONE),
            camera_near: Uniform::new(0.1f32),
            camera_far: Uniform::new(100.0f32),
            time: Uniform::new(0.0f32),
        }
    }

    fn entries(&self) -> [(&'static str, &Uniform); 5] {
        [
            ("resolution", &self.resolution),
            ("texel_size", &self.texel_size),
            ("camera_near", &self.camera_near),
            ("camera_far", &self.camera_far),
            ("time", &self.time),
        ]
    }
}

/// Applies a list of effects in one full-screen draw.
pub struct EffectPass {
    core: PassCore,
    config: Rc<GBufferConfig>,
    effects: Vec<Box<dyn Effect>>,
    builtins: BuiltinUniforms,
    data: EffectShaderData,
    program: Option<ShaderProgram>,
    /// Effect revisions and input entry revision the current program was built from.
    compiled: (Vec<u64>, u64),
}

impl EffectPass {
    /// Creates a pass and compiles `effects` right away.
    pub fn new(effects: Vec<Box<dyn Effect>>) -> Result<Self> {
        Self::with_config(effects, Rc::new(GBufferConfig::default()))
    }

    pub fn with_config(effects: Vec<Box<dyn Effect>>, config: Rc<GBufferConfig>) -> Result<Self> {
        let mut core = PassCore::new("effects");
        core.input.set_define(FRAME_BUFFER_PRECISION_HIGH, false);
        let mut pass = Self {
            core,
            config,
            effects,
            builtins: BuiltinUniforms::new(),
            data: EffectShaderData::new(),
            program: None,
            compiled: (Vec::new(), 0),
        };
        pass.recompile()?;
        Ok(pass)
    }

    pub fn effects(&self) -> impl Iterator<Item = &dyn Effect> {
        self.effects.iter().map(|effect| effect.as_ref())
    }

    /// First effect of type `T`.
    pub fn effect<T: Effect>(&self) -> Option<&T> {
        self.effects
            .iter()
            .find_map(|effect| effect.as_any().downcast_ref::<T>())
    }

    pub fn effect_mut<T: Effect>(&mut self) -> Option<&mut T> {
        self.effects
            .iter_mut()
            .find_map(|effect| effect.as_any_mut().downcast_mut::<T>())
    }

    /// Appends an effect. On a merge error the effect is dropped again and the error returned.
    pub fn add_effect<E: Effect>(&mut self, effect: E) -> Result<()> {
        self.effects.push(Box::new(effect));
        if let Err(err) = self.recompile() {
            self.effects.pop();
            return Err(err);
        }
        Ok(())
    }

    /// Removes the first effect called `name`.
    pub fn remove_effect(&mut self, name: &str) -> Option<Box<dyn Effect>> {
        let index = self.effects.iter().position(|effect| effect.name() == name)?;
        let removed = self.effects.remove(index);
        self.try_recompile();
        Some(removed)
    }

    /// Replaces the whole effect list, keeping the old one if the new list does not merge.
    pub fn set_effects(&mut self, effects: Vec<Box<dyn Effect>>) -> Result<()> {
        let previous = std::mem::replace(&mut self.effects, effects);
        if let Err(err) = self.recompile() {
            self.effects = previous;
            return Err(err);
        }
        Ok(())
    }

    pub fn program(&self) -> Option<&ShaderProgram> {
        self.program.as_ref()
    }

    pub fn shader_data(&self) -> &EffectShaderData {
        &self.data
    }

    fn pass_uniforms(&self) -> IndexMap<String, Uniform> {
        let mut uniforms: IndexMap<String, Uniform> = self
            .builtins
            .entries()
            .into_iter()
            .map(|(name, uniform)| (name.to_string(), uniform.clone()))
            .collect();
        uniforms.extend(
            self.core
                .input
                .uniforms()
                .iter()
                .map(|(name, uniform)| (name.clone(), uniform.clone())),
        );
        uniforms
    }

    fn snapshot(&self) -> (Vec<u64>, u64) {
        (
            self.effects.iter().map(|effect| effect.revision()).collect(),
            self.core.input.revision().entries(),
        )
    }

    /// Merges the effects and installs the resulting program.
    pub fn recompile(&mut self) -> Result<()> {
        let snapshot = self.snapshot();
        let effects: Vec<&dyn Effect> = self.effects.iter().map(|e| e.as_ref()).collect();
        let data = EffectShaderData::merge(NAMESPACE, &effects, &self.config)?;
        let program = ShaderProgram::assemble(
            self.core.name(),
            &data,
            self.core.input.defines(),
            &self.pass_uniforms(),
            &self.config,
        );
        log::debug!(
            "{}: compiled {} effect(s), program {:016x}",
            self.core.name(),
            self.effects.len(),
            program.key
        );
        self.data = data;
        self.program = Some(program);
        self.compiled = snapshot;
        Ok(())
    }

    fn try_recompile(&mut self) {
        if let Err(err) = self.recompile() {
            log::warn!(
                "{}: recompile failed, keeping the previous program: {err}",
                self.core.name()
            );
            self.compiled = self.snapshot();
        }
    }

    fn recompile_if_stale(&mut self) {
        if self.snapshot() != self.compiled {
            self.try_recompile();
        }
    }

    fn update_builtins(&self) -> (u32, u32) {
        let (width, height) = self.core.resolution.size();
        let size = Vec2::new(width as f32, height as f32);
        self.builtins.resolution.set(size);
        self.builtins.texel_size.set(Vec2::ONE / size);
        if let Some(camera) = &self.core.context().camera {
            let camera = camera.borrow();
            self.builtins.camera_near.set(camera.near);
            self.builtins.camera_far.set(camera.far);
        }
        (width, height)
    }
}

impl Pass for EffectPass {
    fn core(&self) -> &PassCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PassCore {
        &mut self.core
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn on_output_change(&mut self) {
        let high = self.core.output.frame_buffer_precision_high();
        self.core.input.set_define(FRAME_BUFFER_PRECISION_HIGH, high);
    }

    fn on_input_change(&mut self) {
        self.recompile_if_stale();
    }

    fn refresh(&mut self) {
        self.recompile_if_stale();
    }

    fn is_convolution_pass(&self, _recursive: bool) -> bool {
        !self.data.convolution_effects().is_empty()
    }

    fn g_buffer_requirements(&self) -> BTreeSet<String> {
        self.data.required_textures(&self.config)
    }

    fn render(&mut self, frame: &mut FrameContext<'_>) {
        let (width, height) = self.update_builtins();
        self.builtins.time.set(frame.timer.elapsed());
        let info = FrameInfo {
            delta: frame.timer.delta(),
            elapsed: frame.timer.elapsed(),
            frame: frame.timer.frame(),
            width,
            height,
        };
        for effect in &mut self.effects {
            effect.update(&info);
        }
        self.recompile_if_stale();

        let Some(program) = &self.program else {
            return;
        };
        let input = self.core.input.default_target();
        let g_buffer = self.core.input.g_buffer().and_then(|g| g.borrow().clone());
        let depth = self
            .core
            .input
            .depth_buffer()
            .and_then(|d| d.borrow().clone());
        let target = self.core.output.default_target();
        frame.backend.draw_fullscreen(FullscreenDraw {
            label: self.core.name(),
            program,
            input: input.as_ref(),
            g_buffer: g_buffer.as_ref(),
            depth: depth.as_ref(),
            target: target.as_ref(),
        });
    }
}
