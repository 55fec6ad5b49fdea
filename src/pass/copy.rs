use std::any::Any;

use indexmap::IndexMap;

use super::{FrameContext, Pass, PassCore};
use crate::backend::FullscreenDraw;
use crate::effects::{EffectShaderData, ShaderProgram};
use crate::gbuffer::GBufferConfig;

/// Copies the input default buffer into the output default buffer.
pub struct CopyPass {
    core: PassCore,
    program: ShaderProgram,
}

impl CopyPass {
    pub fn new() -> Self {
        let program = ShaderProgram::assemble(
            "copy",
            &EffectShaderData::new(),
            &IndexMap::new(),
            &IndexMap::new(),
            &GBufferConfig::default(),
        );
        Self {
            core: PassCore::new("copy"),
            program,
        }
    }

    pub fn program(&self) -> &ShaderProgram {
        &self.program
    }
}

impl Default for CopyPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for CopyPass {
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

    fn render(&mut self, frame: &mut FrameContext<'_>) {
        let Some(input) = self.core.input.default_target() else {
            return;
        };
        let target = self.core.output.default_target();
        frame.backend.draw_fullscreen(FullscreenDraw {
            label: self.core.name(),
            program: &self.program,
            input: Some(&input),
            g_buffer: None,
            depth: None,
            target: target.as_ref(),
        });
    }
}
