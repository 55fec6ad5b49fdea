use std::collections::HashSet;

use super::{FullscreenDraw, RenderBackend, SceneDraw};
use crate::pass::{DeviceCapabilities, RendererInfo};
use crate::render_target::{ColorSpace, RenderTarget};

/// What a recorded draw wrote into or read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetRecord {
    pub label: String,
    /// [`GpuHandle::key`](crate::render_target::GpuHandle::key) of the descriptor.
    pub key: usize,
    pub size: (u32, u32),
    pub attachments: Vec<String>,
    pub depth_texture: Option<(u32, u32)>,
}

impl TargetRecord {
    fn new(target: &RenderTarget) -> Self {
        Self {
            label: target.label.clone(),
            key: target.handle().key(),
            size: (target.width, target.height),
            attachments: target.attachments.iter().map(|a| a.name.clone()).collect(),
            depth_texture: target.depth_texture().map(|d| (d.width, d.height)),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawKind {
    Fullscreen {
        program_key: u64,
        /// Names of the texture bindings the program declared.
        textures: Vec<String>,
        uniform_bytes: usize,
    },
    Scene {
        meshes: usize,
        clear_color: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawRecord {
    pub label: String,
    pub frame: u64,
    pub kind: DrawKind,
    pub input: Option<TargetRecord>,
    pub g_buffer: Option<TargetRecord>,
    /// `None` for the display surface.
    pub target: Option<TargetRecord>,
}

impl DrawRecord {
    pub fn is_fullscreen(&self) -> bool {
        matches!(self.kind, DrawKind::Fullscreen { .. })
    }

    pub fn to_screen(&self) -> bool {
        self.target.is_none()
    }
}

/// Headless backend that records draws instead of executing them.
#[derive(Debug)]
pub struct RecordingBackend {
    info: RendererInfo,
    frame: u64,
    in_frame: bool,
    draws: Vec<DrawRecord>,
    programs: HashSet<u64>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            info: RendererInfo::default(),
            frame: 0,
            in_frame: false,
            draws: Vec::new(),
            programs: HashSet::new(),
        }
    }

    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.info.capabilities = capabilities;
        self
    }

    pub fn with_output_color_space(mut self, color_space: ColorSpace) -> Self {
        self.info.output_color_space = color_space;
        self
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Draws recorded during the most recent frame.
    pub fn last_frame(&self) -> impl Iterator<Item = &DrawRecord> {
        let frame = self.frame;
        self.draws.iter().filter(move |d| d.frame == frame)
    }

    pub fn clear(&mut self) {
        self.draws.clear();
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Distinct programs seen so far; a stand-in for pipeline compilations.
    pub fn compiled_programs(&self) -> usize {
        self.programs.len()
    }
}

impl RenderBackend for RecordingBackend {
    fn renderer_info(&self) -> RendererInfo {
        self.info
    }

    fn begin_frame(&mut self) {
        debug_assert!(!self.in_frame, "begin_frame called twice");
        self.in_frame = true;
        self.frame += 1;
    }

    fn draw_fullscreen(&mut self, draw: FullscreenDraw<'_>) {
        self.programs.insert(draw.program.key);
        self.draws.push(DrawRecord {
            label: draw.label.to_string(),
            frame: self.frame,
            kind: DrawKind::Fullscreen {
                program_key: draw.program.key,
                textures: draw.program.textures.iter().map(|t| t.name.clone()).collect(),
                uniform_bytes: draw.program.uniform_bytes().len(),
            },
            input: draw.input.map(TargetRecord::new),
            g_buffer: draw.g_buffer.map(TargetRecord::new),
            target: draw.target.map(TargetRecord::new),
        });
    }

    fn draw_scene(&mut self, draw: SceneDraw<'_>) {
        self.draws.push(DrawRecord {
            label: draw.label.to_string(),
            frame: self.frame,
            kind: DrawKind::Scene {
                meshes: draw.scene.visible_meshes(draw.layers).len(),
                clear_color: draw.clear_color,
            },
            input: None,
            g_buffer: None,
            target: draw.target.map(TargetRecord::new),
        });
    }

    fn end_frame(&mut self) {
        self.in_frame = false;
    }
}
