//! Render passes.
//!
//! A pass is one stage of a [`RenderPipeline`]: it reads buffers from its [`Input`] port, renders
//! into the buffers of its [`Output`] port, and may own child passes ("subpasses") that run as
//! part of it.
//!
//! # Change handling
//!
//! Passes do not subscribe to anything. Every port, resource and resolution carries a revision;
//! [`Pass::sync`] compares them against the revisions seen last time and runs the matching hooks:
//!
//! 1. Output changed: own output buffers are resized, then [`Pass::on_output_change`].
//! 2. Input changed: [`Pass::on_input_change`].
//! 3. Resolution changed: own output buffers are resized, then [`Pass::on_resolution_change`].
//! 4. [`Pass::refresh`], for state that is not carried by ports (e.g. effect revisions).
//!
//! Anything the hooks change on their own ports is absorbed, so a hook never re-triggers itself.
//! The pipeline syncs every attached pass at the start of a frame and after rewiring. A detached
//! pass does not sync; its pending changes are processed when it is attached again.
//!
//! [`RenderPipeline`]: crate::pipeline::RenderPipeline

mod copy;
mod effect;
mod geometry;

pub use copy::CopyPass;
pub use effect::EffectPass;
pub use geometry::{GBufferOutputInjector, GeometryPass, GeometryPassOptions};

use std::any::Any;
use std::collections::BTreeSet;

use crate::backend::RenderBackend;
use crate::camera::SharedCamera;
use crate::error::Result;
use crate::port::{Buffer, Input, Output, PortRevision};
use crate::render_target::ColorSpace;
use crate::resolution::Resolution;
use crate::resource::OwnerToken;
use crate::scene::SharedScene;
use crate::timer::{SharedTimer, Timer};

slotmap::new_key_type! {
    /// Identity of a pass inside a pipeline, handed out when the pass is added.
    pub struct PassId;
}

/// Optional device features passes may depend on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Half and full float color attachments can be rendered to.
    pub float_render_targets: bool,
    pub max_color_attachments: u32,
    /// Highest supported MSAA sample count.
    pub max_samples: u32,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            float_render_targets: true,
            max_color_attachments: 8,
            max_samples: 4,
        }
    }
}

/// What a pass learns about the renderer it is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RendererInfo {
    pub capabilities: DeviceCapabilities,
    /// Color space of the display surface.
    pub output_color_space: ColorSpace,
}

impl Default for RendererInfo {
    fn default() -> Self {
        Self {
            capabilities: DeviceCapabilities::default(),
            output_color_space: ColorSpace::Srgb,
        }
    }
}

/// References a pass receives while attached. Cleared on detach.
#[derive(Clone, Default)]
pub struct PassContext {
    pub renderer: Option<RendererInfo>,
    pub scene: Option<SharedScene>,
    pub camera: Option<SharedCamera>,
    pub timer: Option<SharedTimer>,
}

/// Everything a pass may use while rendering one frame.
pub struct FrameContext<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub timer: &'a Timer,
}

#[derive(Clone, Copy, Debug, Default)]
struct Seen {
    input: Option<PortRevision>,
    output: Option<PortRevision>,
    resolution: Option<u64>,
}

/// State shared by every pass.
pub struct PassCore {
    name: String,
    id: Option<PassId>,
    enabled: bool,
    attached: bool,
    pub resolution: Resolution,
    pub input: Input,
    pub output: Output,
    context: PassContext,
    owner: OwnerToken,
    seen: Seen,
}

impl PassCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            enabled: true,
            attached: false,
            resolution: Resolution::default(),
            input: Input::new(),
            output: Output::new(),
            context: PassContext::default(),
            owner: OwnerToken::new(),
            seen: Seen::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> Option<PassId> {
        self.id
    }

    pub(crate) fn set_id(&mut self, id: Option<PassId>) {
        self.id = id;
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn attached(&self) -> bool {
        self.attached
    }

    pub fn context(&self) -> &PassContext {
        &self.context
    }

    /// Token identifying the resources this pass owns.
    pub fn owner(&self) -> &OwnerToken {
        &self.owner
    }
}

/// One stage of a render pipeline.
///
/// Implementors provide access to their [`PassCore`], override the hooks they care about and
/// implement [`render`](Pass::render). The lifecycle methods are provided and should not be
/// overridden.
pub trait Pass: Any {
    fn core(&self) -> &PassCore;
    fn core_mut(&mut self) -> &mut PassCore;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn subpasses(&self) -> Vec<&dyn Pass> {
        Vec::new()
    }

    fn subpasses_mut(&mut self) -> Vec<&mut dyn Pass> {
        Vec::new()
    }

    fn on_input_change(&mut self) {}

    fn on_output_change(&mut self) {}

    fn on_resolution_change(&mut self) {}

    fn on_scene_change(&mut self) {}

    /// Called at the end of every [`sync`](Pass::sync).
    fn refresh(&mut self) {}

    fn on_dispose(&mut self) {}

    /// Rejects devices that lack something this pass cannot run without.
    fn check_requirements(&self, _capabilities: &DeviceCapabilities) -> Result<()> {
        Ok(())
    }

    fn render(&mut self, frame: &mut FrameContext<'_>);

    /// Whether this pass samples neighbouring pixels of its input.
    fn is_convolution_pass(&self, recursive: bool) -> bool {
        recursive
            && self
                .subpasses()
                .iter()
                .any(|pass| pass.is_convolution_pass(true))
    }

    /// G-Buffer textures this pass reads.
    fn g_buffer_requirements(&self) -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// Whether this pass produces a G-Buffer for the passes after it.
    fn provides_g_buffer(&self) -> bool {
        false
    }

    /// Tells a G-Buffer provider which textures downstream passes read.
    fn set_g_buffer_components(&mut self, _components: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn id(&self) -> Option<PassId> {
        self.core().id()
    }

    fn enabled(&self) -> bool {
        self.core().enabled()
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.core_mut().enabled = enabled;
    }

    /// Attaches or detaches this pass and its subpasses.
    ///
    /// Detaching drops the renderer, scene, camera and timer references. Attaching processes
    /// whatever changed while the pass was detached.
    fn set_attached(&mut self, attached: bool) {
        if self.core().attached == attached {
            return;
        }
        self.core_mut().attached = attached;
        for pass in self.subpasses_mut() {
            pass.set_attached(attached);
        }
        if attached {
            log::debug!("attached pass {}", self.name());
            self.sync();
        } else {
            log::debug!("detached pass {}", self.name());
            let had_scene = self.core().context.scene.is_some();
            self.core_mut().context = PassContext::default();
            if had_scene {
                self.on_scene_change();
            }
        }
    }

    /// Stores the renderer and runs [`initialize`](Pass::initialize) against its capabilities.
    fn set_renderer(&mut self, renderer: Option<RendererInfo>) {
        self.core_mut().context.renderer = renderer;
        for pass in self.subpasses_mut() {
            pass.set_renderer(renderer);
        }
        if let Some(renderer) = renderer {
            self.initialize(&renderer.capabilities);
        }
    }

    fn set_scene(&mut self, scene: Option<SharedScene>) {
        for pass in self.subpasses_mut() {
            pass.set_scene(scene.clone());
        }
        self.core_mut().context.scene = scene;
        self.on_scene_change();
    }

    fn set_camera(&mut self, camera: Option<SharedCamera>) {
        for pass in self.subpasses_mut() {
            pass.set_camera(camera.clone());
        }
        self.core_mut().context.camera = camera;
    }

    fn set_timer(&mut self, timer: Option<SharedTimer>) {
        for pass in self.subpasses_mut() {
            pass.set_timer(timer.clone());
        }
        self.core_mut().context.timer = timer;
    }

    /// Sets the base size and processes the resulting resolution change right away.
    fn set_size(&mut self, width: u32, height: u32) {
        if self.core_mut().resolution.set_base_size(width, height) {
            self.process_resolution();
        }
    }

    /// Handles a resolution change once: resizes own outputs, runs the hook, then hands the new
    /// size down to the subpasses.
    fn process_resolution(&mut self) {
        let revision = self.core().resolution.revision();
        if self.core().seen.resolution == Some(revision) {
            return;
        }
        self.core_mut().seen.resolution = Some(revision);
        self.update_output_buffer_size();
        self.on_resolution_change();
        let resolution = self.core().resolution.clone();
        for pass in self.subpasses_mut() {
            if pass.core_mut().resolution.copy_from(&resolution) {
                pass.process_resolution();
            }
        }
    }

    /// Checks the device and disables the pass if a requirement is missing.
    fn initialize(&mut self, capabilities: &DeviceCapabilities) {
        if let Err(err) = self.check_requirements(capabilities) {
            log::warn!("disabling pass {}: {err}", self.name());
            self.set_enabled(false);
        }
    }

    /// Runs the change hooks for everything that moved since the last sync.
    fn sync(&mut self) {
        if !self.core().attached {
            return;
        }
        let output = self.core().output.revision();
        if self.core().seen.output != Some(output) {
            self.update_output_buffer_size();
            self.on_output_change();
        }
        let input = self.core().input.revision();
        if self.core().seen.input != Some(input) {
            self.on_input_change();
        }
        let core = self.core_mut();
        core.seen.input = Some(core.input.revision());
        core.seen.output = Some(core.output.revision());
        self.process_resolution();
        for pass in self.subpasses_mut() {
            pass.sync();
        }
        self.refresh();
    }

    /// Resizes the output buffers this pass owns to its resolution.
    fn update_output_buffer_size(&mut self) {
        let core = self.core();
        let (width, height) = core.resolution.size();
        for buffer in core.output.buffers().values() {
            match buffer {
                Buffer::Target(target) if target.is_owned_by(&core.owner) => {
                    target.resize(&core.owner, width, height);
                }
                Buffer::Depth(depth) if depth.is_owned_by(&core.owner) => {
                    depth.resize(&core.owner, width, height);
                }
                _ => {}
            }
        }
    }

    /// Releases everything this pass holds.
    ///
    /// Input buffers are let go first, then subpasses are disposed, then every output resource
    /// this pass owns. Resources another input still reads are skipped.
    fn dispose(&mut self) {
        self.core_mut().input.clear_buffers();
        for pass in self.subpasses_mut() {
            pass.dispose();
        }
        let core = self.core_mut();
        for (key, buffer) in core.output.buffers() {
            let owned = match buffer {
                Buffer::Target(target) => target.is_owned_by(&core.owner),
                Buffer::Depth(depth) => depth.is_owned_by(&core.owner),
            };
            if !owned {
                continue;
            }
            if buffer.readers() > 0 {
                log::warn!(
                    "pass {}: not disposing {key}, {} input(s) still read it",
                    core.name,
                    buffer.readers()
                );
                continue;
            }
            match buffer {
                Buffer::Target(target) => target.dispose(),
                Buffer::Depth(depth) => depth.dispose(),
            };
        }
        core.output.clear_buffers();
        self.on_dispose();
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::error::Error;
    use crate::render_target::{RenderTarget, TextureFormat};
    use crate::resource::Resource;

    #[derive(Default)]
    struct Counts {
        input: Cell<u32>,
        output: Cell<u32>,
        resolution: Cell<u32>,
    }

    struct CountingPass {
        core: PassCore,
        counts: Rc<Counts>,
        child: Option<Box<CountingPass>>,
        needs_floats: bool,
    }

    impl CountingPass {
        fn new(name: &str) -> Self {
            Self {
                core: PassCore::new(name),
                counts: Rc::default(),
                child: None,
                needs_floats: false,
            }
        }
    }

    impl Pass for CountingPass {
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

        fn subpasses_mut(&mut self) -> Vec<&mut dyn Pass> {
            self.child
                .iter_mut()
                .map(|c| c.as_mut() as &mut dyn Pass)
                .collect()
        }

        fn on_input_change(&mut self) {
            self.counts.input.set(self.counts.input.get() + 1);
        }

        fn on_output_change(&mut self) {
            self.counts.output.set(self.counts.output.get() + 1);
            // Self-caused changes must not re-trigger the hook.
            self.core.output.set_define("TOUCHED", true);
        }

        fn on_resolution_change(&mut self) {
            self.counts.resolution.set(self.counts.resolution.get() + 1);
        }

        fn check_requirements(&self, capabilities: &DeviceCapabilities) -> Result<()> {
            if self.needs_floats && !capabilities.float_render_targets {
                return Err(Error::Capability("float render targets".into()));
            }
            Ok(())
        }

        fn render(&mut self, _frame: &mut FrameContext<'_>) {}
    }

    fn owned_target(pass: &CountingPass) -> Resource<RenderTarget> {
        Resource::new(RenderTarget::color("out", 1, 1, TextureFormat::Rgba8Unorm))
            .owned_by(pass.core().owner())
    }

    #[test]
    fn detached_passes_do_not_sync() {
        let mut pass = CountingPass::new("p");
        pass.core_mut().input.set_define("A", 1);
        pass.sync();
        assert_eq!(pass.counts.input.get(), 0);
        pass.set_attached(true);
        assert_eq!(pass.counts.input.get(), 1);
        pass.sync();
        assert_eq!(pass.counts.input.get(), 1);
    }

    #[test]
    fn hooks_absorb_their_own_writes() {
        let mut pass = CountingPass::new("p");
        pass.set_attached(true);
        let outputs = pass.counts.output.get();
        pass.core_mut().output.set_define("B", 2);
        pass.sync();
        pass.sync();
        assert_eq!(pass.counts.output.get(), outputs + 1);
    }

    #[test]
    fn set_size_fires_once_per_change_and_reaches_subpasses() {
        let mut pass = CountingPass::new("parent");
        let child = CountingPass::new("child");
        let child_counts = child.counts.clone();
        pass.child = Some(Box::new(child));
        pass.set_attached(true);
        let before = pass.counts.resolution.get();
        let child_before = child_counts.resolution.get();
        pass.set_size(800, 600);
        assert_eq!(pass.counts.resolution.get(), before + 1);
        assert_eq!(child_counts.resolution.get(), child_before + 1);

        pass.set_size(800, 600);
        pass.sync();
        assert_eq!(pass.counts.resolution.get(), before + 1);
        assert_eq!(child_counts.resolution.get(), child_before + 1);
        assert_eq!(pass.core().resolution.size(), (800, 600));
        assert_eq!(
            pass.child.as_ref().map(|c| c.core().resolution.size()),
            Some((800, 600))
        );
    }

    #[test]
    fn own_outputs_follow_the_resolution() {
        let mut pass = CountingPass::new("p");
        let own = owned_target(&pass);
        let foreign = Resource::new(RenderTarget::color("f", 3, 3, TextureFormat::Rgba8Unorm));
        pass.core_mut().output.set_default_buffer(Some(own.clone()));
        pass.core_mut().output.set_buffer("other", foreign.clone());
        pass.set_attached(true);
        pass.set_size(640, 480);
        assert_eq!(own.size(), Some((640, 480)));
        assert_eq!(foreign.size(), Some((3, 3)));
    }

    #[test]
    fn missing_capabilities_disable_the_pass() {
        let mut pass = CountingPass::new("p");
        pass.needs_floats = true;
        pass.set_renderer(Some(RendererInfo {
            capabilities: DeviceCapabilities {
                float_render_targets: false,
                ..DeviceCapabilities::default()
            },
            ..RendererInfo::default()
        }));
        assert!(!pass.enabled());
    }

    #[test]
    fn detaching_drops_context_references() {
        let mut pass = CountingPass::new("p");
        let timer = Rc::new(Timer::new());
        pass.set_timer(Some(timer.clone()));
        pass.set_renderer(Some(RendererInfo::default()));
        pass.set_attached(true);
        pass.set_attached(false);
        assert!(pass.core().context().timer.is_none());
        assert!(pass.core().context().renderer.is_none());
        assert_eq!(Rc::strong_count(&timer), 1);
    }

    #[test]
    fn dispose_skips_resources_still_read() {
        let mut pass = CountingPass::new("p");
        let own = owned_target(&pass);
        pass.core_mut().output.set_default_buffer(Some(own.clone()));
        let mut reader = Input::new();
        reader.set_default_buffer(Some(own.clone()));
        pass.dispose();
        assert!(!own.is_disposed());

        let mut pass = CountingPass::new("q");
        let own = owned_target(&pass);
        let foreign = Resource::new(RenderTarget::color("f", 1, 1, TextureFormat::Rgba8Unorm));
        pass.core_mut().output.set_default_buffer(Some(own.clone()));
        pass.core_mut().output.set_buffer("foreign", foreign.clone());
        pass.dispose();
        pass.dispose();
        assert!(own.is_disposed());
        assert!(!foreign.is_disposed());
    }
}
