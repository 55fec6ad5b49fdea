//! Scene rendering into a G-Buffer.
//!
//! A [`GeometryPass`] draws every visible mesh of the scene. What it draws into depends on the set
//! of G-Buffer textures downstream passes asked for (see
//! [`set_g_buffer_components`](Pass::set_g_buffer_components)):
//!
//! - nothing requested: the display surface (the output has no default buffer);
//! - otherwise: one render target with a color attachment per requested texture, in registry
//!   order, plus a sampleable depth texture when `depth` is requested.
//!
//! Every material in the scene is patched with a [`GBufferOutputInjector`] so its fragment stage
//! writes exactly the attachments of the current target.
//!
//! An enabled [`Selection`] restricts drawing to the nodes on its layer instead of the camera's
//! layers.

use std::any::Any;
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap};
use std::rc::{Rc, Weak};

use super::{CopyPass, DeviceCapabilities, FrameContext, Pass, PassCore};
use crate::backend::SceneDraw;
use crate::error::{Error, Result};
use crate::gbuffer::{GBufferConfig, channel};
use crate::port::{BUFFER_DEPTH, BUFFER_G_BUFFER};
use crate::render_target::{
    ColorSpace, DepthFormat, DepthTexture, FrameBufferType, RenderTarget, TextureInfo,
};
use crate::resource::{Disposable, Resource};
use crate::scene::{
    Material, MaterialCompileContext, SceneEvent, Selection, ShaderInjector, Subscription,
    g_buffer_output_wgsl,
};

/// Construction options of a [`GeometryPass`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GeometryPassOptions {
    /// Depth testing when no depth texture is requested.
    pub depth_buffer: bool,
    /// Combine depth with stencil storage.
    pub stencil_buffer: bool,
    /// Storage of the `color` and `emission` attachments.
    pub frame_buffer_type: FrameBufferType,
    /// MSAA sample count; 0 disables multisampling.
    pub samples: u32,
}

impl Default for GeometryPassOptions {
    fn default() -> Self {
        Self {
            depth_buffer: true,
            stencil_buffer: false,
            frame_buffer_type: FrameBufferType::UnsignedByte,
            samples: 0,
        }
    }
}

impl GeometryPassOptions {
    pub fn with_depth_buffer(mut self, depth_buffer: bool) -> Self {
        self.depth_buffer = depth_buffer;
        self
    }

    pub fn with_stencil_buffer(mut self, stencil_buffer: bool) -> Self {
        self.stencil_buffer = stencil_buffer;
        self
    }

    pub fn with_frame_buffer_type(mut self, frame_buffer_type: FrameBufferType) -> Self {
        self.frame_buffer_type = frame_buffer_type;
        self
    }

    pub fn with_samples(mut self, samples: u32) -> Self {
        self.samples = samples;
        self
    }
}

/// Declares `GBufferOutput` and `write_g_buffer` for the current G-Buffer of a geometry pass.
pub struct GBufferOutputInjector {
    g_buffer: Resource<RenderTarget>,
}

impl GBufferOutputInjector {
    /// Attachment names the fragment stage must write. A single `color` output when the pass
    /// renders to the display surface.
    pub fn outputs(&self) -> Vec<String> {
        self.g_buffer
            .with(|target| {
                target
                    .attachments
                    .iter()
                    .map(|texture| texture.name.clone())
                    .collect()
            })
            .unwrap_or_else(|| vec![channel::COLOR.to_string()])
    }
}

impl ShaderInjector for GBufferOutputInjector {
    fn inject(&self, source: &mut String, _ctx: &MaterialCompileContext<'_>) {
        if source.contains("struct GBufferOutput") {
            return;
        }
        source.push_str(&g_buffer_output_wgsl(&self.outputs()));
    }
}

/// Materials patched by one geometry pass, counted per scene node using them.
#[derive(Default)]
struct MaterialRegistry {
    entries: HashMap<usize, (Material, usize)>,
}

impl MaterialRegistry {
    fn register(&mut self, material: &Material, injector: &Rc<dyn ShaderInjector>) {
        let entry = self.entries.entry(material.key()).or_insert_with(|| {
            material.add_injector(injector.clone());
            (material.clone(), 0)
        });
        entry.1 += 1;
    }

    fn unregister(&mut self, material: &Material, injector: &Rc<dyn ShaderInjector>) {
        let key = material.key();
        let Some(entry) = self.entries.get_mut(&key) else {
            return;
        };
        entry.1 -= 1;
        if entry.1 == 0 {
            material.remove_injector(injector);
            self.entries.remove(&key);
        }
    }

    fn revoke_all(&mut self, injector: &Rc<dyn ShaderInjector>) {
        for (_, (material, _)) in self.entries.drain() {
            material.remove_injector(injector);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Renders the scene into a G-Buffer sized to the pass resolution.
///
/// Publishes the G-Buffer under the `default` and `g_buffer` output keys and the depth texture
/// under `depth`. A depth texture found on the input is reused instead of allocating one.
///
/// # Example
///
/// ```
/// use std::collections::BTreeSet;
/// use phalanx::pass::{GeometryPass, GeometryPassOptions, Pass};
///
/// let mut pass = GeometryPass::new(GeometryPassOptions::default());
/// let requested: BTreeSet<String> = ["color", "normal", "depth"].map(String::from).into();
/// pass.set_g_buffer_components(&requested).unwrap();
///
/// let target = pass.core().output.default_target().unwrap();
/// assert_eq!(target.attachments.len(), 2);
/// assert!(target.depth_texture().is_some());
/// ```
pub struct GeometryPass {
    core: PassCore,
    options: GeometryPassOptions,
    config: Rc<GBufferConfig>,
    components: BTreeSet<String>,
    g_buffer: Resource<RenderTarget>,
    depth: Resource<DepthTexture>,
    color_space: ColorSpace,
    copy: CopyPass,
    injector: Rc<GBufferOutputInjector>,
    registry: Rc<RefCell<MaterialRegistry>>,
    subscription: Option<Subscription>,
    selection: Selection,
}

impl GeometryPass {
    pub fn new(options: GeometryPassOptions) -> Self {
        Self::with_config(options, Rc::new(GBufferConfig::default()))
    }

    pub fn with_config(options: GeometryPassOptions, config: Rc<GBufferConfig>) -> Self {
        let mut core = PassCore::new("geometry");
        let g_buffer = Resource::empty().owned_by(core.owner());
        let depth = Resource::empty().owned_by(core.owner());
        core.output.set_buffer(BUFFER_G_BUFFER, g_buffer.clone());
        core.output.set_buffer(BUFFER_DEPTH, depth.clone());

        let mut copy = CopyPass::new();
        copy.core_mut().output.set_default_buffer(Some(g_buffer.clone()));
        copy.set_enabled(false);

        let injector = Rc::new(GBufferOutputInjector {
            g_buffer: g_buffer.clone(),
        });
        let mut selection = Selection::default();
        selection.enabled = false;
        Self {
            core,
            options,
            config,
            components: BTreeSet::new(),
            g_buffer,
            depth,
            color_space: ColorSpace::LinearSrgb,
            copy,
            injector,
            registry: Rc::default(),
            subscription: None,
            selection,
        }
    }

    pub fn options(&self) -> &GeometryPassOptions {
        &self.options
    }

    pub fn config(&self) -> &Rc<GBufferConfig> {
        &self.config
    }

    /// Textures currently requested from this pass.
    pub fn g_buffer_components(&self) -> &BTreeSet<String> {
        &self.components
    }

    pub fn g_buffer(&self) -> &Resource<RenderTarget> {
        &self.g_buffer
    }

    /// The depth texture published under the `depth` output key.
    pub fn depth(&self) -> Option<&Resource<DepthTexture>> {
        self.core.output.depth_buffer()
    }

    /// Disabled by default; the camera's layers apply then.
    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn selection_mut(&mut self) -> &mut Selection {
        &mut self.selection
    }

    pub fn copy_pass(&self) -> &CopyPass {
        &self.copy
    }

    pub fn injector(&self) -> Rc<dyn ShaderInjector> {
        self.injector.clone()
    }

    /// Number of distinct materials currently patched.
    pub fn registered_materials(&self) -> usize {
        self.registry.borrow().len()
    }

    /// Color space for attachments holding color data.
    fn target_color_space(&self) -> ColorSpace {
        if self.options.frame_buffer_type != FrameBufferType::UnsignedByte {
            return ColorSpace::LinearSrgb;
        }
        self.core
            .context()
            .renderer
            .map_or(ColorSpace::LinearSrgb, |renderer| renderer.output_color_space)
    }

    fn external_depth(&self) -> Option<Resource<DepthTexture>> {
        self.core
            .input
            .depth_buffer()
            .filter(|depth| !depth.ptr_eq(&self.depth) && depth.is_some())
            .cloned()
    }

    fn depth_format(&self) -> DepthFormat {
        if self.options.stencil_buffer {
            DepthFormat::Depth24PlusStencil8
        } else {
            DepthFormat::Depth32Float
        }
    }

    /// Picks the depth texture to publish, allocating or releasing the own one as needed.
    fn update_depth(&mut self) -> Resource<DepthTexture> {
        let depth = match self.external_depth() {
            Some(external) => {
                if let Some(own) = self.depth.take() {
                    own.dispose();
                }
                external
            }
            None => {
                if self.components.contains(channel::DEPTH) {
                    if !self.depth.is_some() {
                        let (width, height) = self.core.resolution.size();
                        self.depth
                            .set(DepthTexture::new(width, height, self.depth_format()));
                    }
                } else if let Some(own) = self.depth.take() {
                    own.dispose();
                }
                self.depth.clone()
            }
        };
        self.core.output.set_buffer(BUFFER_DEPTH, depth.clone());
        depth
    }

    fn rebuild(&mut self) {
        let depth = self.update_depth();
        self.color_space = self.target_color_space();
        if self.components.is_empty() {
            self.core.output.set_default_buffer(None);
            if let Some(previous) = self.g_buffer.take() {
                previous.dispose();
                log::debug!("{}: G-Buffer released", self.core.name());
            }
            return;
        }

        let (width, height) = self.core.resolution.size();
        let mut target =
            RenderTarget::new("g-buffer", width, height).with_samples(self.options.samples);
        for texture in self
            .config
            .textures()
            .filter(|t| self.components.contains(&t.name))
        {
            let Some(format) = texture.format(self.options.frame_buffer_type) else {
                continue;
            };
            let color_space = if texture.color_buffer {
                self.color_space
            } else {
                ColorSpace::None
            };
            target = target.with_attachment(
                TextureInfo::new(texture.name.clone(), format)
                    .with_color_space(color_space)
                    .with_filter(texture.filter),
            );
        }
        if self.components.contains(channel::DEPTH) {
            target.depth_texture = Some(depth);
        } else {
            target = target.with_depth_buffer(self.options.depth_buffer, self.options.stencil_buffer);
        }
        log::debug!(
            "{}: G-Buffer rebuilt with {:?}",
            self.core.name(),
            self.components
        );
        if let Some(previous) = self.g_buffer.set(target) {
            previous.dispose();
        }
        self.core
            .output
            .set_default_buffer(Some(self.g_buffer.clone()));
    }

    /// Enables the copy stage when the input must seed a single-attachment output. The input
    /// depth texture travels along with the copied color.
    fn update_copy(&mut self) {
        let input = self.core.input.default_buffer().cloned();
        match self.core.input.depth_buffer().cloned() {
            Some(depth) => self.copy.core_mut().input.set_buffer(BUFFER_DEPTH, depth),
            None => {
                self.copy.core_mut().input.remove_buffer(BUFFER_DEPTH);
            }
        }
        let multi_target = self
            .g_buffer
            .with(RenderTarget::is_multi_target)
            .unwrap_or(false);
        let enabled = input
            .as_ref()
            .is_some_and(|input| input.is_some() && !input.ptr_eq(&self.g_buffer))
            && !multi_target;
        self.copy.core_mut().input.set_default_buffer(input);
        self.copy.set_enabled(enabled);
    }

    fn register_scene(&mut self) {
        let injector: Rc<dyn ShaderInjector> = self.injector.clone();
        self.subscription = None;
        self.registry.borrow_mut().revoke_all(&injector);

        let Some(scene) = self.core.context().scene.clone() else {
            return;
        };
        let scene = scene.borrow();
        {
            let mut registry = self.registry.borrow_mut();
            scene.traverse(|_, node| {
                if let Some(material) = node.material() {
                    registry.register(material, &injector);
                }
            });
        }
        let registry: Weak<RefCell<MaterialRegistry>> = Rc::downgrade(&self.registry);
        self.subscription = Some(scene.subscribe(move |event| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            match event {
                SceneEvent::NodeAdded {
                    material: Some(material),
                    ..
                } => registry.borrow_mut().register(material, &injector),
                SceneEvent::NodeRemoved {
                    material: Some(material),
                    ..
                } => registry.borrow_mut().unregister(material, &injector),
                _ => {}
            }
        }));
        log::debug!(
            "{}: patched {} material(s)",
            self.core.name(),
            self.registry.borrow().len()
        );
    }
}

impl Pass for GeometryPass {
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

    fn subpasses(&self) -> Vec<&dyn Pass> {
        vec![&self.copy]
    }

    fn subpasses_mut(&mut self) -> Vec<&mut dyn Pass> {
        vec![&mut self.copy]
    }

    fn on_input_change(&mut self) {
        let published = self.core.output.depth_buffer();
        let depth_moved = match (self.external_depth(), published) {
            (Some(external), Some(published)) => !external.ptr_eq(published),
            (None, Some(published)) => !published.ptr_eq(&self.depth),
            (_, None) => true,
        };
        if depth_moved {
            self.rebuild();
        }
        self.update_copy();
    }

    fn on_resolution_change(&mut self) {
        let (width, height) = self.core.resolution.size();
        if let Some(camera) = &self.core.context().camera {
            camera.borrow_mut().aspect = width as f32 / height as f32;
        }
    }

    fn on_scene_change(&mut self) {
        self.register_scene();
    }

    fn refresh(&mut self) {
        if self.target_color_space() != self.color_space {
            self.rebuild();
        }
    }

    fn on_dispose(&mut self) {
        self.subscription = None;
        let injector: Rc<dyn ShaderInjector> = self.injector.clone();
        self.registry.borrow_mut().revoke_all(&injector);
    }

    fn check_requirements(&self, capabilities: &DeviceCapabilities) -> Result<()> {
        if self.options.frame_buffer_type != FrameBufferType::UnsignedByte
            && !capabilities.float_render_targets
        {
            return Err(Error::Capability(format!(
                "{:?} G-Buffer needs float render targets",
                self.options.frame_buffer_type
            )));
        }
        if self.options.samples > capabilities.max_samples {
            return Err(Error::Capability(format!(
                "{} MSAA samples requested, device supports {}",
                self.options.samples, capabilities.max_samples
            )));
        }
        Ok(())
    }

    fn provides_g_buffer(&self) -> bool {
        true
    }

    fn set_g_buffer_components(&mut self, components: &BTreeSet<String>) -> Result<()> {
        if let Some(unknown) = components
            .iter()
            .find(|name| self.config.texture(name).is_none())
        {
            log::warn!("{}: unknown G-Buffer texture {unknown}", self.core.name());
            return Err(Error::UnknownChannel {
                channel: unknown.clone(),
            });
        }
        if *components == self.components {
            return Ok(());
        }
        let color_attachments = components
            .iter()
            .filter_map(|name| self.config.texture(name))
            .filter(|texture| !texture.is_depth())
            .count() as u32;
        if let Some(renderer) = self.core.context().renderer {
            if color_attachments > renderer.capabilities.max_color_attachments {
                log::warn!(
                    "{}: {color_attachments} attachments exceed the device limit of {}",
                    self.core.name(),
                    renderer.capabilities.max_color_attachments
                );
            }
        }
        self.components = components.clone();
        self.rebuild();
        self.update_copy();
        Ok(())
    }

    fn render(&mut self, frame: &mut FrameContext<'_>) {
        if self.copy.enabled() {
            self.copy.render(frame);
        }
        let context = self.core.context();
        let (Some(scene), Some(camera)) = (context.scene.clone(), context.camera.clone()) else {
            return;
        };
        let target = self.g_buffer.borrow().clone();
        let scene = scene.borrow();
        let camera = camera.borrow();
        let layers = if self.selection.enabled {
            self.selection.mask()
        } else {
            camera.layers
        };
        frame.backend.draw_scene(SceneDraw {
            label: self.core.name(),
            scene: &scene,
            camera: &camera,
            layers,
            target: target.as_ref(),
            clear_color: !self.copy.enabled(),
            time: frame.timer.elapsed(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DrawKind, RecordingBackend};
    use crate::camera::Camera;
    use crate::pass::RendererInfo;
    use crate::timer::Timer;
    use crate::render_target::TextureFormat;
    use crate::scene::{MeshData, MeshRenderer, Scene, SceneNode};

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn attached(options: GeometryPassOptions) -> GeometryPass {
        let mut pass = GeometryPass::new(options);
        pass.set_renderer(Some(RendererInfo::default()));
        pass.set_attached(true);
        pass
    }

    #[test]
    fn empty_request_renders_to_the_surface() {
        let mut pass = attached(GeometryPassOptions::default());
        assert!(pass.core().output.default_buffer().is_none());
        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        assert!(pass.core().output.default_buffer().is_some());
        pass.set_g_buffer_components(&set(&[])).unwrap();
        assert!(pass.core().output.default_buffer().is_none());
        assert!(!pass.g_buffer().is_some());
    }

    #[test]
    fn one_attachment_per_requested_texture() {
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_g_buffer_components(&set(&["depth", "normal", "color"]))
            .unwrap();
        let target = pass.core().output.default_target().unwrap();
        let names: Vec<&str> = target.attachments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["color", "normal"]);
        assert!(target.depth_texture().is_some());

        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        let target = pass.core().output.default_target().unwrap();
        assert_eq!(target.attachments.len(), 1);
        assert!(target.depth_texture.is_none());
        assert!(target.depth_buffer);
    }

    #[test]
    fn unknown_textures_are_rejected() {
        let mut pass = attached(GeometryPassOptions::default());
        let err = pass.set_g_buffer_components(&set(&["velocity"])).unwrap_err();
        assert!(matches!(err, Error::UnknownChannel { channel } if channel == "velocity"));
        assert!(pass.g_buffer_components().is_empty());
    }

    #[test]
    fn rebuilding_disposes_the_previous_target() {
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        let first = pass.core().output.default_target().unwrap();
        pass.set_g_buffer_components(&set(&["color", "normal"]))
            .unwrap();
        assert!(first.handle().is_disposed());
    }

    #[test]
    fn external_depth_is_reused() {
        let mut pass = attached(GeometryPassOptions::default());
        let external = Resource::new(DepthTexture::new(8, 8, DepthFormat::Depth32Float));
        pass.core_mut()
            .input
            .set_buffer(BUFFER_DEPTH, external.clone());
        pass.sync();
        pass.set_g_buffer_components(&set(&["color", "depth"]))
            .unwrap();

        let target = pass.core().output.default_target().unwrap();
        assert!(target.depth_texture.as_ref().unwrap().ptr_eq(&external));
        assert!(pass.depth().unwrap().ptr_eq(&external));
        assert!(!pass.depth.is_some());

        pass.core_mut().input.remove_buffer(BUFFER_DEPTH);
        pass.sync();
        let depth = pass.depth().unwrap();
        assert!(!depth.ptr_eq(&external));
        assert!(depth.is_some());
    }

    #[test]
    fn stencil_selects_a_combined_format() {
        let mut pass = attached(GeometryPassOptions::default().with_stencil_buffer(true));
        pass.set_g_buffer_components(&set(&["color", "depth"]))
            .unwrap();
        let depth = pass.depth().and_then(|d| d.borrow().clone()).unwrap();
        assert!(depth.has_stencil());
    }

    #[test]
    fn color_space_follows_precision() {
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_g_buffer_components(&set(&["color", "normal"]))
            .unwrap();
        let target = pass.core().output.default_target().unwrap();
        assert_eq!(target.attachments[0].color_space, ColorSpace::Srgb);
        assert_eq!(target.attachments[1].color_space, ColorSpace::None);

        let mut pass = attached(
            GeometryPassOptions::default().with_frame_buffer_type(FrameBufferType::HalfFloat),
        );
        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        let target = pass.core().output.default_target().unwrap();
        assert_eq!(target.attachments[0].format, TextureFormat::Rgba16Float);
        assert_eq!(target.attachments[0].color_space, ColorSpace::LinearSrgb);
    }

    #[test]
    fn copy_stage_seeds_single_attachment_targets() {
        let mut pass = attached(GeometryPassOptions::default());
        let previous = Resource::new(RenderTarget::color("prev", 4, 4, TextureFormat::Rgba8Unorm));
        pass.core_mut()
            .input
            .set_default_buffer(Some(previous.clone()));
        pass.sync();
        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        assert!(pass.copy_pass().enabled());

        pass.set_g_buffer_components(&set(&["color", "normal"]))
            .unwrap();
        assert!(!pass.copy_pass().enabled());

        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        pass.core_mut().input.set_default_buffer(None);
        pass.sync();
        assert!(!pass.copy_pass().enabled());
    }

    #[test]
    fn copy_stage_receives_the_input_depth() {
        let mut pass = attached(GeometryPassOptions::default());
        let depth = Resource::new(DepthTexture::new(4, 4, DepthFormat::Depth32Float));
        pass.core_mut().input.set_buffer(BUFFER_DEPTH, depth.clone());
        pass.sync();
        let forwarded = pass.copy_pass().core().input.depth_buffer().cloned();
        assert!(forwarded.is_some_and(|d| d.ptr_eq(&depth)));

        pass.core_mut().input.remove_buffer(BUFFER_DEPTH);
        pass.sync();
        assert!(pass.copy_pass().core().input.depth_buffer().is_none());
    }

    #[test]
    fn owned_buffers_follow_the_resolution() {
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_g_buffer_components(&set(&["color", "depth"]))
            .unwrap();
        pass.set_size(320, 200);
        assert_eq!(pass.g_buffer().size(), Some((320, 200)));
        assert_eq!(pass.depth().and_then(|d| d.size()), Some((320, 200)));
    }

    #[test]
    fn float_buffers_need_device_support() {
        let mut pass = GeometryPass::new(
            GeometryPassOptions::default().with_frame_buffer_type(FrameBufferType::Float),
        );
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
    fn materials_are_patched_once_and_tracked() {
        let shared = Material::standard("shared");
        let other = Material::standard("other");
        let mesh = Rc::new(MeshData::cube());
        let node = |material: &Material| {
            SceneNode::new("n").with_mesh(MeshRenderer::new(mesh.clone(), material.clone()))
        };

        let mut scene = Scene::new();
        let a = scene.add(node(&shared));
        scene.add(node(&shared));
        let scene = scene.shared();

        let mut pass = attached(GeometryPassOptions::default());
        pass.set_scene(Some(scene.clone()));
        assert_eq!(shared.injector_count(), 1);
        assert_eq!(pass.registered_materials(), 1);

        let b = scene.borrow_mut().add(node(&other));
        assert_eq!(other.injector_count(), 1);

        scene.borrow_mut().remove(b);
        assert_eq!(other.injector_count(), 0);
        scene.borrow_mut().remove(a);
        assert_eq!(shared.injector_count(), 1);

        pass.set_scene(None);
        assert_eq!(shared.injector_count(), 0);
        assert_eq!(scene.borrow().listener_count(), 0);
    }

    #[test]
    fn injected_outputs_match_the_g_buffer() {
        let material = Material::standard("m");
        let mut scene = Scene::new();
        scene.add(
            SceneNode::new("n")
                .with_mesh(MeshRenderer::new(Rc::new(MeshData::cube()), material.clone())),
        );
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_scene(Some(scene.shared()));
        pass.set_g_buffer_components(&set(&["color", "normal"]))
            .unwrap();

        let wgsl = material.compile(&MaterialCompileContext { outputs: &[] });
        assert!(wgsl.contains("@location(0) color: vec4f"));
        assert!(wgsl.contains("@location(1) normal: vec4f"));
        assert_eq!(wgsl.matches("struct GBufferOutput").count(), 1);
    }

    #[test]
    fn enabled_selection_limits_the_drawn_nodes() {
        let mesh = Rc::new(MeshData::cube());
        let material = Material::standard("m");
        let node = |name: &str| {
            SceneNode::new(name).with_mesh(MeshRenderer::new(mesh.clone(), material.clone()))
        };
        let mut scene = Scene::new();
        let picked = scene.add(node("picked"));
        scene.add(node("other"));
        let scene = scene.shared();

        let mut pass = attached(GeometryPassOptions::default());
        pass.set_scene(Some(scene.clone()));
        pass.set_camera(Some(Camera::new().shared()));
        pass.set_g_buffer_components(&set(&["color"])).unwrap();
        assert!(!pass.selection().enabled);
        assert!(pass.selection_mut().add(&mut scene.borrow_mut(), picked));

        let timer = Timer::new();
        let mut backend = RecordingBackend::new();
        let mut drawn = |pass: &mut GeometryPass| {
            backend.clear();
            pass.render(&mut FrameContext {
                backend: &mut backend,
                timer: &timer,
            });
            match backend.draws().last().map(|d| &d.kind) {
                Some(DrawKind::Scene { meshes, .. }) => *meshes,
                other => panic!("expected a scene draw, got {other:?}"),
            }
        };

        assert_eq!(drawn(&mut pass), 2);
        pass.selection_mut().enabled = true;
        assert_eq!(drawn(&mut pass), 1);
    }

    #[test]
    fn resizing_updates_the_camera_aspect() {
        let camera = Camera::new().shared();
        let mut pass = attached(GeometryPassOptions::default());
        pass.set_camera(Some(camera.clone()));
        pass.set_size(200, 100);
        assert_eq!(camera.borrow().aspect, 2.0);
    }
}
