//! The render pipeline: an ordered list of passes and the buffers between them.
//!
//! # Wiring
//!
//! Before every frame (and whenever passes are added or removed) the pipeline connects the
//! enabled passes in order:
//!
//! - The first pass reads nothing; every later pass reads the default output of the pass before
//!   it.
//! - Passes without an output of their own write into one of two pipeline-owned buffers,
//!   alternating so that no pass reads and writes the same buffer. The last pass writes to the
//!   display surface.
//! - A pass that brings its own output (a [`GeometryPass`] G-Buffer, or a buffer set by the
//!   caller) keeps it; the next pass reads from it and the alternation continues from there.
//! - The G-Buffer and depth texture of the first G-Buffer provider are handed to every pass after
//!   it under the `g_buffer` and `depth` input keys.
//!
//! Buffers the caller placed on a port are never overwritten or removed.
//!
//! Each G-Buffer provider is told which textures the enabled passes after it read, plus `color`
//! whenever another pass follows.
//!
//! # Example
//!
//! ```
//! use phalanx::backend::RecordingBackend;
//! use phalanx::effects::VignetteEffect;
//! use phalanx::pass::{EffectPass, GeometryPass, GeometryPassOptions};
//! use phalanx::pipeline::RenderPipeline;
//!
//! let mut backend = RecordingBackend::new();
//! let mut pipeline = RenderPipeline::for_backend(&backend);
//! pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
//! pipeline.add(EffectPass::new(vec![Box::new(VignetteEffect::new())]).unwrap());
//! pipeline.set_size(800, 600);
//! pipeline.render(&mut backend, 1.0 / 60.0);
//!
//! let last = backend.draws().last().unwrap();
//! assert!(last.to_screen());
//! ```
//!
//! [`GeometryPass`]: crate::pass::GeometryPass

use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use slotmap::{SecondaryMap, SlotMap};

use crate::backend::RenderBackend;
use crate::camera::SharedCamera;
use crate::gbuffer::channel;
use crate::pass::{FrameContext, Pass, PassId, RendererInfo};
use crate::port::{BUFFER_DEFAULT, BUFFER_DEPTH, BUFFER_G_BUFFER, Buffer, Port, PortKind};
use crate::render_target::{ColorSpace, FrameBufferType, RenderTarget, TextureInfo};
use crate::resolution::Resolution;
use crate::resource::{Disposable, OwnerToken, Resource};
use crate::scene::SharedScene;
use crate::timer::{SharedTimer, Timer};

const BUFFER_LABELS: [&str; 2] = ["buffer-a", "buffer-b"];

/// Buffers the pipeline placed on a pass's ports, by key.
#[derive(Default)]
struct Wiring {
    input: HashMap<&'static str, Buffer>,
    output: HashMap<&'static str, Buffer>,
}

/// Places `buffer` under `key` unless the port holds a buffer the pipeline did not put there.
fn assign<K: PortKind>(
    port: &mut Port<K>,
    assigned: &mut HashMap<&'static str, Buffer>,
    key: &'static str,
    buffer: Option<Buffer>,
) {
    if let Some(current) = port.buffer(key) {
        if !assigned.get(key).is_some_and(|ours| ours.ptr_eq(current)) {
            return;
        }
    }
    match buffer {
        Some(buffer) => {
            port.set_buffer(key, buffer.clone());
            assigned.insert(key, buffer);
        }
        None => {
            port.remove_buffer(key);
            assigned.remove(key);
        }
    }
}

/// Removes whatever the pipeline placed on `port` and the caller has not replaced since.
fn release<K: PortKind>(port: &mut Port<K>, assigned: &mut HashMap<&'static str, Buffer>) {
    for (key, buffer) in assigned.drain() {
        if port.buffer(key).is_some_and(|current| current.ptr_eq(&buffer)) {
            port.remove_buffer(key);
        }
    }
}

fn intermediate_buffer(label: &str, frame_buffer_type: FrameBufferType) -> RenderTarget {
    RenderTarget::new(label, 1, 1).with_attachment(
        TextureInfo::new(channel::COLOR, frame_buffer_type.color_format())
            .with_color_space(ColorSpace::LinearSrgb),
    )
}

/// Runs a sequence of passes once per frame.
pub struct RenderPipeline {
    passes: SlotMap<PassId, Box<dyn Pass>>,
    order: Vec<PassId>,
    wiring: SecondaryMap<PassId, Wiring>,
    owner: OwnerToken,
    buffers: [Resource<RenderTarget>; 2],
    renderer: RendererInfo,
    resolution: Resolution,
    scene: Option<SharedScene>,
    camera: Option<SharedCamera>,
    timer: SharedTimer,
}

impl RenderPipeline {
    pub fn new(renderer: RendererInfo) -> Self {
        let owner = OwnerToken::new();
        let buffers = BUFFER_LABELS.map(|label| {
            Resource::new(intermediate_buffer(label, FrameBufferType::UnsignedByte))
                .owned_by(&owner)
        });
        Self {
            passes: SlotMap::with_key(),
            order: Vec::new(),
            wiring: SecondaryMap::new(),
            owner,
            buffers,
            renderer,
            resolution: Resolution::default(),
            scene: None,
            camera: None,
            timer: Rc::new(Timer::new()),
        }
    }

    pub fn for_backend(backend: &dyn RenderBackend) -> Self {
        Self::new(backend.renderer_info())
    }

    /// Storage precision of the two intermediate buffers.
    pub fn with_frame_buffer_type(self, frame_buffer_type: FrameBufferType) -> Self {
        let (width, height) = self.resolution.base_size();
        for (buffer, label) in self.buffers.iter().zip(BUFFER_LABELS) {
            let mut target = intermediate_buffer(label, frame_buffer_type);
            target.width = width;
            target.height = height;
            if let Some(previous) = buffer.set(target) {
                previous.dispose();
            }
        }
        self
    }

    pub fn renderer(&self) -> RendererInfo {
        self.renderer
    }

    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    pub fn size(&self) -> (u32, u32) {
        self.resolution.base_size()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Pass ids in execution order.
    pub fn ids(&self) -> &[PassId] {
        &self.order
    }

    /// The two intermediate buffers.
    pub fn buffers(&self) -> &[Resource<RenderTarget>; 2] {
        &self.buffers
    }

    /// Appends a pass.
    pub fn add<P: Pass>(&mut self, pass: P) -> PassId {
        self.insert(self.order.len(), pass)
    }

    /// Inserts a pass at `index` (clamped to the end).
    pub fn insert<P: Pass>(&mut self, index: usize, pass: P) -> PassId {
        self.insert_boxed(index, Box::new(pass))
    }

    pub fn insert_boxed(&mut self, index: usize, mut pass: Box<dyn Pass>) -> PassId {
        let (width, height) = self.resolution.base_size();
        pass.set_timer(Some(self.timer.clone()));
        pass.set_camera(self.camera.clone());
        pass.set_scene(self.scene.clone());
        pass.set_size(width, height);
        pass.set_renderer(Some(self.renderer));

        let id = self.passes.insert_with_key(|id| {
            pass.core_mut().set_id(Some(id));
            pass
        });
        let index = index.min(self.order.len());
        self.order.insert(index, id);
        self.wiring.insert(id, Wiring::default());
        self.rewire();
        if let Some(pass) = self.passes.get_mut(id) {
            pass.set_attached(true);
            log::debug!("added pass {} at position {index}", pass.name());
        }
        id
    }

    /// Detaches a pass and hands it back. Passes after it are rewired; a pass that was reading
    /// its depth texture falls back to its own.
    pub fn remove(&mut self, id: PassId) -> Option<Box<dyn Pass>> {
        let index = self.order.iter().position(|other| *other == id)?;
        self.order.remove(index);
        self.unwire(id);
        self.wiring.remove(id);
        let mut pass = self.passes.remove(id)?;
        pass.set_attached(false);
        pass.core_mut().set_id(None);
        log::debug!("removed pass {}", pass.name());
        self.rewire();
        Some(pass)
    }

    pub fn pass(&self, id: PassId) -> Option<&dyn Pass> {
        self.passes.get(id).map(|pass| pass.as_ref())
    }

    pub fn pass_mut(&mut self, id: PassId) -> Option<&mut dyn Pass> {
        self.passes.get_mut(id).map(|pass| pass.as_mut())
    }

    pub fn get<T: Pass>(&self, id: PassId) -> Option<&T> {
        self.passes.get(id)?.as_any().downcast_ref()
    }

    pub fn get_mut<T: Pass>(&mut self, id: PassId) -> Option<&mut T> {
        self.passes.get_mut(id)?.as_any_mut().downcast_mut()
    }

    /// Passes in execution order.
    pub fn passes(&self) -> impl Iterator<Item = (PassId, &dyn Pass)> {
        self.order
            .iter()
            .filter_map(|id| self.passes.get(*id).map(|pass| (*id, pass.as_ref())))
    }

    /// Resizes every pass (in order) and the intermediate buffers.
    pub fn set_size(&mut self, width: u32, height: u32) {
        if !self.resolution.set_base_size(width, height) {
            return;
        }
        let (width, height) = self.resolution.base_size();
        for id in &self.order {
            if let Some(pass) = self.passes.get_mut(*id) {
                pass.set_size(width, height);
            }
        }
        for buffer in &self.buffers {
            buffer.resize(&self.owner, width, height);
        }
    }

    pub fn set_scene(&mut self, scene: Option<SharedScene>) {
        self.scene = scene;
        for pass in self.passes.values_mut() {
            pass.set_scene(self.scene.clone());
        }
    }

    pub fn scene(&self) -> Option<&SharedScene> {
        self.scene.as_ref()
    }

    pub fn set_camera(&mut self, camera: Option<SharedCamera>) {
        self.camera = camera;
        for pass in self.passes.values_mut() {
            pass.set_camera(self.camera.clone());
        }
    }

    pub fn camera(&self) -> Option<&SharedCamera> {
        self.camera.as_ref()
    }

    /// Renders one frame. Disabled passes are skipped entirely.
    pub fn render(&mut self, backend: &mut dyn RenderBackend, delta: f32) {
        self.timer.advance(delta);
        for id in &self.order {
            if let Some(pass) = self.passes.get_mut(*id) {
                pass.sync();
            }
        }
        self.rewire();

        let timer = self.timer.clone();
        backend.begin_frame();
        {
            let mut frame = FrameContext {
                backend: &mut *backend,
                timer: &timer,
            };
            for id in &self.order {
                let Some(pass) = self.passes.get_mut(*id) else {
                    continue;
                };
                if pass.enabled() {
                    pass.render(&mut frame);
                }
            }
        }
        backend.end_frame();
    }

    /// Disposes every pass and the intermediate buffers.
    pub fn dispose(&mut self) {
        let order = std::mem::take(&mut self.order);
        for id in &order {
            self.unwire(*id);
        }
        for id in order.iter().rev() {
            if let Some(mut pass) = self.passes.remove(*id) {
                pass.set_attached(false);
                pass.dispose();
            }
        }
        self.wiring.clear();
        for buffer in &self.buffers {
            buffer.dispose();
        }
    }

    fn unwire(&mut self, id: PassId) {
        let (Some(pass), Some(wiring)) = (self.passes.get_mut(id), self.wiring.get_mut(id)) else {
            return;
        };
        let core = pass.core_mut();
        release(&mut core.input, &mut wiring.input);
        release(&mut core.output, &mut wiring.output);
    }

    fn propagate_requirements(&mut self, enabled: &[PassId]) {
        for (index, id) in enabled.iter().enumerate() {
            if !self.passes[*id].provides_g_buffer() {
                continue;
            }
            let mut required = BTreeSet::new();
            for later in &enabled[index + 1..] {
                required.extend(self.passes[*later].g_buffer_requirements());
            }
            if index + 1 < enabled.len() {
                required.insert(channel::COLOR.to_string());
            }
            let pass = &mut self.passes[*id];
            if let Err(err) = pass.set_g_buffer_components(&required) {
                log::warn!("{}: {err}", pass.name());
            }
        }
    }

    fn rewire(&mut self) {
        let enabled: Vec<PassId> = self
            .order
            .iter()
            .copied()
            .filter(|id| self.passes.get(*id).is_some_and(|pass| pass.enabled()))
            .collect();
        for id in self.order.clone() {
            if !enabled.contains(&id) {
                self.unwire(id);
            }
        }
        self.propagate_requirements(&enabled);

        let mut previous: Option<Resource<RenderTarget>> = None;
        let mut provider: Option<(Option<Buffer>, Option<Buffer>)> = None;
        for (index, id) in enabled.iter().enumerate() {
            let last = index + 1 == enabled.len();
            let (Some(pass), Some(wiring)) = (self.passes.get_mut(*id), self.wiring.get_mut(*id))
            else {
                continue;
            };
            let core = pass.core_mut();

            assign(
                &mut core.input,
                &mut wiring.input,
                BUFFER_DEFAULT,
                previous.clone().map(Buffer::Target),
            );
            let (g_buffer, depth) = provider.clone().unwrap_or((None, None));
            assign(&mut core.input, &mut wiring.input, BUFFER_G_BUFFER, g_buffer);
            assign(&mut core.input, &mut wiring.input, BUFFER_DEPTH, depth);

            let foreign = core.output.default_buffer().filter(|current| {
                !wiring
                    .output
                    .get(BUFFER_DEFAULT)
                    .is_some_and(|ours| ours.as_target().is_some_and(|ours| ours.ptr_eq(current)))
            });
            previous = match foreign {
                Some(own) => Some(own.clone()),
                None if last => {
                    assign(&mut core.output, &mut wiring.output, BUFFER_DEFAULT, None);
                    None
                }
                None => {
                    let next = self
                        .buffers
                        .iter()
                        .find(|buffer| !previous.as_ref().is_some_and(|p| p.ptr_eq(buffer)))
                        .unwrap_or(&self.buffers[0])
                        .clone();
                    assign(
                        &mut core.output,
                        &mut wiring.output,
                        BUFFER_DEFAULT,
                        Some(Buffer::Target(next.clone())),
                    );
                    Some(next)
                }
            };

            // Providers may republish their input depth; read outputs after the input settles.
            pass.sync();
            if provider.is_none() && pass.provides_g_buffer() {
                let output = &pass.core().output;
                provider = Some((
                    output.buffer(BUFFER_G_BUFFER).cloned(),
                    output.buffer(BUFFER_DEPTH).cloned(),
                ));
            }
        }
        log::debug!("rewired {} enabled pass(es)", enabled.len());

        for id in &self.order {
            if let Some(pass) = self.passes.get_mut(*id) {
                pass.sync();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::cell::Cell;

    use glam::Vec3;

    use super::*;
    use crate::backend::{DrawKind, RecordingBackend};
    use crate::camera::Camera;
    use crate::effects::{DepthFogEffect, NoiseEffect, VignetteEffect};
    use crate::pass::{
        DeviceCapabilities, EffectPass, GeometryPass, GeometryPassOptions, PassCore,
    };
    use crate::render_target::TextureFormat;
    use crate::scene::{Material, MeshData, MeshRenderer, Scene, SceneNode};

    struct CountingPass {
        core: PassCore,
        resizes: Rc<Cell<u32>>,
    }

    impl CountingPass {
        fn new(resizes: &Rc<Cell<u32>>) -> Self {
            Self {
                core: PassCore::new("counting"),
                resizes: resizes.clone(),
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

        fn on_resolution_change(&mut self) {
            self.resizes.set(self.resizes.get() + 1);
        }

        fn render(&mut self, _frame: &mut FrameContext<'_>) {}
    }

    fn effects(effects: Vec<Box<dyn crate::effects::Effect>>) -> EffectPass {
        EffectPass::new(effects).unwrap()
    }

    fn scene() -> SharedScene {
        let mut scene = Scene::new();
        scene.add(SceneNode::new("cube").with_mesh(MeshRenderer::new(
            Rc::new(MeshData::cube()),
            Material::standard("white"),
        )));
        scene.shared()
    }

    fn input_default(pipeline: &RenderPipeline, id: PassId) -> Option<Resource<RenderTarget>> {
        pipeline.pass(id)?.core().input.default_buffer().cloned()
    }

    fn output_default(pipeline: &RenderPipeline, id: PassId) -> Option<Resource<RenderTarget>> {
        pipeline.pass(id)?.core().output.default_buffer().cloned()
    }

    fn same(a: Option<Resource<RenderTarget>>, b: &Resource<RenderTarget>) -> bool {
        a.is_some_and(|a| a.ptr_eq(b))
    }

    #[test]
    fn set_size_reaches_every_pass_exactly_once() {
        let counts: Vec<Rc<Cell<u32>>> = (0..3).map(|_| Rc::default()).collect();
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let ids: Vec<PassId> = counts
            .iter()
            .map(|count| pipeline.add(CountingPass::new(count)))
            .collect();
        let before: Vec<u32> = counts.iter().map(|c| c.get()).collect();

        pipeline.set_size(800, 600);
        pipeline.set_size(800, 600);

        for ((count, before), id) in counts.iter().zip(before).zip(&ids) {
            assert_eq!(count.get(), before + 1);
            assert_eq!(pipeline.pass(*id).unwrap().core().resolution.size(), (800, 600));
        }
        for buffer in pipeline.buffers() {
            assert_eq!(buffer.size(), Some((800, 600)));
        }
    }

    #[test]
    fn chained_passes_ping_pong_and_end_on_screen() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let a = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        let b = pipeline.add(effects(vec![Box::new(NoiseEffect::new(0.1))]));
        let c = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        let [first, second] = pipeline.buffers().clone();

        assert!(input_default(&pipeline, a).is_none());
        assert!(same(output_default(&pipeline, a), &first));
        assert!(same(input_default(&pipeline, b), &first));
        assert!(same(output_default(&pipeline, b), &second));
        assert!(same(input_default(&pipeline, c), &second));
        assert!(output_default(&pipeline, c).is_none());

        let mut backend = RecordingBackend::new();
        pipeline.render(&mut backend, 0.016);
        let targets: Vec<Option<&str>> = backend
            .draws()
            .iter()
            .map(|d| d.target.as_ref().map(|t| t.label.as_str()))
            .collect();
        assert_eq!(targets, vec![Some("buffer-a"), Some("buffer-b"), None]);
    }

    #[test]
    fn caller_buffers_are_never_overwritten() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let mut first = effects(vec![Box::new(VignetteEffect::new())]);
        let custom = Resource::new(RenderTarget::color("custom", 4, 4, TextureFormat::Rgba16Float));
        first
            .core_mut()
            .output
            .set_default_buffer(Some(custom.clone()));
        let a = pipeline.add(first);
        let b = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        let c = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));

        assert!(same(output_default(&pipeline, a), &custom));
        assert!(same(input_default(&pipeline, b), &custom));
        assert!(same(output_default(&pipeline, b), &pipeline.buffers()[0]));
        assert!(same(input_default(&pipeline, c), &pipeline.buffers()[0]));

        pipeline.remove(b);
        assert!(same(output_default(&pipeline, a), &custom));
        assert!(same(input_default(&pipeline, c), &custom));
    }

    #[test]
    fn geometry_pass_alone_renders_to_the_surface() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        pipeline.set_scene(Some(scene()));
        pipeline.set_camera(Some(Camera::new().shared()));
        let id = pipeline.add(GeometryPass::new(GeometryPassOptions::default()));

        let mut backend = RecordingBackend::new();
        pipeline.render(&mut backend, 0.016);
        let geometry = pipeline.get::<GeometryPass>(id).unwrap();
        assert!(geometry.g_buffer_components().is_empty());
        assert_eq!(backend.draws().len(), 1);
        assert!(backend.draws()[0].to_screen());
        assert!(matches!(
            backend.draws()[0].kind,
            DrawKind::Scene { meshes: 1, clear_color: true }
        ));
    }

    #[test]
    fn g_buffer_follows_downstream_requirements() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        pipeline.set_scene(Some(scene()));
        pipeline.set_camera(Some(Camera::new().shared()));
        let geometry = pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
        let fog = pipeline.add(effects(vec![Box::new(DepthFogEffect::new(Vec3::ONE, 0.1))]));
        pipeline.set_size(64, 32);

        let pass = pipeline.get::<GeometryPass>(geometry).unwrap();
        let requested: Vec<&str> = pass.g_buffer_components().iter().map(String::as_str).collect();
        assert_eq!(requested, vec!["color", "depth"]);
        let g_buffer = pass.g_buffer().clone();
        let depth = pass.depth().cloned().unwrap();
        assert_eq!(g_buffer.size(), Some((64, 32)));

        let reader = pipeline.pass(fog).unwrap().core();
        assert!(reader.input.g_buffer().is_some_and(|g| g.ptr_eq(&g_buffer)));
        assert!(reader.input.depth_buffer().is_some_and(|d| d.ptr_eq(&depth)));
        assert!(same(reader.input.default_buffer().cloned(), &g_buffer));

        let mut backend = RecordingBackend::new();
        pipeline.render(&mut backend, 0.016);
        let draws = backend.draws();
        assert_eq!(draws[0].target.as_ref().unwrap().label, "g-buffer");
        assert_eq!(draws[0].target.as_ref().unwrap().depth_texture, Some((64, 32)));
        assert!(draws[1].to_screen());
        assert_eq!(draws[1].input.as_ref().unwrap().label, "g-buffer");
    }

    #[test]
    fn disabled_passes_are_skipped_and_bridged() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let a = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        let b = pipeline.add(effects(vec![Box::new(NoiseEffect::new(0.1))]));
        let c = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        pipeline.pass_mut(b).unwrap().set_enabled(false);

        let mut backend = RecordingBackend::new();
        pipeline.render(&mut backend, 0.016);
        assert_eq!(backend.draws().len(), 2);
        assert!(pipeline.pass(b).unwrap().core().input.default_buffer().is_none());
        assert!(same(
            input_default(&pipeline, c),
            &output_default(&pipeline, a).unwrap()
        ));
        assert!(backend.draws()[1].to_screen());
    }

    #[test]
    fn removing_a_depth_provider_reassigns_depth() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let first = pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
        let second = pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
        pipeline.add(effects(vec![Box::new(DepthFogEffect::new(Vec3::ONE, 0.1))]));

        let shared = pipeline.get::<GeometryPass>(first).unwrap().depth().cloned().unwrap();
        let reused = pipeline.get::<GeometryPass>(second).unwrap().depth().cloned().unwrap();
        assert!(shared.ptr_eq(&reused));

        let mut removed = pipeline.remove(first).unwrap();
        let own = pipeline.get::<GeometryPass>(second).unwrap().depth().cloned().unwrap();
        assert!(!own.ptr_eq(&shared));
        assert!(own.is_some());
        assert_eq!(shared.readers(), 0);
        removed.dispose();
        assert!(shared.is_disposed());
    }

    #[test]
    fn dispose_releases_owned_resources_once() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let geometry = pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
        pipeline.add(effects(vec![Box::new(DepthFogEffect::new(Vec3::ONE, 0.1))]));
        let pass = pipeline.get::<GeometryPass>(geometry).unwrap();
        let g_buffer = pass.g_buffer().clone();
        let target = g_buffer.borrow().clone().unwrap();
        let depth = pass.depth().cloned().unwrap();
        let buffers = pipeline.buffers().clone();

        pipeline.dispose();
        assert!(g_buffer.is_disposed());
        assert!(target.handle().is_disposed());
        assert!(depth.is_disposed());
        assert!(buffers.iter().all(Resource::is_disposed));
        assert!(pipeline.is_empty());
        pipeline.dispose();
    }

    #[test]
    fn passes_lacking_capabilities_are_disabled() {
        let renderer = RendererInfo {
            capabilities: DeviceCapabilities {
                float_render_targets: false,
                ..DeviceCapabilities::default()
            },
            ..RendererInfo::default()
        };
        let mut pipeline = RenderPipeline::new(renderer);
        let geometry = pipeline.add(GeometryPass::new(
            GeometryPassOptions::default().with_frame_buffer_type(FrameBufferType::HalfFloat),
        ));
        pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        assert!(!pipeline.pass(geometry).unwrap().enabled());

        let mut backend = RecordingBackend::new();
        pipeline.render(&mut backend, 0.016);
        assert_eq!(backend.draws().len(), 1);
        assert!(backend.draws()[0].input.is_none());
    }

    #[test]
    fn inserted_passes_take_their_position() {
        let mut pipeline = RenderPipeline::new(RendererInfo::default());
        let a = pipeline.add(effects(vec![Box::new(VignetteEffect::new())]));
        let b = pipeline.insert(0, effects(vec![Box::new(NoiseEffect::new(0.1))]));
        assert_eq!(pipeline.ids(), &[b, a]);
        assert_eq!(pipeline.pass(b).unwrap().id(), Some(b));
        assert!(same(input_default(&pipeline, a), &pipeline.buffers()[0]));
    }
}
