//! Demo: a small scene drawn through a geometry pass, a merged fog/vignette/noise pass and an
//! optional blur pass.
//!
//! Keys: `Space` toggles the merged effects, `B` toggles the blur, `Escape` quits.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;

use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

use phalanx::scene::{MaterialParams, NodeId};
use phalanx::*;

struct Demo {
    window: Arc<Window>,
    backend: WgpuBackend,
    pipeline: RenderPipeline,
    scene: scene::SharedScene,
    spinner: NodeId,
    effects: PassId,
    blur: PassId,
    last_frame: Instant,
}

impl Demo {
    fn new(window: Arc<Window>) -> anyhow::Result<Self> {
        let backend = WgpuBackend::new(GpuContext::new(window.clone())?);
        let size = window.inner_size();

        let mut scene = Scene::new();
        scene.background = Vec4::new(0.55, 0.6, 0.65, 1.0);
        let red = Material::standard("red").with_params(MaterialParams {
            base_color: Vec4::new(0.8, 0.15, 0.1, 1.0),
            ..Default::default()
        });
        let ground = Material::standard("ground").with_params(MaterialParams {
            base_color: Vec4::new(0.35, 0.35, 0.3, 1.0),
            roughness: 0.9,
            ..Default::default()
        });
        let spinner = scene.add(
            SceneNode::new("cube")
                .with_transform(Transform::from_position(Vec3::new(0.0, 1.0, 0.0)))
                .with_mesh(MeshRenderer::new(Rc::new(MeshData::cube()), red.clone())),
        );
        for i in 0..8 {
            let angle = i as f32 / 8.0 * std::f32::consts::TAU;
            scene.add(
                SceneNode::new(format!("sphere-{i}"))
                    .with_transform(
                        Transform::from_position(Vec3::new(angle.cos(), 0.0, angle.sin()) * 4.0)
                            .uniform_scale(0.6),
                    )
                    .with_mesh(MeshRenderer::new(Rc::new(MeshData::sphere(24, 16)), red.clone())),
            );
        }
        scene.add(
            SceneNode::new("ground")
                .with_transform(Transform::from_position(Vec3::new(0.0, -0.6, 0.0)))
                .with_mesh(MeshRenderer::new(Rc::new(MeshData::plane(40.0)), ground)),
        );
        let scene = scene.shared();

        let camera = Camera::new()
            .at(Vec3::new(0.0, 3.0, 9.0))
            .looking_at(Vec3::ZERO)
            .with_fov(60.0)
            .shared();

        let mut pipeline = RenderPipeline::for_backend(&backend);
        pipeline.set_scene(Some(scene.clone()));
        pipeline.set_camera(Some(camera));
        pipeline.add(GeometryPass::new(GeometryPassOptions::default()));
        let effects = pipeline.add(EffectPass::new(vec![
            Box::new(DepthFogEffect::new(Vec3::new(0.55, 0.6, 0.65), 0.06)),
            Box::new(VignetteEffect::new()),
            Box::new(NoiseEffect::new(0.05)),
        ])?);
        let blur = pipeline.add(EffectPass::new(vec![Box::new(BoxBlurEffect::new(2))])?);
        if let Some(pass) = pipeline.pass_mut(blur) {
            pass.set_enabled(false);
        }
        pipeline.set_size(size.width, size.height);
        log::info!("pipeline ready with {} passes", pipeline.len());

        Ok(Self {
            window,
            backend,
            pipeline,
            scene,
            spinner,
            effects,
            blur,
            last_frame: Instant::now(),
        })
    }

    fn toggle(&mut self, id: PassId) {
        if let Some(pass) = self.pipeline.pass_mut(id) {
            let enabled = !pass.enabled();
            pass.set_enabled(enabled);
            log::info!("{}: {}", pass.name(), if enabled { "on" } else { "off" });
        }
    }

    fn frame(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_frame).as_secs_f32();
        self.last_frame = now;

        let elapsed = self.pipeline.timer().elapsed() + delta;
        if let Some(node) = self.scene.borrow_mut().get_mut(self.spinner) {
            node.transform.rotation = Quat::from_rotation_y(elapsed) * Quat::from_rotation_x(0.4);
        }
        self.pipeline.render(&mut self.backend, delta);
    }
}

#[derive(Default)]
struct App {
    demo: Option<Demo>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.demo.is_some() {
            return;
        }
        let attributes = Window::default_attributes().with_title("phalanx");
        let demo = event_loop
            .create_window(attributes)
            .map_err(anyhow::Error::from)
            .and_then(|window| Demo::new(Arc::new(window)));
        match demo {
            Ok(demo) => self.demo = Some(demo),
            Err(e) => {
                log::error!("startup failed: {e:#}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(demo) = &mut self.demo else {
            return;
        };
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::Resized(size) => {
                demo.backend.resize(size.width, size.height);
                demo.pipeline.set_size(size.width, size.height);
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                match event.physical_key {
                    PhysicalKey::Code(KeyCode::Escape) => event_loop.exit(),
                    PhysicalKey::Code(KeyCode::Space) => demo.toggle(demo.effects),
                    PhysicalKey::Code(KeyCode::KeyB) => demo.toggle(demo.blur),
                    _ => {}
                }
            }
            WindowEvent::RedrawRequested => {
                demo.frame();
                demo.window.request_redraw();
            }
            _ => {}
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(demo) = &mut self.demo {
            demo.pipeline.dispose();
        }
    }
}

fn main() -> anyhow::Result<()> {
    init_log();
    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    event_loop.run_app(&mut App::default())?;
    Ok(())
}
