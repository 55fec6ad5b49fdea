use std::cell::Cell;
use std::rc::Rc;

/// Frame timer shared between the pipeline and its passes.
///
/// The pipeline advances it once per [`render`](crate::pipeline::RenderPipeline::render);
/// passes only read it.
#[derive(Debug, Default)]
pub struct Timer {
    delta: Cell<f32>,
    elapsed: Cell<f32>,
    frame: Cell<u64>,
}

pub type SharedTimer = Rc<Timer>;

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta: f32) {
        let delta = delta.max(0.0);
        self.delta.set(delta);
        self.elapsed.set(self.elapsed.get() + delta);
        self.frame.set(self.frame.get() + 1);
    }

    /// Seconds since the previous frame.
    pub fn delta(&self) -> f32 {
        self.delta.get()
    }

    /// Seconds since the first frame.
    pub fn elapsed(&self) -> f32 {
        self.elapsed.get()
    }

    pub fn frame(&self) -> u64 {
        self.frame.get()
    }
}
