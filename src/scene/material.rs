//! Materials and compile-time shader injection.
//!
//! A [`Material`] carries surface parameters and a WGSL source whose fragment stage fills a
//! `Surface` struct and hands it to `write_g_buffer`. Neither `write_g_buffer` nor the
//! `GBufferOutput` struct it returns is part of the material: they are supplied at compile time by
//! the material's [`ShaderInjector`]s, which run in registration order. A geometry pass registers
//! an injector that declares exactly the outputs of its current G-Buffer.
//!
//! Materials that no injector has claimed are compiled against the target they are drawn into.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use glam::{Vec3, Vec4};

/// Base WGSL shared by every material.
pub const STANDARD_MATERIAL_WGSL: &str = include_str!("../shaders/mesh.wgsl");

/// Surface parameters uploaded per draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialParams {
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub roughness: f32,
    pub metalness: f32,
    pub occlusion: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            roughness: 0.5,
            metalness: 0.0,
            occlusion: 1.0,
        }
    }
}

/// What an injector may inspect while patching a material.
#[derive(Clone, Copy, Debug)]
pub struct MaterialCompileContext<'a> {
    /// Color attachment names of the target being drawn into, in location order.
    pub outputs: &'a [String],
}

/// A compile-time patch applied to a material's shader source.
pub trait ShaderInjector {
    fn inject(&self, source: &mut String, ctx: &MaterialCompileContext<'_>);
}

/// WGSL declaring `GBufferOutput` and `write_g_buffer` for the given outputs.
///
/// Known outputs (`color`, `normal`, `orm`, `emission`) are filled from the surface; anything
/// else is written as zero. With no color outputs at all only depth is written.
pub fn g_buffer_output_wgsl(outputs: &[String]) -> String {
    let mut out = String::from("\nstruct GBufferOutput {\n");
    if outputs.is_empty() {
        out.push_str("    @builtin(frag_depth) depth: f32,\n}\n");
        out.push_str(
            "\nfn write_g_buffer(surface: Surface) -> GBufferOutput {\n    var out: GBufferOutput;\n    out.depth = surface.depth;\n    return out;\n}\n",
        );
        return out;
    }

    for (location, name) in outputs.iter().enumerate() {
        out.push_str(&format!("    @location({location}) {name}: vec4f,\n"));
    }
    out.push_str("}\n\nfn write_g_buffer(surface: Surface) -> GBufferOutput {\n    var out: GBufferOutput;\n");
    for name in outputs {
        let value = match name.as_str() {
            "color" => "surface.color".to_string(),
            "normal" => "vec4f(surface.normal * 0.5 + 0.5, 1.0)".to_string(),
            "orm" => "vec4f(surface.orm, 1.0)".to_string(),
            "emission" => "vec4f(surface.emission, 1.0)".to_string(),
            _ => "vec4f(0.0)".to_string(),
        };
        out.push_str(&format!("    out.{name} = {value};\n"));
    }
    out.push_str("    return out;\n}\n");
    out
}

struct MaterialInner {
    name: String,
    source: String,
    params: Cell<MaterialParams>,
    injectors: RefCell<Vec<Rc<dyn ShaderInjector>>>,
    version: Cell<u64>,
}

/// Shared material handle; clones refer to the same material.
#[derive(Clone)]
pub struct Material(Rc<MaterialInner>);

impl Material {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self(Rc::new(MaterialInner {
            name: name.into(),
            source: source.into(),
            params: Cell::new(MaterialParams::default()),
            injectors: RefCell::new(Vec::new()),
            version: Cell::new(0),
        }))
    }

    /// A material using the built-in surface shader.
    pub fn standard(name: impl Into<String>) -> Self {
        Self::new(name, STANDARD_MATERIAL_WGSL)
    }

    pub fn with_params(self, params: MaterialParams) -> Self {
        self.set_params(params);
        self
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn params(&self) -> MaterialParams {
        self.0.params.get()
    }

    pub fn set_params(&self, params: MaterialParams) {
        self.0.params.set(params);
    }

    /// Bumped whenever the injector list changes; backends recompile on a new version.
    pub fn version(&self) -> u64 {
        self.0.version.get()
    }

    /// Identity for caches and registries.
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Material) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn add_injector(&self, injector: Rc<dyn ShaderInjector>) {
        self.0.injectors.borrow_mut().push(injector);
        self.0.version.set(self.0.version.get() + 1);
    }

    /// Removes `injector` (by identity). Returns `false` if it was not registered.
    pub fn remove_injector(&self, injector: &Rc<dyn ShaderInjector>) -> bool {
        let target = Rc::as_ptr(injector) as *const ();
        let mut injectors = self.0.injectors.borrow_mut();
        let before = injectors.len();
        injectors.retain(|other| Rc::as_ptr(other) as *const () != target);
        let removed = injectors.len() != before;
        if removed {
            self.0.version.set(self.0.version.get() + 1);
        }
        removed
    }

    pub fn injector_count(&self) -> usize {
        self.0.injectors.borrow().len()
    }

    /// Produces the final WGSL for a draw into a target with `ctx.outputs`.
    pub fn compile(&self, ctx: &MaterialCompileContext<'_>) -> String {
        let mut source = self.0.source.clone();
        let injectors: Vec<Rc<dyn ShaderInjector>> = self.0.injectors.borrow().clone();
        for injector in injectors {
            injector.inject(&mut source, ctx);
        }
        if !source.contains("struct GBufferOutput") {
            source.push_str(&g_buffer_output_wgsl(ctx.outputs));
        }
        source
    }
}

impl fmt::Debug for Material {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.0.name)
            .field("injectors", &self.injector_count())
            .field("version", &self.version())
            .finish()
    }
}
