//! Blend functions combining an effect's result with the accumulated color.
//!
//! Every function is emitted as a WGSL `fn blend(x: vec4f, y: vec4f, opacity: f32) -> vec4f`
//! where `x` is the accumulated color and `y` the effect output. The merger renames `blend` to
//! `blend_<id>` so that each distinct function appears once per program.

use std::fmt;
use std::str::FromStr;

use crate::uniform::Uniform;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlendFunction {
    /// Keeps the accumulated color; the effect is computed but discarded.
    Dst,
    Src,
    Normal,
    Add,
    Alpha,
    Average,
    ColorBurn,
    ColorDodge,
    Darken,
    Difference,
    Divide,
    Exclusion,
    HardLight,
    Lighten,
    Multiply,
    Negation,
    Overlay,
    Reflect,
    Screen,
    SoftLight,
    Subtract,
}

impl BlendFunction {
    pub const ALL: [BlendFunction; 21] = [
        BlendFunction::Dst,
        BlendFunction::Src,
        BlendFunction::Normal,
        BlendFunction::Add,
        BlendFunction::Alpha,
        BlendFunction::Average,
        BlendFunction::ColorBurn,
        BlendFunction::ColorDodge,
        BlendFunction::Darken,
        BlendFunction::Difference,
        BlendFunction::Divide,
        BlendFunction::Exclusion,
        BlendFunction::HardLight,
        BlendFunction::Lighten,
        BlendFunction::Multiply,
        BlendFunction::Negation,
        BlendFunction::Overlay,
        BlendFunction::Reflect,
        BlendFunction::Screen,
        BlendFunction::SoftLight,
        BlendFunction::Subtract,
    ];

    /// Stable numeric id used to name the emitted function.
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn name(self) -> &'static str {
        match self {
            BlendFunction::Dst => "dst",
            BlendFunction::Src => "src",
            BlendFunction::Normal => "normal",
            BlendFunction::Add => "add",
            BlendFunction::Alpha => "alpha",
            BlendFunction::Average => "average",
            BlendFunction::ColorBurn => "color-burn",
            BlendFunction::ColorDodge => "color-dodge",
            BlendFunction::Darken => "darken",
            BlendFunction::Difference => "difference",
            BlendFunction::Divide => "divide",
            BlendFunction::Exclusion => "exclusion",
            BlendFunction::HardLight => "hard-light",
            BlendFunction::Lighten => "lighten",
            BlendFunction::Multiply => "multiply",
            BlendFunction::Negation => "negation",
            BlendFunction::Overlay => "overlay",
            BlendFunction::Reflect => "reflect",
            BlendFunction::Screen => "screen",
            BlendFunction::SoftLight => "soft-light",
            BlendFunction::Subtract => "subtract",
        }
    }

    /// Per-channel RGB expression in terms of `x` and `y`, for the separable modes.
    fn rgb(self) -> Option<&'static str> {
        Some(match self {
            BlendFunction::Add => "x.rgb + y.rgb",
            BlendFunction::Average => "(x.rgb + y.rgb) * 0.5",
            BlendFunction::ColorBurn => {
                "select(max(vec3f(1.0) - (vec3f(1.0) - x.rgb) / y.rgb, vec3f(0.0)), y.rgb, y.rgb == vec3f(0.0))"
            }
            BlendFunction::ColorDodge => {
                "select(min(x.rgb / (vec3f(1.0) - y.rgb), vec3f(1.0)), y.rgb, y.rgb == vec3f(1.0))"
            }
            BlendFunction::Darken => "min(x.rgb, y.rgb)",
            BlendFunction::Difference => "abs(x.rgb - y.rgb)",
            BlendFunction::Divide => "x.rgb / max(y.rgb, vec3f(1e-6))",
            BlendFunction::Exclusion => "x.rgb + y.rgb - 2.0 * x.rgb * y.rgb",
            BlendFunction::HardLight => {
                "select(vec3f(1.0) - 2.0 * (vec3f(1.0) - x.rgb) * (vec3f(1.0) - y.rgb), 2.0 * x.rgb * y.rgb, y.rgb < vec3f(0.5))"
            }
            BlendFunction::Lighten => "max(x.rgb, y.rgb)",
            BlendFunction::Multiply => "x.rgb * y.rgb",
            BlendFunction::Negation => "vec3f(1.0) - abs(vec3f(1.0) - x.rgb - y.rgb)",
            BlendFunction::Overlay => {
                "select(vec3f(1.0) - 2.0 * (vec3f(1.0) - x.rgb) * (vec3f(1.0) - y.rgb), 2.0 * x.rgb * y.rgb, x.rgb < vec3f(0.5))"
            }
            BlendFunction::Reflect => {
                "select(min(x.rgb * x.rgb / (vec3f(1.0) - y.rgb), vec3f(1.0)), y.rgb, y.rgb == vec3f(1.0))"
            }
            BlendFunction::Screen => "vec3f(1.0) - (vec3f(1.0) - x.rgb) * (vec3f(1.0) - y.rgb)",
            BlendFunction::SoftLight => {
                "(vec3f(1.0) - 2.0 * y.rgb) * x.rgb * x.rgb + 2.0 * y.rgb * x.rgb"
            }
            BlendFunction::Subtract => "max(x.rgb + y.rgb - vec3f(1.0), vec3f(0.0))",
            BlendFunction::Dst
            | BlendFunction::Src
            | BlendFunction::Normal
            | BlendFunction::Alpha => return None,
        })
    }

    /// WGSL source of the unrenamed `blend` function.
    pub fn wgsl(self) -> String {
        const SIGNATURE: &str = "fn blend(x: vec4f, y: vec4f, opacity: f32) -> vec4f";
        let body = match self {
            BlendFunction::Dst => "    return x;".to_string(),
            BlendFunction::Src => "    return mix(x, y, opacity);".to_string(),
            BlendFunction::Normal => "    return mix(x, y, y.a * opacity);".to_string(),
            BlendFunction::Alpha => "    return mix(x, y, min(y.a, opacity));".to_string(),
            separable => {
                let rgb = separable.rgb().unwrap_or("y.rgb");
                format!(
                    "    let z = {rgb};\n    return vec4f(mix(x.rgb, z, opacity), max(x.a, y.a * opacity));"
                )
            }
        };
        format!("{SIGNATURE} {{\n{body}\n}}\n")
    }
}

impl fmt::Display for BlendFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BlendFunction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim().to_ascii_lowercase().replace('_', "-");
        BlendFunction::ALL
            .into_iter()
            .find(|f| f.name() == token)
            .ok_or_else(|| format!("unsupported blend function: {s}"))
    }
}

/// How an effect's output is combined with the running color.
#[derive(Clone, Debug)]
pub struct BlendMode {
    function: BlendFunction,
    opacity: Uniform,
}

impl BlendMode {
    pub fn new(function: BlendFunction) -> Self {
        Self {
            function,
            opacity: Uniform::new(1.0f32),
        }
    }

    pub fn function(&self) -> BlendFunction {
        self.function
    }

    /// Replacing the function changes the generated shader.
    pub(crate) fn set_function(&mut self, function: BlendFunction) {
        self.function = function;
    }

    pub fn opacity(&self) -> &Uniform {
        &self.opacity
    }

    /// Opacity is a uniform; changing it never recompiles.
    pub fn set_opacity(&self, opacity: f32) {
        self.opacity.set(opacity.clamp(0.0, 1.0));
    }
}

impl Default for BlendMode {
    fn default() -> Self {
        Self::new(BlendFunction::Normal)
    }
}
