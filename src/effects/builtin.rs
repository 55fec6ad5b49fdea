//! Ready-made effects.

use std::any::Any;

use glam::Vec3;

use super::blend::BlendFunction;
use super::effect::{Effect, EffectAttributes, EffectCore, EffectShader, FrameInfo};
use crate::uniform::Uniform;

macro_rules! effect_core {
    ($($ty:ty),* $(,)?) => {
        $(impl Effect for $ty {
            fn core(&self) -> &EffectCore {
                &self.core
            }

            fn core_mut(&mut self) -> &mut EffectCore {
                &mut self.core
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }
        })*
    };
}

fn uniform(core: &mut EffectCore, key: &str, value: Uniform) -> Uniform {
    core.input_mut().set_uniform(key, value.clone());
    value
}

const VIGNETTE_WGSL: &str = r#"
fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
    let d = distance(uv, vec2f(0.5));
    let shade = 1.0 - smoothstep(offset, offset + 0.5, d) * darkness;
    return vec4f(input_color.rgb * shade, input_color.a);
}
"#;

/// Darkens the image towards its edges.
#[derive(Debug)]
pub struct VignetteEffect {
    core: EffectCore,
    offset: Uniform,
    darkness: Uniform,
}

impl VignetteEffect {
    pub fn new() -> Self {
        let mut core = EffectCore::new("vignette", EffectShader::new(VIGNETTE_WGSL));
        let offset = uniform(&mut core, "offset", Uniform::new(0.5f32));
        let darkness = uniform(&mut core, "darkness", Uniform::new(0.5f32));
        Self {
            core,
            offset,
            darkness,
        }
    }

    pub fn set_offset(&self, offset: f32) {
        self.offset.set(offset);
    }

    pub fn set_darkness(&self, darkness: f32) {
        self.darkness.set(darkness.clamp(0.0, 1.0));
    }
}

impl Default for VignetteEffect {
    fn default() -> Self {
        Self::new()
    }
}

const COLOR_DEPTH_WGSL: &str = r#"
fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
    let levels = exp2(bits);
    return vec4f(floor(input_color.rgb * levels + 0.5) / levels, input_color.a);
}
"#;

/// Quantizes each color channel to a number of bits.
#[derive(Debug)]
pub struct ColorDepthEffect {
    core: EffectCore,
    bits: Uniform,
}

impl ColorDepthEffect {
    pub fn new(bits: u32) -> Self {
        let mut core = EffectCore::new("color_depth", EffectShader::new(COLOR_DEPTH_WGSL));
        let bits = uniform(&mut core, "bits", Uniform::new(bits.max(1) as f32));
        Self { core, bits }
    }

    pub fn bits(&self) -> u32 {
        self.bits.as_f32().unwrap_or(1.0) as u32
    }

    pub fn set_bits(&self, bits: u32) {
        self.bits.set(bits.max(1) as f32);
    }
}

const BOX_BLUR_WGSL: &str = r#"
fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
    var sum = vec4f(0.0);
    for (var y = -RADIUS; y <= RADIUS; y++) {
        for (var x = -RADIUS; x <= RADIUS; x++) {
            let offset = vec2f(f32(x), f32(y)) * texel_size;
            sum += textureSampleLevel(input_buffer, input_sampler, uv + offset, 0.0);
        }
    }
    let taps = f32((2 * RADIUS + 1) * (2 * RADIUS + 1));
    return sum / taps;
}
"#;

/// Averages a square neighbourhood of the input. A convolution effect.
#[derive(Debug)]
pub struct BoxBlurEffect {
    core: EffectCore,
}

impl BoxBlurEffect {
    pub fn new(radius: u32) -> Self {
        let shader = EffectShader::new(BOX_BLUR_WGSL).with_attributes(EffectAttributes::CONVOLUTION);
        let mut core = EffectCore::new("box_blur", shader);
        core.input_mut().set_define("RADIUS", i64::from(radius));
        core.set_blend_function(BlendFunction::Src);
        Self { core }
    }

    /// Changing the kernel size recompiles the owning pass.
    pub fn set_radius(&mut self, radius: u32) {
        self.core.input_mut().set_define("RADIUS", i64::from(radius));
    }
}

const PIXELATION_WGSL: &str = r#"
fn main_uv(uv: ptr<function, vec2f>) {
    if (granularity > 1.0) {
        let cell = granularity * texel_size;
        *uv = cell * (floor(*uv / cell) + 0.5);
    }
}
"#;

/// Snaps UVs to a coarse grid. Transforms UVs, so it cannot share a pass with a convolution.
#[derive(Debug)]
pub struct PixelationEffect {
    core: EffectCore,
    granularity: Uniform,
}

impl PixelationEffect {
    pub fn new(granularity: f32) -> Self {
        let mut core = EffectCore::new("pixelation", EffectShader::new(PIXELATION_WGSL));
        let granularity = uniform(&mut core, "granularity", Uniform::new(granularity));
        Self { core, granularity }
    }

    pub fn set_granularity(&self, granularity: f32) {
        self.granularity.set(granularity.max(0.0));
    }
}

const DEPTH_FOG_WGSL: &str = r#"
fn linear_depth(depth: f32) -> f32 {
    return camera_near * camera_far / (camera_far - depth * (camera_far - camera_near));
}

fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
    let d = linear_depth(data.depth);
    let fog = clamp(1.0 - exp(-density * d), 0.0, 1.0);
    return vec4f(mix(input_color.rgb, fog_color, fog), input_color.a);
}
"#;

/// Exponential fog driven by scene depth.
#[derive(Debug)]
pub struct DepthFogEffect {
    core: EffectCore,
    color: Uniform,
    density: Uniform,
}

impl DepthFogEffect {
    pub fn new(color: Vec3, density: f32) -> Self {
        let shader = EffectShader::new(DEPTH_FOG_WGSL)
            .with_functions(["linear_depth"])
            .with_attributes(EffectAttributes::DEPTH);
        let mut core = EffectCore::new("depth_fog", shader);
        let color = uniform(&mut core, "fog_color", Uniform::new(color));
        let density = uniform(&mut core, "density", Uniform::new(density));
        Self {
            core,
            color,
            density,
        }
    }

    pub fn set_color(&self, color: Vec3) {
        self.color.set(color);
    }

    pub fn set_density(&self, density: f32) {
        self.density.set(density.max(0.0));
    }
}

const NOISE_WGSL: &str = r#"
fn rand(co: vec2f) -> f32 {
    return fract(sin(dot(co, vec2f(12.9898, 78.233))) * 43758.5453);
}

fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {
    let n = rand(uv + vec2f(seed));
    return vec4f(vec3f(n), input_color.a);
}
"#;

/// Film grain re-seeded every frame.
#[derive(Debug)]
pub struct NoiseEffect {
    core: EffectCore,
    seed: Uniform,
}

impl NoiseEffect {
    pub fn new(opacity: f32) -> Self {
        let shader = EffectShader::new(NOISE_WGSL).with_functions(["rand"]);
        let mut core = EffectCore::new("noise", shader);
        core.set_blend_function(BlendFunction::Screen);
        core.blend_mode().set_opacity(opacity);
        let seed = uniform(&mut core, "seed", Uniform::new(0.0f32));
        Self { core, seed }
    }

    pub fn seed(&self) -> f32 {
        self.seed.as_f32().unwrap_or_default()
    }
}

effect_core!(
    VignetteEffect,
    ColorDepthEffect,
    BoxBlurEffect,
    PixelationEffect,
    DepthFogEffect,
);

impl Effect for NoiseEffect {
    fn core(&self) -> &EffectCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut EffectCore {
        &mut self.core
    }

    fn update(&mut self, frame: &FrameInfo) {
        self.seed.set(frame.elapsed.fract());
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectShaderData, Section};
    use crate::error::Error;
    use crate::gbuffer::GBufferConfig;

    fn merge(effects: &[&dyn Effect]) -> crate::error::Result<EffectShaderData> {
        EffectShaderData::merge("e", effects, &GBufferConfig::default())
    }

    #[test]
    fn built_ins_validate() {
        let effects: Vec<Box<dyn Effect>> = vec![
            Box::new(VignetteEffect::new()),
            Box::new(ColorDepthEffect::new(4)),
            Box::new(BoxBlurEffect::new(2)),
            Box::new(PixelationEffect::new(8.0)),
            Box::new(DepthFogEffect::new(Vec3::ONE, 0.1)),
            Box::new(NoiseEffect::new(0.2)),
        ];
        for effect in &effects {
            assert!(effect.validate().is_ok(), "{}", effect.name());
        }
    }

    #[test]
    fn blur_is_a_convolution() {
        let blur = BoxBlurEffect::new(1);
        assert!(blur.shader().is_convolution());
        let pixelation = PixelationEffect::new(4.0);
        assert!(matches!(
            merge(&[&blur, &pixelation]),
            Err(Error::UvTransformWithConvolution { .. })
        ));
    }

    #[test]
    fn fog_requests_depth() {
        let fog = DepthFogEffect::new(Vec3::ONE, 0.1);
        let data = merge(&[&VignetteEffect::new(), &fog]).unwrap();
        assert!(data.reads_depth());
        let image = data.section(Section::FragmentMainImage);
        assert!(image.find("e1_main_image").unwrap() < image.find("e0_main_image").unwrap());
    }

    #[test]
    fn blur_radius_is_structural() {
        let mut blur = BoxBlurEffect::new(1);
        let before = blur.revision();
        blur.set_radius(3);
        assert!(blur.revision() > before);
    }

    #[test]
    fn noise_reseeds_every_frame() {
        let mut noise = NoiseEffect::new(0.1);
        let before = noise.revision();
        noise.update(&FrameInfo {
            elapsed: 2.25,
            ..FrameInfo::default()
        });
        assert_eq!(noise.seed(), 0.25);
        assert_eq!(noise.revision(), before);
    }

    #[test]
    fn vignette_uniform_writes_are_shared() {
        let vignette = VignetteEffect::new();
        vignette.set_darkness(0.8);
        assert_eq!(vignette.input().uniform("darkness").and_then(|u| u.as_f32()), Some(0.8));
    }
}
