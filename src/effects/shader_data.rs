//! Merging effects into one shader description.
//!
//! [`EffectShaderData`] accumulates the WGSL sections, defines, uniforms, blend functions and
//! G-Buffer channels of a set of effects. It is always rebuilt from scratch by
//! [`EffectShaderData::merge`]; two independently merged records can be combined with
//! [`EffectShaderData::add`].
//!
//! Color space tracking is "last declared wins": the working color space after a merge is the
//! output (or, failing that, input) color space of the last effect that declared one. The input
//! color space of the first declaring effect is remembered as the entry color space instead of
//! emitting a conversion right away, so that combining two records inserts exactly the
//! conversion a single merge of both effect lists would have needed at the seam.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use indexmap::IndexMap;

use super::blend::BlendFunction;
use super::effect::{Effect, MAIN_IMAGE, MAIN_SUPPORT, MAIN_UV};
use super::wgsl;
use crate::error::{Error, Result};
use crate::gbuffer::{GBufferConfig, channel};
use crate::port::DefineValue;
use crate::render_target::ColorSpace;
use crate::uniform::Uniform;

/// Logical section of the merged program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Section {
    /// `struct GData` declaration.
    FragmentHeadGBuffer,
    /// Blend functions and the renamed effect sources.
    FragmentHeadEffects,
    /// `main_uv` calls.
    FragmentMainUv,
    /// `g_data` initialization.
    FragmentMainGData,
    /// `main_image` calls, blends and color conversions.
    FragmentMainImage,
    /// Renamed vertex sources.
    VertexHead,
    /// `main_support` calls and varying writes.
    VertexMainSupport,
}

/// Statement converting `color0` between color spaces, if one is needed.
pub(crate) fn color_conversion(from: ColorSpace, to: ColorSpace) -> Option<&'static str> {
    match (from, to) {
        (ColorSpace::LinearSrgb, ColorSpace::Srgb) => Some("    color0 = linear_to_srgb(color0);\n"),
        (ColorSpace::Srgb, ColorSpace::LinearSrgb) => Some("    color0 = srgb_to_linear(color0);\n"),
        _ => None,
    }
}

/// Accumulated shader description of a set of effects.
#[derive(Clone, Debug, Default)]
pub struct EffectShaderData {
    sections: BTreeMap<Section, String>,
    defines: IndexMap<String, DefineValue>,
    uniforms: IndexMap<String, Uniform>,
    blend_functions: BTreeSet<BlendFunction>,
    g_data: BTreeSet<String>,
    convolution_effects: Vec<String>,
    uv_effects: Vec<String>,
    color_space: ColorSpace,
    entry_color_space: ColorSpace,
    /// Position in `FragmentMainImage` of the first effect that declares an input color space.
    entry_offset: usize,
    varyings: IndexMap<String, String>,
    prefixes: BTreeSet<String>,
}

impl EffectShaderData {
    /// Empty record. `GData` always carries the input color.
    pub fn new() -> Self {
        Self {
            g_data: BTreeSet::from([channel::COLOR.to_string()]),
            ..Self::default()
        }
    }

    /// Merges `effects` in precedence order.
    ///
    /// Effects are sorted by descending [`precedence`](super::EffectShader::precedence), ties
    /// keeping their position in `effects`. Each effect's identifiers are prefixed with
    /// `{namespace}{position}_`, where position is its index in `effects`, so the result only
    /// depends on the effect list.
    pub fn merge(namespace: &str, effects: &[&dyn Effect], config: &GBufferConfig) -> Result<Self> {
        let mut order: Vec<(usize, &dyn Effect)> = effects.iter().copied().enumerate().collect();
        order.sort_by_key(|(_, effect)| std::cmp::Reverse(effect.shader().precedence()));

        let mut data = Self::new();
        for (index, effect) in order {
            data.integrate_effect(&format!("{namespace}{index}_"), effect, config)?;
        }
        Ok(data)
    }

    /// Adds a single effect under `prefix`.
    pub fn integrate_effect(
        &mut self,
        prefix: &str,
        effect: &dyn Effect,
        config: &GBufferConfig,
    ) -> Result<()> {
        effect.validate()?;
        if self.prefixes.contains(prefix) {
            return Err(Error::NamespaceCollision {
                prefix: prefix.to_string(),
            });
        }

        let shader = effect.shader();
        let name = effect.name().to_string();
        let mut convolution = self.convolution_effects.clone();
        let mut uv_effects = self.uv_effects.clone();
        if shader.is_convolution() {
            convolution.push(name.clone());
        }
        if shader.transforms_uv() {
            uv_effects.push(name.clone());
        }
        check_compatibility(&convolution, &uv_effects)?;

        let mut g_data = shader.g_data_channels();
        config.close(&mut g_data)?;

        let input = effect.input();
        let mut renames: HashMap<String, String> = shader
            .local_names()
            .into_iter()
            .map(|symbol| (symbol.clone(), format!("{prefix}{symbol}")))
            .collect();
        for key in input.defines().keys() {
            renames.insert(key.clone(), format!("{prefix}{key}"));
        }
        for key in input.uniforms().keys() {
            renames.insert(key.clone(), format!("uniforms.{prefix}{key}"));
        }

        // Everything fallible is done; from here on the record only grows.
        self.convolution_effects = convolution;
        self.uv_effects = uv_effects;
        self.g_data.extend(g_data);
        self.prefixes.insert(prefix.to_string());

        for (key, value) in input.defines() {
            let value = match value {
                DefineValue::Expr(expr) => DefineValue::Expr(wgsl::rename_identifiers(expr, &renames)),
                other => other.clone(),
            };
            self.defines.insert(format!("{prefix}{key}"), value);
        }
        for (key, uniform) in input.uniforms() {
            self.uniforms.insert(format!("{prefix}{key}"), uniform.clone());
        }
        let blend_mode = effect.blend_mode();
        self.uniforms.insert(
            format!("{prefix}blend_opacity"),
            blend_mode.opacity().clone(),
        );
        self.blend_functions.insert(blend_mode.function());

        if shader.transforms_uv() {
            self.push(Section::FragmentMainUv, &format!("    {prefix}{MAIN_UV}(&UV);\n"));
        }

        self.track_color_space(shader.input_color_space, shader.output_color_space);

        if shader.has_main_image() {
            let id = blend_mode.function().id();
            self.push(
                Section::FragmentMainImage,
                &format!(
                    "    color1 = {prefix}{MAIN_IMAGE}(color0, UV, g_data);\n    color0 = blend_{id}(color0, color1, uniforms.{prefix}blend_opacity);\n"
                ),
            );
        }

        let fragment = wgsl::rename_identifiers(&shader.fragment, &renames);
        self.push(
            Section::FragmentHeadEffects,
            &format!("// {name}\n{}\n", fragment.trim()),
        );

        if let Some(vertex) = &shader.vertex {
            let vertex = wgsl::rename_identifiers(vertex, &renames);
            self.push(Section::VertexHead, &format!("// {name}\n{}\n", vertex.trim()));
            self.push(
                Section::VertexMainSupport,
                &format!("    {prefix}{MAIN_SUPPORT}(uv);\n"),
            );
            for (varying, wgsl_type) in &shader.symbols.varyings {
                let varying = format!("{prefix}{varying}");
                self.push(
                    Section::VertexMainSupport,
                    &format!("    out.{varying} = {varying};\n"),
                );
                self.varyings.insert(varying, wgsl_type.clone());
            }
        }
        Ok(())
    }

    fn track_color_space(&mut self, input: ColorSpace, output: ColorSpace) {
        if input != ColorSpace::None {
            if self.color_space == ColorSpace::None {
                self.entry_color_space = input;
                self.entry_offset = self.section(Section::FragmentMainImage).len();
            } else if let Some(conversion) = color_conversion(self.color_space, input) {
                self.push(Section::FragmentMainImage, conversion);
            }
        }
        if output != ColorSpace::None {
            self.color_space = output;
        } else if input != ColorSpace::None {
            self.color_space = input;
        }
    }

    fn push(&mut self, section: Section, text: &str) {
        self.sections.entry(section).or_default().push_str(text);
    }

    /// Appends `other`, as if its effects had been merged after the effects of `self`.
    ///
    /// Fails without modifying `self` if the combination is invalid.
    pub fn add(&mut self, other: &EffectShaderData) -> Result<()> {
        if let Some(prefix) = other.prefixes.intersection(&self.prefixes).next() {
            return Err(Error::NamespaceCollision {
                prefix: prefix.clone(),
            });
        }
        let convolution: Vec<String> = self
            .convolution_effects
            .iter()
            .chain(&other.convolution_effects)
            .cloned()
            .collect();
        let uv_effects: Vec<String> = self.uv_effects.iter().chain(&other.uv_effects).cloned().collect();
        check_compatibility(&convolution, &uv_effects)?;

        self.convolution_effects = convolution;
        self.uv_effects = uv_effects;

        let image_len = self.section(Section::FragmentMainImage).len();
        let seam = if self.color_space == ColorSpace::None {
            if other.entry_color_space != ColorSpace::None {
                self.entry_color_space = other.entry_color_space;
                self.entry_offset = image_len + other.entry_offset;
            }
            None
        } else {
            color_conversion(self.color_space, other.entry_color_space)
        };
        if other.color_space != ColorSpace::None {
            self.color_space = other.color_space;
        }

        for (section, text) in &other.sections {
            match seam {
                Some(conversion) if *section == Section::FragmentMainImage => {
                    let mut text = text.clone();
                    text.insert_str(other.entry_offset.min(text.len()), conversion);
                    self.push(*section, &text);
                }
                _ => self.push(*section, text),
            }
        }
        if let Some(conversion) = seam {
            if !other.sections.contains_key(&Section::FragmentMainImage) {
                self.push(Section::FragmentMainImage, conversion);
            }
        }

        self.defines
            .extend(other.defines.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.uniforms
            .extend(other.uniforms.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.blend_functions.extend(other.blend_functions.iter().copied());
        self.g_data.extend(other.g_data.iter().cloned());
        self.varyings
            .extend(other.varyings.iter().map(|(k, v)| (k.clone(), v.clone())));
        self.prefixes.extend(other.prefixes.iter().cloned());
        Ok(())
    }

    /// Re-checks the convolution and UV-transform constraints.
    pub fn validate(&self) -> Result<()> {
        check_compatibility(&self.convolution_effects, &self.uv_effects)
    }

    /// Stored text of `section`. The G-Buffer sections are derived, see [`Self::sections`].
    pub fn section(&self, section: Section) -> &str {
        self.sections.get(&section).map_or("", String::as_str)
    }

    /// Every section, including the `GData` declaration and initialization and the deduplicated
    /// blend functions, ready for assembly.
    pub fn sections(&self, config: &GBufferConfig) -> BTreeMap<Section, String> {
        let mut sections = self.sections.clone();
        sections.insert(
            Section::FragmentHeadGBuffer,
            config.struct_declaration(&self.g_data),
        );
        sections.insert(
            Section::FragmentMainGData,
            config.struct_initialization(&self.g_data),
        );

        let mut head = String::new();
        for function in &self.blend_functions {
            let renames = HashMap::from([("blend".to_string(), format!("blend_{}", function.id()))]);
            head.push_str(&wgsl::rename_identifiers(&function.wgsl(), &renames));
            head.push('\n');
        }
        for (varying, wgsl_type) in &self.varyings {
            head.push_str(&format!("var<private> {varying}: {wgsl_type};\n"));
        }
        head.push_str(self.section(Section::FragmentHeadEffects));
        sections.insert(Section::FragmentHeadEffects, head);

        let mut vertex_head = String::new();
        for (varying, wgsl_type) in &self.varyings {
            vertex_head.push_str(&format!("var<private> {varying}: {wgsl_type};\n"));
        }
        vertex_head.push_str(self.section(Section::VertexHead));
        sections.insert(Section::VertexHead, vertex_head);

        if let Some(conversion) = color_conversion(ColorSpace::LinearSrgb, self.entry_color_space) {
            let image = sections.entry(Section::FragmentMainImage).or_default();
            image.insert_str(self.entry_offset.min(image.len()), conversion);
        }
        if let Some(conversion) = color_conversion(self.color_space, ColorSpace::LinearSrgb) {
            sections
                .entry(Section::FragmentMainImage)
                .or_default()
                .push_str(conversion);
        }
        sections
    }

    pub fn defines(&self) -> &IndexMap<String, DefineValue> {
        &self.defines
    }

    pub fn uniforms(&self) -> &IndexMap<String, Uniform> {
        &self.uniforms
    }

    pub fn blend_functions(&self) -> &BTreeSet<BlendFunction> {
        &self.blend_functions
    }

    /// Required `GData` channels, closed under the registry's dependencies.
    pub fn g_data(&self) -> &BTreeSet<String> {
        &self.g_data
    }

    /// G-Buffer textures backing [`Self::g_data`].
    pub fn required_textures(&self, config: &GBufferConfig) -> BTreeSet<String> {
        config.textures_for(&self.g_data)
    }

    pub fn convolution_effects(&self) -> &[String] {
        &self.convolution_effects
    }

    pub fn uv_transformation(&self) -> bool {
        !self.uv_effects.is_empty()
    }

    /// Working color space after the last effect; `None` if no effect declared one.
    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Input color space of the first effect that declared one.
    pub fn entry_color_space(&self) -> ColorSpace {
        self.entry_color_space
    }

    pub fn varyings(&self) -> &IndexMap<String, String> {
        &self.varyings
    }

    pub fn prefixes(&self) -> &BTreeSet<String> {
        &self.prefixes
    }

    pub fn reads_depth(&self) -> bool {
        self.g_data.contains(channel::DEPTH)
    }
}

fn check_compatibility(convolution: &[String], uv_effects: &[String]) -> Result<()> {
    if convolution.len() > 1 {
        return Err(Error::ConvolutionConflict {
            effects: convolution.join(", "),
        });
    }
    if !convolution.is_empty() && !uv_effects.is_empty() {
        return Err(Error::UvTransformWithConvolution {
            convolution: convolution.join(", "),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{EffectAttributes, EffectShader, ShaderEffect};
    use proptest::prelude::*;

    fn image(body: &str) -> String {
        format!("fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {{ {body} }}")
    }

    fn plain(name: &str) -> ShaderEffect {
        ShaderEffect::new(name, EffectShader::new(image("return input_color;"))).unwrap()
    }

    fn convolution(name: &str) -> ShaderEffect {
        ShaderEffect::new(
            name,
            EffectShader::new(image("return input_color;")).with_attributes(EffectAttributes::CONVOLUTION),
        )
        .unwrap()
    }

    fn uv_transform(name: &str) -> ShaderEffect {
        ShaderEffect::new(
            name,
            EffectShader::new("fn main_uv(uv: ptr<function, vec2f>) { *uv = *uv * 0.5; }"),
        )
        .unwrap()
    }

    fn merge(effects: &[&ShaderEffect]) -> Result<EffectShaderData> {
        let effects: Vec<&dyn Effect> = effects.iter().map(|e| *e as &dyn Effect).collect();
        EffectShaderData::merge("e", &effects, &GBufferConfig::default())
    }

    #[test]
    fn two_convolutions_conflict() {
        let result = merge(&[&convolution("a"), &convolution("b")]);
        assert_eq!(
            result.unwrap_err(),
            Error::ConvolutionConflict {
                effects: "a, b".into()
            }
        );
    }

    #[test]
    fn uv_transforms_conflict_with_convolution() {
        let result = merge(&[&uv_transform("warp"), &convolution("blur")]);
        assert!(matches!(
            result,
            Err(Error::UvTransformWithConvolution { .. })
        ));
    }

    #[test]
    fn plain_effects_merge() {
        let data = merge(&[&plain("a"), &plain("b")]).unwrap();
        assert!(data.convolution_effects().is_empty());
        assert!(data.validate().is_ok());
    }

    #[test]
    fn identifiers_get_per_effect_prefixes() {
        let helper = ShaderEffect::new(
            "helper",
            EffectShader::new(format!(
                "fn shade(c: vec4f) -> vec4f {{ return c * strength; }}\n{}",
                image("return shade(input_color);")
            ))
            .with_functions(["shade"]),
        )
        .unwrap()
        .with_uniform("strength", 0.5f32);
        let data = merge(&[&plain("first"), &helper]).unwrap();
        let head = data.section(Section::FragmentHeadEffects);
        assert!(head.contains("fn e1_shade(c: vec4f) -> vec4f { return c * uniforms.e1_strength; }"));
        assert!(head.contains("fn e0_main_image("));
        assert!(data.uniforms().contains_key("e1_strength"));
        assert!(data.uniforms().contains_key("e0_blend_opacity"));
    }

    #[test]
    fn define_values_are_renamed_with_their_effect() {
        let effect = ShaderEffect::new("taps", EffectShader::new(image("return input_color * f32(TOTAL);")))
            .unwrap()
            .with_define("TAPS", 4)
            .with_define("TOTAL", "TAPS * 2");
        let data = merge(&[&effect]).unwrap();
        assert_eq!(data.defines().get("e0_TAPS"), Some(&DefineValue::Int(4)));
        assert_eq!(
            data.defines().get("e0_TOTAL"),
            Some(&DefineValue::Expr("e0_TAPS * 2".into()))
        );
    }

    #[test]
    fn convolution_and_depth_effects_run_first() {
        let depth = ShaderEffect::new("fog", EffectShader::new(image("return input_color * data.depth;"))).unwrap();
        let data = merge(&[&plain("a"), &depth, &convolution("blur")]).unwrap();
        let calls: Vec<&str> = data
            .section(Section::FragmentMainImage)
            .lines()
            .filter(|line| line.contains("main_image"))
            .collect();
        assert_eq!(calls.len(), 3);
        assert!(calls[0].contains("e2_main_image"));
        assert!(calls[1].contains("e1_main_image"));
        assert!(calls[2].contains("e0_main_image"));
    }

    #[test]
    fn g_data_follows_the_parameter_name_and_dependencies() {
        let effect = ShaderEffect::new(
            "rough",
            EffectShader::new(
                "fn main_image(c: vec4f, uv: vec2f, s: GData) -> vec4f { return c * s.roughness; }",
            ),
        )
        .unwrap();
        let data = merge(&[&effect]).unwrap();
        let channels: Vec<&str> = data.g_data().iter().map(String::as_str).collect();
        assert_eq!(channels, vec!["color", "orm", "roughness"]);
        let sections = data.sections(&GBufferConfig::default());
        let init = &sections[&Section::FragmentMainGData];
        assert!(init.find("g_data.orm =").unwrap() < init.find("g_data.roughness =").unwrap());
    }

    #[test]
    fn unknown_channels_are_rejected() {
        let effect = ShaderEffect::new("v", EffectShader::new(image("return input_color * data.velocity.x;"))).unwrap();
        assert!(matches!(merge(&[&effect]), Err(Error::UnknownChannel { .. })));
    }

    #[test]
    fn blend_functions_are_emitted_once() {
        let a = plain("a").with_blend_function(BlendFunction::Screen);
        let b = plain("b").with_blend_function(BlendFunction::Screen);
        let data = merge(&[&a, &b]).unwrap();
        let sections = data.sections(&GBufferConfig::default());
        let head = &sections[&Section::FragmentHeadEffects];
        let id = BlendFunction::Screen.id();
        assert_eq!(head.matches(&format!("fn blend_{id}(")).count(), 1);
    }

    #[test]
    fn color_space_conversions_are_inserted_between_effects() {
        let srgb = ShaderEffect::new(
            "grade",
            EffectShader::new(image("return input_color;"))
                .with_color_spaces(ColorSpace::Srgb, ColorSpace::None),
        )
        .unwrap();
        let linear = ShaderEffect::new(
            "tone",
            EffectShader::new(image("return input_color;"))
                .with_color_spaces(ColorSpace::LinearSrgb, ColorSpace::LinearSrgb),
        )
        .unwrap();
        let data = merge(&[&srgb, &linear]).unwrap();
        assert_eq!(data.entry_color_space(), ColorSpace::Srgb);
        assert_eq!(data.color_space(), ColorSpace::LinearSrgb);
        assert!(data.section(Section::FragmentMainImage).contains("srgb_to_linear"));
        let sections = data.sections(&GBufferConfig::default());
        assert!(sections[&Section::FragmentMainImage].starts_with("    color0 = linear_to_srgb(color0);"));
    }

    #[test]
    fn entry_conversion_runs_right_before_the_declaring_effect() {
        let agnostic = plain("grain");
        let srgb = ShaderEffect::new(
            "grade",
            EffectShader::new(image("return input_color;"))
                .with_color_spaces(ColorSpace::Srgb, ColorSpace::None),
        )
        .unwrap();
        let config = GBufferConfig::default();
        let whole = merge(&[&agnostic, &srgb]).unwrap();
        let mut split = EffectShaderData::merge("a", &[&agnostic as &dyn Effect], &config).unwrap();
        let right = EffectShaderData::merge("b", &[&srgb as &dyn Effect], &config).unwrap();
        split.add(&right).unwrap();

        for (data, first, second) in [(&whole, "e0_", "e1_"), (&split, "a0_", "b0_")] {
            let image = data.sections(&config)[&Section::FragmentMainImage].clone();
            let first = image.find(&format!("{first}main_image")).unwrap();
            let encode = image.find("linear_to_srgb").unwrap();
            let second = image.find(&format!("{second}main_image")).unwrap();
            assert!(first < encode && encode < second, "{image}");
            assert!(image.find("srgb_to_linear").unwrap() > second);
        }
    }

    #[test]
    fn add_rejects_shared_prefixes() {
        let a = merge(&[&plain("a")]).unwrap();
        let mut b = merge(&[&plain("b")]).unwrap();
        assert_eq!(
            b.add(&a).unwrap_err(),
            Error::NamespaceCollision { prefix: "e0_".into() }
        );
    }

    #[test]
    fn failed_add_leaves_the_record_untouched() {
        let config = GBufferConfig::default();
        let a_effect = convolution("a");
        let b_effect = convolution("b");
        let mut a = EffectShaderData::merge("a", &[&a_effect as &dyn Effect], &config).unwrap();
        let b = EffectShaderData::merge("b", &[&b_effect as &dyn Effect], &config).unwrap();
        let before = a.section(Section::FragmentMainImage).to_string();
        assert!(a.add(&b).is_err());
        assert_eq!(a.section(Section::FragmentMainImage), before);
        assert_eq!(a.convolution_effects(), ["a".to_string()]);
    }

    #[derive(Clone, Debug)]
    struct Recipe {
        convolution: bool,
        uv: bool,
        channel: Option<&'static str>,
        input: ColorSpace,
        output: ColorSpace,
    }

    fn color_space() -> impl Strategy<Value = ColorSpace> {
        prop_oneof![
            Just(ColorSpace::None),
            Just(ColorSpace::LinearSrgb),
            Just(ColorSpace::Srgb)
        ]
    }

    fn recipe(ordered: bool) -> impl Strategy<Value = Recipe> {
        let channels = prop_oneof![
            Just(None),
            Just(Some("normal")),
            Just(Some("roughness")),
            Just(Some("luminance")),
            Just(Some("emission")),
        ];
        (any::<bool>(), any::<bool>(), channels, color_space(), color_space()).prop_map(
            move |(convolution, uv, channel, input, output)| Recipe {
                convolution: convolution && !ordered,
                uv,
                channel,
                input,
                output,
            },
        )
    }

    fn build(recipe: &Recipe, index: usize) -> ShaderEffect {
        let body = match recipe.channel {
            Some(channel) => format!("let sample = data.{channel}; return input_color;"),
            None => "return input_color;".to_string(),
        };
        let mut source = image(&body);
        if recipe.uv {
            source.push_str("\nfn main_uv(uv: ptr<function, vec2f>) { *uv = *uv; }");
        }
        let mut shader = EffectShader::new(source).with_color_spaces(recipe.input, recipe.output);
        if recipe.convolution {
            shader = shader.with_attributes(EffectAttributes::CONVOLUTION);
        }
        ShaderEffect::new(format!("fx{index}"), shader).unwrap()
    }

    fn merge_recipes(namespace: &str, recipes: &[Recipe], offset: usize) -> Result<EffectShaderData> {
        let effects: Vec<ShaderEffect> = recipes
            .iter()
            .enumerate()
            .map(|(i, recipe)| build(recipe, i + offset))
            .collect();
        let refs: Vec<&dyn Effect> = effects.iter().map(|e| e as &dyn Effect).collect();
        EffectShaderData::merge(namespace, &refs, &GBufferConfig::default())
    }

    proptest! {
        #[test]
        fn merging_is_deterministic(recipes in prop::collection::vec(recipe(false), 0..6)) {
            let config = GBufferConfig::default();
            let first = merge_recipes("e", &recipes, 0);
            let second = merge_recipes("e", &recipes, 0);
            match (first, second) {
                (Ok(a), Ok(b)) => {
                    prop_assert_eq!(a.sections(&config), b.sections(&config));
                    prop_assert_eq!(a.defines(), b.defines());
                    let keys_a: Vec<&String> = a.uniforms().keys().collect();
                    let keys_b: Vec<&String> = b.uniforms().keys().collect();
                    prop_assert_eq!(keys_a, keys_b);
                }
                (Err(a), Err(b)) => prop_assert_eq!(a, b),
                _ => prop_assert!(false, "one merge failed"),
            }
        }

        #[test]
        fn required_channels_are_closed(recipes in prop::collection::vec(recipe(false), 0..6)) {
            let config = GBufferConfig::default();
            if let Ok(data) = merge_recipes("e", &recipes, 0) {
                for name in data.g_data() {
                    let channel = config.channel(name).unwrap();
                    for dependency in &channel.dependencies {
                        prop_assert!(data.g_data().contains(dependency));
                    }
                }
            }
        }

        #[test]
        fn merging_is_associative(
            a in prop::collection::vec(recipe(false), 0..4),
            b in prop::collection::vec(recipe(false), 0..4),
        ) {
            let all: Vec<Recipe> = a.iter().chain(&b).cloned().collect();
            let whole = merge_recipes("w", &all, 0);
            let combined = merge_recipes("a", &a, 0).and_then(|mut left| {
                let right = merge_recipes("b", &b, a.len())?;
                left.add(&right)?;
                Ok(left)
            });
            prop_assert_eq!(whole.is_ok(), combined.is_ok());
            if let (Ok(whole), Ok(combined)) = (whole, combined) {
                prop_assert_eq!(whole.g_data(), combined.g_data());
                prop_assert_eq!(whole.uv_transformation(), combined.uv_transformation());
                prop_assert_eq!(whole.convolution_effects(), combined.convolution_effects());
            }
        }

        // Without precedence reordering the merged order equals the concatenated order.
        #[test]
        fn color_space_survives_combination(
            a in prop::collection::vec(recipe(true), 0..4),
            b in prop::collection::vec(recipe(true), 0..4),
        ) {
            let all: Vec<Recipe> = a.iter().chain(&b).cloned().collect();
            let whole = merge_recipes("w", &all, 0).unwrap();
            let mut left = merge_recipes("a", &a, 0).unwrap();
            left.add(&merge_recipes("b", &b, a.len()).unwrap()).unwrap();
            prop_assert_eq!(whole.color_space(), left.color_space());
            prop_assert_eq!(whole.entry_color_space(), left.entry_color_space());
            let conversions = |d: &EffectShaderData| d.section(Section::FragmentMainImage).matches("color0 = ").count()
                - d.section(Section::FragmentMainImage).matches("color0 = blend_").count();
            prop_assert_eq!(conversions(&whole), conversions(&left));
        }
    }
}
