//! The compiled-program artifact handed to backends.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use indexmap::IndexMap;

use super::shader_data::{EffectShaderData, Section};
use crate::gbuffer::GBufferConfig;
use crate::port::DefineValue;
use crate::render_target::ColorSpace;
use crate::uniform::{Uniform, UniformLayout};

const VERTEX_TEMPLATE: &str = include_str!("../shaders/effect.vert.wgsl");
const FRAGMENT_TEMPLATE: &str = include_str!("../shaders/effect.frag.wgsl");

pub const UNIFORM_BINDING: u32 = 0;
pub const SAMPLER_BINDING: u32 = 1;
pub const INPUT_BINDING: u32 = 2;
const FIRST_G_BUFFER_BINDING: u32 = 3;

/// Where a texture binding is fed from at draw time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TextureSource {
    /// Color attachment of the pass input.
    InputColor,
    /// Named attachment of the G-Buffer.
    GBuffer(String),
    /// The shared depth texture.
    Depth,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub name: String,
    pub binding: u32,
    pub source: TextureSource,
}

/// Full-screen program: both WGSL stages plus everything needed to bind them.
///
/// Bindings all live in group 0: the uniform struct at 0, the input sampler and texture at 1
/// and 2, then one binding per G-Buffer texture the fragment stage actually reads.
#[derive(Clone, Debug)]
pub struct ShaderProgram {
    pub label: String,
    pub vertex: String,
    pub fragment: String,
    pub defines: IndexMap<String, DefineValue>,
    pub uniforms: IndexMap<String, Uniform>,
    pub layout: UniformLayout,
    pub textures: Vec<TextureBinding>,
    /// Hash of both stages; equal keys compile to the same pipeline.
    pub key: u64,
    /// Working color space of the merged effects before the final conversion to linear.
    pub color_space: ColorSpace,
}

impl ShaderProgram {
    /// Assembles the merged effects of `data` together with pass-level defines and uniforms.
    ///
    /// Pass uniforms are copied into module-scope privates of the same name at the start of each
    /// stage so that effect code can use them directly (e.g. `resolution`, `time`).
    pub fn assemble(
        label: impl Into<String>,
        data: &EffectShaderData,
        pass_defines: &IndexMap<String, DefineValue>,
        pass_uniforms: &IndexMap<String, Uniform>,
        config: &GBufferConfig,
    ) -> Self {
        let mut defines = pass_defines.clone();
        defines.extend(data.defines().iter().map(|(k, v)| (k.clone(), v.clone())));
        let mut uniforms = pass_uniforms.clone();
        uniforms.extend(data.uniforms().iter().map(|(k, v)| (k.clone(), v.clone())));
        let layout = UniformLayout::new(&uniforms);

        let mut prelude = String::new();
        for (key, value) in &defines {
            prelude.push_str(&format!("const {key} = {value};\n"));
        }
        prelude.push('\n');
        prelude.push_str(&layout.wgsl_struct("EffectUniforms"));
        prelude.push_str(&format!(
            "@group(0) @binding({UNIFORM_BINDING}) var<uniform> uniforms: EffectUniforms;\n"
        ));
        let mut copy_uniforms = String::new();
        for field in layout
            .fields()
            .iter()
            .filter(|f| pass_uniforms.contains_key(&f.name))
        {
            prelude.push_str(&format!("var<private> {}: {};\n", field.name, field.wgsl_type));
            copy_uniforms.push_str(&format!("    {0} = uniforms.{0};\n", field.name));
        }

        let mut varyings = String::new();
        let mut copy_varyings = String::new();
        for (location, (name, wgsl_type)) in data.varyings().iter().enumerate() {
            varyings.push_str(&format!("    @location({}) {name}: {wgsl_type},\n", location + 1));
            copy_varyings.push_str(&format!("    {name} = in.{name};\n"));
        }

        let sections = data.sections(config);
        let section = |s: Section| sections.get(&s).map_or("", String::as_str);

        let vertex = VERTEX_TEMPLATE
            .replace("{{PRELUDE}}", &prelude)
            .replace("{{VARYINGS}}", &varyings)
            .replace("{{VERTEX_HEAD}}", section(Section::VertexHead))
            .replace("{{COPY_UNIFORMS}}", &copy_uniforms)
            .replace("{{VERTEX_MAIN_SUPPORT}}", section(Section::VertexMainSupport));

        let fragment = FRAGMENT_TEMPLATE
            .replace("{{PRELUDE}}", &prelude)
            .replace("{{VARYINGS}}", &varyings)
            .replace("{{FRAGMENT_HEAD_GBUFFER}}", section(Section::FragmentHeadGBuffer))
            .replace("{{FRAGMENT_HEAD_EFFECTS}}", section(Section::FragmentHeadEffects))
            .replace("{{COPY_UNIFORMS}}", &copy_uniforms)
            .replace("{{COPY_VARYINGS}}", &copy_varyings)
            .replace("{{FRAGMENT_MAIN_UV}}", section(Section::FragmentMainUv))
            .replace("{{FRAGMENT_MAIN_GDATA}}", section(Section::FragmentMainGData))
            .replace("{{FRAGMENT_MAIN_IMAGE}}", section(Section::FragmentMainImage));

        let mut textures = vec![TextureBinding {
            name: "input_buffer".to_string(),
            binding: INPUT_BINDING,
            source: TextureSource::InputColor,
        }];
        let required = data.required_textures(config);
        let mut bindings = String::new();
        for texture in config.textures().filter(|t| required.contains(&t.name)) {
            let name = texture.binding_name();
            if !super::wgsl::references(&fragment, &name) {
                continue;
            }
            let binding = FIRST_G_BUFFER_BINDING + textures.len() as u32 - 1;
            bindings.push_str(&format!(
                "@group(0) @binding({binding}) var {name}: {};\n",
                texture.wgsl_binding_type()
            ));
            let source = if texture.is_depth() {
                TextureSource::Depth
            } else {
                TextureSource::GBuffer(texture.name.clone())
            };
            textures.push(TextureBinding {
                name,
                binding,
                source,
            });
        }
        let fragment = fragment.replace("{{GBUFFER_BINDINGS}}", &bindings);

        let mut hasher = DefaultHasher::new();
        vertex.hash(&mut hasher);
        fragment.hash(&mut hasher);

        Self {
            label: label.into(),
            vertex,
            fragment,
            defines,
            uniforms,
            layout,
            textures,
            key: hasher.finish(),
            color_space: data.color_space(),
        }
    }

    /// Current uniform values packed for upload.
    pub fn uniform_bytes(&self) -> Vec<u8> {
        self.layout.pack(&self.uniforms)
    }

    pub fn reads_depth(&self) -> bool {
        self.textures.iter().any(|t| t.source == TextureSource::Depth)
    }

    pub fn g_buffer_textures(&self) -> impl Iterator<Item = &str> {
        self.textures.iter().filter_map(|t| match &t.source {
            TextureSource::GBuffer(name) => Some(name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Effect, EffectShader, ShaderEffect};

    fn program(effects: &[&ShaderEffect]) -> ShaderProgram {
        let config = GBufferConfig::default();
        let refs: Vec<&dyn Effect> = effects.iter().map(|e| *e as &dyn Effect).collect();
        let data = EffectShaderData::merge("e", &refs, &config).unwrap();
        let mut uniforms = IndexMap::new();
        uniforms.insert("time".to_string(), Uniform::new(0.0f32));
        let mut defines = IndexMap::new();
        defines.insert("FRAME_BUFFER_PRECISION_HIGH".to_string(), DefineValue::Bool(false));
        ShaderProgram::assemble("test", &data, &defines, &uniforms, &config)
    }

    fn effect(body: &str) -> ShaderEffect {
        ShaderEffect::new(
            "fx",
            EffectShader::new(format!(
                "fn main_image(input_color: vec4f, uv: vec2f, data: GData) -> vec4f {{ {body} }}"
            )),
        )
        .unwrap()
    }

    #[test]
    fn templates_are_fully_substituted() {
        let p = program(&[&effect("return input_color;")]);
        assert!(!p.vertex.contains("{{"));
        assert!(!p.fragment.contains("{{"));
        assert!(p.fragment.contains("const FRAME_BUFFER_PRECISION_HIGH = false;"));
        assert!(p.fragment.contains("var<private> time: f32;"));
        assert!(p.fragment.contains("    time = uniforms.time;"));
    }

    #[test]
    fn empty_programs_copy_the_input() {
        let p = program(&[]);
        assert!(p.fragment.contains("g_data.color = textureSample(input_buffer"));
        assert_eq!(p.textures.len(), 1);
    }

    #[test]
    fn g_buffer_bindings_follow_reads() {
        let p = program(&[&effect("return input_color * data.depth + vec4f(data.normal, 0.0);")]);
        let names: Vec<&str> = p.textures.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["input_buffer", "gbuffer_normal", "gbuffer_depth"]);
        assert_eq!(p.textures[1].binding, 3);
        assert_eq!(p.textures[2].binding, 4);
        assert!(p.reads_depth());
        assert!(p.fragment.contains("var gbuffer_depth: texture_depth_2d;"));
        assert_eq!(p.g_buffer_textures().collect::<Vec<_>>(), vec!["normal"]);
    }

    #[test]
    fn keys_track_source_changes() {
        let a = program(&[&effect("return input_color;")]);
        let b = program(&[&effect("return input_color;")]);
        let c = program(&[&effect("return input_color * 0.5;")]);
        assert_eq!(a.key, b.key);
        assert_ne!(a.key, c.key);
    }

    #[test]
    fn uniform_bytes_match_the_layout() {
        let p = program(&[&effect("return input_color;")]);
        assert_eq!(p.uniform_bytes().len() as u32, p.layout.size());
        assert!(p.fragment.contains("e0_blend_opacity: f32"));
    }

    #[test]
    fn varyings_are_bridged_between_stages() {
        let shader = EffectShader::new(
            "fn main_image(c: vec4f, uv: vec2f, data: GData) -> vec4f { return c + vec4f(offset, 0.0, 0.0); }",
        )
        .with_vertex("fn main_support(uv: vec2f) { offset = uv * 2.0; }")
        .with_varying("offset", "vec2f");
        let fx = ShaderEffect::new("fx", shader).unwrap();
        let p = program(&[&fx]);
        assert!(p.vertex.contains("@location(1) e0_offset: vec2f,"));
        assert!(p.vertex.contains("    out.e0_offset = e0_offset;"));
        assert!(p.fragment.contains("    e0_offset = in.e0_offset;"));
        assert!(p.fragment.contains("var<private> e0_offset: vec2f;"));
    }
}
