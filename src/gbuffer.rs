//! G-Buffer channel registry.
//!
//! [`GBufferConfig`] describes two related tables:
//!
//! - **Textures**: the render-target attachments a [`GeometryPass`] can produce (`color`,
//!   `normal`, `orm`, `emission`, `depth`) together with their storage format.
//! - **GData channels**: the per-pixel values effects read from the `GData` struct. Each channel
//!   has a WGSL type, an initialization statement, optional dependencies on other channels, and
//!   optionally the texture it is loaded from.
//!
//! The dependency relation must be acyclic; [`GBufferConfigBuilder::build`] rejects cycles and
//! references to unknown channels or textures.
//!
//! [`GeometryPass`]: crate::pass::GeometryPass

use std::collections::BTreeSet;

use indexmap::IndexMap;

use crate::error::{Error, Result};
use crate::render_target::{FrameBufferType, TextureFilter, TextureFormat};

/// Standard texture and channel names.
pub mod channel {
    pub const COLOR: &str = "color";
    pub const DEPTH: &str = "depth";
    pub const NORMAL: &str = "normal";
    pub const ORM: &str = "orm";
    pub const EMISSION: &str = "emission";
    pub const OCCLUSION: &str = "occlusion";
    pub const ROUGHNESS: &str = "roughness";
    pub const METALNESS: &str = "metalness";
    pub const LUMINANCE: &str = "luminance";
}

/// Storage of a G-Buffer texture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureStorage {
    /// Follows the geometry pass's frame buffer type.
    FrameBuffer,
    Fixed(TextureFormat),
    Depth,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GBufferTexture {
    pub name: String,
    pub storage: TextureStorage,
    pub filter: TextureFilter,
    /// Holds color data and follows the renderer's output color space at 8-bit precision.
    pub color_buffer: bool,
}

impl GBufferTexture {
    pub fn format(&self, frame_buffer_type: FrameBufferType) -> Option<TextureFormat> {
        match self.storage {
            TextureStorage::FrameBuffer => Some(frame_buffer_type.color_format()),
            TextureStorage::Fixed(format) => Some(format),
            TextureStorage::Depth => None,
        }
    }

    pub fn is_depth(&self) -> bool {
        self.storage == TextureStorage::Depth
    }

    /// Shader-side name of the texture binding.
    pub fn binding_name(&self) -> String {
        format!("gbuffer_{}", self.name)
    }

    pub fn wgsl_binding_type(&self) -> &'static str {
        if self.is_depth() {
            "texture_depth_2d"
        } else {
            "texture_2d<f32>"
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GDataChannel {
    pub name: String,
    /// WGSL type of the struct field.
    pub wgsl_type: String,
    /// WGSL statement(s) assigning `g_data.<name>`.
    pub initialization: String,
    pub dependencies: Vec<String>,
    /// Texture the channel is loaded from. `color` is read from the pass input instead.
    pub texture: Option<String>,
}

impl GDataChannel {
    pub fn new(
        name: impl Into<String>,
        wgsl_type: impl Into<String>,
        initialization: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            wgsl_type: wgsl_type.into(),
            initialization: initialization.into(),
            dependencies: Vec::new(),
            texture: None,
        }
    }

    pub fn depends_on(mut self, channel: impl Into<String>) -> Self {
        self.dependencies.push(channel.into());
        self
    }

    pub fn from_texture(mut self, texture: impl Into<String>) -> Self {
        self.texture = Some(texture.into());
        self
    }
}

/// Validated G-Buffer registry.
#[derive(Clone, Debug, PartialEq)]
pub struct GBufferConfig {
    textures: IndexMap<String, GBufferTexture>,
    channels: IndexMap<String, GDataChannel>,
}

fn load(texture: &str, swizzle: &str, decode: &str) -> String {
    format!(
        "g_data.{texture} = textureLoad(gbuffer_{texture}, gbuffer_texel(textureDimensions(gbuffer_{texture}), UV), 0){swizzle}{decode};"
    )
}

impl Default for GBufferConfig {
    fn default() -> Self {
        use channel::*;

        let texture = |name: &str, storage, filter, color_buffer| GBufferTexture {
            name: name.to_string(),
            storage,
            filter,
            color_buffer,
        };

        let textures = [
            texture(COLOR, TextureStorage::FrameBuffer, TextureFilter::Linear, true),
            texture(
                NORMAL,
                TextureStorage::Fixed(TextureFormat::Rgba16Float),
                TextureFilter::Nearest,
                false,
            ),
            texture(
                ORM,
                TextureStorage::Fixed(TextureFormat::Rgba8Unorm),
                TextureFilter::Linear,
                false,
            ),
            texture(EMISSION, TextureStorage::FrameBuffer, TextureFilter::Linear, true),
            texture(DEPTH, TextureStorage::Depth, TextureFilter::Nearest, false),
        ];

        let channels = [
            GDataChannel::new(
                COLOR,
                "vec4f",
                "g_data.color = textureSample(input_buffer, input_sampler, UV);",
            )
            .from_texture(COLOR),
            GDataChannel::new(
                DEPTH,
                "f32",
                "g_data.depth = textureLoad(gbuffer_depth, gbuffer_texel(textureDimensions(gbuffer_depth), UV), 0);",
            )
            .from_texture(DEPTH),
            GDataChannel::new(NORMAL, "vec3f", load(NORMAL, ".xyz", " * 2.0 - 1.0")).from_texture(NORMAL),
            GDataChannel::new(ORM, "vec3f", load(ORM, ".xyz", "")).from_texture(ORM),
            GDataChannel::new(OCCLUSION, "f32", "g_data.occlusion = g_data.orm.x;").depends_on(ORM),
            GDataChannel::new(ROUGHNESS, "f32", "g_data.roughness = g_data.orm.y;").depends_on(ORM),
            GDataChannel::new(METALNESS, "f32", "g_data.metalness = g_data.orm.z;").depends_on(ORM),
            GDataChannel::new(EMISSION, "vec3f", load(EMISSION, ".rgb", "")).from_texture(EMISSION),
            GDataChannel::new(
                LUMINANCE,
                "f32",
                "g_data.luminance = dot(g_data.color.rgb, vec3f(0.2126, 0.7152, 0.0722));",
            )
            .depends_on(COLOR),
        ];

        Self {
            textures: textures.into_iter().map(|t| (t.name.clone(), t)).collect(),
            channels: channels.into_iter().map(|c| (c.name.clone(), c)).collect(),
        }
    }
}

impl GBufferConfig {
    /// Starts an empty registry.
    pub fn builder() -> GBufferConfigBuilder {
        GBufferConfigBuilder {
            textures: IndexMap::new(),
            channels: IndexMap::new(),
        }
    }

    /// Starts from this registry, e.g. to add a custom channel to the defaults.
    pub fn to_builder(&self) -> GBufferConfigBuilder {
        GBufferConfigBuilder {
            textures: self.textures.clone(),
            channels: self.channels.clone(),
        }
    }

    pub fn textures(&self) -> impl Iterator<Item = &GBufferTexture> {
        self.textures.values()
    }

    pub fn texture(&self, name: &str) -> Option<&GBufferTexture> {
        self.textures.get(name)
    }

    pub fn channels(&self) -> impl Iterator<Item = &GDataChannel> {
        self.channels.values()
    }

    pub fn channel(&self, name: &str) -> Option<&GDataChannel> {
        self.channels.get(name)
    }

    /// Adds every transitive dependency of the channels in `set`.
    pub fn close(&self, set: &mut BTreeSet<String>) -> Result<()> {
        let mut pending: Vec<String> = set.iter().cloned().collect();
        while let Some(name) = pending.pop() {
            let channel = self.channel(&name).ok_or_else(|| Error::UnknownChannel {
                channel: name.clone(),
            })?;
            for dependency in &channel.dependencies {
                if set.insert(dependency.clone()) {
                    pending.push(dependency.clone());
                }
            }
        }
        Ok(())
    }

    /// Orders `set` so that every channel comes after its dependencies.
    ///
    /// Repeatedly emits the first channel, in registry order, whose dependencies have all been
    /// emitted. The result is stable for a given set. Channels that can never be emitted (cycles
    /// or dependencies outside `set`) are left out.
    pub fn initialization_order(&self, set: &BTreeSet<String>) -> Vec<&GDataChannel> {
        let mut remaining: Vec<&GDataChannel> = self
            .channels
            .values()
            .filter(|c| set.contains(&c.name))
            .collect();
        let mut emitted: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::with_capacity(remaining.len());

        while let Some(index) = remaining.iter().position(|c| {
            c.dependencies
                .iter()
                .all(|dependency| emitted.contains(dependency.as_str()))
        }) {
            let channel = remaining.remove(index);
            emitted.insert(&channel.name);
            order.push(channel);
        }
        order
    }

    /// `struct GData` declaring the channels of `set` in registry order.
    pub fn struct_declaration(&self, set: &BTreeSet<String>) -> String {
        let mut out = String::from("struct GData {\n");
        for channel in self.channels.values().filter(|c| set.contains(&c.name)) {
            out.push_str(&format!("    {}: {},\n", channel.name, channel.wgsl_type));
        }
        out.push_str("}\n");
        out
    }

    /// Statements declaring and filling `g_data` for the channels of `set`.
    pub fn struct_initialization(&self, set: &BTreeSet<String>) -> String {
        let mut out = String::from("    var g_data: GData;\n");
        for channel in self.initialization_order(set) {
            out.push_str("    ");
            out.push_str(&channel.initialization);
            out.push('\n');
        }
        out
    }

    /// G-Buffer textures backing the channels of `set`.
    pub fn textures_for(&self, set: &BTreeSet<String>) -> BTreeSet<String> {
        set.iter()
            .filter_map(|name| self.channel(name))
            .filter_map(|channel| channel.texture.clone())
            .collect()
    }
}

/// Builder for custom registries.
#[derive(Clone, Debug)]
pub struct GBufferConfigBuilder {
    textures: IndexMap<String, GBufferTexture>,
    channels: IndexMap<String, GDataChannel>,
}

impl GBufferConfigBuilder {
    pub fn texture(mut self, texture: GBufferTexture) -> Self {
        self.textures.insert(texture.name.clone(), texture);
        self
    }

    pub fn channel(mut self, channel: GDataChannel) -> Self {
        self.channels.insert(channel.name.clone(), channel);
        self
    }

    pub fn build(self) -> Result<GBufferConfig> {
        let config = GBufferConfig {
            textures: self.textures,
            channels: self.channels,
        };

        for channel in config.channels.values() {
            for dependency in &channel.dependencies {
                if !config.channels.contains_key(dependency) {
                    return Err(Error::UnknownChannel {
                        channel: dependency.clone(),
                    });
                }
            }
            if let Some(texture) = &channel.texture {
                if !config.textures.contains_key(texture) {
                    return Err(Error::UnknownChannel {
                        channel: texture.clone(),
                    });
                }
            }
        }

        let all: BTreeSet<String> = config.channels.keys().cloned().collect();
        let ordered: BTreeSet<&str> = config
            .initialization_order(&all)
            .into_iter()
            .map(|c| c.name.as_str())
            .collect();
        if let Some(stuck) = config.channels.keys().find(|name| !ordered.contains(name.as_str())) {
            return Err(Error::DependencyCycle {
                channel: stuck.clone(),
            });
        }

        Ok(config)
    }
}
