//! Input and output ports of a pass.
//!
//! A port is three keyed collections: shader defines, uniform cells and buffers. Every structural
//! write bumps the port's revision; passes compare revisions during [`Pass::sync`] and run their
//! change hooks when something moved. A port's revision also folds in the revisions of the buffer
//! resources it holds, so replacing the render target inside a shared resource is observed by
//! every port holding that resource.
//!
//! [`Input`] ports additionally register themselves as readers of the resources they hold, which
//! keeps the owning pass from disposing a buffer that is still wired downstream.
//!
//! [`Pass::sync`]: crate::pass::Pass::sync

use std::fmt;
use std::marker::PhantomData;

use indexmap::IndexMap;

use crate::render_target::{DepthTexture, RenderTarget};
use crate::resource::Resource;
use crate::uniform::Uniform;

/// Key of the main color buffer.
pub const BUFFER_DEFAULT: &str = "default";
/// Key under which the G-Buffer is handed to downstream passes.
pub const BUFFER_G_BUFFER: &str = "g_buffer";
/// Key of the shared depth texture.
pub const BUFFER_DEPTH: &str = "depth";

/// Value of a shader define, emitted as a WGSL `const`.
#[derive(Clone, Debug, PartialEq)]
pub enum DefineValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    /// A raw WGSL const-expression.
    Expr(String),
}

impl fmt::Display for DefineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefineValue::Bool(v) => write!(f, "{v}"),
            DefineValue::Int(v) => write!(f, "{v}"),
            DefineValue::Float(v) => write!(f, "{v:?}"),
            DefineValue::Expr(v) => f.write_str(v),
        }
    }
}

impl From<bool> for DefineValue {
    fn from(value: bool) -> Self {
        DefineValue::Bool(value)
    }
}

impl From<i64> for DefineValue {
    fn from(value: i64) -> Self {
        DefineValue::Int(value)
    }
}

impl From<i32> for DefineValue {
    fn from(value: i32) -> Self {
        DefineValue::Int(value.into())
    }
}

impl From<f64> for DefineValue {
    fn from(value: f64) -> Self {
        DefineValue::Float(value)
    }
}

impl From<&str> for DefineValue {
    fn from(value: &str) -> Self {
        DefineValue::Expr(value.to_string())
    }
}

impl From<String> for DefineValue {
    fn from(value: String) -> Self {
        DefineValue::Expr(value)
    }
}

/// A buffer held by a port.
#[derive(Clone, Debug)]
pub enum Buffer {
    Target(Resource<RenderTarget>),
    Depth(Resource<DepthTexture>),
}

impl Buffer {
    pub fn as_target(&self) -> Option<&Resource<RenderTarget>> {
        match self {
            Buffer::Target(target) => Some(target),
            Buffer::Depth(_) => None,
        }
    }

    pub fn as_depth(&self) -> Option<&Resource<DepthTexture>> {
        match self {
            Buffer::Depth(depth) => Some(depth),
            Buffer::Target(_) => None,
        }
    }

    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        match (self, other) {
            (Buffer::Target(a), Buffer::Target(b)) => a.ptr_eq(b),
            (Buffer::Depth(a), Buffer::Depth(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    pub fn revision(&self) -> u64 {
        match self {
            Buffer::Target(target) => target.revision(),
            Buffer::Depth(depth) => depth.revision(),
        }
    }

    pub fn readers(&self) -> usize {
        match self {
            Buffer::Target(target) => target.readers(),
            Buffer::Depth(depth) => depth.readers(),
        }
    }

    fn acquire_reader(&self) {
        match self {
            Buffer::Target(target) => target.acquire_reader(),
            Buffer::Depth(depth) => depth.acquire_reader(),
        }
    }

    fn release_reader(&self) {
        match self {
            Buffer::Target(target) => target.release_reader(),
            Buffer::Depth(depth) => depth.release_reader(),
        }
    }
}

impl From<Resource<RenderTarget>> for Buffer {
    fn from(value: Resource<RenderTarget>) -> Self {
        Buffer::Target(value)
    }
}

impl From<Resource<DepthTexture>> for Buffer {
    fn from(value: Resource<DepthTexture>) -> Self {
        Buffer::Depth(value)
    }
}

/// Distinguishes input from output ports at the type level.
pub trait PortKind {
    /// Whether buffers held by this port count as readers of their resources.
    const READS: bool;
}

#[derive(Debug)]
pub struct In;

#[derive(Debug)]
pub struct Out;

impl PortKind for In {
    const READS: bool = true;
}

impl PortKind for Out {
    const READS: bool = false;
}

/// Snapshot of a port's state used for change detection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PortRevision {
    own: u64,
    buffers: u64,
}

impl PortRevision {
    /// Revision of the port's own entries, ignoring changes inside held buffers.
    pub fn entries(&self) -> u64 {
        self.own
    }
}

pub struct Port<K: PortKind> {
    defines: IndexMap<String, DefineValue>,
    uniforms: IndexMap<String, Uniform>,
    buffers: IndexMap<String, Buffer>,
    revision: u64,
    _kind: PhantomData<K>,
}

pub type Input = Port<In>;
pub type Output = Port<Out>;

impl<K: PortKind> Default for Port<K> {
    fn default() -> Self {
        Self {
            defines: IndexMap::new(),
            uniforms: IndexMap::new(),
            buffers: IndexMap::new(),
            revision: 0,
            _kind: PhantomData,
        }
    }
}

impl<K: PortKind> fmt::Debug for Port<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Port")
            .field("defines", &self.defines)
            .field("uniforms", &self.uniforms.keys().collect::<Vec<_>>())
            .field("buffers", &self.buffers.keys().collect::<Vec<_>>())
            .field("revision", &self.revision)
            .finish()
    }
}

impl<K: PortKind> Port<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn revision(&self) -> PortRevision {
        PortRevision {
            own: self.revision,
            buffers: self.buffers.values().map(Buffer::revision).sum(),
        }
    }

    fn touch(&mut self) {
        self.revision += 1;
    }

    pub fn defines(&self) -> &IndexMap<String, DefineValue> {
        &self.defines
    }

    pub fn define(&self, key: &str) -> Option<&DefineValue> {
        self.defines.get(key)
    }

    pub fn set_define(&mut self, key: impl Into<String>, value: impl Into<DefineValue>) {
        let key = key.into();
        let value = value.into();
        if self.defines.get(&key) == Some(&value) {
            return;
        }
        self.defines.insert(key, value);
        self.touch();
    }

    pub fn remove_define(&mut self, key: &str) -> Option<DefineValue> {
        let removed = self.defines.shift_remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn clear_defines(&mut self) {
        if !self.defines.is_empty() {
            self.defines.clear();
            self.touch();
        }
    }

    pub fn uniforms(&self) -> &IndexMap<String, Uniform> {
        &self.uniforms
    }

    pub fn uniform(&self, key: &str) -> Option<&Uniform> {
        self.uniforms.get(key)
    }

    /// Registers a uniform cell. Only the entry is tracked; later writes to the cell's value do
    /// not count as a structural change.
    pub fn set_uniform(&mut self, key: impl Into<String>, uniform: Uniform) {
        let key = key.into();
        if self.uniforms.get(&key).is_some_and(|u| u.ptr_eq(&uniform)) {
            return;
        }
        self.uniforms.insert(key, uniform);
        self.touch();
    }

    pub fn remove_uniform(&mut self, key: &str) -> Option<Uniform> {
        let removed = self.uniforms.shift_remove(key);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    pub fn buffers(&self) -> &IndexMap<String, Buffer> {
        &self.buffers
    }

    pub fn buffer(&self, key: &str) -> Option<&Buffer> {
        self.buffers.get(key)
    }

    /// Inserts or replaces a buffer. Setting the resource already held under `key` is a no-op.
    pub fn set_buffer(&mut self, key: impl Into<String>, buffer: impl Into<Buffer>) {
        let key = key.into();
        let buffer = buffer.into();
        if self.buffers.get(&key).is_some_and(|b| b.ptr_eq(&buffer)) {
            return;
        }
        if K::READS {
            buffer.acquire_reader();
        }
        if let Some(previous) = self.buffers.insert(key, buffer) {
            if K::READS {
                previous.release_reader();
            }
        }
        self.touch();
    }

    pub fn remove_buffer(&mut self, key: &str) -> Option<Buffer> {
        let removed = self.buffers.shift_remove(key);
        if let Some(buffer) = &removed {
            if K::READS {
                buffer.release_reader();
            }
            self.touch();
        }
        removed
    }

    pub fn clear_buffers(&mut self) {
        if self.buffers.is_empty() {
            return;
        }
        for (_, buffer) in self.buffers.drain(..) {
            if K::READS {
                buffer.release_reader();
            }
        }
        self.touch();
    }

    /// Sets or removes the buffer under `key`.
    pub fn assign_buffer(&mut self, key: &str, buffer: Option<Buffer>) {
        match buffer {
            Some(buffer) => self.set_buffer(key, buffer),
            None => {
                self.remove_buffer(key);
            }
        }
    }

    pub fn default_buffer(&self) -> Option<&Resource<RenderTarget>> {
        self.buffer(BUFFER_DEFAULT).and_then(Buffer::as_target)
    }

    pub fn set_default_buffer(&mut self, buffer: Option<Resource<RenderTarget>>) {
        self.assign_buffer(BUFFER_DEFAULT, buffer.map(Buffer::Target));
    }

    /// Snapshot of the render target currently held by the default buffer.
    pub fn default_target(&self) -> Option<RenderTarget> {
        self.default_buffer()
            .and_then(|resource| resource.borrow().clone())
    }

    pub fn g_buffer(&self) -> Option<&Resource<RenderTarget>> {
        self.buffer(BUFFER_G_BUFFER).and_then(Buffer::as_target)
    }

    pub fn depth_buffer(&self) -> Option<&Resource<DepthTexture>> {
        self.buffer(BUFFER_DEPTH).and_then(Buffer::as_depth)
    }

    /// `true` when the default buffer stores more than 8 bits per channel.
    pub fn frame_buffer_precision_high(&self) -> bool {
        self.default_target()
            .and_then(|target| target.primary_format())
            .is_some_and(|format| format.is_high_precision())
    }
}

impl<K: PortKind> Drop for Port<K> {
    fn drop(&mut self) {
        if K::READS {
            for buffer in self.buffers.values() {
                buffer.release_reader();
            }
        }
    }
}
