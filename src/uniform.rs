//! Uniform value cells and their WGSL buffer layout.
//!
//! A [`Uniform`] is a shared cell: the effect that declares it, the merged shader program and the
//! backend all hold the same cell, so writing a new value is visible at the next draw without any
//! recompilation.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Vec2, Vec3, Vec4};
use indexmap::IndexMap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    UInt(u32),
    /// Stored as `u32` on the GPU; shaders compare against `0u`.
    Bool(bool),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Mat4(Mat4),
}

impl UniformValue {
    pub fn wgsl_type(&self) -> &'static str {
        match self {
            UniformValue::Float(_) => "f32",
            UniformValue::Int(_) => "i32",
            UniformValue::UInt(_) | UniformValue::Bool(_) => "u32",
            UniformValue::Vec2(_) => "vec2f",
            UniformValue::Vec3(_) => "vec3f",
            UniformValue::Vec4(_) => "vec4f",
            UniformValue::Mat4(_) => "mat4x4f",
        }
    }

    /// `(alignment, size)` in the uniform address space.
    fn align_and_size(&self) -> (u32, u32) {
        match self {
            UniformValue::Float(_)
            | UniformValue::Int(_)
            | UniformValue::UInt(_)
            | UniformValue::Bool(_) => (4, 4),
            UniformValue::Vec2(_) => (8, 8),
            UniformValue::Vec3(_) => (16, 12),
            UniformValue::Vec4(_) => (16, 16),
            UniformValue::Mat4(_) => (16, 64),
        }
    }

    fn write(&self, out: &mut [u8]) {
        match self {
            UniformValue::Float(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Int(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::UInt(v) => out.copy_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Bool(v) => out.copy_from_slice(bytemuck::bytes_of(&(*v as u32))),
            UniformValue::Vec2(v) => out.copy_from_slice(bytemuck::bytes_of(&v.to_array())),
            UniformValue::Vec3(v) => out.copy_from_slice(bytemuck::bytes_of(&v.to_array())),
            UniformValue::Vec4(v) => out.copy_from_slice(bytemuck::bytes_of(&v.to_array())),
            UniformValue::Mat4(v) => out.copy_from_slice(bytemuck::bytes_of(&v.to_cols_array())),
        }
    }

    fn same_kind(&self, other: &UniformValue) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

macro_rules! uniform_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for UniformValue {
            fn from(value: $ty) -> Self {
                UniformValue::$variant(value)
            }
        })*
    };
}

uniform_from! {
    f32 => Float,
    i32 => Int,
    u32 => UInt,
    bool => Bool,
    Vec2 => Vec2,
    Vec3 => Vec3,
    Vec4 => Vec4,
    Mat4 => Mat4,
}

/// A shared uniform value cell.
#[derive(Clone)]
pub struct Uniform(Rc<Cell<UniformValue>>);

impl Uniform {
    pub fn new(value: impl Into<UniformValue>) -> Self {
        Self(Rc::new(Cell::new(value.into())))
    }

    pub fn get(&self) -> UniformValue {
        self.0.get()
    }

    /// Writes a new value. The type of a uniform is fixed at creation.
    pub fn set(&self, value: impl Into<UniformValue>) {
        let value = value.into();
        debug_assert!(
            value.same_kind(&self.0.get()),
            "uniform type changed from {} to {}",
            self.0.get().wgsl_type(),
            value.wgsl_type()
        );
        self.0.set(value);
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self.get() {
            UniformValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn ptr_eq(&self, other: &Uniform) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for Uniform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uniform({:?})", self.get())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformField {
    pub name: String,
    pub wgsl_type: &'static str,
    pub offset: u32,
    size: u32,
}

/// Byte layout of a uniform struct following WGSL's uniform address space rules.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UniformLayout {
    fields: Vec<UniformField>,
    size: u32,
}

impl UniformLayout {
    pub fn new(uniforms: &IndexMap<String, Uniform>) -> Self {
        let mut fields = Vec::with_capacity(uniforms.len());
        let mut cursor = 0u32;
        for (name, uniform) in uniforms {
            let value = uniform.get();
            let (align, size) = value.align_and_size();
            let offset = cursor.next_multiple_of(align);
            fields.push(UniformField {
                name: name.clone(),
                wgsl_type: value.wgsl_type(),
                offset,
                size,
            });
            cursor = offset + size;
        }
        Self {
            fields,
            size: cursor.next_multiple_of(16).max(16),
        }
    }

    pub fn fields(&self) -> &[UniformField] {
        &self.fields
    }

    /// Total buffer size in bytes, a multiple of 16.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn wgsl_struct(&self, name: &str) -> String {
        let mut out = format!("struct {name} {{\n");
        if self.fields.is_empty() {
            out.push_str("    _padding: vec4f,\n");
        }
        for field in &self.fields {
            out.push_str(&format!("    {}: {},\n", field.name, field.wgsl_type));
        }
        out.push_str("}\n");
        out
    }

    /// Serializes the current values of `uniforms` into a buffer matching this layout.
    ///
    /// Uniforms missing from the map are left zeroed.
    pub fn pack(&self, uniforms: &IndexMap<String, Uniform>) -> Vec<u8> {
        let mut bytes = vec![0u8; self.size as usize];
        for field in &self.fields {
            let Some(uniform) = uniforms.get(&field.name) else {
                continue;
            };
            let start = field.offset as usize;
            let end = start + field.size as usize;
            let value = uniform.get();
            if value.wgsl_type() == field.wgsl_type {
                value.write(&mut bytes[start..end]);
            }
        }
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: Vec<(&str, UniformValue)>) -> IndexMap<String, Uniform> {
        entries
            .into_iter()
            .map(|(name, value)| (name.to_string(), Uniform::new(value)))
            .collect()
    }

    #[test]
    fn cells_are_shared() {
        let a = Uniform::new(1.0f32);
        let b = a.clone();
        b.set(2.0f32);
        assert_eq!(a.as_f32(), Some(2.0));
        assert!(a.ptr_eq(&b));
    }

    #[test]
    fn layout_follows_wgsl_alignment() {
        let uniforms = map(vec![
            ("time", 0.0f32.into()),
            ("tint", Vec3::ONE.into()),
            ("offset", Vec2::ZERO.into()),
            ("enabled", true.into()),
        ]);
        let layout = UniformLayout::new(&uniforms);
        let offsets: Vec<u32> = layout.fields().iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![0, 16, 32, 40]);
        assert_eq!(layout.size(), 48);
    }

    #[test]
    fn vec3_followed_by_scalar_packs_into_padding() {
        let uniforms = map(vec![("a", Vec3::ONE.into()), ("b", 1.0f32.into())]);
        let layout = UniformLayout::new(&uniforms);
        assert_eq!(layout.fields()[1].offset, 12);
        assert_eq!(layout.size(), 16);
    }

    #[test]
    fn pack_writes_current_values() {
        let uniforms = map(vec![("a", 0.5f32.into()), ("b", 3u32.into())]);
        let layout = UniformLayout::new(&uniforms);
        let bytes = layout.pack(&uniforms);
        assert_eq!(&bytes[0..4], bytemuck::bytes_of(&0.5f32));
        assert_eq!(&bytes[4..8], bytemuck::bytes_of(&3u32));
    }

    #[test]
    fn empty_layout_still_declares_a_member() {
        let layout = UniformLayout::new(&IndexMap::new());
        assert_eq!(layout.size(), 16);
        assert!(layout.wgsl_struct("Empty").contains("_padding"));
    }
}
