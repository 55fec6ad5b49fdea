//! CPU-side mesh geometry and transforms.
//!
//! [`MeshData`] holds [`Vertex3d`] and index lists; backends upload it lazily and cache the
//! buffers. Built-in primitives wind front faces counter-clockwise.

use glam::{Mat4, Quat, Vec3};

/// Position, normal and UV; 32 bytes, uploaded as-is.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex3d {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex3d {
    pub fn new(position: Vec3, normal: Vec3, uv: [f32; 2]) -> Self {
        Self {
            position: position.to_array(),
            normal: normal.to_array(),
            uv,
        }
    }
}

/// Indexed triangle geometry.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub vertices: Vec<Vertex3d>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: Vec<Vertex3d>, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Appends a quad spanned by `u` and `v` around `center`. `u × v` is the facing direction.
    fn push_quad(&mut self, center: Vec3, u: Vec3, v: Vec3) {
        let base = self.vertices.len() as u32;
        let normal = u.cross(v).normalize();
        for (s, t) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            self.vertices.push(Vertex3d::new(
                center + u * s + v * t,
                normal,
                [(s + 1.0) * 0.5, (t + 1.0) * 0.5],
            ));
        }
        self.indices
            .extend([base, base + 1, base + 2, base + 2, base + 3, base]);
    }

    /// Unit cube centered at the origin, four vertices per face for flat normals.
    pub fn cube() -> Self {
        let mut mesh = Self::default();
        for (normal, u) in [
            (Vec3::Z, Vec3::X),
            (Vec3::NEG_Z, Vec3::NEG_X),
            (Vec3::Y, Vec3::X),
            (Vec3::NEG_Y, Vec3::X),
            (Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_X, Vec3::Z),
        ] {
            let v = normal.cross(u);
            mesh.push_quad(normal * 0.5, u * 0.5, v * 0.5);
        }
        mesh
    }

    /// UV sphere of radius 0.5. `segments` divide the equator, `rings` the meridians.
    pub fn sphere(segments: u32, rings: u32) -> Self {
        use std::f32::consts::{PI, TAU};

        let segments = segments.max(3);
        let rings = rings.max(2);
        let stride = segments + 1;
        let vertices = (0..=rings)
            .flat_map(|ring| (0..=segments).map(move |seg| (ring, seg)))
            .map(|(ring, seg)| {
                let u = seg as f32 / segments as f32;
                let v = ring as f32 / rings as f32;
                let (sin_phi, cos_phi) = (v * PI).sin_cos();
                let (sin_theta, cos_theta) = (u * TAU).sin_cos();
                let normal = Vec3::new(sin_phi * cos_theta, cos_phi, sin_phi * sin_theta);
                Vertex3d::new(normal * 0.5, normal, [u, v])
            })
            .collect();
        let indices = (0..rings)
            .flat_map(|ring| (0..segments).map(move |seg| ring * stride + seg))
            .flat_map(|top| {
                let bottom = top + stride;
                [top, top + 1, bottom, top + 1, bottom + 1, bottom]
            })
            .collect();
        Self::new(vertices, indices)
    }

    /// Square of side `size` on the XZ plane, facing +Y.
    pub fn plane(size: f32) -> Self {
        let mut mesh = Self::default();
        let half = size * 0.5;
        mesh.push_quad(Vec3::ZERO, Vec3::Z * half, Vec3::X * half);
        mesh
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn uniform_scale(mut self, scale: f32) -> Self {
        self.scale = Vec3::splat(scale);
        self
    }

    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_has_twelve_triangles() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertices.len(), 24);
        assert_eq!(cube.index_count(), 36);
    }

    #[test]
    fn sphere_indices_stay_in_range() {
        let sphere = MeshData::sphere(8, 4);
        let max = *sphere.indices.iter().max().unwrap();
        assert!((max as usize) < sphere.vertices.len());
    }

    fn face_normals(mesh: &MeshData) -> impl Iterator<Item = (Vec3, Vec3)> + '_ {
        mesh.indices.chunks(3).map(|tri| {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(mesh.vertices[tri[i] as usize].position));
            ((b - a).cross(c - a), (a + b + c) / 3.0)
        })
    }

    #[test]
    fn plane_winds_counter_clockwise_from_above() {
        for (normal, _) in face_normals(&MeshData::plane(2.0)) {
            assert!(normal.y > 0.0);
        }
    }

    #[test]
    fn closed_primitives_face_outwards() {
        for mesh in [MeshData::cube(), MeshData::sphere(12, 6)] {
            for (normal, centroid) in face_normals(&mesh) {
                if normal.length_squared() > 1e-12 {
                    assert!(normal.dot(centroid) > 0.0);
                }
            }
        }
    }

    #[test]
    fn cube_normals_match_winding() {
        let cube = MeshData::cube();
        for (tri, (normal, _)) in cube.indices.chunks(3).zip(face_normals(&cube)) {
            let stored = Vec3::from(cube.vertices[tri[0] as usize].normal);
            assert!(stored.dot(normal) > 0.0);
        }
    }

    #[test]
    fn transform_matrix_translates() {
        let m = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).matrix();
        assert_eq!(m.transform_point3(Vec3::ZERO), Vec3::new(1.0, 2.0, 3.0));
    }
}
