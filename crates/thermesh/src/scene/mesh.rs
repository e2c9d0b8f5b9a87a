use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

/// An indexed triangle list.
#[derive(Debug, Clone, Default)]
pub struct Mesh {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl Mesh {
    /// A unit sphere made by subdividing an icosahedron `subdivisions` times.
    pub fn icosphere(subdivisions: u32) -> Self {
        let t = (1.0 + 5.0_f32.sqrt()) / 2.0;

        let corners = [
            [-1.0, t, 0.0],
            [1.0, t, 0.0],
            [-1.0, -t, 0.0],
            [1.0, -t, 0.0],
            [0.0, -1.0, t],
            [0.0, 1.0, t],
            [0.0, -1.0, -t],
            [0.0, 1.0, -t],
            [t, 0.0, -1.0],
            [t, 0.0, 1.0],
            [-t, 0.0, -1.0],
            [-t, 0.0, 1.0],
        ];

        #[rustfmt::skip]
        let indices = vec![
            0, 11, 5,   0, 5, 1,    0, 1, 7,    0, 7, 10,   0, 10, 11,
            1, 5, 9,    5, 11, 4,   11, 10, 2,  10, 7, 6,   7, 1, 8,
            3, 9, 4,    3, 4, 2,    3, 2, 6,    3, 6, 8,    3, 8, 9,
            4, 9, 5,    2, 4, 11,   6, 2, 10,   8, 6, 7,    9, 8, 1,
        ];

        let mut mesh = Self {
            vertices: corners.into_iter().map(sphere_vertex).collect(),
            indices,
        };

        for _ in 0..subdivisions {
            mesh.subdivide();
        }

        mesh
    }

    /// Splits every triangle into four, pushing the new vertices onto the unit sphere.
    pub fn subdivide(&mut self) {
        let triangles = core::mem::take(&mut self.indices);
        let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
        let mut indices = Vec::with_capacity(triangles.len() * 4);

        for triangle in triangles.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]];

            let ab = self.midpoint(&mut midpoints, a, b);
            let bc = self.midpoint(&mut midpoints, b, c);
            let ca = self.midpoint(&mut midpoints, c, a);

            indices.extend_from_slice(&[a, ab, ca, b, bc, ab, c, ca, bc, ab, bc, ca]);
        }

        self.indices = indices;
    }

    fn midpoint(&mut self, cache: &mut HashMap<(u32, u32), u32>, a: u32, b: u32) -> u32 {
        let key = (a.min(b), a.max(b));

        *cache.entry(key).or_insert_with(|| {
            let a = self.vertices[a as usize].position;
            let b = self.vertices[b as usize].position;

            self.vertices.push(sphere_vertex([
                (a[0] + b[0]) / 2.0,
                (a[1] + b[1]) / 2.0,
                (a[2] + b[2]) / 2.0,
            ]));

            self.vertices.len() as u32 - 1
        })
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

fn sphere_vertex(position: [f32; 3]) -> Vertex {
    let length = position.iter().map(|v| v * v).sum::<f32>().sqrt();
    let normal = position.map(|v| v / length);

    Vertex {
        position: normal,
        normal,
    }
}
