use bytemuck::{Pod, Zeroable};
use half::f16;
use rand::Rng;

use super::mesh::Mesh;

/// Temperature of a vertex with no heat source in range.
pub const AMBIENT_TEMPERATURE: f32 = 20.0;

/// A heat source as laid out in the simulation's storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct HeatSource {
    pub position: [f32; 3],
    pub radius: f32,
    pub intensity: f32,
    pub _padding: [f32; 3],
}

impl HeatSource {
    /// Heat contributed at `position`, falling off quadratically to zero at `radius`.
    pub fn heat_at(&self, position: [f32; 3]) -> f32 {
        let distance = self
            .position
            .iter()
            .zip(position)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt();

        let falloff = (1.0 - distance / self.radius).max(0.0);
        self.intensity * falloff * falloff
    }
}

/// Places `count` heat sources on random vertices of `mesh`.
pub fn scatter_heat_sources<R: Rng>(mesh: &Mesh, count: usize, rng: &mut R) -> Vec<HeatSource> {
    if mesh.vertices.is_empty() {
        return vec![];
    }

    (0..count)
        .map(|_| {
            let vertex = mesh.vertices[rng.random_range(0..mesh.vertices.len())];

            HeatSource {
                position: vertex.position,
                radius: rng.random_range(0.1..0.5),
                intensity: rng.random_range(10.0..100.0),
                _padding: [0.0; 3],
            }
        })
        .collect()
}

/// The starting temperature of every vertex, the input of the first simulation step.
pub fn initial_temperatures(mesh: &Mesh, sources: &[HeatSource]) -> Vec<f16> {
    mesh.vertices
        .iter()
        .map(|vertex| {
            let heat: f32 = sources
                .iter()
                .map(|source| source.heat_at(vertex.position))
                .sum();

            f16::from_f32(AMBIENT_TEMPERATURE + heat)
        })
        .collect()
}

/// A `size` by `size` RGBA8 texture, cold on the left to hot on the right.
pub fn heat_map_texels(size: u32) -> Vec<[u8; 4]> {
    let row: Vec<[u8; 4]> = (0..size)
        .map(|x| {
            let t = if size > 1 {
                x as f32 / (size - 1) as f32
            } else {
                0.0
            };

            gradient(t)
        })
        .collect();

    row.repeat(size as usize)
}

fn gradient(t: f32) -> [u8; 4] {
    const STOPS: [[f32; 3]; 5] = [
        [0.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [0.0, 1.0, 0.0],
        [1.0, 1.0, 0.0],
        [1.0, 0.0, 0.0],
    ];

    let scaled = t.clamp(0.0, 1.0) * (STOPS.len() - 1) as f32;
    let index = (scaled as usize).min(STOPS.len() - 2);
    let local = scaled - index as f32;

    let [r, g, b] = core::array::from_fn(|channel| {
        let from = STOPS[index][channel];
        let to = STOPS[index + 1][channel];
        ((from + (to - from) * local) * 255.0).round() as u8
    });

    [r, g, b, 255]
}
