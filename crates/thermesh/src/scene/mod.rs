//! The data the application uploads before its first frame.

use half::f16;
use rand::{SeedableRng, rngs::StdRng};
use tracing::info;
use utilities::DebugTime;

pub use gizmo::Gizmo;
pub use heat::HeatSource;
pub use mesh::Mesh;

use crate::settings::DemoSettings;

mod gizmo;
mod heat;
mod mesh;

pub struct Scene {
    pub mesh: Mesh,
    pub heat_sources: Vec<HeatSource>,
    pub temperatures: Vec<f16>,
    pub gizmo: Gizmo,
    pub heat_map: Vec<[u8; 4]>,
    pub heat_map_size: u32,
}

impl Scene {
    pub fn build(settings: &DemoSettings) -> Self {
        let _timer = DebugTime::start("Building scene");

        let mut rng = StdRng::seed_from_u64(settings.seed);

        let mesh = Mesh::icosphere(settings.subdivisions);
        let heat_sources = heat::scatter_heat_sources(&mesh, settings.heat_sources, &mut rng);
        let temperatures = heat::initial_temperatures(&mesh, &heat_sources);

        info!(
            "Built mesh with {} vertices and {} triangles, {} heat sources",
            mesh.vertices.len(),
            mesh.triangle_count(),
            heat_sources.len()
        );

        Self {
            mesh,
            heat_sources,
            temperatures,
            gizmo: Gizmo::translation(),
            heat_map: heat::heat_map_texels(settings.texture_size),
            heat_map_size: settings.texture_size,
        }
    }
}
