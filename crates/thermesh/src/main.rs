//! # Thermesh
//! Builds the heat simulation scene and uploads it to the GPU through the shared memory allocator,
//! one command pool per upload worker.
//!

extern crate alloc;

use alloc::sync::Arc;

use ash::vk;
use failure::Failure;
use logger::setup_logger;
use mimalloc::MiMalloc;
use scene::Scene;
use settings::Settings;
use tracing::{debug, error, info, info_span, warn};
use upload::{UploadJob, Uploaded, run_uploads};
use utilities::display_bytes;
use vulkan::{AllocatorStats, MemoryAllocator, Vulkan};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

mod failure;
mod logger;
mod scene;
mod settings;
mod upload;

/// The Cargo package version.
#[cfg(not(debug_assertions))]
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The Cargo package version or '0.0.0' if a non-release build.
#[cfg(debug_assertions)]
pub const VERSION: &str = "0.0.0";

fn main() {
    let settings_path = Settings::path_from_args();
    let (settings, load_error) = match Settings::load_or_create(&settings_path) {
        Ok(settings) => (settings, None),
        Err(error) => (Settings::default(), Some(error)),
    };

    // Set up logger
    let _logger_guards = setup_logger(&settings.logging).log_and_panic("Could not set up logging");

    // Log application start
    let _span = info_span!("[Main Thread]").entered();
    info!("Thermesh v{}", VERSION);

    if let Some(error) = load_error {
        warn!(
            "Could not load settings from {}, using defaults:\n{error}",
            settings_path.display()
        );
    }

    let vulkan = Arc::new(
        unsafe { Vulkan::new(&settings.vulkan) }.log_and_panic("Could not create Vulkan context"),
    );
    let allocator = MemoryAllocator::new(Arc::clone(&vulkan), settings.allocator);
    debug!("Allocator settings: {:?}", allocator.settings());

    let scene = Scene::build(&settings.demo);
    let results = run_uploads(
        &vulkan,
        &allocator,
        upload_jobs(scene),
        settings.demo.worker_threads,
    );

    let mut allocations = vec![];
    let mut textures = vec![];
    for result in results {
        match result {
            Ok(Uploaded::Buffer { label, allocation }) => {
                debug!("{label}: {} at {}", display_bytes(allocation.size), allocation.offset);
                allocations.push(allocation);
            }

            Ok(Uploaded::Texture { label, texture }) => {
                let extent = texture.extent();
                debug!("{label}: {}x{} texture", extent.width, extent.height);
                textures.push(texture);
            }

            Err(e) => error!("Upload failed:\n{e}"),
        }
    }

    log_stats("After upload", allocator.stats());
    info!(
        "{} submissions, at most {} in flight",
        vulkan.submission_count(),
        vulkan.peak_submissions_in_flight()
    );

    for allocation in allocations {
        if let Err(e) = allocator.free(allocation.buffer, allocation.offset) {
            error!("{e}");
        }
    }
    drop(textures);

    allocator.defragment();
    log_stats("After release", allocator.stats());
}

/// Every upload the scene needs, empty buffers are skipped.
fn upload_jobs(scene: Scene) -> Vec<UploadJob> {
    let buffers: [(&'static str, Vec<u8>); 6] = [
        ("Mesh Vertices", bytemuck::cast_slice(&scene.mesh.vertices).to_vec()),
        ("Mesh Indices", bytemuck::cast_slice(&scene.mesh.indices).to_vec()),
        ("Heat Sources", bytemuck::cast_slice(&scene.heat_sources).to_vec()),
        ("Temperatures", bytemuck::cast_slice(&scene.temperatures).to_vec()),
        ("Gizmo Vertices", bytemuck::cast_slice(&scene.gizmo.vertices).to_vec()),
        ("Gizmo Indices", bytemuck::cast_slice(&scene.gizmo.indices).to_vec()),
    ];

    let mut jobs: Vec<UploadJob> = buffers
        .into_iter()
        .filter(|(_, bytes)| !bytes.is_empty())
        .map(|(label, bytes)| UploadJob::Buffer { label, bytes })
        .collect();

    if scene.heat_map_size > 0 {
        jobs.push(UploadJob::Texture {
            label: "Heat Map",
            texels: bytemuck::cast_slice(&scene.heat_map).to_vec(),
            extent: vk::Extent2D::default()
                .width(scene.heat_map_size)
                .height(scene.heat_map_size),
            format: vk::Format::R8G8B8A8_UNORM,
        });
    }

    jobs
}

fn log_stats(label: &str, stats: AllocatorStats) {
    info!(
        "{label}: {} allocations using {} of {} across {} pools",
        stats.allocation_count,
        display_bytes(stats.used_bytes),
        display_bytes(stats.total_allocated),
        stats.pool_count
    );
}
