use alloc::sync::Arc;
use std::thread;

use ash::vk;
use parking_lot::Mutex;
use tracing::{debug, info_span, warn};
use utilities::DebugTime;
use vulkan::{Allocation, CommandPool, MemoryAllocator, Vulkan};

use crate::failure::{Failure, log_and_panic};

use super::{Texture, UploadError, Uploader};

pub enum UploadJob {
    Buffer {
        label: &'static str,
        bytes: Vec<u8>,
    },

    Texture {
        label: &'static str,
        texels: Vec<u8>,
        extent: vk::Extent2D,
        format: vk::Format,
    },
}

pub enum Uploaded {
    Buffer {
        label: &'static str,
        allocation: Allocation,
    },

    Texture {
        label: &'static str,
        texture: Texture,
    },
}

impl UploadJob {
    fn run(self, uploader: &Uploader<'_>) -> Result<Uploaded, UploadError> {
        match self {
            Self::Buffer { label, bytes } => {
                let allocation = uploader.upload_buffer(&bytes)?;
                debug!("Uploaded {label} to {allocation:?}");

                Ok(Uploaded::Buffer { label, allocation })
            }

            Self::Texture {
                label,
                texels,
                extent,
                format,
            } => {
                let texture = uploader.upload_texture(&texels, extent, format, label)?;
                debug!("Uploaded {label} texture");

                Ok(Uploaded::Texture { label, texture })
            }
        }
    }
}

/// Runs `jobs` on `threads` workers that share `allocator`, each worker submits through its own
/// command pool.
pub fn run_uploads(
    vulkan: &Arc<Vulkan>,
    allocator: &MemoryAllocator,
    jobs: Vec<UploadJob>,
    threads: usize,
) -> Vec<Result<Uploaded, UploadError>> {
    let _timer = DebugTime::start(format!("Uploading {} jobs", jobs.len()));

    let queue = Mutex::new(jobs);
    let jobs = &queue;

    let results: Vec<Result<Uploaded, UploadError>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads.max(1))
            .map(|index| {
                thread::Builder::new()
                    .name(format!("Upload Worker {index}"))
                    .spawn_scoped(scope, move || worker(index, vulkan, allocator, jobs))
                    .log_and_panic("Could not spawn an upload worker")
            })
            .collect();

        handles
            .into_iter()
            .flat_map(|handle| match handle.join() {
                Ok(results) => results,
                Err(_) => log_and_panic("Worker panicked", "Upload worker failed"),
            })
            .collect()
    });

    let remaining = queue.into_inner().len();
    if remaining > 0 {
        warn!("{remaining} uploads never ran");
    }

    results
}

fn worker(
    index: usize,
    vulkan: &Arc<Vulkan>,
    allocator: &MemoryAllocator,
    jobs: &Mutex<Vec<UploadJob>>,
) -> Vec<Result<Uploaded, UploadError>> {
    let _span = info_span!("[Upload Worker]", index).entered();

    let pool = match CommandPool::new(Arc::clone(vulkan), &format!("Upload Worker {index}")) {
        Ok(pool) => pool,
        Err(e) => return vec![Err(e.into())],
    };
    let uploader = Uploader::new(allocator, &pool);

    let mut results = vec![];
    loop {
        let Some(job) = jobs.lock().pop() else {
            break;
        };

        results.push(job.run(&uploader));
    }

    debug!("Finished {} uploads", results.len());

    results
}
