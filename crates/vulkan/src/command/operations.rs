use core::slice;

use ash::vk;

use super::{CommandError, CommandPool};

/// Source and destination access and stages for a supported layout transition.
struct TransitionMasks {
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
}

/// The masks for `old -> new`, `None` if the transition is not supported.
fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Option<TransitionMasks> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => {
            Some(TransitionMasks {
                src_access: vk::AccessFlags::empty(),
                dst_access: vk::AccessFlags::TRANSFER_WRITE,
                src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
                dst_stage: vk::PipelineStageFlags::TRANSFER,
            })
        }

        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => {
            Some(TransitionMasks {
                src_access: vk::AccessFlags::TRANSFER_WRITE,
                dst_access: vk::AccessFlags::SHADER_READ,
                src_stage: vk::PipelineStageFlags::TRANSFER,
                dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER
                    | vk::PipelineStageFlags::COMPUTE_SHADER,
            })
        }

        _ => None,
    }
}

/// The image aspects a format has.
fn aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::X8_D24_UNORM_PACK32 | vk::Format::D32_SFLOAT => {
            vk::ImageAspectFlags::DEPTH
        }

        vk::Format::D16_UNORM_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }

        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,

        _ => vk::ImageAspectFlags::COLOR,
    }
}

impl CommandPool {
    /// Copies `size` bytes from `src` at `src_offset` to `dst` at `dst_offset`, blocking until the
    /// copy has executed.
    pub unsafe fn copy_buffer(
        &self,
        src: vk::Buffer,
        src_offset: vk::DeviceSize,
        dst: vk::Buffer,
        dst_offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Result<(), CommandError> {
        unsafe {
            self.onetime_command(|device, command_buffer| {
                let region = vk::BufferCopy::default()
                    .src_offset(src_offset)
                    .dst_offset(dst_offset)
                    .size(size);

                device.cmd_copy_buffer(command_buffer, src, dst, slice::from_ref(&region));
            })
        }
    }

    /// Copies tightly packed texels from the start of `buffer` into the first mip of `image`. The
    /// image must be in `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<(), CommandError> {
        let extent = vk::Extent2D::default().width(width).height(height);

        unsafe { self.copy_buffer_region_to_image(buffer, 0, image, extent) }
    }

    /// Copies tightly packed texels starting at `buffer_offset` into the first mip of `image`. The
    /// image must be in `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn copy_buffer_region_to_image(
        &self,
        buffer: vk::Buffer,
        buffer_offset: vk::DeviceSize,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> Result<(), CommandError> {
        unsafe {
            self.onetime_command(|device, command_buffer| {
                let region = vk::BufferImageCopy::default()
                    .buffer_offset(buffer_offset)
                    .buffer_row_length(0)
                    .buffer_image_height(0)
                    .image_subresource(
                        vk::ImageSubresourceLayers::default()
                            .aspect_mask(vk::ImageAspectFlags::COLOR)
                            .mip_level(0)
                            .base_array_layer(0)
                            .layer_count(1),
                    )
                    .image_offset(vk::Offset3D::default())
                    .image_extent(extent.into());

                device.cmd_copy_buffer_to_image(
                    command_buffer,
                    buffer,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    slice::from_ref(&region),
                );
            })
        }
    }

    /// Transitions every mip and layer of `image` from `old_layout` to `new_layout`, blocking
    /// until the barrier has executed.
    ///
    /// Only `UNDEFINED -> TRANSFER_DST_OPTIMAL` and
    /// `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL` are supported, anything else fails
    /// before any commands are recorded.
    pub unsafe fn transition_image_layout(
        &self,
        image: vk::Image,
        format: vk::Format,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> Result<(), CommandError> {
        let masks =
            transition_masks(old_layout, new_layout).ok_or(CommandError::UnsupportedTransition {
                old: old_layout,
                new: new_layout,
            })?;

        let barrier = vk::ImageMemoryBarrier::default()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(aspect_mask(format))
                    .base_mip_level(0)
                    .level_count(vk::REMAINING_MIP_LEVELS)
                    .base_array_layer(0)
                    .layer_count(vk::REMAINING_ARRAY_LAYERS),
            )
            .src_access_mask(masks.src_access)
            .dst_access_mask(masks.dst_access);

        unsafe {
            self.onetime_command(|device, command_buffer| {
                device.cmd_pipeline_barrier(
                    command_buffer,
                    masks.src_stage,
                    masks.dst_stage,
                    vk::DependencyFlags::empty(),
                    &[],
                    &[],
                    slice::from_ref(&barrier),
                );
            })
        }
    }
}
