use alloc::sync::Arc;

use ash::vk;
use vulkan::{CommandError, VkError, Vulkan, try_name};

use super::{UploadError, Uploader};

/// A sampled 2D image with its own memory.
pub struct Texture {
    vulkan: Arc<Vulkan>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    extent: vk::Extent2D,
}

impl Texture {
    pub unsafe fn new(
        vulkan: Arc<Vulkan>,
        extent: vk::Extent2D,
        format: vk::Format,
        debug_name: &str,
    ) -> Result<Self, UploadError> {
        let device = vulkan.device();

        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent.into())
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.create_image(&create_info, None) }
            .map_err(|e| VkError::new(e, "vkCreateImage"))?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let Some(memory_type_index) =
            vulkan.find_memory_type_index(&requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL)
        else {
            unsafe { device.destroy_image(image, None) };
            return Err(UploadError::NoSuitableMemoryType(
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            ));
        };

        let allocate_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);

        let memory = match unsafe { device.allocate_memory(&allocate_info, None) } {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(VkError::new(e, "vkAllocateMemory").into());
            }
        };

        if let Err(e) = unsafe { device.bind_image_memory(image, memory, 0) } {
            unsafe {
                device.destroy_image(image, None);
                device.free_memory(memory, None);
            }
            return Err(VkError::new(e, "vkBindImageMemory").into());
        }

        try_name(&vulkan, image, debug_name);
        try_name(&vulkan, memory, &format!("{debug_name} Memory"));

        Ok(Self {
            vulkan,
            image,
            memory,
            extent,
        })
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        unsafe {
            self.vulkan.device().destroy_image(self.image, None);
            self.vulkan.device().free_memory(self.memory, None);
        }
    }
}

impl Uploader<'_> {
    /// Creates a texture and fills it with tightly packed `texels`, leaving it ready for sampling.
    pub fn upload_texture(
        &self,
        texels: &[u8],
        extent: vk::Extent2D,
        format: vk::Format,
        debug_name: &str,
    ) -> Result<Texture, UploadError> {
        let texture =
            unsafe { Texture::new(Arc::clone(self.pool.vulkan()), extent, format, debug_name)? };

        let staging = self.stage(texels)?;

        let result = unsafe { self.fill_texture(&texture, format, staging.buffer, staging.offset) };

        self.allocator.free(staging.buffer, staging.offset)?;
        result?;

        Ok(texture)
    }

    unsafe fn fill_texture(
        &self,
        texture: &Texture,
        format: vk::Format,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
    ) -> Result<(), CommandError> {
        unsafe {
            self.pool.transition_image_layout(
                texture.image,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;

            self.pool
                .copy_buffer_region_to_image(buffer, offset, texture.image, texture.extent)?;

            self.pool.transition_image_layout(
                texture.image,
                format,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        }
    }
}
