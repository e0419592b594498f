//! 2D float textures: the decoded equirectangular source and the canvas
//! colour target.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::debug;

use crate::transitions::{self, ImageState, StageScope};
use crate::vulkan_context::GpuContext;

/// The single pixel format used for every image in a bake.
pub const HDR_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Four f32 channels.
pub const HDR_BYTES_PER_PIXEL: u64 = 16;

/// Bytes needed for one `width` x `height` RGBA32F image.
pub fn hdr_image_size(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * HDR_BYTES_PER_PIXEL
}

/// Linear-filtered sampler with the given address mode and LOD range.
pub fn create_sampler(
    device: &ash::Device,
    address_mode: vk::SamplerAddressMode,
    max_lod: f32,
) -> Result<vk::Sampler, String> {
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(address_mode)
        .address_mode_v(address_mode)
        .address_mode_w(address_mode)
        .max_anisotropy(1.0)
        .compare_op(vk::CompareOp::NEVER)
        .min_lod(0.0)
        .max_lod(max_lod)
        .border_color(vk::BorderColor::FLOAT_TRANSPARENT_BLACK);

    unsafe {
        device
            .create_sampler(&sampler_info, None)
            .map_err(|e| format!("Failed to create sampler: {:?}", e))
    }
}

/// A device-local 2D image with its view and sampler.
pub struct Texture2D<'a> {
    ctx: &'a GpuContext,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    allocation: Option<Allocation>,
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    state: ImageState,
}

impl<'a> Texture2D<'a> {
    /// Create an uninitialized single-level texture.
    pub fn new(
        ctx: &'a GpuContext,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        name: &str,
    ) -> Result<Self, String> {
        assert!(width > 0 && height > 0, "texture '{}' has a zero extent", name);

        let device = &ctx.device;

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(|e| format!("Failed to create image '{}': {:?}", name, e))?
        };

        // From here on, Drop cleans up whatever has been created.
        let mut texture = Texture2D {
            ctx,
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            allocation: None,
            width,
            height,
            format,
            state: ImageState::Undefined,
        };

        let requirements = unsafe { device.get_image_memory_requirements(image) };

        let allocation = ctx.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        texture.allocation = Some(allocation);

        unsafe {
            device
                .bind_image_memory(image, memory, offset)
                .map_err(|e| format!("Failed to bind image memory '{}': {:?}", name, e))?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping::default())
            .subresource_range(transitions::color_range(0, 1, 0, 1));

        texture.view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(|e| format!("Failed to create image view '{}': {:?}", name, e))?
        };

        texture.sampler = create_sampler(device, vk::SamplerAddressMode::REPEAT, 0.0)?;

        debug!("Created texture '{}' {}x{}", name, width, height);

        Ok(texture)
    }

    /// Create a sampled texture and upload RGBA32F `pixels` through a
    /// staging buffer. The texture ends in `ShaderReadOnly`.
    pub fn from_rgba32f(
        ctx: &'a GpuContext,
        width: u32,
        height: u32,
        pixels: &[f32],
        name: &str,
    ) -> Result<Self, String> {
        let data_size = hdr_image_size(width, height);
        assert_eq!(
            pixels.len() as u64 * 4,
            data_size,
            "pixel buffer does not match {}x{} RGBA32F",
            width,
            height
        );

        let mut texture = Texture2D::new(
            ctx,
            width,
            height,
            HDR_FORMAT,
            vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            name,
        )?;

        let mut staging =
            StagingUpload::new(ctx, bytemuck::cast_slice(pixels), "texture_staging")?;

        let cmd = ctx.begin_single_commands()?;

        texture.transition(cmd, ImageState::TransferDst, StageScope::ALL);

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
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
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        unsafe {
            ctx.device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                texture.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        texture.transition(cmd, ImageState::ShaderReadOnly, StageScope::ALL);

        ctx.end_single_commands(cmd)?;
        staging.destroy();

        Ok(texture)
    }

    pub fn extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.width,
            height: self.height,
        }
    }

    pub fn state(&self) -> ImageState {
        self.state
    }

    /// Record a transition from the tracked state to `new`.
    pub fn transition(&mut self, cmd: vk::CommandBuffer, new: ImageState, stages: StageScope) {
        transitions::cmd_transition(
            &self.ctx.device,
            cmd,
            self.image,
            transitions::color_range(0, 1, 0, 1),
            self.state,
            new,
            stages,
        );
        self.state = new;
    }

    /// Record that a render pass has moved the image into `state` on its own.
    pub(crate) fn set_state_from_render_pass(&mut self, state: ImageState) {
        self.state = state;
    }
}

impl Drop for Texture2D<'_> {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            if self.sampler != vk::Sampler::null() {
                device.destroy_sampler(self.sampler, None);
            }
            if self.view != vk::ImageView::null() {
                device.destroy_image_view(self.view, None);
            }
        }
        if let Some(alloc) = self.allocation.take() {
            self.ctx.free(alloc);
        }
        unsafe {
            device.destroy_image(self.image, None);
        }
    }
}

/// Host-visible upload buffer filled at creation.
struct StagingUpload<'a> {
    ctx: &'a GpuContext,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

impl<'a> StagingUpload<'a> {
    fn new(ctx: &'a GpuContext, data: &[u8], name: &str) -> Result<Self, String> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            ctx.device
                .create_buffer(&buffer_info, None)
                .map_err(|e| format!("Failed to create staging buffer: {:?}", e))?
        };

        let mut staging = StagingUpload {
            ctx,
            buffer,
            allocation: None,
        };

        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

        let mut allocation = ctx.allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        match allocation.mapped_slice_mut() {
            Some(mapped) => mapped[..data.len()].copy_from_slice(data),
            None => {
                ctx.free(allocation);
                return Err(format!("Staging buffer '{}' is not host-visible", name));
            }
        }

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        staging.allocation = Some(allocation);

        unsafe {
            ctx.device
                .bind_buffer_memory(buffer, memory, offset)
                .map_err(|e| format!("Failed to bind staging memory: {:?}", e))?;
        }

        Ok(staging)
    }

    fn destroy(&mut self) {
        if let Some(alloc) = self.allocation.take() {
            self.ctx.free(alloc);
        }
        if self.buffer != vk::Buffer::null() {
            unsafe {
                self.ctx.device.destroy_buffer(self.buffer, None);
            }
            self.buffer = vk::Buffer::null();
        }
    }
}

impl Drop for StagingUpload<'_> {
    fn drop(&mut self) {
        self.destroy();
    }
}
