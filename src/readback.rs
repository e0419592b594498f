//! Cube readback: copy faces to a host-visible buffer and write them as HDR files.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::info;
use std::path::PathBuf;

use crate::camera::CubeFace;
use crate::cubemap::CubeResource;
use crate::hdr;
use crate::texture::hdr_image_size;
use crate::transitions::{self, ImageState, StageScope};
use crate::vulkan_context::GpuContext;

/// File written for `face`, e.g. `skybox_side_3.hdr`.
pub fn face_file_name(prefix: &str, face: CubeFace) -> String {
    format!("{}_side_{}.hdr", prefix, face.layer())
}

/// Reinterpret little-endian RGBA32F bytes as floats.
pub fn texels_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// A host-visible buffer that receives one RGBA32F image at a time.
pub struct StagingBuffer<'a> {
    ctx: &'a GpuContext,
    pub buffer: vk::Buffer,
    allocation: Option<Allocation>,
    pub size: u64,
}

impl<'a> StagingBuffer<'a> {
    /// Create a readback buffer large enough for one `width` x `height` image.
    pub fn new(ctx: &'a GpuContext, width: u32, height: u32) -> Result<Self, String> {
        let size = hdr_image_size(width, height);

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::TRANSFER_DST)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe {
            ctx.device
                .create_buffer(&buffer_info, None)
                .map_err(|e| format!("Failed to create readback buffer: {:?}", e))?
        };

        let mut staging = StagingBuffer {
            ctx,
            buffer,
            allocation: None,
            size,
        };

        let requirements = unsafe { ctx.device.get_buffer_memory_requirements(buffer) };

        let allocation = ctx.allocate(&AllocationCreateDesc {
            name: "readback_staging",
            requirements,
            location: MemoryLocation::GpuToCpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })?;

        let (memory, offset) = unsafe { (allocation.memory(), allocation.offset()) };
        staging.allocation = Some(allocation);

        unsafe {
            ctx.device
                .bind_buffer_memory(buffer, memory, offset)
                .map_err(|e| format!("Failed to bind readback buffer memory: {:?}", e))?;
        }

        Ok(staging)
    }

    /// Read back the texels of the last copy.
    pub fn read_texels(&self) -> Result<Vec<f32>, String> {
        let alloc = self
            .allocation
            .as_ref()
            .ok_or("Readback buffer has no allocation")?;

        let mapped = alloc
            .mapped_slice()
            .ok_or("Readback buffer is not mapped")?;

        let byte_count = self.size as usize;
        if mapped.len() < byte_count {
            return Err(format!(
                "Mapped slice too small: {} < {}",
                mapped.len(),
                byte_count
            ));
        }

        Ok(texels_from_bytes(&mapped[..byte_count]))
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if let Some(alloc) = self.allocation.take() {
            self.ctx.free(alloc);
        }
        unsafe {
            self.ctx.device.destroy_buffer(self.buffer, None);
        }
    }
}

/// Copy level 0 of `face` into `staging` and return its texels.
///
/// The face is moved to `TransferSrc` for the copy and back to
/// `ShaderReadOnly` afterwards; this submits and waits.
pub fn read_face(
    ctx: &GpuContext,
    cube: &mut CubeResource<'_>,
    face: CubeFace,
    staging: &StagingBuffer<'_>,
) -> Result<Vec<f32>, String> {
    let extent = cube.level_extent(0);
    assert!(
        hdr_image_size(extent.width, extent.height) <= staging.size,
        "readback buffer too small for a {}x{} face",
        extent.width,
        extent.height
    );

    let cmd = ctx.begin_single_commands()?;

    cube.transition_face(cmd, 0, face, ImageState::TransferSrc, StageScope::ALL);

    let region = vk::BufferImageCopy::default()
        .buffer_offset(0)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(face.layer())
                .layer_count(1),
        )
        .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    unsafe {
        ctx.device.cmd_copy_image_to_buffer(
            cmd,
            cube.image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            staging.buffer,
            &[region],
        );
    }
    transitions::cmd_host_read_barrier(&ctx.device, cmd);

    cube.transition_face(cmd, 0, face, ImageState::ShaderReadOnly, StageScope::ALL);

    ctx.end_single_commands(cmd)?;

    staging.read_texels()
}

/// Write every face of `cube` to `{prefix}_side_{face}.hdr`.
///
/// Returns the written paths in layer order. The cube must be fully baked;
/// it is left in `ShaderReadOnly`.
pub fn export_cube(
    ctx: &GpuContext,
    cube: &mut CubeResource<'_>,
    prefix: &str,
) -> Result<Vec<PathBuf>, String> {
    cube.assert_shader_readable();

    let extent = cube.level_extent(0);
    let staging = StagingBuffer::new(ctx, extent.width, extent.height)?;

    let mut written = Vec::with_capacity(CubeFace::ALL.len());
    for face in CubeFace::ALL {
        let texels = read_face(ctx, cube, face, &staging)?;
        let path = PathBuf::from(face_file_name(prefix, face));
        hdr::encode_hdr(&path, extent.width, extent.height, &texels)?;
        written.push(path);
    }

    info!(
        "Exported {} faces ({}x{}) with prefix '{}'",
        written.len(),
        extent.width,
        extent.height,
        prefix
    );

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn face_files_are_numbered_by_layer() {
        assert_eq!(face_file_name("skybox", CubeFace::PositiveX), "skybox_side_0.hdr");
        assert_eq!(
            face_file_name("out/irradiance", CubeFace::NegativeZ),
            "out/irradiance_side_5.hdr"
        );
    }

    #[test]
    fn texels_decode_little_endian() {
        let mut bytes = Vec::new();
        for v in [0.5f32, -1.0, 65504.0, 0.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        assert_eq!(texels_from_bytes(&bytes), vec![0.5, -1.0, 65504.0, 0.0]);
    }

    #[test]
    fn trailing_partial_texel_is_ignored() {
        let mut bytes = 1.0f32.to_le_bytes().to_vec();
        bytes.push(0xff);
        assert_eq!(texels_from_bytes(&bytes), vec![1.0]);
    }
}
