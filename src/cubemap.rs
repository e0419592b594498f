//! Cube images: six square layers, written face by face, sampled as a whole.

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use log::debug;

use crate::camera::CubeFace;
use crate::texture::{self, HDR_FORMAT};
use crate::transitions::{self, ImageState, StageScope};
use crate::vulkan_context::GpuContext;

pub const CUBE_FACES: u32 = 6;

/// Per (level, face) image state of a cube.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FaceStates {
    levels: u32,
    states: Vec<ImageState>,
}

impl FaceStates {
    pub fn new(levels: u32) -> Self {
        assert!(levels > 0, "cube needs at least one level");
        Self {
            levels,
            states: vec![ImageState::Undefined; (levels * CUBE_FACES) as usize],
        }
    }

    pub fn levels(&self) -> u32 {
        self.levels
    }

    fn index(&self, level: u32, face: CubeFace) -> usize {
        assert!(
            level < self.levels,
            "level {} out of range (cube has {})",
            level,
            self.levels
        );
        (level * CUBE_FACES + face.layer()) as usize
    }

    pub fn get(&self, level: u32, face: CubeFace) -> ImageState {
        self.states[self.index(level, face)]
    }

    pub fn set(&mut self, level: u32, face: CubeFace, state: ImageState) {
        let i = self.index(level, face);
        self.states[i] = state;
    }

    /// Whether every face of every level is in `state`.
    pub fn all_in(&self, state: ImageState) -> bool {
        self.states.iter().all(|&s| s == state)
    }

    /// Panic unless the whole cube can be bound for sampling.
    pub fn assert_shader_readable(&self) {
        for level in 0..self.levels {
            for face in CubeFace::ALL {
                let state = self.get(level, face);
                assert!(
                    state == ImageState::ShaderReadOnly,
                    "cube face {:?} level {} is {:?}, expected ShaderReadOnly",
                    face,
                    level,
                    state
                );
            }
        }
    }
}

/// Edge length of `level` for a cube whose level 0 is `size`.
pub fn level_size(size: u32, level: u32) -> u32 {
    size.checked_shr(level).unwrap_or(0).max(1)
}

/// Length of the full mip chain of a `size` x `size` face.
pub fn max_levels(size: u32) -> u32 {
    u32::BITS - size.leading_zeros()
}

/// Panic unless a `size` cube can hold `levels` mip levels.
pub fn check_cube_shape(size: u32, levels: u32) {
    assert!(size > 0, "cube has a zero face size");
    assert!(
        levels <= max_levels(size),
        "{} levels requested but a {} face has at most {}",
        levels,
        size,
        max_levels(size)
    );
}

/// A cube-compatible image with a CUBE view over all of its levels.
pub struct CubeResource<'a> {
    ctx: &'a GpuContext,
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    allocation: Option<Allocation>,
    pub size: u32,
    faces: FaceStates,
}

impl<'a> CubeResource<'a> {
    pub fn new(ctx: &'a GpuContext, size: u32, levels: u32, name: &str) -> Result<Self, String> {
        check_cube_shape(size, levels);
        let faces = FaceStates::new(levels);

        let device = &ctx.device;

        let image_info = vk::ImageCreateInfo::default()
            .flags(vk::ImageCreateFlags::CUBE_COMPATIBLE)
            .image_type(vk::ImageType::TYPE_2D)
            .format(HDR_FORMAT)
            .extent(vk::Extent3D {
                width: size,
                height: size,
                depth: 1,
            })
            .mip_levels(levels)
            .array_layers(CUBE_FACES)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(
                vk::ImageUsageFlags::TRANSFER_DST
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::SAMPLED,
            )
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe {
            device
                .create_image(&image_info, None)
                .map_err(|e| format!("Failed to create cube image '{}': {:?}", name, e))?
        };

        let mut cube = CubeResource {
            ctx,
            image,
            view: vk::ImageView::null(),
            sampler: vk::Sampler::null(),
            allocation: None,
            size,
            faces,
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
        cube.allocation = Some(allocation);

        unsafe {
            device
                .bind_image_memory(image, memory, offset)
                .map_err(|e| format!("Failed to bind cube memory '{}': {:?}", name, e))?;
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::CUBE)
            .format(HDR_FORMAT)
            .components(vk::ComponentMapping::default())
            .subresource_range(transitions::color_range(0, levels, 0, CUBE_FACES));

        cube.view = unsafe {
            device
                .create_image_view(&view_info, None)
                .map_err(|e| format!("Failed to create cube view '{}': {:?}", name, e))?
        };

        cube.sampler = texture::create_sampler(
            device,
            vk::SamplerAddressMode::MIRRORED_REPEAT,
            levels as f32,
        )?;

        debug!("Created cube '{}' {}x{} with {} level(s)", name, size, size, levels);

        Ok(cube)
    }

    pub fn levels(&self) -> u32 {
        self.faces.levels()
    }

    pub fn level_extent(&self, level: u32) -> vk::Extent2D {
        assert!(level < self.levels(), "level {} out of range", level);
        let edge = level_size(self.size, level);
        vk::Extent2D {
            width: edge,
            height: edge,
        }
    }

    pub fn face_state(&self, level: u32, face: CubeFace) -> ImageState {
        self.faces.get(level, face)
    }

    pub fn face_states(&self) -> &FaceStates {
        &self.faces
    }

    /// Every face of every level has been written and is ready to sample.
    pub fn is_complete(&self) -> bool {
        self.faces.all_in(ImageState::ShaderReadOnly)
    }

    pub fn assert_shader_readable(&self) {
        self.faces.assert_shader_readable();
    }

    /// Record a transition of one face of one level from its tracked state.
    pub fn transition_face(
        &mut self,
        cmd: vk::CommandBuffer,
        level: u32,
        face: CubeFace,
        new: ImageState,
        stages: StageScope,
    ) {
        let old = self.faces.get(level, face);
        transitions::cmd_transition(
            &self.ctx.device,
            cmd,
            self.image,
            transitions::color_range(level, 1, face.layer(), 1),
            old,
            new,
            stages,
        );
        self.faces.set(level, face, new);
    }

    /// Mark a face whose contents are about to be overwritten entirely.
    ///
    /// The next transition then starts from `Undefined`.
    pub fn discard_face(&mut self, level: u32, face: CubeFace) {
        self.faces.set(level, face, ImageState::Undefined);
    }

    /// Release all handles now instead of at scope end.
    pub fn destroy(self) {}
}

impl Drop for CubeResource<'_> {
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

/// Release a cube and everything it owns.
pub fn destroy_cube(cube: CubeResource<'_>) {
    cube.destroy();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_cube_starts_undefined() {
        let faces = FaceStates::new(3);
        assert!(faces.all_in(ImageState::Undefined));
        assert_eq!(faces.get(2, CubeFace::NegativeZ), ImageState::Undefined);
    }

    #[test]
    fn faces_are_tracked_independently() {
        let mut faces = FaceStates::new(2);
        faces.set(0, CubeFace::PositiveY, ImageState::TransferDst);
        faces.set(1, CubeFace::PositiveY, ImageState::ShaderReadOnly);

        assert_eq!(faces.get(0, CubeFace::PositiveY), ImageState::TransferDst);
        assert_eq!(faces.get(1, CubeFace::PositiveY), ImageState::ShaderReadOnly);
        assert_eq!(faces.get(0, CubeFace::NegativeY), ImageState::Undefined);
    }

    #[test]
    fn readable_once_every_face_is_written() {
        let mut faces = FaceStates::new(1);
        for face in CubeFace::ALL {
            assert!(!faces.all_in(ImageState::ShaderReadOnly));
            faces.set(0, face, ImageState::ShaderReadOnly);
        }
        assert!(faces.all_in(ImageState::ShaderReadOnly));
        faces.assert_shader_readable();
    }

    #[test]
    #[should_panic(expected = "expected ShaderReadOnly")]
    fn partially_written_cube_is_not_readable() {
        let mut faces = FaceStates::new(1);
        for face in &CubeFace::ALL[..5] {
            faces.set(0, *face, ImageState::ShaderReadOnly);
        }
        faces.set(0, CubeFace::NegativeZ, ImageState::TransferDst);
        faces.assert_shader_readable();
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn level_past_the_chain_panics() {
        FaceStates::new(1).get(1, CubeFace::PositiveX);
    }

    #[test]
    fn level_sizes_halve_down_to_one() {
        assert_eq!(level_size(512, 0), 512);
        assert_eq!(level_size(512, 1), 256);
        assert_eq!(level_size(512, 9), 1);
        assert_eq!(level_size(512, 12), 1);
        assert_eq!(level_size(1, 0), 1);
        assert_eq!(level_size(512, 32), 1);
        assert_eq!(level_size(u32::MAX, 40), 1);
    }

    #[test]
    fn mip_chain_length_follows_face_size() {
        assert_eq!(max_levels(1), 1);
        assert_eq!(max_levels(2), 2);
        assert_eq!(max_levels(64), 7);
        assert_eq!(max_levels(512), 10);
        assert_eq!(max_levels(513), 10);
        assert_eq!(max_levels(u32::MAX), 32);
        check_cube_shape(512, 10);
        check_cube_shape(1, 1);
    }

    #[test]
    #[should_panic(expected = "at most 10")]
    fn more_levels_than_the_mip_chain_panics() {
        check_cube_shape(512, 11);
    }

    #[test]
    #[should_panic(expected = "zero face size")]
    fn zero_face_size_panics() {
        check_cube_shape(0, 1);
    }
}
