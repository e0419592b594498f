//! Image layout transitions: access masks derived from the logical state an
//! image is leaving and the one it is entering.

use ash::vk;

/// Logical state of an image subresource.
///
/// Owning resources keep one of these per subresource; it is only changed
/// at the sites that record the matching barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ImageState {
    Undefined,
    Preinitialized,
    ColorAttachment,
    TransferSrc,
    TransferDst,
    ShaderReadOnly,
}

impl ImageState {
    pub fn layout(self) -> vk::ImageLayout {
        match self {
            ImageState::Undefined => vk::ImageLayout::UNDEFINED,
            ImageState::Preinitialized => vk::ImageLayout::PREINITIALIZED,
            ImageState::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            ImageState::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            ImageState::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            ImageState::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }

    /// Accesses that must complete before the image may leave this state.
    pub fn prior_access(self) -> vk::AccessFlags {
        match self {
            ImageState::Undefined => vk::AccessFlags::empty(),
            ImageState::Preinitialized => vk::AccessFlags::HOST_WRITE,
            ImageState::ColorAttachment => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            ImageState::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            ImageState::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
            ImageState::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
        }
    }

    /// Accesses the image is made available for once in this state.
    ///
    /// Panics for states an image can only start in.
    pub fn subsequent_access(self) -> vk::AccessFlags {
        match self {
            ImageState::TransferDst => vk::AccessFlags::TRANSFER_WRITE,
            ImageState::TransferSrc => vk::AccessFlags::TRANSFER_READ,
            ImageState::ColorAttachment => {
                vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            }
            ImageState::ShaderReadOnly => vk::AccessFlags::SHADER_READ,
            ImageState::Undefined | ImageState::Preinitialized => {
                panic!("{:?} is not a valid transition target", self)
            }
        }
    }
}

/// Coarse pipeline scopes on either side of a barrier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StageScope {
    pub before: vk::PipelineStageFlags,
    pub after: vk::PipelineStageFlags,
}

impl StageScope {
    /// Full serialization; what every bake step uses.
    pub const ALL: StageScope = StageScope {
        before: vk::PipelineStageFlags::ALL_COMMANDS,
        after: vk::PipelineStageFlags::ALL_COMMANDS,
    };
}

/// The pair of access masks for one transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AccessMasks {
    pub src: vk::AccessFlags,
    pub dst: vk::AccessFlags,
}

/// Compute the access masks for `old -> new`.
///
/// A transition into `ShaderReadOnly` with nothing to wait on assumes the
/// contents may have come from a host write or an upload copy.
pub fn access_masks(old: ImageState, new: ImageState) -> AccessMasks {
    let mut src = old.prior_access();
    let dst = new.subsequent_access();

    if new == ImageState::ShaderReadOnly && src.is_empty() {
        src = vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE;
    }

    AccessMasks { src, dst }
}

/// Color subresource range covering `levels` starting at `base_level` and
/// `layers` starting at `base_layer`.
pub fn color_range(
    base_level: u32,
    levels: u32,
    base_layer: u32,
    layers: u32,
) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(vk::ImageAspectFlags::COLOR)
        .base_mip_level(base_level)
        .level_count(levels)
        .base_array_layer(base_layer)
        .layer_count(layers)
}

/// Build the barrier for moving `range` of `image` from `old` to `new`.
pub fn image_barrier(
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: ImageState,
    new: ImageState,
) -> vk::ImageMemoryBarrier<'static> {
    let masks = access_masks(old, new);

    vk::ImageMemoryBarrier::default()
        .old_layout(old.layout())
        .new_layout(new.layout())
        .src_access_mask(masks.src)
        .dst_access_mask(masks.dst)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(range)
}

/// Record a layout transition. `cmd` must be in the recording state.
pub fn cmd_transition(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    old: ImageState,
    new: ImageState,
    stages: StageScope,
) {
    let barrier = image_barrier(image, range, old, new);

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            stages.before,
            stages.after,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
}

/// Barrier that makes transfer writes to host-visible memory readable by
/// the host once the submission's fence has signalled.
pub fn host_read_barrier() -> vk::MemoryBarrier<'static> {
    vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
        .dst_access_mask(vk::AccessFlags::HOST_READ)
}

/// Record `host_read_barrier` between the transfer and host stages.
pub fn cmd_host_read_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::HOST,
            vk::DependencyFlags::empty(),
            &[host_read_barrier()],
            &[],
            &[],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCES: [ImageState; 6] = [
        ImageState::Undefined,
        ImageState::Preinitialized,
        ImageState::ColorAttachment,
        ImageState::TransferSrc,
        ImageState::TransferDst,
        ImageState::ShaderReadOnly,
    ];

    const TARGETS: [ImageState; 4] = [
        ImageState::ColorAttachment,
        ImageState::TransferSrc,
        ImageState::TransferDst,
        ImageState::ShaderReadOnly,
    ];

    #[test]
    fn prior_access_is_empty_only_when_leaving_undefined() {
        for old in SOURCES {
            for new in TARGETS {
                let masks = access_masks(old, new);
                if old != ImageState::Undefined {
                    assert!(!masks.src.is_empty(), "{:?} -> {:?}", old, new);
                }
            }
        }
        assert!(access_masks(ImageState::Undefined, ImageState::TransferDst)
            .src
            .is_empty());
    }

    #[test]
    fn subsequent_access_follows_the_new_state() {
        for old in SOURCES {
            assert_eq!(
                access_masks(old, ImageState::TransferDst).dst,
                vk::AccessFlags::TRANSFER_WRITE
            );
            assert_eq!(
                access_masks(old, ImageState::TransferSrc).dst,
                vk::AccessFlags::TRANSFER_READ
            );
            assert_eq!(
                access_masks(old, ImageState::ShaderReadOnly).dst,
                vk::AccessFlags::SHADER_READ
            );
            assert!(access_masks(old, ImageState::ColorAttachment)
                .dst
                .contains(vk::AccessFlags::COLOR_ATTACHMENT_WRITE));
        }
    }

    #[test]
    fn undefined_to_shader_read_assumes_an_upload() {
        let masks = access_masks(ImageState::Undefined, ImageState::ShaderReadOnly);
        assert_eq!(
            masks.src,
            vk::AccessFlags::HOST_WRITE | vk::AccessFlags::TRANSFER_WRITE
        );
    }

    #[test]
    fn bake_transitions_use_expected_masks() {
        // canvas after render pass -> copy source
        let m = access_masks(ImageState::ShaderReadOnly, ImageState::TransferSrc);
        assert_eq!(m.src, vk::AccessFlags::SHADER_READ);
        assert_eq!(m.dst, vk::AccessFlags::TRANSFER_READ);

        // cube face written by the copy -> sampled downstream
        let m = access_masks(ImageState::TransferDst, ImageState::ShaderReadOnly);
        assert_eq!(m.src, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(m.dst, vk::AccessFlags::SHADER_READ);

        // canvas back after the copy
        let m = access_masks(ImageState::TransferSrc, ImageState::ShaderReadOnly);
        assert_eq!(m.src, vk::AccessFlags::TRANSFER_READ);
    }

    #[test]
    #[should_panic(expected = "not a valid transition target")]
    fn transition_into_undefined_panics() {
        access_masks(ImageState::ShaderReadOnly, ImageState::Undefined);
    }

    #[test]
    fn barrier_carries_layouts_and_range() {
        let range = color_range(0, 1, 3, 1);
        let barrier = image_barrier(
            vk::Image::null(),
            range,
            ImageState::Undefined,
            ImageState::TransferDst,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(barrier.subresource_range.base_array_layer, 3);
        assert_eq!(barrier.subresource_range.layer_count, 1);
        assert_eq!(barrier.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn readback_barrier_hands_transfer_writes_to_the_host() {
        let barrier = host_read_barrier();
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags::HOST_READ);
    }
}
