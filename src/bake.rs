//! Cube-face baking: render the six views of a source image through one
//! canvas and copy each result into a face of the destination cube.

use ash::vk;
use log::info;
use std::path::Path;
use std::time::Instant;

use crate::camera::{self, CubeFace};
use crate::canvas::Canvas;
use crate::cubemap::CubeResource;
use crate::hdr;
use crate::pipeline::BakePass;
use crate::spv_loader;
use crate::texture::{Texture2D, HDR_FORMAT};
use crate::transitions::{ImageState, StageScope};
use crate::vulkan_context::GpuContext;

/// Copy of a whole canvas into one face of one cube level.
pub fn face_copy_region(extent: vk::Extent2D, level: u32, face: CubeFace) -> vk::ImageCopy {
    vk::ImageCopy::default()
        .src_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .src_offset(vk::Offset3D::default())
        .dst_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(level)
                .base_array_layer(face.layer())
                .layer_count(1),
        )
        .dst_offset(vk::Offset3D::default())
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

/// Render all six faces of `dest` at `level` from a sampled source.
///
/// The source view must be in `ShaderReadOnly` for the whole bake. Every
/// face ends in `ShaderReadOnly`. Records one command buffer and waits for it.
pub fn bake_faces(
    ctx: &GpuContext,
    source_view: vk::ImageView,
    source_sampler: vk::Sampler,
    dest: &mut CubeResource<'_>,
    level: u32,
    vert: &Path,
    frag: &Path,
) -> Result<(), String> {
    let vert_code = spv_loader::load_spirv(vert)?;
    let frag_code = spv_loader::load_spirv(frag)?;

    let extent = dest.level_extent(level);
    let mut canvas = Canvas::new(ctx, extent.width, extent.height, HDR_FORMAT)?;
    assert_eq!(
        canvas.extent(),
        dest.level_extent(level),
        "canvas and destination face extents differ"
    );

    let pass = BakePass::new(
        ctx,
        canvas.render_pass,
        &vert_code,
        &frag_code,
        source_view,
        source_sampler,
    )?;

    let cameras = camera::face_uniforms();

    let cmd = ctx.begin_single_commands()?;

    for face in CubeFace::ALL {
        canvas.begin(cmd);
        pass.draw(cmd, &cameras[face.layer() as usize]);
        canvas.end(cmd);

        canvas.transition(cmd, ImageState::TransferSrc, StageScope::ALL);
        dest.discard_face(level, face);
        dest.transition_face(cmd, level, face, ImageState::TransferDst, StageScope::ALL);

        let region = face_copy_region(extent, level, face);

        unsafe {
            ctx.device.cmd_copy_image(
                cmd,
                canvas.image(),
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dest.image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        canvas.transition(cmd, ImageState::ShaderReadOnly, StageScope::ALL);
        dest.transition_face(cmd, level, face, ImageState::ShaderReadOnly, StageScope::ALL);
    }

    ctx.end_single_commands(cmd)?;

    drop(pass);
    canvas.destroy();

    Ok(())
}

/// Reproject an equirectangular HDR panorama onto a new cube.
///
/// The file is decoded before any GPU resource is created.
pub fn bake_skybox_from_equirectangular<'a>(
    ctx: &'a GpuContext,
    path: &Path,
    width: u32,
    height: u32,
    vert: &Path,
    frag: &Path,
) -> Result<CubeResource<'a>, String> {
    assert_eq!(width, height, "cube faces must be square");

    let start = Instant::now();
    let panorama = hdr::decode_equirectangular(path)?;

    let source = Texture2D::from_rgba32f(
        ctx,
        panorama.width,
        panorama.height,
        &panorama.pixels,
        "equirect_source",
    )?;
    debug_assert_eq!(source.state(), ImageState::ShaderReadOnly);

    let mut cube = CubeResource::new(ctx, width, 1, "skybox_cube")?;
    bake_faces(ctx, source.view, source.sampler, &mut cube, 0, vert, frag)?;

    info!(
        "Baked skybox {}x{} from {:?} in {:.1} ms",
        width,
        height,
        path,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(cube)
}

/// Convolve a baked cube into a diffuse irradiance cube.
///
/// Panics if any face of `source` is not ready to sample.
pub fn bake_irradiance_from_cube<'a>(
    ctx: &'a GpuContext,
    source: &CubeResource<'_>,
    width: u32,
    height: u32,
    vert: &Path,
    frag: &Path,
) -> Result<CubeResource<'a>, String> {
    assert_eq!(width, height, "cube faces must be square");
    source.assert_shader_readable();

    let start = Instant::now();

    let mut cube = CubeResource::new(ctx, width, 1, "irradiance_cube")?;
    bake_faces(ctx, source.view, source.sampler, &mut cube, 0, vert, frag)?;

    info!(
        "Baked irradiance {}x{} in {:.1} ms",
        width,
        height,
        start.elapsed().as_secs_f64() * 1000.0
    );

    Ok(cube)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_targets_one_face_of_one_level() {
        let extent = vk::Extent2D {
            width: 64,
            height: 64,
        };
        let region = face_copy_region(extent, 2, CubeFace::NegativeY);

        assert_eq!(region.src_subresource.base_array_layer, 0);
        assert_eq!(region.src_subresource.mip_level, 0);
        assert_eq!(region.dst_subresource.base_array_layer, 3);
        assert_eq!(region.dst_subresource.mip_level, 2);
        assert_eq!(region.dst_subresource.layer_count, 1);
        assert_eq!(
            (region.extent.width, region.extent.height, region.extent.depth),
            (64, 64, 1)
        );
    }
}
