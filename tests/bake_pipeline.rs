//! End-to-end bakes on a real device. Each test returns early when no Vulkan
//! device or no compiled shaders (shaders/out, see shaders/compile.sh) exist.

use std::path::{Path, PathBuf};

use envmap_baker::camera::CubeFace;
use envmap_baker::cubemap::CubeResource;
use envmap_baker::readback::{self, StagingBuffer};
use envmap_baker::transitions::ImageState;
use envmap_baker::{
    bake_irradiance_from_cube, bake_skybox_from_equirectangular, destroy_cube, export_cube, hdr,
    GpuContext,
};

struct Shaders {
    vert: PathBuf,
    skybox_frag: PathBuf,
    irradiance_frag: PathBuf,
}

fn shaders() -> Option<Shaders> {
    let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("shaders/out");
    let shaders = Shaders {
        vert: dir.join("skybox.vert.spv"),
        skybox_frag: dir.join("skybox.frag.spv"),
        irradiance_frag: dir.join("irradiance.frag.spv"),
    };
    if [&shaders.vert, &shaders.skybox_frag, &shaders.irradiance_frag]
        .iter()
        .all(|p| p.exists())
    {
        Some(shaders)
    } else {
        eprintln!("skipping: compiled shaders not found in {:?}", dir);
        None
    }
}

fn context() -> Option<GpuContext> {
    match GpuContext::new() {
        Ok(ctx) => Some(ctx),
        Err(e) => {
            eprintln!("skipping: no Vulkan device ({})", e);
            None
        }
    }
}

fn write_solid_panorama(dir: &Path, width: u32, height: u32, rgb: [f32; 3]) -> PathBuf {
    let path = dir.join("panorama.hdr");
    let pixels: Vec<f32> = (0..width * height)
        .flat_map(|_| [rgb[0], rgb[1], rgb[2], 1.0])
        .collect();
    hdr::encode_hdr(&path, width, height, &pixels).unwrap();
    path
}

fn assert_faces_near(ctx: &GpuContext, cube: &mut CubeResource<'_>, rgb: [f32; 3], tolerance: f32) {
    let extent = cube.level_extent(0);
    let staging = StagingBuffer::new(ctx, extent.width, extent.height).unwrap();
    for face in CubeFace::ALL {
        let texels = readback::read_face(ctx, cube, face, &staging).unwrap();
        assert_eq!(texels.len(), (extent.width * extent.height * 4) as usize);
        for px in texels.chunks_exact(4) {
            for c in 0..3 {
                assert!(
                    (px[c] - rgb[c]).abs() <= tolerance,
                    "{:?}: channel {} is {}, expected {}",
                    face,
                    c,
                    px[c],
                    rgb[c]
                );
            }
            assert!(
                (px[3] - 1.0).abs() <= 1e-6,
                "{:?}: alpha is {}, expected opaque",
                face,
                px[3]
            );
        }
    }
    assert!(cube.is_complete());
}

#[test]
fn uniform_panorama_bakes_to_uniform_cubes() {
    let (Some(ctx), Some(shaders)) = (context(), shaders()) else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let input = write_solid_panorama(dir.path(), 128, 64, [0.5, 0.5, 0.5]);

    let mut skybox =
        bake_skybox_from_equirectangular(&ctx, &input, 64, 64, &shaders.vert, &shaders.skybox_frag)
            .unwrap();
    assert!(skybox.is_complete());
    assert_faces_near(&ctx, &mut skybox, [0.5, 0.5, 0.5], 1e-3);

    let mut irradiance = bake_irradiance_from_cube(
        &ctx,
        &skybox,
        64,
        64,
        &shaders.vert,
        &shaders.irradiance_frag,
    )
    .unwrap();
    assert_faces_near(&ctx, &mut irradiance, [0.5, 0.5, 0.5], 0.02);

    destroy_cube(irradiance);
    destroy_cube(skybox);
}

#[test]
fn export_is_repeatable() {
    let (Some(ctx), Some(shaders)) = (context(), shaders()) else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let input = write_solid_panorama(dir.path(), 64, 32, [0.25, 1.0, 2.0]);

    let mut skybox =
        bake_skybox_from_equirectangular(&ctx, &input, 16, 16, &shaders.vert, &shaders.skybox_frag)
            .unwrap();

    let first = dir.path().join("first").display().to_string();
    let second = dir.path().join("second").display().to_string();
    let first_files = export_cube(&ctx, &mut skybox, &first).unwrap();
    let second_files = export_cube(&ctx, &mut skybox, &second).unwrap();

    assert_eq!(first_files.len(), 6);
    for (a, b) in first_files.iter().zip(&second_files) {
        assert_eq!(std::fs::read(a).unwrap(), std::fs::read(b).unwrap(), "{:?}", a);
    }
    assert!(first_files[5].ends_with("first_side_5.hdr"));

    // exported faces decode to the baked colour
    let face = hdr::decode_equirectangular(&first_files[2]).unwrap();
    assert_eq!((face.width, face.height), (16, 16));
    let texel = face.texel(8, 8);
    for (got, want) in texel.iter().zip([0.25, 1.0, 2.0, 1.0]) {
        assert!((got - want).abs() < 0.02, "{:?}", texel);
    }

    for face in CubeFace::ALL {
        assert_eq!(skybox.face_state(0, face), ImageState::ShaderReadOnly);
    }
}

#[test]
fn single_texel_faces_bake() {
    let (Some(ctx), Some(shaders)) = (context(), shaders()) else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let input = write_solid_panorama(dir.path(), 2, 1, [1.0, 0.5, 0.25]);

    let mut skybox =
        bake_skybox_from_equirectangular(&ctx, &input, 1, 1, &shaders.vert, &shaders.skybox_frag)
            .unwrap();
    assert_faces_near(&ctx, &mut skybox, [1.0, 0.5, 0.25], 1e-3);
}

#[test]
fn missing_panorama_is_an_error() {
    let (Some(ctx), Some(shaders)) = (context(), shaders()) else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let result = bake_skybox_from_equirectangular(
        &ctx,
        &dir.path().join("absent.hdr"),
        32,
        32,
        &shaders.vert,
        &shaders.skybox_frag,
    );
    assert!(result.is_err());
}

#[test]
fn missing_shader_is_an_error() {
    let Some(ctx) = context() else {
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    let input = write_solid_panorama(dir.path(), 8, 4, [0.5, 0.5, 0.5]);
    let missing = dir.path().join("nope.spv");

    let err = bake_skybox_from_equirectangular(&ctx, &input, 8, 8, &missing, &missing)
        .err()
        .unwrap();
    assert!(err.contains("nope.spv"), "{}", err);
}

#[test]
fn irradiance_from_unbaked_cube_panics() {
    let Some(ctx) = context() else {
        return;
    };
    let unbaked = CubeResource::new(&ctx, 8, 1, "unbaked").unwrap();
    // the readiness check runs before either shader is opened
    let missing = Path::new("unused.spv");

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = bake_irradiance_from_cube(
            &ctx,
            &unbaked,
            8,
            8,
            missing,
            missing,
        );
    }));
    let payload = result.err().unwrap();
    let message = payload
        .downcast_ref::<String>()
        .cloned()
        .unwrap_or_default();
    assert!(message.contains("expected ShaderReadOnly"), "{}", message);
}
