//! CLI entry point: bake a skybox and an irradiance cube from one
//! equirectangular HDR panorama and write their faces as .hdr files.

use clap::Parser;
use log::{error, info};
use std::path::{Path, PathBuf};

use envmap_baker::manifest::{BakeManifest, CubeEntry};
use envmap_baker::{
    bake_irradiance_from_cube, bake_skybox_from_equirectangular, destroy_cube, export_cube,
    GpuContext,
};

/// Bake cube-mapped environment lighting from an equirectangular HDR image.
#[derive(Parser)]
#[command(name = "envmap-baker", about = "Equirectangular HDR to skybox + irradiance cube maps")]
struct Args {
    /// Equirectangular .hdr panorama.
    input: PathBuf,

    /// Prefix for skybox faces; writes <prefix>_side_<0..5>.hdr.
    #[arg(default_value = "skybox")]
    skybox_prefix: String,

    /// Prefix for irradiance faces.
    #[arg(default_value = "irradiance")]
    irradiance_prefix: String,

    /// Skybox face edge in pixels.
    #[arg(long, default_value = "512")]
    skybox_size: u32,

    /// Irradiance face edge in pixels.
    #[arg(long, default_value = "64")]
    irradiance_size: u32,

    /// Directory holding skybox.vert.spv, skybox.frag.spv and irradiance.frag.spv.
    #[arg(long, default_value = "shaders/out")]
    shader_dir: PathBuf,

    /// Also write a JSON manifest describing the exported faces.
    #[arg(long)]
    manifest: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), String> {
    if args.skybox_size == 0 || args.irradiance_size == 0 {
        return Err("Face sizes must be at least 1".to_string());
    }

    let vert = args.shader_dir.join("skybox.vert.spv");
    let skybox_frag = args.shader_dir.join("skybox.frag.spv");
    let irradiance_frag = args.shader_dir.join("irradiance.frag.spv");

    info!("Input: {:?}", args.input);
    info!("Shaders: {:?}", args.shader_dir);

    let ctx = GpuContext::new()?;
    bake_and_export(&ctx, args, &vert, &skybox_frag, &irradiance_frag)?;

    if let Some(path) = &args.manifest {
        let manifest = BakeManifest {
            source: args.input.display().to_string(),
            skybox: CubeEntry::new(&args.skybox_prefix, args.skybox_size, 1),
            irradiance: CubeEntry::new(&args.irradiance_prefix, args.irradiance_size, 1),
        };
        manifest.write(path)?;
        info!("Wrote manifest {:?}", path);
    }

    info!("Done");
    Ok(())
}

/// Both cubes borrow `ctx`, so they are released before it on every path.
fn bake_and_export(
    ctx: &GpuContext,
    args: &Args,
    vert: &Path,
    skybox_frag: &Path,
    irradiance_frag: &Path,
) -> Result<(), String> {
    let mut skybox = bake_skybox_from_equirectangular(
        ctx,
        &args.input,
        args.skybox_size,
        args.skybox_size,
        vert,
        skybox_frag,
    )?;
    export_cube(ctx, &mut skybox, &args.skybox_prefix)?;

    let mut irradiance = bake_irradiance_from_cube(
        ctx,
        &skybox,
        args.irradiance_size,
        args.irradiance_size,
        vert,
        irradiance_frag,
    )?;
    export_cube(ctx, &mut irradiance, &args.irradiance_prefix)?;

    destroy_cube(irradiance);
    destroy_cube(skybox);

    Ok(())
}
