//! Offscreen baking of equirectangular HDR panoramas into skybox and diffuse
//! irradiance cube maps with Vulkan.

pub mod bake;
pub mod camera;
pub mod canvas;
pub mod cubemap;
pub mod hdr;
pub mod manifest;
pub mod pipeline;
pub mod readback;
pub mod spv_loader;
pub mod texture;
pub mod transitions;
pub mod vulkan_context;

pub use bake::{bake_irradiance_from_cube, bake_skybox_from_equirectangular};
pub use cubemap::{destroy_cube, CubeResource};
pub use readback::export_cube;
pub use vulkan_context::GpuContext;
