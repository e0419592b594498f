//! SPIR-V loading and shader module creation.

use ash::vk;
use std::fs;
use std::path::Path;

const SPIRV_MAGIC: u32 = 0x07230203;

/// Reinterpret a little-endian SPIR-V byte stream as words.
///
/// `origin` only names the source in error messages.
pub fn spirv_words(bytes: &[u8], origin: &str) -> Result<Vec<u32>, String> {
    if bytes.len() < 4 {
        return Err(format!("{}: too small to be valid SPIR-V", origin));
    }

    if bytes.len() % 4 != 0 {
        return Err(format!(
            "{}: size {} is not a multiple of 4",
            origin,
            bytes.len()
        ));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();

    if words[0] != SPIRV_MAGIC {
        return Err(format!(
            "{}: bad SPIR-V magic 0x{:08X} (expected 0x{:08X})",
            origin, words[0], SPIRV_MAGIC
        ));
    }

    Ok(words)
}

/// Read and validate a compiled shader.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, String> {
    let bytes = fs::read(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
    spirv_words(&bytes, &path.display().to_string())
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule, String> {
    let create_info = vk::ShaderModuleCreateInfo::default().code(code);

    unsafe {
        device
            .create_shader_module(&create_info, None)
            .map_err(|e| format!("Failed to create shader module: {:?}", e))
    }
}
