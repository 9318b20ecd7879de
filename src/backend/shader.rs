// Shader module loading and management
//
// Vulkan consumes SPIR-V bytecode. Shaders are precompiled to disk and read
// at startup; the only contract is that the bytes form a well-formed module
// with a "main" entry point.

use anyhow::{Context, Result};
use ash::vk;
use std::path::Path;

use super::error::RendererError;
use super::VulkanDevice;

/// Read a SPIR-V artifact from disk. `read_spv` validates the magic number
/// and re-aligns the words, so arbitrary byte streams are rejected early.
pub fn load_spirv<P: AsRef<Path>>(path: P) -> Result<Vec<u32>> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read shader file: {:?}", path))?;

    let mut cursor = std::io::Cursor::new(bytes);
    ash::util::read_spv(&mut cursor)
        .with_context(|| format!("Invalid SPIR-V in shader file: {:?}", path))
}

/// Create a shader module from SPIR-V words.
pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    let module = unsafe { device.device.create_shader_module(&create_info, None) }
        .map_err(RendererError::creating("shader module"))?;

    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SPIRV_MAGIC: u32 = 0x0723_0203;

    fn temp_file(name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(bytes).unwrap();
        path
    }

    #[test]
    fn load_spirv_accepts_a_minimal_valid_stream() {
        let words = [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let path = temp_file("triangular_shader_ok.spv", &bytes);

        let loaded = load_spirv(&path).unwrap();
        assert_eq!(loaded[0], SPIRV_MAGIC);
        assert_eq!(loaded.len(), words.len());

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_spirv_rejects_garbage_bytes() {
        let path = temp_file("triangular_shader_bad.spv", b"not spirv at all");
        assert!(load_spirv(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn load_spirv_reports_missing_files() {
        let err = load_spirv("definitely/not/here.spv").unwrap_err();
        assert!(err.to_string().contains("Failed to read shader file"));
    }
}
