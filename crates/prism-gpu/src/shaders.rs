//! Precompiled SPIR-V the backend builds its pipelines from.

use std::fs::File;
use std::path::Path;

use crate::backend::{HitGroupCode, HitGroupPair};
use crate::error::{GpuError, Result};

/// SPIR-V for the fixed pipeline stages and the default hit-group pair.
#[derive(Clone, Debug, Default)]
pub struct ShaderLibrary {
    pub raster_vertex: Vec<u32>,
    pub raster_fragment: Vec<u32>,
    pub ray_generation: Vec<u32>,
    pub surface_miss: Vec<u32>,
    pub shadow_miss: Vec<u32>,
    pub default_hit_groups: HitGroupPair,
}

impl ShaderLibrary {
    /// Load the library from `.spv` files in `dir`.
    ///
    /// Required: `raster.vert.spv`, `raster.frag.spv`, `trace.rgen.spv`,
    /// `surface.rmiss.spv`, `shadow.rmiss.spv`, `surface.rchit.spv`,
    /// `shadow.rchit.spv`. Optional: `surface.rahit.spv`, `shadow.rahit.spv`.
    pub fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        tracing::debug!("Loading shader library from {}", dir.display());

        Ok(Self {
            raster_vertex: read_spirv(&dir.join("raster.vert.spv"))?,
            raster_fragment: read_spirv(&dir.join("raster.frag.spv"))?,
            ray_generation: read_spirv(&dir.join("trace.rgen.spv"))?,
            surface_miss: read_spirv(&dir.join("surface.rmiss.spv"))?,
            shadow_miss: read_spirv(&dir.join("shadow.rmiss.spv"))?,
            default_hit_groups: HitGroupPair {
                surface: load_hit_group(dir, "surface")?,
                shadow: load_hit_group(dir, "shadow")?,
            },
        })
    }
}

/// Load `<name>.rchit.spv` and, if present, `<name>.rahit.spv`.
pub fn load_hit_group(dir: &Path, name: &str) -> Result<HitGroupCode> {
    let any_hit_path = dir.join(format!("{name}.rahit.spv"));
    let any_hit = if any_hit_path.exists() {
        Some(read_spirv(&any_hit_path)?)
    } else {
        None
    };
    Ok(HitGroupCode {
        closest_hit: read_spirv(&dir.join(format!("{name}.rchit.spv")))?,
        any_hit,
    })
}

/// Read a SPIR-V binary, checking its magic number and alignment.
pub fn read_spirv(path: &Path) -> Result<Vec<u32>> {
    let mut file = File::open(path)
        .map_err(|e| GpuError::ShaderLoading(format!("{}: {e}", path.display())))?;
    ash::util::read_spv(&mut file)
        .map_err(|e| GpuError::ShaderLoading(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_names_the_file() {
        let err = ShaderLibrary::load("/nonexistent/prism-shaders").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("raster.vert.spv"), "{message}");
    }

    #[test]
    fn any_hit_is_optional() {
        let dir = std::env::temp_dir().join(format!("prism-shaders-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        // SPIR-V magic followed by one word.
        let words: [u32; 2] = [0x0723_0203, 0];
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        std::fs::write(dir.join("probe.rchit.spv"), &bytes).unwrap();

        let group = load_hit_group(&dir, "probe").unwrap();
        assert_eq!(group.closest_hit, words);
        assert!(group.any_hit.is_none());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
