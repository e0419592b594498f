//! JSON description of an exported bake.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::camera::CubeFace;
use crate::readback::face_file_name;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CubeEntry {
    pub prefix: String,
    pub face_size: u32,
    pub levels: u32,
    /// Face files in layer order: +X, -X, +Y, -Y, +Z, -Z.
    pub faces: Vec<String>,
}

impl CubeEntry {
    pub fn new(prefix: &str, face_size: u32, levels: u32) -> Self {
        Self {
            prefix: prefix.to_string(),
            face_size,
            levels,
            faces: CubeFace::ALL
                .iter()
                .map(|&face| face_file_name(prefix, face))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BakeManifest {
    pub source: String,
    pub skybox: CubeEntry,
    pub irradiance: CubeEntry,
}

impl BakeManifest {
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string_pretty(self).map_err(|e| format!("Failed to serialize manifest: {}", e))
    }

    pub fn from_json(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| format!("Failed to parse manifest: {}", e))
    }

    pub fn write(&self, path: &Path) -> Result<(), String> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|e| format!("Failed to write {:?}: {}", path, e))
    }

    pub fn read(path: &Path) -> Result<Self, String> {
        let text =
            std::fs::read_to_string(path).map_err(|e| format!("Failed to read {:?}: {}", path, e))?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BakeManifest {
        BakeManifest {
            source: "studio.hdr".to_string(),
            skybox: CubeEntry::new("skybox", 512, 1),
            irradiance: CubeEntry::new("irradiance", 64, 1),
        }
    }

    #[test]
    fn entry_lists_faces_in_layer_order() {
        let entry = CubeEntry::new("sky", 16, 1);
        assert_eq!(entry.faces.len(), 6);
        assert_eq!(entry.faces[0], "sky_side_0.hdr");
        assert_eq!(entry.faces[5], "sky_side_5.hdr");
    }

    #[test]
    fn json_uses_field_names() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["source"], "studio.hdr");
        assert_eq!(value["skybox"]["face_size"], 512);
        assert_eq!(value["irradiance"]["faces"][2], "irradiance_side_2.hdr");
    }

    #[test]
    fn survives_a_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bake.json");
        let manifest = sample();
        manifest.write(&path).unwrap();
        assert_eq!(BakeManifest::read(&path).unwrap(), manifest);
    }

    #[test]
    fn malformed_json_is_an_error() {
        let err = BakeManifest::from_json("{\"source\": 3}").unwrap_err();
        assert!(err.starts_with("Failed to parse manifest"), "{}", err);
    }
}
