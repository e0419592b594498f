//! Radiance HDR file I/O.

use image::codecs::hdr::HdrEncoder;
use image::{ImageReader, Rgb};
use log::{debug, warn};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

/// Decoded image as tightly packed RGBA f32 texels, row-major, top row first.
#[derive(Clone, Debug, PartialEq)]
pub struct HdrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<f32>,
}

impl HdrImage {
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        let i = ((y as usize * self.width as usize) + x as usize) * 4;
        [
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ]
    }
}

/// Decode an equirectangular panorama into RGBA f32.
pub fn decode_equirectangular(path: &Path) -> Result<HdrImage, String> {
    let image = ImageReader::open(path)
        .map_err(|e| format!("Failed to open {:?}: {}", path, e))?
        .with_guessed_format()
        .map_err(|e| format!("Failed to read {:?}: {}", path, e))?
        .decode()
        .map_err(|e| format!("Failed to decode {:?}: {}", path, e))?;

    let rgba = image.to_rgba32f();
    let (width, height) = rgba.dimensions();

    if width != height * 2 {
        warn!(
            "{:?} is {}x{}; equirectangular panoramas are usually 2:1",
            path, width, height
        );
    }
    debug!("Decoded {:?} ({}x{})", path, width, height);

    Ok(HdrImage {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Encode RGBA f32 texels as a Radiance HDR file. Alpha is dropped.
pub fn encode_hdr(path: &Path, width: u32, height: u32, rgba: &[f32]) -> Result<(), String> {
    let expected = width as usize * height as usize * 4;
    if rgba.len() != expected {
        return Err(format!(
            "Pixel data for {:?} has {} floats, expected {} for {}x{} RGBA",
            path,
            rgba.len(),
            expected,
            width,
            height
        ));
    }

    let rgb: Vec<Rgb<f32>> = rgba
        .chunks_exact(4)
        .map(|px| Rgb([px[0], px[1], px[2]]))
        .collect();

    let file = File::create(path).map_err(|e| format!("Failed to create {:?}: {}", path, e))?;

    HdrEncoder::new(BufWriter::new(file))
        .encode(&rgb, width as usize, height as usize)
        .map_err(|e| format!("Failed to encode {:?}: {}", path, e))
}
