//! Image decoding helpers

use std::io::Cursor;
use std::path::Path;

use image::DynamicImage;
use anyhow::{Context, Result};

/// Decode image from bytes (JPEG, PNG, etc.) with EXIF orientation applied
pub fn decode_image(data: &[u8]) -> Result<DynamicImage> {
    let image = image::load_from_memory(data).context("unsupported or corrupt image data")?;
    Ok(apply_exif_orientation(data, image))
}

/// Read and decode an image file
pub fn read_image(path: impl AsRef<Path>) -> Result<DynamicImage> {
    let path = path.as_ref();
    let data = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    decode_image(&data)
}

/// Camera images often carry an orientation tag instead of rotated pixels
fn apply_exif_orientation(data: &[u8], image: DynamicImage) -> DynamicImage {
    let orientation = exif::Reader::new()
        .read_from_container(&mut Cursor::new(data))
        .ok()
        .and_then(|exif_data| {
            exif_data
                .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
                .and_then(|field| field.value.get_uint(0))
        })
        .unwrap_or(1);

    // https://exiftool.org/TagNames/EXIF.html (Orientation)
    match orientation {
        2 => image.fliph(),
        3 => image.rotate180(),
        4 => image.flipv(),
        5 => image.rotate90().fliph(),
        6 => image.rotate90(),
        7 => image.rotate270().fliph(),
        8 => image.rotate270(),
        _ => image,
    }
}
