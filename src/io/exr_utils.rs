/* Copyright 2020 @TwoCookingMice */

use std::path::Path;

use exr::prelude::*;

use crate::core::error::{RenderError, Result};
use crate::math::bitmap::Bitmap;

// Write EXR Image to file
pub fn write_exr_to_file(image: &Bitmap, file_path: &Path) -> Result<()> {
    log::info!("Starting writing openexr images: {}.", file_path.display());

    let width = image.width();
    write_rgb_file(file_path, width, image.height(), |x, y| {
        let p = image.pixels()[y * width + x];
        (p.x, p.y, p.z)
    })
    .map_err(|e| RenderError::Image(format!("failed to write {}: {}", file_path.display(), e)))?;
    log::info!("EXR written to: {}.", file_path.display());
    Ok(())
}

// Read EXR Image from file
pub fn read_exr_from_file(file_path: &Path) -> Result<Bitmap> {
    let image = read_first_rgba_layer_from_file(
        file_path,
        |resolution, _| Bitmap::new(resolution.width(), resolution.height()),
        |bitmap: &mut Bitmap, position, (r, g, b, _a): (f32, f32, f32, f32)| {
            bitmap[(position.x(), position.y())] = crate::math::constants::Vector3f::new(r, g, b);
        },
    )
    .map_err(|e| RenderError::Image(format!("failed to read {}: {}", file_path.display(), e)))?;
    Ok(image.layer_data.channel_data.pixels)
}
