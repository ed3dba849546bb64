//! PNG export and image import
//!
//! Only PNG is written; any format the `image` crate decodes can be
//! imported.

use crate::error::{IoError, Result};
use image::ImageFormat;
use std::path::Path;
use strata_core::linked::{content_from_image, load_linked_image};
use strata_core::{Composition, EngineConfig, LayerId, PixelBuffer};
use tracing::info;

fn check_png(path: &Path) -> Result<()> {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    if extension != "png" {
        return Err(IoError::UnsupportedFormat(extension));
    }
    Ok(())
}

fn write_png(pixels: &PixelBuffer, path: &Path) -> Result<()> {
    check_png(path)?;
    pixels.image().save_with_format(path, ImageFormat::Png)?;
    Ok(())
}

/// Write the flattened image of a composition as PNG
pub fn export_png(composition: &mut Composition, path: &Path) -> Result<()> {
    let image = composition.composite_image()?;
    write_png(&image, path)?;
    info!(
        "Exported '{}' ({}x{}) to {}",
        composition.name(),
        image.width(),
        image.height(),
        path.display()
    );
    Ok(())
}

/// Write a single layer's image as PNG. Adjustment layers have no image of
/// their own and are refused.
pub fn export_layer_png(composition: &mut Composition, id: LayerId, path: &Path) -> Result<()> {
    let image = composition
        .layer_image(id)?
        .ok_or(strata_core::CoreError::WrongLayerKind {
            id,
            expected: "layer with an image",
        })?;
    write_png(&image, path)
}

/// Open an image file as a composition with one image layer
pub fn import_image(path: &Path, config: EngineConfig) -> Result<Composition> {
    let (pixels, _) = load_linked_image(path)?;
    let name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("Untitled");
    let composition = content_from_image(name, pixels, config)?;
    info!("Imported {}", path.display());
    Ok(composition)
}
