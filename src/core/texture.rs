// Copyright @yucwang 2026

use std::path::Path;

use exr::prelude::*;
use image::io::Reader as ImageReader;
use image::{ColorType, GenericImageView};

use crate::core::config::{Config, ConfigType};
use crate::core::error::{ConfigErrorKind, RenderError, Result};
use crate::device::{FilterMode, TextureDesc, WrapMode};
use crate::math::constants::Float;

fn srgb_to_linear(v: Float) -> Float {
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

/// Turns a texture node into a texture description with `channel`
/// components. Files are resolved against `scene_path`.
pub fn texture_desc(channel: usize, node: &Config, scene_path: &Path) -> Result<TextureDesc> {
    if !matches!(channel, 1 | 2 | 4) {
        return Err(node.error(ConfigErrorKind::Invalid,
                              format!("textures have 1, 2 or 4 channels, not {}", channel)));
    }
    match node.get_type()? {
        ConfigType::String => file_texture(channel, node, &node.as_string()?, FilterMode::Linear, WrapMode::Repeat, scene_path),
        ConfigType::Object => {
            let file = node.attribute("File")?.as_string()?;
            let filter = parse_mode(node, "Filter", FilterMode::Linear, FilterMode::parse)?;
            let wrap = parse_mode(node, "Wrap", WrapMode::Repeat, WrapMode::parse)?;
            file_texture(channel, node, &file, filter, wrap, scene_path)
        }
        ConfigType::Float | ConfigType::Unsigned => Ok(TextureDesc::constant(&vec![node.as_float()?; channel])),
        ConfigType::Array => {
            let mut values = node.expand()?
                .iter()
                .map(|c| c.as_float())
                .collect::<Result<Vec<_>>>()?;
            if values.len() == 3 && channel == 4 {
                values.push(1.0);
            }
            if values.len() != channel {
                return Err(node.error(ConfigErrorKind::ChannelMismatch,
                                      format!("{} values given for a {}-channel texture", values.len(), channel)));
            }
            Ok(TextureDesc::constant(&values))
        }
        ConfigType::Bool => Err(node.error(ConfigErrorKind::TypeMismatch, "expected a texture, found Bool")),
    }
}

fn parse_mode<T>(node: &Config, name: &str, default: T, parse: fn(&str) -> Option<T>) -> Result<T> {
    if !node.has_attr(name) {
        return Ok(default);
    }
    let attr = node.attribute(name)?;
    let text = attr.as_string()?;
    parse(&text).ok_or_else(|| attr.error(ConfigErrorKind::Invalid, format!("unknown mode `{}`", text)))
}

fn file_texture(channel: usize,
                node: &Config,
                file: &str,
                filter: FilterMode,
                wrap: WrapMode,
                scene_path: &Path) -> Result<TextureDesc> {
    let path = scene_path.join(file);
    let (width, height, channels, data) = if has_extension(&path, "exr") {
        read_exr(&path)?
    } else {
        read_image(&path)?
    };
    if channels != channel {
        return Err(node.error(ConfigErrorKind::ChannelMismatch,
                              format!("{} has {} channels, expected {}", path.display(), channels, channel)));
    }
    log::debug!("texture {} loaded: {}x{}x{}", path.display(), width, height, channels);
    Ok(TextureDesc { width, height, channels, data, filter, wrap })
}

fn has_extension(path: &Path, extension: &str) -> bool {
    path.extension().and_then(|e| e.to_str()).map_or(false, |e| e.eq_ignore_ascii_case(extension))
}

type Texels = (usize, usize, usize, Vec<Float>);

/// Decodes with the file's own channel layout. RGB widens to RGBA with
/// opaque alpha. 8-bit colour channels are sRGB encoded, alpha is linear.
fn read_image(path: &Path) -> Result<Texels> {
    let image = ImageReader::open(path)
        .map_err(|e| RenderError::io(path, e))?
        .decode()
        .map_err(|e| RenderError::Image(format!("failed to decode image {}: {}", path.display(), e)))?;

    let (width, height) = image.dimensions();
    let (channels, colour, mut data): (usize, usize, Vec<Float>) = match image.color().channel_count() {
        1 => (1, 1, image.to_luma32f().into_raw()),
        2 => (2, 1, image.to_luma_alpha32f().into_raw()),
        _ => (4, 3, image.to_rgba32f().into_raw()),
    };
    let srgb = matches!(image.color(), ColorType::L8 | ColorType::La8 | ColorType::Rgb8 | ColorType::Rgba8);
    if srgb {
        for texel in data.chunks_exact_mut(channels) {
            for c in &mut texel[..colour] {
                *c = srgb_to_linear(*c);
            }
        }
    }
    Ok((width as usize, height as usize, channels, data))
}

fn read_exr(path: &Path) -> Result<Texels> {
    let image = read()
        .no_deep_data()
        .largest_resolution_level()
        .rgba_channels(
            |resolution, _| {
                let (width, height) = (resolution.width(), resolution.height());
                (width, vec![0.0 as Float; width * height * 4])
            },
            |pixels: &mut (usize, Vec<Float>), position, (r, g, b, a): (f32, f32, f32, f32)| {
                let base = (position.y() * pixels.0 + position.x()) * 4;
                pixels.1[base..base + 4].copy_from_slice(&[r, g, b, a]);
            },
        )
        .first_valid_layer()
        .all_attributes()
        .from_file(path)
        .map_err(|e| RenderError::Image(format!("failed to read exr {}: {}", path.display(), e)))?;

    let size = image.layer_data.size;
    let (_, texels) = image.layer_data.channel_data.pixels;
    Ok((size.width(), size.height(), 4, texels))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(text: &str) -> Config {
        text.parse::<Config>().unwrap().attribute("Tex").unwrap()
    }

    #[test]
    fn test_inline_constants() {
        let here = Path::new(".");
        let scalar = texture_desc(2, &node(r#"{"Tex": 0.25}"#), here).unwrap();
        assert_eq!(scalar.data, vec![0.25, 0.25]);
        assert_eq!((scalar.filter, scalar.wrap), (FilterMode::Nearest, WrapMode::ClampToEdge));

        let rgb = texture_desc(4, &node(r#"{"Tex": [0.8, 0.2, 0.1]}"#), here).unwrap();
        assert_eq!(rgb.data, vec![0.8, 0.2, 0.1, 1.0]);
        assert!(rgb.is_consistent());

        let err = texture_desc(2, &node(r#"{"Tex": [0.8, 0.2, 0.1]}"#), here).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::ChannelMismatch));
        let err = texture_desc(3, &node(r#"{"Tex": 1.0}"#), here).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::Invalid));
    }

    #[test]
    fn test_file_channel_rules() {
        let dir = tempfile::tempdir().unwrap();
        let mut gray = image::GrayImage::new(2, 1);
        gray.put_pixel(1, 0, image::Luma([255]));
        gray.save(dir.path().join("mask.png")).unwrap();
        let mut rgba = image::RgbaImage::new(1, 1);
        rgba.put_pixel(0, 0, image::Rgba([255, 0, 0, 255]));
        rgba.save(dir.path().join("albedo.png")).unwrap();

        let mask = texture_desc(1, &node(r#"{"Tex": {"File": "mask.png", "Filter": "None", "Wrap": "Mirror"}}"#),
                                dir.path()).unwrap();
        assert_eq!((mask.width, mask.height, mask.channels), (2, 1, 1));
        assert_eq!(mask.data, vec![0.0, 1.0]);
        assert_eq!((mask.filter, mask.wrap), (FilterMode::None, WrapMode::Mirror));

        let albedo = texture_desc(4, &node(r#"{"Tex": "albedo.png"}"#), dir.path()).unwrap();
        assert_eq!(albedo.data.len(), 4);
        assert!((albedo.data[0] - 1.0).abs() < 1e-5 && albedo.data[1] == 0.0 && albedo.data[3] == 1.0);
        assert_eq!((albedo.filter, albedo.wrap), (FilterMode::Linear, WrapMode::Repeat));

        let err = texture_desc(4, &node(r#"{"Tex": "mask.png"}"#), dir.path()).unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::ChannelMismatch));
        let err = texture_desc(1, &node(r#"{"Tex": {"File": "mask.png", "Wrap": "Spiral"}}"#), dir.path()).unwrap_err();
        assert!(err.to_string().contains("Root/Tex/Wrap"));
        assert!(matches!(texture_desc(1, &node(r#"{"Tex": "missing.png"}"#), dir.path()),
                         Err(RenderError::Io { .. })));
    }

    #[test]
    fn test_8bit_layouts_decode_alike() {
        let dir = tempfile::tempdir().unwrap();
        let grey = 128u8;
        let expected = srgb_to_linear(grey as Float / 255.0);
        image::GrayImage::from_pixel(1, 1, image::Luma([grey])).save(dir.path().join("l.png")).unwrap();
        image::GrayAlphaImage::from_pixel(1, 1, image::LumaA([grey, grey]))
            .save(dir.path().join("la.png")).unwrap();
        image::RgbImage::from_pixel(1, 1, image::Rgb([grey; 3])).save(dir.path().join("rgb.png")).unwrap();
        image::RgbaImage::from_pixel(1, 1, image::Rgba([grey, grey, grey, 255]))
            .save(dir.path().join("rgba.png")).unwrap();

        let luma = texture_desc(1, &node(r#"{"Tex": "l.png"}"#), dir.path()).unwrap();
        assert!((luma.data[0] - expected).abs() < 1e-5);

        let luma_alpha = texture_desc(2, &node(r#"{"Tex": "la.png"}"#), dir.path()).unwrap();
        assert!((luma_alpha.data[0] - expected).abs() < 1e-5);
        assert!((luma_alpha.data[1] - grey as Float / 255.0).abs() < 1e-5);

        for file in ["rgb.png", "rgba.png"] {
            let text = format!(r#"{{"Tex": "{}"}}"#, file);
            let colour = texture_desc(4, &node(&text), dir.path()).unwrap();
            assert_eq!(colour.channels, 4);
            for c in &colour.data[..3] {
                assert!((c - expected).abs() < 1e-5);
            }
            assert_eq!(colour.data[3], 1.0);
        }
    }
}
