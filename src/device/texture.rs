// Copyright @yucwang 2026

use crate::math::constants::Float;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FilterMode {
    Linear,
    Nearest,
    /// Point sampling of the single level, no interpolation.
    None,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrapMode {
    Repeat,
    Mirror,
    ClampToBorder,
    ClampToEdge,
}

impl FilterMode {
    pub fn parse(name: &str) -> Option<FilterMode> {
        match name {
            "Linear" => Some(FilterMode::Linear),
            "Nearest" => Some(FilterMode::Nearest),
            "None" => Some(FilterMode::None),
            _ => None,
        }
    }
}

impl WrapMode {
    pub fn parse(name: &str) -> Option<WrapMode> {
        match name {
            "Repeat" => Some(WrapMode::Repeat),
            "Mirror" => Some(WrapMode::Mirror),
            "ClampToBorder" => Some(WrapMode::ClampToBorder),
            "ClampToEdge" => Some(WrapMode::ClampToEdge),
            _ => None,
        }
    }

    fn texel(&self, i: i64, n: i64) -> Option<usize> {
        let i = match self {
            WrapMode::Repeat => i.rem_euclid(n),
            WrapMode::Mirror => {
                let p = i.rem_euclid(2 * n);
                if p < n { p } else { 2 * n - 1 - p }
            }
            WrapMode::ClampToEdge => i.clamp(0, n - 1),
            WrapMode::ClampToBorder => {
                if i < 0 || i >= n {
                    return None;
                }
                i
            }
        };
        Some(i as usize)
    }
}

/// Host description of a 2D float texture, texels row-major with
/// `channels` interleaved components.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureDesc {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
    pub data: Vec<Float>,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureDesc {
    pub fn constant(values: &[Float]) -> Self {
        Self {
            width: 1,
            height: 1,
            channels: values.len(),
            data: values.to_vec(),
            filter: FilterMode::Nearest,
            wrap: WrapMode::ClampToEdge,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.width > 0
            && self.height > 0
            && (1..=4).contains(&self.channels)
            && self.data.len() == self.width * self.height * self.channels
    }
}

/// Device-resident sampled texture. Border colour is transparent black.
#[derive(Clone, Debug)]
pub struct DeviceTexture {
    desc: TextureDesc,
}

impl DeviceTexture {
    pub fn new(desc: TextureDesc) -> Self {
        Self { desc }
    }

    fn fetch(&self, x: i64, y: i64) -> [Float; 4] {
        let d = &self.desc;
        let (Some(x), Some(y)) = (d.wrap.texel(x, d.width as i64), d.wrap.texel(y, d.height as i64)) else {
            return [0.0; 4];
        };
        let base = (y * d.width + x) * d.channels;
        let mut out = [0.0, 0.0, 0.0, 1.0];
        out[..d.channels].copy_from_slice(&d.data[base..base + d.channels]);
        out
    }

    /// Samples at normalized coordinates. Missing channels read as zero,
    /// alpha as one. Non-finite coordinates read the border colour.
    pub fn sample(&self, u: Float, v: Float) -> [Float; 4] {
        let x = u * self.desc.width as Float;
        let y = v * self.desc.height as Float;
        if !x.is_finite() || !y.is_finite() {
            return [0.0; 4];
        }
        match self.desc.filter {
            FilterMode::Nearest | FilterMode::None => self.fetch(x.floor() as i64, y.floor() as i64),
            FilterMode::Linear => {
                let (x, y) = (x - 0.5, y - 0.5);
                let (x0, y0) = (x.floor(), y.floor());
                let (fx, fy) = (x - x0, y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let t00 = self.fetch(x0, y0);
                let (x1, y1) = (x0.saturating_add(1), y0.saturating_add(1));
                let t10 = self.fetch(x1, y0);
                let t01 = self.fetch(x0, y1);
                let t11 = self.fetch(x1, y1);
                let mut out = [0.0; 4];
                for c in 0..4 {
                    let top = t00[c] * (1.0 - fx) + t10[c] * fx;
                    let bottom = t01[c] * (1.0 - fx) + t11[c] * fx;
                    out[c] = top * (1.0 - fy) + bottom * fy;
                }
                out
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checker(filter: FilterMode, wrap: WrapMode) -> DeviceTexture {
        DeviceTexture::new(TextureDesc {
            width: 2,
            height: 1,
            channels: 1,
            data: vec![0.0, 1.0],
            filter,
            wrap,
        })
    }

    #[test]
    fn test_nearest_wrap_modes() {
        let repeat = checker(FilterMode::Nearest, WrapMode::Repeat);
        assert_eq!(repeat.sample(1.25, 0.5)[0], 0.0);
        assert_eq!(repeat.sample(-0.25, 0.5)[0], 1.0);

        let mirror = checker(FilterMode::None, WrapMode::Mirror);
        assert_eq!(mirror.sample(1.25, 0.5)[0], 1.0);

        let edge = checker(FilterMode::Nearest, WrapMode::ClampToEdge);
        assert_eq!(edge.sample(3.0, 0.5)[0], 1.0);

        let border = checker(FilterMode::Nearest, WrapMode::ClampToBorder);
        assert_eq!(border.sample(3.0, 0.5), [0.0; 4]);
        assert_eq!(border.sample(0.75, 0.5), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_linear_interpolates_between_texels() {
        let tex = checker(FilterMode::Linear, WrapMode::ClampToEdge);
        assert!((tex.sample(0.5, 0.5)[0] - 0.5).abs() < 1e-6);
        assert!((tex.sample(0.25, 0.5)[0]).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_coordinates_stay_in_range() {
        for filter in [FilterMode::Linear, FilterMode::Nearest] {
            let tex = checker(filter, WrapMode::Repeat);
            assert_eq!(tex.sample(Float::NAN, 0.5), [0.0; 4]);
            assert_eq!(tex.sample(0.5, Float::INFINITY), [0.0; 4]);
            assert_eq!(tex.sample(Float::MAX, 0.5), [0.0; 4]);

            let edge = checker(filter, WrapMode::ClampToEdge);
            assert_eq!(edge.sample(1e30, 0.5)[0], 1.0);
            assert_eq!(edge.sample(-1e30, 0.5)[0], 0.0);
        }
    }

    #[test]
    fn test_constant_desc() {
        let desc = TextureDesc::constant(&[0.2, 0.4, 0.6, 1.0]);
        assert!(desc.is_consistent());
        let tex = DeviceTexture::new(desc);
        assert_eq!(tex.sample(7.0, -3.0), [0.2, 0.4, 0.6, 1.0]);
    }
}
