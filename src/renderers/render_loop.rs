// Copyright @yucwang 2021

use std::path::PathBuf;

use indicatif::{ProgressBar, ProgressStyle};

use crate::core::error::{Result, ResultExt};
use crate::io::exr_utils;
use crate::math::bitmap::Bitmap;
use crate::math::constants::{Float, Vector3f};

/// Device side of a render: owns the accumulation buffer and issues
/// launches over the full extent.
pub trait Launcher {
    fn extent(&self) -> (u32, u32);
    fn clear(&mut self) -> Result<()>;
    fn launch(&mut self, sample_index: u32) -> Result<()>;
    /// RGBA per pixel, alpha holds the accumulated weight.
    fn read_accumulation(&mut self) -> Result<Vec<[f32; 4]>>;

    fn cancelled(&self) -> bool {
        false
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Allocated,
    Rendering(u32),
    Finalizing,
    Done,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RenderReport {
    pub width: u32,
    pub height: u32,
    /// Launches that completed.
    pub samples: u32,
    pub requested: u32,
    pub non_finite_pixels: usize,
    pub cancelled: bool,
    pub output: PathBuf,
}

/// Colour substituted for pixels whose estimate is not finite.
pub const NON_FINITE_SENTINEL: (Float, Float, Float) = (1.0, 0.0, 1.0);

/// Output of [`resolve_accumulation`].
pub struct Resolved {
    pub image: Bitmap,
    pub non_finite: usize,
    /// One summary line covering every replaced pixel, if any were replaced.
    pub warning: Option<String>,
}

/// Divides the accumulated radiance by its weight, replacing non-finite
/// estimates with [`NON_FINITE_SENTINEL`].
pub fn resolve_accumulation(accumulation: &[[f32; 4]], width: usize, height: usize) -> Resolved {
    let mut image = Bitmap::new(width, height);
    let mut non_finite = 0;
    for y in 0..height {
        for x in 0..width {
            let [r, g, b, weight] = accumulation.get(y * width + x).copied().unwrap_or_default();
            let color = if weight == 0.0 {
                Vector3f::zeros()
            } else {
                Vector3f::new(r, g, b) / weight
            };
            image[(x, y)] = if color.iter().all(|c| c.is_finite()) {
                color
            } else {
                non_finite += 1;
                Vector3f::new(NON_FINITE_SENTINEL.0, NON_FINITE_SENTINEL.1, NON_FINITE_SENTINEL.2)
            };
        }
    }
    let warning = (non_finite > 0)
        .then(|| format!("{} of {} pixels had a non-finite estimate", non_finite, width * height));
    Resolved { image, non_finite, warning }
}

pub struct RenderLoop<'a> {
    launcher: &'a mut dyn Launcher,
    samples: u32,
    output: PathBuf,
    state: RenderState,
}

impl<'a> RenderLoop<'a> {
    pub fn new(launcher: &'a mut dyn Launcher, samples: u32, output: PathBuf) -> Self {
        Self { launcher, samples, output, state: RenderState::Idle }
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn run(mut self) -> Result<RenderReport> {
        let (width, height) = self.launcher.extent();
        self.launcher.clear().context("clearing the accumulation buffer")?;
        self.state = RenderState::Allocated;
        log::info!("rendering {}x{} with {} samples", width, height, self.samples);

        let progress = ProgressBar::new(self.samples as u64);
        progress.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} samples")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let mut completed = 0;
        let mut cancelled = false;
        let step = (self.samples / 10).max(1);
        for sample in 0..self.samples {
            if self.launcher.cancelled() {
                log::warn!("render cancelled after {} of {} samples", completed, self.samples);
                cancelled = true;
                break;
            }
            self.state = RenderState::Rendering(sample);
            self.launcher.launch(sample).with_context(|| format!("launching sample {}", sample))?;
            completed += 1;
            progress.inc(1);
            if completed % step == 0 || completed == self.samples {
                log::info!("{}% ({}/{} samples)", completed * 100 / self.samples, completed, self.samples);
            }
        }
        progress.finish_and_clear();

        self.state = RenderState::Finalizing;
        let accumulation = self.launcher.read_accumulation().context("reading the accumulation buffer")?;
        let resolved = resolve_accumulation(&accumulation, width as usize, height as usize);
        if let Some(warning) = &resolved.warning {
            log::warn!("{}", warning);
        }
        exr_utils::write_exr_to_file(&resolved.image, &self.output)
            .with_context(|| format!("writing output {}", self.output.display()))?;
        self.state = RenderState::Done;

        Ok(RenderReport {
            width,
            height,
            samples: completed,
            requested: self.samples,
            non_finite_pixels: resolved.non_finite,
            cancelled,
            output: self.output,
        })
    }
}
