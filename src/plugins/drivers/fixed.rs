// Copyright @yucwang 2026

use std::path::{Path, PathBuf};

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result};
use crate::core::plugin::{Driver, DriverData, Factory, PluginDescriptor, PluginKind};
use crate::renderers::render_loop::{Launcher, RenderLoop, RenderReport};

/// Renders a fixed number of sample batches and writes one EXR.
#[derive(Default)]
pub struct Fixed {
    samples: u32,
    output: PathBuf,
}

impl Driver for Fixed {
    fn init(&mut self, config: &Config, scene_path: &Path) -> Result<DriverData> {
        let width = config.get("Width", 512u32)?;
        let height = config.get("Height", 512u32)?;
        if width == 0 || height == 0 {
            return Err(config.error(ConfigErrorKind::Invalid, format!("image extent {}x{} is empty", width, height)));
        }
        self.samples = config.get("Sample", 1u32)?;
        self.output = scene_path.join(config.get("Output", "output.exr".to_string())?);
        Ok(DriverData { width, height })
    }

    fn do_render(&mut self, launcher: &mut dyn Launcher) -> Result<RenderReport> {
        RenderLoop::new(launcher, self.samples, self.output.clone()).run()
    }
}

fn create() -> Box<dyn Driver> {
    Box::new(Fixed::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Fixed", PluginKind::Driver, Factory::Driver(create))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Flat(Vec<[f32; 4]>);

    impl Launcher for Flat {
        fn extent(&self) -> (u32, u32) {
            (2, 1)
        }

        fn clear(&mut self) -> Result<()> {
            self.0 = vec![[0.0; 4]; 2];
            Ok(())
        }

        fn launch(&mut self, _sample_index: u32) -> Result<()> {
            self.0.iter_mut().for_each(|px| *px = [0.5, 0.5, 0.5, 1.0]);
            Ok(())
        }

        fn read_accumulation(&mut self) -> Result<Vec<[f32; 4]>> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_init_reports_extent_and_render_writes_output() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::from_value(json!({ "Width": 2, "Height": 1, "Sample": 3, "Output": "frame.exr" }));
        let mut driver = Fixed::default();
        assert_eq!(driver.init(&config, dir.path()).unwrap(), DriverData { width: 2, height: 1 });

        let report = driver.do_render(&mut Flat(Vec::new())).unwrap();
        assert_eq!(report.samples, 3);
        assert_eq!(report.output, dir.path().join("frame.exr"));
        assert!(report.output.exists());
    }

    #[test]
    fn test_empty_extent_is_rejected() {
        let config = Config::from_value(json!({ "Width": 0 }));
        assert!(Fixed::default().init(&config, Path::new(".")).is_err());
    }
}
