// Copyright @yucwang 2026

//! One render invocation: document, device context, scene, pipeline and
//! the driver's sample loop.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::config::Config;
use crate::core::error::{Result, ResultExt};
use crate::core::host::PluginHost;
use crate::core::pipeline::{PipelineLayout, RenderPipeline};
use crate::core::plugin::{CameraArgs, Driver, PluginRegistry};
use crate::core::scene::Scene;
use crate::device::{Buffer, DeviceApi, DeviceContext, LaunchDims, SoftwareDevice};
use crate::plugins::common::LaunchParams;
use crate::renderers::render_loop::{Launcher, RenderReport};

/// Issues launches of an assembled pipeline and owns the accumulation
/// buffer.
pub struct DeviceLauncher<'a> {
    params_buffer: Buffer,
    accumulation: Buffer,
    device: &'a Arc<dyn DeviceApi>,
    pipeline: &'a RenderPipeline,
    params: LaunchParams,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a> DeviceLauncher<'a> {
    pub fn new(host: &PluginHost<'a>,
               scene: &Scene,
               pipeline: &'a RenderPipeline,
               width: u32,
               height: u32,
               cancel: Option<Arc<AtomicBool>>) -> Result<Self> {
        let device = host.device();
        let accumulation = Buffer::alloc(device, width as usize * height as usize * std::mem::size_of::<[f32; 4]>())?;
        let layout = scene.layout();
        let params = LaunchParams {
            accumulation: accumulation.ptr(),
            handle: scene.traversable(),
            width,
            height,
            sample_index: 0,
            paths_per_launch: scene.integrator_data().paths_per_launch,
            integrator: scene.integrator_callable(),
            sampler: scene.sampler_callable(),
            camera_dims: layout.camera_dims,
            bounce_dims: layout.bounce_dims,
        };
        let params_buffer = Buffer::from_slice(device, &[params])?;
        Ok(Self { params_buffer, accumulation, device, pipeline, params, cancel })
    }
}

impl<'a> Launcher for DeviceLauncher<'a> {
    fn extent(&self) -> (u32, u32) {
        (self.params.width, self.params.height)
    }

    fn clear(&mut self) -> Result<()> {
        self.accumulation.clear()
    }

    fn launch(&mut self, sample_index: u32) -> Result<()> {
        self.params.sample_index = sample_index;
        self.params_buffer.upload(&[self.params])?;
        let dims = LaunchDims { width: self.params.width, height: self.params.height, depth: 1 };
        self.device.launch(self.pipeline.raw(), self.params_buffer.ptr(), std::mem::size_of::<LaunchParams>(),
                           self.pipeline.sbt(), dims)
    }

    fn read_accumulation(&mut self) -> Result<Vec<[f32; 4]>> {
        self.accumulation.download()
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map_or(false, |flag| flag.load(Ordering::Relaxed))
    }
}

/// Renders `path` on a fresh software device.
pub fn render_scene(path: &Path) -> Result<RenderReport> {
    render_scene_with(path, Arc::new(SoftwareDevice::new()), None)
}

pub fn render_scene_with(path: &Path,
                         device: Arc<dyn DeviceApi>,
                         cancel: Option<Arc<AtomicBool>>) -> Result<RenderReport> {
    let registry = PluginRegistry::with_builtins()?;
    let config = Config::load(path, &registry).with_context(|| format!("loading scene {}", path.display()))?;
    let scene_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let debug = if config.has_attr("Core") { config.attribute("Core")?.get("Debug", false)? } else { false };

    let section = config.attribute("Driver")?;
    let mut driver = registry.instantiate::<dyn Driver>(&section.get("Plugin", "Fixed".to_string())?)?;
    let extent = driver.init(&section, &scene_dir).context("initializing the driver")?;

    let context = DeviceContext::new(device);
    let mut host = PluginHost::new(&context, registry.library(), scene_dir);
    let mut scene = Scene::resolve(&config, &registry, &mut host).context("resolving the scene graph")?;
    let raygen = scene.camera_mut()
        .set_args(&host, &CameraArgs { width: extent.width, height: extent.height })
        .context("packing the camera record")?;
    let pipeline = RenderPipeline::assemble(&host, PipelineLayout::from_scene(&scene, raygen))
        .context("assembling the pipeline")?;
    if debug {
        log::info!("sample layout {:?}, call depths {:?}, stack {:?}", scene.layout(), pipeline.depths(), pipeline.stack());
    }

    let mut launcher = DeviceLauncher::new(&host, &scene, &pipeline, extent.width, extent.height, cancel)?;
    let report = driver.do_render(&mut launcher)?;
    log::info!("wrote {} ({} of {} samples)", report.output.display(), report.samples, report.requested);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RenderError;
    use crate::io::exr_utils;
    use serde_json::{json, Value};
    use std::fs;

    fn document() -> Value {
        json!({
            "Core": { "Debug": true },
            "Camera": { "Plugin": "Perspective", "Origin": [0, 0, 3], "Target": [0, 0, 0], "Up": [0, 1, 0], "FOV": 45 },
            "Sampler": { "Plugin": "Independent", "Seed": 0 },
            "LightSampler": { "Plugin": "Uniform" },
            "MaterialLib": [ { "Name": "red", "Plugin": "Diffuse", "Reflectance": [0.8, 0.2, 0.2] } ],
            "LightLib": [ { "Name": "sun", "Plugin": "Directional", "Direction": [0, 0, -1], "Irradiance": [1, 1, 1] } ],
            "GeometryLib": [ { "Name": "tri", "Plugin": "TriangleMesh",
                               "Vertices": [-2, -2, 0, 2, -2, 0, 0, 2, 0], "Indices": [0, 1, 2] } ],
            "Integrator": { "Plugin": "Path", "MaxDepth": 1, "Sample": 4, "Background": [0, 0, 0] },
            "Driver": { "Plugin": "Fixed", "Sample": 4, "Width": 2, "Height": 2, "Output": "out.exr" },
            "Scene": [
                { "Type": "Light", "Light": "sun" },
                { "Type": "Geometry", "Geometry": "tri", "Material": "red", "Transform": { "Trans": [0, 0, 0] } }
            ]
        })
    }

    fn write_scene(dir: &Path, doc: &Value) -> std::path::PathBuf {
        let path = dir.join("scene.json");
        fs::write(&path, doc.to_string()).unwrap();
        path
    }

    #[test]
    fn test_end_to_end_writes_a_float_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scene(dir.path(), &document());
        let device = Arc::new(SoftwareDevice::with_threads(2));

        let report = render_scene_with(&path, device.clone(), None).unwrap();
        assert_eq!((report.width, report.height), (2, 2));
        assert_eq!((report.samples, report.requested), (4, 4));
        assert_eq!(report.non_finite_pixels, 0);
        assert!(!report.cancelled);
        assert_eq!(report.output, dir.path().join("out.exr"));

        let image = exr_utils::read_exr_from_file(&report.output).unwrap();
        assert_eq!((image.width(), image.height()), (2, 2));
        assert!(image.pixels().iter().all(|p| p.iter().all(|c| c.is_finite() && *c >= 0.0)));
        assert!(image.pixels().iter().any(|p| p.x > 0.0));

        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_cancelled_before_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_scene(dir.path(), &document());
        let cancel = Arc::new(AtomicBool::new(true));

        let report = render_scene_with(&path, Arc::new(SoftwareDevice::with_threads(1)), Some(cancel)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.samples, 0);
        let image = exr_utils::read_exr_from_file(&report.output).unwrap();
        assert!(image.pixels().iter().all(|p| p.x == 0.0));
    }

    #[test]
    fn test_unknown_plugin_aborts_with_chain() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = document();
        doc["Integrator"]["Plugin"] = json!("Bidirectional");
        let path = write_scene(dir.path(), &doc);
        let device = Arc::new(SoftwareDevice::with_threads(1));

        let err = render_scene_with(&path, device.clone(), None).unwrap_err();
        assert!(matches!(err.root(), RenderError::PluginNotFound { name, .. } if name == "Bidirectional"));
        assert!(err.report().starts_with("resolving the scene graph"));
        assert!(!dir.path().join("out.exr").exists());
        assert_eq!(device.live_resources(), 0);
    }
}
