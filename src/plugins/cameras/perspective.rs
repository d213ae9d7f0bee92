// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result};
use crate::core::host::PluginHost;
use crate::core::plugin::{Camera, CameraArgs, CameraData, Factory, PluginDescriptor, PluginKind};
use crate::core::record::SbtRecord;
use crate::device::{KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc};
use crate::math::constants::{Float, Vector3f};
use crate::plugins::common::{arr3, sample_1d, uninitialized, vec3, IntegratorArgs, LaunchParams};

const FRAGMENT: &str = "Perspective.kernel";
const BASE_PATH: &str = "cameras";
const ENTRY: &str = "__raygen__perspective";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct PerspectiveRecord {
    origin: [Float; 3],
    tan_half_fov: Float,
    right: [Float; 3],
    aspect: Float,
    up: [Float; 3],
    _pad0: u32,
    forward: [Float; 3],
    _pad1: u32,
}

fn raygen(ctx: &mut KernelContext<'_>, _args: &mut [u8]) {
    let params: LaunchParams = ctx.params();
    let camera: PerspectiveRecord = ctx.sbt_data();
    let [x, y, _] = ctx.launch_index();
    let pixel = y * params.width + x;

    let (right, up, forward) = (vec3(camera.right), vec3(camera.up), vec3(camera.forward));
    let mut sum = Vector3f::zeros();
    for path in 0..params.paths_per_launch {
        let sample = params.sample_index * params.paths_per_launch + path;
        let jx = sample_1d(ctx, params.sampler, pixel, sample, 0);
        let jy = sample_1d(ctx, params.sampler, pixel, sample, 1);
        let sx = ((x as Float + jx) / params.width as Float) * 2.0 - 1.0;
        let sy = 1.0 - ((y as Float + jy) / params.height as Float) * 2.0;
        let dir = forward
            + right * (sx * camera.tan_half_fov * camera.aspect)
            + up * (sy * camera.tan_half_fov);

        let mut args = IntegratorArgs {
            origin: camera.origin,
            pixel,
            direction: arr3(dir.normalize()),
            sample,
            ..Default::default()
        };
        ctx.continuation_call(params.integrator, bytemuck::bytes_of_mut(&mut args));
        sum += vec3(args.radiance);
    }

    let addr = params.accumulation + pixel as u64 * 16;
    let mut accum: [Float; 4] = ctx.read(addr);
    accum[0] += sum.x;
    accum[1] += sum.y;
    accum[2] += sum.z;
    accum[3] += params.paths_per_launch as Float;
    ctx.write(addr, &accum);
}

/// Pinhole camera with a vertical field of view in degrees.
#[derive(Default)]
pub struct Perspective {
    record: PerspectiveRecord,
    raygen: Option<ProgramGroup>,
    module: Option<Module>,
}

impl Camera for Perspective {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<CameraData> {
        let origin = config.get("Origin", Vector3f::new(0.0, 0.0, 1.0))?;
        let target = config.get("Target", Vector3f::zeros())?;
        let up = config.get("Up", Vector3f::new(0.0, 1.0, 0.0))?;
        let fov = config.get("FOV", 45.0 as Float)?;
        if !(fov > 0.0 && fov < 180.0) {
            return Err(config.error(ConfigErrorKind::Invalid, format!("FOV {} is outside (0, 180)", fov)));
        }

        let forward = target - origin;
        let right = forward.cross(&up);
        if forward.norm() == 0.0 || right.norm() == 0.0 {
            return Err(config.error(ConfigErrorKind::Invalid, "Origin, Target and Up do not span a frame"));
        }
        let forward = forward.normalize();
        let right = right.normalize();
        let up = right.cross(&forward);
        self.record = PerspectiveRecord {
            origin: arr3(origin),
            tan_half_fov: (fov.to_radians() * 0.5).tan(),
            right: arr3(right),
            aspect: 1.0,
            up: arr3(up),
            forward: arr3(forward),
            ..Default::default()
        };

        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], false)?;
        let raygen = host.program_group(&ProgramGroupDesc::Raygen(ProgramEntry::new(module.raw(), ENTRY)))?;
        let data = CameraData { raygen: raygen.raw(), max_sample_dim: 2 };
        self.raygen = Some(raygen);
        self.module = Some(module);
        Ok(data)
    }

    fn set_args(&mut self, host: &PluginHost<'_>, args: &CameraArgs) -> Result<SbtRecord> {
        self.record.aspect = args.width as Float / args.height.max(1) as Float;
        let raygen = self.raygen.as_ref().ok_or_else(|| uninitialized("Perspective"))?;
        host.pack(raygen.raw(), &self.record)
    }
}

fn create() -> Box<dyn Camera> {
    Box::new(Perspective::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Perspective", PluginKind::Camera, Factory::Camera(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT)).export(ENTRY, raygen, 96))
}
