// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result};
use crate::core::host::PluginHost;
use crate::core::plugin::{
    Factory, Integrator, IntegratorData, MissProgram, PluginDescriptor, PluginKind, RAY_TYPE_OCCLUSION,
    RAY_TYPE_RADIANCE,
};
use crate::device::{
    KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc, RayFlags, TraceRay,
};
use crate::math::constants::{Float, Vector3f};
use crate::plugins::common::{
    arr3, vec3, IntegratorArgs, LaunchParams, OcclusionPayload, ShadePayload, RAY_EPSILON,
};

const FRAGMENT: &str = "Path.kernel";
const BASE_PATH: &str = "integrators";
const ENTRY: &str = "__continuation_callable__path";
const MISS_RADIANCE: &str = "__miss__radiance";
const MISS_OCCLUSION: &str = "__miss__occlusion";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct PathRecord {
    max_depth: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct BackgroundRecord {
    radiance: [Float; 3],
}

/// Iterative path tracer with next-event estimation at every vertex.
fn integrate(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let params: LaunchParams = ctx.params();
    let path: PathRecord = ctx.sbt_data();
    let mut state: IntegratorArgs = ctx.load(args);

    let mut origin = vec3(state.origin);
    let mut direction = vec3(state.direction);
    let mut throughput = Vector3f::new(1.0, 1.0, 1.0);
    let mut radiance = Vector3f::zeros();
    for depth in 0..path.max_depth {
        let mut payload = ShadePayload {
            pixel: state.pixel,
            sample: state.sample,
            dim: params.camera_dims + depth * params.bounce_dims,
            ..Default::default()
        };
        let ray = TraceRay { origin, direction, tmin: 0.0, tmax: Float::INFINITY };
        ctx.trace(params.handle, &ray, RayFlags::NONE, RAY_TYPE_RADIANCE, RAY_TYPE_RADIANCE,
                  bytemuck::bytes_of_mut(&mut payload));
        if payload.hit == 0 {
            radiance += throughput.component_mul(&vec3(payload.emitted));
            break;
        }

        let normal = vec3(payload.normal);
        let position = vec3(payload.position) + normal * RAY_EPSILON;
        let direct = vec3(payload.direct);
        if direct.iter().any(|&c| c > 0.0) {
            let tmax = if payload.light_dist.is_finite() {
                payload.light_dist * (1.0 - RAY_EPSILON)
            } else {
                Float::INFINITY
            };
            let shadow = TraceRay { origin: position, direction: vec3(payload.light_dir), tmin: 0.0, tmax };
            let mut occlusion = OcclusionPayload { visible: 0 };
            ctx.trace(params.handle, &shadow, RayFlags::TERMINATE_ON_FIRST_HIT | RayFlags::DISABLE_CLOSEST_HIT,
                      RAY_TYPE_OCCLUSION, RAY_TYPE_OCCLUSION, bytemuck::bytes_of_mut(&mut occlusion));
            if occlusion.visible != 0 {
                radiance += throughput.component_mul(&direct);
            }
        }

        throughput = throughput.component_mul(&vec3(payload.weight));
        if throughput.iter().all(|&c| c <= 0.0) {
            break;
        }
        origin = position;
        direction = vec3(payload.next_dir);
    }

    state.radiance = arr3(radiance);
    ctx.store(args, &state);
}

fn miss_radiance(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let background: BackgroundRecord = ctx.sbt_data();
    let mut payload: ShadePayload = ctx.load(args);
    payload.hit = 0;
    payload.emitted = background.radiance;
    ctx.store(args, &payload);
}

fn miss_occlusion(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    ctx.store(args, &OcclusionPayload { visible: 1 });
}

/// `MaxDepth` bounces, `Sample` paths per pixel per launch and a constant
/// `Background`.
#[derive(Default)]
pub struct Path {
    groups: Vec<ProgramGroup>,
    modules: Vec<Module>,
}

impl Integrator for Path {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<IntegratorData> {
        let max_depth = config.get("MaxDepth", 1u32)?;
        let paths_per_launch = config.get("Sample", 1u32)?;
        let background = config.get("Background", Vector3f::zeros())?;
        if paths_per_launch == 0 {
            return Err(config.error(ConfigErrorKind::Invalid, "Sample must be at least 1"));
        }

        let mut compile = |entry: &str, desc: fn(ProgramEntry) -> ProgramGroupDesc| -> Result<ProgramGroup> {
            let module = host.compile(entry, &[FRAGMENT], BASE_PATH, &[], false)?;
            let group = host.program_group(&desc(ProgramEntry::new(module.raw(), entry)))?;
            self.modules.push(module);
            Ok(group)
        };
        let callable = compile(ENTRY, ProgramGroupDesc::ContinuationCallable)?;
        let radiance = compile(MISS_RADIANCE, ProgramGroupDesc::Miss)?;
        let occlusion = compile(MISS_OCCLUSION, ProgramGroupDesc::Miss)?;

        let data = IntegratorData {
            callable: callable.raw(),
            record: host.pack(callable.raw(), &PathRecord { max_depth })?,
            miss: vec![
                MissProgram {
                    group: radiance.raw(),
                    record: host.pack(radiance.raw(), &BackgroundRecord { radiance: arr3(background) })?,
                },
                MissProgram { group: occlusion.raw(), record: host.pack_empty(occlusion.raw())? },
            ],
            max_depth,
            max_trace_depth: 1,
            paths_per_launch,
            max_sample_dim: 0,
        };
        self.groups.extend([callable, radiance, occlusion]);
        Ok(data)
    }
}

fn create() -> Box<dyn Integrator> {
    Box::new(Path::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Path", PluginKind::Integrator, Factory::Integrator(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT))
            .export(ENTRY, integrate, 256)
            .export(MISS_RADIANCE, miss_radiance, 32)
            .export(MISS_OCCLUSION, miss_occlusion, 16))
}
