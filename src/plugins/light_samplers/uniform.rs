// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::host::PluginHost;
use crate::core::plugin::{Factory, LightSampler, LightSamplerData, LightTable, PluginDescriptor, PluginKind};
use crate::core::record::SbtRecord;
use crate::device::{DevicePtr, KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc};
use crate::math::constants::Float;
use crate::math::transform::Transform;
use crate::plugins::common::{arr3, sample_1d, uninitialized, vec3, LightSampleArgs};

const FRAGMENT: &str = "Uniform.kernel";
const BASE_PATH: &str = "light_samplers";
const ENTRY: &str = "__direct_callable__uniform";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct UniformRecord {
    matrices: DevicePtr,
    programs: DevicePtr,
    count: u32,
    sampler: u32,
}

/// Picks one light with equal probability and forwards the query to it in
/// the light's own space.
fn sample(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let table: UniformRecord = ctx.sbt_data();
    let mut query: LightSampleArgs = ctx.load(args);
    if table.count == 0 {
        query.radiance = [0.0; 3];
        query.distance = 0.0;
        ctx.store(args, &query);
        return;
    }

    let u = sample_1d(ctx, table.sampler, query.pixel, query.sample, query.dim);
    let index = ((u * table.count as Float) as u32).min(table.count - 1);
    let rows: [Float; 12] = ctx.read(table.matrices + index as u64 * 48);
    let program: u32 = ctx.read(table.programs + index as u64 * 4);
    let to_world = Transform::from_rows(&rows);

    let world_position = vec3(query.position);
    let mut local = LightSampleArgs {
        position: arr3(to_world.inverse().apply_point(world_position)),
        dim: query.dim + 1,
        ..query
    };
    ctx.direct_call(program, bytemuck::bytes_of_mut(&mut local));

    let direction = to_world.apply_vector(vec3(local.direction));
    query.direction = arr3(direction.normalize());
    query.distance = if local.distance.is_finite() {
        let target = to_world.apply_point(vec3(local.position) + vec3(local.direction) * local.distance);
        (target - world_position).norm()
    } else {
        Float::INFINITY
    };
    query.radiance = arr3(vec3(local.radiance) * table.count as Float);
    ctx.store(args, &query);
}

#[derive(Default)]
pub struct Uniform {
    callable: Option<ProgramGroup>,
    module: Option<Module>,
}

impl LightSampler for Uniform {
    fn init(&mut self, host: &mut PluginHost<'_>, _config: &Config) -> Result<LightSamplerData> {
        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], false)?;
        let callable = host.program_group(&ProgramGroupDesc::DirectCallable(ProgramEntry::new(module.raw(), ENTRY)))?;
        let data = LightSamplerData { callable: callable.raw(), max_sample_dim: 1 };
        self.callable = Some(callable);
        self.module = Some(module);
        Ok(data)
    }

    fn pack_record(&self, host: &PluginHost<'_>, table: &LightTable) -> Result<SbtRecord> {
        let callable = self.callable.as_ref().ok_or_else(|| uninitialized("Uniform"))?;
        host.pack(callable.raw(), &UniformRecord {
            matrices: table.matrices,
            programs: table.programs,
            count: table.count,
            sampler: table.sampler,
        })
    }
}

fn create() -> Box<dyn LightSampler> {
    Box::new(Uniform::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Uniform", PluginKind::LightSampler, Factory::LightSampler(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT)).export(ENTRY, sample, 96))
}
