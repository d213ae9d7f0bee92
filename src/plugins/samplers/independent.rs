// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::host::PluginHost;
use crate::core::plugin::{Factory, PluginDescriptor, PluginKind, Sampler, SamplerData};
use crate::device::{KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc};
use crate::math::constants::Float;
use crate::plugins::common::SampleArgs;
use crate::plugins::runtime::PCG_HASH;

const FRAGMENT: &str = "Independent.kernel";
const BASE_PATH: &str = "samplers";
const ENTRY: &str = "__direct_callable__independent";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct IndependentRecord {
    seed: u32,
}

fn hash(ctx: &mut KernelContext<'_>, value: u32) -> u32 {
    let mut args = [value, 0u32];
    ctx.call_linked(PCG_HASH, bytemuck::cast_slice_mut(&mut args));
    args[1]
}

/// Uncorrelated uniform numbers hashed from (pixel, sample, dimension).
fn next(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let sampler: IndependentRecord = ctx.sbt_data();
    let mut query: SampleArgs = ctx.load(args);
    let h = hash(ctx, query.dim ^ sampler.seed);
    let h = hash(ctx, query.sample ^ h);
    let h = hash(ctx, query.pixel ^ h);
    // 24 mantissa bits keep the value strictly below one.
    query.value = (h >> 8) as Float / (1u32 << 24) as Float;
    ctx.store(args, &query);
}

#[derive(Default)]
pub struct Independent {
    callable: Option<ProgramGroup>,
    module: Option<Module>,
}

impl Sampler for Independent {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<SamplerData> {
        let seed = config.get("Seed", 0u32)?;
        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], true)?;
        let callable = host.program_group(&ProgramGroupDesc::DirectCallable(ProgramEntry::new(module.raw(), ENTRY)))?;
        let data = SamplerData {
            callable: callable.raw(),
            record: host.pack(callable.raw(), &IndependentRecord { seed })?,
            max_sample_dim: 0,
        };
        self.callable = Some(callable);
        self.module = Some(module);
        Ok(data)
    }
}

fn create() -> Box<dyn Sampler> {
    Box::new(Independent::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Independent", PluginKind::Sampler, Factory::Sampler(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT))
            .export(ENTRY, next, 48)
            .import(PCG_HASH))
}
