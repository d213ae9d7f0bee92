// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result};
use crate::core::host::PluginHost;
use crate::core::plugin::{Factory, Light, LightData, PluginDescriptor, PluginKind};
use crate::device::{KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc};
use crate::math::constants::{Float, Vector3f};
use crate::plugins::common::{arr3, LightSampleArgs};

const FRAGMENT: &str = "Directional.kernel";
const BASE_PATH: &str = "lights";
const ENTRY: &str = "__direct_callable__directional";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct DirectionalRecord {
    /// Unit vector towards the light.
    to_light: [Float; 3],
    irradiance: [Float; 3],
}

fn sample(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let light: DirectionalRecord = ctx.sbt_data();
    let mut query: LightSampleArgs = ctx.load(args);
    query.direction = light.to_light;
    query.distance = Float::INFINITY;
    query.radiance = light.irradiance;
    ctx.store(args, &query);
}

/// Light arriving from one direction (`Direction` is the travel direction).
#[derive(Default)]
pub struct Directional {
    callable: Option<ProgramGroup>,
    module: Option<Module>,
}

impl Light for Directional {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<LightData> {
        let direction = config.get("Direction", Vector3f::new(0.0, 0.0, -1.0))?;
        let irradiance = config.get("Irradiance", Vector3f::new(1.0, 1.0, 1.0))?;
        if direction.norm() == 0.0 {
            return Err(config.error(ConfigErrorKind::Invalid, "Direction must not be zero"));
        }

        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], false)?;
        let callable = host.program_group(&ProgramGroupDesc::DirectCallable(ProgramEntry::new(module.raw(), ENTRY)))?;
        let record = host.pack(callable.raw(), &DirectionalRecord {
            to_light: arr3(-direction.normalize()),
            irradiance: arr3(irradiance),
        })?;
        let data = LightData { callable: callable.raw(), record, max_sample_dim: 0 };
        self.callable = Some(callable);
        self.module = Some(module);
        Ok(data)
    }
}

fn create() -> Box<dyn Light> {
    Box::new(Directional::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Directional", PluginKind::Light, Factory::Light(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT)).export(ENTRY, sample, 32))
}
