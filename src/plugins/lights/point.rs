// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::host::PluginHost;
use crate::core::plugin::{Factory, Light, LightData, PluginDescriptor, PluginKind};
use crate::device::{KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc};
use crate::math::constants::{Float, Vector3f};
use crate::plugins::common::{arr3, vec3, LightSampleArgs};

const FRAGMENT: &str = "Point.kernel";
const BASE_PATH: &str = "lights";
const ENTRY: &str = "__direct_callable__point";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct PointRecord {
    position: [Float; 3],
    intensity: [Float; 3],
}

fn sample(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let light: PointRecord = ctx.sbt_data();
    let mut query: LightSampleArgs = ctx.load(args);
    let offset = vec3(light.position) - vec3(query.position);
    let distance = offset.norm();
    if distance > 0.0 {
        query.direction = arr3(offset / distance);
        query.distance = distance;
        query.radiance = arr3(vec3(light.intensity) / (distance * distance));
    } else {
        query.radiance = [0.0; 3];
    }
    ctx.store(args, &query);
}

/// Isotropic point light. Falloff is measured in the light's own space.
#[derive(Default)]
pub struct Point {
    callable: Option<ProgramGroup>,
    module: Option<Module>,
}

impl Light for Point {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<LightData> {
        let position = config.get("Position", Vector3f::zeros())?;
        let intensity = config.get("Intensity", Vector3f::new(1.0, 1.0, 1.0))?;

        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], false)?;
        let callable = host.program_group(&ProgramGroupDesc::DirectCallable(ProgramEntry::new(module.raw(), ENTRY)))?;
        let record = host.pack(callable.raw(), &PointRecord { position: arr3(position), intensity: arr3(intensity) })?;
        let data = LightData { callable: callable.raw(), record, max_sample_dim: 0 };
        self.callable = Some(callable);
        self.module = Some(module);
        Ok(data)
    }
}

fn create() -> Box<dyn Light> {
    Box::new(Point::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Point", PluginKind::Light, Factory::Light(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT)).export(ENTRY, sample, 32))
}
