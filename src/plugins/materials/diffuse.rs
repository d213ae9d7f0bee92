// Copyright @yucwang 2026

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::host::PluginHost;
use crate::core::plugin::{Factory, Material, MaterialCallTable, MaterialData, PluginDescriptor, PluginKind};
use crate::core::record::SbtRecord;
use crate::device::{
    KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc, Texture, TextureObject,
};
use crate::math::constants::{Vector3f, INV_PI};
use crate::math::frame::Frame;
use crate::plugins::common::{arr3, sample_1d, uninitialized, vec3, LightSampleArgs, ShadePayload, RAY_EPSILON};
use crate::plugins::runtime::COSINE_HEMISPHERE;

const FRAGMENT: &str = "Diffuse.kernel";
const BASE_PATH: &str = "materials";
const ENTRY: &str = "__direct_callable__diffuse";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct DiffuseRecord {
    reflectance: TextureObject,
    light_sampler: u32,
    sampler: u32,
    light_sample_dim: u32,
    _pad: u32,
}

/// Samples the cosine lobe for the next bounce and one light for direct
/// illumination.
fn eval(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let material: DiffuseRecord = ctx.sbt_data();
    let mut payload: ShadePayload = ctx.load(args);
    let texel = ctx.tex2d(material.reflectance, payload.uv[0], payload.uv[1]);
    let albedo = Vector3f::new(texel[0], texel[1], texel[2]);
    let normal = vec3(payload.normal);
    let frame = Frame::from_normal(normal);

    let mut warp = [
        sample_1d(ctx, material.sampler, payload.pixel, payload.sample, payload.dim),
        sample_1d(ctx, material.sampler, payload.pixel, payload.sample, payload.dim + 1),
        0.0,
    ];
    ctx.call_linked(COSINE_HEMISPHERE, bytemuck::cast_slice_mut(&mut warp));
    payload.next_dir = arr3(frame.from_local(vec3(warp)).normalize());
    // Cosine sampling cancels everything but the albedo.
    payload.weight = arr3(albedo);

    let position = vec3(payload.position);
    let mut light = LightSampleArgs {
        position: arr3(position + normal * RAY_EPSILON),
        pixel: payload.pixel,
        sample: payload.sample,
        dim: payload.dim + material.light_sample_dim,
        ..Default::default()
    };
    ctx.direct_call(material.light_sampler, bytemuck::bytes_of_mut(&mut light));
    let wi = vec3(light.direction);
    let cos_theta = normal.dot(&wi).max(0.0);
    payload.light_dir = light.direction;
    payload.light_dist = light.distance;
    payload.direct = arr3(albedo.component_mul(&vec3(light.radiance)) * (INV_PI * cos_theta));
    ctx.store(args, &payload);
}

/// Lambertian reflector with a 4-channel `Reflectance` texture.
#[derive(Default)]
pub struct Diffuse {
    callable: Option<ProgramGroup>,
    module: Option<Module>,
    reflectance: Option<Texture>,
}

impl Material for Diffuse {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<MaterialData> {
        let reflectance = if config.has_attr("Reflectance") {
            host.load_texture(4, &config.attribute("Reflectance")?)?
        } else {
            host.load_texture(4, &Config::from_value(serde_json::json!(0.5)))?
        };
        self.reflectance = Some(reflectance);

        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], true)?;
        let callable = host.program_group(&ProgramGroupDesc::DirectCallable(ProgramEntry::new(module.raw(), ENTRY)))?;
        let data = MaterialData { callable: callable.raw(), max_sample_dim: 2 };
        self.callable = Some(callable);
        self.module = Some(module);
        Ok(data)
    }

    fn pack_record(&self, host: &PluginHost<'_>, table: &MaterialCallTable) -> Result<SbtRecord> {
        let (Some(callable), Some(reflectance)) = (&self.callable, &self.reflectance) else {
            return Err(uninitialized("Diffuse"));
        };
        host.pack(callable.raw(), &DiffuseRecord {
            reflectance: reflectance.raw(),
            light_sampler: table.light_sampler,
            sampler: table.sampler,
            light_sample_dim: table.light_sample_dim,
            _pad: 0,
        })
    }
}

fn create() -> Box<dyn Material> {
    Box::new(Diffuse::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Diffuse", PluginKind::Material, Factory::Material(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT))
            .export(ENTRY, eval, 160)
            .import(COSINE_HEMISPHERE))
}
