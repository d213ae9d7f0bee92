// Copyright @yucwang 2026

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result, ResultExt};
use crate::core::host::{CallNode, CallableIndex, PluginHost};
use crate::core::plugin::{
    Camera, CameraData, Geometry, GeometryData, GeometryInstance, Integrator, IntegratorData, Light, LightSampler,
    LightSamplerData, LightTable, Material, MaterialCallTable, MaterialData, PluginRegistry, Sampler, SamplerData,
    RAY_TYPE_COUNT, RAY_TYPE_RADIANCE,
};
use crate::core::record::SbtRecord;
use crate::device::{Accel, Buffer, Instance, ProgramGroupHandle, TraversableHandle};
use crate::math::transform::Transform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Light,
    Geometry,
    Group,
}

impl NodeKind {
    fn parse(node: &Config) -> Result<NodeKind> {
        let attr = node.attribute("Type")?;
        match attr.as_string()?.as_str() {
            "Light" => Ok(NodeKind::Light),
            "Geometry" => Ok(NodeKind::Geometry),
            "Group" => Ok(NodeKind::Group),
            other => Err(attr.error(ConfigErrorKind::Invalid, format!("unknown node type `{}`", other))),
        }
    }
}

/// Named assets of one kind, kept in declaration order.
struct AssetLib<T> {
    kind: &'static str,
    entries: Vec<(String, T)>,
    by_name: HashMap<String, usize>,
}

impl<T> AssetLib<T> {
    fn new(kind: &'static str) -> Self {
        Self { kind, entries: Vec::new(), by_name: HashMap::new() }
    }

    fn check_free(&self, node: &Config, name: &str) -> Result<()> {
        if self.by_name.contains_key(name) {
            return Err(node.error(ConfigErrorKind::AlreadyDefined, format!("{} `{}`", self.kind, name)));
        }
        Ok(())
    }

    fn insert(&mut self, name: String, asset: T) {
        self.by_name.insert(name.clone(), self.entries.len());
        self.entries.push((name, asset));
    }

    fn lookup(&self, node: &Config, name: &str) -> Result<usize> {
        self.by_name.get(name).copied().ok_or_else(|| {
            node.error(ConfigErrorKind::NoSuchAsset, format!("no {} named `{}`", self.kind, name))
        })
    }

    fn get(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).map(|&i| &self.entries[i].1)
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, asset)| asset)
    }

    fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }
}

pub struct MaterialAsset {
    pub callable: CallableIndex,
    pub data: MaterialData,
    plugin: Box<dyn Material>,
}

pub struct LightAsset {
    pub callable: CallableIndex,
    pub group: ProgramGroupHandle,
    pub max_sample_dim: u32,
    plugin: Box<dyn Light>,
}

pub struct GeometryAsset {
    pub data: GeometryData,
    plugin: Box<dyn Geometry>,
}

/// One placed light: its accumulated transform and callable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightInstance {
    pub transform: Transform,
    pub callable: CallableIndex,
}

/// How the per-sample random dimensions are split.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SampleLayout {
    pub camera_dims: u32,
    pub bounce_dims: u32,
    /// Offset of the light sampler's dimensions inside a bounce.
    pub light_sample_dim: u32,
}

/// The resolved scene: every asset initialized, wired and placed.
pub struct Scene {
    tlas: Accel,
    instances: Vec<GeometryInstance>,
    light_matrices: Buffer,
    light_programs: Buffer,
    lights: Vec<LightInstance>,

    geometries: AssetLib<GeometryAsset>,
    light_lib: AssetLib<LightAsset>,
    materials: AssetLib<MaterialAsset>,

    integrator_data: IntegratorData,
    integrator_callable: CallableIndex,
    integrator: Box<dyn Integrator>,
    light_sampler_data: LightSamplerData,
    light_sampler_callable: CallableIndex,
    light_sampler: Box<dyn LightSampler>,
    sampler_data: SamplerData,
    sampler_callable: CallableIndex,
    sampler: Box<dyn Sampler>,
    camera_data: CameraData,
    camera: Box<dyn Camera>,

    layout: SampleLayout,
}

fn plugin_name(node: &Config, default: &str) -> Result<String> {
    node.get("Plugin", default.to_string())
}

/// A section that may be omitted from the document.
fn optional_section(config: &Config, name: &str) -> Result<Config> {
    if config.has_attr(name) {
        config.attribute(name)
    } else {
        Ok(Config::from_value(json!({})))
    }
}

fn library_entries(config: &Config, name: &str) -> Result<Vec<Config>> {
    if config.has_attr(name) {
        config.attribute(name)?.expand()
    } else {
        Ok(Vec::new())
    }
}

struct Placement {
    lights: Vec<LightInstance>,
    geometries: Vec<(Transform, GeometryInstance)>,
}

impl Scene {
    pub fn resolve(config: &Config, registry: &PluginRegistry, host: &mut PluginHost<'_>) -> Result<Scene> {
        let section = config.attribute("Camera")?;
        let mut camera = registry.instantiate::<dyn Camera>(&section.attribute("Plugin")?.as_string()?)?;
        let camera_data = camera.init(host, &section).context("initializing the camera")?;

        let section = optional_section(config, "Sampler")?;
        let mut sampler = registry.instantiate::<dyn Sampler>(&plugin_name(&section, "Independent")?)?;
        let sampler_data = sampler.init(host, &section).context("initializing the sampler")?;
        let sampler_callable = host.add_callable(sampler_data.callable, sampler_data.record.clone())?;

        let section = optional_section(config, "LightSampler")?;
        let mut light_sampler = registry.instantiate::<dyn LightSampler>(&plugin_name(&section, "Uniform")?)?;
        let light_sampler_data = light_sampler.init(host, &section).context("initializing the light sampler")?;

        let section = config.attribute("Integrator")?;
        let mut integrator = registry.instantiate::<dyn Integrator>(&section.attribute("Plugin")?.as_string()?)?;
        let integrator_data = integrator.init(host, &section).context("initializing the integrator")?;
        if integrator_data.miss.len() != RAY_TYPE_COUNT {
            return Err(section.error(ConfigErrorKind::Invalid,
                                     format!("integrator provides {} miss programs, expected {}",
                                             integrator_data.miss.len(), RAY_TYPE_COUNT)));
        }

        let mut materials = AssetLib::new("material");
        for node in library_entries(config, "MaterialLib")? {
            let name = node.attribute("Name")?.as_string()?;
            materials.check_free(&node, &name)?;
            let mut plugin = registry.instantiate::<dyn Material>(&node.attribute("Plugin")?.as_string()?)?;
            let data = plugin.init(host, &node).with_context(|| format!("initializing material `{}`", name))?;
            materials.insert(name, MaterialAsset { callable: 0, data, plugin });
        }

        let mut light_lib = AssetLib::new("light");
        for node in library_entries(config, "LightLib")? {
            let name = node.attribute("Name")?.as_string()?;
            light_lib.check_free(&node, &name)?;
            let mut plugin = registry.instantiate::<dyn Light>(&node.attribute("Plugin")?.as_string()?)?;
            let data = plugin.init(host, &node).with_context(|| format!("initializing light `{}`", name))?;
            let callable = host.add_callable(data.callable, data.record)?;
            light_lib.insert(name, LightAsset { callable, group: data.callable, max_sample_dim: data.max_sample_dim, plugin });
        }

        let mut geometries = AssetLib::new("geometry");
        for node in library_entries(config, "GeometryLib")? {
            let name = node.attribute("Name")?.as_string()?;
            geometries.check_free(&node, &name)?;
            let mut plugin = registry.instantiate::<dyn Geometry>(&node.attribute("Plugin")?.as_string()?)?;
            let data = plugin.init(host, &node).with_context(|| format!("initializing geometry `{}`", name))?;
            geometries.insert(name, GeometryAsset { data, plugin });
        }

        let material_dims = materials.iter().map(|m| m.data.max_sample_dim).max().unwrap_or(0);
        let light_dims = light_lib.iter().map(|l| l.max_sample_dim).max().unwrap_or(0);
        let geometry_dims = geometries.iter().map(|g| g.data.max_sample_dim).max().unwrap_or(0);
        let layout = SampleLayout {
            camera_dims: camera_data.max_sample_dim,
            bounce_dims: material_dims + light_sampler_data.max_sample_dim + light_dims + geometry_dims
                + integrator_data.max_sample_dim,
            light_sample_dim: material_dims,
        };

        // The light table is only known after placement; register a
        // placeholder so materials can address the sampler.
        let placeholder = light_sampler.pack_record(host, &LightTable { sampler: sampler_callable, ..Default::default() })?;
        let light_sampler_callable = host.add_callable(light_sampler_data.callable, placeholder)?;

        let table = MaterialCallTable {
            light_sampler: light_sampler_callable,
            sampler: sampler_callable,
            light_sample_dim: layout.light_sample_dim,
        };
        for (name, material) in materials.entries.iter_mut() {
            let record = material.plugin.pack_record(host, &table)
                .with_context(|| format!("packing material `{}`", name))?;
            material.callable = host.add_callable(material.data.callable, record)?;
        }
        let integrator_callable = host.add_callable(integrator_data.callable, integrator_data.record.clone())?;

        host.add_call_edge(CallNode::Program(camera_data.raygen), integrator_callable);
        host.add_call_edge(CallNode::Program(camera_data.raygen), sampler_callable);
        host.add_call_edge(CallNode::Callable(light_sampler_callable), sampler_callable);
        for material in materials.iter() {
            host.add_call_edge(CallNode::Callable(material.callable), light_sampler_callable);
            host.add_call_edge(CallNode::Callable(material.callable), sampler_callable);
        }
        for light in light_lib.iter() {
            host.add_call_edge(CallNode::Callable(light_sampler_callable), light.callable);
        }

        let mut placement = Placement { lights: Vec::new(), geometries: Vec::new() };
        if config.has_attr("Scene") {
            let nodes = config.attribute("Scene")?.expand()?;
            place(&nodes, Transform::default(), &materials, &light_lib, &mut geometries, host, &mut placement)?;
        }
        log::info!("scene: {} materials, {} lights placed, {} geometry instances",
                   materials.entries.len(), placement.lights.len(), placement.geometries.len());

        let matrices: Vec<[f32; 12]> = placement.lights.iter().map(|l| l.transform.to_rows()).collect();
        let programs: Vec<u32> = placement.lights.iter().map(|l| l.callable).collect();
        let light_matrices = host.upload(&matrices)?;
        let light_programs = host.upload(&programs)?;
        let light_table = LightTable {
            matrices: light_matrices.ptr(),
            programs: light_programs.ptr(),
            count: programs.len() as u32,
            sampler: sampler_callable,
        };
        let record = light_sampler.pack_record(host, &light_table)?;
        host.update_callable(light_sampler_callable, record)?;

        let descs: Vec<Instance> = placement.geometries.iter().enumerate().map(|(k, (transform, instance))| Instance {
            transform: transform.to_rows(),
            instance_id: k as u32,
            sbt_offset: (k * RAY_TYPE_COUNT) as u32,
            traversable: instance.accel.raw(),
        }).collect();
        let device = host.device();
        let tlas = {
            let instance_buffer = host.upload(&descs)?;
            let handle = device.build_instance_accel(instance_buffer.ptr(), descs.len() as u32)?;
            Accel::adopt(Arc::clone(device), handle)
        };

        Ok(Scene {
            tlas,
            instances: placement.geometries.into_iter().map(|(_, instance)| instance).collect(),
            light_matrices,
            light_programs,
            lights: placement.lights,
            geometries,
            light_lib,
            materials,
            integrator_data,
            integrator_callable,
            integrator,
            light_sampler_data,
            light_sampler_callable,
            light_sampler,
            sampler_data,
            sampler_callable,
            sampler,
            camera_data,
            camera,
            layout,
        })
    }

    pub fn traversable(&self) -> TraversableHandle {
        self.tlas.raw()
    }

    pub fn camera_mut(&mut self) -> &mut dyn Camera {
        self.camera.as_mut()
    }

    pub fn camera_data(&self) -> &CameraData {
        &self.camera_data
    }

    pub fn integrator_data(&self) -> &IntegratorData {
        &self.integrator_data
    }

    pub fn integrator_callable(&self) -> CallableIndex {
        self.integrator_callable
    }

    pub fn sampler_callable(&self) -> CallableIndex {
        self.sampler_callable
    }

    pub fn light_sampler_callable(&self) -> CallableIndex {
        self.light_sampler_callable
    }

    pub fn layout(&self) -> SampleLayout {
        self.layout
    }

    pub fn lights(&self) -> &[LightInstance] {
        &self.lights
    }

    /// Device arrays of light-to-world matrices and light callables.
    pub fn light_arrays(&self) -> (&Buffer, &Buffer) {
        (&self.light_matrices, &self.light_programs)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialAsset> {
        self.materials.get(name)
    }

    pub fn material_names(&self) -> Vec<&str> {
        self.materials.names()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn miss_records(&self) -> Vec<SbtRecord> {
        self.integrator_data.miss.iter().map(|m| m.record.clone()).collect()
    }

    /// `RAY_TYPE_COUNT` records per instance, in instance order.
    pub fn hit_records(&self) -> Vec<SbtRecord> {
        self.instances.iter().flat_map(|i| i.hit_records.iter().cloned()).collect()
    }

    /// Every program group that has to be linked into the pipeline.
    pub fn program_groups(&self) -> Vec<ProgramGroupHandle> {
        let mut groups = vec![
            self.camera_data.raygen,
            self.sampler_data.callable,
            self.light_sampler_data.callable,
            self.integrator_data.callable,
        ];
        groups.extend(self.integrator_data.miss.iter().map(|m| m.group));
        groups.extend(self.materials.iter().map(|m| m.data.callable));
        groups.extend(self.light_lib.iter().map(|l| l.group));
        for geometry in self.geometries.iter() {
            groups.extend(geometry.data.hit_groups);
        }
        groups.sort();
        groups.dedup();
        groups
    }
}

fn place(nodes: &[Config],
         parent: Transform,
         materials: &AssetLib<MaterialAsset>,
         lights: &AssetLib<LightAsset>,
         geometries: &mut AssetLib<GeometryAsset>,
         host: &mut PluginHost<'_>,
         placement: &mut Placement) -> Result<()> {
    for node in nodes {
        let world = parent * node.get_transform("Transform")?.to_transform();
        match NodeKind::parse(node)? {
            NodeKind::Light => {
                let name = node.attribute("Light")?.as_string()?;
                let light = &lights.entries[lights.lookup(node, &name)?].1;
                placement.lights.push(LightInstance { transform: world, callable: light.callable });
            }
            NodeKind::Geometry => {
                let geometry_name = node.attribute("Geometry")?.as_string()?;
                let material_name = node.attribute("Material")?.as_string()?;
                let material = &materials.entries[materials.lookup(node, &material_name)?].1;
                let index = geometries.lookup(node, &geometry_name)?;
                let geometry = &mut geometries.entries[index].1;
                let instance = geometry.plugin.instantiate(host, material.callable)
                    .with_context(|| format!("instancing geometry `{}` at {}", geometry_name, node.path()))?;
                host.add_call_edge(CallNode::Program(geometry.data.hit_groups[RAY_TYPE_RADIANCE as usize]),
                                   material.callable);
                placement.geometries.push((world, instance));
            }
            NodeKind::Group => {
                let children = node.attribute("Children")?.expand()?;
                place(&children, world, materials, lights, geometries, host, placement)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pipeline::{PipelineLayout, RenderPipeline};
    use crate::core::plugin::{CameraArgs, RAY_TYPE_OCCLUSION};
    use crate::device::software::RECORD_MAGIC;
    use crate::device::{
        DeviceContext, DevicePtr, KernelContext, KernelFragment, LaunchDims, ProgramEntry, ProgramGroupDesc,
        ProgramKind, SoftwareDevice, SBT_RECORD_HEADER_SIZE,
    };
    use crate::math::constants::{Float, Quaternionf, Vector3f};
    use crate::plugins::common::{vec3, LightSampleArgs};
    use bytemuck::{Pod, Zeroable};
    use serde_json::Value;

    fn document(scene: Value) -> Value {
        json!({
            "Camera": { "Plugin": "Perspective", "Origin": [0, 0, 3], "Target": [0, 0, 0], "Up": [0, 1, 0], "FOV": 45 },
            "Integrator": { "Plugin": "Path", "MaxDepth": 1, "Sample": 1 },
            "MaterialLib": [
                { "Name": "red", "Plugin": "Diffuse", "Reflectance": [0.8, 0.2, 0.2] },
                { "Name": "grey", "Plugin": "Diffuse" }
            ],
            "LightLib": [
                { "Name": "lamp", "Plugin": "Point", "Position": [0, 1, 0] },
                { "Name": "sun", "Plugin": "Directional", "Direction": [0, 0, -1] }
            ],
            "GeometryLib": [
                { "Name": "tri", "Plugin": "TriangleMesh",
                  "Vertices": [-1, -1, 0, 1, -1, 0, 0, 1, 0], "Indices": [0, 1, 2] }
            ],
            "Scene": scene
        })
    }

    fn with_scene<F: FnOnce(Result<Scene>)>(doc: Value, check: F) {
        let context = DeviceContext::new(Arc::new(SoftwareDevice::with_threads(1)));
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut host = PluginHost::new(&context, registry.library(), ".");
        check(Scene::resolve(&Config::from_value(doc), &registry, &mut host));
    }

    #[test]
    fn test_duplicate_material_is_rejected() {
        let mut doc = document(json!([]));
        doc["MaterialLib"][1]["Name"] = json!("red");
        with_scene(doc, |scene| {
            let err = scene.err().unwrap();
            assert_eq!(err.config_kind(), Some(ConfigErrorKind::AlreadyDefined));
            assert!(err.to_string().contains("already defined"));
            assert!(err.to_string().contains("Root/MaterialLib/[1]"));
        });
    }

    #[test]
    fn test_distinct_materials_are_retrievable() {
        with_scene(document(json!([])), |scene| {
            let scene = scene.unwrap();
            assert_eq!(scene.material_names(), vec!["red", "grey"]);
            let red = scene.material("red").unwrap().callable;
            let grey = scene.material("grey").unwrap().callable;
            assert_ne!(red, grey);
            assert!(scene.material("blue").is_none());
        });
    }

    #[test]
    fn test_names_are_scoped_per_kind() {
        let mut doc = document(json!([]));
        doc["LightLib"][0]["Name"] = json!("red");
        with_scene(doc, |scene| assert!(scene.is_ok()));
    }

    #[test]
    fn test_light_arrays_follow_depth_first_order() {
        let doc = document(json!([
            { "Type": "Light", "Light": "lamp" },
            { "Type": "Group", "Transform": { "Trans": [1, 0, 0] }, "Children": [
                { "Type": "Light", "Light": "sun" },
                { "Type": "Group", "Transform": { "Trans": [0, 2, 0] }, "Children": [
                    { "Type": "Light", "Light": "lamp" }
                ]}
            ]},
            { "Type": "Light", "Light": "sun" }
        ]));
        with_scene(doc, |scene| {
            let scene = scene.unwrap();
            let lights = scene.lights();
            assert_eq!(lights.len(), 4);
            let (matrices, programs) = scene.light_arrays();
            let matrices: Vec<[f32; 12]> = matrices.download().unwrap();
            let programs: Vec<u32> = programs.download().unwrap();
            assert_eq!(matrices.len(), programs.len());
            assert_eq!(programs, lights.iter().map(|l| l.callable).collect::<Vec<_>>());

            assert_eq!(programs[0], programs[2]);
            assert_eq!(programs[1], programs[3]);
            assert_ne!(programs[0], programs[1]);
            // Translations compose down the groups.
            assert_eq!((matrices[0][3], matrices[0][7]), (0.0, 0.0));
            assert_eq!((matrices[1][3], matrices[1][7]), (1.0, 0.0));
            assert_eq!((matrices[2][3], matrices[2][7]), (1.0, 2.0));
            assert_eq!((matrices[3][3], matrices[3][7]), (0.0, 0.0));
        });
    }

    #[test]
    fn test_geometry_instances_get_strided_hit_records() {
        let doc = document(json!([
            { "Type": "Geometry", "Geometry": "tri", "Material": "red" },
            { "Type": "Geometry", "Geometry": "tri", "Material": "grey", "Transform": { "Trans": [0, 0, -1] } }
        ]));
        with_scene(doc, |scene| {
            let scene = scene.unwrap();
            assert_eq!(scene.instance_count(), 2);
            assert_eq!(scene.hit_records().len(), 2 * RAY_TYPE_COUNT);
            assert_eq!(scene.miss_records().len(), RAY_TYPE_COUNT);
            assert_ne!(scene.traversable(), 0);
        });
    }

    #[test]
    fn test_unresolved_reference_names_the_node() {
        let doc = document(json!([{ "Type": "Geometry", "Geometry": "tri", "Material": "gold" }]));
        with_scene(doc, |scene| {
            let err = scene.err().unwrap();
            assert_eq!(err.config_kind(), Some(ConfigErrorKind::NoSuchAsset));
            assert!(err.to_string().contains("Root/Scene/[0]"));
        });

        let doc = document(json!([{ "Type": "Camera" }]));
        with_scene(doc, |scene| assert_eq!(scene.err().unwrap().config_kind(), Some(ConfigErrorKind::Invalid)));
    }

    #[test]
    fn test_integrator_makes_no_direct_calls() {
        let context = DeviceContext::new(Arc::new(SoftwareDevice::with_threads(1)));
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut host = PluginHost::new(&context, registry.library(), ".");
        let scene = Scene::resolve(&Config::from_value(document(json!([]))), &registry, &mut host).unwrap();

        let integrator = CallNode::Callable(scene.integrator_callable());
        assert!(host.call_edges().iter().all(|(from, _)| *from != integrator));
        assert!(host.call_edges().contains(&(CallNode::Callable(scene.light_sampler_callable()),
                                              scene.sampler_callable())));
    }

    fn word(bytes: &[u8], at: usize) -> u32 {
        u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
    }

    #[test]
    fn test_hit_records_sit_at_instance_offset_plus_ray_type() {
        let doc = document(json!([
            { "Type": "Geometry", "Geometry": "tri", "Material": "red" },
            { "Type": "Geometry", "Geometry": "tri", "Material": "grey", "Transform": { "Trans": [0, 0, -1] } }
        ]));
        let context = DeviceContext::new(Arc::new(SoftwareDevice::with_threads(1)));
        let registry = PluginRegistry::with_builtins().unwrap();
        let mut host = PluginHost::new(&context, registry.library(), ".");
        let mut scene = Scene::resolve(&Config::from_value(doc), &registry, &mut host).unwrap();
        let raygen = scene.camera_mut().set_args(&host, &CameraArgs { width: 1, height: 1 }).unwrap();
        let pipeline = RenderPipeline::assemble(&host, PipelineLayout::from_scene(&scene, raygen)).unwrap();

        let sbt = pipeline.sbt();
        let stride = sbt.hitgroup_stride as usize;
        assert_eq!(sbt.hitgroup_count as usize, 2 * RAY_TYPE_COUNT);
        let mut table = vec![0u8; stride * sbt.hitgroup_count as usize];
        host.device().copy_from_device(sbt.hitgroup_base, &mut table).unwrap();

        let groups = scene.geometries.get("tri").unwrap().data.hit_groups;
        assert_ne!(groups[0], groups[1]);
        let materials = [scene.material("red").unwrap().callable, scene.material("grey").unwrap().callable];
        for (instance, material) in materials.iter().enumerate() {
            let sbt_offset = instance * RAY_TYPE_COUNT;
            for ray_type in [RAY_TYPE_RADIANCE, RAY_TYPE_OCCLUSION] {
                let record = &table[(sbt_offset + ray_type as usize) * stride..][..stride];
                assert_eq!(word(record, 0), RECORD_MAGIC);
                assert_eq!(word(record, 4), groups[ray_type as usize].0);
                assert_eq!(word(record, 8), ProgramKind::HitGroup.code());
            }
            // Radiance payload: vertices, indices, then the material callable.
            let radiance = &table[sbt_offset * stride..];
            assert_eq!(word(radiance, SBT_RECORD_HEADER_SIZE + 16), *material);
        }
        assert_ne!(materials[0], materials[1]);
    }

    #[repr(C)]
    #[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
    struct LightQueryRecord {
        output: DevicePtr,
        light_sampler: u32,
        _pad: u32,
        position: [Float; 3],
        _pad1: u32,
    }

    fn query_light(ctx: &mut KernelContext<'_>, _args: &mut [u8]) {
        let record: LightQueryRecord = ctx.sbt_data();
        let mut query = LightSampleArgs { position: record.position, ..Default::default() };
        ctx.direct_call(record.light_sampler, bytemuck::bytes_of_mut(&mut query));
        ctx.write(record.output, &query);
    }

    /// Resolves `nodes` and runs one light-sampler query from `position`
    /// on the device.
    fn sample_light(nodes: Value, position: [Float; 3]) -> (Vec<[f32; 12]>, LightSampleArgs) {
        let context = DeviceContext::new(Arc::new(SoftwareDevice::with_threads(1)));
        let mut registry = PluginRegistry::with_builtins().unwrap();
        registry.library_mut().install(KernelFragment::new("test/Query.kernel")
            .export("__raygen__query", query_light, 64));
        let mut host = PluginHost::new(&context, registry.library(), ".");
        let scene = Scene::resolve(&Config::from_value(document(nodes)), &registry, &mut host).unwrap();

        let module = host.compile("__raygen__query", &["Query.kernel"], "test", &[], false).unwrap();
        let raygen = host.program_group(&ProgramGroupDesc::Raygen(
            ProgramEntry::new(module.raw(), "__raygen__query"))).unwrap();
        host.add_call_edge(CallNode::Program(raygen.raw()), scene.light_sampler_callable());
        let output = host.upload(&[LightSampleArgs::default()]).unwrap();
        let record = host.pack(raygen.raw(), &LightQueryRecord {
            output: output.ptr(),
            light_sampler: scene.light_sampler_callable(),
            position,
            ..Default::default()
        }).unwrap();

        let mut groups = scene.program_groups();
        groups.push(raygen.raw());
        let pipeline = RenderPipeline::assemble(&host, PipelineLayout {
            groups,
            raygen: record,
            miss: scene.miss_records(),
            hits: scene.hit_records(),
            max_trace_depth: 1,
        }).unwrap();
        host.device().launch(pipeline.raw(), 0, 0, pipeline.sbt(), LaunchDims { width: 1, height: 1, depth: 1 })
            .unwrap();

        let matrices: Vec<[f32; 12]> = scene.light_arrays().0.download().unwrap();
        let result: Vec<LightSampleArgs> = output.download().unwrap();
        (matrices, result[0])
    }

    fn assert_close(a: Vector3f, b: Vector3f) {
        assert!((a - b).norm() < 1e-4, "{:?} != {:?}", a, b);
    }

    #[test]
    fn test_directional_light_turns_with_its_group() {
        let half_pi = std::f32::consts::FRAC_PI_2;
        let (matrices, sample) = sample_light(json!([
            { "Type": "Group", "Transform": { "Rotate": [half_pi, 0, 0], "Scale": 2.0 }, "Children": [
                { "Type": "Light", "Light": "sun" }
            ]}
        ]), [0.0, 0.0, 0.0]);

        let parent = Transform::from_trs(Vector3f::zeros(), Quaternionf::from_euler_angles(half_pi, 0.0, 0.0),
                                         Vector3f::new(2.0, 2.0, 2.0));
        assert_eq!(matrices.len(), 1);
        for (got, want) in matrices[0].iter().zip(parent.to_rows().iter()) {
            assert!((got - want).abs() < 1e-5);
        }
        // Travels along -z locally, so the light sits at +z, turned onto -y.
        assert_close(vec3(sample.direction), Vector3f::new(0.0, -1.0, 0.0));
        assert!(sample.distance.is_infinite());
        assert_close(vec3(sample.radiance), Vector3f::new(1.0, 1.0, 1.0));
    }

    #[test]
    fn test_point_light_composes_parent_and_node_transforms() {
        let half_pi = std::f32::consts::FRAC_PI_2;
        let (matrices, sample) = sample_light(json!([
            { "Type": "Group", "Transform": { "Rotate": [half_pi, 0, 0], "Scale": 2.0 }, "Children": [
                { "Type": "Light", "Light": "lamp", "Transform": { "Trans": [0, 0, 1] } }
            ]}
        ]), [0.0, 0.0, 0.0]);

        let parent = Transform::from_trs(Vector3f::zeros(), Quaternionf::from_euler_angles(half_pi, 0.0, 0.0),
                                         Vector3f::new(2.0, 2.0, 2.0));
        let node = Transform::from_translation(Vector3f::new(0.0, 0.0, 1.0));
        for (got, want) in matrices[0].iter().zip((parent * node).to_rows().iter()) {
            assert!((got - want).abs() < 1e-5);
        }
        // Local position (0, 1, 0) lands at (0, -2, 2) in world space.
        let sqrt2 = std::f32::consts::SQRT_2;
        assert_close(vec3(sample.direction), Vector3f::new(0.0, -1.0, 1.0) / sqrt2);
        assert!((sample.distance - 2.0 * sqrt2).abs() < 1e-4);
        // Falloff is measured in light space: distance sqrt(2) there.
        assert_close(vec3(sample.radiance), Vector3f::new(0.5, 0.5, 0.5));
    }
}
