// Copyright @yucwang 2026

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};

use crate::core::config::Config;
use crate::core::error::{ConfigErrorKind, Result};
use crate::core::host::{CallableIndex, PluginHost};
use crate::core::plugin::{
    Factory, Geometry, GeometryData, GeometryInstance, PluginDescriptor, PluginKind, RAY_TYPE_COUNT,
};
use crate::device::{
    Accel, Buffer, DevicePtr, KernelContext, KernelFragment, Module, ProgramEntry, ProgramGroup, ProgramGroupDesc,
    TriangleInput,
};
use crate::io::obj_utils;
use crate::math::constants::Float;
use crate::plugins::common::{arr3, uninitialized, vec3, ShadePayload};

const FRAGMENT: &str = "TriangleMesh.kernel";
const BASE_PATH: &str = "geometries";
const ENTRY: &str = "__closesthit__mesh";

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
struct MeshHitRecord {
    vertices: DevicePtr,
    indices: DevicePtr,
    material: u32,
    _pad: u32,
}

fn closest_hit(ctx: &mut KernelContext<'_>, args: &mut [u8]) {
    let Some(hit) = ctx.hit() else {
        ctx.fault("closest hit program without a hit");
        return;
    };
    let mesh: MeshHitRecord = ctx.sbt_data();
    let [i0, i1, i2]: [u32; 3] = ctx.read(mesh.indices + hit.primitive as u64 * 12);
    let p0 = vec3(ctx.read(mesh.vertices + i0 as u64 * 12));
    let p1 = vec3(ctx.read(mesh.vertices + i1 as u64 * 12));
    let p2 = vec3(ctx.read(mesh.vertices + i2 as u64 * 12));

    let wo = -hit.ray.direction.normalize();
    let mut normal = hit.object_to_world.apply_normal((p1 - p0).cross(&(p2 - p0))).normalize();
    if normal.dot(&wo) < 0.0 {
        normal = -normal;
    }

    let mut payload: ShadePayload = ctx.load(args);
    payload.hit = 1;
    payload.position = arr3(hit.world_position());
    payload.normal = arr3(normal);
    payload.wo = arr3(wo);
    payload.uv = [hit.barycentrics.x, hit.barycentrics.y];
    ctx.store(args, &payload);
    ctx.direct_call(mesh.material, args);
}

/// Indexed triangle mesh given inline (`Vertices`, `Indices`) or as an
/// OBJ `File`.
#[derive(Default)]
pub struct TriangleMesh {
    hit_groups: Vec<ProgramGroup>,
    module: Option<Module>,
    vertices: Option<Buffer>,
    indices: Option<Buffer>,
    vertex_count: u32,
    triangle_count: u32,
}

fn inline_mesh(config: &Config) -> Result<(Vec<[f32; 3]>, Vec<[u32; 3]>)> {
    let vertices_node = config.attribute("Vertices")?;
    let flat = vertices_node.expand()?.iter().map(|c| c.as_float()).collect::<Result<Vec<Float>>>()?;
    if flat.len() % 3 != 0 {
        return Err(vertices_node.error(ConfigErrorKind::Invalid,
                                       format!("{} coordinates do not form whole vertices", flat.len())));
    }
    let vertices = flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect();

    let indices_node = config.attribute("Indices")?;
    let flat = indices_node.expand()?.iter().map(|c| c.as_uint()).collect::<Result<Vec<u32>>>()?;
    if flat.len() % 3 != 0 {
        return Err(indices_node.error(ConfigErrorKind::Invalid,
                                      format!("{} indices do not form whole triangles", flat.len())));
    }
    Ok((vertices, flat.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()))
}

impl Geometry for TriangleMesh {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<GeometryData> {
        let (vertices, indices) = if config.has_attr("File") {
            let file = config.attribute("File")?.as_string()?;
            let soup = obj_utils::triangles(&obj_utils::load_obj_from_file(host.scene_path().join(file))?);
            (soup.vertices, soup.indices)
        } else {
            inline_mesh(config)?
        };
        if indices.is_empty() {
            return Err(config.error(ConfigErrorKind::Invalid, "mesh has no triangles"));
        }
        if let Some(bad) = indices.iter().flatten().find(|&&i| i as usize >= vertices.len()) {
            return Err(config.error(ConfigErrorKind::Invalid,
                                    format!("index {} out of range for {} vertices", bad, vertices.len())));
        }
        log::debug!("{}: {} vertices, {} triangles", config.path(), vertices.len(), indices.len());

        self.vertex_count = vertices.len() as u32;
        self.triangle_count = indices.len() as u32;
        self.vertices = Some(host.upload(&vertices)?);
        self.indices = Some(host.upload(&indices)?);

        let module = host.compile(ENTRY, &[FRAGMENT], BASE_PATH, &[], false)?;
        let radiance = host.program_group(&ProgramGroupDesc::HitGroup {
            closest_hit: Some(ProgramEntry::new(module.raw(), ENTRY)),
        })?;
        // Occlusion rays never run closest hit.
        let occlusion = host.program_group(&ProgramGroupDesc::HitGroup { closest_hit: None })?;
        let data = GeometryData { hit_groups: [radiance.raw(), occlusion.raw()], max_sample_dim: 0 };
        self.hit_groups = vec![radiance, occlusion];
        self.module = Some(module);
        Ok(data)
    }

    fn instantiate(&mut self, host: &PluginHost<'_>, material: CallableIndex) -> Result<GeometryInstance> {
        let (Some(vertices), Some(indices)) = (&self.vertices, &self.indices) else {
            return Err(uninitialized("TriangleMesh"));
        };
        let device = host.device();
        let handle = device.build_triangle_accel(&TriangleInput {
            vertices: vertices.ptr(),
            vertex_count: self.vertex_count,
            indices: indices.ptr(),
            triangle_count: self.triangle_count,
        })?;
        let accel = Accel::adopt(Arc::clone(device), handle);

        let record = MeshHitRecord { vertices: vertices.ptr(), indices: indices.ptr(), material, _pad: 0 };
        let mut hit_records = Vec::with_capacity(RAY_TYPE_COUNT);
        hit_records.push(host.pack(self.hit_groups[0].raw(), &record)?);
        hit_records.push(host.pack_empty(self.hit_groups[1].raw())?);
        Ok(GeometryInstance { hit_records, accel })
    }
}

fn create() -> Box<dyn Geometry> {
    Box::new(TriangleMesh::default())
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("TriangleMesh", PluginKind::Geometry, Factory::Geometry(create))
        .with_fragment(KernelFragment::new(format!("{}/{}", BASE_PATH, FRAGMENT)).export(ENTRY, closest_hit, 128))
}
