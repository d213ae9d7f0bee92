// Copyright @yucwang 2026

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread;

use super::accel::{AccelStructure, InstanceAccel, TriangleAccel};
use super::kernel::LinkedModule;
use super::launch::{self, DepthLimits, LaunchState, ResolvedProgram, SbtSlot};
use super::memory::DeviceMemory;
use super::texture::{DeviceTexture, TextureDesc};
use super::{
    DeviceApi, DevicePtr, Instance, LaunchDims, ModuleHandle, PipelineDesc, PipelineHandle, ProgramGroupDesc,
    ProgramGroupHandle, ProgramKind, ShaderBindingTable, StackSizes, TextureObject, TraversableHandle, TriangleInput,
    SBT_RECORD_ALIGNMENT, SBT_RECORD_HEADER_SIZE,
};
use crate::core::error::{DeviceErrorCode, RenderError, Result};
use crate::math::constants::Vector3f;

pub(crate) const RECORD_MAGIC: u32 = 0x5442_534c;
const MAX_TRACE_DEPTH: u32 = 31;

struct GroupRecord {
    program: ResolvedProgram,
    stack: StackSizes,
}

struct PipelineRecord {
    groups: HashSet<u32>,
    limits: DepthLimits,
}

#[derive(Default)]
struct Objects {
    next_id: u32,
    modules: HashMap<u32, Arc<LinkedModule>>,
    groups: HashMap<u32, GroupRecord>,
    pipelines: HashMap<u32, PipelineRecord>,
    textures: HashMap<TextureObject, DeviceTexture>,
    accels: HashMap<TraversableHandle, AccelStructure>,
}

impl Objects {
    fn next(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }

    fn count(&self) -> usize {
        self.modules.len() + self.groups.len() + self.pipelines.len() + self.textures.len() + self.accels.len()
    }
}

/// CPU implementation of the device runtime.
pub struct SoftwareDevice {
    memory: RwLock<DeviceMemory>,
    objects: Mutex<Objects>,
    stream: Mutex<Vec<(DevicePtr, Vec<u8>)>>,
    destroyed: AtomicBool,
    threads: usize,
}

fn invalid_handle(what: &str, id: impl std::fmt::Display) -> RenderError {
    RenderError::device(DeviceErrorCode::InvalidHandle, format!("{} {} is not valid", what, id))
}

fn invalid_value(message: impl Into<String>) -> RenderError {
    RenderError::device(DeviceErrorCode::InvalidValue, message)
}

fn poisoned() -> RenderError {
    RenderError::device(DeviceErrorCode::InvalidOperation, "device state lock poisoned")
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDevice {
    pub fn new() -> Self {
        let threads = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::with_threads(threads)
    }

    pub fn with_threads(threads: usize) -> Self {
        Self {
            memory: RwLock::new(DeviceMemory::new()),
            objects: Mutex::new(Objects::default()),
            stream: Mutex::new(Vec::new()),
            destroyed: AtomicBool::new(false),
            threads: threads.max(1),
        }
    }

    fn check_alive(&self) -> Result<()> {
        if self.destroyed.load(Ordering::Acquire) {
            return Err(RenderError::device(DeviceErrorCode::ContextDestroyed, "device context has been destroyed"));
        }
        Ok(())
    }

    fn objects(&self) -> Result<MutexGuard<'_, Objects>> {
        self.check_alive()?;
        self.objects.lock().map_err(|_| poisoned())
    }

    /// Applies queued asynchronous copies in submission order.
    fn flush(&self) -> Result<()> {
        let pending = {
            let mut stream = self.stream.lock().map_err(|_| poisoned())?;
            std::mem::take(&mut *stream)
        };
        if pending.is_empty() {
            return Ok(());
        }
        let mut memory = self.memory.write().map_err(|_| poisoned())?;
        for (dst, data) in pending {
            memory.write(dst, &data)?;
        }
        Ok(())
    }

    fn read_bytes(&self, src: DevicePtr, len: usize) -> Result<Vec<u8>> {
        self.flush()?;
        let memory = self.memory.read().map_err(|_| poisoned())?;
        Ok(memory.read(src, len)?.to_vec())
    }

    fn decode_record(memory: &DeviceMemory,
                     objects: &Objects,
                     pipeline: &PipelineRecord,
                     record: DevicePtr,
                     expected: &[ProgramKind]) -> Result<SbtSlot> {
        let header = memory.read(record, SBT_RECORD_HEADER_SIZE)?;
        let word = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        if word(0) != RECORD_MAGIC {
            return Err(invalid_value(format!("SBT record at {:#018x} has no valid header", record)));
        }
        let group_id = word(4);
        let group = objects.groups.get(&group_id).ok_or_else(|| invalid_handle("program group", group_id))?;
        if !pipeline.groups.contains(&group_id) {
            return Err(invalid_value(format!("SBT record at {:#018x} uses program group {} which is not linked into the pipeline",
                                             record, group_id)));
        }
        if !expected.contains(&group.program.kind) {
            return Err(invalid_value(format!("SBT record at {:#018x} holds a {:?} program, expected {:?}",
                                             record, group.program.kind, expected)));
        }
        Ok(SbtSlot { program: group.program.clone(), data: record + SBT_RECORD_HEADER_SIZE as u64 })
    }

    fn decode_table(memory: &DeviceMemory,
                    objects: &Objects,
                    pipeline: &PipelineRecord,
                    base: DevicePtr,
                    stride: u32,
                    count: u32,
                    expected: &[ProgramKind]) -> Result<Vec<SbtSlot>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if (stride as usize) < SBT_RECORD_HEADER_SIZE || stride as usize % SBT_RECORD_ALIGNMENT != 0 {
            return Err(invalid_value(format!("SBT stride {} must be a multiple of {} of at least {}",
                                             stride, SBT_RECORD_ALIGNMENT, SBT_RECORD_HEADER_SIZE)));
        }
        (0..count)
            .map(|i| Self::decode_record(memory, objects, pipeline, base + i as u64 * stride as u64, expected))
            .collect()
    }
}

impl DeviceApi for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn alloc(&self, size: usize) -> Result<DevicePtr> {
        self.check_alive()?;
        self.memory.write().map_err(|_| poisoned())?.alloc(size)
    }

    fn free(&self, ptr: DevicePtr) -> Result<()> {
        self.check_alive()?;
        self.flush()?;
        self.memory.write().map_err(|_| poisoned())?.free(ptr)
    }

    fn copy_to_device(&self, dst: DevicePtr, data: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.flush()?;
        self.memory.write().map_err(|_| poisoned())?.write(dst, data)
    }

    fn copy_to_device_async(&self, dst: DevicePtr, data: &[u8]) -> Result<()> {
        self.check_alive()?;
        self.stream.lock().map_err(|_| poisoned())?.push((dst, data.to_vec()));
        Ok(())
    }

    fn copy_from_device(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()> {
        self.check_alive()?;
        let bytes = self.read_bytes(src, dst.len())?;
        dst.copy_from_slice(&bytes);
        Ok(())
    }

    fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> Result<()> {
        self.check_alive()?;
        self.flush()?;
        self.memory.write().map_err(|_| poisoned())?.fill(dst, value, len)
    }

    fn synchronize(&self) -> Result<()> {
        self.check_alive()?;
        self.flush()
    }

    fn create_module(&self, module: LinkedModule) -> Result<ModuleHandle> {
        let mut objects = self.objects()?;
        let id = objects.next();
        log::debug!("module {} linked from [{}]", id, module.fragments().join(", "));
        objects.modules.insert(id, Arc::new(module));
        Ok(ModuleHandle(id))
    }

    fn destroy_module(&self, module: ModuleHandle) -> Result<()> {
        let mut objects = self.objects()?;
        objects.modules.remove(&module.0).map(|_| ()).ok_or_else(|| invalid_handle("module", module.0))
    }

    fn create_program_group(&self, desc: &ProgramGroupDesc) -> Result<ProgramGroupHandle> {
        let mut objects = self.objects()?;
        let kind = desc.kind();
        let (entry, module) = match desc.entry() {
            None => (None, None),
            Some(entry) => {
                let module = objects.modules.get(&entry.module.0)
                    .ok_or_else(|| invalid_handle("module", entry.module.0))?;
                if !entry.name.starts_with(kind.entry_prefix()) {
                    return Err(invalid_value(format!("entry `{}` of a {:?} group must start with `{}`",
                                                     entry.name, kind, kind.entry_prefix())));
                }
                let symbol = module.symbol(&entry.name)
                    .ok_or_else(|| invalid_value(format!("module {} has no entry `{}`", entry.module.0, entry.name)))?;
                (Some(*symbol), Some(Arc::clone(module)))
            }
        };

        let own = entry.map(|e| e.stack_size).unwrap_or(0);
        let mut stack = StackSizes::default();
        match kind {
            ProgramKind::Raygen => stack.css_rg = own,
            ProgramKind::Miss => stack.css_ms = own,
            ProgramKind::HitGroup => stack.css_ch = own,
            ProgramKind::DirectCallable => stack.dss_dc = own,
            ProgramKind::ContinuationCallable => stack.css_cc = own,
        }

        let id = objects.next();
        objects.groups.insert(id, GroupRecord { program: ResolvedProgram { kind, entry, module }, stack });
        Ok(ProgramGroupHandle(id))
    }

    fn destroy_program_group(&self, group: ProgramGroupHandle) -> Result<()> {
        let mut objects = self.objects()?;
        objects.groups.remove(&group.0).map(|_| ()).ok_or_else(|| invalid_handle("program group", group.0))
    }

    fn program_group_kind(&self, group: ProgramGroupHandle) -> Result<ProgramKind> {
        let objects = self.objects()?;
        objects.groups.get(&group.0).map(|g| g.program.kind).ok_or_else(|| invalid_handle("program group", group.0))
    }

    fn program_stack_sizes(&self, group: ProgramGroupHandle) -> Result<StackSizes> {
        let objects = self.objects()?;
        objects.groups.get(&group.0).map(|g| g.stack).ok_or_else(|| invalid_handle("program group", group.0))
    }

    fn write_record_header(&self, group: ProgramGroupHandle, header: &mut [u8]) -> Result<()> {
        if header.len() != SBT_RECORD_HEADER_SIZE {
            return Err(invalid_value(format!("record header must be {} bytes, got {}", SBT_RECORD_HEADER_SIZE, header.len())));
        }
        let objects = self.objects()?;
        let record = objects.groups.get(&group.0).ok_or_else(|| invalid_handle("program group", group.0))?;
        header.fill(0);
        header[0..4].copy_from_slice(&RECORD_MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&group.0.to_le_bytes());
        header[8..12].copy_from_slice(&record.program.kind.code().to_le_bytes());
        Ok(())
    }

    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineHandle> {
        let mut objects = self.objects()?;
        if let Some(missing) = desc.groups.iter().find(|g| !objects.groups.contains_key(&g.0)) {
            return Err(invalid_handle("program group", missing.0));
        }
        if desc.max_trace_depth > MAX_TRACE_DEPTH {
            return Err(invalid_value(format!("max trace depth {} exceeds {}", desc.max_trace_depth, MAX_TRACE_DEPTH)));
        }
        let limits = DepthLimits {
            trace: desc.max_trace_depth,
            direct_callable: desc.max_dc_depth,
            continuation_callable: desc.max_cc_depth,
        };
        let id = objects.next();
        log::debug!("pipeline {} with {} program groups, continuation stack {} bytes",
                    id, desc.groups.len(), desc.stack.continuation);
        objects.pipelines.insert(id, PipelineRecord { groups: desc.groups.iter().map(|g| g.0).collect(), limits });
        Ok(PipelineHandle(id))
    }

    fn destroy_pipeline(&self, pipeline: PipelineHandle) -> Result<()> {
        let mut objects = self.objects()?;
        objects.pipelines.remove(&pipeline.0).map(|_| ()).ok_or_else(|| invalid_handle("pipeline", pipeline.0))
    }

    fn create_texture(&self, desc: TextureDesc) -> Result<TextureObject> {
        if !desc.is_consistent() {
            return Err(invalid_value(format!("texture {}x{}x{} does not match its {} texels",
                                             desc.width, desc.height, desc.channels, desc.data.len())));
        }
        let mut objects = self.objects()?;
        let id = objects.next() as TextureObject;
        objects.textures.insert(id, DeviceTexture::new(desc));
        Ok(id)
    }

    fn destroy_texture(&self, texture: TextureObject) -> Result<()> {
        let mut objects = self.objects()?;
        objects.textures.remove(&texture).map(|_| ()).ok_or_else(|| invalid_handle("texture object", texture))
    }

    fn build_triangle_accel(&self, input: &TriangleInput) -> Result<TraversableHandle> {
        let vertex_bytes = self.read_bytes(input.vertices, input.vertex_count as usize * 12)?;
        let index_bytes = self.read_bytes(input.indices, input.triangle_count as usize * 12)?;
        let vertices: Vec<Vector3f> = bytemuck::pod_collect_to_vec::<u8, [f32; 3]>(&vertex_bytes)
            .into_iter()
            .map(|v| Vector3f::new(v[0], v[1], v[2]))
            .collect();
        let triangles = bytemuck::pod_collect_to_vec::<u8, [u32; 3]>(&index_bytes);
        let accel = TriangleAccel::build(vertices, triangles).map_err(invalid_value)?;

        let mut objects = self.objects()?;
        let handle = objects.next() as TraversableHandle;
        objects.accels.insert(handle, AccelStructure::Triangles(accel));
        Ok(handle)
    }

    fn build_instance_accel(&self, instances: DevicePtr, count: u32) -> Result<TraversableHandle> {
        let bytes = self.read_bytes(instances, count as usize * std::mem::size_of::<Instance>())?;
        let instances = bytemuck::pod_collect_to_vec::<u8, Instance>(&bytes);

        let mut objects = self.objects()?;
        let accel = InstanceAccel::build(instances, &objects.accels)
            .map_err(|msg| RenderError::device(DeviceErrorCode::InvalidHandle, msg))?;
        let handle = objects.next() as TraversableHandle;
        objects.accels.insert(handle, AccelStructure::Instances(accel));
        Ok(handle)
    }

    fn destroy_accel(&self, handle: TraversableHandle) -> Result<()> {
        let mut objects = self.objects()?;
        objects.accels.remove(&handle).map(|_| ()).ok_or_else(|| invalid_handle("traversable", handle))
    }

    fn launch(&self,
              pipeline: PipelineHandle,
              params: DevicePtr,
              params_size: usize,
              sbt: &ShaderBindingTable,
              dims: LaunchDims) -> Result<()> {
        self.check_alive()?;
        self.flush()?;

        let writes = {
            let objects = self.objects()?;
            let memory = self.memory.read().map_err(|_| poisoned())?;
            let record = objects.pipelines.get(&pipeline.0).ok_or_else(|| invalid_handle("pipeline", pipeline.0))?;

            let raygen = Self::decode_record(&memory, &objects, record, sbt.raygen_record, &[ProgramKind::Raygen])?;
            let miss = Self::decode_table(&memory, &objects, record, sbt.miss_base, sbt.miss_stride, sbt.miss_count,
                                          &[ProgramKind::Miss])?;
            let hitgroups = Self::decode_table(&memory, &objects, record, sbt.hitgroup_base, sbt.hitgroup_stride,
                                               sbt.hitgroup_count, &[ProgramKind::HitGroup])?;
            let callables = Self::decode_table(&memory, &objects, record, sbt.callables_base, sbt.callables_stride,
                                               sbt.callables_count,
                                               &[ProgramKind::DirectCallable, ProgramKind::ContinuationCallable])?;
            let params = if params_size == 0 { &[][..] } else { memory.read(params, params_size)? };

            let state = LaunchState {
                memory: &memory,
                accels: &objects.accels,
                textures: &objects.textures,
                params,
                raygen,
                miss,
                hitgroups,
                callables,
                limits: record.limits,
                dims: [dims.width, dims.height, dims.depth.max(1)],
            };
            launch::execute(&state, self.threads)
                .map_err(|msg| RenderError::device(DeviceErrorCode::LaunchFailure, msg))?
        };

        let mut memory = self.memory.write().map_err(|_| poisoned())?;
        for (addr, bytes) in writes {
            memory.write(addr, &bytes)?;
        }
        Ok(())
    }

    fn live_resources(&self) -> usize {
        let allocations = self.memory.read().map(|m| m.live_allocations()).unwrap_or(0);
        let objects = self.objects.lock().map(|o| o.count()).unwrap_or(0);
        allocations + objects
    }

    fn destroy_context(&self) -> Result<()> {
        self.check_alive()?;
        let live = self.live_resources();
        if live > 0 {
            log::warn!("destroying device context with {} live resources", live);
        }
        self.destroyed.store(true, Ordering::Release);
        Ok(())
    }
}
