// Copyright @yucwang 2026

use std::collections::HashMap;
use std::ops::BitOr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use bytemuck::Pod;

use super::accel::{self, AccelStructure};
use super::kernel::{KernelEntry, LinkedModule};
use super::memory::DeviceMemory;
use super::texture::DeviceTexture;
use super::{DevicePtr, ProgramKind, TextureObject, TraversableHandle};
use crate::math::constants::{Float, Vector2f, Vector3f};
use crate::math::ray::Ray3f;
use crate::math::transform::Transform;

const BLOCK_SIZE: u32 = 16;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RayFlags(u32);

impl RayFlags {
    pub const NONE: RayFlags = RayFlags(0);
    pub const TERMINATE_ON_FIRST_HIT: RayFlags = RayFlags(1 << 2);
    pub const DISABLE_CLOSEST_HIT: RayFlags = RayFlags(1 << 3);

    pub fn contains(self, other: RayFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RayFlags {
    type Output = RayFlags;

    fn bitor(self, rhs: RayFlags) -> RayFlags {
        RayFlags(self.0 | rhs.0)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct TraceRay {
    pub origin: Vector3f,
    pub direction: Vector3f,
    pub tmin: Float,
    pub tmax: Float,
}

/// Hit attributes visible to closest-hit programs.
#[derive(Clone, Copy, Debug)]
pub struct HitInfo {
    pub t: Float,
    pub primitive: u32,
    pub instance: u32,
    pub instance_id: u32,
    pub barycentrics: Vector2f,
    pub object_to_world: Transform,
    pub ray: TraceRay,
}

impl HitInfo {
    pub fn world_position(&self) -> Vector3f {
        self.ray.origin + self.ray.direction * self.t
    }
}

#[derive(Clone)]
pub(crate) struct ResolvedProgram {
    pub kind: ProgramKind,
    pub entry: Option<KernelEntry>,
    pub module: Option<Arc<LinkedModule>>,
}

#[derive(Clone)]
pub(crate) struct SbtSlot {
    pub program: ResolvedProgram,
    pub data: DevicePtr,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct DepthLimits {
    pub trace: u32,
    pub direct_callable: u32,
    pub continuation_callable: u32,
}

/// Read-only view of the device for the duration of one launch.
pub(crate) struct LaunchState<'a> {
    pub memory: &'a DeviceMemory,
    pub accels: &'a HashMap<TraversableHandle, AccelStructure>,
    pub textures: &'a HashMap<TextureObject, DeviceTexture>,
    pub params: &'a [u8],
    pub raygen: SbtSlot,
    pub miss: Vec<SbtSlot>,
    pub hitgroups: Vec<SbtSlot>,
    pub callables: Vec<SbtSlot>,
    pub limits: DepthLimits,
    pub dims: [u32; 3],
}

/// Per-invocation device state handed to every kernel.
pub struct KernelContext<'a> {
    state: &'a LaunchState<'a>,
    index: [u32; 3],
    record: DevicePtr,
    module: Option<&'a LinkedModule>,
    hit: Option<HitInfo>,
    trace_depth: u32,
    dc_depth: u32,
    cc_depth: u32,
    writes: Vec<(DevicePtr, Vec<u8>)>,
    fault: Option<String>,
}

impl<'a> KernelContext<'a> {
    fn new(state: &'a LaunchState<'a>) -> Self {
        Self {
            state,
            index: [0; 3],
            record: 0,
            module: None,
            hit: None,
            trace_depth: 0,
            dc_depth: 0,
            cc_depth: 0,
            writes: Vec::new(),
            fault: None,
        }
    }

    pub fn launch_index(&self) -> [u32; 3] {
        self.index
    }

    pub fn launch_dims(&self) -> [u32; 3] {
        self.state.dims
    }

    pub fn fault(&mut self, message: impl Into<String>) {
        if self.fault.is_none() {
            self.fault = Some(message.into());
        }
    }

    pub fn is_faulted(&self) -> bool {
        self.fault.is_some()
    }

    pub fn params<T: Pod>(&mut self) -> T {
        let params = self.state.params;
        self.load(params)
    }

    /// Payload of the SBT record bound to the running program.
    pub fn sbt_data<T: Pod>(&mut self) -> T {
        self.read(self.record)
    }

    pub fn read<T: Pod>(&mut self, addr: DevicePtr) -> T {
        match self.state.memory.read(addr, std::mem::size_of::<T>()) {
            Ok(bytes) => bytemuck::pod_read_unaligned(bytes),
            Err(err) => {
                self.fault(err.to_string());
                T::zeroed()
            }
        }
    }

    /// Buffered until the launch completes.
    pub fn write<T: Pod>(&mut self, addr: DevicePtr, value: &T) {
        let bytes = bytemuck::bytes_of(value);
        if let Err(err) = self.state.memory.read(addr, bytes.len()) {
            self.fault(err.to_string());
            return;
        }
        self.writes.push((addr, bytes.to_vec()));
    }

    /// Decodes a value from argument or payload bytes.
    pub fn load<T: Pod>(&mut self, bytes: &[u8]) -> T {
        match bytes.get(..std::mem::size_of::<T>()) {
            Some(head) => bytemuck::pod_read_unaligned(head),
            None => {
                self.fault(format!("argument block of {} bytes is shorter than {}", bytes.len(), std::mem::size_of::<T>()));
                T::zeroed()
            }
        }
    }

    pub fn store<T: Pod>(&mut self, bytes: &mut [u8], value: &T) {
        let src = bytemuck::bytes_of(value);
        match bytes.get_mut(..src.len()) {
            Some(head) => head.copy_from_slice(src),
            None => self.fault(format!("argument block of {} bytes is shorter than {}", bytes.len(), src.len())),
        }
    }

    pub fn hit(&self) -> Option<HitInfo> {
        self.hit
    }

    pub fn tex2d(&mut self, texture: TextureObject, u: Float, v: Float) -> [Float; 4] {
        match self.state.textures.get(&texture) {
            Some(tex) => tex.sample(u, v),
            None => {
                self.fault(format!("texture object {} is not valid", texture));
                [0.0; 4]
            }
        }
    }

    fn invoke(&mut self, slot: &'a SbtSlot, args: &mut [u8]) {
        let Some(entry) = slot.program.entry else {
            return;
        };
        let saved_record = std::mem::replace(&mut self.record, slot.data);
        let saved_module = std::mem::replace(&mut self.module, slot.program.module.as_deref());
        (entry.func)(self, args);
        self.record = saved_record;
        self.module = saved_module;
    }

    /// Traces against `handle`. The hit record used is
    /// `instance.sbt_offset + ray_type`; misses run `miss[miss_index]`.
    pub fn trace(&mut self,
                 handle: TraversableHandle,
                 ray: &TraceRay,
                 flags: RayFlags,
                 ray_type: u32,
                 miss_index: u32,
                 payload: &mut [u8]) {
        if self.is_faulted() {
            return;
        }
        let state = self.state;
        if self.trace_depth >= state.limits.trace {
            self.fault(format!("stack overflow: trace depth exceeds {}", state.limits.trace));
            return;
        }

        let query = Ray3f::unnormalized(ray.origin, ray.direction, ray.tmin, ray.tmax);
        let hit = match accel::traverse(state.accels, handle, &query, flags.contains(RayFlags::TERMINATE_ON_FIRST_HIT)) {
            Ok(hit) => hit,
            Err(msg) => {
                self.fault(msg);
                return;
            }
        };

        self.trace_depth += 1;
        match hit {
            Some(hit) if !flags.contains(RayFlags::DISABLE_CLOSEST_HIT) => {
                let index = (hit.sbt_offset + ray_type) as usize;
                match state.hitgroups.get(index) {
                    Some(slot) => {
                        let info = HitInfo {
                            t: hit.t,
                            primitive: hit.primitive,
                            instance: hit.instance,
                            instance_id: hit.instance_id,
                            barycentrics: hit.barycentrics,
                            object_to_world: hit.object_to_world,
                            ray: *ray,
                        };
                        let saved_hit = self.hit.replace(info);
                        self.invoke(slot, payload);
                        self.hit = saved_hit;
                    }
                    None => self.fault(format!("hit group record {} out of range ({} records)",
                                               index, state.hitgroups.len())),
                }
            }
            Some(_) => {}
            None => match state.miss.get(miss_index as usize) {
                Some(slot) => self.invoke(slot, payload),
                None => self.fault(format!("miss record {} out of range ({} records)", miss_index, state.miss.len())),
            },
        }
        self.trace_depth -= 1;
    }

    fn callable(&mut self, index: u32, kind: ProgramKind) -> Option<&'a SbtSlot> {
        let state = self.state;
        match state.callables.get(index as usize) {
            Some(slot) if slot.program.kind == kind => Some(slot),
            Some(slot) => {
                self.fault(format!("callable {} is a {:?}, called as {:?}", index, slot.program.kind, kind));
                None
            }
            None => {
                self.fault(format!("callable {} out of range ({} records)", index, state.callables.len()));
                None
            }
        }
    }

    pub fn direct_call(&mut self, index: u32, args: &mut [u8]) {
        if self.is_faulted() {
            return;
        }
        let limit = self.state.limits.direct_callable;
        if self.dc_depth >= limit {
            self.fault(format!("stack overflow: direct callable depth exceeds {}", limit));
            return;
        }
        if let Some(slot) = self.callable(index, ProgramKind::DirectCallable) {
            self.dc_depth += 1;
            self.invoke(slot, args);
            self.dc_depth -= 1;
        }
    }

    pub fn continuation_call(&mut self, index: u32, args: &mut [u8]) {
        if self.is_faulted() {
            return;
        }
        let limit = self.state.limits.continuation_callable;
        if self.cc_depth >= limit {
            self.fault(format!("stack overflow: continuation callable depth exceeds {}", limit));
            return;
        }
        if let Some(slot) = self.callable(index, ProgramKind::ContinuationCallable) {
            // Direct-callable depth restarts inside a continuation.
            let saved_dc = std::mem::replace(&mut self.dc_depth, 0);
            self.cc_depth += 1;
            self.invoke(slot, args);
            self.cc_depth -= 1;
            self.dc_depth = saved_dc;
        }
    }

    /// Calls a symbol linked into the running program's module.
    pub fn call_linked(&mut self, symbol: &str, args: &mut [u8]) {
        if self.is_faulted() {
            return;
        }
        match self.module.and_then(|m| m.symbol(symbol)) {
            Some(entry) => (entry.func)(self, args),
            None => self.fault(format!("unresolved symbol `{}`", symbol)),
        }
    }
}

struct WorkerResult {
    blocks: Vec<(usize, Vec<(DevicePtr, Vec<u8>)>)>,
    fault: Option<(usize, String)>,
}

/// Runs the raygen program over the launch grid in parallel pixel blocks.
/// Returns the buffered writes in block order, or the first fault.
pub(crate) fn execute(state: &LaunchState<'_>, threads: usize) -> Result<Vec<(DevicePtr, Vec<u8>)>, String> {
    let [width, height, depth] = state.dims;
    let blocks_x = ((width + BLOCK_SIZE - 1) / BLOCK_SIZE) as usize;
    let blocks_y = ((height + BLOCK_SIZE - 1) / BLOCK_SIZE) as usize;
    let total_blocks = blocks_x * blocks_y;
    let next_block = AtomicUsize::new(0);

    let results: Vec<thread::Result<WorkerResult>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..threads.max(1)).map(|_| {
            let next_block = &next_block;
            scope.spawn(move || {
                let mut ctx = KernelContext::new(state);
                let mut blocks: Vec<(usize, Vec<(DevicePtr, Vec<u8>)>)> = Vec::new();
                let mut fault = None;
                'blocks: loop {
                    let block = next_block.fetch_add(1, Ordering::Relaxed);
                    if block >= total_blocks {
                        break;
                    }
                    let x0 = (block % blocks_x) as u32 * BLOCK_SIZE;
                    let y0 = (block / blocks_x) as u32 * BLOCK_SIZE;
                    for z in 0..depth {
                        for y in y0..(y0 + BLOCK_SIZE).min(height) {
                            for x in x0..(x0 + BLOCK_SIZE).min(width) {
                                ctx.index = [x, y, z];
                                ctx.invoke(&state.raygen, &mut []);
                                if let Some(msg) = ctx.fault.take() {
                                    fault = Some((block, format!("launch index ({}, {}, {}): {}", x, y, z, msg)));
                                    break 'blocks;
                                }
                            }
                        }
                    }
                    blocks.push((block, std::mem::take(&mut ctx.writes)));
                }
                WorkerResult { blocks, fault }
            })
        }).collect();
        handles.into_iter().map(|h| h.join()).collect()
    });

    let mut blocks = Vec::new();
    let mut first_fault: Option<(usize, String)> = None;
    for result in results {
        match result {
            Ok(worker) => {
                if let Some(f) = worker.fault {
                    if first_fault.as_ref().map_or(true, |cur| f.0 < cur.0) {
                        first_fault = Some(f);
                    }
                }
                blocks.extend(worker.blocks);
            }
            Err(_) => return Err("kernel panicked".to_string()),
        }
    }
    match first_fault {
        Some((_, msg)) => Err(msg),
        None => {
            blocks.sort_by_key(|b| b.0);
            Ok(blocks.into_iter().flat_map(|b| b.1).collect())
        }
    }
}

