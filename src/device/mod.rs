// Copyright @yucwang 2026

//! Device runtime contract.
//!
//! Everything above this module talks to the device only through
//! [`DeviceApi`]. The shipped backend is [`software::SoftwareDevice`], a CPU
//! implementation of an OptiX-style ray-tracing runtime.

pub mod accel;
pub mod bvh;
pub mod kernel;
pub mod launch;
pub mod memory;
pub mod resource;
pub mod software;
pub mod texture;

use crate::core::error::Result;
use crate::math::constants::Float;

pub use self::kernel::{KernelEntry, KernelFn, KernelFragment, KernelLibrary, LinkedModule};
pub use self::launch::{HitInfo, KernelContext, RayFlags, TraceRay};
pub use self::resource::{Accel, Buffer, DeviceContext, DeviceResource, Module, Pipeline, ProgramGroup, Texture};
pub use self::software::SoftwareDevice;
pub use self::texture::{FilterMode, TextureDesc, WrapMode};

/// Device address: allocation id in the upper 32 bits, byte offset below.
pub type DevicePtr = u64;
pub type TextureObject = u64;
pub type TraversableHandle = u64;

/// Bytes the device writes at the front of every SBT record.
pub const SBT_RECORD_HEADER_SIZE: usize = 32;
pub const SBT_RECORD_ALIGNMENT: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramGroupHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineHandle(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramKind {
    Raygen,
    Miss,
    HitGroup,
    DirectCallable,
    ContinuationCallable,
}

impl ProgramKind {
    /// Entry-name prefix a kernel must carry to be bound as this kind.
    pub fn entry_prefix(&self) -> &'static str {
        match self {
            ProgramKind::Raygen => "__raygen__",
            ProgramKind::Miss => "__miss__",
            ProgramKind::HitGroup => "__closesthit__",
            ProgramKind::DirectCallable => "__direct_callable__",
            ProgramKind::ContinuationCallable => "__continuation_callable__",
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            ProgramKind::Raygen => 1,
            ProgramKind::Miss => 2,
            ProgramKind::HitGroup => 3,
            ProgramKind::DirectCallable => 4,
            ProgramKind::ContinuationCallable => 5,
        }
    }

    pub fn from_code(code: u32) -> Option<ProgramKind> {
        match code {
            1 => Some(ProgramKind::Raygen),
            2 => Some(ProgramKind::Miss),
            3 => Some(ProgramKind::HitGroup),
            4 => Some(ProgramKind::DirectCallable),
            5 => Some(ProgramKind::ContinuationCallable),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramEntry {
    pub module: ModuleHandle,
    pub name: String,
}

impl ProgramEntry {
    pub fn new(module: ModuleHandle, name: impl Into<String>) -> Self {
        Self { module, name: name.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramGroupDesc {
    Raygen(ProgramEntry),
    Miss(ProgramEntry),
    /// A hit group without closest-hit program is valid for rays that never
    /// invoke one (occlusion rays).
    HitGroup { closest_hit: Option<ProgramEntry> },
    DirectCallable(ProgramEntry),
    ContinuationCallable(ProgramEntry),
}

impl ProgramGroupDesc {
    pub fn kind(&self) -> ProgramKind {
        match self {
            ProgramGroupDesc::Raygen(_) => ProgramKind::Raygen,
            ProgramGroupDesc::Miss(_) => ProgramKind::Miss,
            ProgramGroupDesc::HitGroup { .. } => ProgramKind::HitGroup,
            ProgramGroupDesc::DirectCallable(_) => ProgramKind::DirectCallable,
            ProgramGroupDesc::ContinuationCallable(_) => ProgramKind::ContinuationCallable,
        }
    }

    pub fn entry(&self) -> Option<&ProgramEntry> {
        match self {
            ProgramGroupDesc::Raygen(e)
            | ProgramGroupDesc::Miss(e)
            | ProgramGroupDesc::DirectCallable(e)
            | ProgramGroupDesc::ContinuationCallable(e) => Some(e),
            ProgramGroupDesc::HitGroup { closest_hit } => closest_hit.as_ref(),
        }
    }
}

/// Per-program stack requirements in bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StackSizes {
    pub css_rg: u32,
    pub css_ms: u32,
    pub css_ch: u32,
    pub css_ah: u32,
    pub css_is: u32,
    pub css_cc: u32,
    pub dss_dc: u32,
}

impl StackSizes {
    pub fn accumulate(&mut self, other: &StackSizes) {
        self.css_rg = self.css_rg.max(other.css_rg);
        self.css_ms = self.css_ms.max(other.css_ms);
        self.css_ch = self.css_ch.max(other.css_ch);
        self.css_ah = self.css_ah.max(other.css_ah);
        self.css_is = self.css_is.max(other.css_is);
        self.css_cc = self.css_cc.max(other.css_cc);
        self.dss_dc = self.dss_dc.max(other.dss_dc);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStackSize {
    pub direct_callable_from_traversal: u32,
    pub direct_callable_from_state: u32,
    pub continuation: u32,
    pub max_traversable_graph_depth: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineDesc {
    pub groups: Vec<ProgramGroupHandle>,
    pub max_trace_depth: u32,
    pub max_dc_depth: u32,
    pub max_cc_depth: u32,
    pub stack: PipelineStackSize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShaderBindingTable {
    pub raygen_record: DevicePtr,
    pub miss_base: DevicePtr,
    pub miss_stride: u32,
    pub miss_count: u32,
    pub hitgroup_base: DevicePtr,
    pub hitgroup_stride: u32,
    pub hitgroup_count: u32,
    pub callables_base: DevicePtr,
    pub callables_stride: u32,
    pub callables_count: u32,
}

/// Triangle build input. Vertices are packed `[f32; 3]`, indices packed
/// `[u32; 3]`, both already resident on the device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TriangleInput {
    pub vertices: DevicePtr,
    pub vertex_count: u32,
    pub indices: DevicePtr,
    pub triangle_count: u32,
}

/// Device-side instance layout of a top-level build input.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Instance {
    /// Object-to-world, row-major 3x4.
    pub transform: [Float; 12],
    pub instance_id: u32,
    pub sbt_offset: u32,
    pub traversable: TraversableHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaunchDims {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

pub trait DeviceApi: Send + Sync {
    fn name(&self) -> &str;

    fn alloc(&self, size: usize) -> Result<DevicePtr>;
    fn free(&self, ptr: DevicePtr) -> Result<()>;
    fn copy_to_device(&self, dst: DevicePtr, data: &[u8]) -> Result<()>;
    /// Queued on the stream; visible after the next synchronizing call.
    fn copy_to_device_async(&self, dst: DevicePtr, data: &[u8]) -> Result<()>;
    fn copy_from_device(&self, src: DevicePtr, dst: &mut [u8]) -> Result<()>;
    fn memset(&self, dst: DevicePtr, value: u8, len: usize) -> Result<()>;
    fn synchronize(&self) -> Result<()>;

    fn create_module(&self, module: LinkedModule) -> Result<ModuleHandle>;
    fn destroy_module(&self, module: ModuleHandle) -> Result<()>;
    fn create_program_group(&self, desc: &ProgramGroupDesc) -> Result<ProgramGroupHandle>;
    fn destroy_program_group(&self, group: ProgramGroupHandle) -> Result<()>;
    fn program_group_kind(&self, group: ProgramGroupHandle) -> Result<ProgramKind>;
    fn program_stack_sizes(&self, group: ProgramGroupHandle) -> Result<StackSizes>;
    fn write_record_header(&self, group: ProgramGroupHandle, header: &mut [u8]) -> Result<()>;
    fn create_pipeline(&self, desc: &PipelineDesc) -> Result<PipelineHandle>;
    fn destroy_pipeline(&self, pipeline: PipelineHandle) -> Result<()>;

    fn create_texture(&self, desc: TextureDesc) -> Result<TextureObject>;
    fn destroy_texture(&self, texture: TextureObject) -> Result<()>;

    fn build_triangle_accel(&self, input: &TriangleInput) -> Result<TraversableHandle>;
    fn build_instance_accel(&self, instances: DevicePtr, count: u32) -> Result<TraversableHandle>;
    fn destroy_accel(&self, handle: TraversableHandle) -> Result<()>;

    fn launch(
        &self,
        pipeline: PipelineHandle,
        params: DevicePtr,
        params_size: usize,
        sbt: &ShaderBindingTable,
        dims: LaunchDims,
    ) -> Result<()>;

    /// Allocations plus every live object created through this device.
    fn live_resources(&self) -> usize;
    fn destroy_context(&self) -> Result<()>;
}
