// Copyright @yucwang 2026

use std::collections::HashSet;
use std::sync::Arc;

use crate::core::error::{RenderError, Result};
use crate::core::host::{CallNode, CallableIndex, PluginHost};
use crate::core::record::SbtRecord;
use crate::core::scene::Scene;
use crate::device::{
    Buffer, Pipeline, PipelineDesc, PipelineHandle, PipelineStackSize, ProgramGroupHandle, ProgramKind,
    ShaderBindingTable, StackSizes, SBT_RECORD_ALIGNMENT,
};

/// TLAS over BLAS.
pub const MAX_TRAVERSABLE_GRAPH_DEPTH: u32 = 2;

const PIPELINE_ENTRY: &str = "pipeline";

fn link_error(diagnostic: impl Into<String>) -> RenderError {
    RenderError::Compilation { entry: PIPELINE_ENTRY.to_string(), fragments: Vec::new(), diagnostic: diagnostic.into() }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CallDepths {
    pub direct_callable: u32,
    pub continuation_callable: u32,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    Open,
    Done,
}

struct DepthWalk<'a> {
    kinds: &'a [ProgramKind],
    successors: Vec<Vec<CallableIndex>>,
    state: Vec<Option<Visit>>,
    // Longest DC chain and longest CC chain starting at each callable.
    dc: Vec<u32>,
    cc: Vec<u32>,
}

impl<'a> DepthWalk<'a> {
    fn visit(&mut self, node: usize) -> Result<()> {
        match self.state[node] {
            Some(Visit::Done) => return Ok(()),
            Some(Visit::Open) => return Err(link_error(format!("recursive callable chain through callable {}", node))),
            None => {}
        }
        self.state[node] = Some(Visit::Open);

        let successors = self.successors[node].clone();
        let (mut dc, mut cc) = (0, 0);
        for next in successors {
            let next = next as usize;
            self.visit(next)?;
            match self.kinds[next] {
                ProgramKind::DirectCallable => dc = dc.max(self.dc[next]),
                _ => cc = cc.max(self.cc[next]),
            }
        }
        match self.kinds[node] {
            ProgramKind::DirectCallable => {
                self.dc[node] = dc + 1;
                self.cc[node] = cc;
            }
            _ => {
                self.dc[node] = 0;
                self.cc[node] = cc + 1;
            }
        }
        self.state[node] = Some(Visit::Done);
        Ok(())
    }
}

/// Maximum direct-callable and continuation-callable nesting reachable
/// through `edges`. Direct-callable depth starts over inside a
/// continuation callable.
pub fn call_depths(kinds: &[ProgramKind], edges: &[(CallNode, CallableIndex)]) -> Result<CallDepths> {
    let mut successors = vec![Vec::new(); kinds.len()];
    for &(from, to) in edges {
        if to as usize >= kinds.len() {
            return Err(link_error(format!("call edge from {:?} to unregistered callable {}", from, to)));
        }
        if let CallNode::Callable(from) = from {
            let list = successors.get_mut(from as usize)
                .ok_or_else(|| link_error(format!("call edge from unregistered callable {}", from)))?;
            list.push(to);
        }
    }

    let mut walk = DepthWalk {
        kinds,
        successors,
        state: vec![None; kinds.len()],
        dc: vec![0; kinds.len()],
        cc: vec![0; kinds.len()],
    };
    for node in 0..kinds.len() {
        walk.visit(node)?;
    }
    Ok(CallDepths {
        direct_callable: walk.dc.iter().copied().max().unwrap_or(0),
        continuation_callable: walk.cc.iter().copied().max().unwrap_or(0),
    })
}

pub fn stack_size(sizes: &StackSizes, depths: CallDepths, max_trace_depth: u32) -> PipelineStackSize {
    let css_cc_tree = depths.continuation_callable * sizes.css_cc;
    let css_ch_or_ms = sizes.css_ch.max(sizes.css_ms) + css_cc_tree;
    let dss_dc = depths.direct_callable * sizes.dss_dc;
    let continuation = sizes.css_rg
        + css_cc_tree
        + (max_trace_depth.max(1) - 1) * css_ch_or_ms
        + max_trace_depth.min(1) * css_ch_or_ms.max(sizes.css_is + sizes.css_ah);

    PipelineStackSize {
        direct_callable_from_traversal: dss_dc,
        direct_callable_from_state: dss_dc,
        continuation,
        max_traversable_graph_depth: MAX_TRAVERSABLE_GRAPH_DEPTH,
    }
}

/// Packs records back to back at a common stride: the largest record
/// rounded up to the record alignment.
pub fn layout_table(records: &[SbtRecord]) -> (Vec<u8>, u32) {
    let largest = records.iter().map(|r| r.len()).max().unwrap_or(0);
    let stride = (largest + SBT_RECORD_ALIGNMENT - 1) / SBT_RECORD_ALIGNMENT * SBT_RECORD_ALIGNMENT;
    let mut table = vec![0u8; stride * records.len()];
    for (i, record) in records.iter().enumerate() {
        table[i * stride..i * stride + record.len()].copy_from_slice(record.bytes());
    }
    (table, stride as u32)
}

/// Everything the assembler links besides the callable table, which it
/// takes from the host.
pub struct PipelineLayout {
    pub groups: Vec<ProgramGroupHandle>,
    pub raygen: SbtRecord,
    pub miss: Vec<SbtRecord>,
    pub hits: Vec<SbtRecord>,
    pub max_trace_depth: u32,
}

impl PipelineLayout {
    pub fn from_scene(scene: &Scene, raygen: SbtRecord) -> Self {
        Self {
            groups: scene.program_groups(),
            raygen,
            miss: scene.miss_records(),
            hits: scene.hit_records(),
            max_trace_depth: scene.integrator_data().max_trace_depth,
        }
    }
}

pub struct RenderPipeline {
    callable_table: Buffer,
    hit_table: Buffer,
    miss_table: Buffer,
    raygen_table: Buffer,
    pipeline: Pipeline,
    sbt: ShaderBindingTable,
    depths: CallDepths,
    stack: PipelineStackSize,
}

impl RenderPipeline {
    pub fn assemble(host: &PluginHost<'_>, layout: PipelineLayout) -> Result<RenderPipeline> {
        let device = host.device();
        let linked: HashSet<ProgramGroupHandle> = layout.groups.iter().copied().collect();
        let callables: Vec<SbtRecord> = host.callables().iter().map(|c| c.record.clone()).collect();

        let tables: [(&str, &[SbtRecord], &[ProgramKind]); 4] = [
            ("raygen", std::slice::from_ref(&layout.raygen), &[ProgramKind::Raygen]),
            ("miss", &layout.miss, &[ProgramKind::Miss]),
            ("hit group", &layout.hits, &[ProgramKind::HitGroup]),
            ("callable", &callables, &[ProgramKind::DirectCallable, ProgramKind::ContinuationCallable]),
        ];
        for (table, records, expected) in tables.iter() {
            for (slot, record) in records.iter().enumerate() {
                let group = record.group();
                if !linked.contains(&group) {
                    return Err(link_error(format!("{} record {} uses program group {} which is not part of the pipeline",
                                                  table, slot, group.0)));
                }
                let kind = device.program_group_kind(group)?;
                if !expected.contains(&kind) {
                    return Err(link_error(format!("{} record {} holds a {:?} program", table, slot, kind)));
                }
            }
        }

        let kinds: Vec<ProgramKind> = host.callables().iter().map(|c| c.kind).collect();
        let depths = call_depths(&kinds, host.call_edges())?;
        let mut sizes = StackSizes::default();
        for group in layout.groups.iter() {
            sizes.accumulate(&device.program_stack_sizes(*group)?);
        }
        let stack = stack_size(&sizes, depths, layout.max_trace_depth);

        let handle: PipelineHandle = device.create_pipeline(&PipelineDesc {
            groups: layout.groups.clone(),
            max_trace_depth: layout.max_trace_depth,
            max_dc_depth: depths.direct_callable,
            max_cc_depth: depths.continuation_callable,
            stack,
        })?;
        let pipeline = Pipeline::adopt(Arc::clone(device), handle);

        let (raygen, _) = layout_table(std::slice::from_ref(&layout.raygen));
        let (miss, miss_stride) = layout_table(&layout.miss);
        let (hits, hit_stride) = layout_table(&layout.hits);
        let (calls, callable_stride) = layout_table(&callables);
        let raygen_table = host.upload(&raygen)?;
        let miss_table = host.upload(&miss)?;
        let hit_table = host.upload(&hits)?;
        let callable_table = host.upload(&calls)?;

        let sbt = ShaderBindingTable {
            raygen_record: raygen_table.ptr(),
            miss_base: miss_table.ptr(),
            miss_stride,
            miss_count: layout.miss.len() as u32,
            hitgroup_base: hit_table.ptr(),
            hitgroup_stride: hit_stride,
            hitgroup_count: layout.hits.len() as u32,
            callables_base: callable_table.ptr(),
            callables_stride: callable_stride,
            callables_count: callables.len() as u32,
        };
        log::info!("pipeline linked: {} program groups, {} callables, dc depth {}, cc depth {}, trace depth {}",
                   layout.groups.len(), callables.len(), depths.direct_callable, depths.continuation_callable,
                   layout.max_trace_depth);
        log::debug!("pipeline stack sizes: {:?}", stack);

        Ok(RenderPipeline { callable_table, hit_table, miss_table, raygen_table, pipeline, sbt, depths, stack })
    }

    pub fn raw(&self) -> PipelineHandle {
        self.pipeline.raw()
    }

    pub fn sbt(&self) -> &ShaderBindingTable {
        &self.sbt
    }

    pub fn depths(&self) -> CallDepths {
        self.depths
    }

    pub fn stack(&self) -> PipelineStackSize {
        self.stack
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{
        DeviceContext, KernelContext, KernelFragment, KernelLibrary, ProgramEntry, ProgramGroupDesc, SoftwareDevice,
    };

    use crate::device::ProgramKind::{ContinuationCallable as Cc, DirectCallable as Dc};

    fn noop(_ctx: &mut KernelContext<'_>, _args: &mut [u8]) {}

    #[test]
    fn test_depths_follow_the_call_graph() {
        // raygen -> integrator(CC); hit -> material -> light sampler -> light
        let kinds = [Dc, Cc, Dc, Dc, Dc];
        let edges = [
            (CallNode::Program(ProgramGroupHandle(1)), 1),
            (CallNode::Program(ProgramGroupHandle(1)), 0),
            (CallNode::Program(ProgramGroupHandle(2)), 2),
            (CallNode::Callable(2), 3),
            (CallNode::Callable(2), 0),
            (CallNode::Callable(3), 4),
            (CallNode::Callable(3), 0),
        ];
        let depths = call_depths(&kinds, &edges).unwrap();
        assert_eq!(depths, CallDepths { direct_callable: 3, continuation_callable: 1 });

        assert_eq!(call_depths(&[], &[]).unwrap(), CallDepths::default());
    }

    #[test]
    fn test_recursive_and_dangling_edges_fail_to_link() {
        let err = call_depths(&[Dc, Dc], &[(CallNode::Callable(0), 1), (CallNode::Callable(1), 0)]).unwrap_err();
        assert!(matches!(&err, RenderError::Compilation { diagnostic, .. } if diagnostic.contains("recursive")));

        let err = call_depths(&[Dc], &[(CallNode::Callable(0), 0)]).unwrap_err();
        assert!(err.to_string().contains("recursive"));

        let err = call_depths(&[Dc], &[(CallNode::Program(ProgramGroupHandle(3)), 4)]).unwrap_err();
        assert!(err.to_string().contains("unregistered callable 4"));
    }

    #[test]
    fn test_stack_size_formula() {
        let sizes = StackSizes { css_rg: 100, css_ms: 20, css_ch: 50, css_ah: 0, css_is: 0, css_cc: 30, dss_dc: 16 };
        let depths = CallDepths { direct_callable: 3, continuation_callable: 1 };

        let stack = stack_size(&sizes, depths, 1);
        // 100 + 30 + 0 + max(50 + 30, 0)
        assert_eq!(stack.continuation, 210);
        assert_eq!(stack.direct_callable_from_traversal, 48);
        assert_eq!(stack.direct_callable_from_state, 48);
        assert_eq!(stack.max_traversable_graph_depth, 2);

        assert_eq!(stack_size(&sizes, depths, 3).continuation, 370);
        assert_eq!(stack_size(&sizes, depths, 0).continuation, 130);
    }

    #[test]
    fn test_table_stride_rounds_largest_record() {
        let device = Arc::new(SoftwareDevice::with_threads(1));
        let context = DeviceContext::new(device);
        let mut library = KernelLibrary::new();
        library.install(KernelFragment::new("test/Miss.kernel").export("__miss__bg", noop, 8));
        let host = PluginHost::new(&context, &library, ".");
        let module = host.compile("__miss__bg", &["Miss.kernel"], "test", &[], false).unwrap();
        let group = host.program_group(&ProgramGroupDesc::Miss(ProgramEntry::new(module.raw(), "__miss__bg"))).unwrap();

        let small = host.pack(group.raw(), &[1u32; 2]).unwrap();
        let large = host.pack(group.raw(), &[2u32; 5]).unwrap();
        let (table, stride) = layout_table(&[small.clone(), large.clone()]);
        assert_eq!(stride, 64);
        assert_eq!(table.len(), 128);
        assert_eq!(&table[..small.len()], small.bytes());
        assert_eq!(&table[64..64 + large.len()], large.bytes());
        assert!(table[small.len()..64].iter().all(|&b| b == 0));

        assert_eq!(layout_table(&[]), (Vec::new(), 0));
    }

    #[test]
    fn test_foreign_program_group_is_rejected() {
        let context = DeviceContext::new(Arc::new(SoftwareDevice::with_threads(1)));
        let mut library = KernelLibrary::new();
        library.install(KernelFragment::new("test/Raygen.kernel")
            .export("__raygen__a", noop, 32)
            .export("__raygen__b", noop, 32));
        let host = PluginHost::new(&context, &library, ".");
        let module_a = host.compile("__raygen__a", &["Raygen.kernel"], "test", &[], false).unwrap();
        let module_b = host.compile("__raygen__b", &["Raygen.kernel"], "test", &[], false).unwrap();
        let a = host.program_group(&ProgramGroupDesc::Raygen(ProgramEntry::new(module_a.raw(), "__raygen__a"))).unwrap();
        let b = host.program_group(&ProgramGroupDesc::Raygen(ProgramEntry::new(module_b.raw(), "__raygen__b"))).unwrap();

        let foreign = PipelineLayout {
            groups: vec![a.raw()],
            raygen: host.pack_empty(b.raw()).unwrap(),
            miss: Vec::new(),
            hits: Vec::new(),
            max_trace_depth: 1,
        };
        let err = RenderPipeline::assemble(&host, foreign).err().unwrap();
        assert!(err.to_string().contains("not part of the pipeline"));

        let linked = PipelineLayout {
            groups: vec![a.raw()],
            raygen: host.pack_empty(a.raw()).unwrap(),
            miss: Vec::new(),
            hits: Vec::new(),
            max_trace_depth: 1,
        };
        let pipeline = RenderPipeline::assemble(&host, linked).unwrap();
        assert_eq!(pipeline.sbt().miss_count, 0);
        assert_eq!(pipeline.stack().continuation, 32);
    }
}
