// Copyright @yucwang 2026

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;

use crate::core::config::Config;
use crate::core::error::{DeviceErrorCode, RenderError, Result};
use crate::core::record::SbtRecord;
use crate::core::texture;
use crate::device::{
    Buffer, DeviceApi, DeviceContext, KernelLibrary, Module, ProgramGroup, ProgramGroupDesc, ProgramGroupHandle,
    ProgramKind, Texture,
};
use crate::plugins::runtime::RUNTIME_FRAGMENTS;

/// Index into the callable table of the shader-binding table.
pub type CallableIndex = u32;

/// Caller side of an indirect call edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallNode {
    Program(ProgramGroupHandle),
    Callable(CallableIndex),
}

#[derive(Clone, Debug)]
pub struct CallableEntry {
    pub kind: ProgramKind,
    pub record: SbtRecord,
}

/// Everything a plugin may touch while it initializes: the device context
/// of this render, the scene directory, the kernel library and the
/// callable table being built.
pub struct PluginHost<'a> {
    context: &'a DeviceContext,
    library: &'a KernelLibrary,
    scene_path: PathBuf,
    callables: Vec<CallableEntry>,
    edges: Vec<(CallNode, CallableIndex)>,
}

impl<'a> PluginHost<'a> {
    pub fn new(context: &'a DeviceContext, library: &'a KernelLibrary, scene_path: impl Into<PathBuf>) -> Self {
        Self { context, library, scene_path: scene_path.into(), callables: Vec::new(), edges: Vec::new() }
    }

    pub fn context(&self) -> &'a DeviceContext {
        self.context
    }

    pub fn device(&self) -> &'a Arc<dyn DeviceApi> {
        self.context.device()
    }

    pub fn scene_path(&self) -> &Path {
        &self.scene_path
    }

    /// Links `fragments` (relative to `base_path`), the runtime fragments
    /// when asked for, and `extra_fragments` into one module exporting
    /// `entry`.
    pub fn compile(&self,
                   entry: &str,
                   fragments: &[&str],
                   base_path: &str,
                   extra_fragments: &[&str],
                   needs_runtime_lib: bool) -> Result<Module> {
        let mut resolved: Vec<String> = fragments.iter()
            .map(|f| if base_path.is_empty() { f.to_string() } else { format!("{}/{}", base_path, f) })
            .collect();
        if needs_runtime_lib {
            resolved.extend(RUNTIME_FRAGMENTS.iter().map(|f| f.to_string()));
        }
        resolved.extend(extra_fragments.iter().map(|f| f.to_string()));

        let linked = self.library.link(entry, &resolved)?;
        let handle = self.device().create_module(linked)?;
        log::debug!("compiled `{}` from {:?}", entry, resolved);
        Ok(Module::adopt(Arc::clone(self.device()), handle))
    }

    pub fn program_group(&self, desc: &ProgramGroupDesc) -> Result<ProgramGroup> {
        let handle = self.device().create_program_group(desc)?;
        Ok(ProgramGroup::adopt(Arc::clone(self.device()), handle))
    }

    pub fn pack<T: Pod>(&self, group: ProgramGroupHandle, payload: &T) -> Result<SbtRecord> {
        SbtRecord::pack(self.context.raw(), group, payload)
    }

    pub fn pack_empty(&self, group: ProgramGroupHandle) -> Result<SbtRecord> {
        SbtRecord::pack_empty(self.context.raw(), group)
    }

    pub fn upload<T: Pod>(&self, data: &[T]) -> Result<Buffer> {
        Buffer::from_slice(self.device(), data)
    }

    pub fn load_texture(&self, channel: usize, node: &Config) -> Result<Texture> {
        let desc = texture::texture_desc(channel, node, &self.scene_path)?;
        let handle = self.device().create_texture(desc)?;
        Ok(Texture::adopt(Arc::clone(self.device()), handle))
    }

    /// Appends to the callable table; the returned index is the record's
    /// slot in the table.
    pub fn add_callable(&mut self, group: ProgramGroupHandle, record: SbtRecord) -> Result<CallableIndex> {
        let kind = self.callable_kind(group, &record)?;
        self.callables.push(CallableEntry { kind, record });
        Ok((self.callables.len() - 1) as CallableIndex)
    }

    pub fn update_callable(&mut self, index: CallableIndex, record: SbtRecord) -> Result<()> {
        let group = record.group();
        let kind = self.callable_kind(group, &record)?;
        let entry = self.callables.get_mut(index as usize).ok_or_else(|| {
            RenderError::device(DeviceErrorCode::InvalidValue, format!("no callable at index {}", index))
        })?;
        if entry.record.group() != group {
            return Err(RenderError::device(DeviceErrorCode::InvalidValue,
                                           format!("callable {} belongs to program group {}, not {}",
                                                   index, entry.record.group().0, group.0)));
        }
        *entry = CallableEntry { kind, record };
        Ok(())
    }

    fn callable_kind(&self, group: ProgramGroupHandle, record: &SbtRecord) -> Result<ProgramKind> {
        if record.group() != group {
            return Err(RenderError::device(DeviceErrorCode::InvalidValue,
                                           format!("record was packed for program group {}, not {}",
                                                   record.group().0, group.0)));
        }
        match self.device().program_group_kind(group)? {
            kind @ (ProgramKind::DirectCallable | ProgramKind::ContinuationCallable) => Ok(kind),
            kind => Err(RenderError::device(DeviceErrorCode::InvalidValue,
                                            format!("program group {} is a {:?}, not a callable", group.0, kind))),
        }
    }

    pub fn callables(&self) -> &[CallableEntry] {
        &self.callables
    }

    /// Records that `from` may invoke callable `to`.
    pub fn add_call_edge(&mut self, from: CallNode, to: CallableIndex) {
        if !self.edges.contains(&(from, to)) {
            self.edges.push((from, to));
        }
    }

    pub fn call_edges(&self) -> &[(CallNode, CallableIndex)] {
        &self.edges
    }
}
