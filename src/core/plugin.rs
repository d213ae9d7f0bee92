// Copyright @yucwang 2026

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde_json::Value;

use crate::core::config::Config;
use crate::core::error::{RenderError, Result};
use crate::core::host::{CallableIndex, PluginHost};
use crate::core::record::SbtRecord;
use crate::device::{Accel, DevicePtr, KernelFragment, KernelLibrary, ProgramGroupHandle};
use crate::renderers::render_loop::{Launcher, RenderReport};

pub const INTERFACE_VERSION: &str = "1.0";

/// Radiance and occlusion.
pub const RAY_TYPE_COUNT: usize = 2;
pub const RAY_TYPE_RADIANCE: u32 = 0;
pub const RAY_TYPE_OCCLUSION: u32 = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PluginKind {
    Camera,
    Geometry,
    Material,
    Light,
    LightSampler,
    Integrator,
    Sampler,
    Driver,
    Config,
}

impl PluginKind {
    pub fn interface(&self) -> &'static str {
        match self {
            PluginKind::Camera => "luminary.Camera",
            PluginKind::Geometry => "luminary.Geometry",
            PluginKind::Material => "luminary.Material",
            PluginKind::Light => "luminary.Light",
            PluginKind::LightSampler => "luminary.LightSampler",
            PluginKind::Integrator => "luminary.Integrator",
            PluginKind::Sampler => "luminary.Sampler",
            PluginKind::Driver => "luminary.Driver",
            PluginKind::Config => "luminary.Config",
        }
    }

    pub fn search_path(&self) -> &'static str {
        match self {
            PluginKind::Camera => "luminary/camera",
            PluginKind::Geometry => "luminary/geometry",
            PluginKind::Material => "luminary/material",
            PluginKind::Light => "luminary/light",
            PluginKind::LightSampler => "luminary/light_sampler",
            PluginKind::Integrator => "luminary/integrator",
            PluginKind::Sampler => "luminary/sampler",
            PluginKind::Driver => "luminary/driver",
            PluginKind::Config => "luminary/config",
        }
    }

    /// e.g. `luminary.Camera/1.0`
    pub fn interface_version(&self) -> String {
        format!("{}/{}", self.interface(), INTERFACE_VERSION)
    }
}

pub struct CameraData {
    pub raygen: ProgramGroupHandle,
    pub max_sample_dim: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CameraArgs {
    pub width: u32,
    pub height: u32,
}

pub struct GeometryData {
    /// Indexed by ray type.
    pub hit_groups: [ProgramGroupHandle; RAY_TYPE_COUNT],
    pub max_sample_dim: u32,
}

/// One placed copy of a geometry: its own bottom-level structure and one
/// hit record per ray type.
pub struct GeometryInstance {
    pub hit_records: Vec<SbtRecord>,
    pub accel: Accel,
}

pub struct MaterialData {
    pub callable: ProgramGroupHandle,
    pub max_sample_dim: u32,
}

/// Callables every material may invoke.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaterialCallTable {
    pub light_sampler: CallableIndex,
    pub sampler: CallableIndex,
    /// First sample dimension handed to the light sampler, relative to the
    /// bounce's first dimension.
    pub light_sample_dim: u32,
}

pub struct LightData {
    pub callable: ProgramGroupHandle,
    pub record: SbtRecord,
    pub max_sample_dim: u32,
}

pub struct LightSamplerData {
    pub callable: ProgramGroupHandle,
    pub max_sample_dim: u32,
}

/// Parallel device arrays: row-major 3x4 light-to-world matrices and the
/// callable index of each light.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LightTable {
    pub matrices: DevicePtr,
    pub programs: DevicePtr,
    pub count: u32,
    pub sampler: CallableIndex,
}

pub struct MissProgram {
    pub group: ProgramGroupHandle,
    pub record: SbtRecord,
}

pub struct IntegratorData {
    pub callable: ProgramGroupHandle,
    pub record: SbtRecord,
    /// Indexed by ray type.
    pub miss: Vec<MissProgram>,
    pub max_depth: u32,
    pub max_trace_depth: u32,
    pub paths_per_launch: u32,
    pub max_sample_dim: u32,
}

pub struct SamplerData {
    pub callable: ProgramGroupHandle,
    pub record: SbtRecord,
    pub max_sample_dim: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriverData {
    pub width: u32,
    pub height: u32,
}

pub trait Camera {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<CameraData>;
    fn set_args(&mut self, host: &PluginHost<'_>, args: &CameraArgs) -> Result<SbtRecord>;
}

pub trait Geometry {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<GeometryData>;
    fn instantiate(&mut self, host: &PluginHost<'_>, material: CallableIndex) -> Result<GeometryInstance>;
}

pub trait Material {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<MaterialData>;
    fn pack_record(&self, host: &PluginHost<'_>, table: &MaterialCallTable) -> Result<SbtRecord>;
}

pub trait Light {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<LightData>;
}

pub trait LightSampler {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<LightSamplerData>;
    fn pack_record(&self, host: &PluginHost<'_>, table: &LightTable) -> Result<SbtRecord>;
}

pub trait Integrator {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<IntegratorData>;
}

pub trait Sampler {
    fn init(&mut self, host: &mut PluginHost<'_>, config: &Config) -> Result<SamplerData>;
}

pub trait Driver {
    fn init(&mut self, config: &Config, scene_path: &Path) -> Result<DriverData>;
    fn do_render(&mut self, launcher: &mut dyn Launcher) -> Result<RenderReport>;
}

/// Reads a scene document into a JSON value.
pub trait DocumentReader {
    fn extensions(&self) -> &[&'static str];
    fn read(&self, path: &Path) -> Result<Value>;
}

pub enum Factory {
    Camera(fn() -> Box<dyn Camera>),
    Geometry(fn() -> Box<dyn Geometry>),
    Material(fn() -> Box<dyn Material>),
    Light(fn() -> Box<dyn Light>),
    LightSampler(fn() -> Box<dyn LightSampler>),
    Integrator(fn() -> Box<dyn Integrator>),
    Sampler(fn() -> Box<dyn Sampler>),
    Driver(fn() -> Box<dyn Driver>),
    Config(fn() -> Box<dyn DocumentReader>),
}

pub struct Implementation {
    pub interface: &'static str,
    pub version: &'static str,
    pub factory: Factory,
}

pub struct PluginDescriptor {
    pub name: &'static str,
    pub search_path: &'static str,
    pub implementations: Vec<Implementation>,
    pub fragments: Vec<KernelFragment>,
}

impl PluginDescriptor {
    pub fn new(name: &'static str, kind: PluginKind, factory: Factory) -> Self {
        Self {
            name,
            search_path: kind.search_path(),
            implementations: vec![Implementation { interface: kind.interface(), version: INTERFACE_VERSION, factory }],
            fragments: Vec::new(),
        }
    }

    pub fn with_fragment(mut self, fragment: KernelFragment) -> Self {
        self.fragments.push(fragment);
        self
    }
}

/// Interface traits that can be produced by a registry factory.
pub trait Interface {
    const KIND: PluginKind;

    fn create(factory: &Factory) -> Option<Box<Self>>;
}

macro_rules! interface {
    ($object:ident, $variant:ident) => {
        impl Interface for dyn $object {
            const KIND: PluginKind = PluginKind::$variant;

            fn create(factory: &Factory) -> Option<Box<Self>> {
                match factory {
                    Factory::$variant(make) => Some(make()),
                    _ => None,
                }
            }
        }
    };
}

interface!(Camera, Camera);
interface!(Geometry, Geometry);
interface!(Material, Material);
interface!(Light, Light);
interface!(LightSampler, LightSampler);
interface!(Integrator, Integrator);
interface!(Sampler, Sampler);
interface!(Driver, Driver);
interface!(DocumentReader, Config);

/// Name-keyed plugin table, populated once at startup.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<&'static str, BTreeMap<&'static str, PluginDescriptor>>,
    library: KernelLibrary,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        crate::plugins::register_builtins(&mut registry)?;
        log::debug!("{} kernel fragments installed", registry.library.len());
        Ok(registry)
    }

    /// Installs the plugin and its kernel fragments.
    pub fn register(&mut self, mut descriptor: PluginDescriptor) -> Result<()> {
        let plugins = self.plugins.entry(descriptor.search_path).or_default();
        if plugins.contains_key(descriptor.name) {
            return Err(RenderError::PluginLoad {
                name: descriptor.name.to_string(),
                reason: format!("already registered under `{}`", descriptor.search_path),
            });
        }
        for fragment in std::mem::take(&mut descriptor.fragments) {
            self.library.install(fragment);
        }
        plugins.insert(descriptor.name, descriptor);
        Ok(())
    }

    pub fn library(&self) -> &KernelLibrary {
        &self.library
    }

    pub fn library_mut(&mut self) -> &mut KernelLibrary {
        &mut self.library
    }

    /// Installed plugin names of one kind, sorted.
    pub fn discover(&self, kind: PluginKind) -> Vec<&'static str> {
        self.plugins.get(kind.search_path()).map(|p| p.keys().copied().collect()).unwrap_or_default()
    }

    fn descriptor(&self, kind: PluginKind, name: &str) -> Result<&PluginDescriptor> {
        self.plugins.get(kind.search_path())
            .and_then(|p| p.get(name))
            .ok_or_else(|| RenderError::PluginNotFound { name: name.to_string(), search_path: kind.search_path().to_string() })
    }

    /// `interface/version` strings the plugin declares.
    pub fn implementations(&self, kind: PluginKind, name: &str) -> Result<Vec<String>> {
        Ok(self.descriptor(kind, name)?
            .implementations
            .iter()
            .map(|i| format!("{}/{}", i.interface, i.version))
            .collect())
    }

    pub fn instantiate<I: Interface + ?Sized>(&self, name: &str) -> Result<Box<I>> {
        let descriptor = self.descriptor(I::KIND, name)?;
        let load_error = |reason: String| RenderError::PluginLoad { name: name.to_string(), reason };
        let implementation = descriptor.implementations.iter()
            .find(|i| i.interface == I::KIND.interface())
            .ok_or_else(|| load_error(format!("does not implement {}", I::KIND.interface())))?;
        if implementation.version != INTERFACE_VERSION {
            return Err(load_error(format!("implements {}/{}, expected {}",
                                          implementation.interface, implementation.version,
                                          I::KIND.interface_version())));
        }
        I::create(&implementation.factory)
            .ok_or_else(|| load_error(format!("factory for {} builds a different kind", I::KIND.interface())))
    }

    pub fn reader_for(&self, extension: &str) -> Result<Box<dyn DocumentReader>> {
        for name in self.discover(PluginKind::Config) {
            let reader = self.instantiate::<dyn DocumentReader>(name)?;
            if reader.extensions().contains(&extension) {
                return Ok(reader);
            }
        }
        Err(RenderError::PluginNotFound {
            name: format!("reader for .{}", extension),
            search_path: PluginKind::Config.search_path().to_string(),
        })
    }
}
