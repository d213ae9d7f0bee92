// Copyright @yucwang 2026

//! Built-in plugins. Each exposes a `descriptor()` naming its factory and
//! the kernel fragments it ships.

pub mod cameras;
pub mod common;
pub mod drivers;
pub mod geometries;
pub mod integrators;
pub mod light_samplers;
pub mod lights;
pub mod materials;
pub mod readers;
pub mod runtime;
pub mod samplers;

use crate::core::error::Result;
use crate::core::plugin::PluginRegistry;

pub fn register_builtins(registry: &mut PluginRegistry) -> Result<()> {
    runtime::install(registry.library_mut());

    for descriptor in [
        cameras::perspective::descriptor(),
        geometries::triangle_mesh::descriptor(),
        materials::diffuse::descriptor(),
        lights::directional::descriptor(),
        lights::point::descriptor(),
        light_samplers::uniform::descriptor(),
        integrators::path::descriptor(),
        samplers::independent::descriptor(),
        drivers::fixed::descriptor(),
        readers::json::descriptor(),
    ] {
        registry.register(descriptor)?;
    }
    Ok(())
}
