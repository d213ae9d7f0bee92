// Copyright @yucwang 2026

//! Layouts shared between the built-in kernels. Everything here is plain
//! old data that lives in device memory, SBT records or call arguments.

use bytemuck::{Pod, Zeroable};

use crate::core::error::RenderError;
use crate::device::{DevicePtr, KernelContext, TraversableHandle};
use crate::math::constants::{Float, Vector3f};

/// Offset applied along the normal when spawning secondary rays.
pub const RAY_EPSILON: Float = 1e-4;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LaunchParams {
    /// RGBA f32 per pixel, alpha holds the sample weight.
    pub accumulation: DevicePtr,
    pub handle: TraversableHandle,
    pub width: u32,
    pub height: u32,
    pub sample_index: u32,
    pub paths_per_launch: u32,
    pub integrator: u32,
    pub sampler: u32,
    /// Dimensions consumed by the camera before the first bounce.
    pub camera_dims: u32,
    pub bounce_dims: u32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SampleArgs {
    pub pixel: u32,
    pub sample: u32,
    pub dim: u32,
    pub value: Float,
}

/// Argument block of the integrator continuation callable.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct IntegratorArgs {
    pub origin: [Float; 3],
    pub pixel: u32,
    pub direction: [Float; 3],
    pub sample: u32,
    pub radiance: [Float; 3],
    pub _pad: u32,
}

/// Radiance ray payload, filled by the closest-hit program and the
/// material it calls, or by the radiance miss program.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct ShadePayload {
    pub position: [Float; 3],
    pub hit: u32,
    pub normal: [Float; 3],
    pub pixel: u32,
    pub wo: [Float; 3],
    pub sample: u32,
    pub next_dir: [Float; 3],
    pub dim: u32,
    pub weight: [Float; 3],
    pub _pad0: u32,
    pub light_dir: [Float; 3],
    pub light_dist: Float,
    pub direct: [Float; 3],
    pub _pad1: u32,
    pub emitted: [Float; 3],
    pub _pad2: u32,
    pub uv: [Float; 2],
    pub _pad3: [u32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct OcclusionPayload {
    pub visible: u32,
}

/// Argument block of light samplers and lights. Positions and directions
/// are in the callee's space; `direction` points towards the light and
/// `radiance` is already divided by the selection pdf.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct LightSampleArgs {
    pub position: [Float; 3],
    pub pixel: u32,
    pub direction: [Float; 3],
    pub sample: u32,
    pub radiance: [Float; 3],
    pub dim: u32,
    pub distance: Float,
    pub _pad: [u32; 3],
}

pub fn vec3(v: [Float; 3]) -> Vector3f {
    Vector3f::new(v[0], v[1], v[2])
}

pub fn arr3(v: Vector3f) -> [Float; 3] {
    [v.x, v.y, v.z]
}

/// Draws one dimension from the sampler callable.
pub fn sample_1d(ctx: &mut KernelContext<'_>, sampler: u32, pixel: u32, sample: u32, dim: u32) -> Float {
    let mut args = SampleArgs { pixel, sample, dim, value: 0.0 };
    ctx.direct_call(sampler, bytemuck::bytes_of_mut(&mut args));
    args.value
}

pub fn uninitialized(plugin: &str) -> RenderError {
    RenderError::PluginLoad { name: plugin.to_string(), reason: "used before init".to_string() }
}
