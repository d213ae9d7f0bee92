// Copyright @yucwang 2021

pub mod core;
pub mod device;
pub mod io;
pub mod math;
pub mod plugins;
pub mod renderers;

pub use crate::core::error::{RenderError, Result};
pub use crate::core::session::{render_scene, render_scene_with};
