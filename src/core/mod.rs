// Copyright @yucwang 2021

pub mod config;
pub mod error;
pub mod host;
pub mod pipeline;
pub mod plugin;
pub mod record;
pub mod scene;
pub mod session;
pub mod texture;
