// Copyright @yucwang 2026

pub mod triangle_mesh;
