// Copyright @yucwang 2026

pub mod fixed;
