// Copyright @yucwang 2021

pub mod render_loop;
