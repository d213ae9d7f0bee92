// Copyright @yucwang 2026

use std::fs;
use std::path::Path;

use wavefront_obj::{obj, ParseError};

use crate::core::error::{RenderError, Result};

/// Triangle soup flattened over every object of an OBJ file.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TriangleSoup {
    pub vertices: Vec<[f32; 3]>,
    pub indices: Vec<[u32; 3]>,
}

pub fn load_obj_from_str<S: AsRef<str>>(input: S) -> std::result::Result<obj::ObjSet, ParseError> {
    let triangulated = triangulate_faces(input.as_ref());
    obj::parse(triangulated)
}

pub fn load_obj_from_file<P: AsRef<Path>>(path: P) -> Result<obj::ObjSet> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).map_err(|e| RenderError::io(path, e))?;
    load_obj_from_str(data).map_err(|e| RenderError::Parse {
        path: path.to_path_buf(),
        message: format!("line {}: {}", e.line_number, e.message),
    })
}

/// Vertex indices in the set are per object; the soup rebases them.
pub fn triangles(set: &obj::ObjSet) -> TriangleSoup {
    let mut soup = TriangleSoup::default();
    for object in &set.objects {
        let base = soup.vertices.len() as u32;
        soup.vertices.extend(object.vertices.iter().map(|v| [v.x as f32, v.y as f32, v.z as f32]));
        for geometry in &object.geometry {
            for shape in &geometry.shapes {
                if let obj::Primitive::Triangle(a, b, c) = shape.primitive {
                    soup.indices.push([base + a.0 as u32, base + b.0 as u32, base + c.0 as u32]);
                }
            }
        }
    }
    soup
}

fn triangulate_faces(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / 4);
    for line in input.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("f ") || trimmed.starts_with("f\t") {
            let parts: Vec<&str> = trimmed.split_whitespace().collect();
            if parts.len() > 4 {
                // Fan around the first corner.
                for i in 2..(parts.len() - 1) {
                    out.push_str(&format!("f {} {} {}\n", parts[1], parts[i], parts[i + 1]));
                }
                continue;
            }
        }
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quads_become_two_triangles() {
        let input = "\
o quad
v 0.0 0.0 0.0
v 1.0 0.0 0.0
v 1.0 1.0 0.0
v 0.0 1.0 0.0
f 1 2 3 4
o tri
v 0.0 0.0 1.0
v 1.0 0.0 1.0
v 0.0 1.0 1.0
f 5 6 7
";
        let set = load_obj_from_str(input).expect("failed to parse obj");
        let soup = triangles(&set);
        assert_eq!(soup.vertices.len(), 7);
        assert_eq!(soup.indices, vec![[0, 1, 2], [0, 2, 3], [4, 5, 6]]);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_obj_from_file("/nonexistent/mesh.obj").unwrap_err();
        assert!(matches!(err, RenderError::Io { .. }));
    }
}
