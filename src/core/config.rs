// Copyright @yucwang 2026

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use nalgebra as na;
use serde_json::Value;

use crate::core::error::{ConfigErrorKind, RenderError, Result};
use crate::core::plugin::PluginRegistry;
use crate::math::constants::{Float, Quaternionf, Vector2f, Vector3f, Vector4f};
use crate::math::transform::Transform;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigType {
    Object,
    Float,
    Unsigned,
    String,
    Bool,
    Array,
}

/// Immutable view of one node of the scene document. Every view knows the
/// path that led to it (`Root/Scene/[2]/Material`) for error reporting.
#[derive(Clone, Debug)]
pub struct Config {
    root: Arc<Value>,
    pointer: String,
    path: String,
}

/// Decomposed local transform of a scene node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTransform {
    pub translation: Vector3f,
    pub scale: Vector3f,
    pub rotation: Quaternionf,
}

impl Default for NodeTransform {
    fn default() -> Self {
        Self {
            translation: Vector3f::zeros(),
            scale: Vector3f::new(1.0, 1.0, 1.0),
            rotation: Quaternionf::identity(),
        }
    }
}

impl NodeTransform {
    pub fn to_transform(&self) -> Transform {
        Transform::from_trs(self.translation, self.rotation, self.scale)
    }
}

fn escape_key(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

impl FromStr for Config {
    type Err = RenderError;

    fn from_str(text: &str) -> Result<Config> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| RenderError::config("Root", ConfigErrorKind::Invalid, format!("malformed document: {}", e)))?;
        Ok(Config::from_value(value))
    }
}

impl Config {
    pub fn from_value(value: Value) -> Config {
        Config { root: Arc::new(value), pointer: String::new(), path: "Root".to_string() }
    }

    /// Reads a document with the reader plugin registered for its extension.
    pub fn load(path: &Path, registry: &PluginRegistry) -> Result<Config> {
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
        let reader = registry.reader_for(&extension)?;
        let value = reader.read(path)?;
        log::info!("scene document {} loaded", path.display());
        Ok(Config::from_value(value))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn error(&self, kind: ConfigErrorKind, message: impl Into<String>) -> RenderError {
        RenderError::config(self.path.clone(), kind, message)
    }

    fn mismatch(&self, expected: &str) -> RenderError {
        let found = match self.get_type() {
            Ok(t) => format!("{:?}", t),
            Err(_) => "null".to_string(),
        };
        self.error(ConfigErrorKind::TypeMismatch, format!("expected {}, found {}", expected, found))
    }

    pub fn value(&self) -> Result<&Value> {
        self.root.pointer(&self.pointer)
            .ok_or_else(|| self.error(ConfigErrorKind::MissingKey, "node no longer exists"))
    }

    fn child(&self, segment: &str, label: String) -> Config {
        Config {
            root: Arc::clone(&self.root),
            pointer: format!("{}/{}", self.pointer, segment),
            path: format!("{}/{}", self.path, label),
        }
    }

    pub fn has_attr(&self, name: &str) -> bool {
        matches!(self.value(), Ok(Value::Object(map)) if map.contains_key(name))
    }

    pub fn attribute(&self, name: &str) -> Result<Config> {
        match self.value()? {
            Value::Object(map) if map.contains_key(name) => Ok(self.child(&escape_key(name), name.to_string())),
            Value::Object(_) => Err(self.error(ConfigErrorKind::MissingKey, format!("no attribute `{}`", name))),
            _ => Err(self.mismatch("an object")),
        }
    }

    /// Array elements in order, or object entries.
    pub fn expand(&self) -> Result<Vec<Config>> {
        match self.value()? {
            Value::Array(items) => Ok((0..items.len()).map(|i| self.child(&i.to_string(), format!("[{}]", i))).collect()),
            Value::Object(map) => Ok(map.keys().map(|k| self.child(&escape_key(k), k.clone())).collect()),
            _ => Err(self.mismatch("an array or object")),
        }
    }

    pub fn size(&self) -> Result<usize> {
        match self.value()? {
            Value::Array(items) => Ok(items.len()),
            Value::Object(map) => Ok(map.len()),
            Value::Null => Err(self.mismatch("a value")),
            _ => Ok(1),
        }
    }

    pub fn get_type(&self) -> Result<ConfigType> {
        match self.value()? {
            Value::Object(_) => Ok(ConfigType::Object),
            Value::Array(_) => Ok(ConfigType::Array),
            Value::String(_) => Ok(ConfigType::String),
            Value::Bool(_) => Ok(ConfigType::Bool),
            Value::Number(n) if n.is_u64() => Ok(ConfigType::Unsigned),
            Value::Number(_) => Ok(ConfigType::Float),
            Value::Null => Err(self.error(ConfigErrorKind::TypeMismatch, "null has no type")),
        }
    }

    pub fn as_uint(&self) -> Result<u32> {
        match self.value()? {
            Value::Number(n) => n.as_u64()
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| self.mismatch("an unsigned 32-bit integer")),
            _ => Err(self.mismatch("an unsigned integer")),
        }
    }

    pub fn as_float(&self) -> Result<Float> {
        match self.value()? {
            Value::Number(n) => n.as_f64().map(|v| v as Float).ok_or_else(|| self.mismatch("a number")),
            _ => Err(self.mismatch("a number")),
        }
    }

    pub fn as_string(&self) -> Result<String> {
        match self.value()? {
            Value::String(s) => Ok(s.clone()),
            _ => Err(self.mismatch("a string")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self.value()? {
            Value::Bool(b) => Ok(*b),
            _ => Err(self.mismatch("a bool")),
        }
    }

    fn as_floats<const N: usize>(&self) -> Result<[Float; N]> {
        let expected = format!("an array of {} numbers", N);
        match self.value()? {
            Value::Array(items) if items.len() == N => {
                let mut out = [0.0; N];
                for (i, item) in items.iter().enumerate() {
                    out[i] = item.as_f64().ok_or_else(|| self.mismatch(&expected))? as Float;
                }
                Ok(out)
            }
            _ => Err(self.mismatch(&expected)),
        }
    }

    pub fn as_vec2(&self) -> Result<Vector2f> {
        let [x, y] = self.as_floats::<2>()?;
        Ok(Vector2f::new(x, y))
    }

    pub fn as_vec3(&self) -> Result<Vector3f> {
        let [x, y, z] = self.as_floats::<3>()?;
        Ok(Vector3f::new(x, y, z))
    }

    pub fn as_vec4(&self) -> Result<Vector4f> {
        let [x, y, z, w] = self.as_floats::<4>()?;
        Ok(Vector4f::new(x, y, z, w))
    }

    /// `default` when the attribute is absent, otherwise the converted value.
    pub fn get<T: FromConfig>(&self, name: &str, default: T) -> Result<T> {
        if self.has_attr(name) {
            T::from_config(&self.attribute(name)?)
        } else {
            Ok(default)
        }
    }

    /// Reads `{Trans, Scale, Rotate}` under `name`. `Scale` is a scalar or a
    /// vec3; `Rotate` holds XYZ Euler angles in radians or a raw `[x, y, z, w]`
    /// quaternion.
    pub fn get_transform(&self, name: &str) -> Result<NodeTransform> {
        if !self.has_attr(name) {
            return Ok(NodeTransform::default());
        }
        let node = self.attribute(name)?;
        if node.get_type()? != ConfigType::Object {
            return Err(node.mismatch("a transform object"));
        }

        let mut transform = NodeTransform::default();
        if node.has_attr("Trans") {
            transform.translation = node.attribute("Trans")?.as_vec3()?;
        }
        if node.has_attr("Scale") {
            let scale = node.attribute("Scale")?;
            transform.scale = match scale.get_type()? {
                ConfigType::Float | ConfigType::Unsigned => {
                    let s = scale.as_float()?;
                    Vector3f::new(s, s, s)
                }
                _ => scale.as_vec3()?,
            };
        }
        if node.has_attr("Rotate") {
            let rotate = node.attribute("Rotate")?;
            transform.rotation = match rotate.size()? {
                3 => {
                    let e = rotate.as_vec3()?;
                    Quaternionf::from_euler_angles(e.x, e.y, e.z)
                }
                4 => {
                    let q = rotate.as_vec4()?;
                    let raw = na::Quaternion::new(q.w, q.x, q.y, q.z);
                    if raw.norm() < 1e-8 {
                        return Err(rotate.error(ConfigErrorKind::Invalid, "zero-length quaternion"));
                    }
                    Quaternionf::from_quaternion(raw)
                }
                _ => return Err(rotate.mismatch("3 Euler angles or 4 quaternion components")),
            };
        }
        Ok(transform)
    }
}

pub trait FromConfig: Sized {
    fn from_config(config: &Config) -> Result<Self>;
}

impl FromConfig for u32 {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_uint()
    }
}

impl FromConfig for Float {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_float()
    }
}

impl FromConfig for bool {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_bool()
    }
}

impl FromConfig for String {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_string()
    }
}

impl FromConfig for Vector2f {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_vec2()
    }
}

impl FromConfig for Vector3f {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_vec3()
    }
}

impl FromConfig for Vector4f {
    fn from_config(config: &Config) -> Result<Self> {
        config.as_vec4()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Config {
        Config::from_value(json!({
            "Camera": { "Origin": [0, 1, 3.5], "Tint": [0.1, 0.2, 0.3, 1.0], "Pair": [1, 2], "FOV": 45 },
            "Scene": [
                { "Type": "Light" },
                { "Type": "Geometry", "Transform": { "Scale": 2.0, "Trans": [1, 2, 3] } },
                { "Type": "Geometry", "Transform": { "Rotate": [0.3, -0.2, 1.1] } },
                { "Type": "Geometry", "Transform": { "Rotate": [0, 0, 2, 0] } }
            ],
            "Nothing": null
        }))
    }

    #[test]
    fn test_vectors_and_mismatch() {
        let camera = doc().attribute("Camera").unwrap();
        assert_eq!(camera.attribute("Origin").unwrap().as_vec3().unwrap(), Vector3f::new(0.0, 1.0, 3.5));
        assert_eq!(camera.attribute("Tint").unwrap().as_vec4().unwrap(), Vector4f::new(0.1, 0.2, 0.3, 1.0));

        let err = camera.attribute("Pair").unwrap().as_vec3().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::TypeMismatch));
        assert!(err.to_string().starts_with("Root/Camera/Pair"));
        assert_eq!(camera.attribute("Pair").unwrap().as_vec2().unwrap(), Vector2f::new(1.0, 2.0));
    }

    #[test]
    fn test_paths_types_and_defaults() {
        let root = doc();
        let nodes = root.attribute("Scene").unwrap().expand().unwrap();
        assert_eq!(nodes.len(), 4);
        assert_eq!(nodes[2].path(), "Root/Scene/[2]");
        assert_eq!(nodes[1].attribute("Type").unwrap().as_string().unwrap(), "Geometry");

        let missing = nodes[0].attribute("Material").unwrap_err();
        assert_eq!(missing.config_kind(), Some(ConfigErrorKind::MissingKey));
        assert!(missing.to_string().contains("Root/Scene/[0]"));

        let camera = root.attribute("Camera").unwrap();
        assert_eq!(camera.attribute("FOV").unwrap().get_type().unwrap(), ConfigType::Unsigned);
        assert_eq!(camera.get("FOV", 30.0f32).unwrap(), 45.0);
        assert_eq!(camera.get("Width", 640u32).unwrap(), 640);
        assert_eq!(camera.attribute("Origin").unwrap().size().unwrap(), 3);
        assert_eq!(camera.attribute("FOV").unwrap().size().unwrap(), 1);
        assert!(root.attribute("Nothing").unwrap().get_type().is_err());
        assert!(camera.attribute("Origin").unwrap().as_uint().is_err());
    }

    #[test]
    fn test_transforms() {
        let nodes = doc().attribute("Scene").unwrap().expand().unwrap();

        let identity = nodes[0].get_transform("Transform").unwrap();
        assert_eq!(identity, NodeTransform::default());

        let scaled = nodes[1].get_transform("Transform").unwrap();
        assert_eq!(scaled.scale, Vector3f::new(2.0, 2.0, 2.0));
        assert_eq!(scaled.translation, Vector3f::new(1.0, 2.0, 3.0));
        let p = scaled.to_transform().apply_point(Vector3f::new(1.0, 0.0, 0.0));
        assert!((p - Vector3f::new(3.0, 2.0, 3.0)).norm() < 1e-5);

        let rotated = nodes[2].get_transform("Transform").unwrap();
        let (roll, pitch, yaw) = rotated.rotation.euler_angles();
        assert!((roll - 0.3).abs() < 1e-4);
        assert!((pitch + 0.2).abs() < 1e-4);
        assert!((yaw - 1.1).abs() < 1e-4);

        let quat = nodes[3].get_transform("Transform").unwrap();
        let q = quat.rotation.quaternion();
        assert!((q.k - 1.0).abs() < 1e-6 && q.w.abs() < 1e-6);
    }

    #[test]
    fn test_parse_errors_report_root() {
        let err = "{ not json".parse::<Config>().unwrap_err();
        assert_eq!(err.config_kind(), Some(ConfigErrorKind::Invalid));
        let ok: Config = r#"{"Driver": {"Sample": 4}}"#.parse().unwrap();
        assert_eq!(ok.attribute("Driver").unwrap().get("Sample", 1u32).unwrap(), 4);
    }
}
