// Copyright @yucwang 2026

use std::fs;
use std::path::Path;

use serde_json::Value;

use crate::core::error::{ConfigErrorKind, RenderError, Result};
use crate::core::plugin::{DocumentReader, Factory, PluginDescriptor, PluginKind};

#[derive(Default)]
pub struct Json;

impl DocumentReader for Json {
    fn extensions(&self) -> &[&'static str] {
        &["json"]
    }

    fn read(&self, path: &Path) -> Result<Value> {
        let text = fs::read_to_string(path).map_err(|e| RenderError::io(path, e))?;
        serde_json::from_str(&text).map_err(|e| {
            RenderError::config("Root", ConfigErrorKind::Invalid,
                                format!("{} is not valid JSON: {}", path.display(), e))
        })
    }
}

fn create() -> Box<dyn DocumentReader> {
    Box::new(Json)
}

pub fn descriptor() -> PluginDescriptor {
    PluginDescriptor::new("Json", PluginKind::Config, Factory::Config(create))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_reports_bad_documents() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("scene.json");
        fs::write(&good, r#"{"Driver": {"Width": 2}}"#).unwrap();
        assert_eq!(Json.read(&good).unwrap()["Driver"]["Width"], 2);

        let bad = dir.path().join("broken.json");
        fs::write(&bad, "{").unwrap();
        assert_eq!(Json.read(&bad).unwrap_err().config_kind(), Some(ConfigErrorKind::Invalid));
        assert!(matches!(Json.read(&dir.path().join("none.json")), Err(RenderError::Io { .. })));
    }
}
