// Copyright @yucwang 2026

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigErrorKind {
    MissingKey,
    TypeMismatch,
    AlreadyDefined,
    NoSuchAsset,
    ChannelMismatch,
    Invalid,
}

impl fmt::Display for ConfigErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConfigErrorKind::MissingKey => "missing key",
            ConfigErrorKind::TypeMismatch => "type mismatch",
            ConfigErrorKind::AlreadyDefined => "already defined",
            ConfigErrorKind::NoSuchAsset => "no such asset",
            ConfigErrorKind::ChannelMismatch => "channel mismatch",
            ConfigErrorKind::Invalid => "invalid value",
        };
        f.write_str(name)
    }
}

/// Status codes of the device runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceErrorCode {
    InvalidValue,
    InvalidHandle,
    OutOfMemory,
    OutOfBounds,
    LaunchFailure,
    ContextDestroyed,
    InvalidOperation,
}

impl DeviceErrorCode {
    pub fn symbol(&self) -> &'static str {
        match self {
            DeviceErrorCode::InvalidValue => "LUMINARY_ERROR_INVALID_VALUE",
            DeviceErrorCode::InvalidHandle => "LUMINARY_ERROR_INVALID_HANDLE",
            DeviceErrorCode::OutOfMemory => "LUMINARY_ERROR_OUT_OF_MEMORY",
            DeviceErrorCode::OutOfBounds => "LUMINARY_ERROR_OUT_OF_BOUNDS",
            DeviceErrorCode::LaunchFailure => "LUMINARY_ERROR_LAUNCH_FAILURE",
            DeviceErrorCode::ContextDestroyed => "LUMINARY_ERROR_CONTEXT_DESTROYED",
            DeviceErrorCode::InvalidOperation => "LUMINARY_ERROR_INVALID_OPERATION",
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("{path}: {kind}: {message}")]
    Config {
        path: String,
        kind: ConfigErrorKind,
        message: String,
    },

    #[error("plugin `{name}` not found under `{search_path}`")]
    PluginNotFound { name: String, search_path: String },

    #[error("failed to load plugin `{name}`: {reason}")]
    PluginLoad { name: String, reason: String },

    #[error("failed to compile `{entry}` from [{}]: {diagnostic}", .fragments.join(", "))]
    Compilation {
        entry: String,
        fragments: Vec<String>,
        diagnostic: String,
    },

    #[error("{}: {message}", .code.symbol())]
    Device { code: DeviceErrorCode, message: String },

    #[error("io error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {message}", .path.display())]
    Parse { path: PathBuf, message: String },

    #[error("image error: {0}")]
    Image(String),

    #[error("{context}")]
    Context {
        context: String,
        #[source]
        source: Box<RenderError>,
    },
}

pub type Result<T> = std::result::Result<T, RenderError>;

impl RenderError {
    pub fn config(path: impl Into<String>, kind: ConfigErrorKind, message: impl Into<String>) -> Self {
        RenderError::Config { path: path.into(), kind, message: message.into() }
    }

    pub fn device(code: DeviceErrorCode, message: impl Into<String>) -> Self {
        RenderError::Device { code, message: message.into() }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RenderError::Io { path: path.into(), source }
    }

    /// Innermost error once every context layer is peeled off.
    pub fn root(&self) -> &RenderError {
        match self {
            RenderError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn config_kind(&self) -> Option<ConfigErrorKind> {
        match self.root() {
            RenderError::Config { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The whole chain, outermost first, one cause per line.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str("\n  caused by: ");
            out.push_str(&cause.to_string());
            source = cause.source();
        }
        out
    }
}

pub trait ResultExt<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| RenderError::Context { context: context.into(), source: Box::new(source) })
    }

    fn with_context<C: Into<String>, F: FnOnce() -> C>(self, f: F) -> Result<T> {
        self.map_err(|source| RenderError::Context { context: f().into(), source: Box::new(source) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_chain_keeps_root() {
        let err: Result<()> = Err(RenderError::config("Root/MaterialLib/[1]", ConfigErrorKind::AlreadyDefined, "material `red`"));
        let err = err.context("loading materials").context("building scene").unwrap_err();

        assert_eq!(err.config_kind(), Some(ConfigErrorKind::AlreadyDefined));
        let report = err.report();
        assert!(report.starts_with("building scene"));
        assert!(report.contains("caused by: loading materials"));
        assert!(report.contains("Root/MaterialLib/[1]: already defined"));
    }

    #[test]
    fn test_device_error_uses_symbol() {
        let err = RenderError::device(DeviceErrorCode::InvalidHandle, "program group 7 was destroyed");
        assert_eq!(err.to_string(), "LUMINARY_ERROR_INVALID_HANDLE: program group 7 was destroyed");
    }

    #[test]
    fn test_compilation_error_lists_fragments() {
        let err = RenderError::Compilation {
            entry: "__raygen__pinhole".into(),
            fragments: vec!["camera/Perspective/Perspective.kernel".into(), "runtime/Random.kernel".into()],
            diagnostic: "undefined reference".into(),
        };
        let text = err.to_string();
        assert!(text.contains("camera/Perspective/Perspective.kernel, runtime/Random.kernel"));
    }
}
