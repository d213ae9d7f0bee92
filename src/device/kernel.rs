// Copyright @yucwang 2026

use std::collections::HashMap;
use std::fmt;

use super::launch::KernelContext;
use crate::core::error::{RenderError, Result};

/// Uniform device-code ABI: the context plus the argument or payload bytes
/// of the invocation.
pub type KernelFn = fn(&mut KernelContext<'_>, &mut [u8]);

#[derive(Clone, Copy)]
pub struct KernelEntry {
    pub name: &'static str,
    pub func: KernelFn,
    /// Stack bytes the entry needs on its own.
    pub stack_size: u32,
}

impl fmt::Debug for KernelEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelEntry")
            .field("name", &self.name)
            .field("stack_size", &self.stack_size)
            .finish()
    }
}

/// A named unit of device code: exported entries plus the symbols it
/// expects another fragment of the same module to provide.
#[derive(Clone, Debug)]
pub struct KernelFragment {
    pub path: String,
    pub exports: Vec<KernelEntry>,
    pub imports: Vec<&'static str>,
}

impl KernelFragment {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into(), exports: Vec::new(), imports: Vec::new() }
    }

    pub fn export(mut self, name: &'static str, func: KernelFn, stack_size: u32) -> Self {
        self.exports.push(KernelEntry { name, func, stack_size });
        self
    }

    pub fn import(mut self, symbol: &'static str) -> Self {
        self.imports.push(symbol);
        self
    }
}

#[derive(Clone, Debug)]
pub struct LinkedModule {
    entry: String,
    fragments: Vec<String>,
    symbols: HashMap<String, KernelEntry>,
}

impl LinkedModule {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn symbol(&self, name: &str) -> Option<&KernelEntry> {
        self.symbols.get(name)
    }
}

/// Every fragment the installed plugins ship, keyed by path.
#[derive(Default)]
pub struct KernelLibrary {
    fragments: HashMap<String, KernelFragment>,
}

impl KernelLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&mut self, fragment: KernelFragment) {
        if self.fragments.contains_key(&fragment.path) {
            log::warn!("kernel fragment {} installed twice, keeping the latest", fragment.path);
        }
        self.fragments.insert(fragment.path.clone(), fragment);
    }

    pub fn contains(&self, path: &str) -> bool {
        self.fragments.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn link(&self, entry: &str, fragments: &[String]) -> Result<LinkedModule> {
        let fail = |diagnostic: String| RenderError::Compilation {
            entry: entry.to_string(),
            fragments: fragments.to_vec(),
            diagnostic,
        };

        let mut symbols: HashMap<String, KernelEntry> = HashMap::new();
        let mut owners: HashMap<&str, &str> = HashMap::new();
        let mut resolved = Vec::with_capacity(fragments.len());
        for path in fragments {
            let fragment = self.fragments.get(path)
                .ok_or_else(|| fail(format!("cannot open fragment `{}`", path)))?;
            for export in &fragment.exports {
                if let Some(previous) = owners.insert(export.name, path.as_str()) {
                    return Err(fail(format!("duplicate symbol `{}` defined in `{}` and `{}`",
                                            export.name, previous, path)));
                }
                symbols.insert(export.name.to_string(), *export);
            }
            resolved.push(fragment);
        }

        for fragment in resolved {
            for import in &fragment.imports {
                if !symbols.contains_key(*import) {
                    return Err(fail(format!("undefined reference to `{}` in `{}`", import, fragment.path)));
                }
            }
        }

        if !symbols.contains_key(entry) {
            return Err(fail(format!("entry point `{}` not found", entry)));
        }

        Ok(LinkedModule { entry: entry.to_string(), fragments: fragments.to_vec(), symbols })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_ctx: &mut KernelContext<'_>, _args: &mut [u8]) {}

    fn library() -> KernelLibrary {
        let mut library = KernelLibrary::new();
        library.install(KernelFragment::new("material/Test/Test.kernel")
                        .export("__direct_callable__test", noop, 64)
                        .import("rt_helper"));
        library.install(KernelFragment::new("runtime/Helper.kernel").export("rt_helper", noop, 16));
        library.install(KernelFragment::new("runtime/Clash.kernel").export("rt_helper", noop, 16));
        library
    }

    fn diagnostic(err: RenderError) -> String {
        match err {
            RenderError::Compilation { diagnostic, .. } => diagnostic,
            other => panic!("unexpected error {}", other),
        }
    }

    #[test]
    fn test_link_resolves_imports() {
        let module = library().link("__direct_callable__test",
                                    &["material/Test/Test.kernel".to_string(),
                                      "runtime/Helper.kernel".to_string()]).unwrap();
        assert_eq!(module.entry(), "__direct_callable__test");
        assert_eq!(module.symbol("rt_helper").map(|e| e.stack_size), Some(16));
        assert_eq!(module.fragments().len(), 2);
    }

    #[test]
    fn test_link_diagnostics() {
        let library = library();
        let own = "material/Test/Test.kernel".to_string();

        let missing = library.link("__direct_callable__test", &[own.clone(), "runtime/Nope.kernel".into()]);
        assert!(diagnostic(missing.unwrap_err()).contains("cannot open fragment `runtime/Nope.kernel`"));

        let undefined = library.link("__direct_callable__test", &[own.clone()]);
        assert!(diagnostic(undefined.unwrap_err()).contains("undefined reference to `rt_helper`"));

        let duplicate = library.link("__direct_callable__test",
                                     &[own.clone(), "runtime/Helper.kernel".into(), "runtime/Clash.kernel".into()]);
        assert!(diagnostic(duplicate.unwrap_err()).contains("duplicate symbol `rt_helper`"));

        let no_entry = library.link("__direct_callable__other", &[own, "runtime/Helper.kernel".into()]);
        let err = no_entry.unwrap_err();
        assert!(err.to_string().contains("material/Test/Test.kernel, runtime/Helper.kernel"));
        assert!(diagnostic(err).contains("entry point `__direct_callable__other` not found"));
    }
}
