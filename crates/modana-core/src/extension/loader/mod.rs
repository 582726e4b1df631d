//! Loading of extension instances from dynamic libraries.

pub mod native;

use std::fmt;
use std::path::{Path, PathBuf};

use libloading::Library;

use super::{Extension, ExtensionBox};

pub use native::NativeExtensionLoader;

/// Check if a file is a native extension module.
pub fn is_native_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| matches!(ext, "so" | "dylib" | "dll"))
        .unwrap_or(false)
}

/// An extension instance plus whatever keeps its code mapped.
///
/// Fields drop in declaration order, so the instance is always destroyed
/// before the library that contains its code.
pub struct LoadedExtension {
    extension: ExtensionBox,
    path: Option<PathBuf>,
    _library: Option<Library>,
}

impl LoadedExtension {
    /// Wrap an extension compiled into the host.
    pub fn builtin(extension: ExtensionBox) -> Self {
        Self {
            extension,
            path: None,
            _library: None,
        }
    }

    pub(crate) fn native(extension: ExtensionBox, path: PathBuf, library: Library) -> Self {
        Self {
            extension,
            path: Some(path),
            _library: Some(library),
        }
    }

    /// Module file, for natively loaded extensions.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn extension(&self) -> &dyn Extension {
        self.extension.as_ref()
    }

    pub fn extension_mut(&mut self) -> &mut dyn Extension {
        self.extension.as_mut()
    }
}

impl fmt::Debug for LoadedExtension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedExtension")
            .field("name", &self.extension.name())
            .field("path", &self.path)
            .finish()
    }
}
