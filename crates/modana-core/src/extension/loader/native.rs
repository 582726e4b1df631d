//! Native extension loader for .so/.dylib/.dll files.

use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};

use super::{is_native_extension, LoadedExtension};
use crate::extension::{ExtensionBox, ExtensionError, ABI_VERSION};

/// Exported by every module, returns the ABI it was built against.
pub const ABI_VERSION_SYMBOL: &[u8] = b"modana_extension_abi_version\0";
/// Exported by every module, returns a heap-allocated `ExtensionBox`.
pub const CREATE_SYMBOL: &[u8] = b"modana_extension_create\0";

type AbiVersionFn = unsafe extern "C" fn() -> u32;
type CreateFn = unsafe extern "C" fn() -> *mut ExtensionBox;

/// Loader for native extension modules.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeExtensionLoader;

impl NativeExtensionLoader {
    pub fn new() -> Self {
        Self
    }

    /// Native modules directly inside `dir`, sorted by path.
    ///
    /// A missing or unreadable directory yields no modules.
    pub fn discover(&self, dir: &Path) -> Vec<PathBuf> {
        let mut found = Vec::new();

        match std::fs::read_dir(dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.is_file() && is_native_extension(&path) {
                        found.push(path);
                    }
                }
            }
            Err(e) => {
                tracing::debug!(dir = %dir.display(), error = %e, "extension directory not readable");
            }
        }

        found.sort();
        found
    }

    /// Load a module and create its extension instance.
    pub fn load(&self, path: &Path) -> Result<LoadedExtension, ExtensionError> {
        if !is_native_extension(path) {
            return Err(ExtensionError::LoadFailed {
                path: path.to_path_buf(),
                message: "not a native library file".to_string(),
            });
        }

        // SAFETY: loading runs the module's initializers; modules in the
        // configured directories are trusted.
        let library = unsafe { Library::new(path) }.map_err(|e| ExtensionError::LoadFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let abi = {
            // SAFETY: the symbol type matches what `declare_extension!` exports.
            let version: Symbol<AbiVersionFn> = unsafe { library.get(ABI_VERSION_SYMBOL) }
                .map_err(|_| symbol_not_found(path, ABI_VERSION_SYMBOL))?;
            unsafe { version() }
        };
        if abi != ABI_VERSION {
            return Err(ExtensionError::IncompatibleAbi {
                path: path.to_path_buf(),
                found: abi,
                expected: ABI_VERSION,
            });
        }

        let raw = {
            // SAFETY: as above; the ABI version matched.
            let create: Symbol<CreateFn> = unsafe { library.get(CREATE_SYMBOL) }
                .map_err(|_| symbol_not_found(path, CREATE_SYMBOL))?;
            unsafe { create() }
        };
        if raw.is_null() {
            return Err(ExtensionError::NullPointer(path.to_path_buf()));
        }

        // SAFETY: `raw` came from `Box::into_raw` in the module and is owned here.
        let extension = unsafe { *Box::from_raw(raw) };
        tracing::info!(
            extension = %extension.name(),
            version = %extension.version(),
            path = %path.display(),
            "native extension loaded"
        );
        Ok(LoadedExtension::native(extension, path.to_path_buf(), library))
    }
}

fn symbol_not_found(path: &Path, symbol: &[u8]) -> ExtensionError {
    let name = symbol.strip_suffix(b"\0").unwrap_or(symbol);
    ExtensionError::SymbolNotFound {
        path: path.to_path_buf(),
        symbol: String::from_utf8_lossy(name).into_owned(),
    }
}
