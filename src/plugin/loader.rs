//! Loading plugin libraries and reading their entry tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use libloading::{Library, Symbol};
use log::debug;

use crate::error::PluginLoadError;
use crate::plugin::abi::{
    EntryFn, PluginEntry, PluginTransform, TransformDescriptor, ABI_VERSION, ENTRY_SYMBOL,
};

/// Source of plugin libraries for a registry.
pub trait LibraryLoader: Send + Sync {
    fn load(&self, path: &Path) -> Result<LoadedLibrary, PluginLoadError>;
}

/// Loads native dynamic libraries with `libloading`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeLoader;

impl LibraryLoader for NativeLoader {
    fn load(&self, path: &Path) -> Result<LoadedLibrary, PluginLoadError> {
        // SAFETY: loading runs the library's initializers; the plugin
        // directory is trusted by whoever configured it.
        let library = unsafe { Library::new(path) }
            .map_err(|e| PluginLoadError::library(path, e.to_string()))?;

        let entry = {
            // SAFETY: every plugin exports `ENTRY_SYMBOL` with `EntryFn`'s signature.
            let symbol: Symbol<EntryFn> = unsafe { library.get(ENTRY_SYMBOL) }
                .map_err(|e| PluginLoadError::library(path, e.to_string()))?;
            symbol()
        };

        LoadedLibrary::new(path.to_path_buf(), entry, Some(library))
    }
}

/// A library whose entry table has been read and validated.
///
/// The library stays mapped for as long as this value (or any transform
/// created from it) is alive.
#[derive(Debug)]
pub struct LoadedLibrary {
    path: PathBuf,
    entry: PluginEntry,
    _handle: Option<Library>,
}

impl LoadedLibrary {
    /// Validate `entry` and bind it to the library that owns it.
    ///
    /// `handle` is `None` for tables compiled into the current process.
    pub fn new(
        path: PathBuf,
        entry: PluginEntry,
        handle: Option<Library>,
    ) -> Result<Self, PluginLoadError> {
        if entry.abi_version != ABI_VERSION {
            return Err(PluginLoadError::library(
                &path,
                format!(
                    "plugin ABI version {} does not match host version {ABI_VERSION}",
                    entry.abi_version
                ),
            ));
        }
        if entry.descriptors.is_null() && entry.count > 0 {
            return Err(PluginLoadError::library(
                &path,
                "entry table has no descriptors",
            ));
        }

        debug!(
            "{} exports {} transform type(s)",
            path.display(),
            entry.count
        );
        Ok(Self {
            path,
            entry,
            _handle: handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn descriptors(&self) -> &[TransformDescriptor] {
        // SAFETY: `_handle` keeps the table mapped for the lifetime of `self`.
        unsafe { self.entry.descriptors() }
    }

    /// Instantiate every transform type in the library, in table order.
    pub fn instantiate_all(self: &Arc<Self>) -> Vec<Result<PluginTransform, PluginLoadError>> {
        self.descriptors()
            .iter()
            .map(|descriptor| {
                // SAFETY: `descriptor` comes from this library's own table.
                unsafe { PluginTransform::instantiate(descriptor, Arc::clone(self)) }.map_err(
                    |message| {
                        PluginLoadError::transform(
                            &self.path,
                            unsafe { descriptor.type_name() },
                            message,
                        )
                    },
                )
            })
            .collect()
    }
}
