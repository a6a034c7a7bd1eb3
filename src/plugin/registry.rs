//! Directory-backed registry of plugin transforms.

use std::collections::BTreeMap;
use std::env::consts::DLL_EXTENSION;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use log::{debug, info, warn};

use crate::config::HostConfig;
use crate::error::{Error, PluginLoadError, Result};
use crate::plugin::loader::{LibraryLoader, LoadedLibrary, NativeLoader};
use crate::transform::Transform;

/// Outcome of one [`PluginRegistry::refresh`].
#[derive(Debug, Default, Clone)]
pub struct RefreshReport {
    /// Transforms in the new snapshot.
    pub loaded: usize,
    /// Libraries or transform types that were skipped.
    pub errors: Vec<PluginLoadError>,
}

/// The transforms currently available from a plugin directory.
///
/// Readers take a snapshot (`Arc<[Arc<dyn Transform>]>`); a refresh builds a
/// complete new list and swaps it in, so a reader sees either the old or the
/// new registry and a transform held across a refresh stays usable.
pub struct PluginRegistry {
    directory: PathBuf,
    extension: String,
    loader: Box<dyn LibraryLoader>,
    /// Loaded libraries by path. Also serializes refreshes.
    libraries: Mutex<BTreeMap<PathBuf, Arc<LoadedLibrary>>>,
    snapshot: RwLock<Arc<[Arc<dyn Transform>]>>,
}

impl PluginRegistry {
    /// Registry over `directory` loading native libraries. Empty until the
    /// first [`refresh`](Self::refresh).
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self::with_loader(directory, NativeLoader)
    }

    pub fn with_loader(directory: impl Into<PathBuf>, loader: impl LibraryLoader + 'static) -> Self {
        Self {
            directory: directory.into(),
            extension: DLL_EXTENSION.to_string(),
            loader: Box::new(loader),
            libraries: Mutex::new(BTreeMap::new()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Only consider files with this extension (matched case-insensitively).
    pub fn with_extension(mut self, extension: impl AsRef<str>) -> Self {
        self.extension = extension.as_ref().trim_start_matches('.').to_string();
        self
    }

    pub fn from_config(config: &HostConfig) -> Self {
        Self::new(&config.plugin_dir).with_extension(&config.library_extension)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Rescan the directory and replace the snapshot.
    ///
    /// Libraries and transform types that fail to load are skipped and
    /// listed in the report. If the directory itself cannot be read the
    /// current snapshot is kept.
    ///
    /// Libraries are loaded once per path and stay mapped for the lifetime
    /// of the registry: a deleted file's library is not unloaded, and a file
    /// rebuilt at the same path keeps its first-loaded code. Create a new
    /// registry to pick up a rebuilt library.
    pub fn refresh(&self) -> Result<RefreshReport> {
        let mut libraries = self.libraries.lock().unwrap_or_else(PoisonError::into_inner);
        let candidates = self.candidates()?;

        let mut transforms: Vec<Arc<dyn Transform>> = Vec::new();
        let mut errors = Vec::new();

        for path in candidates {
            let library = match libraries.get(&path) {
                Some(library) => Arc::clone(library),
                None => match self.loader.load(&path) {
                    Ok(library) => {
                        let library = Arc::new(library);
                        libraries.insert(path.clone(), Arc::clone(&library));
                        library
                    }
                    Err(err) => {
                        warn!("skipping plugin library: {err}");
                        errors.push(err);
                        continue;
                    }
                },
            };

            for result in library.instantiate_all() {
                match result {
                    Ok(transform) => {
                        debug!(
                            "loaded '{}' ({}) from {}",
                            transform.name(),
                            transform.type_name(),
                            path.display()
                        );
                        transforms.push(Arc::new(transform));
                    }
                    Err(err) => {
                        warn!("skipping transform: {err}");
                        errors.push(err);
                    }
                }
            }
        }

        let loaded = transforms.len();
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = Arc::from(transforms);

        info!(
            "{} transform(s) available from {} ({} error(s))",
            loaded,
            self.directory.display(),
            errors.len()
        );
        Ok(RefreshReport { loaded, errors })
    }

    /// Library files in the directory, sorted by path.
    fn candidates(&self) -> Result<Vec<PathBuf>> {
        let io_error = |source| Error::Io {
            path: self.directory.clone(),
            source,
        };

        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.directory).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.is_file() && self.matches_extension(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(&self.extension))
    }

    /// The current transforms, in discovery order.
    pub fn snapshot(&self) -> Arc<[Arc<dyn Transform>]> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn names(&self) -> Vec<String> {
        self.snapshot().iter().map(|t| t.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, index: usize) -> Result<Arc<dyn Transform>> {
        let snapshot = self.snapshot();
        snapshot.get(index).cloned().ok_or(Error::IndexOutOfRange {
            index,
            len: snapshot.len(),
        })
    }

    /// Transform with the given name. If several share it, the one
    /// discovered last wins.
    pub fn find(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.snapshot().iter().rev().find(|t| t.name() == name).cloned()
    }
}
