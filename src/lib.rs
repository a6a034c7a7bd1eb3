//! ImageEdit
//!
//! A plugin-driven image editor core: per-pixel transforms loaded from
//! native plugin libraries, applied to an image in parallel with rayon.
//!
//! ## Image Format
//! Images are stored as (height, width, bytes-per-pixel) `u8` arrays in
//! little-endian BGRA byte order. Three pixel depths are supported:
//! - **8 bpp**: one intensity byte, read as opaque gray, written from blue
//! - **24 bpp**: B, G, R with alpha reported as 255
//! - **32 bpp**: B, G, R, A
//!
//! Every computed image is 32 bpp.
//!
//! ## Transform Model
//! A [`Transform`] maps a normalized position in [0, 1]² plus a
//! [`ReadableImage`] view of the source to one output [`Color`]. The view
//! samples bilinearly with wrap-around addressing, so transforms may read
//! at any coordinate. [`ComputeDispatcher`] calls the transform once per
//! output pixel, in parallel, and collects the results.
//!
//! ## Plugins
//! Plugin libraries expose their transforms through the C ABI in
//! [`plugin::abi`]; see [`export_transforms!`]. [`PluginRegistry`] loads
//! every library in a directory and can be refreshed when it changes.

pub mod buffer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod image;
pub mod plugin;
pub mod sampler;
pub mod transform;

pub use buffer::{ImageLock, PixelBuffer};
pub use config::HostConfig;
pub use dispatch::{ComputeDispatcher, OUTPUT_FORMAT};
pub use error::{Error, PluginLoadError, Result, TransformError};
pub use host::Session;
pub use image::{Color, Image, PixelFormat, Position};
pub use plugin::{Plugin, PluginRegistry, RefreshReport};
pub use transform::{FnTransform, ReadableImage, Transform};

// Python bindings (only when python feature is enabled)
#[cfg(feature = "python")]
mod python {
    use std::path::PathBuf;

    use numpy::{IntoPyArray, PyArray3, PyReadonlyArray3};
    use pyo3::exceptions::{PyIOError, PyIndexError, PyRuntimeError, PyValueError};
    use pyo3::prelude::*;

    use crate::dispatch::ComputeDispatcher;
    use crate::error::Error;
    use crate::image::Image;
    use crate::plugin::PluginRegistry;

    impl From<Error> for PyErr {
        fn from(err: Error) -> PyErr {
            match err {
                Error::UnsupportedFormat { .. } | Error::Config(_) => {
                    PyValueError::new_err(err.to_string())
                }
                Error::IndexOutOfRange { .. } => PyIndexError::new_err(err.to_string()),
                Error::Io { .. } => PyIOError::new_err(err.to_string()),
                _ => PyRuntimeError::new_err(err.to_string()),
            }
        }
    }

    // ========================================================================
    // Plugin Host
    // ========================================================================

    /// Plugin directory plus a compute dispatcher.
    ///
    /// Images are (height, width, channels) u8 arrays with 1, 3 or 4
    /// channels in R, G, B(, A) order. Results always have 4 channels.
    #[pyclass]
    pub struct PluginHost {
        registry: PluginRegistry,
        dispatcher: ComputeDispatcher,
    }

    #[pymethods]
    impl PluginHost {
        /// # Arguments
        /// * `plugin_dir` - Directory scanned for plugin libraries
        /// * `extension` - Library file extension (default: platform's)
        /// * `threads` - Compute threads, 0 for the shared pool
        #[new]
        #[pyo3(signature = (plugin_dir, extension=None, threads=0))]
        fn new(plugin_dir: PathBuf, extension: Option<String>, threads: usize) -> PyResult<Self> {
            let mut registry = PluginRegistry::new(plugin_dir);
            if let Some(extension) = extension {
                registry = registry.with_extension(extension);
            }
            Ok(Self {
                registry,
                dispatcher: ComputeDispatcher::with_threads(threads)?,
            })
        }

        /// Rescan the plugin directory.
        ///
        /// # Returns
        /// One message per library or transform that failed to load
        fn refresh(&self) -> PyResult<Vec<String>> {
            let report = self.registry.refresh()?;
            Ok(report.errors.iter().map(ToString::to_string).collect())
        }

        fn names(&self) -> Vec<String> {
            self.registry.names()
        }

        /// Apply the transform at `index` to `image`.
        fn apply<'py>(
            &self,
            py: Python<'py>,
            index: usize,
            image: PyReadonlyArray3<'py, u8>,
        ) -> PyResult<Bound<'py, PyArray3<u8>>> {
            let source = Image::from_rgb_channels(image.as_array())?;
            let transform = self.registry.get(index)?;
            let result =
                py.allow_threads(|| self.dispatcher.run(Some(transform.as_ref()), &source))?;
            Ok(result.to_rgb_channels()?.into_pyarray(py))
        }
    }

    /// ImageEdit extension module
    #[pymodule]
    pub fn imageedit(m: &Bound<'_, PyModule>) -> PyResult<()> {
        m.add_class::<PluginHost>()?;
        Ok(())
    }
}
