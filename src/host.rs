//! Interactive editing session.
//!
//! A [`Session`] holds the state of one editor window: the image the user
//! opened (or created), the selected transform and the last computed result.
//! Every change to the image or the selection recomputes the result.

use std::sync::Arc;

use log::info;

use crate::config::HostConfig;
use crate::dispatch::{ComputeDispatcher, OUTPUT_FORMAT};
use crate::error::Result;
use crate::image::Image;
use crate::plugin::{PluginRegistry, RefreshReport};
use crate::transform::Transform;

pub struct Session {
    registry: PluginRegistry,
    dispatcher: ComputeDispatcher,
    original: Option<Image>,
    selected: Option<Arc<dyn Transform>>,
    computed: Option<Image>,
}

impl Session {
    pub fn new(registry: PluginRegistry, dispatcher: ComputeDispatcher) -> Self {
        Self {
            registry,
            dispatcher,
            original: None,
            selected: None,
            computed: None,
        }
    }

    /// Session over the configured plugin directory. Call
    /// [`plugins_changed`](Self::plugins_changed) to load the plugins.
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        Ok(Self::new(
            PluginRegistry::from_config(config),
            ComputeDispatcher::with_threads(config.threads)?,
        ))
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Replace the original image and recompute.
    pub fn open(&mut self, image: Image) -> Result<()> {
        image.format()?;
        self.original = Some(image);
        self.recompute()
    }

    /// Start from a transparent `width` x `height` image and recompute.
    pub fn new_blank(&mut self, width: usize, height: usize) -> Result<()> {
        self.open(Image::new(width, height, OUTPUT_FORMAT))
    }

    /// Select the transform at `index` in the registry, or none.
    pub fn select(&mut self, index: Option<usize>) -> Result<()> {
        self.selected = index.map(|i| self.registry.get(i)).transpose()?;
        self.recompute()
    }

    pub fn selected(&self) -> Option<&Arc<dyn Transform>> {
        self.selected.as_ref()
    }

    /// Recompute the result from the original image and the selection.
    ///
    /// The previous result is discarded first, so after an error there is no
    /// computed image.
    pub fn recompute(&mut self) -> Result<()> {
        self.computed = None;
        let Some(original) = &self.original else {
            return Ok(());
        };
        self.computed = Some(self.dispatcher.run(self.selected.as_deref(), original)?);
        Ok(())
    }

    pub fn original(&self) -> Option<&Image> {
        self.original.as_ref()
    }

    /// The last computed image, if any. Without a selection this is a copy
    /// of the original.
    pub fn computed(&self) -> Option<&Image> {
        self.computed.as_ref()
    }

    pub fn take_computed(&mut self) -> Option<Image> {
        self.computed.take()
    }

    pub fn names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Rescan the plugin directory after it changed on disk.
    ///
    /// The selected transform stays selected even if its library is gone.
    pub fn plugins_changed(&mut self) -> Result<RefreshReport> {
        let report = self.registry.refresh()?;
        info!("plugins reloaded: {}", self.registry.names().join(", "));
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::PixelBuffer;
    use crate::error::{Error, PluginLoadError, TransformError};
    use crate::image::{Color, PixelFormat, Position};
    use crate::plugin::{LibraryLoader, LoadedLibrary, Plugin};
    use crate::transform::ReadableImage;
    use std::fs;
    use std::path::{Path, PathBuf};

    struct Fill;

    impl Transform for Fill {
        fn name(&self) -> &str {
            "Fill"
        }

        fn compute(&self, _: Position, _: &dyn ReadableImage) -> Result<Color, TransformError> {
            Ok(Color::from_argb(255, 1, 2, 3))
        }
    }

    impl Plugin for Fill {
        fn create() -> Result<Self, String> {
            Ok(Fill)
        }
    }

    crate::export_transforms!(fn fill_entry; Fill);

    /// Every file loads as the `Fill` table.
    struct FillLoader;

    impl LibraryLoader for FillLoader {
        fn load(&self, path: &Path) -> Result<LoadedLibrary, PluginLoadError> {
            LoadedLibrary::new(path.to_path_buf(), fill_entry(), None)
        }
    }

    struct PluginDir(PathBuf);

    impl PluginDir {
        fn new(tag: &str, files: &[&str]) -> Self {
            let path = std::env::temp_dir().join(format!("imageedit-host-{tag}-{}", std::process::id()));
            let _ = fs::remove_dir_all(&path);
            fs::create_dir_all(&path).unwrap();
            for file in files {
                fs::write(path.join(file), b"").unwrap();
            }
            Self(path)
        }
    }

    impl Drop for PluginDir {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.0);
        }
    }

    fn session(dir: &PluginDir) -> Session {
        let registry = PluginRegistry::with_loader(&dir.0, FillLoader).with_extension("so");
        let mut session = Session::new(registry, ComputeDispatcher::new());
        session.plugins_changed().unwrap();
        session
    }

    #[test]
    fn test_nothing_computed_without_image() {
        let dir = PluginDir::new("empty", &["fill.so"]);
        let mut session = session(&dir);
        session.select(Some(0)).unwrap();
        assert!(session.computed().is_none());
    }

    #[test]
    fn test_new_blank_without_selection_is_transparent_copy() {
        let dir = PluginDir::new("blank", &[]);
        let mut session = session(&dir);
        session.new_blank(4, 3).unwrap();

        let computed = session.computed().unwrap();
        assert_eq!((computed.width(), computed.height()), (4, 3));
        assert_eq!(computed.format().unwrap(), PixelFormat::Argb32);
        assert!(computed.pixels().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_select_recomputes() {
        let dir = PluginDir::new("select", &["fill.so"]);
        let mut session = session(&dir);
        assert_eq!(session.names(), vec!["Fill"]);

        session.open(Image::new(2, 2, PixelFormat::Rgb24)).unwrap();
        session.select(Some(0)).unwrap();
        let buffer = PixelBuffer::acquire(session.computed().unwrap()).unwrap();
        assert_eq!(buffer.get_pixel(1, 1).unwrap(), Color::from_argb(255, 1, 2, 3));

        session.select(None).unwrap();
        assert_eq!(session.computed(), session.original());
    }

    #[test]
    fn test_select_out_of_range_keeps_state() {
        let dir = PluginDir::new("range", &["fill.so"]);
        let mut session = session(&dir);
        session.select(Some(0)).unwrap();

        assert!(matches!(
            session.select(Some(5)),
            Err(Error::IndexOutOfRange { index: 5, len: 1 })
        ));
        assert_eq!(session.selected().unwrap().name(), "Fill");
    }

    #[test]
    fn test_open_rejects_unsupported_depth() {
        let dir = PluginDir::new("depth", &[]);
        let mut session = session(&dir);
        assert!(matches!(
            session.open(Image::with_depth(2, 2, 16)),
            Err(Error::UnsupportedFormat { depth: 16 })
        ));
        assert!(session.original().is_none());
    }

    #[test]
    fn test_selection_survives_plugin_removal() {
        let dir = PluginDir::new("removal", &["fill.so"]);
        let mut session = session(&dir);
        session.new_blank(3, 3).unwrap();
        session.select(Some(0)).unwrap();

        fs::remove_file(dir.0.join("fill.so")).unwrap();
        let report = session.plugins_changed().unwrap();
        assert_eq!(report.loaded, 0);
        assert!(session.names().is_empty());

        session.recompute().unwrap();
        let computed = session.take_computed().unwrap();
        assert_eq!(
            PixelBuffer::acquire(&computed).unwrap().get_pixel(0, 0).unwrap(),
            Color::from_argb(255, 1, 2, 3)
        );
        assert!(session.computed().is_none());
    }
}
