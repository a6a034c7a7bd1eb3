//! Plugin discovery and the transform ABI.
//!
//! ## Writing a Plugin
//!
//! A plugin is a `cdylib` crate depending on this one. Each transform type
//! implements [`Transform`] and [`Plugin`], and the library lists its types
//! once:
//!
//! ```ignore
//! struct Invert;
//!
//! impl Transform for Invert { /* name, compute */ }
//!
//! impl Plugin for Invert {
//!     fn create() -> Result<Self, String> {
//!         Ok(Invert)
//!     }
//! }
//!
//! imageedit::export_transforms!(Invert);
//! ```
//!
//! ## Hosting
//!
//! [`PluginRegistry`] scans a directory, loads every matching library through
//! a [`LibraryLoader`] and keeps an atomically swapped snapshot of the
//! instantiated transforms.

pub mod abi;
pub mod loader;
mod registry;

pub use abi::{EntryFn, PluginEntry, PluginTransform, TransformDescriptor, ABI_VERSION, ENTRY_SYMBOL};
pub use loader::{LibraryLoader, LoadedLibrary, NativeLoader};
pub use registry::{PluginRegistry, RefreshReport};

use crate::transform::Transform;

/// A transform type a plugin library can construct.
pub trait Plugin: Transform + Sized + 'static {
    /// Build an instance. An `Err` skips this type and is reported by the host.
    fn create() -> Result<Self, String>;
}

/// Export the entry table for a list of [`Plugin`] types.
///
/// `export_transforms!(A, B)` emits the `#[no_mangle]` entry point a plugin
/// library needs. `export_transforms!(fn my_entry; A, B)` emits the same
/// table under a plain function name, for tables linked into the host.
#[macro_export]
macro_rules! export_transforms {
    (fn $entry:ident; $($plugin:ty),* $(,)?) => {
        pub extern "C" fn $entry() -> $crate::plugin::PluginEntry {
            static DESCRIPTORS: &[$crate::plugin::TransformDescriptor] = &[
                $($crate::plugin::TransformDescriptor::of::<$plugin>(stringify!($plugin)),)*
            ];
            $crate::plugin::PluginEntry::new(DESCRIPTORS)
        }
    };
    ($($plugin:ty),* $(,)?) => {
        #[no_mangle]
        pub extern "C" fn imageedit_plugin_entry() -> $crate::plugin::PluginEntry {
            static DESCRIPTORS: &[$crate::plugin::TransformDescriptor] = &[
                $($crate::plugin::TransformDescriptor::of::<$plugin>(stringify!($plugin)),)*
            ];
            $crate::plugin::PluginEntry::new(DESCRIPTORS)
        }
    };
}
