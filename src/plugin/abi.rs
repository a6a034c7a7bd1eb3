//! C ABI between the host and plugin libraries.
//!
//! Every plugin library exports one function, [`ENTRY_SYMBOL`], returning a
//! [`PluginEntry`]: the ABI version plus a static table of
//! [`TransformDescriptor`]s, one per transform type in the library.
//!
//! Nothing Rust-specific crosses the boundary. Strings are (pointer, length)
//! pairs, errors are reported through an [`ErrorSink`] callback, and the image
//! a transform reads is an [`ImageHandle`] with a sample callback. Panics in
//! plugin code are caught on the plugin side and reported as errors.

use std::any::Any;
use std::ffi::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::slice;
use std::sync::Arc;

use crate::error::TransformError;
use crate::image::{Color, Position};
use crate::plugin::loader::LoadedLibrary;
use crate::plugin::Plugin;
use crate::transform::{ReadableImage, Transform};

/// Bumped whenever any `repr(C)` type in this module changes.
pub const ABI_VERSION: u32 = 1;

/// Name of the function every plugin library exports.
pub const ENTRY_SYMBOL: &[u8] = b"imageedit_plugin_entry\0";

/// Signature of the exported entry point.
pub type EntryFn = extern "C" fn() -> PluginEntry;

// ============================================================================
// Strings and Errors
// ============================================================================

/// Borrowed UTF-8 string.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawStr {
    ptr: *const u8,
    len: usize,
}

impl RawStr {
    pub const EMPTY: RawStr = RawStr::from_static("");

    pub const fn from_static(s: &'static str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    fn borrowed(s: &str) -> Self {
        Self {
            ptr: s.as_ptr(),
            len: s.len(),
        }
    }

    /// # Safety
    /// `ptr` and `len` must describe memory that is still alive.
    unsafe fn to_string_lossy(self) -> String {
        if self.ptr.is_null() || self.len == 0 {
            return String::new();
        }
        let bytes = slice::from_raw_parts(self.ptr, self.len);
        String::from_utf8_lossy(bytes).into_owned()
    }
}

/// Callback the plugin uses to hand an error message to the host.
#[repr(C)]
pub struct ErrorSink {
    context: *mut c_void,
    report: unsafe extern "C" fn(context: *mut c_void, message: RawStr),
}

/// Run `f` with a sink that keeps the last reported message.
fn with_error_sink<R>(f: impl FnOnce(&ErrorSink) -> R) -> (R, Option<String>) {
    let mut message: Option<String> = None;
    let sink = ErrorSink {
        context: &mut message as *mut Option<String> as *mut c_void,
        report: store_message,
    };
    let result = f(&sink);
    (result, message)
}

unsafe extern "C" fn store_message(context: *mut c_void, message: RawStr) {
    let slot = &mut *(context as *mut Option<String>);
    *slot = Some(message.to_string_lossy());
}

unsafe fn report(sink: *const ErrorSink, message: &str) {
    if let Some(sink) = sink.as_ref() {
        (sink.report)(sink.context, RawStr::borrowed(message));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

// ============================================================================
// Image Handle
// ============================================================================

/// A [`ReadableImage`] passed across the boundary.
#[repr(C)]
pub struct ImageHandle {
    context: *const c_void,
    width: usize,
    height: usize,
    sample: unsafe extern "C" fn(context: *const c_void, x: f32, y: f32) -> Color,
}

impl ImageHandle {
    fn with<R>(image: &dyn ReadableImage, f: impl FnOnce(&ImageHandle) -> R) -> R {
        let image_ref: &dyn ReadableImage = image;
        let handle = ImageHandle {
            context: &image_ref as *const &dyn ReadableImage as *const c_void,
            width: image.width(),
            height: image.height(),
            sample: sample_readable,
        };
        f(&handle)
    }
}

unsafe extern "C" fn sample_readable(context: *const c_void, x: f32, y: f32) -> Color {
    let image = &*(context as *const &dyn ReadableImage);
    image.get(x, y)
}

impl ReadableImage for ImageHandle {
    fn get(&self, x: f32, y: f32) -> Color {
        // SAFETY: the host keeps `context` alive for the duration of compute.
        unsafe { (self.sample)(self.context, x, y) }
    }

    fn width(&self) -> usize {
        self.width
    }

    fn height(&self) -> usize {
        self.height
    }
}

// ============================================================================
// Descriptor Table
// ============================================================================

/// Entry table returned by a plugin library.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct PluginEntry {
    pub(crate) abi_version: u32,
    pub(crate) descriptors: *const TransformDescriptor,
    pub(crate) count: usize,
}

// SAFETY: the table points at immutable static data.
unsafe impl Send for PluginEntry {}
unsafe impl Sync for PluginEntry {}

impl PluginEntry {
    pub const fn new(descriptors: &'static [TransformDescriptor]) -> Self {
        Self {
            abi_version: ABI_VERSION,
            descriptors: descriptors.as_ptr(),
            count: descriptors.len(),
        }
    }

    pub fn abi_version(&self) -> u32 {
        self.abi_version
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// # Safety
    /// The library the table came from must still be loaded for `'a`.
    pub(crate) unsafe fn descriptors<'a>(&self) -> &'a [TransformDescriptor] {
        if self.descriptors.is_null() || self.count == 0 {
            return &[];
        }
        slice::from_raw_parts(self.descriptors, self.count)
    }
}

/// Function table for one transform type.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TransformDescriptor {
    type_name: RawStr,
    create: unsafe extern "C" fn(sink: *const ErrorSink) -> *mut c_void,
    name: unsafe extern "C" fn(instance: *const c_void) -> RawStr,
    compute: unsafe extern "C" fn(
        instance: *const c_void,
        position: Position,
        image: *const ImageHandle,
        out: *mut Color,
        sink: *const ErrorSink,
    ) -> bool,
    destroy: unsafe extern "C" fn(instance: *mut c_void),
}

// SAFETY: descriptors are immutable tables of function pointers.
unsafe impl Sync for TransformDescriptor {}
unsafe impl Send for TransformDescriptor {}

impl TransformDescriptor {
    /// Descriptor for plugin type `T`. Used by `export_transforms!`.
    pub const fn of<T: Plugin>(type_name: &'static str) -> Self {
        Self {
            type_name: RawStr::from_static(type_name),
            create: create_instance::<T>,
            name: instance_name::<T>,
            compute: compute_pixel::<T>,
            destroy: destroy_instance::<T>,
        }
    }

    /// # Safety
    /// The library the descriptor came from must still be loaded.
    pub(crate) unsafe fn type_name(&self) -> String {
        self.type_name.to_string_lossy()
    }
}

// ============================================================================
// Plugin Side
// ============================================================================

unsafe extern "C" fn create_instance<T: Plugin>(sink: *const ErrorSink) -> *mut c_void {
    match panic::catch_unwind(T::create) {
        Ok(Ok(instance)) => Box::into_raw(Box::new(instance)).cast(),
        Ok(Err(message)) => {
            report(sink, &message);
            ptr::null_mut()
        }
        Err(payload) => {
            report(sink, &panic_message(payload.as_ref()));
            ptr::null_mut()
        }
    }
}

unsafe extern "C" fn instance_name<T: Plugin>(instance: *const c_void) -> RawStr {
    let transform = &*(instance as *const T);
    panic::catch_unwind(AssertUnwindSafe(|| RawStr::borrowed(transform.name())))
        .unwrap_or(RawStr::EMPTY)
}

unsafe extern "C" fn compute_pixel<T: Plugin>(
    instance: *const c_void,
    position: Position,
    image: *const ImageHandle,
    out: *mut Color,
    sink: *const ErrorSink,
) -> bool {
    let transform = &*(instance as *const T);
    let image = &*image;
    match panic::catch_unwind(AssertUnwindSafe(|| transform.compute(position, image))) {
        Ok(Ok(color)) => {
            *out = color;
            true
        }
        Ok(Err(err)) => {
            report(sink, &err.message);
            false
        }
        Err(payload) => {
            report(sink, &panic_message(payload.as_ref()));
            false
        }
    }
}

unsafe extern "C" fn destroy_instance<T: Plugin>(instance: *mut c_void) {
    drop(Box::from_raw(instance as *mut T));
}

// ============================================================================
// Host Side
// ============================================================================

/// A transform instance living inside a plugin library.
///
/// Holds its library open; the library unloads once the registry and every
/// instance created from it are gone.
pub struct PluginTransform {
    name: String,
    type_name: String,
    instance: *mut c_void,
    vtable: TransformDescriptor,
    _library: Arc<LoadedLibrary>,
}

// SAFETY: `Plugin` requires `Transform`, which is `Send + Sync`.
unsafe impl Send for PluginTransform {}
unsafe impl Sync for PluginTransform {}

impl PluginTransform {
    /// # Safety
    /// `descriptor` must belong to `library`'s entry table.
    pub(crate) unsafe fn instantiate(
        descriptor: &TransformDescriptor,
        library: Arc<LoadedLibrary>,
    ) -> Result<Self, String> {
        let (instance, error) = with_error_sink(|sink| (descriptor.create)(sink));
        if instance.is_null() {
            return Err(error.unwrap_or_else(|| "constructor returned no instance".to_string()));
        }

        Ok(Self {
            name: (descriptor.name)(instance).to_string_lossy(),
            type_name: descriptor.type_name(),
            instance,
            vtable: *descriptor,
            _library: library,
        })
    }

    /// Name of the Rust type that implements the transform.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }
}

impl std::fmt::Debug for PluginTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginTransform")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("library", &self._library.path())
            .finish()
    }
}

impl Transform for PluginTransform {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(
        &self,
        position: Position,
        image: &dyn ReadableImage,
    ) -> Result<Color, TransformError> {
        ImageHandle::with(image, |handle| {
            let mut color = Color::default();
            let (ok, message) = with_error_sink(|sink| {
                // SAFETY: `instance` was created by this vtable and is alive.
                unsafe { (self.vtable.compute)(self.instance, position, handle, &mut color, sink) }
            });
            if ok {
                Ok(color)
            } else {
                Err(TransformError::new(
                    message.unwrap_or_else(|| "transform failed".to_string()),
                ))
            }
        })
    }
}

impl Drop for PluginTransform {
    fn drop(&mut self) {
        // SAFETY: created by `vtable.create`, destroyed exactly once.
        unsafe { (self.vtable.destroy)(self.instance) }
    }
}
