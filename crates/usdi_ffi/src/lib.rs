//! C interface to the usdi scene engine.
//!
//! This crate exposes a flat C API for opening USD stages, reading them as
//! text, JSON and bounds, editing references, checking dependencies and
//! writing USDZ packages.
//!
//! # Safety
//!
//! Every `extern "C"` function wraps its body in `std::panic::catch_unwind`
//! so Rust panics never cross the boundary. Null, empty or non-UTF-8 path
//! arguments fail before the engine is touched.
//!
//! # Ownership
//!
//! Every `char*` returned by this library is owned by the caller and must be
//! released exactly once with `usdi_free_string`. Handles (`UsdiStage`,
//! `UsdiPrim`, `UsdiDependencyContext`) are released with their matching
//! `usdi_*_close`/`usdi_*_release`/`usdi_*_free` function.

use std::ffi::{c_char, CStr, CString};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytemuck::{Pod, Zeroable};
use usdi_core::usd::{ListPosition, Reference, Stage, Value};
use usdi_core::{compute_scene_bounds, create_package, prim_references_json, scene_graph_json};
use usdi_core::{DependencyContext, PackageOptions, SceneBounds};

// ---------------------------------------------------------------------------
// C records
// ---------------------------------------------------------------------------

/// World bounds of a scene. All fields are zero when `has_geometry` is 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UsdiBounds {
    pub min_x: f32,
    pub min_y: f32,
    pub min_z: f32,
    pub max_x: f32,
    pub max_y: f32,
    pub max_z: f32,
    pub center_x: f32,
    pub center_y: f32,
    pub center_z: f32,
    pub max_extent: f32,
    pub has_geometry: i32,
}

impl From<SceneBounds> for UsdiBounds {
    fn from(bounds: SceneBounds) -> Self {
        Self {
            min_x: bounds.min.x,
            min_y: bounds.min.y,
            min_z: bounds.min.z,
            max_x: bounds.max.x,
            max_y: bounds.max.y,
            max_z: bounds.max.z,
            center_x: bounds.center.x,
            center_y: bounds.center.y,
            center_z: bounds.center.z,
            max_extent: bounds.max_extent,
            has_geometry: 1,
        }
    }
}

/// Outcome of `usdi_check_dependencies`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsdiDependencyCheckResult {
    pub success: bool,
    pub unresolved_count: i32,
}

/// An attribute value read by `usdi_prim_get_attribute`. Both strings are
/// owned by the caller.
#[repr(C)]
#[derive(Debug)]
pub struct UsdiAttributeValue {
    /// Declared value type, e.g. `double3`
    pub type_name: *mut c_char,
    /// The value; strings and tokens as their contents, anything else as
    /// USDA text
    pub value: *mut c_char,
}

// ---------------------------------------------------------------------------
// Opaque handles
// ---------------------------------------------------------------------------

/// An open stage.
pub struct UsdiStage {
    stage: Arc<Mutex<Stage>>,
}

/// A prim on an open stage. Holds the stage alive; the path is looked up
/// again on every call.
pub struct UsdiPrim {
    stage: Arc<Mutex<Stage>>,
    path: String,
}

/// Storage for the unresolved paths of the latest dependency check.
pub struct UsdiDependencyContext {
    inner: DependencyContext,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Borrow a required string argument. `None` for null, empty or non-UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives
/// the returned reference.
unsafe fn required_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    let s = unsafe { optional_str(ptr) }?;
    (!s.is_empty()).then_some(s)
}

/// Borrow an optional string argument; null reads as `""`. `None` only for
/// non-UTF-8 input.
///
/// # Safety
///
/// As for [`required_str`].
unsafe fn optional_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return Some("");
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Hand a string to the caller. Null when it contains a NUL byte.
fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(s) => s.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

fn lock(stage: &Mutex<Stage>) -> MutexGuard<'_, Stage> {
    stage.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run `f`, returning `fallback` if it panics.
fn guarded<T>(fallback: T, f: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(_) => {
            log::error!("panic caught at the C boundary");
            fallback
        }
    }
}

fn open_stage(path: &str) -> Option<Stage> {
    match Stage::open(path) {
        Ok(stage) => Some(stage),
        Err(e) => {
            log::debug!("Cannot open {}: {}", path, e);
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Path-based operations
// ---------------------------------------------------------------------------

/// Enable logging to stderr, filtered by `RUST_LOG`. Safe to call more than
/// once.
#[no_mangle]
pub extern "C" fn usdi_enable_logging() {
    guarded((), || {
        let _ = env_logger::try_init();
    })
}

/// Flatten the stage at `path` to USDA text.
///
/// Returns null if the stage cannot be opened.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_export_usda(path: *const c_char) -> *mut c_char {
    let Some(path) = (unsafe { required_str(path) }) else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || match open_stage(path) {
        Some(stage) => into_c_string(stage.export_to_string()),
        None => ptr::null_mut(),
    })
}

/// The visible prim hierarchy of the stage at `path` as a JSON array.
///
/// Returns null if the stage cannot be opened.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_scene_graph_json(path: *const c_char) -> *mut c_char {
    let Some(path) = (unsafe { required_str(path) }) else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || {
        let Some(stage) = open_stage(path) else {
            return ptr::null_mut();
        };
        match scene_graph_json(&stage) {
            Ok(json) => into_c_string(json),
            Err(_) => ptr::null_mut(),
        }
    })
}

/// The resolved direct references of a prim as
/// `[{"assetPath":...,"primPath":...}]`.
///
/// Returns null if the stage cannot be opened or has no such prim.
///
/// # Safety
///
/// Both arguments must be null or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn usdi_prim_references_json(stage_path: *const c_char, prim_path: *const c_char) -> *mut c_char {
    let (Some(stage_path), Some(prim_path)) = (unsafe { required_str(stage_path) }, unsafe { required_str(prim_path) })
    else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || {
        let Some(stage) = open_stage(stage_path) else {
            return ptr::null_mut();
        };
        let Some(prim) = stage.prim_at_path(prim_path) else {
            return ptr::null_mut();
        };
        match prim_references_json(prim) {
            Ok(json) => into_c_string(json),
            Err(_) => ptr::null_mut(),
        }
    })
}

/// World bounds of the stage at `path` (its default prim, or everything when
/// none is set) for default and render purposes, with instancing.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_scene_bounds(path: *const c_char) -> UsdiBounds {
    let Some(path) = (unsafe { required_str(path) }) else {
        return UsdiBounds::zeroed();
    };
    guarded(UsdiBounds::zeroed(), || {
        open_stage(path)
            .and_then(|stage| compute_scene_bounds(&stage))
            .map(UsdiBounds::from)
            .unwrap_or_else(UsdiBounds::zeroed)
    })
}

/// Release a string returned by this library. Null is ignored.
///
/// # Safety
///
/// `s` must be null or a string returned by this library that has not been
/// released yet.
#[no_mangle]
pub unsafe extern "C" fn usdi_free_string(s: *mut c_char) {
    if s.is_null() {
        return;
    }
    guarded((), || {
        // SAFETY: caller guarantees `s` came from `CString::into_raw` here.
        drop(unsafe { CString::from_raw(s) });
    })
}

/// Bundle the asset at `source` and its dependencies into the `.usdz` at
/// `output`.
///
/// With `device_compatible` set, the packaged root layer's `metersPerUnit`
/// is set to 1.0. Geometry is not rescaled, so assets authored in other
/// units change apparent size for consumers that honour unit metadata.
///
/// # Safety
///
/// Both paths must be null or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn usdi_create_package(source: *const c_char, output: *const c_char, device_compatible: bool) -> bool {
    let (Some(source), Some(output)) = (unsafe { required_str(source) }, unsafe { required_str(output) }) else {
        return false;
    };
    guarded(false, || {
        let options = PackageOptions {
            device_compatible,
            ..Default::default()
        };
        match create_package(source, output, &options) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Cannot package {}: {}", source, e);
                false
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Stage and prim handles
// ---------------------------------------------------------------------------

/// Open a stage. Returns null on failure; release with `usdi_stage_close`.
///
/// # Safety
///
/// `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_stage_open(path: *const c_char) -> *mut UsdiStage {
    let Some(path) = (unsafe { required_str(path) }) else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || match open_stage(path) {
        Some(stage) => Box::into_raw(Box::new(UsdiStage {
            stage: Arc::new(Mutex::new(stage)),
        })),
        None => ptr::null_mut(),
    })
}

/// Close a stage handle. Prim handles taken from it stay usable until
/// released.
///
/// # Safety
///
/// `stage` must be null or a handle from `usdi_stage_open` that has not been
/// closed.
#[no_mangle]
pub unsafe extern "C" fn usdi_stage_close(stage: *mut UsdiStage) {
    if stage.is_null() {
        return;
    }
    guarded((), || {
        // SAFETY: caller guarantees `stage` came from usdi_stage_open.
        drop(unsafe { Box::from_raw(stage) });
    })
}

/// Flatten an open stage (including unsaved edits) to USDA text.
///
/// # Safety
///
/// `stage` must be null or a live stage handle.
#[no_mangle]
pub unsafe extern "C" fn usdi_stage_export(stage: *const UsdiStage) -> *mut c_char {
    if stage.is_null() {
        return ptr::null_mut();
    }
    guarded(ptr::null_mut(), || {
        let stage = unsafe { &*stage };
        into_c_string(lock(&stage.stage).export_to_string())
    })
}

/// Write the root layer of an open stage back to its file.
///
/// # Safety
///
/// `stage` must be null or a live stage handle.
#[no_mangle]
pub unsafe extern "C" fn usdi_stage_save(stage: *const UsdiStage) -> bool {
    if stage.is_null() {
        return false;
    }
    guarded(false, || {
        let stage = unsafe { &*stage };
        match lock(&stage.stage).save() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Cannot save stage: {}", e);
                false
            }
        }
    })
}

/// Take a handle to the prim at `path`. Returns null if there is no such
/// prim; release with `usdi_prim_release`.
///
/// # Safety
///
/// `stage` must be null or a live stage handle; `path` must be null or a
/// valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_stage_prim(stage: *const UsdiStage, path: *const c_char) -> *mut UsdiPrim {
    if stage.is_null() {
        return ptr::null_mut();
    }
    let Some(path) = (unsafe { required_str(path) }) else {
        return ptr::null_mut();
    };
    guarded(ptr::null_mut(), || {
        let stage = unsafe { &*stage };
        if lock(&stage.stage).prim_at_path(path).is_none() {
            return ptr::null_mut();
        }
        Box::into_raw(Box::new(UsdiPrim {
            stage: Arc::clone(&stage.stage),
            path: path.to_string(),
        }))
    })
}

/// Release a prim handle.
///
/// # Safety
///
/// `prim` must be null or a handle from `usdi_stage_prim` that has not been
/// released.
#[no_mangle]
pub unsafe extern "C" fn usdi_prim_release(prim: *mut UsdiPrim) {
    if prim.is_null() {
        return;
    }
    guarded((), || {
        // SAFETY: caller guarantees `prim` came from usdi_stage_prim.
        drop(unsafe { Box::from_raw(prim) });
    })
}

/// Add a reference at the front of the prim's prepended references (the
/// strongest position). `target` may be null or empty for the asset's
/// default prim; `asset` may be null or empty for a prim of the same stage,
/// but not both.
///
/// Returns false if the prim is gone or the edit is rejected.
///
/// # Safety
///
/// `prim` must be null or a live prim handle; `asset` and `target` must be
/// null or valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn usdi_prim_add_reference(prim: *const UsdiPrim, asset: *const c_char, target: *const c_char) -> bool {
    if prim.is_null() {
        return false;
    }
    let (Some(asset), Some(target)) = (unsafe { optional_str(asset) }, unsafe { optional_str(target) }) else {
        return false;
    };
    guarded(false, || {
        let prim = unsafe { &*prim };
        let result = lock(&prim.stage).add_reference(
            &prim.path,
            Reference::new(asset, target),
            ListPosition::FrontOfPrependList,
        );
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Cannot add reference to {}: {}", prim.path, e);
                false
            }
        }
    })
}

/// Remove the reference exactly matching `asset` and `target` from a prim.
///
/// # Safety
///
/// As for `usdi_prim_add_reference`.
#[no_mangle]
pub unsafe extern "C" fn usdi_prim_remove_reference(
    prim: *const UsdiPrim,
    asset: *const c_char,
    target: *const c_char,
) -> bool {
    if prim.is_null() {
        return false;
    }
    let (Some(asset), Some(target)) = (unsafe { optional_str(asset) }, unsafe { optional_str(target) }) else {
        return false;
    };
    guarded(false, || {
        let prim = unsafe { &*prim };
        let result = lock(&prim.stage).remove_reference(&prim.path, &Reference::new(asset, target));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Cannot remove reference from {}: {}", prim.path, e);
                false
            }
        }
    })
}

/// Read an attribute's default-time value into `out`. Returns false (and
/// leaves `out` untouched) when the prim or attribute is missing or has no
/// default value. Free both strings in `out` with `usdi_free_string`.
///
/// # Safety
///
/// `prim` must be null or a live prim handle, `name` null or a valid
/// NUL-terminated string, and `out` null or writable.
#[no_mangle]
pub unsafe extern "C" fn usdi_prim_get_attribute(
    prim: *const UsdiPrim,
    name: *const c_char,
    out: *mut UsdiAttributeValue,
) -> bool {
    if prim.is_null() || out.is_null() {
        return false;
    }
    let Some(name) = (unsafe { required_str(name) }) else {
        return false;
    };
    guarded(false, || {
        let prim = unsafe { &*prim };
        let stage = lock(&prim.stage);
        let Some(attribute) = stage.prim_at_path(&prim.path).and_then(|p| p.attribute(name)) else {
            return false;
        };
        let Some(value) = attribute.get() else {
            return false;
        };

        let text = match value {
            Value::String(s) | Value::Ident(s) => s.clone(),
            other => other.to_string(),
        };
        let type_name = into_c_string(attribute.type_name().to_string());
        let value = into_c_string(text);
        if type_name.is_null() || value.is_null() {
            unsafe {
                usdi_free_string(type_name);
                usdi_free_string(value);
            }
            return false;
        }

        // SAFETY: `out` checked non-null above; caller guarantees it is writable.
        unsafe { out.write(UsdiAttributeValue { type_name, value }) };
        true
    })
}

// ---------------------------------------------------------------------------
// Dependency checking
// ---------------------------------------------------------------------------

/// Create a dependency context; release with `usdi_dependency_context_free`.
#[no_mangle]
pub extern "C" fn usdi_dependency_context_new() -> *mut UsdiDependencyContext {
    guarded(ptr::null_mut(), || {
        Box::into_raw(Box::new(UsdiDependencyContext {
            inner: DependencyContext::new(),
        }))
    })
}

/// Release a dependency context.
///
/// # Safety
///
/// `context` must be null or a context from `usdi_dependency_context_new`
/// that has not been freed.
#[no_mangle]
pub unsafe extern "C" fn usdi_dependency_context_free(context: *mut UsdiDependencyContext) {
    if context.is_null() {
        return;
    }
    guarded((), || {
        // SAFETY: caller guarantees `context` came from usdi_dependency_context_new.
        drop(unsafe { Box::from_raw(context) });
    })
}

/// Compute the dependencies of `path`, replacing the unresolved paths stored
/// in `context`.
///
/// Fails with a count of 0 for an empty path or an asset that cannot be
/// opened, and with a count of 1 (a single `internal error` entry) for any
/// other failure.
///
/// # Safety
///
/// `context` must be null or a live context not used from another thread
/// during the call; `path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn usdi_check_dependencies(
    context: *mut UsdiDependencyContext,
    path: *const c_char,
) -> UsdiDependencyCheckResult {
    if context.is_null() {
        return UsdiDependencyCheckResult::default();
    }
    let Some(path) = (unsafe { required_str(path) }) else {
        let context = unsafe { &mut *context };
        context.inner.clear();
        return UsdiDependencyCheckResult::default();
    };

    let checked = catch_unwind(AssertUnwindSafe(|| {
        let context = unsafe { &mut *context };
        context.inner.check(path)
    }));
    match checked {
        Ok(check) => UsdiDependencyCheckResult {
            success: check.success,
            unresolved_count: i32::try_from(check.unresolved_count).unwrap_or(i32::MAX),
        },
        Err(_) => {
            let context = unsafe { &mut *context };
            context.inner.record_failure("internal error: panic during dependency check");
            UsdiDependencyCheckResult {
                success: false,
                unresolved_count: 1,
            }
        }
    }
}

/// The unresolved path at `index` from the latest check, or `""` when the
/// index is out of range. Null only when `context` is null. Free the result
/// with `usdi_free_string`.
///
/// # Safety
///
/// `context` must be null or a live context.
#[no_mangle]
pub unsafe extern "C" fn usdi_unresolved_path(context: *const UsdiDependencyContext, index: i64) -> *mut c_char {
    if context.is_null() {
        return ptr::null_mut();
    }
    guarded(ptr::null_mut(), || {
        let context = unsafe { &*context };
        into_c_string(context.inner.unresolved_path(index).to_string())
    })
}

/// Forget the unresolved paths stored in `context`.
///
/// # Safety
///
/// `context` must be null or a live context.
#[no_mangle]
pub unsafe extern "C" fn usdi_clear_unresolved(context: *mut UsdiDependencyContext) {
    if context.is_null() {
        return;
    }
    guarded((), || {
        let context = unsafe { &mut *context };
        context.inner.clear();
    })
}
