//! C ABI for embedding netsieve in a non-Rust browser shell
//!
//! The engine is handed out as an opaque pointer. Every query entry point
//! fails open: a null handle, a null string or invalid UTF-8 yields "allow".

use std::ffi::CStr;
use std::os::raw::{c_char, c_int, c_longlong};

use log::error;

use crate::config::CacheConfig;
use crate::engine::FilterEngine;
use crate::matcher::{MatchContext, ResourceKind};

/// Borrow a C string as `&str`; `None` for null or invalid UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
unsafe fn borrow_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Create an engine with no rules.
///
/// A `cache_capacity` of 0 selects the default capacity. Release the handle
/// with [`netsieve_engine_free`].
#[no_mangle]
pub extern "C" fn netsieve_engine_new(cache_capacity: usize) -> *mut FilterEngine {
    let cache = if cache_capacity == 0 {
        CacheConfig::default()
    } else {
        CacheConfig {
            capacity: cache_capacity,
        }
    };
    Box::into_raw(Box::new(FilterEngine::new(&cache)))
}

/// Destroy an engine created by [`netsieve_engine_new`].
///
/// # Safety
///
/// `engine` must be null or a handle from [`netsieve_engine_new`] that has
/// not been freed, and no other thread may be using it.
#[no_mangle]
pub unsafe extern "C" fn netsieve_engine_free(engine: *mut FilterEngine) {
    if !engine.is_null() {
        drop(unsafe { Box::from_raw(engine) });
    }
}

/// Replace the engine's rules with those of the file at `path`.
///
/// Returns the new rule count, or -1 for a null handle or unusable path. An
/// unreadable file installs an empty rule set and returns 0.
///
/// # Safety
///
/// `engine` must be a live handle; `path` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn netsieve_engine_load_file(engine: *const FilterEngine, path: *const c_char) -> c_longlong {
    let Some(engine) = (unsafe { engine.as_ref() }) else {
        return -1;
    };
    let Some(path) = (unsafe { borrow_str(path) }) else {
        error!("netsieve_engine_load_file: path is null or not UTF-8");
        return -1;
    };
    engine.load([path]) as c_longlong
}

/// Replace the engine's rules with newline-separated filter `text`.
///
/// Returns the new rule count, or -1 for a null handle or unusable text.
///
/// # Safety
///
/// `engine` must be a live handle; `text` must be null or NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn netsieve_engine_load_text(engine: *const FilterEngine, text: *const c_char) -> c_longlong {
    let Some(engine) = (unsafe { engine.as_ref() }) else {
        return -1;
    };
    let Some(text) = (unsafe { borrow_str(text) }) else {
        error!("netsieve_engine_load_text: text is null or not UTF-8");
        return -1;
    };
    let lines: Vec<&str> = text.lines().collect();
    engine.load_lines(&lines) as c_longlong
}

/// Returns 1 if the request must be blocked, 0 otherwise.
///
/// `document_url` and `resource_kind` may be null.
///
/// # Safety
///
/// `engine` must be null or a live handle; every string must be null or
/// NUL-terminated.
#[no_mangle]
pub unsafe extern "C" fn netsieve_should_block(
    engine: *const FilterEngine,
    request_url: *const c_char,
    document_url: *const c_char,
    resource_kind: *const c_char,
) -> c_int {
    let Some(engine) = (unsafe { engine.as_ref() }) else {
        return 0;
    };
    let Some(request_url) = (unsafe { borrow_str(request_url) }) else {
        return 0;
    };
    let document_url = unsafe { borrow_str(document_url) }.unwrap_or_default();
    let resource_kind = unsafe { borrow_str(resource_kind) }
        .and_then(|kind| kind.parse::<ResourceKind>().ok())
        .unwrap_or_default();

    let ctx = MatchContext::new(request_url)
        .with_document(document_url)
        .with_kind(resource_kind);
    c_int::from(engine.should_block(&ctx))
}

/// Drop every cached verdict.
///
/// # Safety
///
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn netsieve_clear_cache(engine: *const FilterEngine) {
    if let Some(engine) = unsafe { engine.as_ref() } {
        engine.clear_cache();
    }
}

/// Number of loaded rules; 0 for a null handle.
///
/// # Safety
///
/// `engine` must be null or a live handle.
#[no_mangle]
pub unsafe extern "C" fn netsieve_rule_count(engine: *const FilterEngine) -> usize {
    unsafe { engine.as_ref() }.map_or(0, FilterEngine::rule_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::ptr;
    use tempfile::TempDir;

    #[test]
    fn test_engine_lifecycle() {
        let engine = netsieve_engine_new(0);
        let rules = CString::new("! list\n||doubleclick.net^\n@@||doubleclick.net/safe^\n").unwrap();
        let blocked = CString::new("https://doubleclick.net/ad.js").unwrap();
        let safe = CString::new("https://doubleclick.net/safe/ok.js").unwrap();
        let kind = CString::new("script").unwrap();

        unsafe {
            assert_eq!(netsieve_engine_load_text(engine, rules.as_ptr()), 2);
            assert_eq!(netsieve_rule_count(engine), 2);
            assert_eq!(netsieve_should_block(engine, blocked.as_ptr(), ptr::null(), kind.as_ptr()), 1);
            assert_eq!(netsieve_should_block(engine, safe.as_ptr(), ptr::null(), ptr::null()), 0);
            netsieve_clear_cache(engine);
            assert_eq!(netsieve_should_block(engine, blocked.as_ptr(), ptr::null(), ptr::null()), 1);
            netsieve_engine_free(engine);
        }
    }

    #[test]
    fn test_load_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("filters.txt");
        std::fs::write(&path, "/ads.js\nadframe\n").unwrap();
        let path = CString::new(path.to_str().unwrap()).unwrap();
        let missing = CString::new(temp_dir.path().join("nope.txt").to_str().unwrap()).unwrap();

        let engine = netsieve_engine_new(16);
        unsafe {
            assert_eq!(netsieve_engine_load_file(engine, path.as_ptr()), 2);
            assert_eq!(netsieve_engine_load_file(engine, missing.as_ptr()), 0);
            assert_eq!(netsieve_engine_load_file(engine, ptr::null()), -1);
            netsieve_engine_free(engine);
        }
    }

    #[test]
    fn test_null_and_invalid_inputs_fail_open() {
        let url = CString::new("https://ads.example.com/").unwrap();
        let invalid = [0xffu8, 0xfe, 0x00];

        unsafe {
            assert_eq!(netsieve_should_block(ptr::null(), url.as_ptr(), ptr::null(), ptr::null()), 0);
            assert_eq!(netsieve_rule_count(ptr::null()), 0);
            assert_eq!(netsieve_engine_load_text(ptr::null(), url.as_ptr()), -1);
            netsieve_clear_cache(ptr::null());
            netsieve_engine_free(ptr::null_mut());

            let engine = netsieve_engine_new(0);
            let rules = CString::new("*").unwrap();
            netsieve_engine_load_text(engine, rules.as_ptr());
            assert_eq!(netsieve_should_block(engine, ptr::null(), ptr::null(), ptr::null()), 0);
            assert_eq!(
                netsieve_should_block(engine, invalid.as_ptr() as *const c_char, ptr::null(), ptr::null()),
                0
            );
            netsieve_engine_free(engine);
        }
    }
}
