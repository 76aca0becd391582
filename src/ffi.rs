//! C ABI over a process-wide bridge
//!
//! Every entry point reports failure through its return value (null, zero
//! or `false`) and records the error in thread-local state readable with
//! `bridge_last_error` / `bridge_last_error_message`. Success clears it.

use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::info;

use crate::config::BridgeConfig;
use crate::dispatch::Bridge;
use crate::error::{BridgeError, ManagedFault, MarshalError, SlotPosition};
use crate::handles::Handle;
use crate::logging::{self, LogConfig};
use crate::marshal::{bool_sentinel, free_c_string};
use crate::registry::MethodToken;
use crate::thunk::{Thunk, ThunkEntry};

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

thread_local! {
    static LAST_ERROR: RefCell<Option<(i32, String)>> = const { RefCell::new(None) };
}

/// Install `bridge` as the process-wide instance
pub fn install(bridge: Bridge) -> Result<&'static Bridge, BridgeError> {
    BRIDGE
        .set(bridge)
        .map_err(|_| BridgeError::Config("bridge is already initialized".to_string()))?;
    info!(target: "ffi", "bridge installed");
    global()
}

/// The process-wide bridge
pub fn global() -> Result<&'static Bridge, BridgeError> {
    BRIDGE.get().ok_or(BridgeError::NotInitialized)
}

/// Error recorded by the last failing entry point on this thread
pub fn last_error() -> Option<(i32, String)> {
    LAST_ERROR.with(|cell| cell.borrow().clone())
}

pub(crate) fn record_error(error: &BridgeError) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some((error.error_code(), error.to_string())));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Run a call at the C boundary, record its outcome and flatten it to a slot
///
/// A panic never unwinds past this point; it is reported as a managed fault.
pub(crate) fn complete(call: impl FnOnce() -> Result<*mut c_void, BridgeError>) -> *mut c_void {
    let result = panic::catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(BridgeError::ManagedFault(ManagedFault::from_panic(payload))));
    match result {
        Ok(value) => {
            clear_error();
            value
        }
        Err(error) => {
            record_error(&error);
            ptr::null_mut()
        }
    }
}

fn fail(function: &str, error: BridgeError) -> i32 {
    let code = error.error_code();
    logging::log_ffi_error(function, code, &error);
    record_error(&error);
    code
}

/// Create the process-wide bridge and start logging
///
/// `config_path` may be null, in which case configuration comes from
/// `BRIDGE_CONFIG` and the environment. Returns 0 on success, including
/// when the bridge already exists, or a negative error code.
///
/// # Safety
/// `config_path` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn bridge_init(config_path: *const c_char) -> i32 {
    if BRIDGE.get().is_some() {
        clear_error();
        return 0;
    }

    let config = if config_path.is_null() {
        BridgeConfig::load()
    } else {
        match CStr::from_ptr(config_path).to_str() {
            Ok(path) => BridgeConfig::from_file(path).and_then(BridgeConfig::with_env_overrides),
            Err(_) => Err(BridgeError::Config("config path is not valid UTF-8".to_string())),
        }
    };
    let config = match config {
        Ok(config) => config,
        Err(error) => return fail("bridge_init", error),
    };

    logging::init_with_config(LogConfig::from_settings(&config.logging).with_env_overrides());
    // Losing an init race to another thread is still a successful init
    let _ = install(Bridge::new(config));
    clear_error();
    0
}

/// Call a registered method through its specialized thunk
///
/// Returns the marshaled return slot; null for `void`, on failure, and for
/// results that legitimately encode as zero. Check `bridge_last_error`.
///
/// # Safety
/// `params` must point to one slot per declared parameter.
#[no_mangle]
pub unsafe extern "C" fn bridge_invoke(token: u64, instance: usize, params: *mut *mut c_void) -> *mut c_void {
    logging::log_ffi_call("bridge_invoke", token);
    complete(|| {
        global().and_then(|bridge| bridge.invoke(MethodToken::from_raw(token), Handle::from_raw(instance), params))
    })
}

/// Bind the specialized path of a method once
///
/// Writes the thunk pointer to `out_thunk` and returns the entry to call it
/// with. Thunks live for the rest of the process.
///
/// # Safety
/// `out_thunk` must be valid for a pointer write.
#[no_mangle]
pub unsafe extern "C" fn bridge_thunk_entry(token: u64, out_thunk: *mut *const Thunk) -> Option<ThunkEntry> {
    logging::log_ffi_call("bridge_thunk_entry", token);
    if out_thunk.is_null() {
        fail("bridge_thunk_entry", MarshalError::NullPointer.at(SlotPosition::Return));
        return None;
    }
    match global().and_then(|bridge| bridge.thunk(MethodToken::from_raw(token))) {
        Ok(thunk) => {
            let entry = thunk.entry();
            // The cache holds the thunk for the process lifetime
            out_thunk.write(Arc::as_ptr(&thunk));
            clear_error();
            Some(entry)
        }
        Err(error) => {
            fail("bridge_thunk_entry", error);
            None
        }
    }
}

/// Release a handle; `false` if it was not live
#[no_mangle]
pub extern "C" fn bridge_handle_release(handle: usize) -> bool {
    match global() {
        Ok(bridge) => {
            clear_error();
            bridge.handles().release(Handle::from_raw(handle))
        }
        Err(error) => {
            fail("bridge_handle_release", error);
            false
        }
    }
}

/// Whether a handle still resolves to a live object
#[no_mangle]
pub extern "C" fn bridge_handle_is_alive(handle: usize) -> bool {
    match global() {
        Ok(bridge) => {
            clear_error();
            bridge.handles().is_alive(Handle::from_raw(handle))
        }
        Err(error) => {
            fail("bridge_handle_is_alive", error);
            false
        }
    }
}

/// Strong handle for the object behind `handle`; 0 on failure
#[no_mangle]
pub extern "C" fn bridge_handle_promote(handle: usize) -> usize {
    let handle = Handle::from_raw(handle);
    let result = global().and_then(|bridge| {
        bridge
            .handles()
            .promote(handle)
            .ok_or(BridgeError::InvalidHandle { handle })
    });
    match result {
        Ok(promoted) => {
            clear_error();
            promoted.into_raw()
        }
        Err(error) => {
            fail("bridge_handle_promote", error);
            0
        }
    }
}

/// Free a string the bridge handed out
///
/// # Safety
/// `raw` must be null or a string returned by the bridge, not yet freed.
#[no_mangle]
pub unsafe extern "C" fn bridge_string_free(raw: *mut c_char) {
    free_c_string(raw);
}

/// Slot value for a by-value boolean
#[no_mangle]
pub extern "C" fn bridge_bool(value: bool) -> *mut c_void {
    bool_sentinel(value)
}

/// Code of the last error on this thread, 0 if the last call succeeded
#[no_mangle]
pub extern "C" fn bridge_last_error() -> i32 {
    LAST_ERROR.with(|cell| cell.borrow().as_ref().map_or(0, |(code, _)| *code))
}

/// Message of the last error on this thread, or null
///
/// The string is bridge-allocated; free it with `bridge_string_free`.
#[no_mangle]
pub extern "C" fn bridge_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow()
            .as_ref()
            .and_then(|(_, message)| CString::new(message.replace('\0', " ")).ok())
            .map_or(ptr::null_mut(), CString::into_raw)
    })
}
