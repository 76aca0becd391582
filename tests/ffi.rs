use managed_bridge::ffi::{
    bridge_bool, bridge_handle_is_alive, bridge_handle_promote, bridge_handle_release, bridge_init,
    bridge_invoke, bridge_last_error, bridge_last_error_message, bridge_string_free, bridge_thunk_entry,
};
use managed_bridge::marshal::Scalar;
use managed_bridge::{
    bool_sentinel, Bridge, BridgeError, Handle, ManagedType, ManagedValue, MethodIdentity, MethodToken,
    ObjectRef, Retention, Thunk,
};
use std::ffi::{c_void, CStr};
use std::ptr;

fn bridge() -> &'static Bridge {
    assert_eq!(unsafe { bridge_init(ptr::null()) }, 0);
    managed_bridge::ffi::global().unwrap()
}

fn register_mul(bridge: &Bridge) -> u64 {
    bridge
        .register_fn(
            MethodIdentity::new_static("Ffi", "mul")
                .param(ManagedType::I32)
                .param(ManagedType::I32)
                .returns(ManagedType::I32),
            |inv| {
                let a: i32 = inv.arg(0)?;
                let b: i32 = inv.arg(1)?;
                Ok((a * b).into())
            },
        )
        .into_raw()
}

#[test]
fn test_init_is_idempotent() {
    let first = bridge() as *const Bridge;
    let second = bridge() as *const Bridge;
    assert_eq!(first, second);
    assert_eq!(bridge_last_error(), 0);
}

#[test]
fn test_invoke_through_c_abi() {
    let token = register_mul(bridge());
    let mut params = [6i32.into_slot(), 7i32.into_slot()];
    let ret = unsafe { bridge_invoke(token, 0, params.as_mut_ptr()) };
    assert_eq!(i32::from_slot(ret), 42);
    assert_eq!(bridge_last_error(), 0);
    assert!(bridge_last_error_message().is_null());
}

#[test]
fn test_unknown_token_sets_last_error() {
    bridge();
    let ret = unsafe { bridge_invoke(u64::MAX, 0, ptr::null_mut()) };
    assert!(ret.is_null());
    let expected = BridgeError::UnknownMethod { token: MethodToken::from_raw(u64::MAX) };
    assert_eq!(bridge_last_error(), expected.error_code());
    assert_eq!(bridge_last_error(), -5);

    let message = bridge_last_error_message();
    assert!(!message.is_null());
    let text = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
    unsafe { bridge_string_free(message) };
    assert!(text.contains("no method registered"), "{}", text);
}

#[test]
fn test_thunk_entry_binding() {
    let token = register_mul(bridge());
    let mut thunk: *const Thunk = ptr::null();
    let entry = unsafe { bridge_thunk_entry(token, &mut thunk) }.unwrap();
    assert!(!thunk.is_null());

    let mut params = [(-3i32).into_slot(), 5i32.into_slot()];
    let ret = unsafe { entry(thunk, 0, params.as_mut_ptr()) };
    assert_eq!(i32::from_slot(ret), -15);
    assert_eq!(bridge_last_error(), 0);

    let missing = unsafe { bridge_thunk_entry(token, ptr::null_mut()) };
    assert!(missing.is_none());
    assert_ne!(bridge_last_error(), 0);
}

#[test]
fn test_handle_lifecycle() {
    let bridge = bridge();
    let object = ObjectRef::new("Ffi", ());
    let weak = bridge.handles().acquire(object.clone(), Retention::Weak);
    assert!(bridge_handle_is_alive(weak.into_raw()));

    let strong = bridge_handle_promote(weak.into_raw());
    assert_ne!(strong, 0);
    assert!(!Handle::from_raw(strong).is_weak());

    drop(object);
    assert!(bridge_handle_is_alive(weak.into_raw()));
    assert!(bridge_handle_release(strong));
    assert!(!bridge_handle_is_alive(weak.into_raw()));
    assert!(!bridge_handle_release(strong));

    assert_eq!(bridge_handle_promote(weak.into_raw()), 0);
    assert_eq!(bridge_last_error(), -2);
}

#[test]
fn test_bool_sentinels_round_trip() {
    let bridge = bridge();
    let token = bridge
        .register_fn(
            MethodIdentity::new_static("Ffi", "not").param(ManagedType::Bool).returns(ManagedType::Bool),
            |inv| Ok(ManagedValue::Bool(!inv.arg::<bool>(0)?)),
        )
        .into_raw();

    assert_eq!(bridge_bool(true), bool_sentinel(true));
    let mut params = [bridge_bool(true)];
    let ret = unsafe { bridge_invoke(token, 0, params.as_mut_ptr()) };
    assert_eq!(ret, bool_sentinel(false));

    let mut params = [0x1234usize as *mut c_void];
    let ret = unsafe { bridge_invoke(token, 0, params.as_mut_ptr()) };
    assert!(ret.is_null());
    assert_eq!(bridge_last_error(), -3);
}

#[test]
fn test_is_alive_clears_last_error() {
    let bridge = bridge();
    assert_eq!(bridge_handle_promote(Handle::NULL.into_raw()), 0);
    assert_eq!(bridge_last_error(), -2);

    let handle = bridge.handles().acquire(ObjectRef::new("Ffi", ()), Retention::Strong);
    assert!(bridge_handle_is_alive(handle.into_raw()));
    assert_eq!(bridge_last_error(), 0);

    assert!(bridge_handle_release(handle.into_raw()));
    assert!(!bridge_handle_is_alive(handle.into_raw()));
    assert_eq!(bridge_last_error(), 0);
}

#[test]
fn test_panicking_body_reports_fault_through_c_abi() {
    let bridge = bridge();
    let token = bridge
        .register_fn(MethodIdentity::new_static("Ffi", "explode").returns(ManagedType::I32), |_| {
            panic!("native caller must not unwind")
        })
        .into_raw();

    let ret = unsafe { bridge_invoke(token, 0, ptr::null_mut()) };
    assert!(ret.is_null());
    assert_eq!(bridge_last_error(), -4);
}
