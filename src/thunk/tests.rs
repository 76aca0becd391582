use super::*;
use crate::marshal::bool_sentinel;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Barrier;
use std::thread;

fn synthesizer(max_arity: usize) -> ThunkSynthesizer {
    let options = ThunkOptions {
        check_alignment: true,
        catch_panics: true,
    };
    ThunkSynthesizer::new(Arc::new(HandleTable::new()), options, max_arity)
}

fn add_method() -> (MethodIdentity, ManagedMethod) {
    let identity = MethodIdentity::new_static("Math", "add")
        .param(ManagedType::I32)
        .param(ManagedType::I32)
        .returns(ManagedType::I32);
    let body = ManagedMethod::new(|inv| {
        let a: i32 = inv.arg(0)?;
        let b: i32 = inv.arg(1)?;
        Ok(ManagedValue::I32(a.wrapping_add(b)))
    });
    (identity, body)
}

fn int_slot(v: i32) -> *mut c_void {
    crate::marshal::Scalar::into_slot(v)
}

#[test]
fn test_specialized_and_generic_agree() {
    let synth = synthesizer(16);
    let (identity, body) = add_method();
    let thunk = synth.synthesize(&identity, &body).unwrap();
    assert_eq!(thunk.arity(), 2);

    let mut params = [int_slot(3), int_slot(4)];
    let fast = unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    let slow = unsafe { thunk.call_generic(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert_eq!(fast as usize as i32, 7);
    assert_eq!(fast, slow);

    let mut params = [int_slot(-10), int_slot(4)];
    let negative = unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert_eq!(negative as usize as i32, -6);
}

#[test]
fn test_by_ref_slot_is_written_back() {
    let synth = synthesizer(16);
    let identity = MethodIdentity::new_static("Counter", "bump").param_ref(ManagedType::I32);
    let body = ManagedMethod::new(|inv| {
        let v: i32 = inv.arg(0)?;
        inv.set_arg(0, v + 1)?;
        Ok(ManagedValue::Void)
    });
    let thunk = synth.synthesize(&identity, &body).unwrap();

    let mut cell = 42i32;
    let mut params = [ptr::addr_of_mut!(cell).cast::<c_void>()];
    let ret = unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert!(ret.is_null());
    assert_eq!(cell, 43);

    unsafe { thunk.call_generic(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert_eq!(cell, 44);
}

#[test]
fn test_by_value_slot_has_no_write_back() {
    let synth = synthesizer(16);
    let identity = MethodIdentity::new_static("T", "f")
        .param(ManagedType::Bool)
        .param_ref(ManagedType::F64);
    let thunk = synth.synthesize(&identity, &ManagedMethod::new(|_| Ok(ManagedValue::Void))).unwrap();
    assert!(thunk.slots[0].write_back.is_none());
    assert!(thunk.slots[1].write_back.is_some());
    assert!(thunk.ret.is_none());

    let mut d = 1.5f64;
    let mut params = [bool_sentinel(true), ptr::addr_of_mut!(d).cast::<c_void>()];
    unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert_eq!(d, 1.5);
}

#[test]
fn test_unsupported_shapes_rejected() {
    let synth = synthesizer(16);
    let body = ManagedMethod::new(|_| Ok(ManagedValue::Void));

    let by_value_struct = MethodIdentity::new_static("Physics", "step").param(ManagedType::ValueType("Vector3".into()));
    let err = synth.synthesize(&by_value_struct, &body).unwrap_err();
    assert!(matches!(&err, BridgeError::UnsupportedSignature { reason, .. } if reason.contains("Vector3")));

    let nested_return = MethodIdentity::new_static("Grid", "cells")
        .returns(ManagedType::array_of(ManagedType::array_of(ManagedType::I32)));
    assert!(matches!(
        synth.synthesize(&nested_return, &body),
        Err(BridgeError::UnsupportedSignature { .. })
    ));
    assert_eq!(synth.synthesis_count(), 0);
}

#[test]
fn test_arity_limit() {
    let synth = synthesizer(2);
    let body = ManagedMethod::new(|_| Ok(ManagedValue::Void));
    let three = MethodIdentity::new_static("T", "f")
        .param(ManagedType::I8)
        .param(ManagedType::I8)
        .param(ManagedType::I8);
    assert!(matches!(
        synth.synthesize(&three, &body),
        Err(BridgeError::UnsupportedSignature { .. })
    ));
    assert_eq!(synth.max_arity(), 2);
}

#[test]
fn test_wide_arity() {
    let synth = synthesizer(16);
    let mut identity = MethodIdentity::new_static("Stats", "sum").returns(ManagedType::I64);
    for _ in 0..12 {
        identity = identity.param(ManagedType::I64);
    }
    let body = ManagedMethod::new(|inv| {
        let mut total = 0i64;
        for i in 0..inv.arg_count() {
            total += inv.arg::<i64>(i)?;
        }
        Ok(total.into())
    });
    let thunk = synth.synthesize(&identity, &body).unwrap();
    let mut params: Vec<*mut c_void> = (1..=12i64).map(crate::marshal::Scalar::into_slot).collect();
    let ret = unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap();
    assert_eq!(ret as usize as i64, 78);
}

#[test]
fn test_null_params_with_arity() {
    let synth = synthesizer(16);
    let (identity, body) = add_method();
    let thunk = synth.synthesize(&identity, &body).unwrap();
    let err = unsafe { thunk.call(Handle::NULL, ptr::null_mut()) }.unwrap_err();
    assert!(matches!(
        err,
        BridgeError::Marshal { position: SlotPosition::Param(0), error: MarshalError::NullPointer }
    ));
}

#[test]
fn test_panic_becomes_fault() {
    let synth = synthesizer(16);
    let identity = MethodIdentity::new_static("T", "explode");
    let body = ManagedMethod::new(|_| panic!("kaboom"));
    let thunk = synth.synthesize(&identity, &body).unwrap();
    let err = unsafe { thunk.call(Handle::NULL, ptr::null_mut()) }.unwrap_err();
    assert!(matches!(err, BridgeError::ManagedFault(ref f) if f.message == "kaboom"));
}

#[test]
fn test_entry_point_contains_panics_when_not_caught() {
    let options = ThunkOptions {
        check_alignment: true,
        catch_panics: false,
    };
    let synth = ThunkSynthesizer::new(Arc::new(HandleTable::new()), options, 16);
    let identity = MethodIdentity::new_static("T", "explode").returns(ManagedType::I32);
    let thunk = synth.synthesize(&identity, &ManagedMethod::new(|_| panic!("kaboom"))).unwrap();

    let caught = panic::catch_unwind(AssertUnwindSafe(|| unsafe { thunk.call(Handle::NULL, ptr::null_mut()) }));
    assert!(caught.is_err());

    let ret = unsafe { (thunk.entry())(&thunk, 0, ptr::null_mut()) };
    assert!(ret.is_null());
    assert_eq!(crate::ffi::bridge_last_error(), -4);
}

#[test]
fn test_failed_write_back_commits_nothing() {
    let synth = synthesizer(16);
    let identity = MethodIdentity::new_static("Pair", "set")
        .param_ref(ManagedType::I32)
        .param_ref(ManagedType::I32);
    let body = ManagedMethod::new(|inv| {
        inv.set_arg(0, 99)?;
        inv.set_arg(1, 1.5f32)?;
        Ok(ManagedValue::Void)
    });
    let thunk = synth.synthesize(&identity, &body).unwrap();

    let (mut a, mut b) = (1i32, 2i32);
    let mut params = [ptr::addr_of_mut!(a).cast::<c_void>(), ptr::addr_of_mut!(b).cast::<c_void>()];
    let err = unsafe { thunk.call(Handle::NULL, params.as_mut_ptr()) }.unwrap_err();
    assert!(matches!(err, BridgeError::Marshal { position: SlotPosition::Param(1), .. }));
    assert_eq!((a, b), (1, 2));

    let err = unsafe { thunk.call_generic(Handle::NULL, params.as_mut_ptr()) }.unwrap_err();
    assert!(matches!(err, BridgeError::Marshal { position: SlotPosition::Param(1), .. }));
    assert_eq!((a, b), (1, 2));
}

#[test]
fn test_cache_single_flight() {
    let synth = Arc::new(synthesizer(16));
    let cache = Arc::new(ThunkCache::new());
    let (identity, body) = add_method();
    let barrier = Arc::new(Barrier::new(8));
    let calls = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let (synth, cache, barrier, calls) = (synth.clone(), cache.clone(), barrier.clone(), calls.clone());
            let (identity, body) = (identity.clone(), body.clone());
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_create(&identity, || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(20));
                        synth.synthesize(&identity, &body)
                    })
                    .unwrap()
            })
        })
        .collect();

    let thunks: Vec<Arc<Thunk>> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(synth.synthesis_count(), 1);
    assert!(thunks.iter().all(|t| Arc::ptr_eq(t, &thunks[0])));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_cache_failure_leaves_no_entry() {
    let synth = synthesizer(16);
    let cache = ThunkCache::new();
    let identity = MethodIdentity::new_static("T", "bad").param(ManagedType::ValueType("S".into()));
    let body = ManagedMethod::new(|_| Ok(ManagedValue::Void));

    for _ in 0..2 {
        let result = cache.get_or_create(&identity, || synth.synthesize(&identity, &body));
        assert!(matches!(result, Err(BridgeError::UnsupportedSignature { .. })));
        assert!(!cache.contains(&identity));
    }
    assert!(cache.is_empty());
}

#[test]
fn test_entry_point_reports_errors() {
    let synth = synthesizer(16);
    let (identity, body) = add_method();
    let thunk = synth.synthesize(&identity, &body).unwrap();
    let entry = thunk.entry();

    let mut params = [int_slot(20), int_slot(22)];
    let ret = unsafe { entry(&thunk, 0, params.as_mut_ptr()) };
    assert_eq!(ret as usize as i32, 42);
    assert_eq!(crate::ffi::bridge_last_error(), 0);

    let ret = unsafe { entry(&thunk, 0, ptr::null_mut()) };
    assert!(ret.is_null());
    assert_eq!(crate::ffi::bridge_last_error(), BridgeError::Marshal {
        position: SlotPosition::Param(0),
        error: MarshalError::NullPointer,
    }
    .error_code());
}
