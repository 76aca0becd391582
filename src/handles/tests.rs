use super::*;
use std::sync::Arc;
use std::thread;

fn object(name: &str) -> ObjectRef {
    ObjectRef::new(name, ())
}

#[test]
fn test_handle_layout() {
    let h = Handle::compose(0, 0, Retention::Strong);
    assert_eq!(h.into_raw(), 0b10);
    assert!(!h.is_null());
    assert!(!h.is_weak());

    let w = Handle::compose(4, 3, Retention::Weak);
    assert!(w.is_weak());
    assert_eq!(w.index(), Some(4));
    assert_eq!(w.generation(), 3);
    assert_eq!(w.retention(), Retention::Weak);

    assert!(Handle::NULL.is_null());
    assert_eq!(Handle::NULL.index(), None);
}

#[test]
fn test_strong_acquire_resolve_release() {
    let table = HandleTable::new();
    let obj = object("Actor");
    let h = table.acquire(obj.clone(), Retention::Strong);

    assert!(table.resolve(h).is_some_and(|o| o.ptr_eq(&obj)));
    assert_eq!(table.mode_of(h), Some(Retention::Strong));
    assert_eq!(table.len(), 1);

    assert!(table.release(h));
    assert!(table.resolve(h).is_none());
    assert!(!table.release(h));
    assert_eq!(table.mode_of(h), None);
    assert!(table.is_empty());
}

#[test]
fn test_strong_handle_keeps_object_alive() {
    let table = HandleTable::new();
    let obj = object("Actor");
    let weak = obj.downgrade();
    let h = table.acquire(obj, Retention::Strong);

    assert!(weak.upgrade().is_some());
    table.release(h);
    assert!(weak.upgrade().is_none());
}

#[test]
fn test_weak_handle_observes_collection() {
    let table = HandleTable::new();
    let obj = object("Actor");
    let h = table.acquire(obj.clone(), Retention::Weak);
    assert!(h.is_weak());
    assert!(table.is_alive(h));

    drop(obj);
    assert!(!table.is_alive(h));
    assert!(table.resolve(h).is_none());
    // slot stays occupied until purged
    assert_eq!(table.len(), 1);
    assert_eq!(table.purge_collected(), 1);
    assert!(table.is_empty());
}

#[test]
fn test_collected_weak_slots_are_reclaimed_before_growing() {
    let table = HandleTable::new();
    for _ in 0..1000 {
        let obj = object("Transient");
        let h = table.acquire_weak_reusing(&obj);
        assert!(table.is_alive(h));
    }

    let stats = table.stats();
    assert!(stats.capacity <= 8, "{:?}", stats);
    assert!(table.len() <= stats.capacity);
    let remaining = table.len();
    assert_eq!(stats.released + remaining as u64, 1000);
    assert_eq!(table.purge_collected(), remaining);
    assert!(table.is_empty());
}

#[test]
fn test_reuse_lookup_reclaims_dead_entry() {
    let table = HandleTable::with_capacity(16);
    let first = object("A");
    let stale = table.acquire_weak_reusing(&first);
    drop(first);

    let second = object("A");
    let fresh = table.acquire_weak_reusing(&second);
    assert_ne!(fresh, stale);
    assert!(table.resolve(fresh).is_some_and(|o| o.ptr_eq(&second)));
    // only when the allocator hands `second` the same address is the dead slot reclaimed early
    assert!(table.len() <= 2);
    assert!(!table.is_alive(stale));
}

#[test]
fn test_stale_token_never_resolves_to_new_object() {
    let table = HandleTable::new();
    let first = table.acquire(object("A"), Retention::Strong);
    table.release(first);

    let second_obj = object("B");
    let second = table.acquire(second_obj.clone(), Retention::Strong);
    assert_eq!(first.index(), second.index());
    assert_ne!(first, second);
    assert!(table.resolve(first).is_none());
    assert!(table.resolve(second).is_some_and(|o| o.ptr_eq(&second_obj)));
}

#[test]
fn test_retention_tag_must_match() {
    let table = HandleTable::new();
    let obj = object("A");
    let strong = table.acquire(obj, Retention::Strong);
    let forged = Handle::from_raw(strong.into_raw() | 1);
    assert!(table.resolve(forged).is_none());
    assert!(!table.release(forged));
    assert!(table.resolve(strong).is_some());
}

#[test]
fn test_garbage_tokens() {
    let table = HandleTable::new();
    assert!(table.resolve(Handle::NULL).is_none());
    assert!(table.resolve(Handle::from_raw(0xdead_beef_0000_0040)).is_none());
    assert!(!table.release(Handle::from_raw(usize::MAX)));
}

#[test]
fn test_weak_reuse() {
    let table = HandleTable::new();
    let obj = object("A");
    let a = table.acquire_weak_reusing(&obj);
    let b = table.acquire_weak_reusing(&obj);
    assert_eq!(a, b);
    assert_eq!(table.len(), 1);

    let other = object("A");
    assert_ne!(table.acquire_weak_reusing(&other), a);

    table.release(a);
    let c = table.acquire_weak_reusing(&obj);
    assert_ne!(c, a);
    assert!(table.resolve(c).is_some());
}

#[test]
fn test_promote() {
    let table = HandleTable::new();
    let obj = object("A");
    let weak = table.acquire(obj.clone(), Retention::Weak);
    let strong = table.promote(weak).unwrap();
    assert_eq!(strong.retention(), Retention::Strong);

    drop(obj);
    assert!(table.is_alive(weak));
    table.release(strong);
    assert!(!table.is_alive(weak));
    assert!(table.promote(weak).is_none());
}

#[test]
fn test_stats() {
    let table = HandleTable::with_capacity(8);
    let obj = object("A");
    let s = table.acquire(obj.clone(), Retention::Strong);
    table.acquire(obj, Retention::Weak);
    table.release(s);

    let stats = table.stats();
    assert_eq!(stats.strong, 0);
    assert_eq!(stats.weak, 1);
    assert_eq!(stats.capacity, 2);
    assert_eq!(stats.acquired, 2);
    assert_eq!(stats.released, 1);
}

#[test]
fn test_concurrent_acquire_release() {
    let table = Arc::new(HandleTable::new());
    let workers: Vec<_> = (0..8)
        .map(|_| {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..500 {
                    let obj = object("A");
                    let h = table.acquire(obj.clone(), Retention::Strong);
                    assert!(table.resolve(h).is_some_and(|o| o.ptr_eq(&obj)));
                    assert!(table.release(h));
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    assert!(table.is_empty());
    assert_eq!(table.stats().acquired, 4000);
}
