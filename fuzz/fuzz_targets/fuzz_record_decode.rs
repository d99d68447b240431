#![no_main]
use ipalloc_rs::{AddressAllocator, AllocatorBuilder, MemoryStore, VersionedStore};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

// Arbitrary bytes stored under the key must never panic the allocator,
// and a record that fails to decode must never be overwritten
fuzz_target!(|input: &[u8]| {
    let store = Arc::new(MemoryStore::new());
    if store.create("/ranges/serviceips", input, None).is_err() {
        return;
    }

    let alloc = match AllocatorBuilder::new()
        .cidr("10.0.0.0/28")
        .max_attempts(1)
        .build(store.clone())
    {
        Ok(a) => a,
        Err(_) => return,
    };

    let readable = alloc.free().is_ok();
    let _ = alloc.has("10.0.0.3".parse().unwrap());
    let _ = alloc.allocate_next();
    let _ = alloc.release("10.0.0.1".parse().unwrap());

    if !readable {
        let stored = store.get("/ranges/serviceips").unwrap().unwrap();
        assert_eq!(stored.value, input);
    }
});
