//! Concurrent allocators sharing one record

use ipalloc_rs::{
    AddressAllocator, AllocatorBuilder, AllocatorError, MemoryStore, PersistentAllocator,
    RetryPolicy, Version, Versioned, VersionedStore,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::{Arc, Barrier};
use std::time::Duration;

fn ip(s: &str) -> IpAddr {
    s.parse().unwrap()
}

type Hook = Box<dyn FnOnce() + Send>;

/// Store wrapper that runs a hook right before its first compare-and-swap,
/// letting a test slip another writer in between load and save
struct InterleavingStore {
    inner: Arc<MemoryStore>,
    hook: Mutex<Option<Hook>>,
}

impl InterleavingStore {
    fn new(inner: Arc<MemoryStore>) -> Self {
        InterleavingStore {
            inner,
            hook: Mutex::new(None),
        }
    }

    fn before_first_swap(&self, hook: impl FnOnce() + Send + 'static) {
        *self.hook.lock() = Some(Box::new(hook));
    }
}

impl VersionedStore for InterleavingStore {
    fn get(&self, key: &str) -> ipalloc_rs::Result<Option<Versioned<Vec<u8>>>> {
        self.inner.get(key)
    }

    fn create(
        &self,
        key: &str,
        data: &[u8],
        ttl: Option<Duration>,
    ) -> ipalloc_rs::Result<Version> {
        self.inner.create(key, data, ttl)
    }

    fn compare_and_swap(
        &self,
        key: &str,
        data: &[u8],
        expected: Version,
    ) -> ipalloc_rs::Result<Version> {
        let hook = self.hook.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.compare_and_swap(key, data, expected)
    }
}

fn allocator<S: VersionedStore + ?Sized>(store: Arc<S>) -> PersistentAllocator<S> {
    AllocatorBuilder::new()
        .cidr("192.168.1.0/24")
        .retry(RetryPolicy {
            max_attempts: 1000,
            initial_backoff_ms: 0,
            max_backoff_ms: 2,
        })
        .build(store)
        .unwrap()
}

#[test]
fn test_same_address_race_loser_sees_already_allocated() {
    let shared = Arc::new(MemoryStore::new());
    let winner = Arc::new(allocator(shared.clone()));
    winner.records().seed().unwrap();

    let interleaving = Arc::new(InterleavingStore::new(shared.clone()));
    let loser = allocator(interleaving.clone());

    let w = winner.clone();
    interleaving.before_first_swap(move || {
        w.allocate(ip("192.168.1.2")).unwrap();
    });

    // Loser read the record before the winner committed, so its first save
    // conflicts; the retry reloads and finds the address taken
    assert!(matches!(
        loser.allocate(ip("192.168.1.2")),
        Err(AllocatorError::AlreadyAllocated { .. })
    ));
    assert_eq!(loser.stats().conflicts(), 1);
    assert_eq!(loser.stats().commits(), 0);
    assert_eq!(winner.used().unwrap(), 1);
}

#[test]
fn test_different_address_race_both_commit() {
    let shared = Arc::new(MemoryStore::new());
    let other = Arc::new(allocator(shared.clone()));
    other.records().seed().unwrap();

    let interleaving = Arc::new(InterleavingStore::new(shared.clone()));
    let retried = allocator(interleaving.clone());

    let o = other.clone();
    interleaving.before_first_swap(move || {
        o.allocate(ip("192.168.1.3")).unwrap();
    });

    retried.allocate(ip("192.168.1.2")).unwrap();
    assert_eq!(retried.stats().conflicts(), 1);
    assert_eq!(retried.stats().commits(), 1);

    // The retry did not clobber the concurrent write
    assert!(other.has(ip("192.168.1.2")).unwrap());
    assert!(other.has(ip("192.168.1.3")).unwrap());
}

#[test]
fn test_release_race_keeps_concurrent_allocation() {
    let shared = Arc::new(MemoryStore::new());
    let other = Arc::new(allocator(shared.clone()));
    other.records().seed().unwrap();
    other.allocate(ip("192.168.1.10")).unwrap();

    let interleaving = Arc::new(InterleavingStore::new(shared.clone()));
    let releaser = allocator(interleaving.clone());

    let o = other.clone();
    interleaving.before_first_swap(move || {
        o.allocate(ip("192.168.1.11")).unwrap();
    });

    releaser.release(ip("192.168.1.10")).unwrap();
    assert!(!other.has(ip("192.168.1.10")).unwrap());
    assert!(other.has(ip("192.168.1.11")).unwrap());
}

#[test]
fn test_threads_racing_for_one_address() {
    let store = Arc::new(MemoryStore::new());
    let seed = allocator(store.clone());
    seed.records().seed().unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = store.clone();
            let barrier = barrier.clone();
            std::thread::spawn(move || {
                let alloc = allocator(store);
                barrier.wait();
                alloc.allocate(ip("192.168.1.2"))
            })
        })
        .collect();

    let mut successes = 0;
    for h in handles {
        match h.join().unwrap() {
            Ok(()) => successes += 1,
            Err(AllocatorError::AlreadyAllocated { .. }) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(seed.used().unwrap(), 1);
}

#[test]
fn test_threads_allocate_next_distinct() {
    let store = Arc::new(MemoryStore::new());
    let seed = allocator(store.clone());
    seed.records().seed().unwrap();

    let threads = 8;
    let per_thread = 30;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                let alloc = allocator(store);
                (0..per_thread)
                    .map(|_| alloc.allocate_next().unwrap())
                    .collect::<Vec<_>>()
            })
        })
        .collect();

    let mut all = HashSet::new();
    for h in handles {
        for address in h.join().unwrap() {
            assert!(all.insert(address), "address {} handed out twice", address);
        }
    }

    assert_eq!(all.len(), threads * per_thread);
    assert_eq!(seed.used().unwrap(), threads * per_thread);
    assert_eq!(seed.free().unwrap(), 254 - threads * per_thread);
}

#[test]
fn test_exhaustion_under_contention() {
    let store = Arc::new(MemoryStore::new());
    let seed = AllocatorBuilder::new()
        .cidr("10.0.0.0/28")
        .max_attempts(1000)
        .build(store.clone())
        .unwrap();
    seed.records().seed().unwrap();

    let handles: Vec<_> = (0..6)
        .map(|_| {
            let store = store.clone();
            std::thread::spawn(move || {
                let alloc = AllocatorBuilder::new()
                    .cidr("10.0.0.0/28")
                    .max_attempts(1000)
                    .build(store)
                    .unwrap();
                let mut mine = Vec::new();
                loop {
                    match alloc.allocate_next() {
                        Ok(address) => mine.push(address),
                        Err(AllocatorError::Exhausted { .. }) => break,
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
                mine
            })
        })
        .collect();

    let mut all = HashSet::new();
    for h in handles {
        for address in h.join().unwrap() {
            assert!(all.insert(address));
        }
    }
    assert_eq!(all.len(), 14);
}

#[test]
fn test_mixed_allocate_release_keeps_count() {
    let store = Arc::new(MemoryStore::new());
    let seed = allocator(store.clone());
    seed.records().seed().unwrap();

    // Each thread owns a disjoint block of addresses and churns it
    let handles: Vec<_> = (0..4u8)
        .map(|t| {
            let store = store.clone();
            std::thread::spawn(move || {
                let alloc = allocator(store);
                for round in 0..10u8 {
                    for i in 0..10u8 {
                        let address = ip(&format!("192.168.1.{}", 1 + t * 10 + i));
                        if round % 2 == 0 {
                            alloc.allocate(address).unwrap();
                        } else {
                            alloc.release(address).unwrap();
                        }
                    }
                }
                // Even number of rounds ends released; leave one held
                alloc.allocate(ip(&format!("192.168.1.{}", 1 + t * 10))).unwrap();
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(seed.used().unwrap(), 4);
}
