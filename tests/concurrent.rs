//! Contention behavior: construction locking and shared-state safety.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use blueprint_di::{Concrete, Container};

#[test]
fn contended_singleton_constructs_exactly_once() {
    const THREADS: usize = 16;

    let constructions = Arc::new(AtomicU32::new(0));
    let container = Container::new();
    {
        let constructions = Arc::clone(&constructions);
        container
            .singleton(
                "expensive",
                Concrete::factory_of(move |_| {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    // Widen the race window
                    thread::sleep(Duration::from_millis(25));
                    Ok("ready".to_string())
                }),
            )
            .unwrap();
    }

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let container = container.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                container.resolve_typed::<String>("expensive").unwrap()
            })
        })
        .collect();

    let results: Vec<Arc<String>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(constructions.load(Ordering::SeqCst), 1);
    for result in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], result));
    }
}

#[test]
fn contended_scoped_constructs_once_per_scope() {
    const THREADS_PER_SCOPE: usize = 8;

    let constructions = Arc::new(AtomicU32::new(0));
    let container = Container::new();
    {
        let constructions = Arc::clone(&constructions);
        container
            .scoped(
                "request.ctx",
                Concrete::factory_of(move |_| {
                    constructions.fetch_add(1, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(10));
                    Ok(0u32)
                }),
            )
            .unwrap();
    }

    let scope_a = container.begin_scope("a");
    let scope_b = container.begin_scope("b");

    let barrier = Arc::new(Barrier::new(THREADS_PER_SCOPE * 2));
    let mut handles = Vec::new();
    for scope in [&scope_a, &scope_b] {
        for _ in 0..THREADS_PER_SCOPE {
            let container = container.clone();
            let scope = scope.clone();
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                container.resolve_in(&scope, "request.ctx").unwrap();
            }));
        }
    }
    for handle in handles {
        handle.join().unwrap();
    }

    // One construction per scope, not per thread
    assert_eq!(constructions.load(Ordering::SeqCst), 2);
}

#[test]
fn transient_resolution_takes_no_locks() {
    const THREADS: usize = 8;

    let constructions = Arc::new(AtomicU32::new(0));
    let container = Container::new();
    {
        let constructions = Arc::clone(&constructions);
        container
            .transient(
                "job",
                Concrete::factory_of(move |_| {
                    Ok(constructions.fetch_add(1, Ordering::SeqCst))
                }),
            )
            .unwrap();
    }

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let container = container.clone();
            thread::spawn(move || container.resolve("job").unwrap())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(constructions.load(Ordering::SeqCst), THREADS as u32);
}

#[test]
fn concurrent_registration_and_resolution_before_sealing() {
    let container = Container::new();
    container
        .singleton("base", Concrete::factory_of(|_| Ok(1u32)))
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let container = container.clone();
            thread::spawn(move || {
                container
                    .singleton(
                        &format!("svc.{i}"),
                        Concrete::factory_of(move |_| Ok(i as u32)),
                    )
                    .unwrap();
                container.resolve(&format!("svc.{i}")).unwrap();
                container.resolve("base").unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(container.definitions().len(), 9);
}
