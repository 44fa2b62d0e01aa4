//! Scope lifecycle end to end: isolation, ending, disposal ordering.

use std::sync::{Arc, Mutex};

use blueprint_di::{Concrete, Container, DiError, Lifetime, Profile, RecordingSink};

struct RequestContext {
    id: u64,
}

fn counter_factory() -> Concrete {
    use std::sync::atomic::{AtomicU64, Ordering};
    static SEQ: AtomicU64 = AtomicU64::new(0);
    Concrete::factory_of(|_| {
        Ok(RequestContext {
            id: SEQ.fetch_add(1, Ordering::SeqCst),
        })
    })
}

#[test]
fn scoped_instances_are_isolated_per_scope() {
    let container = Container::new();
    container.scoped("request.ctx", counter_factory()).unwrap();

    let scope_a = container.begin_scope("request-a");
    let scope_b = container.begin_scope("request-b");

    let x = container
        .resolve_in_typed::<RequestContext>(&scope_a, "request.ctx")
        .unwrap();
    let y = container
        .resolve_in_typed::<RequestContext>(&scope_b, "request.ctx")
        .unwrap();
    assert_ne!(x.id, y.id);

    // Stable within a scope
    let x_again = container
        .resolve_in_typed::<RequestContext>(&scope_a, "request.ctx")
        .unwrap();
    assert!(Arc::ptr_eq(&x, &x_again));

    // Ended scope rejects further resolution
    container.end_scope(&scope_a).unwrap();
    let err = container.resolve_in(&scope_a, "request.ctx").unwrap_err();
    assert!(matches!(err, DiError::ScopeEnded { .. }));

    // The other scope is unaffected
    assert!(container.resolve_in(&scope_b, "request.ctx").is_ok());
}

#[test]
fn singletons_are_shared_across_scopes() {
    let container = Container::new();
    container
        .singleton("app.db", Concrete::factory_of(|_| Ok("db".to_string())))
        .unwrap();

    let scope_a = container.begin_scope("a");
    let scope_b = container.begin_scope("b");

    let from_a = container.resolve_in_typed::<String>(&scope_a, "app.db").unwrap();
    let from_b = container.resolve_in_typed::<String>(&scope_b, "app.db").unwrap();
    let from_root = container.resolve_typed::<String>("app.db").unwrap();

    assert!(Arc::ptr_eq(&from_a, &from_b));
    assert!(Arc::ptr_eq(&from_a, &from_root));
}

#[test]
fn dispose_hooks_run_in_reverse_insertion_order() {
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

    let container = Container::new();
    for (id, label) in [("conn", "conn"), ("tx", "tx"), ("cursor", "cursor")] {
        let order = Arc::clone(&order);
        container
            .bind(id, Concrete::factory_of(move |_| Ok(label.to_string())))
            .unwrap()
            .lifetime(Lifetime::Scoped)
            .on_dispose(move |_| {
                order.lock().unwrap().push(label);
                Ok(())
            })
            .register()
            .unwrap();
    }

    let scope = container.begin_scope("work");
    container.resolve_in(&scope, "conn").unwrap();
    container.resolve_in(&scope, "tx").unwrap();
    container.resolve_in(&scope, "cursor").unwrap();

    container.end_scope(&scope).unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["cursor", "tx", "conn"]);

    // Ending again is idempotent and does not re-run hooks
    container.end_scope(&scope).unwrap();
    assert_eq!(order.lock().unwrap().len(), 3);
}

#[test]
fn failing_dispose_hooks_are_aggregated() {
    let container = Container::new();
    container
        .bind("bad", Concrete::factory_of(|_| Ok(1u32)))
        .unwrap()
        .lifetime(Lifetime::Scoped)
        .on_dispose(|_| Err("socket already closed".to_string()))
        .register()
        .unwrap();
    container
        .bind("good", Concrete::factory_of(|_| Ok(2u32)))
        .unwrap()
        .lifetime(Lifetime::Scoped)
        .on_dispose(|_| Ok(()))
        .register()
        .unwrap();

    let scope = container.begin_scope("work");
    container.resolve_in(&scope, "bad").unwrap();
    container.resolve_in(&scope, "good").unwrap();

    match container.end_scope(&scope).unwrap_err() {
        DiError::ScopeEndErrors { errors } => {
            assert_eq!(errors.len(), 1);
            assert_eq!(errors[0].id, "bad");
            assert!(errors[0].message.contains("socket already closed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn flush_clears_scope_without_ending_it() {
    let container = Container::new();
    container.scoped("request.ctx", counter_factory()).unwrap();

    let scope = container.begin_scope("request");
    let first = container
        .resolve_in_typed::<RequestContext>(&scope, "request.ctx")
        .unwrap();

    container.scopes().flush_scope(&scope);

    // Same scope, fresh instance after the flush
    let second = container
        .resolve_in_typed::<RequestContext>(&scope, "request.ctx")
        .unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
}

#[test]
fn root_scope_cannot_be_ended() {
    let container = Container::new();
    let root = container.scopes().root().clone();
    assert!(matches!(
        container.end_scope(&root),
        Err(DiError::RootScopeEnd)
    ));
}

#[test]
fn scope_counters_flow_through_the_sink() {
    let sink = Arc::new(RecordingSink::new());
    let container =
        Container::with_profile_and_sink(Profile::development(), sink.clone()).unwrap();

    let scope = container.begin_scope("metered");
    container.end_scope(&scope).unwrap();
    container.end_scope(&scope).unwrap();

    assert_eq!(sink.count("scope.begin"), 1);
    assert_eq!(sink.count("scope.end"), 1);
}
