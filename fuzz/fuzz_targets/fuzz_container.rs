#![no_main]

//! Fuzz target for basic container operations
//!
//! Drives registration, aliasing, tagging, scopes, and resolution with
//! arbitrary string ids. Nothing here may panic; every operation returns
//! a Result the harness is free to discard.

use arbitrary::Arbitrary;
use blueprint_di::{Concrete, Container};

use libfuzzer_sys::fuzz_target;

/// Operations to perform on the container
#[derive(Debug, Arbitrary)]
enum ContainerOp {
    BindInstance { id: String, value: u64 },
    BindTransient { id: String },
    BindScoped { id: String },
    Alias { alias: String, target: String },
    Tag { tag: String, id: String },
    Resolve { id: String },
    Tagged { tag: String },
    Has { id: String },
    Forget { id: String },
    ScopeRoundTrip { name: String, id: String },
    Seal,
}

fuzz_target!(|ops: Vec<ContainerOp>| {
    let container = Container::new();

    for op in ops {
        match op {
            ContainerOp::BindInstance { id, value } => {
                let _ = container.instance(&id, value);
            }
            ContainerOp::BindTransient { id } => {
                let _ = container.transient(&id, Concrete::factory_of(|_| Ok(0u8)));
            }
            ContainerOp::BindScoped { id } => {
                let _ = container.scoped(&id, Concrete::factory_of(|_| Ok(1u8)));
            }
            ContainerOp::Alias { alias, target } => {
                let _ = container.alias(&alias, &target);
            }
            ContainerOp::Tag { tag, id } => {
                let _ = container.tag(&tag, &[id.as_str()]);
            }
            ContainerOp::Resolve { id } => {
                let _ = container.resolve(&id);
            }
            ContainerOp::Tagged { tag } => {
                let _ = container.tagged(&tag);
            }
            ContainerOp::Has { id } => {
                let _ = container.has(&id);
            }
            ContainerOp::Forget { id } => {
                let _ = container.forget(&id);
            }
            ContainerOp::ScopeRoundTrip { name, id } => {
                let scope = container.begin_scope(&name);
                let _ = container.resolve_in(&scope, &id);
                let _ = container.end_scope(&scope);
                // Idempotent second end
                let _ = container.end_scope(&scope);
            }
            ContainerOp::Seal => {
                let _ = container.seal();
            }
        }
    }
});
