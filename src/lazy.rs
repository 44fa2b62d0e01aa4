//! Deferred-resolution handles.
//!
//! A [`Lazy`] is trivially constructible: it holds the container and a
//! service id, and resolves on first real use. Later uses return the
//! first resolution's result.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::container::Container;
use crate::error::{DiError, Result};
use crate::id::{ServiceId, TypedKey};
use crate::model::Instance;

/// A handle that resolves its target on first use.
pub struct Lazy {
    container: Container,
    id: ServiceId,
    cell: OnceCell<Instance>,
}

impl Lazy {
    pub(crate) fn new(container: Container, id: ServiceId) -> Self {
        Self {
            container,
            id,
            cell: OnceCell::new(),
        }
    }

    /// The deferred target's id.
    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    /// Whether the target has been resolved yet.
    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Resolve the target, constructing it on the first call.
    pub fn get(&self) -> Result<Instance> {
        self.cell
            .get_or_try_init(|| self.container.resolve(self.id.as_str()))
            .map(Arc::clone)
    }
}

impl std::fmt::Debug for Lazy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("id", &self.id)
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// A typed [`Lazy`].
pub struct LazyTyped<T> {
    inner: Lazy,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> LazyTyped<T> {
    pub(crate) fn new(container: Container, key: TypedKey<T>) -> Self {
        Self {
            inner: Lazy::new(container, key.id().clone()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn id(&self) -> &ServiceId {
        self.inner.id()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.is_resolved()
    }

    /// Resolve and downcast the target.
    pub fn get(&self) -> Result<Arc<T>> {
        self.inner
            .get()?
            .downcast::<T>()
            .map_err(|_| DiError::type_mismatch::<T>())
    }
}

impl<T> std::fmt::Debug for LazyTyped<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "LazyTyped<{}>({:?}, resolved: {})",
            std::any::type_name::<T>(),
            self.inner.id(),
            self.inner.is_resolved()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::Concrete;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_lazy_defers_construction() {
        static BUILT: AtomicU32 = AtomicU32::new(0);

        let container = Container::new();
        container
            .singleton(
                "expensive",
                Concrete::factory_of(|_| {
                    BUILT.fetch_add(1, Ordering::SeqCst);
                    Ok(42u32)
                }),
            )
            .unwrap();

        let lazy = container.lazy("expensive").unwrap();
        assert!(!lazy.is_resolved());
        assert_eq!(BUILT.load(Ordering::SeqCst), 0);

        let value = lazy.get().unwrap().downcast::<u32>().unwrap();
        assert_eq!(*value, 42);
        assert!(lazy.is_resolved());
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);

        lazy.get().unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_lazy_typed() {
        let container = Container::new();
        container.instance("app.name", "blueprint".to_string()).unwrap();

        let key: TypedKey<String> = TypedKey::new("app.name").unwrap();
        let lazy = container.lazy_typed(&key);
        assert_eq!(lazy.get().unwrap().as_str(), "blueprint");
    }

    #[test]
    fn test_lazy_missing_binding_errors_on_use() {
        let container = Container::new();
        // Constructing the handle is fine; the failure surfaces on get()
        let lazy = container.lazy("ghost").unwrap();
        assert!(lazy.get().is_err());
        assert!(!lazy.is_resolved());
    }
}
