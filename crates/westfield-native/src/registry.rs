//! Resource-reference registry
//!
//! Keeps application-side values (callbacks, client handles) alive for
//! exactly as long as the bridge holds references to them. Each
//! [`Reference`] token stands for one strong count: [`Registry::acquire`]
//! mints another token and [`Registry::release`] consumes one. When the
//! last token is released the value is dropped and its finalizer runs.

use crate::error::RegistryError;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use tracing::trace;

type Finalizer = Box<dyn FnOnce()>;

/// One strong count on a registered value of type `T`.
///
/// Deliberately not `Clone`: a second count has to be acquired from the
/// registry. Dropping a token without releasing it leaks the value, which
/// shows up in [`Registry::stats`].
#[must_use = "a reference that is never released leaks its value"]
pub struct Reference<T: ?Sized + 'static> {
    id: u64,
    _marker: PhantomData<fn() -> Rc<T>>,
}

impl<T: ?Sized + 'static> Reference<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn new(id: u64) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T: ?Sized + 'static> fmt::Debug for Reference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", self.id)
    }
}

/// Created/freed counters for leak diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub created: u64,
    pub freed: u64,
}

impl RegistryStats {
    pub fn live(&self) -> u64 {
        self.created - self.freed
    }
}

struct Entry {
    // Always an `Rc<T>` for the `T` of the tokens minted for it
    value: Box<dyn Any>,
    strong: u32,
    finalizer: Option<Finalizer>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<u64, Entry>,
    next_id: u64,
    stats: RegistryStats,
}

/// Shared handle to a reference registry
#[derive(Clone, Default)]
pub struct Registry {
    inner: Rc<RefCell<Inner>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `value` with a strong count of one
    pub fn create_reference<T: ?Sized + 'static>(&self, value: Rc<T>) -> Reference<T> {
        self.insert(Box::new(value), None)
    }

    /// Register `value` with a strong count of one; `finalizer` runs after
    /// the value is dropped by the final release.
    pub fn create_reference_with_finalizer<T: ?Sized + 'static>(
        &self,
        value: Rc<T>,
        finalizer: impl FnOnce() + 'static,
    ) -> Reference<T> {
        self.insert(Box::new(value), Some(Box::new(finalizer)))
    }

    fn insert<T: ?Sized + 'static>(
        &self,
        value: Box<dyn Any>,
        finalizer: Option<Finalizer>,
    ) -> Reference<T> {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.entries.insert(
            id,
            Entry {
                value,
                strong: 1,
                finalizer,
            },
        );
        inner.stats.created += 1;
        trace!(reference = id, "Reference created");
        Reference::new(id)
    }

    /// Mint another strong count on the same value
    pub fn acquire<T: ?Sized + 'static>(
        &self,
        reference: &Reference<T>,
    ) -> Result<Reference<T>, RegistryError> {
        let mut inner = self.inner.borrow_mut();
        let entry = inner
            .entries
            .get_mut(&reference.id)
            .ok_or(RegistryError::Stale(reference.id))?;
        entry.strong = entry
            .strong
            .checked_add(1)
            .ok_or(RegistryError::CountOverflow(reference.id))?;
        Ok(Reference::new(reference.id))
    }

    /// Give back one strong count. The last release drops the value and
    /// then runs its finalizer, with the registry unborrowed so either may
    /// call back into it.
    pub fn release<T: ?Sized + 'static>(&self, reference: Reference<T>) -> Result<(), RegistryError> {
        let freed = {
            let mut inner = self.inner.borrow_mut();
            let entry = inner
                .entries
                .get_mut(&reference.id)
                .ok_or(RegistryError::Stale(reference.id))?;
            entry.strong -= 1;
            if entry.strong > 0 {
                return Ok(());
            }
            inner.stats.freed += 1;
            inner.entries.remove(&reference.id)
        };

        if let Some(Entry {
            value, finalizer, ..
        }) = freed
        {
            trace!(reference = reference.id, "Reference freed");
            drop(value);
            if let Some(finalizer) = finalizer {
                finalizer();
            }
        }
        Ok(())
    }

    /// Resolve a reference to its value
    pub fn get<T: ?Sized + 'static>(&self, reference: &Reference<T>) -> Result<Rc<T>, RegistryError> {
        let inner = self.inner.borrow();
        let entry = inner
            .entries
            .get(&reference.id)
            .ok_or(RegistryError::Stale(reference.id))?;
        entry
            .value
            .downcast_ref::<Rc<T>>()
            .cloned()
            .ok_or(RegistryError::TypeMismatch(reference.id))
    }

    pub fn strong_count<T: ?Sized + 'static>(
        &self,
        reference: &Reference<T>,
    ) -> Result<u32, RegistryError> {
        let inner = self.inner.borrow();
        inner
            .entries
            .get(&reference.id)
            .map(|entry| entry.strong)
            .ok_or(RegistryError::Stale(reference.id))
    }

    /// Number of values currently registered
    pub fn live_references(&self) -> usize {
        self.inner.borrow().entries.len()
    }

    pub fn stats(&self) -> RegistryStats {
        self.inner.borrow().stats
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.live_references())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    #[test]
    fn test_release_to_zero_drops_value_then_finalizes() {
        let registry = Registry::new();
        let log = Rc::new(RefCell::new(Vec::new()));

        struct Tracked(Rc<RefCell<Vec<&'static str>>>);
        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.borrow_mut().push("drop");
            }
        }

        let reference = {
            let log = Rc::clone(&log);
            registry.create_reference_with_finalizer(
                Rc::new(Tracked(Rc::clone(&log))),
                move || log.borrow_mut().push("finalize"),
            )
        };
        let second = registry.acquire(&reference).unwrap();
        assert_eq!(registry.strong_count(&reference).unwrap(), 2);

        registry.release(second).unwrap();
        assert!(log.borrow().is_empty());
        assert_eq!(registry.strong_count(&reference).unwrap(), 1);

        registry.release(reference).unwrap();
        assert_eq!(*log.borrow(), vec!["drop", "finalize"]);
        assert_eq!(registry.live_references(), 0);
        assert_eq!(registry.stats(), RegistryStats { created: 1, freed: 1 });
    }

    #[test]
    fn test_stale_reference() {
        let registry = Registry::new();
        let reference = registry.create_reference(Rc::new(5u32));
        let extra = registry.acquire(&reference).unwrap();
        registry.release(reference).unwrap();
        registry.release(extra).unwrap();

        let other = Registry::new();
        let foreign = other.create_reference(Rc::new(1u32));
        assert_eq!(registry.get(&foreign), Err(RegistryError::Stale(foreign.id())));
        other.release(foreign).unwrap();
    }

    #[test]
    fn test_type_mismatch_across_registries() {
        let a = Registry::new();
        let b = Registry::new();
        let number = a.create_reference(Rc::new(1u32));
        let text = b.create_reference(Rc::new(String::from("x")));
        assert_eq!(number.id(), text.id());

        // A token from `b` resolved against `a`
        assert_eq!(
            a.get(&text).map(|s| s.len()),
            Err(RegistryError::TypeMismatch(text.id()))
        );
    }

    #[test]
    fn test_foreign_token_of_same_type_is_not_detected() {
        let a = Registry::new();
        let b = Registry::new();
        let _mine = a.create_reference(Rc::new(1u32));
        let foreign = b.create_reference(Rc::new(2u32));

        // Ids are per registry, so `a` resolves its own value
        assert_eq!(a.get(&foreign).map(|n| *n), Ok(1));
    }

    #[test]
    fn test_get_unsized_callback() {
        let registry = Registry::new();
        let hits = Rc::new(Cell::new(0));
        let callback: Rc<dyn Fn(u32)> = {
            let hits = Rc::clone(&hits);
            Rc::new(move |n| hits.set(hits.get() + n))
        };
        let reference = registry.create_reference(callback);

        registry.get(&reference).unwrap()(3);
        registry.get(&reference).unwrap()(4);
        assert_eq!(hits.get(), 7);
        registry.release(reference).unwrap();
    }

    #[test]
    fn test_finalizer_may_reenter_registry() {
        let registry = Registry::new();
        let inner = registry.create_reference(Rc::new(1u8));
        let inner_slot = Rc::new(RefCell::new(Some(inner)));

        let outer = {
            let registry = registry.clone();
            let inner_slot = Rc::clone(&inner_slot);
            registry.clone().create_reference_with_finalizer(Rc::new(2u8), move || {
                if let Some(inner) = inner_slot.borrow_mut().take() {
                    registry.release(inner).unwrap();
                }
            })
        };

        registry.release(outer).unwrap();
        assert_eq!(registry.live_references(), 0);
        assert_eq!(registry.stats().live(), 0);
    }
}
