//! Shared-instance registry.
//!
//! A [`Registry`] maps instance ids to types and types to factories. The
//! first [`Registry::request`] for an id constructs the instance; later
//! requests share it. Callers only ever hold a [`Lease`]; the instance is
//! torn down when the last lease for its id is dropped.
//!
//! Each id has its own slot mutex, held while the instance is constructed
//! or destroyed. A factory may therefore request instances with other ids
//! (a chain requesting its adaptor) without contending on a global lock.
//! Requesting the id currently being constructed from inside its own
//! factory deadlocks; ids must form an acyclic dependency graph.

use crate::error::{HubError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Builds one instance for an id. Receives the id and a context through
/// which it may request further instances.
pub type Factory<T, C> = Arc<dyn Fn(&str, &C) -> Result<Arc<T>> + Send + Sync>;

type CreateHook<T> = Arc<dyn Fn(&str, &T) -> Result<()> + Send + Sync>;
type DestroyHook<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

struct Slot<T: ?Sized> {
    instance: Option<Arc<T>>,
    count: usize,
}

pub struct Registry<T: ?Sized, C: ?Sized = ()> {
    kind: &'static str,
    types: Mutex<HashMap<String, String>>,
    factories: Mutex<HashMap<String, Factory<T, C>>>,
    // Slots are never removed, so two requesters can never end up with
    // different slots for the same id.
    slots: Mutex<HashMap<String, Arc<Mutex<Slot<T>>>>>,
    on_create: Option<CreateHook<T>>,
    on_destroy: Option<DestroyHook<T>>,
}

impl<T: ?Sized + Send + Sync, C: ?Sized> Registry<T, C> {
    /// `kind` names the instance class in errors and logs ("adaptor", "chain", ...).
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            types: Mutex::new(HashMap::new()),
            factories: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            on_create: None,
            on_destroy: None,
        }
    }

    /// Run `hook` on every freshly constructed instance. A failing hook
    /// discards the instance and fails the request.
    pub fn with_create_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &T) -> Result<()> + Send + Sync + 'static,
    {
        self.on_create = Some(Arc::new(hook));
        self
    }

    /// Run `hook` on an instance right before it is destroyed.
    pub fn with_destroy_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(&str, &T) + Send + Sync + 'static,
    {
        self.on_destroy = Some(Arc::new(hook));
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a factory for `type_name`. Registration is idempotent: a
    /// second registration of the same type is ignored and returns `false`.
    pub fn register_type<F>(&self, type_name: &str, factory: F) -> bool
    where
        F: Fn(&str, &C) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let mut factories = self.factories.lock();
        if factories.contains_key(type_name) {
            tracing::debug!("{} type '{}' already registered", self.kind, type_name);
            return false;
        }
        factories.insert(type_name.to_string(), Arc::new(factory));
        tracing::debug!("Registered {} type '{}'", self.kind, type_name);
        true
    }

    pub fn has_type(&self, type_name: &str) -> bool {
        self.factories.lock().contains_key(type_name)
    }

    /// Declare that instance `id` is built by `type_name`'s factory.
    /// Redeclaring an id updates its type for future constructions.
    pub fn register_instance(&self, id: &str, type_name: &str) {
        self.types
            .lock()
            .insert(id.to_string(), type_name.to_string());
    }

    pub fn has_instance(&self, id: &str) -> bool {
        self.types.lock().contains_key(id)
    }

    pub fn type_of(&self, id: &str) -> Option<String> {
        self.types.lock().get(id).cloned()
    }

    fn factory_for(&self, id: &str) -> Result<Factory<T, C>> {
        let type_name = self
            .type_of(id)
            .ok_or_else(|| HubError::unknown_id(self.kind, id))?;
        self.factory_by_type(&type_name)
    }

    fn factory_by_type(&self, type_name: &str) -> Result<Factory<T, C>> {
        self.factories
            .lock()
            .get(type_name)
            .cloned()
            .ok_or_else(|| HubError::FactoryNotRegistered {
                kind: self.kind,
                type_name: type_name.to_string(),
            })
    }

    fn slot(&self, id: &str) -> Arc<Mutex<Slot<T>>> {
        let mut slots = self.slots.lock();
        Arc::clone(slots.entry(id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Slot {
                instance: None,
                count: 0,
            }))
        }))
    }

    /// Get a lease on the shared instance for `id`, constructing it if no
    /// lease is outstanding.
    pub fn request(&self, id: &str, ctx: &C) -> Result<Lease<T>> {
        let factory = self.factory_for(id)?;
        let slot = self.slot(id);
        let mut guard = slot.lock();

        let instance = match guard.instance.clone() {
            Some(instance) => {
                guard.count += 1;
                tracing::debug!("{} '{}' shared, ref count {}", self.kind, id, guard.count);
                instance
            }
            None => {
                let instance = factory(id, ctx)?;
                if let Some(hook) = &self.on_create {
                    hook(id, &instance)?;
                }
                guard.instance = Some(Arc::clone(&instance));
                guard.count = 1;
                tracing::debug!("{} '{}' created", self.kind, id);
                instance
            }
        };
        drop(guard);

        Ok(Lease {
            id: id.to_string(),
            kind: self.kind,
            slot,
            instance: Some(instance),
            on_destroy: self.on_destroy.clone(),
        })
    }

    /// Build an unshared instance of `type_name`. Used for components that
    /// every owner instantiates privately, such as filters.
    pub fn instantiate(&self, type_name: &str, ctx: &C) -> Result<Arc<T>> {
        let factory = self.factory_by_type(type_name)?;
        factory(type_name, ctx)
    }

    /// Outstanding leases for `id`; zero when no instance is live.
    pub fn ref_count(&self, id: &str) -> usize {
        let slot = self.slots.lock().get(id).cloned();
        slot.map(|s| s.lock().count).unwrap_or(0)
    }

    pub fn is_live(&self, id: &str) -> bool {
        self.ref_count(id) > 0
    }

    /// Ids with a live instance, sorted.
    pub fn live_ids(&self) -> Vec<String> {
        let slots: Vec<_> = self
            .slots
            .lock()
            .iter()
            .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
            .collect();
        let mut ids: Vec<String> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().instance.is_some())
            .map(|(id, _)| id)
            .collect();
        ids.sort();
        ids
    }

    /// Visit every live instance with its reference count, in id order,
    /// without taking a lease.
    pub fn for_each_live(&self, mut f: impl FnMut(&str, usize, &T)) {
        for id in self.live_ids() {
            let Some(slot) = self.slots.lock().get(&id).cloned() else {
                continue;
            };
            let guard = slot.lock();
            if let Some(instance) = &guard.instance {
                f(&id, guard.count, instance);
            }
        }
    }
}

impl<T: ?Sized, C: ?Sized> fmt::Debug for Registry<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &self.kind)
            .field("types", &self.types.lock().len())
            .field("factories", &self.factories.lock().len())
            .finish()
    }
}

/// Shared-ownership handle on a registry instance.
///
/// Cloning takes another reference; dropping the last one for an id
/// destroys the instance while holding that id's slot lock.
pub struct Lease<T: ?Sized> {
    id: String,
    kind: &'static str,
    slot: Arc<Mutex<Slot<T>>>,
    instance: Option<Arc<T>>,
    on_destroy: Option<DestroyHook<T>>,
}

impl<T: ?Sized> Lease<T> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// References currently held on this instance, this one included.
    pub fn ref_count(&self) -> usize {
        self.slot.lock().count
    }

    /// Whether two leases refer to the same live instance.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        match (&a.instance, &b.instance) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<T: ?Sized> Deref for Lease<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.instance {
            Some(instance) => instance,
            // `instance` is only taken inside `drop`.
            None => unreachable!("lease used after release"),
        }
    }
}

impl<T: ?Sized> Clone for Lease<T> {
    fn clone(&self) -> Self {
        self.slot.lock().count += 1;
        Self {
            id: self.id.clone(),
            kind: self.kind,
            slot: Arc::clone(&self.slot),
            instance: self.instance.clone(),
            on_destroy: self.on_destroy.clone(),
        }
    }
}

impl<T: ?Sized> Drop for Lease<T> {
    fn drop(&mut self) {
        let mut guard = self.slot.lock();
        guard.count = guard.count.saturating_sub(1);
        let own = self.instance.take();
        if guard.count > 0 {
            tracing::debug!("{} '{}' released, ref count {}", self.kind, self.id, guard.count);
            return;
        }
        let shared = guard.instance.take();
        if let (Some(hook), Some(instance)) = (&self.on_destroy, &own) {
            hook(&self.id, instance);
        }
        // Both strong references go here, under the slot lock.
        drop(shared);
        drop(own);
        tracing::debug!("{} '{}' destroyed", self.kind, self.id);
    }
}

impl<T: ?Sized> fmt::Debug for Lease<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Widget {
        drops: Arc<AtomicUsize>,
    }

    impl Drop for Widget {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn registry(drops: &Arc<AtomicUsize>, built: &Arc<AtomicUsize>) -> Registry<Widget> {
        let reg = Registry::new("widget");
        let drops = Arc::clone(drops);
        let built = Arc::clone(built);
        reg.register_type("widget", move |_id, _ctx: &()| {
            built.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Widget {
                drops: Arc::clone(&drops),
            }))
        });
        reg.register_instance("w", "widget");
        reg
    }

    #[test]
    fn test_shared_instance_and_ref_count() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built);

        let a = reg.request("w", &()).unwrap();
        let b = reg.request("w", &()).unwrap();
        assert!(Lease::ptr_eq(&a, &b));
        assert_eq!(reg.ref_count("w"), 2);
        assert_eq!(built.load(Ordering::SeqCst), 1);

        drop(a);
        assert_eq!(reg.ref_count("w"), 1);
        assert_eq!(drops.load(Ordering::SeqCst), 0);

        drop(b);
        assert_eq!(reg.ref_count("w"), 0);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert!(reg.live_ids().is_empty());
    }

    #[test]
    fn test_clone_counts_as_request() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built);

        let a = reg.request("w", &()).unwrap();
        let b = a.clone();
        assert_eq!(b.ref_count(), 2);
        drop(a);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_recreated_after_full_release() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built);

        drop(reg.request("w", &()).unwrap());
        let _again = reg.request("w", &()).unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_id_and_missing_factory() {
        let reg: Registry<Widget> = Registry::new("widget");
        assert!(matches!(
            reg.request("nope", &()),
            Err(HubError::UnknownId { kind: "widget", .. })
        ));

        reg.register_instance("orphan", "gadget");
        assert!(matches!(
            reg.request("orphan", &()),
            Err(HubError::FactoryNotRegistered { .. })
        ));
    }

    #[test]
    fn test_register_type_is_idempotent() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built);
        assert!(!reg.register_type("widget", |_, _: &()| Err(HubError::Device("x".into()))));
        assert!(reg.request("w", &()).is_ok());
    }

    #[test]
    fn test_create_hook_failure_discards_instance() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built)
            .with_create_hook(|id, _| Err(HubError::AdaptorNotStarted(id.to_string())));

        assert!(matches!(
            reg.request("w", &()),
            Err(HubError::AdaptorNotStarted(_))
        ));
        assert_eq!(drops.load(Ordering::SeqCst), 1);
        assert_eq!(reg.ref_count("w"), 0);
    }

    #[test]
    fn test_destroy_hook_runs_once() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let torn_down = Arc::new(AtomicUsize::new(0));
        let t = Arc::clone(&torn_down);
        let reg = registry(&drops, &built).with_destroy_hook(move |_, _| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        let a = reg.request("w", &()).unwrap();
        let b = reg.request("w", &()).unwrap();
        drop(a);
        assert_eq!(torn_down.load(Ordering::SeqCst), 0);
        drop(b);
        assert_eq!(torn_down.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_requests_share_one_instance() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = Arc::new(registry(&drops, &built));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let reg = Arc::clone(&reg);
                std::thread::spawn(move || reg.request("w", &()).unwrap())
            })
            .collect();
        let leases: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(reg.ref_count("w"), 8);
        assert!(leases.windows(2).all(|w| Lease::ptr_eq(&w[0], &w[1])));

        drop(leases);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_instantiate_is_unshared() {
        let drops = Arc::new(AtomicUsize::new(0));
        let built = Arc::new(AtomicUsize::new(0));
        let reg = registry(&drops, &built);
        let a = reg.instantiate("widget", &()).unwrap();
        let b = reg.instantiate("widget", &()).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(reg.ref_count("widget"), 0);
    }
}
