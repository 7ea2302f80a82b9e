//! Metadata registry.
//!
//! Collects service declarations, merges method-level descriptors with the
//! class-level descriptors of the service and its ancestors, and caches the
//! merged result per (service, method).

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::declaration::{ServiceDeclaration, ServiceKey};
use crate::descriptor::Descriptor;
use crate::dispatch::HttpService;

static GLOBAL: Lazy<Arc<MetadataRegistry>> = Lazy::new(|| Arc::new(MetadataRegistry::new()));

/// Registry-generated identity of a service type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u64);

/// Registry-generated identity of a method name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(u64);

/// Cache key of one resolved descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MetadataKey {
    pub class: ClassId,
    pub method: MethodId,
}

#[derive(Debug)]
struct ClassEntry {
    key: ServiceKey,
    class_level: Descriptor,
    methods: HashMap<MethodId, Descriptor>,
    /// Parent first, root last.
    ancestors: Vec<Arc<ClassEntry>>,
}

impl ClassEntry {
    /// This class followed by its ancestors, most derived first.
    fn lineage(&self) -> impl Iterator<Item = &ClassEntry> {
        std::iter::once(self).chain(self.ancestors.iter().map(|a| a.as_ref()))
    }
}

/// Registry of declared services and their resolved descriptors.
///
/// Growth is append-only: a service is registered once, descriptors are
/// resolved once and then served from the cache.
#[derive(Debug, Default)]
pub struct MetadataRegistry {
    next_class: AtomicU64,
    next_method: AtomicU64,
    class_ids: RwLock<HashMap<TypeId, ClassId>>,
    method_ids: RwLock<HashMap<String, MethodId>>,
    classes: RwLock<HashMap<ClassId, Arc<ClassEntry>>>,
    cache: RwLock<HashMap<MetadataKey, Option<Arc<Descriptor>>>>,
}

impl MetadataRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }

    /// Identity of a service type, generated on first sight.
    pub fn class_id(&self, class: TypeId) -> ClassId {
        if let Some(id) = self.class_ids.read().get(&class) {
            return *id;
        }
        *self
            .class_ids
            .write()
            .entry(class)
            .or_insert_with(|| ClassId(self.next_class.fetch_add(1, Ordering::Relaxed)))
    }

    /// Identity of a method name, generated on first sight.
    pub fn method_id(&self, method: &str) -> MethodId {
        if let Some(id) = self.method_ids.read().get(method) {
            return *id;
        }
        *self
            .method_ids
            .write()
            .entry(method.to_string())
            .or_insert_with(|| MethodId(self.next_method.fetch_add(1, Ordering::Relaxed)))
    }

    /// Cache key for (class, method).
    pub fn key(&self, class: TypeId, method: &str) -> MetadataKey {
        MetadataKey {
            class: self.class_id(class),
            method: self.method_id(method),
        }
    }

    /// Check whether a service type has been registered.
    pub fn is_registered(&self, class: TypeId) -> bool {
        let id = self.class_id(class);
        self.classes.read().contains_key(&id)
    }

    /// Register a service declaring itself through [`HttpService`].
    pub fn register_service<S: HttpService>(&self) -> ClassId {
        let id = self.class_id(TypeId::of::<S>());
        if self.classes.read().contains_key(&id) {
            return id;
        }
        self.register(ServiceDeclaration::of::<S>())
    }

    /// Register a declaration. The first registration of a type wins.
    ///
    /// A declared parent is registered first and its ancestor list is
    /// captured, so lookups never walk the hierarchy through the registry.
    pub fn register(&self, declaration: ServiceDeclaration) -> ClassId {
        self.register_inner(declaration, &mut Vec::new())
    }

    fn register_inner(&self, declaration: ServiceDeclaration, visiting: &mut Vec<TypeId>) -> ClassId {
        let key = declaration.key();
        let id = self.class_id(key.type_id());

        if self.classes.read().contains_key(&id) {
            return id;
        }

        visiting.push(key.type_id());

        let ancestors = match declaration.parent() {
            Some(parent) if visiting.contains(&parent.key.type_id()) => {
                warn!(
                    service = key.name(),
                    parent = parent.key.name(),
                    "Inheritance cycle detected, ignoring parent"
                );
                Vec::new()
            }
            Some(parent) => {
                let mut parent_declaration = ServiceDeclaration::for_key(parent.key);
                (parent.declare)(&mut parent_declaration);
                let parent_id = self.register_inner(parent_declaration, visiting);

                match self.classes.read().get(&parent_id) {
                    Some(entry) => {
                        let mut ancestors = vec![entry.clone()];
                        ancestors.extend(entry.ancestors.iter().cloned());
                        ancestors
                    }
                    None => Vec::new(),
                }
            }
            None => Vec::new(),
        };

        visiting.pop();

        let (class_level, methods) = declaration.into_parts();
        let methods = methods
            .into_iter()
            .map(|(name, descriptor)| (self.method_id(&name), descriptor))
            .collect::<HashMap<_, _>>();

        debug!(
            service = key.name(),
            methods = methods.len(),
            ancestors = ancestors.len(),
            "Registered service"
        );

        self.classes.write().entry(id).or_insert_with(|| {
            Arc::new(ClassEntry {
                key,
                class_level,
                methods,
                ancestors,
            })
        });

        id
    }

    /// Resolve the merged descriptor of `method` on `class`.
    ///
    /// Returns `None` when no class in the lineage declares the method. The
    /// returned descriptor is shared with the cache and immutable; use
    /// [`Arc::make_mut`] for a private copy.
    pub fn get_metadata(&self, class: TypeId, method: &str) -> Option<Arc<Descriptor>> {
        let key = self.key(class, method);

        if let Some(cached) = self.cache.read().get(&key) {
            trace!(?key, found = cached.is_some(), "Descriptor cache hit");
            return cached.clone();
        }

        let entry = self.classes.read().get(&key.class).cloned()?;

        let resolved = entry
            .lineage()
            .find_map(|class| class.methods.get(&key.method))
            .map(|method_level| {
                let mut merged = method_level.clone();
                for class in entry.lineage() {
                    merged.merge_absent(&class.class_level);
                }
                Arc::new(merged)
            });

        if resolved.is_none() {
            debug!(service = entry.key.name(), method, "No descriptor declared");
        }

        self.cache
            .write()
            .entry(key)
            .or_insert(resolved)
            .clone()
    }

    /// Resolve the merged descriptor of `method` on `T`.
    pub fn metadata_of<T: ?Sized + 'static>(&self, method: &str) -> Option<Arc<Descriptor>> {
        self.get_metadata(TypeId::of::<T>(), method)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::{Declaration, markers};
    use crate::descriptor::RequestMethod;

    struct Base;
    struct Child;
    struct Unknown;

    fn base_declaration() -> ServiceDeclaration {
        let mut declaration = ServiceDeclaration::new::<Base>();
        declaration
            .class_mut()
            .http("/base")
            .headers(["X-Base: 1"]);
        declaration
            .method("list")
            .get("/items")
            .param(markers::query("page"));
        declaration.method("remove").delete("/items/:id").param(markers::path("id"));
        declaration
    }

    #[test]
    fn test_ids_are_stable() {
        let registry = MetadataRegistry::new();
        let a = registry.key(TypeId::of::<Base>(), "list");
        let b = registry.key(TypeId::of::<Base>(), "list");
        let c = registry.key(TypeId::of::<Child>(), "list");

        assert_eq!(a, b);
        assert_ne!(a.class, c.class);
        assert_eq!(a.method, c.method);
    }

    #[test]
    fn test_method_merges_class_level_fields() {
        let registry = MetadataRegistry::new();
        registry.register(base_declaration());

        let descriptor = registry.metadata_of::<Base>("list").unwrap();
        assert_eq!(descriptor.class_path.as_deref(), Some("/base"));
        assert_eq!(descriptor.method_path.as_deref(), Some("/items"));
        assert!(descriptor.headers.as_ref().unwrap().contains("X-Base: 1"));
        assert_eq!(descriptor.query_mapper.as_ref().unwrap()["page"], 0);
    }

    #[test]
    fn test_absent_method() {
        let registry = MetadataRegistry::new();
        registry.register(base_declaration());

        assert!(registry.metadata_of::<Base>("missing").is_none());
        assert!(registry.metadata_of::<Base>("missing").is_none());
        assert!(registry.metadata_of::<Unknown>("list").is_none());
    }

    #[test]
    fn test_lookup_is_idempotent_and_copy_on_write() {
        let registry = MetadataRegistry::new();
        registry.register(base_declaration());

        let mut first = registry.metadata_of::<Base>("list").unwrap();
        let second = registry.metadata_of::<Base>("list").unwrap();
        assert_eq!(first, second);

        Arc::make_mut(&mut first).class_path = Some("/changed".into());

        let third = registry.metadata_of::<Base>("list").unwrap();
        assert_eq!(third.class_path.as_deref(), Some("/base"));
        assert_eq!(third, second);
    }

    #[test]
    fn test_inheritance() {
        let registry = MetadataRegistry::new();
        let base_id = registry.register(base_declaration());

        let mut child = ServiceDeclaration::new::<Child>();
        child.class_mut().headers(["X-Child: 2"]);
        child.method("remove").post("/archive/:id").param(markers::path("id"));

        // Parent registered by hand; `extends` needs an `HttpService`.
        let child_id = registry.class_id(TypeId::of::<Child>());
        let (class_level, methods) = child.into_parts();
        let parent = registry.classes.read().get(&base_id).cloned().unwrap();
        registry.classes.write().insert(
            child_id,
            Arc::new(ClassEntry {
                key: ServiceKey::of::<Child>(),
                class_level,
                methods: methods
                    .into_iter()
                    .map(|(name, d)| (registry.method_id(&name), d))
                    .collect(),
                ancestors: vec![parent],
            }),
        );

        let inherited = registry.metadata_of::<Child>("list").unwrap();
        assert_eq!(inherited.method_path.as_deref(), Some("/items"));
        assert_eq!(inherited.class_path.as_deref(), Some("/base"));
        // First class-level declaration found wins.
        assert!(inherited.headers.as_ref().unwrap().contains("X-Child: 2"));

        let overridden = registry.metadata_of::<Child>("remove").unwrap();
        assert_eq!(overridden.request_method, Some(RequestMethod::Post));
        assert_eq!(overridden.method_path.as_deref(), Some("/archive/:id"));
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = MetadataRegistry::new();
        registry.register(base_declaration());

        let mut again = ServiceDeclaration::new::<Base>();
        again.method("list").get("/other");
        registry.register(again);

        let descriptor = registry.metadata_of::<Base>("list").unwrap();
        assert_eq!(descriptor.method_path.as_deref(), Some("/items"));
    }
}
