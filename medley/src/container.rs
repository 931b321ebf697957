use std::any::{Any, type_name};
use std::collections::HashSet;
use std::collections::btree_map::{BTreeMap, Keys};
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use regex::Regex;
use tracing::{debug, trace};

use crate::{
    ContainerError, ContainerResult, Definition, Service, ServiceKind, ServiceProvider, Value,
};

/// A stored service and, once a one-shot definition has been resolved, the definition it came from.
struct Entry {
    service: Service,
    raw: Option<Definition>,
}

impl Entry {
    fn new(service: Service) -> Self {
        Self { service, raw: None }
    }

    /// Frozen entries hold the memoized result of a one-shot definition.
    fn is_frozen(&self) -> bool {
        self.raw.is_some()
    }
}

/// A keyed registry of services.
///
/// Each identifier holds either a literal value or a [`Definition`] that builds the service
/// from the container itself. Plain definitions run at most once: the first [`get`](Self::get)
/// replaces them with their result and freezes the identifier.
///
/// ```rust
/// use std::rc::Rc;
///
/// use medley::{Container, Service};
///
/// let mut container = Container::new();
/// container.set("db.url", Service::value("sqlite::memory:"))?;
/// container.set("db", Service::definition(|c| {
///     Ok(format!("connection to {}", c.get::<&str>("db.url")?))
/// }))?;
///
/// let db = container.get::<String>("db")?;
/// assert_eq!(*db, "connection to sqlite::memory:");
/// assert!(Rc::ptr_eq(&db, &container.get::<String>("db")?));
/// assert!(container.is_frozen("db"));
/// # Ok::<(), medley::ContainerError>(())
/// ```
#[derive(Default)]
pub struct Container {
    entries: BTreeMap<String, Entry>,
    /// Identifiers whose definitions are currently being evaluated.
    resolving: HashSet<String>,
}

impl Container {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a container seeded with the given services.
    pub fn with_services<K, S>(services: impl IntoIterator<Item = (K, S)>) -> Self
    where
        K: Into<String>,
        S: Into<Service>,
    {
        services.into_iter().collect()
    }

    /// Stores `service` under `id`, replacing whatever was there.
    ///
    /// Fails with [`ContainerError::FrozenService`] if `id` has already been resolved.
    pub fn set(&mut self, id: impl Into<String>, service: impl Into<Service>) -> ContainerResult<()> {
        let id = id.into();
        if self.is_frozen(&id) {
            return Err(ContainerError::FrozenService(id));
        }
        self.entries.insert(id, Entry::new(service.into()));
        Ok(())
    }

    /// Stores a literal value under `id`.
    pub fn set_value<T: Any>(&mut self, id: impl Into<String>, value: T) -> ContainerResult<()> {
        self.set(id, Service::value(value))
    }

    /// Registers `build` as a one-shot definition under `id`.
    pub fn service<T, F>(&mut self, id: impl Into<String>, build: F) -> ContainerResult<()>
    where
        T: Any,
        F: Fn(&mut Self) -> ContainerResult<T> + 'static,
    {
        self.set(id, Service::definition(build))
    }

    /// Registers `build` as a factory under `id`.
    pub fn create_factory<T, F>(&mut self, id: impl Into<String>, build: F) -> ContainerResult<()>
    where
        T: Any,
        F: Fn(&mut Self) -> ContainerResult<T> + 'static,
    {
        self.set(id, Service::factory(build))
    }

    /// Resolves `id` and downcasts the result.
    ///
    /// See [`resolve`](Self::resolve) for the resolution rules.
    pub fn get<T: Any>(&mut self, id: &str) -> ContainerResult<Rc<T>> {
        let value = self.resolve(id)?;
        downcast(id, value)
    }

    /// Resolves the effective value of `id`.
    ///
    /// - literals, and one-shot definitions already resolved, are returned as stored
    /// - protected callables are returned as a [`Definition`] value, without being invoked
    /// - factories are invoked on every call
    /// - one-shot definitions are invoked once; the result is stored in their place and `id` is frozen
    ///
    /// A definition that fails leaves the container untouched.
    pub fn resolve(&mut self, id: &str) -> ContainerResult<Value> {
        let entry = self.entry(id)?;
        let definition = match &entry.service {
            Service::Literal(value) => return Ok(Rc::clone(value)),
            Service::Protected(def) => return Ok(Rc::new(def.clone())),
            Service::Factory(def) => {
                let def = def.clone();
                trace!("Invoking factory {id}");
                return self.evaluate(id, &def);
            }
            Service::OneShot(def) => def.clone(),
        };

        let value = self.evaluate(id, &definition)?;
        // The definition may have deleted or replaced its own identifier.
        let unchanged = self.entries.get(id).is_some_and(
            |entry| matches!(&entry.service, Service::OneShot(def) if def.ptr_eq(&definition)),
        );
        if unchanged {
            debug!("Resolved service {id}, freezing it");
            self.entries.insert(
                id.to_string(),
                Entry {
                    service: Service::Literal(Rc::clone(&value)),
                    raw: Some(definition),
                },
            );
        } else {
            debug!("Service {id} was redefined while resolving, not freezing it");
        }
        Ok(value)
    }

    fn evaluate(&mut self, id: &str, definition: &Definition) -> ContainerResult<Value> {
        if !self.resolving.insert(id.to_string()) {
            return Err(ContainerError::CircularReference(id.to_string()));
        }
        let result = definition.call(self);
        self.resolving.remove(id);
        result
    }

    /// Removes `id` together with its raw definition and frozen state.
    ///
    /// Returns `false` if `id` was not registered.
    pub fn delete(&mut self, id: &str) -> bool {
        let removed = self.entries.remove(id).is_some();
        if removed {
            debug!("Deleted service {id}");
        }
        removed
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Whether `id` holds the memoized result of a one-shot definition.
    #[must_use]
    pub fn is_frozen(&self, id: &str) -> bool {
        self.entries.get(id).is_some_and(Entry::is_frozen)
    }

    /// Marks a callable so it is invoked on every resolution instead of once.
    pub fn factory(service: impl Into<Service>) -> ContainerResult<Service> {
        service.into().into_factory()
    }

    /// Marks a callable so it is returned as-is instead of being invoked.
    pub fn protect(service: impl Into<Service>) -> ContainerResult<Service> {
        service.into().into_protected()
    }

    /// The unevaluated definition of `id`.
    ///
    /// Once a one-shot definition has been resolved this is still the original definition,
    /// not its result. Never evaluates anything.
    pub fn raw(&self, id: &str) -> ContainerResult<Service> {
        let entry = self.entry(id)?;
        Ok(match &entry.raw {
            Some(def) => Service::OneShot(def.clone()),
            None => entry.service.clone(),
        })
    }

    /// Wraps the definition of `id` so its result is passed through `extender`.
    ///
    /// Resolving `id` afterwards yields `extender(original(container), container)`. Extending a
    /// factory produces a factory, so the whole chain runs again on every resolution. A protected
    /// callable is invoked by the composite, which is a one-shot definition.
    pub fn extend<T, U, F>(&mut self, id: &str, extender: F) -> ContainerResult<Service>
    where
        T: Any,
        U: Any,
        F: Fn(Rc<T>, &mut Self) -> ContainerResult<U> + 'static,
    {
        let entry = self.entry(id)?;
        let (original, is_factory) = match &entry.service {
            Service::OneShot(def) | Service::Protected(def) => (def.clone(), false),
            Service::Factory(def) => (def.clone(), true),
            Service::Literal(_) => {
                return Err(ContainerError::InvalidDefinition(format!(
                    "Identifier {id} does not contain an object definition."
                )));
            }
        };

        let extended_id = id.to_string();
        let composite = Definition::new(move |container| {
            let value = original.call(container)?;
            let value = downcast::<T>(&extended_id, value)?;
            extender(value, container)
        });
        let composite = if is_factory {
            Service::Factory(composite)
        } else {
            Service::OneShot(composite)
        };

        self.set(id, composite.clone())?;
        Ok(composite)
    }

    /// Resolves every identifier matching `pattern` from its start.
    ///
    /// `foo` matches `foo` and `foobar`, but not `barfoo`. Identifiers resolving to the same
    /// value, or to the same protected callable, are only reported once. Values are compared by
    /// identity: two equal values stored separately are both reported.
    pub fn matches(&mut self, pattern: &str) -> ContainerResult<Vec<Value>> {
        let regex = Regex::new(&format!("^(?:{pattern})"))?;
        let ids: Vec<String> = self
            .keys()
            .filter(|id| regex.is_match(id))
            .map(ToString::to_string)
            .collect();

        let mut values: Vec<Value> = Vec::with_capacity(ids.len());
        for id in ids {
            let value = self.resolve(&id)?;
            if !values.iter().any(|v| same_value(v, &value)) {
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Lets `provider` configure the container.
    pub fn register<P>(&mut self, provider: &P) -> ContainerResult<&mut Self>
    where
        P: ServiceProvider + ?Sized,
    {
        self.register_with_values(provider, Vec::<(String, Service)>::new())
    }

    /// Lets `provider` configure the container, then sets each of `values`.
    pub fn register_with_values<P, K, S>(
        &mut self,
        provider: &P,
        values: impl IntoIterator<Item = (K, S)>,
    ) -> ContainerResult<&mut Self>
    where
        P: ServiceProvider + ?Sized,
        K: Into<String>,
        S: Into<Service>,
    {
        let before = self.len();
        provider.register(self)?;
        for (id, service) in values {
            self.set(id, service)?;
        }
        debug!(
            "Registered provider, container now holds {} services ({} new)",
            self.len(),
            self.len().saturating_sub(before)
        );
        Ok(self)
    }

    /// Registered identifiers, in sorted order.
    pub fn keys(&self) -> Ids<'_> {
        Ids(self.entries.keys())
    }

    /// Number of registered identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no identifier is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, id: &str) -> ContainerResult<&Entry> {
        self.entries
            .get(id)
            .ok_or_else(|| ContainerError::UnknownIdentifier(id.to_string()))
    }
}

fn downcast<T: Any>(id: &str, value: Value) -> ContainerResult<Rc<T>> {
    value
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            id: id.to_string(),
            expected: type_name::<T>(),
        })
}

/// Identity of resolved values. Protected callables are handed out in a fresh `Rc` each time,
/// so they compare by the callable they wrap.
fn same_value(a: &Value, b: &Value) -> bool {
    if Rc::ptr_eq(a, b) {
        return true;
    }
    match (a.downcast_ref::<Definition>(), b.downcast_ref::<Definition>()) {
        (Some(a), Some(b)) => a.ptr_eq(b),
        _ => false,
    }
}

impl<K, S> FromIterator<(K, S)> for Container
where
    K: Into<String>,
    S: Into<Service>,
{
    fn from_iter<I: IntoIterator<Item = (K, S)>>(services: I) -> Self {
        let entries = services
            .into_iter()
            .map(|(id, service)| (id.into(), Entry::new(service.into())))
            .collect();
        Self {
            entries,
            resolving: HashSet::new(),
        }
    }
}

impl Debug for Container {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.entries.iter().map(|(id, entry)| {
                let kind = if entry.is_frozen() {
                    "frozen"
                } else {
                    match entry.service.kind() {
                        ServiceKind::Literal => "literal",
                        ServiceKind::OneShot => "one-shot",
                        ServiceKind::Factory => "factory",
                        ServiceKind::Protected => "protected",
                    }
                };
                (id, kind)
            }))
            .finish()
    }
}

/// Iterator over the identifiers of a [`Container`].
#[derive(Debug, Clone)]
pub struct Ids<'a>(Keys<'a, String, Entry>);

impl<'a> Iterator for Ids<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(String::as_str)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.0.size_hint()
    }
}

impl ExactSizeIterator for Ids<'_> {}

impl<'a> IntoIterator for &'a Container {
    type Item = &'a str;
    type IntoIter = Ids<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.keys()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use tracing_test::traced_test;

    use super::*;

    fn counting(calls: &Rc<Cell<u32>>, result: &'static str) -> Service {
        let calls = Rc::clone(calls);
        Service::definition(move |_| {
            calls.set(calls.get() + 1);
            Ok(result)
        })
    }

    #[test]
    fn test_new_container_is_empty() {
        let c = Container::new();
        assert!(c.is_empty());
        assert_eq!(c.len(), 0);
        assert_eq!(c.keys().count(), 0);
    }

    #[test]
    fn test_seeding_sets_every_service() {
        let c = Container::with_services([
            ("foo", Service::definition(|_| Ok(()))),
            ("bar", Service::definition(|_| Ok(()))),
            ("baz", Service::value(3)),
        ]);
        assert_eq!(c.len(), 3);
        assert_eq!(c.keys().collect::<Vec<_>>(), vec!["bar", "baz", "foo"]);
    }

    #[test]
    fn test_identifiers_are_opaque() {
        let mut c = Container::new();
        for id in ["foo", "@foo", "$foo", "#foo", "_baz", "foo.bar", "bat.ban"] {
            c.set_value(id, id).unwrap();
        }
        for id in ["foo", "@foo", "$foo", "#foo", "_baz", "foo.bar", "bat.ban"] {
            assert!(c.contains(id));
            assert_eq!(*c.get::<&str>(id).unwrap(), id);
        }
        assert!(!c.contains("fail"));
    }

    #[test]
    fn test_resolution_freezes_and_keeps_raw() {
        let calls = Rc::new(Cell::new(0));
        let mut c = Container::new();
        c.set("foo", counting(&calls, "foo")).unwrap();
        let original = c.raw("foo").unwrap();
        assert!(!c.is_frozen("foo"));

        assert_eq!(*c.get::<&str>("foo").unwrap(), "foo");
        assert!(c.is_frozen("foo"));
        assert_eq!(c.entries["foo"].service.kind(), ServiceKind::Literal);

        let raw = c.raw("foo").unwrap();
        assert_eq!(raw.kind(), ServiceKind::OneShot);
        assert!(
            raw.as_definition()
                .unwrap()
                .ptr_eq(original.as_definition().unwrap())
        );
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_failed_definition_leaves_container_untouched() {
        let mut c = Container::new();
        c.service("broken", |c| {
            c.get::<u8>("missing")?;
            Ok(())
        })
        .unwrap();

        let err = c.resolve("broken").unwrap_err();
        assert!(matches!(err, ContainerError::UnknownIdentifier(id) if id == "missing"));
        assert!(!c.is_frozen("broken"));
        assert_eq!(c.raw("broken").unwrap().kind(), ServiceKind::OneShot);
        c.set_value("broken", 1).unwrap();
    }

    #[test]
    fn test_circular_reference() {
        let mut c = Container::new();
        c.service("a", |c| c.get::<u8>("b").map(|b| *b)).unwrap();
        c.service("b", |c| c.get::<u8>("a").map(|a| *a)).unwrap();

        let err = c.resolve("a").unwrap_err();
        assert!(matches!(err, ContainerError::CircularReference(id) if id == "a"));
        assert!(c.resolving.is_empty());
        assert!(!c.is_frozen("a"));
        assert!(!c.is_frozen("b"));
    }

    #[test]
    fn test_type_mismatch() {
        let mut c = Container::new();
        c.set_value("answer", 42_u32).unwrap();
        let err = c.get::<String>("answer").unwrap_err();
        assert!(matches!(
            err,
            ContainerError::TypeMismatch { ref id, expected } if id == "answer" && expected.ends_with("String")
        ));
        assert_eq!(*c.get::<u32>("answer").unwrap(), 42);
    }

    #[test]
    fn test_delete() {
        let mut c = Container::new();
        assert!(!c.delete("foo"));

        c.service("foo", |_| Ok("foo")).unwrap();
        c.get::<&str>("foo").unwrap();
        assert!(c.is_frozen("foo"));

        assert!(c.delete("foo"));
        assert!(!c.contains("foo"));
        assert!(!c.is_frozen("foo"));
        assert!(matches!(
            c.raw("foo"),
            Err(ContainerError::UnknownIdentifier(_))
        ));
    }

    #[test]
    fn test_delete_keeps_shared_classification() {
        let mut c = Container::new();
        let shared = Container::factory(Service::definition(|_| Ok(1))).unwrap();
        c.set("first", shared.clone()).unwrap();
        c.set("second", shared).unwrap();

        assert!(c.delete("first"));
        assert_eq!(c.raw("second").unwrap().kind(), ServiceKind::Factory);
        c.get::<i32>("second").unwrap();
        assert!(!c.is_frozen("second"));
    }

    #[test]
    fn test_extend_rejects_non_definitions() {
        let mut c = Container::new();
        c.set_value("literal", "bar").unwrap();
        c.service("resolved", |_| Ok(1)).unwrap();
        c.get::<i32>("resolved").unwrap();

        for id in ["literal", "resolved"] {
            let err = c.extend(id, |v: Rc<i32>, _| Ok(*v)).unwrap_err();
            assert!(matches!(err, ContainerError::InvalidDefinition(_)), "{id}");
        }
    }

    #[test]
    fn test_definition_deleting_its_own_id_is_not_memoized() {
        let mut c = Container::new();
        c.service("ephemeral", |c| {
            c.delete("ephemeral");
            Ok(1)
        })
        .unwrap();

        assert_eq!(*c.get::<i32>("ephemeral").unwrap(), 1);
        assert!(!c.contains("ephemeral"));
        assert!(!c.is_frozen("ephemeral"));
    }

    #[test]
    fn test_definition_redefining_its_own_id_is_not_memoized() {
        let mut c = Container::new();
        c.service("config", |c| {
            c.set_value("config", "replacement")?;
            Ok("original")
        })
        .unwrap();

        assert_eq!(*c.get::<&str>("config").unwrap(), "original");
        assert!(!c.is_frozen("config"));
        assert_eq!(c.entries["config"].service.kind(), ServiceKind::Literal);
        assert_eq!(*c.get::<&str>("config").unwrap(), "replacement");
    }

    #[test]
    fn test_same_value() {
        let def = Definition::new(|_| Ok(1));
        let a: Value = Rc::new(def.clone());
        let b: Value = Rc::new(def);
        let other: Value = Rc::new(Definition::new(|_| Ok(1)));
        assert!(same_value(&a, &b));
        assert!(!same_value(&a, &other));
        let (one, another): (Value, Value) = (Rc::new(1), Rc::new(1));
        assert!(!same_value(&one, &another));
    }

    #[test]
    fn test_debug() {
        let mut c = Container::new();
        c.set_value("a", 1).unwrap();
        c.service("b", |_| Ok(2)).unwrap();
        c.create_factory("c", |_| Ok(3)).unwrap();
        c.set("d", Service::protected(|_| Ok(4))).unwrap();
        c.service("e", |_| Ok(5)).unwrap();
        c.get::<i32>("e").unwrap();

        assert_eq!(
            format!("{c:?}"),
            r#"{"a": "literal", "b": "one-shot", "c": "factory", "d": "protected", "e": "frozen"}"#
        );
    }

    #[test]
    #[traced_test]
    fn test_logs_freezing() {
        let mut c = Container::new();
        c.service("logger", |_| Ok("ready")).unwrap();
        c.get::<&str>("logger").unwrap();
        assert!(logs_contain("Resolved service logger, freezing it"));

        c.delete("logger");
        assert!(logs_contain("Deleted service logger"));
    }
}
