//! Stored service entries and the definitions that build them.

use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

use crate::{Container, ContainerError, ContainerResult};

/// A resolved, type-erased service.
///
/// Typed access goes through [`Container::get`], which downcasts it.
pub type Value = Rc<dyn Any>;

type DefinitionFn = dyn Fn(&mut Container) -> ContainerResult<Value>;

/// A callable that builds a service from the container.
///
/// Cloning is cheap and clones share the same callable, which can be checked with [`Definition::ptr_eq`].
#[derive(Clone)]
pub struct Definition(Rc<DefinitionFn>);

impl Definition {
    /// Wraps a typed closure. Its result is boxed into a [`Value`] on every call.
    pub fn new<T, F>(build: F) -> Self
    where
        T: Any,
        F: Fn(&mut Container) -> ContainerResult<T> + 'static,
    {
        Self(Rc::new(move |container| {
            build(container).map(|value| Rc::new(value) as Value)
        }))
    }

    /// Wraps a closure that already produces a type-erased [`Value`].
    ///
    /// Useful to hand out an existing `Rc` without wrapping it a second time.
    pub fn from_value_fn<F>(build: F) -> Self
    where
        F: Fn(&mut Container) -> ContainerResult<Value> + 'static,
    {
        Self(Rc::new(build))
    }

    /// Invokes the definition with the given container.
    pub fn call(&self, container: &mut Container) -> ContainerResult<Value> {
        (self.0)(container)
    }

    /// Whether both definitions share the same callable.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl Debug for Definition {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition").finish_non_exhaustive()
    }
}

/// How a [`Service`] behaves when it is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Returned as-is.
    Literal,
    /// Invoked once, the result replaces the definition.
    OneShot,
    /// Invoked on every resolution.
    Factory,
    /// A callable handed out without ever being invoked.
    Protected,
}

/// A value stored in the container under an identifier.
///
/// The variant is fixed when the service is registered and decides what
/// [`Container::resolve`] does with it.
#[derive(Clone)]
pub enum Service {
    /// A plain value.
    Literal(Value),
    /// A lazy singleton: built on first access, then memoized.
    OneShot(Definition),
    /// Built again on every access.
    Factory(Definition),
    /// A callable that is itself the service.
    Protected(Definition),
}

impl Service {
    /// A literal service holding `value`.
    pub fn value<T: Any>(value: T) -> Self {
        Self::Literal(Rc::new(value))
    }

    /// A one-shot definition: `build` runs on first access only.
    pub fn definition<T, F>(build: F) -> Self
    where
        T: Any,
        F: Fn(&mut Container) -> ContainerResult<T> + 'static,
    {
        Self::OneShot(Definition::new(build))
    }

    /// A factory definition: `build` runs on every access.
    pub fn factory<T, F>(build: F) -> Self
    where
        T: Any,
        F: Fn(&mut Container) -> ContainerResult<T> + 'static,
    {
        Self::Factory(Definition::new(build))
    }

    /// A protected callable: resolving it returns the callable, never its result.
    pub fn protected<T, F>(callable: F) -> Self
    where
        T: Any,
        F: Fn(&mut Container) -> ContainerResult<T> + 'static,
    {
        Self::Protected(Definition::new(callable))
    }

    /// How this service behaves when resolved.
    #[must_use]
    pub fn kind(&self) -> ServiceKind {
        match self {
            Self::Literal(_) => ServiceKind::Literal,
            Self::OneShot(_) => ServiceKind::OneShot,
            Self::Factory(_) => ServiceKind::Factory,
            Self::Protected(_) => ServiceKind::Protected,
        }
    }

    /// The callable behind this service, if it is not a literal.
    #[must_use]
    pub fn as_definition(&self) -> Option<&Definition> {
        match self {
            Self::Literal(_) => None,
            Self::OneShot(def) | Self::Factory(def) | Self::Protected(def) => Some(def),
        }
    }

    /// Re-tags the callable as a factory.
    ///
    /// Protection is checked first when resolving, so a protected callable stays protected.
    pub fn into_factory(self) -> ContainerResult<Self> {
        match self {
            Self::Literal(_) => Err(ContainerError::InvalidDefinition(
                "Service definition is not a function or callable object.".to_string(),
            )),
            Self::OneShot(def) | Self::Factory(def) => Ok(Self::Factory(def)),
            Self::Protected(def) => Ok(Self::Protected(def)),
        }
    }

    /// Re-tags the callable as protected.
    pub fn into_protected(self) -> ContainerResult<Self> {
        match self {
            Self::Literal(_) => Err(ContainerError::InvalidDefinition(
                "Callable is not a function or callable object.".to_string(),
            )),
            Self::OneShot(def) | Self::Factory(def) | Self::Protected(def) => {
                Ok(Self::Protected(def))
            }
        }
    }
}

impl From<Definition> for Service {
    fn from(def: Definition) -> Self {
        Self::OneShot(def)
    }
}

impl From<Value> for Service {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

impl Debug for Service {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(_) => f.debug_tuple("Literal").finish_non_exhaustive(),
            Self::OneShot(def) => f.debug_tuple("OneShot").field(def).finish(),
            Self::Factory(def) => f.debug_tuple("Factory").field(def).finish(),
            Self::Protected(def) => f.debug_tuple("Protected").field(def).finish(),
        }
    }
}
