/// Errors returned by [`Container`](crate::Container) operations.
#[non_exhaustive]
#[derive(thiserror::Error, Debug)]
pub enum ContainerError {
    /// The identifier was never registered, or has been deleted.
    #[error("Identifier {0} is not defined")]
    UnknownIdentifier(String),

    /// The identifier was already resolved and can no longer be overridden.
    #[error("Cannot override frozen service {0}")]
    FrozenService(String),

    /// A definition was required but a literal value was given.
    #[error("{0}")]
    InvalidDefinition(String),

    /// The resolved value does not have the type the caller asked for.
    #[error("Service {id} does not hold a value of type {expected}")]
    TypeMismatch {
        /// Identifier of the offending service.
        id: String,
        /// Name of the requested type.
        expected: &'static str,
    },

    /// A definition depends on itself, directly or through other services.
    #[error("Circular reference detected while resolving {0}")]
    CircularReference(String),

    /// The pattern given to [`Container::matches`](crate::Container::matches) is not a valid regex.
    #[error(transparent)]
    InvalidPattern(#[from] regex::Error),

    /// Errors raised by user definitions and providers.
    #[error(transparent)]
    OtherError(#[from] Box<dyn std::error::Error>),
}

/// A convenience [`Result`] for container operations.
pub type ContainerResult<T> = Result<T, ContainerError>;
