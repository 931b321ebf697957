use crate::{Container, ContainerResult};

/// A collaborator that configures a [`Container`] in one call.
///
/// Providers group related registrations so they can be applied with
/// [`Container::register`]. Any closure taking `&mut Container` is a provider.
///
/// ```rust
/// use medley::{Container, ContainerResult, Service, ServiceProvider};
///
/// struct Greeter;
///
/// impl ServiceProvider for Greeter {
///     fn register(&self, container: &mut Container) -> ContainerResult<()> {
///         container.set("greeting", Service::value("hello"))?;
///         container.set(
///             "greeter",
///             Service::definition(|c| Ok(format!("{} world", c.get::<&str>("greeting")?))),
///         )
///     }
/// }
///
/// let mut container = Container::new();
/// container.register(&Greeter)?;
/// assert_eq!(*container.get::<String>("greeter")?, "hello world");
/// # Ok::<(), medley::ContainerError>(())
/// ```
pub trait ServiceProvider {
    /// Registers services, parameters and extensions on the container.
    fn register(&self, container: &mut Container) -> ContainerResult<()>;
}

impl<F> ServiceProvider for F
where
    F: Fn(&mut Container) -> ContainerResult<()>,
{
    fn register(&self, container: &mut Container) -> ContainerResult<()> {
        self(container)
    }
}
