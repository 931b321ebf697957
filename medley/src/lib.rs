#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

mod container;
pub use container::{Container, Ids};

mod error;
pub use error::{ContainerError, ContainerResult};

mod provider;
pub use provider::ServiceProvider;

mod service;
pub use service::{Definition, Service, ServiceKind, Value};
