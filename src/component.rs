//! Component roles.
//!
//! Every service, controller and middleware implements [`Component`]. A
//! component with dependencies holds them as plain `Arc<T>` fields and is
//! registered through a factory that receives an [`Injector`](crate::Injector),
//! so it cannot exist with a dependency left unbound:
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use corvid::{Component, Components, Service};
//!
//! struct Clock;
//! impl Component for Clock {}
//! impl Service for Clock {}
//!
//! struct Billing {
//!     clock: Arc<Clock>,
//! }
//! impl Component for Billing {}
//! impl Service for Billing {}
//!
//! let components = Components::new()
//!     .service_with(|deps| Ok(Billing { clock: deps.service()? }))
//!     .service(Clock);
//! ```
//!
//! A missing service fails the factory, and with it registration.
//! [`init`](Component::init) runs once the component is built, so its
//! dependencies are already initialised.

use std::any::{Any, type_name};
use std::sync::Arc;

use crate::context::Context;
use crate::error::BoxError;
use crate::handler::Next;
use crate::resources::Resources;

pub trait Component: Any + Send + Sync {
    fn init(&mut self, resources: &Arc<Resources>) -> Result<(), BoxError> {
        let _ = resources;
        Ok(())
    }
}

/// A long-lived singleton other components depend on.
pub trait Service: Component {
    /// Called once on graceful shutdown. Failures are logged and do not stop
    /// the remaining services from shutting down.
    fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A group of actions addressed as `Name#Action`.
pub trait Controller: Component + Sized {
    /// Name used in routes and logs. Defaults to the type's own name; the
    /// `Controller` suffix is appended when missing.
    fn name() -> &'static str {
        short_type_name::<Self>()
    }

    fn actions(actions: &mut Actions<Self>);
}

/// Wraps a slice of the handler chain.
///
/// Call `next.run(ctx)` to continue, or return without calling it to
/// short-circuit. Work done after `run` returns sees the inner response.
pub trait Middleware: Component {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError>;
}

pub(crate) type BoxedAction<C> = Box<dyn Fn(&C, &mut Context) -> Result<(), BoxError> + Send + Sync>;

/// The actions a [`Controller`] exposes, collected by [`Controller::actions`].
pub struct Actions<C> {
    pub(crate) entries: Vec<(&'static str, BoxedAction<C>)>,
}

impl<C: Controller> Actions<C> {
    pub(crate) fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn add<F>(&mut self, name: &'static str, action: F) -> &mut Self
    where
        F: Fn(&C, &mut Context) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.entries.push((name, Box::new(action)));
        self
    }
}

/// `my_app::users::UsersController` → `UsersController`.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let name = type_name::<T>();
    let base = name.split('<').next().unwrap_or(name);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UsersController;

    #[test]
    fn short_type_name_strips_path() {
        assert_eq!(short_type_name::<UsersController>(), "UsersController");
        assert_eq!(short_type_name::<Vec<String>>(), "Vec");
    }
}
