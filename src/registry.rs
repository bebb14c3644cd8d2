//! Component registry.
//!
//! Wiring runs in a fixed order, because each stage needs the previous one:
//!
//! 1. **Services** are built, initialised and stored. A service built through
//!    a factory may depend on others; a factory that asks for a service not
//!    yet built is retried once more services exist, so registration order
//!    does not matter.
//! 2. **Controllers** are built, initialised and their actions inserted into
//!    the handler table. The built-in `ErrorsController` goes first.
//! 3. **Middlewares** have their scopes validated against the now complete
//!    handler table, are built and initialised, and their index is appended
//!    to every record the scope matches.
//! 4. Every record's chain is composed.
//!
//! Any failure is logged and aborts wiring. Middleware failures are collected
//! so that one run reports all of them.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, error, info};

use crate::component::{Actions, Controller, Middleware, Service};
use crate::context::Context;
use crate::descriptor::normalize_controller;
use crate::dispatch::ErrorsController;
use crate::error::Error;
use crate::handler::{HandlerTable, MiddlewareSlot};
use crate::resources::{DatabaseConnector, Resources};
use crate::scope::ScopeSpec;

// ── Injector ──────────────────────────────────────────────────────────────────

/// Resolves service dependencies for the component being built.
pub struct Injector<'a> {
    services: &'a ServiceMap,
    component: &'a str,
}

impl<'a> Injector<'a> {
    pub(crate) fn new(services: &'a ServiceMap, component: &'a str) -> Self {
        Self { services, component }
    }

    /// The registered instance of `T`.
    pub fn service<T: Service>(&self) -> Result<Arc<T>, Error> {
        self.services.get::<T>().ok_or_else(|| Error::MissingDependency {
            component: self.component.to_owned(),
            dependency: type_name::<T>(),
        })
    }

    /// Name of the component being built.
    pub fn component(&self) -> &str {
        self.component
    }
}

// ── Service map ───────────────────────────────────────────────────────────────

/// Registered services, keyed by type.
#[derive(Default)]
pub struct ServiceMap {
    by_type: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    ordered: Vec<(&'static str, Arc<dyn Service>)>,
}

impl ServiceMap {
    pub fn get<T: Service>(&self) -> Option<Arc<T>> {
        let service = Arc::clone(self.by_type.get(&TypeId::of::<T>())?);
        service.downcast::<T>().ok()
    }

    fn contains<S: Service>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<S>())
    }

    fn insert<S: Service>(&mut self, service: S) -> Result<(), Error> {
        let name = type_name::<S>();
        if self.contains::<S>() {
            return Err(Error::DuplicateComponent { component: name.to_owned() });
        }
        let service = Arc::new(service);
        self.by_type.insert(TypeId::of::<S>(), Arc::clone(&service) as Arc<dyn Any + Send + Sync>);
        self.ordered.push((name, service as Arc<dyn Service>));
        Ok(())
    }

    /// Service names in construction order: every service comes after the
    /// services it depends on.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.ordered.iter().map(|(name, _)| *name)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// Shuts services down in reverse construction order, so dependents stop
    /// before their dependencies. A failing service is logged and the rest
    /// still run. Returns the number of failures.
    pub fn shutdown_all(&self) -> usize {
        let mut failed = 0;
        for (name, service) in self.ordered.iter().rev() {
            match service.shutdown() {
                Ok(()) => debug!(service = name, "service stopped"),
                Err(e) => {
                    error!(service = name, error = %e, "service shutdown failed");
                    failed += 1;
                }
            }
        }
        failed
    }
}

// ── Components ────────────────────────────────────────────────────────────────

/// Retried while it fails with [`Error::MissingDependency`], hence `FnMut`.
type RegisterService = Box<dyn FnMut(&Arc<Resources>, &mut ServiceMap) -> Result<(), Error>>;
type RegisterController = Box<dyn FnOnce(&Arc<Resources>, &ServiceMap, &mut HandlerTable) -> Result<(), Error>>;
type InitMiddleware = Box<dyn FnOnce(&Arc<Resources>, &ServiceMap) -> Result<Arc<dyn Middleware>, Error>>;

struct PendingMiddleware {
    name: &'static str,
    scope: ScopeSpec,
    init: InitMiddleware,
}

/// Everything an application registers, in the order it was given.
///
/// Components without dependencies are passed by value. Components with
/// dependencies are passed as a factory that resolves them:
///
/// ```rust,ignore
/// let components = Components::new()
///     .service(Clock)
///     .service_with(|deps| Ok(Greeter { clock: deps.service()? }))
///     .controller_with(|deps| Ok(Users { greeter: deps.service()? }))
///     .use_global(RequestId::default())
///     .use_only(Auth::default(), ["Users#Update"]);
/// ```
#[derive(Default)]
pub struct Components {
    pub(crate) database: Option<Arc<dyn DatabaseConnector>>,
    services: Vec<(&'static str, RegisterService)>,
    controllers: Vec<(&'static str, RegisterController)>,
    middlewares: Vec<PendingMiddleware>,
}

impl Components {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(mut self, db: impl DatabaseConnector) -> Self {
        self.database = Some(Arc::new(db));
        self
    }

    pub fn service<S: Service>(mut self, service: S) -> Self {
        let mut service = Some(service);
        let register: RegisterService = Box::new(move |resources, map| match service.take() {
            Some(service) => register_service(service, resources, map),
            None => Ok(()),
        });
        self.services.push((type_name::<S>(), register));
        self
    }

    /// Registers a service built from its dependencies. `build` is called
    /// again when it asks for a service that has not been built yet.
    pub fn service_with<S, F>(mut self, mut build: F) -> Self
    where
        S: Service,
        F: FnMut(&Injector<'_>) -> Result<S, Error> + 'static,
    {
        let name = type_name::<S>();
        let register: RegisterService = Box::new(move |resources, map| {
            if map.contains::<S>() {
                return Err(Error::DuplicateComponent { component: name.to_owned() });
            }
            let service = build(&Injector::new(map, name))?;
            register_service(service, resources, map)
        });
        self.services.push((name, register));
        self
    }

    pub fn controller<C: Controller>(self, controller: C) -> Self {
        self.controller_with(move |_| Ok(controller))
    }

    /// Registers a controller built from its dependencies.
    pub fn controller_with<C, F>(mut self, build: F) -> Self
    where
        C: Controller,
        F: FnOnce(&Injector<'_>) -> Result<C, Error> + 'static,
    {
        let register: RegisterController =
            Box::new(move |resources, services, table| register_controller(build, resources, services, table));
        self.controllers.push((type_name::<C>(), register));
        self
    }

    /// Registers a middleware with an explicit scope.
    pub fn middleware<M: Middleware>(self, middleware: M, scope: ScopeSpec) -> Self {
        self.middleware_with(move |_| Ok(middleware), scope)
    }

    /// Registers a middleware built from its dependencies, with an explicit
    /// scope.
    pub fn middleware_with<M, F>(mut self, build: F, scope: ScopeSpec) -> Self
    where
        M: Middleware,
        F: FnOnce(&Injector<'_>) -> Result<M, Error> + 'static,
    {
        let name = type_name::<M>();
        let init: InitMiddleware = Box::new(move |resources, services| {
            let mut middleware = build(&Injector::new(services, name))?;
            middleware
                .init(resources)
                .map_err(|source| Error::Init { component: name.to_owned(), source })?;
            Ok(Arc::new(middleware) as Arc<dyn Middleware>)
        });
        self.middlewares.push(PendingMiddleware { name, scope, init });
        self
    }

    /// Applies to every action.
    pub fn use_global<M: Middleware>(self, middleware: M) -> Self {
        self.middleware(middleware, ScopeSpec::new().global())
    }

    /// Applies to the listed actions only.
    pub fn use_only<M, I, S>(self, middleware: M, only: I) -> Self
    where
        M: Middleware,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware(middleware, ScopeSpec::new().only(only))
    }

    /// Applies to every action except the listed ones.
    pub fn use_except<M, I, S>(self, middleware: M, except: I) -> Self
    where
        M: Middleware,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middleware(middleware, ScopeSpec::new().except(except))
    }
}

fn register_service<S: Service>(mut service: S, resources: &Arc<Resources>, map: &mut ServiceMap) -> Result<(), Error> {
    service
        .init(resources)
        .map_err(|source| Error::Init { component: type_name::<S>().to_owned(), source })?;
    map.insert(service)
}

fn register_controller<C, F>(
    build: F,
    resources: &Arc<Resources>,
    services: &ServiceMap,
    table: &mut HandlerTable,
) -> Result<(), Error>
where
    C: Controller,
    F: FnOnce(&Injector<'_>) -> Result<C, Error>,
{
    let type_name = type_name::<C>();
    let name = C::name();
    if name.trim().is_empty() {
        return Err(Error::InvalidComponent {
            component: type_name.to_owned(),
            reason: "controller name is empty".to_owned(),
        });
    }
    let name = normalize_controller(name);
    if table.has_controller(&name) {
        return Err(Error::DuplicateComponent { component: name });
    }

    let mut actions = Actions::<C>::new();
    C::actions(&mut actions);
    if actions.entries.is_empty() {
        return Err(Error::InvalidComponent {
            component: name,
            reason: "controller exposes no actions".to_owned(),
        });
    }
    if let Some((action, _)) = actions.entries.iter().find(|(action, _)| !is_identifier(action)) {
        return Err(Error::InvalidComponent {
            component: name,
            reason: format!("`{action}` is not a valid action name"),
        });
    }

    let mut controller = build(&Injector::new(services, type_name))?;
    controller
        .init(resources)
        .map_err(|source| Error::Init { component: type_name.to_owned(), source })?;
    let controller = Arc::new(controller);

    for (action, f) in actions.entries {
        let controller = Arc::clone(&controller);
        table.insert(&name, action, Arc::new(move |ctx: &mut Context| f(&controller, ctx)))?;
    }
    Ok(())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars.next().is_some_and(|c| c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

// ── Wiring ────────────────────────────────────────────────────────────────────

/// The immutable result of registration.
pub struct Wiring {
    pub table: HandlerTable,
    pub slots: Vec<MiddlewareSlot>,
    pub services: ServiceMap,
}

pub struct Registry;

impl Registry {
    pub fn wire(resources: &Arc<Resources>, components: Components) -> Result<Wiring, Error> {
        let Components { services: pending_services, controllers, middlewares, .. } = components;

        let services = Self::register_services(resources, pending_services)?;
        let mut table = HandlerTable::default();
        Self::register_controllers(resources, &services, &mut table, controllers)?;
        let slots = Self::register_middlewares(resources, &services, &mut table, middlewares)?;
        table.finalize(&slots);

        info!(
            services = services.len(),
            actions = table.len(),
            middlewares = slots.len(),
            "components registered"
        );
        Ok(Wiring { table, slots, services })
    }

    /// Builds services pass by pass. A pass that builds nothing while
    /// services are still waiting means a dependency is missing or cyclic.
    fn register_services(
        resources: &Arc<Resources>,
        mut pending: Vec<(&'static str, RegisterService)>,
    ) -> Result<ServiceMap, Error> {
        let mut map = ServiceMap::default();
        while !pending.is_empty() {
            let waiting = pending.len();
            let mut deferred = Vec::new();
            let mut first_missing = None;

            for (name, mut register) in pending {
                match register(resources, &mut map) {
                    Ok(()) => debug!(service = name, "service initialized"),
                    Err(e @ Error::MissingDependency { .. }) => {
                        first_missing.get_or_insert((name, e));
                        deferred.push((name, register));
                    }
                    Err(e) => {
                        error!(service = name, error = %e, "error while registering service");
                        return Err(e);
                    }
                }
            }

            if deferred.len() == waiting {
                if let Some((name, e)) = first_missing {
                    error!(service = name, error = %e, "error while injecting services into service");
                    return Err(e);
                }
            }
            pending = deferred;
        }
        Ok(map)
    }

    fn register_controllers(
        resources: &Arc<Resources>,
        services: &ServiceMap,
        table: &mut HandlerTable,
        pending: Vec<(&'static str, RegisterController)>,
    ) -> Result<(), Error> {
        let builtin: RegisterController = Box::new(|resources, services, table| {
            register_controller(|_| Ok(ErrorsController), resources, services, table)
        });
        let all = std::iter::once((type_name::<ErrorsController>(), builtin)).chain(pending);

        for (name, register) in all {
            if let Err(e) = register(resources, services, table) {
                error!(controller = name, error = %e, "error while registering controller");
                return Err(e);
            }
            debug!(controller = name, "controller registered");
        }
        Ok(())
    }

    fn register_middlewares(
        resources: &Arc<Resources>,
        services: &ServiceMap,
        table: &mut HandlerTable,
        pending: Vec<PendingMiddleware>,
    ) -> Result<Vec<MiddlewareSlot>, Error> {
        let mut slots: Vec<MiddlewareSlot> = Vec::with_capacity(pending.len());
        let mut errors = Vec::new();

        for PendingMiddleware { name, scope, init } in pending {
            let result = scope
                .resolve(name, table)
                .and_then(|scope| Ok((init(resources, services)?, scope)));
            let (middleware, scope) = match result {
                Ok(pair) => pair,
                Err(e) => {
                    error!(middleware = name, error = %e, "error while registering middleware");
                    errors.push(e);
                    continue;
                }
            };

            let index = slots.len();
            for (descriptor, record) in table.records_mut() {
                if scope.matches(&descriptor) {
                    record.inject_middleware(index);
                }
            }
            debug!(middleware = name, index, scope = scope.kind(), "middleware registered");
            slots.push(MiddlewareSlot { name, middleware, scope });
        }

        match errors.len() {
            0 => Ok(slots),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Multiple(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::error::BoxError;
    use crate::handler::Next;

    struct ServiceA;
    impl Component for ServiceA {}
    impl Service for ServiceA {}

    struct ServiceB {
        a: Arc<ServiceA>,
    }
    impl Component for ServiceB {}
    impl Service for ServiceB {}

    fn service_b(deps: &Injector<'_>) -> Result<ServiceB, Error> {
        Ok(ServiceB { a: deps.service()? })
    }

    #[derive(Default)]
    struct Items;
    impl Component for Items {}
    impl Controller for Items {
        fn name() -> &'static str { "Items" }
        fn actions(actions: &mut Actions<Self>) {
            actions.add("Show", |_, ctx| {
                ctx.text(200, "item");
                Ok(())
            });
        }
    }

    #[derive(Default)]
    struct Noop;
    impl Component for Noop {}
    impl Middleware for Noop {
        fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError> {
            next.run(ctx)
        }
    }

    fn resources() -> Arc<Resources> {
        Arc::new(Resources::default())
    }

    #[test]
    fn dependency_points_at_registered_instance() {
        // B registered before A: its factory is retried once A exists.
        let components = Components::new().service_with(service_b).service(ServiceA);
        let wiring = Registry::wire(&resources(), components).unwrap();

        let a = wiring.services.get::<ServiceA>().unwrap();
        let b = wiring.services.get::<ServiceB>().unwrap();
        assert!(Arc::ptr_eq(&b.a, &a));
        assert_eq!(
            wiring.services.names().map(|name| name.rsplit("::").next().unwrap()).collect::<Vec<_>>(),
            ["ServiceA", "ServiceB"]
        );
    }

    #[test]
    fn missing_dependency_fails_wiring() {
        let err = Registry::wire(&resources(), Components::new().service_with(service_b))
            .err()
            .unwrap();
        match err {
            Error::MissingDependency { component, dependency } => {
                assert!(component.ends_with("ServiceB"));
                assert!(dependency.ends_with("ServiceA"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dependency_cycle_fails_wiring() {
        struct Left {
            _right: Arc<Right>,
        }
        impl Component for Left {}
        impl Service for Left {}

        struct Right {
            _left: Arc<Left>,
        }
        impl Component for Right {}
        impl Service for Right {}

        let components = Components::new()
            .service_with(|deps| Ok(Left { _right: deps.service()? }))
            .service_with(|deps| Ok(Right { _left: deps.service()? }));
        let err = Registry::wire(&resources(), components).err().unwrap();
        assert!(matches!(err, Error::MissingDependency { .. }), "{err}");
    }

    #[test]
    fn controller_with_unregistered_dependency_fails_wiring() {
        struct Orders {
            _a: Arc<ServiceA>,
        }
        impl Component for Orders {}
        impl Controller for Orders {
            fn actions(actions: &mut Actions<Self>) {
                actions.add("Index", |_, _| Ok(()));
            }
        }

        let components = Components::new().controller_with(|deps| Ok(Orders { _a: deps.service()? }));
        let err = Registry::wire(&resources(), components).err().unwrap();
        match err {
            Error::MissingDependency { component, dependency } => {
                assert!(component.ends_with("Orders"));
                assert!(dependency.ends_with("ServiceA"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn middleware_with_unregistered_dependency_fails_wiring() {
        struct Audit {
            _a: Arc<ServiceA>,
        }
        impl Component for Audit {}
        impl Middleware for Audit {
            fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError> {
                next.run(ctx)
            }
        }

        let components = Components::new()
            .controller(Items)
            .middleware_with(|deps| Ok(Audit { _a: deps.service()? }), ScopeSpec::new().global());
        let err = Registry::wire(&resources(), components).err().unwrap();
        assert!(matches!(err, Error::MissingDependency { .. }), "{err}");
    }

    #[test]
    fn service_init_sees_built_dependencies() {
        struct Cache {
            warmed: bool,
        }
        impl Component for Cache {
            fn init(&mut self, _: &Arc<Resources>) -> Result<(), BoxError> {
                self.warmed = true;
                Ok(())
            }
        }
        impl Service for Cache {}

        struct Reader {
            cache: Arc<Cache>,
        }
        impl Component for Reader {
            fn init(&mut self, _: &Arc<Resources>) -> Result<(), BoxError> {
                if !self.cache.warmed {
                    return Err("cache not initialised".into());
                }
                Ok(())
            }
        }
        impl Service for Reader {}

        let components = Components::new()
            .service_with(|deps| Ok(Reader { cache: deps.service()? }))
            .service(Cache { warmed: false });
        assert!(Registry::wire(&resources(), components).is_ok());
    }

    #[test]
    fn duplicate_service_is_rejected() {
        let err = Registry::wire(&resources(), Components::new().service(ServiceA).service(ServiceA))
            .err()
            .unwrap();
        assert!(matches!(err, Error::DuplicateComponent { .. }));
    }

    #[test]
    fn builtin_errors_controller_is_registered() {
        let wiring = Registry::wire(&resources(), Components::new()).unwrap();
        assert!(wiring.table.get("ErrorsController", "NotFound").is_some());
        assert!(wiring.table.get("ErrorsController", "MethodNotAllowed").is_some());
    }

    #[test]
    fn unknown_only_descriptor_fails_with_name_as_written() {
        let components = Components::new().controller(Items).use_only(Noop, ["Foo#Bar"]);
        let err = Registry::wire(&resources(), components).err().unwrap();
        assert!(err.to_string().contains("Foo#Bar"), "{err}");
    }

    #[test]
    fn middleware_errors_are_collected() {
        let components = Components::new()
            .controller(Items)
            .use_only(Noop, ["Foo#Bar"])
            .middleware(Noop, ScopeSpec::new());
        let err = Registry::wire(&resources(), components).err().unwrap();
        match err {
            Error::Multiple(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn overlapping_scope_entries_inject_once() {
        let components = Components::new()
            .controller(Items)
            .use_only(Noop, ["Items#Show", "ItemsController.Show", "Items"]);
        let wiring = Registry::wire(&resources(), components).unwrap();
        let record = wiring.table.get("ItemsController", "Show").unwrap();
        assert_eq!(record.middlewares(), [0]);
    }

    #[test]
    fn global_middleware_covers_builtin_actions() {
        let wiring = Registry::wire(&resources(), Components::new().controller(Items).use_global(Noop)).unwrap();
        assert_eq!(wiring.table.get("ErrorsController", "NotFound").unwrap().middlewares(), [0]);
        assert!(wiring.table.is_finalized());
    }

    #[test]
    fn controller_without_actions_is_invalid() {
        #[derive(Default)]
        struct Empty;
        impl Component for Empty {}
        impl Controller for Empty {
            fn actions(_: &mut Actions<Self>) {}
        }

        let err = Registry::wire(&resources(), Components::new().controller(Empty)).err().unwrap();
        assert!(matches!(err, Error::InvalidComponent { .. }));
    }

    #[test]
    fn failing_init_aborts_wiring() {
        struct Broken;
        impl Component for Broken {
            fn init(&mut self, _: &Arc<Resources>) -> Result<(), BoxError> {
                Err("no connection".into())
            }
        }
        impl Service for Broken {}

        let err = Registry::wire(&resources(), Components::new().service(Broken)).err().unwrap();
        assert!(matches!(err, Error::Init { .. }));
        assert!(err.to_string().contains("no connection"));
    }

    #[test]
    fn shutdown_runs_in_reverse_order() {
        use std::sync::Mutex;

        static ORDER: Mutex<Vec<&'static str>> = Mutex::new(Vec::new());

        struct First;
        impl Component for First {}
        impl Service for First {
            fn shutdown(&self) -> Result<(), BoxError> {
                ORDER.lock().unwrap().push("first");
                Err("flush failed".into())
            }
        }
        struct Second;
        impl Component for Second {}
        impl Service for Second {
            fn shutdown(&self) -> Result<(), BoxError> {
                ORDER.lock().unwrap().push("second");
                Ok(())
            }
        }

        let wiring = Registry::wire(&resources(), Components::new().service(First).service(Second)).unwrap();
        assert_eq!(wiring.services.shutdown_all(), 1);
        assert_eq!(*ORDER.lock().unwrap(), ["second", "first"]);
    }
}
