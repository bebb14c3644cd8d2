//! Application boot.
//!
//! [`App::build`] runs the whole startup phase in order: storage connector,
//! services, controllers, middlewares, routes. With `static.enabled` the
//! built-in [`StaticController`] and its routes are added first. Any failure is logged and
//! returned, and no `App` exists afterwards, so a misconfigured application
//! can never serve a request. Everything built here is read-only from then
//! on.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{error, info, warn};

use crate::component::Service;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::files::StaticController;
use crate::registry::{Components, Registry, ServiceMap};
use crate::request::Request;
use crate::resources::Resources;
use crate::response::Response;
use crate::router::{Router, Routes};
use crate::server::{Server, shutdown_signal};

pub struct App {
    router: Router,
    dispatcher: Dispatcher,
    services: ServiceMap,
    resources: Arc<Resources>,
    stopped: AtomicBool,
}

impl App {
    pub fn build(mut resources: Resources, mut components: Components, mut routes: Routes) -> Result<Self, Error> {
        let static_files = &resources.config().static_files;
        if static_files.enabled {
            info!(prefix = %static_files.prefix, root = %static_files.root, "serving static files");
            routes = routes.merge(StaticController::routes(&static_files.prefix));
            components = components.controller(StaticController::default());
        }

        if let Some(db) = components.database.take() {
            if let Err(e) = db.init(resources.config()) {
                error!(error = %e, "database connector initialization failed");
                return Err(Error::Storage(e));
            }
            resources.set_db(db);
        }
        let resources = Arc::new(resources);

        let wiring = Registry::wire(&resources, components)?;
        let router = Router::build(&routes, &wiring.table).inspect_err(|e| {
            error!(error = %e, "error while registering routes");
        })?;
        let dispatcher = Dispatcher::new(wiring.table, wiring.slots, Arc::clone(&resources));

        Ok(Self {
            router,
            dispatcher,
            services: wiring.services,
            resources,
            stopped: AtomicBool::new(false),
        })
    }

    /// Builds from [`Resources::from_env`].
    pub fn from_env(components: Components, routes: Routes) -> Result<Self, Error> {
        Self::build(Resources::from_env(), components, routes)
    }

    /// Builds from the environment with `config`'s non-default values laid
    /// over it.
    pub fn with_config(config: Config, components: Components, routes: Routes) -> Result<Self, Error> {
        let mut resources = Resources::from_env();
        let mut merged = resources.config().clone();
        merged.merge(config);
        resources.set_config(merged);
        Self::build(resources, components, routes)
    }

    /// Routes and dispatches one request. Runs synchronously on the calling
    /// thread.
    pub fn handle(&self, mut request: Request) -> Response {
        let matched = self.router.lookup(request.method(), request.path());
        request.set_params(matched.params);
        self.dispatcher.dispatch(request, &matched.target)
    }

    /// The registered instance of `T`.
    pub fn service<T: Service>(&self) -> Option<Arc<T>> {
        self.services.get::<T>()
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Binds the configured address and serves until SIGTERM or Ctrl-C.
    pub async fn run(self) -> Result<(), Error> {
        self.run_until(shutdown_signal()).await
    }

    /// Binds the configured address and serves until `signal` resolves.
    pub async fn run_until<F>(self, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let server_config = &self.resources.config().server;
        let addr = server_config.socket_addr()?;
        let server = Server::bind(addr).await?.shutdown_timeout(server_config.shutdown_timeout());
        self.serve(server, signal).await
    }

    /// Serves on `server` until `signal` resolves, then shuts down.
    pub async fn serve<F>(self, server: Server, signal: F) -> Result<(), Error>
    where
        F: Future<Output = ()>,
    {
        let app = Arc::new(self);
        let result = server.serve_with_shutdown(Arc::clone(&app), signal).await;
        app.shutdown();
        result
    }

    /// Shuts services down in reverse registration order, then the storage
    /// connector. Failures are logged. Runs at most once.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!("shutting down");

        let failed = self.services.shutdown_all();
        if let Some(db) = self.resources.connector() {
            if let Err(e) = db.shutdown() {
                error!(error = %e, "database connector shutdown failed");
            }
        }
        info!(services = self.services.len(), failed, "shutdown complete");
    }
}
