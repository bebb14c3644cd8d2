//! # corvid
//!
//! Controllers, services and middlewares for HTTP services, wired once at
//! boot and dispatched without locks.
//!
//! ## The model
//!
//! - **Services** are long-lived singletons (repositories, clients). They
//!   can depend on each other.
//! - **Controllers** group actions, addressed as `Users#Show`. They depend
//!   on services.
//! - **Middlewares** wrap actions, onion style, and are scoped to all
//!   actions, only some, or all but some.
//!
//! A component with dependencies holds them as `Arc<T>` fields and is
//! registered through a factory that resolves them from an [`Injector`]. A
//! missing service, an unknown action in a middleware scope or a route to
//! nowhere fails [`App::build`]: a misconfigured app never serves a request.
//!
//! Once built, the handler table, middleware chains and service map are
//! read-only. The only state touched per request is a pooled [`Context`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use corvid::{
//!     Actions, App, BoxError, Component, Components, Context, Controller, Error, HttpError,
//!     Resources, Routes, Service,
//! };
//!
//! struct Greeter;
//! impl Component for Greeter {}
//! impl Service for Greeter {}
//!
//! impl Greeter {
//!     fn greet(&self, name: &str) -> String {
//!         format!("hello, {name}")
//!     }
//! }
//!
//! struct Hello {
//!     greeter: Arc<Greeter>,
//! }
//!
//! impl Component for Hello {}
//!
//! impl Controller for Hello {
//!     fn actions(actions: &mut Actions<Self>) {
//!         actions.add("Show", Self::show);
//!     }
//! }
//!
//! impl Hello {
//!     fn show(&self, ctx: &mut Context) -> Result<(), BoxError> {
//!         let name = ctx.param("name").ok_or_else(|| HttpError::bad_request("name required"))?;
//!         let greeting = self.greeter.greet(name);
//!         ctx.text(200, greeting);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Error> {
//!     let components = Components::new()
//!         .service(Greeter)
//!         .controller_with(|deps| Ok(Hello { greeter: deps.service()? }));
//!     let routes = Routes::new().get("/hello/{name}", "Hello#Show");
//!
//!     App::build(Resources::from_env(), components, routes)?.run().await
//! }
//! ```

mod app;
mod component;
mod config;
mod context;
mod cookie;
mod descriptor;
mod dispatch;
mod error;
mod files;
mod handler;
mod health;
mod http_error;
mod ip;
mod logging;
mod method;
mod pool;
mod registry;
mod request;
mod resources;
mod response;
mod router;
mod scope;
mod server;

pub mod middleware;

pub use app::App;
pub use component::{Actions, Component, Controller, Middleware, Service};
pub use config::{Config, CorsConfig, DatabaseConfig, GeneralConfig, ServerConfig, StaticConfig};
pub use context::{ALLOWED_METHODS_KEY, Context};
pub use cookie::{Cookie, SameSite};
pub use descriptor::{ActionDescriptor, normalize_controller};
pub use dispatch::{Dispatcher, ErrorsController, Target};
pub use error::{BoxError, Error};
pub use files::StaticController;
pub use handler::{HandlerRecord, HandlerTable, MiddlewareSlot, Next};
pub use health::HealthController;
pub use http_error::HttpError;
pub use ip::IpExtractor;
pub use logging::{LogHandle, parse_level};
pub use method::{RouteMethod, STANDARD_METHODS};
pub use pool::{ContextPool, PooledContext};
pub use registry::{Components, Injector, Registry, ServiceMap, Wiring};
pub use request::Request;
pub use resources::{DatabaseConnector, Resources};
pub use response::Response;
pub use router::{Route, RouteMatch, Router, Routes, normalize_path};
pub use scope::{Scope, ScopeSpec};
pub use server::{Server, shutdown_signal};

/// Re-exported so applications name methods, statuses and headers without
/// a direct `http` dependency.
pub use http::{Method, StatusCode, header};
