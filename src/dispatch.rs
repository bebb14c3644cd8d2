//! Dispatch core.
//!
//! One call per matched route:
//!
//! 1. acquire a pooled [`Context`] bound to the request and target action;
//! 2. find the handler record, falling back to `ErrorsController.NotFound`;
//! 3. run the composed middleware chain;
//! 4. turn a returned error into a response: an [`HttpError`] keeps its own
//!    status and is serialised as JSON, anything else becomes a generic `500`
//!    whose original text only reaches the log;
//! 5. emit exactly one log record for the request;
//! 6. hand the response back and release the context.
//!
//! The context is released by its guard's `Drop`, so step 6 also runs when a
//! handler panics. Catching the panic itself is the transport's job.

use std::sync::Arc;
use std::time::Instant;

use http::Method;
use http::header::ALLOW;
use tracing::{error, info};

use crate::component::{Actions, Component, Controller};
use crate::context::{ALLOWED_METHODS_KEY, Context};
use crate::descriptor::ActionDescriptor;
use crate::error::BoxError;
use crate::handler::{HandlerTable, MiddlewareSlot};
use crate::http_error::HttpError;
use crate::pool::ContextPool;
use crate::request::Request;
use crate::resources::Resources;
use crate::response::{JSON, Response};

pub(crate) const ERRORS_CONTROLLER: &str = "ErrorsController";
pub(crate) const NOT_FOUND: &str = "NotFound";
pub(crate) const METHOD_NOT_ALLOWED: &str = "MethodNotAllowed";

/// Where a request goes: the action to run and the route pattern that
/// matched.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Target {
    pub controller: String,
    pub action: String,
    pub path: String,
    /// `Allow` value for the built-in `405` action.
    pub allow: Option<String>,
}

impl Target {
    pub fn new(descriptor: &ActionDescriptor, path: impl Into<String>) -> Self {
        Self {
            controller: descriptor.controller.clone(),
            action: descriptor.action.clone(),
            path: path.into(),
            allow: None,
        }
    }

    pub(crate) fn not_found(path: impl Into<String>) -> Self {
        Self {
            controller: ERRORS_CONTROLLER.to_owned(),
            action: NOT_FOUND.to_owned(),
            path: path.into(),
            allow: None,
        }
    }

    pub(crate) fn method_not_allowed(path: impl Into<String>, allow: String) -> Self {
        Self {
            controller: ERRORS_CONTROLLER.to_owned(),
            action: METHOD_NOT_ALLOWED.to_owned(),
            path: path.into(),
            allow: Some(allow),
        }
    }
}

enum Outcome {
    Ok,
    Http(HttpError),
    Internal(BoxError),
}

pub struct Dispatcher {
    table: HandlerTable,
    slots: Vec<MiddlewareSlot>,
    pool: ContextPool,
    resources: Arc<Resources>,
}

impl Dispatcher {
    pub(crate) fn new(table: HandlerTable, slots: Vec<MiddlewareSlot>, resources: Arc<Resources>) -> Self {
        let pool = ContextPool::new(resources.config().server.ip_extractor);
        Self { table, slots, pool, resources }
    }

    pub fn dispatch(&self, request: Request, target: &Target) -> Response {
        let start = Instant::now();
        let method = request.method().clone();
        let path = request.path().to_owned();

        let mut ctx = self.pool.acquire(request, &target.controller, &target.action, &target.path);
        if let Some(allow) = &target.allow {
            ctx.set(ALLOWED_METHODS_KEY, allow.clone());
        }

        let record = match self.table.get(&target.controller, &target.action) {
            Some(record) => Some(record),
            None => {
                ctx.retarget(ERRORS_CONTROLLER, NOT_FOUND);
                self.table.get(ERRORS_CONTROLLER, NOT_FOUND)
            }
        };
        let result = match record {
            Some(record) => record.call(&mut ctx),
            None => Err(not_found_error(&method, &path).into()),
        };

        let outcome = match result {
            Ok(()) => Outcome::Ok,
            Err(e) => match e.downcast::<HttpError>() {
                Ok(http) => {
                    ctx.response_mut().write(http.status(), JSON, http.to_json());
                    Outcome::Http(*http)
                }
                Err(e) => {
                    let generic = HttpError::internal("");
                    ctx.response_mut().write(generic.status(), JSON, generic.to_json());
                    Outcome::Internal(e)
                }
            },
        };

        let ip = ctx.real_ip();
        let handler = ctx.descriptor().to_string();
        let status = ctx.response().status().as_u16();
        let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
        match outcome {
            Outcome::Ok => info!(%ip, %method, %path, %handler, status, duration_ms, "Request processed"),
            Outcome::Http(e) => error!(
                %ip,
                %method,
                %path,
                %handler,
                status,
                duration_ms,
                reason = %e.message,
                attrs = %serde_json::Value::Object(e.attrs.clone()),
                "Request failed"
            ),
            Outcome::Internal(e) => error!(
                %ip,
                %method,
                %path,
                %handler,
                status,
                duration_ms,
                error = %e,
                "Request failed"
            ),
        }

        ctx.take_response()
    }

    /// Dispatches straight to a `Controller#Action`, bypassing the router.
    /// The request path doubles as the route pattern.
    pub fn call(&self, request: Request, descriptor: &str) -> Response {
        let target = Target::new(&ActionDescriptor::parse(descriptor), request.path());
        self.dispatch(request, &target)
    }

    pub fn table(&self) -> &HandlerTable {
        &self.table
    }

    pub fn slots(&self) -> &[MiddlewareSlot] {
        &self.slots
    }

    pub fn pool(&self) -> &ContextPool {
        &self.pool
    }

    pub fn resources(&self) -> &Arc<Resources> {
        &self.resources
    }
}

fn not_found_error(method: &Method, path: &str) -> HttpError {
    HttpError::not_found(format!("Handler not found for {method} {path}"))
}

// ── Built-in fallback actions ─────────────────────────────────────────────────

/// Answers requests no route claims. Registered ahead of user controllers,
/// so global middlewares wrap these actions too.
pub struct ErrorsController;

impl Component for ErrorsController {}

impl Controller for ErrorsController {
    fn name() -> &'static str {
        ERRORS_CONTROLLER
    }

    fn actions(actions: &mut Actions<Self>) {
        actions
            .add(NOT_FOUND, Self::not_found)
            .add(METHOD_NOT_ALLOWED, Self::method_not_allowed);
    }
}

impl ErrorsController {
    fn not_found(&self, ctx: &mut Context) -> Result<(), BoxError> {
        Err(not_found_error(ctx.request().method(), ctx.request().path()).into())
    }

    fn method_not_allowed(&self, ctx: &mut Context) -> Result<(), BoxError> {
        if let Some(allow) = ctx.get::<String>(ALLOWED_METHODS_KEY) {
            ctx.set_header(ALLOW, &allow)?;
        }
        let message = format!("Method {} not allowed for {}", ctx.request().method(), ctx.request().path());
        Err(HttpError::method_not_allowed(message).into())
    }
}
