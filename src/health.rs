//! Built-in Kubernetes health-check controller.
//!
//! Kubernetes asks two questions. [`HealthController`] answers them.
//!
//! | Probe | Action | Question |
//! |---|---|---|
//! | **Liveness** | `Health#Liveness` | Is the process alive? Failure → restart. |
//! | **Readiness** | `Health#Readiness` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! It is opt-in. Register it and route to it:
//!
//! ```rust
//! use corvid::{Components, HealthController, Routes};
//!
//! let components = Components::new().controller(HealthController);
//! let routes = Routes::new()
//!     .get("/healthz", "Health#Liveness")
//!     .get("/readyz", "Health#Readiness");
//! ```
//!
//! Register your own controller instead if readiness must gate on
//! dependency availability (database connections, downstream services, etc.).

use serde_json::json;

use crate::component::{Actions, Component, Controller};
use crate::context::Context;
use crate::error::BoxError;

pub struct HealthController;

impl Component for HealthController {}

impl Controller for HealthController {
    fn actions(actions: &mut Actions<Self>) {
        actions
            .add("Liveness", Self::liveness)
            .add("Readiness", Self::readiness);
    }
}

impl HealthController {
    /// Always `200 {"status":"ok"}`. If the process can answer HTTP at all,
    /// it is alive; this action intentionally has no dependencies.
    fn liveness(&self, ctx: &mut Context) -> Result<(), BoxError> {
        ctx.json(200, &json!({"status": "ok"}))
    }

    /// `200 {"status":"ready"}`. Boot only finishes once every component has
    /// initialised, so a served request implies readiness.
    fn readiness(&self, ctx: &mut Context) -> Result<(), BoxError> {
        ctx.json(200, &json!({"status": "ready"}))
    }
}
