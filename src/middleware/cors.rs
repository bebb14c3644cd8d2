//! Cross-origin resource sharing.
//!
//! Preflight requests (`OPTIONS` with `Access-Control-Request-Method`) are
//! answered with `204` without reaching the action. Other requests from an
//! allowed origin get `Access-Control-Allow-Origin` added. Requests without
//! an `Origin` header pass through untouched.
//!
//! The policy comes from `cors` in the configuration unless one is given
//! with [`Cors::with_config`]. Register it globally: preflights for paths
//! without an `OPTIONS` route are then caught before the `405` fallback.

use std::sync::Arc;

use http::Method;
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ACCESS_CONTROL_REQUEST_METHOD, ORIGIN, VARY,
};

use crate::component::{Component, Middleware};
use crate::config::CorsConfig;
use crate::context::Context;
use crate::error::BoxError;
use crate::handler::Next;
use crate::resources::Resources;

/// Adds CORS headers and answers preflights.
#[derive(Debug, Default)]
pub struct Cors {
    policy: Option<CorsConfig>,
}

impl Cors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(policy: CorsConfig) -> Self {
        Self { policy: Some(policy) }
    }

    fn allowed_origin(policy: &CorsConfig, origin: &str) -> Option<String> {
        if policy.origins.iter().any(|o| o == "*") {
            // `*` is not valid together with credentials; reflect instead.
            return Some(if policy.credentials { origin.to_owned() } else { "*".to_owned() });
        }
        policy
            .origins
            .iter()
            .find(|o| o.eq_ignore_ascii_case(origin))
            .map(|_| origin.to_owned())
    }
}

impl Component for Cors {
    fn init(&mut self, resources: &Arc<Resources>) -> Result<(), BoxError> {
        if self.policy.is_none() {
            self.policy = Some(resources.config().cors.clone());
        }
        Ok(())
    }
}

impl Middleware for Cors {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError> {
        let default_policy;
        let policy = match &self.policy {
            Some(policy) => policy,
            None => {
                default_policy = CorsConfig::default();
                &default_policy
            }
        };

        let Some(origin) = ctx.header(ORIGIN.as_str()).map(str::to_owned) else {
            return next.run(ctx);
        };
        let preflight = *ctx.request().method() == Method::OPTIONS
            && ctx.header(ACCESS_CONTROL_REQUEST_METHOD.as_str()).is_some();
        let allowed = Self::allowed_origin(policy, &origin);

        ctx.set_header(VARY, "Origin")?;
        if let Some(allowed) = &allowed {
            ctx.set_header(ACCESS_CONTROL_ALLOW_ORIGIN, allowed)?;
            if policy.credentials {
                ctx.set_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, "true")?;
            }
        }

        if !preflight {
            return next.run(ctx);
        }

        if allowed.is_some() {
            ctx.set_header(ACCESS_CONTROL_ALLOW_METHODS, &policy.methods.join(", "))?;
            let headers = if policy.headers.is_empty() {
                ctx.header(ACCESS_CONTROL_REQUEST_HEADERS.as_str()).unwrap_or_default().to_owned()
            } else {
                policy.headers.join(", ")
            };
            if !headers.is_empty() {
                ctx.set_header(ACCESS_CONTROL_ALLOW_HEADERS, &headers)?;
            }
            if policy.max_age > 0 {
                ctx.set_header(ACCESS_CONTROL_MAX_AGE, &policy.max_age.to_string())?;
            }
        }
        ctx.no_content();
        Ok(())
    }
}
