//! Minimal corvid example: a users API with an in-memory store, an API-key
//! guard on writes, CORS and health checks.
//!
//! Run with:
//!   GENERAL_LOG_LEVEL=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/users
//!   curl http://localhost:3000/users/1
//!   curl -X POST http://localhost:3000/users \
//!        -H 'x-api-key: secret' \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -X DELETE http://localhost:3000/users/1 -H 'x-api-key: secret'
//!   curl -X PUT http://localhost:3000/users      # 405, Allow: GET, POST
//!   curl http://localhost:3000/healthz

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use corvid::middleware::Cors;
use corvid::{
    Actions, App, BoxError, Component, Components, Context, Controller, Error, HealthController, HttpError,
    Injector, Middleware, Next, Resources, Routes, Service, header,
};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ── Service ───────────────────────────────────────────────────────────────────

#[derive(Clone, Serialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Default)]
struct UserStore {
    next_id: AtomicU64,
    users: RwLock<BTreeMap<u64, User>>,
}

impl Component for UserStore {
    fn init(&mut self, _: &Arc<Resources>) -> Result<(), BoxError> {
        self.next_id = AtomicU64::new(1);
        Ok(())
    }
}

impl Service for UserStore {}

impl UserStore {
    fn all(&self) -> Vec<User> {
        self.users.read().values().cloned().collect()
    }

    fn get(&self, id: u64) -> Option<User> {
        self.users.read().get(&id).cloned()
    }

    fn insert(&self, name: String) -> User {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let user = User { id, name };
        self.users.write().insert(id, user.clone());
        user
    }

    fn remove(&self, id: u64) -> bool {
        self.users.write().remove(&id).is_some()
    }
}

// ── Controller ────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

struct Users {
    store: Arc<UserStore>,
}

impl Component for Users {}

impl Controller for Users {
    fn actions(actions: &mut Actions<Self>) {
        actions
            .add("Index", Self::index)
            .add("Show", Self::show)
            .add("Create", Self::create)
            .add("Destroy", Self::destroy);
    }
}

impl Users {
    fn build(deps: &Injector<'_>) -> Result<Self, Error> {
        Ok(Self { store: deps.service()? })
    }

    fn index(&self, ctx: &mut Context) -> Result<(), BoxError> {
        ctx.json(200, &self.store.all())
    }

    fn show(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let id = user_id(ctx)?;
        let user = self
            .store
            .get(id)
            .ok_or_else(|| HttpError::not_found("User not found").with_attr("id", id))?;
        ctx.json(200, &user)
    }

    fn create(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let input: CreateUser = ctx.bind()?;
        if input.name.trim().is_empty() {
            return Err(HttpError::unprocessable("name must not be empty").into());
        }
        let user = self.store.insert(input.name);
        ctx.set_header(header::LOCATION, &format!("/users/{}", user.id))?;
        ctx.json(201, &user)
    }

    fn destroy(&self, ctx: &mut Context) -> Result<(), BoxError> {
        let id = user_id(ctx)?;
        if !self.store.remove(id) {
            return Err(HttpError::not_found("User not found").with_attr("id", id).into());
        }
        ctx.no_content();
        Ok(())
    }
}

fn user_id(ctx: &Context) -> Result<u64, HttpError> {
    ctx.param("id")
        .and_then(|id| id.parse().ok())
        .ok_or_else(|| HttpError::bad_request("id must be a number"))
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// Rejects requests without the key from `APP_API_KEY` (default `secret`).
#[derive(Default)]
struct ApiKey {
    key: String,
}

impl Component for ApiKey {
    fn init(&mut self, resources: &Arc<Resources>) -> Result<(), BoxError> {
        self.key = resources
            .config()
            .app
            .get("api_key")
            .cloned()
            .unwrap_or_else(|| "secret".to_owned());
        Ok(())
    }
}

impl Middleware for ApiKey {
    fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError> {
        if ctx.header("x-api-key") != Some(self.key.as_str()) {
            return Err(HttpError::unauthorized("missing or invalid api key").into());
        }
        next.run(ctx)
    }
}

// ── Boot ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Error> {
    let components = Components::new()
        .service(UserStore::default())
        .controller_with(Users::build)
        .controller(HealthController)
        .use_global(Cors::new())
        .use_only(ApiKey::default(), ["Users#Create", "Users#Destroy"]);

    let routes = Routes::new()
        .scope(
            "/users",
            Routes::new()
                .get("/", "Users#Index")
                .post("/", "Users#Create")
                .get("/{id}", "Users#Show")
                .delete("/{id}", "Users#Destroy"),
        )
        .get("/healthz", "Health#Liveness")
        .get("/readyz", "Health#Readiness");

    App::from_env(components, routes)?.run().await
}
