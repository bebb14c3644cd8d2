//! Built-in middlewares.
//!
//! Middlewares are the place for cross-cutting concerns: CORS, request ids,
//! authentication-header inspection. Register them after controllers with a
//! scope:
//!
//! ```rust,ignore
//! Components::new()
//!     .controller(Users::default())
//!     .use_global(Cors::new());
//! ```

mod cors;

pub use cors::Cors;
