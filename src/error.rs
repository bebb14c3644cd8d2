//! Unified startup error type.

use std::io;

use thiserror::Error;

/// Error type of everything user code hands to corvid: lifecycle hooks,
/// actions, and middlewares.
///
/// Return an [`HttpError`](crate::HttpError) to control the response status;
/// anything else becomes a generic `500`.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The error type returned by corvid's fallible boot operations.
///
/// Application-level errors (404, 422, etc.) are expressed as
/// [`HttpError`](crate::HttpError) values flowing through the handler chain,
/// not as `Error`s. This type surfaces wiring failures (invalid components,
/// missing dependencies, bad middleware scopes, bad routes) and
/// infrastructure failures (binding a port, the storage connector). Every
/// variant is fatal: an [`App`](crate::App) is never built once one occurs.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{component}: {reason}")]
    InvalidComponent { component: String, reason: String },

    #[error("{component} is already registered")]
    DuplicateComponent { component: String },

    #[error("{component} requires service {dependency}, but it was not found")]
    MissingDependency {
        component: String,
        dependency: &'static str,
    },

    #[error("{component} initialization failed: {source}")]
    Init {
        component: String,
        #[source]
        source: BoxError,
    },

    #[error("{middleware}: {reason}")]
    InvalidScope { middleware: String, reason: String },

    #[error("{middleware}: action {descriptor} in {scope} does not exist")]
    UnknownAction {
        middleware: String,
        descriptor: String,
        scope: &'static str,
    },

    #[error("invalid route {method} {path}: {reason}")]
    InvalidRoute {
        method: String,
        path: String,
        reason: String,
    },

    #[error("invalid socket address `{0}`")]
    Address(String),

    #[error("storage connector: {0}")]
    Storage(#[source] BoxError),

    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("{} registration errors: {}", .0.len(), join(.0))]
    Multiple(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multiple_lists_every_error() {
        let err = Error::Multiple(vec![
            Error::DuplicateComponent { component: "a::Auth".into() },
            Error::InvalidScope {
                middleware: "a::Cors".into(),
                reason: "no scope".into(),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "2 registration errors: a::Auth is already registered; a::Cors: no scope"
        );
    }

    #[test]
    fn unknown_action_names_the_descriptor_as_written() {
        let err = Error::UnknownAction {
            middleware: "Auth".into(),
            descriptor: "Foo#Bar".into(),
            scope: "Only",
        };
        assert!(err.to_string().contains("Foo#Bar"));
    }
}
