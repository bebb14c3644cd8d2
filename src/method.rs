//! HTTP methods accepted in route tables.
//!
//! A route names one of the standard methods or `ANY` (also spelled `*`),
//! which matches every method on its path.

use std::fmt;
use std::str::FromStr;

use http::Method;

/// The methods a path can be routed on, and therefore the ones answered with
/// `405 Method Not Allowed` when a path is known but the method is not.
pub const STANDARD_METHODS: [Method; 9] = [
    Method::GET,
    Method::POST,
    Method::PUT,
    Method::DELETE,
    Method::PATCH,
    Method::HEAD,
    Method::OPTIONS,
    Method::CONNECT,
    Method::TRACE,
];

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RouteMethod {
    Any,
    Only(Method),
}

impl RouteMethod {
    pub fn matches(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::Only(m) => m == method,
        }
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for RouteMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ANY" | "*" => Ok(Self::Any),
            _ => STANDARD_METHODS
                .iter()
                .find(|m| m.as_str() == s)
                .map(|m| Self::Only(m.clone()))
                .ok_or_else(|| format!("invalid method {s}")),
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        Self::Only(method)
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("ANY"),
            Self::Only(m) => f.write_str(m.as_str()),
        }
    }
}
