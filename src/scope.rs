//! Middleware scopes.
//!
//! A middleware is registered with exactly one of:
//!
//! - `Global` — every action;
//! - `Only(list)` — the listed actions;
//! - `Except(list)` — every action but the listed ones.
//!
//! List entries are descriptors (`Users#Show`, `Users.Show`,
//! `UsersController.Show`) or a bare controller name, which covers all of
//! that controller's actions. Every entry must name something already in the
//! handler table.

use crate::descriptor::ActionDescriptor;
use crate::error::Error;
use crate::handler::HandlerTable;

#[derive(Clone, Debug, PartialEq)]
pub enum Scope {
    Global,
    Only(Vec<ActionDescriptor>),
    Except(Vec<ActionDescriptor>),
}

impl Scope {
    pub fn matches(&self, target: &ActionDescriptor) -> bool {
        match self {
            Scope::Global => true,
            Scope::Only(list) => list.iter().any(|d| covers(d, target)),
            Scope::Except(list) => !list.iter().any(|d| covers(d, target)),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Only(_) => "only",
            Scope::Except(_) => "except",
        }
    }
}

fn covers(entry: &ActionDescriptor, target: &ActionDescriptor) -> bool {
    entry.controller == target.controller && (entry.action.is_empty() || entry.action == target.action)
}

/// A scope as written at registration time, before validation.
#[derive(Clone, Debug, Default)]
pub struct ScopeSpec {
    global: bool,
    only: Option<Vec<String>>,
    except: Option<Vec<String>>,
}

impl ScopeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self) -> Self {
        self.global = true;
        self
    }

    pub fn only<I, S>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.only = Some(descriptors.into_iter().map(Into::into).collect());
        self
    }

    pub fn except<I, S>(mut self, descriptors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.except = Some(descriptors.into_iter().map(Into::into).collect());
        self
    }

    /// Checks that exactly one scope was chosen and that every listed
    /// descriptor exists in `table`.
    pub(crate) fn resolve(self, middleware: &str, table: &HandlerTable) -> Result<Scope, Error> {
        let chosen = usize::from(self.global) + usize::from(self.only.is_some()) + usize::from(self.except.is_some());
        match chosen {
            0 => {
                return Err(Error::InvalidScope {
                    middleware: middleware.to_owned(),
                    reason: "no scope given, expected one of global, only, except".to_owned(),
                });
            }
            1 => {}
            _ => {
                return Err(Error::InvalidScope {
                    middleware: middleware.to_owned(),
                    reason: "more than one scope given, expected exactly one of global, only, except".to_owned(),
                });
            }
        }

        if self.global {
            return Ok(Scope::Global);
        }
        if let Some(list) = self.only {
            if list.is_empty() {
                return Err(Error::InvalidScope {
                    middleware: middleware.to_owned(),
                    reason: "only scope lists no actions".to_owned(),
                });
            }
            return Ok(Scope::Only(validate(middleware, "only", list, table)?));
        }
        let list = self.except.unwrap_or_default();
        Ok(Scope::Except(validate(middleware, "except", list, table)?))
    }
}

fn validate(
    middleware: &str,
    scope: &'static str,
    list: Vec<String>,
    table: &HandlerTable,
) -> Result<Vec<ActionDescriptor>, Error> {
    list.into_iter()
        .map(|written| {
            let descriptor = ActionDescriptor::parse(&written);
            let exists = if descriptor.action.is_empty() {
                table.has_controller(&descriptor.controller)
            } else {
                table.contains(&descriptor)
            };
            if exists {
                Ok(descriptor)
            } else {
                Err(Error::UnknownAction {
                    middleware: middleware.to_owned(),
                    descriptor: written,
                    scope,
                })
            }
        })
        .collect()
}
