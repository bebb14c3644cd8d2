//! `Controller.Action` descriptors.
//!
//! Routes and middleware scopes name actions as `Users#Show`,
//! `Users.Show` or `UsersController.Show`; all three normalise to
//! `UsersController.Show`, which is also how the handler table keys
//! controllers and how request logs name the handler.

use std::fmt;

const CONTROLLER_SUFFIX: &str = "Controller";

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ActionDescriptor {
    pub controller: String,
    pub action: String,
}

impl ActionDescriptor {
    pub fn new(controller: &str, action: &str) -> Self {
        Self {
            controller: normalize_controller(controller),
            action: action.to_owned(),
        }
    }

    /// Splits on `#` or `.`. A bare controller name yields an empty action.
    pub fn parse(descriptor: &str) -> Self {
        match descriptor.split_once(['#', '.']) {
            Some((controller, action)) => Self::new(controller.trim(), action.trim()),
            None => Self::new(descriptor.trim(), ""),
        }
    }
}

impl fmt::Display for ActionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.action.is_empty() {
            f.write_str(&self.controller)
        } else {
            write!(f, "{}.{}", self.controller, self.action)
        }
    }
}

/// Appends the `Controller` suffix unless already present.
pub fn normalize_controller(controller: &str) -> String {
    if controller.ends_with(CONTROLLER_SUFFIX) {
        controller.to_owned()
    } else {
        format!("{controller}{CONTROLLER_SUFFIX}")
    }
}
