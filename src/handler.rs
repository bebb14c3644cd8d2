//! Handler table and middleware pipeline.
//!
//! # How actions are stored
//!
//! Controllers of *different* types live in one two-level map,
//! `controller → action → HandlerRecord`. Each action is erased to a shared
//! closure over the controller instance:
//!
//! ```text
//! fn show(&self, ctx: &mut Context) -> Result<(), BoxError>   ← user writes this
//!        ↓ actions.add("Show", Self::show)
//! Box<dyn Fn(&C, &mut Context) -> …>                            ← Actions<C>
//!        ↓ registry captures Arc<C>
//! Arc<dyn Fn(&mut Context) -> …>                                ← ActionFn
//! ```
//!
//! # How chains are built
//!
//! Each record keeps the indices of the middlewares that apply to it, in
//! registration order. When the table is finalised the chain is composed once,
//! wrapping right to left so the first-registered middleware ends up
//! outermost:
//!
//! ```text
//! indices [0, 2]  →  mw0( mw2( action ) )
//! ```
//!
//! Dispatch then makes one virtual call per layer and allocates nothing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::error;

use crate::component::Middleware;
use crate::context::Context;
use crate::descriptor::ActionDescriptor;
use crate::error::{BoxError, Error};
use crate::scope::Scope;

// ── Internal types ────────────────────────────────────────────────────────────

/// A type-erased action, or an action wrapped in middlewares.
pub(crate) type ActionFn = Arc<dyn Fn(&mut Context) -> Result<(), BoxError> + Send + Sync>;

/// The rest of the chain, as seen from inside a [`Middleware`].
pub struct Next<'a> {
    inner: &'a (dyn Fn(&mut Context) -> Result<(), BoxError> + Send + Sync),
}

impl Next<'_> {
    /// Runs the inner middlewares and the action.
    pub fn run(self, ctx: &mut Context) -> Result<(), BoxError> {
        (self.inner)(ctx)
    }
}

/// A registered middleware plus its resolved scope. Its position in the
/// middleware list is the index handler records refer to.
pub struct MiddlewareSlot {
    pub(crate) name: &'static str,
    pub(crate) middleware: Arc<dyn Middleware>,
    pub(crate) scope: Scope,
}

impl MiddlewareSlot {
    pub fn name(&self) -> &'static str { self.name }
    pub fn scope(&self) -> &Scope { &self.scope }
}

// ── Handler records ───────────────────────────────────────────────────────────

pub struct HandlerRecord {
    action: ActionFn,
    middlewares: Vec<usize>,
    chain: Option<ActionFn>,
}

impl HandlerRecord {
    pub(crate) fn new(action: ActionFn) -> Self {
        Self { action, middlewares: Vec::new(), chain: None }
    }

    /// Idempotent: an index already present is not added twice, so
    /// overlapping scopes never run a middleware twice.
    pub(crate) fn inject_middleware(&mut self, index: usize) {
        if !self.middlewares.contains(&index) {
            self.middlewares.push(index);
        }
    }

    /// Middleware indices, outermost first.
    pub fn middlewares(&self) -> &[usize] {
        &self.middlewares
    }

    /// Runs the composed chain, or the bare action before finalisation.
    pub(crate) fn call(&self, ctx: &mut Context) -> Result<(), BoxError> {
        match &self.chain {
            Some(chain) => chain(ctx),
            None => (self.action)(ctx),
        }
    }

    fn compose(&mut self, slots: &[MiddlewareSlot]) {
        let chain = self.middlewares.iter().rev().fold(Arc::clone(&self.action), |next, &index| {
            let Some(slot) = slots.get(index) else {
                error!(index, "invalid middleware index");
                return next;
            };
            let middleware = Arc::clone(&slot.middleware);
            Arc::new(move |ctx: &mut Context| middleware.handle(ctx, Next { inner: &*next }))
        });
        self.chain = Some(chain);
    }
}

// ── Handler table ─────────────────────────────────────────────────────────────

/// `controller → action → HandlerRecord`. Built during registration,
/// read-only once finalised.
#[derive(Default)]
pub struct HandlerTable {
    controllers: HashMap<String, HashMap<String, HandlerRecord>>,
    finalized: bool,
}

impl HandlerTable {
    pub(crate) fn insert(&mut self, controller: &str, action: &str, f: ActionFn) -> Result<(), Error> {
        let actions = self.controllers.entry(controller.to_owned()).or_default();
        if actions.contains_key(action) {
            return Err(Error::InvalidComponent {
                component: controller.to_owned(),
                reason: format!("action {action} is defined twice"),
            });
        }
        actions.insert(action.to_owned(), HandlerRecord::new(f));
        Ok(())
    }

    pub fn get(&self, controller: &str, action: &str) -> Option<&HandlerRecord> {
        self.controllers.get(controller)?.get(action)
    }

    pub(crate) fn get_mut(&mut self, descriptor: &ActionDescriptor) -> Option<&mut HandlerRecord> {
        self.controllers
            .get_mut(&descriptor.controller)?
            .get_mut(&descriptor.action)
    }

    pub fn contains(&self, descriptor: &ActionDescriptor) -> bool {
        self.get(&descriptor.controller, &descriptor.action).is_some()
    }

    pub fn has_controller(&self, controller: &str) -> bool {
        self.controllers.contains_key(controller)
    }

    pub(crate) fn records_mut(&mut self) -> impl Iterator<Item = (ActionDescriptor, &mut HandlerRecord)> {
        self.controllers.iter_mut().flat_map(|(controller, actions)| {
            actions.iter_mut().map(move |(action, record)| {
                (
                    ActionDescriptor { controller: controller.clone(), action: action.clone() },
                    record,
                )
            })
        })
    }

    /// All registered descriptors, sorted.
    pub fn descriptors(&self) -> Vec<ActionDescriptor> {
        let mut all: Vec<_> = self
            .controllers
            .iter()
            .flat_map(|(controller, actions)| {
                actions.keys().map(move |action| ActionDescriptor {
                    controller: controller.clone(),
                    action: action.clone(),
                })
            })
            .collect();
        all.sort_by(|a, b| (&a.controller, &a.action).cmp(&(&b.controller, &b.action)));
        all
    }

    pub fn len(&self) -> usize {
        self.controllers.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Composes every record's chain. Index lists are frozen from here on.
    pub(crate) fn finalize(&mut self, slots: &[MiddlewareSlot]) {
        for actions in self.controllers.values_mut() {
            for record in actions.values_mut() {
                record.compose(slots);
            }
        }
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

#[cfg(test)]
mod tests {
    use http::Method;
    use parking_lot::Mutex;

    use super::*;
    use crate::component::Component;
    use crate::ip::IpExtractor;
    use crate::pool::ContextPool;
    use crate::request::Request;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Component for Recorder {}

    impl Middleware for Recorder {
        fn handle(&self, ctx: &mut Context, next: Next<'_>) -> Result<(), BoxError> {
            self.log.lock().push(format!("{}-pre", self.name));
            let result = next.run(ctx);
            self.log.lock().push(format!("{}-post", self.name));
            result
        }
    }

    fn slot(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> MiddlewareSlot {
        MiddlewareSlot {
            name,
            middleware: Arc::new(Recorder { name, log: Arc::clone(log) }),
            scope: Scope::Global,
        }
    }

    #[test]
    fn inject_middleware_is_idempotent() {
        let mut record = HandlerRecord::new(Arc::new(|_: &mut Context| Ok(())));
        record.inject_middleware(0);
        record.inject_middleware(1);
        record.inject_middleware(0);
        assert_eq!(record.middlewares(), [0, 1]);
    }

    #[test]
    fn first_registered_runs_outermost() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let action_log = Arc::clone(&log);
        let mut table = HandlerTable::default();
        table
            .insert(
                "ItemsController",
                "Show",
                Arc::new(move |_: &mut Context| {
                    action_log.lock().push("handler".to_owned());
                    Ok(())
                }),
            )
            .unwrap();

        let descriptor = ActionDescriptor::new("Items", "Show");
        let record = table.get_mut(&descriptor).unwrap();
        record.inject_middleware(0);
        record.inject_middleware(1);
        table.finalize(&[slot("m1", &log), slot("m2", &log)]);

        let pool = ContextPool::new(IpExtractor::Direct);
        let mut ctx = pool.acquire(Request::new(Method::GET, "/"), "ItemsController", "Show", "/");
        table.get("ItemsController", "Show").unwrap().call(&mut ctx).unwrap();

        assert_eq!(*log.lock(), ["m1-pre", "m2-pre", "handler", "m2-post", "m1-post"]);
    }

    #[test]
    fn duplicate_action_is_rejected() {
        let mut table = HandlerTable::default();
        let f: ActionFn = Arc::new(|_: &mut Context| Ok(()));
        table.insert("AController", "Index", Arc::clone(&f)).unwrap();
        assert!(table.insert("AController", "Index", f).is_err());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn descriptors_are_sorted() {
        let mut table = HandlerTable::default();
        let f: ActionFn = Arc::new(|_: &mut Context| Ok(()));
        table.insert("BController", "Index", Arc::clone(&f)).unwrap();
        table.insert("AController", "Show", Arc::clone(&f)).unwrap();
        table.insert("AController", "Index", f).unwrap();
        let names: Vec<String> = table.descriptors().iter().map(ToString::to_string).collect();
        assert_eq!(names, ["AController.Index", "AController.Show", "BController.Index"]);
    }
}
