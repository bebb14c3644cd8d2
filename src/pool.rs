//! Context pool.
//!
//! Acquiring hands out a [`PooledContext`] guard; dropping the guard releases
//! the context back to the pool. Release therefore runs on every exit path,
//! including early returns and unwinding out of a panicking handler.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::trace;

use crate::context::Context;
use crate::ip::IpExtractor;
use crate::request::Request;

/// Idle contexts kept around by default. Beyond this, released contexts are
/// freed.
pub const DEFAULT_MAX_IDLE: usize = 1024;

pub struct ContextPool {
    idle: Mutex<Vec<Box<Context>>>,
    max_idle: usize,
    allocated: AtomicUsize,
    ip: IpExtractor,
}

impl ContextPool {
    pub fn new(ip: IpExtractor) -> Self {
        Self::with_max_idle(ip, DEFAULT_MAX_IDLE)
    }

    pub fn with_max_idle(ip: IpExtractor, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            max_idle,
            allocated: AtomicUsize::new(0),
            ip,
        }
    }

    /// Takes an idle context (or allocates one) and binds it to `request`.
    pub fn acquire(&self, request: Request, controller: &str, action: &str, path: &str) -> PooledContext<'_> {
        let mut ctx = self.idle.lock().pop().unwrap_or_else(|| {
            let total = self.allocated.fetch_add(1, Ordering::Relaxed) + 1;
            trace!(total, "allocating context");
            Box::new(Context::new(self.ip))
        });
        ctx.reset(request, controller, action, path);
        PooledContext { ctx: Some(ctx), pool: self }
    }

    fn release(&self, mut ctx: Box<Context>) {
        ctx.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(ctx);
        }
    }

    /// Contexts currently waiting for reuse.
    pub fn idle(&self) -> usize {
        self.idle.lock().len()
    }

    /// Contexts allocated over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }
}

/// A context on loan from a [`ContextPool`].
pub struct PooledContext<'a> {
    ctx: Option<Box<Context>>,
    pool: &'a ContextPool,
}

impl Deref for PooledContext<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        // Only `Drop` takes the context out.
        self.ctx.as_deref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledContext<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx.as_deref_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledContext<'_> {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx);
        }
    }
}

#[cfg(test)]
mod tests {
    use http::Method;

    use super::*;

    fn request() -> Request {
        Request::new(Method::GET, "/items")
    }

    #[test]
    fn released_context_is_reused() {
        let pool = ContextPool::new(IpExtractor::Direct);
        drop(pool.acquire(request(), "ItemsController", "Index", "/items"));
        drop(pool.acquire(request(), "ItemsController", "Index", "/items"));
        assert_eq!(pool.allocated(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn reacquired_context_has_no_prior_state() {
        let pool = ContextPool::new(IpExtractor::Direct);
        {
            let ctx = pool.acquire(request(), "ItemsController", "Index", "/items");
            ctx.set("user", "alice".to_owned());
            ctx.set("admin", true);
        }

        let ctx = pool.acquire(request(), "UsersController", "Show", "/users/{id}");
        assert_eq!(pool.allocated(), 1);
        assert_eq!(ctx.get::<String>("user"), None);
        assert_eq!(ctx.get::<bool>("admin"), None);
        assert_eq!(ctx.controller(), "UsersController");
        assert_eq!(ctx.path(), "/users/{id}");
    }

    #[test]
    fn concurrent_loans_get_distinct_contexts() {
        let pool = ContextPool::new(IpExtractor::Direct);
        let a = pool.acquire(request(), "A", "X", "/a");
        let b = pool.acquire(request(), "B", "Y", "/b");
        a.set("k", 1_u8);
        assert_eq!(b.get::<u8>("k"), None);
        drop((a, b));
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn idle_list_is_bounded() {
        let pool = ContextPool::with_max_idle(IpExtractor::Direct, 1);
        let a = pool.acquire(request(), "A", "X", "/a");
        let b = pool.acquire(request(), "B", "Y", "/b");
        drop((a, b));
        assert_eq!(pool.idle(), 1);
    }
}
