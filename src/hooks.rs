//! Lifecycle hook types and the handler-list combinator.
//!
//! Every hook kind a route carries is a [`HookList`]. Registrations extend
//! those lists with [`add_handler`], which keeps whatever was already there
//! and appends the new hook at the end.

use crate::error::DbResult;
use crate::server::{RequestScope, RouteOptions};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;

/// Hook run against the state of one request (pre-handler, on-error, on-send).
pub type RequestHook<C> = Arc<dyn Fn(RequestScope<C>) -> BoxFuture<'static, DbResult<()>> + Send + Sync>;

/// Hook run once per route when the router is built. Receives the route path.
pub type RouteHook<C> = Arc<dyn Fn(&str, &mut RouteOptions<C>) + Send + Sync>;

/// Hook run once when the host shuts down.
pub type CloseHook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Box an async closure into a [`RequestHook`].
pub fn request_hook<C, F, Fut>(hook: F) -> RequestHook<C>
where
    C: 'static,
    F: Fn(RequestScope<C>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = DbResult<()>> + Send + 'static,
{
    Arc::new(move |scope: RequestScope<C>| -> BoxFuture<'static, DbResult<()>> { Box::pin(hook(scope)) })
}

/// Ordered hooks of one kind.
#[derive(Clone)]
pub struct HookList<H>(Vec<H>);

impl<H> Default for HookList<H> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<H> std::fmt::Debug for HookList<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("HookList").field(&self.0.len()).finish()
    }
}

impl<H> HookList<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, H> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_vec(self) -> Vec<H> {
        self.0
    }
}

impl<'a, H> IntoIterator for &'a HookList<H> {
    type Item = &'a H;
    type IntoIter = std::slice::Iter<'a, H>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<H> IntoIterator for HookList<H> {
    type Item = H;
    type IntoIter = std::vec::IntoIter<H>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// What a hook slot may hold before the combinator touches it.
pub enum HookSlot<H> {
    Empty,
    Single(H),
    List(Vec<H>),
}

impl<H> From<Option<H>> for HookSlot<H> {
    fn from(hook: Option<H>) -> Self {
        match hook {
            Some(hook) => Self::Single(hook),
            None => Self::Empty,
        }
    }
}

impl<H> From<Vec<H>> for HookSlot<H> {
    fn from(hooks: Vec<H>) -> Self {
        Self::List(hooks)
    }
}

impl<H> From<HookList<H>> for HookSlot<H> {
    fn from(hooks: HookList<H>) -> Self {
        Self::List(hooks.0)
    }
}

/// Combine an existing hook slot with one more hook.
///
/// The result holds the existing hooks in their original order followed by `new`.
pub fn add_handler<H>(existing: impl Into<HookSlot<H>>, new: H) -> HookList<H> {
    let mut hooks = match existing.into() {
        HookSlot::Empty => Vec::with_capacity(1),
        HookSlot::Single(hook) => vec![hook],
        HookSlot::List(hooks) => hooks,
    };
    hooks.push(new);
    HookList(hooks)
}
