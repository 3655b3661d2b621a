//! The host the databases are attached to.
//!
//! A [`Host`] collects registrations, routes and lifecycle hooks during
//! startup. [`Host::into_router`] applies the on-route hooks, wraps every
//! route in the request lifecycle and hands back an axum [`Router`] plus a
//! [`HostHandle`] used to shut the host down.

mod lifecycle;
pub mod request;
pub mod route;

pub use request::RequestScope;
pub use route::{RouteOptions, TransactMarker};

use crate::db::database::Database;
use crate::db::driver::Pool;
use crate::db::registry::Registry;
use crate::error::{DbError, DbResult};
use crate::hooks::{CloseHook, HookList, RouteHook, add_handler, request_hook};
use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::routing::MethodRouter;
use axum::{Extension, Router};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

struct RouteEntry<C> {
    path: String,
    method_router: MethodRouter,
    options: RouteOptions<C>,
}

/// Startup-time container for databases, routes and lifecycle hooks.
pub struct Host<P: Pool> {
    registry: Registry<P>,
    routes: Vec<RouteEntry<P::Connection>>,
    on_route: HookList<RouteHook<P::Connection>>,
    on_close: HookList<CloseHook>,
}

impl<P: Pool> Default for Host<P> {
    fn default() -> Self {
        Self {
            registry: Registry::new(),
            routes: Vec::new(),
            on_route: HookList::new(),
            on_close: HookList::new(),
        }
    }
}

impl<P: Pool> Host<P> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &Registry<P> {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry<P> {
        &mut self.registry
    }

    /// A handle to a registered database; `None` selects the default.
    pub fn database(&self, name: Option<&str>) -> DbResult<Database<P>> {
        self.registry.lookup(name).cloned()
    }

    /// Add a hook that sees every route's options before the router is built.
    pub fn add_on_route<F>(&mut self, hook: F) -> &mut Self
    where
        F: Fn(&str, &mut RouteOptions<P::Connection>) + Send + Sync + 'static,
    {
        let hook: RouteHook<P::Connection> = Arc::new(hook);
        self.on_route = add_handler(std::mem::take(&mut self.on_route), hook);
        self
    }

    /// Add a hook run by [`HostHandle::close`].
    pub fn add_on_close<F, Fut>(&mut self, hook: F) -> &mut Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: CloseHook = Box::new(move || Box::pin(hook()));
        self.on_close = add_handler(std::mem::take(&mut self.on_close), hook);
        self
    }

    /// Add a route. On-route hooks run over it when the router is built, so
    /// hooks added later still see it.
    pub fn route(
        &mut self,
        path: &str,
        method_router: MethodRouter,
        options: RouteOptions<P::Connection>,
    ) -> &mut Self {
        self.routes.push(RouteEntry {
            path: path.to_string(),
            method_router,
            options,
        });
        self
    }

    /// Build the router. The registry is frozen from here on.
    pub fn into_router(self) -> (Router, HostHandle<P>) {
        let Host {
            registry,
            routes,
            on_route,
            on_close,
        } = self;
        let registry = Arc::new(registry);

        let mut router = Router::new();
        for RouteEntry {
            path,
            method_router,
            mut options,
        } in routes
        {
            for hook in &on_route {
                hook(&path, &mut options);
            }
            if let Some(marker) = options.transact.clone().filter(|_| !options.is_claimed()) {
                debug!(path = %path, marker = ?marker, "No database claims route marker");
                options.add_pre_handler(request_hook(move |_scope| {
                    let name = marker.name().map(String::from);
                    async move { Err(DbError::unknown_named_client(name.as_deref())) }
                }));
            }

            let options = Arc::new(options);
            let method_router = method_router.layer(middleware::from_fn(
                move |request: Request, next: Next| lifecycle::run(Arc::clone(&options), request, next),
            ));
            router = router.route(&path, method_router);
        }

        info!(databases = registry.len(), "Host router built");
        let router = router.layer(Extension(Arc::clone(&registry)));
        (router, HostHandle { registry, on_close })
    }
}

/// Shuts the host down once the router is done serving.
pub struct HostHandle<P> {
    registry: Arc<Registry<P>>,
    on_close: HookList<CloseHook>,
}

impl<P: Pool> HostHandle<P> {
    pub fn registry(&self) -> &Arc<Registry<P>> {
        &self.registry
    }

    /// Run the on-close hooks in registration order.
    pub async fn close(self) {
        info!(hooks = self.on_close.len(), "Closing host");
        for hook in self.on_close {
            hook().await;
        }
    }
}
