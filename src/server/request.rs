//! Per-request transaction slot.

use crate::db::client::Client;
use crate::error::{DbError, DbResult};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

struct RequestClients<C> {
    default: Option<Client<C>>,
    named: HashMap<String, Client<C>>,
}

struct ScopeInner<C> {
    clients: Mutex<RequestClients<C>>,
    failed: AtomicBool,
}

/// Clients bound to the current request by the transaction hooks.
///
/// Extract it in a handler to reach the request transaction:
///
/// ```ignore
/// async fn handler(scope: RequestScope<DbConnection>) -> DbResult<Json<QueryResult>> {
///     let client = scope.client().ok_or(DbError::unknown_named_client(None))?;
///     Ok(Json(client.execute("SELECT 1").await?))
/// }
/// ```
///
/// The slot holds at most one default client and one client per name. It
/// is private to a single request; clones share it.
pub struct RequestScope<C> {
    inner: Arc<ScopeInner<C>>,
}

impl<C> Clone for RequestScope<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> std::fmt::Debug for RequestScope<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let clients = self.clients();
        f.debug_struct("RequestScope")
            .field("default", &clients.default.is_some())
            .field("named", &clients.named.keys().collect::<Vec<_>>())
            .field("failed", &self.is_failed())
            .finish()
    }
}

impl<C> Default for RequestScope<C> {
    fn default() -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                clients: Mutex::new(RequestClients {
                    default: None,
                    named: HashMap::new(),
                }),
                failed: AtomicBool::new(false),
            }),
        }
    }
}

impl<C> RequestScope<C> {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, RequestClients<C>> {
        self.inner
            .clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind `client` as the default (`None`) or named client of this request.
    pub fn bind(&self, name: Option<&str>, client: Client<C>) -> DbResult<()> {
        let mut clients = self.clients();
        match name.filter(|n| !n.is_empty()) {
            None if clients.default.is_some() => Err(DbError::duplicate_request_client(None)),
            None => {
                clients.default = Some(client);
                Ok(())
            }
            Some(name) if clients.named.contains_key(name) => {
                Err(DbError::duplicate_request_client(Some(name)))
            }
            Some(name) => {
                clients.named.insert(name.to_string(), client);
                Ok(())
            }
        }
    }

    /// The client bound for the default database.
    pub fn client(&self) -> Option<Client<C>> {
        self.clients().default.clone()
    }

    /// The client bound for the named database.
    pub fn named(&self, name: &str) -> Option<Client<C>> {
        self.clients().named.get(name).cloned()
    }

    /// The client for `name`, `None` selecting the default.
    pub fn get(&self, name: Option<&str>) -> Option<Client<C>> {
        match name.filter(|n| !n.is_empty()) {
            Some(name) => self.named(name),
            None => self.client(),
        }
    }

    /// Remove and return the client for `name`.
    pub fn take(&self, name: Option<&str>) -> Option<Client<C>> {
        let mut clients = self.clients();
        match name.filter(|n| !n.is_empty()) {
            Some(name) => clients.named.remove(name),
            None => clients.default.take(),
        }
    }

    /// Whether no client is bound.
    pub fn is_empty(&self) -> bool {
        let clients = self.clients();
        clients.default.is_none() && clients.named.is_empty()
    }

    /// Flag the request as failed; bound transactions will not commit.
    pub fn mark_failed(&self) {
        self.inner.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }
}

impl<S, C> FromRequestParts<S> for RequestScope<C>
where
    S: Send + Sync,
    C: Send + 'static,
{
    type Rejection = DbError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestScope<C>>()
            .cloned()
            .ok_or_else(|| DbError::internal("Request scope missing; add the route through Host::route"))
    }
}
