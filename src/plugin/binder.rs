//! Request-scoped transactions.
//!
//! A registration's on-route hook gives every route whose marker selects it
//! three hooks: BEGIN before the handler, ROLLBACK on error and COMMIT (or
//! nothing, if the request failed) followed by release when the response is
//! sent.

use crate::db::database::Database;
use crate::db::driver::{Connection, Pool};
use crate::error::DbError;
use crate::hooks::{RequestHook, request_hook};
use crate::server::{RequestScope, RouteOptions};
use tracing::{debug, info, warn};

/// The on-route hook installed for one registration.
pub(crate) fn route_hook<P: Pool>(
    database: Database<P>,
) -> impl Fn(&str, &mut RouteOptions<P::Connection>) + Send + Sync + 'static {
    move |path: &str, options: &mut RouteOptions<P::Connection>| {
        if !options.binds(database.name()) {
            return;
        }
        options.claim();
        debug!(path = %path, database = %database.display_name(), "Route runs in a request transaction");
        options.add_pre_handler(begin_hook(database.clone()));
        options.add_on_error(rollback_hook(database.name()));
        options.add_on_send(commit_hook(database.name()));
    }
}

/// Lease a connection, bind it to the request and BEGIN.
fn begin_hook<P: Pool>(database: Database<P>) -> RequestHook<P::Connection> {
    request_hook(move |scope: RequestScope<P::Connection>| {
        let database = database.clone();
        async move {
            let client = database.connect().await?;
            if let Err(err) = scope.bind(database.name(), client.clone()) {
                client.release().await;
                return Err(err);
            }
            client.begin().await.map_err(DbError::transaction_start)?;
            debug!(database = %database.display_name(), "Request transaction started");
            Ok(())
        }
    })
}

/// Mark the request failed and roll back its transaction.
fn rollback_hook<C: Connection>(name: Option<&str>) -> RequestHook<C> {
    let name = name.map(String::from);
    request_hook(move |scope: RequestScope<C>| {
        let name = name.clone();
        async move {
            scope.mark_failed();
            let Some(client) = scope.get(name.as_deref()) else {
                return Ok(());
            };
            match client.rollback().await {
                Ok(_) => info!(database = name.as_deref().unwrap_or("default"), "Request transaction rolled back"),
                Err(err) => warn!(
                    database = name.as_deref().unwrap_or("default"),
                    error = %DbError::rollback(err),
                    "Request transaction rollback failed"
                ),
            }
            Ok(())
        }
    })
}

/// COMMIT unless the request failed, then release the connection.
fn commit_hook<C: Connection>(name: Option<&str>) -> RequestHook<C> {
    let name = name.map(String::from);
    request_hook(move |scope: RequestScope<C>| {
        let name = name.clone();
        async move {
            let Some(client) = scope.take(name.as_deref()) else {
                return Ok(());
            };
            let result = if scope.is_failed() {
                Ok(())
            } else {
                match client.commit().await {
                    Ok(_) => {
                        info!(database = name.as_deref().unwrap_or("default"), "Request transaction committed");
                        Ok(())
                    }
                    Err(err) => Err(DbError::commit(err)),
                }
            };
            client.release().await;
            result
        }
    })
}
