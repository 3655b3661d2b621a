//! Request lifecycle middleware: pre-handler, handler, on-error, on-send.

use crate::error::DbResult;
use crate::hooks::{HookList, RequestHook};
use crate::server::request::RequestScope;
use crate::server::route::RouteOptions;
use axum::extract::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use tracing::{debug, warn};

/// Drive one request through the hooks of its route.
///
/// Pre-handlers run in order until one fails; a failure skips the handler
/// and becomes the response. A failed pre-handler or a 4xx/5xx handler
/// response marks the request failed and runs the on-error hooks. On-send
/// hooks always run, and an on-send failure replaces a successful response.
///
/// If this future is dropped before it finishes, the scope's clients drop
/// with it and roll back any transaction they still hold.
pub(crate) async fn run<C>(options: Arc<RouteOptions<C>>, mut request: Request, next: Next) -> Response
where
    C: Send + 'static,
{
    let scope = RequestScope::<C>::new();
    request.extensions_mut().insert(scope.clone());
    let path = request.uri().path().to_string();

    let mut response = match run_until_error(&options.pre_handler, &scope).await {
        Ok(()) => {
            let response = next.run(request).await;
            if is_failure(&response) {
                debug!(path = %path, status = response.status().as_u16(), "Handler reported failure");
                fail(&options.on_error, &scope).await;
            }
            response
        }
        Err(err) => {
            debug!(path = %path, error = %err, "Pre-handler failed");
            fail(&options.on_error, &scope).await;
            err.into_response()
        }
    };

    for hook in &options.on_send {
        if let Err(err) = hook(scope.clone()).await {
            warn!(path = %path, error = %err, "On-send hook failed");
            if !is_failure(&response) {
                response = err.into_response();
            }
        }
    }
    response
}

fn is_failure(response: &Response) -> bool {
    let status = response.status();
    status.is_client_error() || status.is_server_error()
}

async fn run_until_error<C>(hooks: &HookList<RequestHook<C>>, scope: &RequestScope<C>) -> DbResult<()> {
    for hook in hooks {
        hook(scope.clone()).await?;
    }
    Ok(())
}

async fn fail<C>(hooks: &HookList<RequestHook<C>>, scope: &RequestScope<C>) {
    scope.mark_failed();
    for hook in hooks {
        if let Err(err) = hook(scope.clone()).await {
            warn!(error = %err, "On-error hook failed");
        }
    }
}
