//! Request workers.
//!
//! One fresh task per dispatched request: it sends the derived command to
//! its single target subsystem, waits under the route's deadline, and
//! replies to the original caller exactly once. A worker never talks back
//! to the controller; its crash or timeout affects only its own request.

use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use tokio::sync::oneshot;
use tokio::time;

use prism_core::backend::{Command, ServiceHandle, Services};
use prism_core::errors::{ProtocolError, ServiceFault};

use crate::config::ProjectConfig;
use crate::protocol::{ClientSink, RpcRequest, RpcResponse};
use crate::router::{Route, RouteTarget};

/// Spawn the worker for one request. The reply goes straight to `sink`; the
/// controller takes no further part in the exchange.
pub fn spawn(
    services: Services,
    project: Arc<ProjectConfig>,
    sink: ClientSink,
    route: Route,
    request: RpcRequest,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(services, project, sink, route, request))
}

async fn run(
    services: Services,
    project: Arc<ProjectConfig>,
    sink: ClientSink,
    route: Route,
    request: RpcRequest,
) {
    let RpcRequest { method, params, id } = request;
    let params = params.unwrap_or_else(|| serde_json::json!({}));

    let response = match execute(&services, &project, &route, params).await {
        Ok(result) => RpcResponse::success(id, result),
        Err(WorkerError::Timeout(deadline)) => {
            tracing::warn!(%method, ?deadline, "request timed out");
            RpcResponse::failure(id, &ProtocolError::RequestTimeout(deadline))
        }
        Err(WorkerError::Fault(fault)) => {
            tracing::debug!(%method, code = %fault.code, "backend reported fault");
            RpcResponse::fault(id, &fault)
        }
    };

    sink.respond(response);
}

enum WorkerError {
    Timeout(Duration),
    Fault(ServiceFault),
}

async fn execute(
    services: &Services,
    project: &ProjectConfig,
    route: &Route,
    params: serde_json::Value,
) -> Result<serde_json::Value, WorkerError> {
    match route.target {
        RouteTarget::Liveness => liveness(services, route.timeout).await,
        RouteTarget::ProjectInfo => Ok(project.to_wire()),
        RouteTarget::File(op) => invoke(&services.files, "file manager", op, params, route).await,
        RouteTarget::Buffer(op) => {
            invoke(&services.buffers, "buffer registry", op, params, route).await
        }
        RouteTarget::Runtime(op) => invoke(&services.runtime, "runtime", op, params, route).await,
        RouteTarget::Capability(op) => {
            invoke(&services.capabilities, "capability registry", op, params, route).await
        }
        RouteTarget::Suggestions(op) => {
            invoke(&services.suggestions, "suggestions database", op, params, route).await
        }
        RouteTarget::StdOut(op) => invoke(&services.stdout, "stdout controller", op, params, route).await,
        RouteTarget::StdErr(op) => invoke(&services.stderr, "stderr controller", op, params, route).await,
        RouteTarget::StdIn(op) => invoke(&services.stdin, "stdin controller", op, params, route).await,
    }
}

/// Send one command and await the backend's reply under the deadline.
///
/// Timing out drops the oneshot receiver, so a late backend reply dies on a
/// closed channel: exactly one response per request, no cancellation signal.
async fn invoke<O>(
    handle: &ServiceHandle<O>,
    subsystem: &str,
    op: O,
    params: serde_json::Value,
    route: &Route,
) -> Result<serde_json::Value, WorkerError> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let command = Command::Invoke {
        op,
        params,
        origin: route.context.clone(),
        reply: reply_tx,
    };
    if handle.send(command).await.is_err() {
        return Err(WorkerError::Fault(ServiceFault::unavailable(subsystem)));
    }

    match time::timeout(route.timeout, reply_rx).await {
        Err(_) => Err(WorkerError::Timeout(route.timeout)),
        Ok(Err(_)) => Err(WorkerError::Fault(ServiceFault::unavailable(subsystem))),
        Ok(Ok(Ok(result))) => Ok(result),
        Ok(Ok(Err(fault))) => Err(WorkerError::Fault(fault)),
    }
}

/// Poll the fixed subsystem list concurrently; ok once all confirm, timeout
/// error if any stays silent past the global deadline.
async fn liveness(
    services: &Services,
    deadline: Duration,
) -> Result<serde_json::Value, WorkerError> {
    let checks: Vec<BoxFuture<'static, bool>> = vec![
        Box::pin(ping(services.files.clone())),
        Box::pin(ping(services.buffers.clone())),
        Box::pin(ping(services.runtime.clone())),
        Box::pin(ping(services.capabilities.clone())),
        Box::pin(ping(services.suggestions.clone())),
    ];

    match time::timeout(deadline, join_all(checks)).await {
        Err(_) => Err(WorkerError::Timeout(deadline)),
        Ok(confirmations) => {
            if confirmations.iter().all(|alive| *alive) {
                Ok(serde_json::json!({}))
            } else {
                Err(WorkerError::Fault(ServiceFault::unavailable("backend")))
            }
        }
    }
}

async fn ping<O: Send + 'static>(handle: ServiceHandle<O>) -> bool {
    let (reply_tx, reply_rx) = oneshot::channel();
    if handle.send(Command::Ping { reply: reply_tx }).await.is_err() {
        return false;
    }
    reply_rx.await.is_ok()
}
