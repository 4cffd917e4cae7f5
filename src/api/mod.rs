// HTTP surface: unit routes, liveness and storage endpoints

use std::io;
use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::Request,
    response::Response,
    routing::{MethodRouter, any},
};
use futures_util::TryStreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::io::{ReaderStream, StreamReader};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

use crate::run::RunCommand;

pub mod storage;

pub use storage::storage_routes;

/// Path of the liveness route.
pub const STATUS_PATH: &str = "/status";

/// Buffer between a running process and the response body.
const RESPONSE_PIPE_CAPACITY: usize = 64 * 1024;

/// Route answering every method by invoking `command` with the request body
/// as input and the response body as output.
pub fn unit_route(command: Arc<RunCommand>) -> MethodRouter {
    any(move |request: Request| {
        let command = command.clone();
        async move { dispatch(command, request).await }
    })
}

/// Route answering `OK` to every method.
pub fn status_route() -> MethodRouter {
    any(|| async { "OK" })
}

/// Wrap the finished route table with request tracing.
pub fn with_tracing(router: Router) -> Router {
    router.layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Check that `path` is a literal route: absolute, without capture or
/// wildcard syntax.
pub fn is_literal_path(path: &str) -> bool {
    path.starts_with('/')
        && !path.contains(['{', '}'])
        && !path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
}

/// Stream the request body into a fresh invocation and its output back out.
///
/// The invocation runs on its own task and outlives the request if the
/// client goes away; output it writes after that is discarded.
async fn dispatch(command: Arc<RunCommand>, request: Request) -> Response {
    let invocation = Uuid::new_v4();
    tracing::debug!(
        unit = %command.name(),
        kind = %command.kind(),
        %invocation,
        "handler called"
    );

    let body = request.into_body().into_data_stream().map_err(io::Error::other);
    let mut input = StreamReader::new(body);
    let (mut writer, reader) = tokio::io::duplex(RESPONSE_PIPE_CAPACITY);

    let span = tracing::debug_span!("invocation", unit = %command.name(), %invocation);
    tokio::spawn(
        async move {
            command.invoke(&mut writer, &mut input).await;
            let _ = writer.shutdown().await;
            tracing::trace!("handler finished");
        }
        .instrument(span),
    );

    Response::new(Body::from_stream(ReaderStream::new(reader)))
}
