use axum::body::{Body, Bytes};
use axum::extract::{OriginalUri, State};
use axum::http::{HeaderMap, Method};
use axum::response::Response;

use crate::error::AppResult;
use crate::postgrest::ProxyRequest;
use crate::state::AppState;

/// Catch-all forwarder: anything not matched by the auth or WebSocket routes
/// falls through to the in-network PostgREST instance (C7).
pub async fn forward(
    State(state): State<AppState>,
    method: Method,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    let req = ProxyRequest {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        headers,
        body: body.to_vec(),
    };

    let resp = state.postgrest.forward(req).await?;

    let mut builder = Response::builder().status(resp.status);
    for (name, value) in resp.headers.iter() {
        builder = builder.header(name, value);
    }
    // Status and headers were already validated on the way in from
    // reqwest's response, so building the outgoing body can't fail.
    Ok(builder.body(Body::from(resp.body)).unwrap())
}
